//! Shared HTTP client construction.

use std::sync::OnceLock;
use std::time::Duration;

use tracing::debug;

pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate may have installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build a client with a total-request timeout.
pub fn build_client(timeout: Duration) -> reqwest::Client {
    install_rustls_provider();
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}
