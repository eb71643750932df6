//! URL helpers.

use url::Url;

/// Whether `source` is an absolute http(s) URL with a host.
///
/// Anything else (file ids, relative paths, other schemes) is treated as an
/// opaque file-store handle by the resolver.
pub fn is_absolute_url(source: &str) -> bool {
    match Url::parse(source) {
        Ok(url) => matches!(url.scheme(), "http" | "https") && url.has_host(),
        Err(_) => false,
    }
}
