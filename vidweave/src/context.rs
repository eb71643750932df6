//! Process-wide application context.
//!
//! Created once at startup and passed to whichever component needs it;
//! replaces ambient globals for uptime/version reporting.

use std::time::Instant;

/// Process-wide context shared across services.
#[derive(Debug, Clone)]
pub struct AppContext {
    started_at: Instant,
    version: &'static str,
}

impl AppContext {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Seconds elapsed since process start.
    pub fn uptime_secs(&self) -> f64 {
        self.started_at.elapsed().as_secs_f64()
    }

    pub fn version(&self) -> &'static str {
        self.version
    }
}

impl Default for AppContext {
    fn default() -> Self {
        Self::new()
    }
}
