//! Logging initialization module
//!
//! Provides a single initialization point for the tracing facility.

use std::sync::Once;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Logging profile configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Profile {
    /// Human-readable output for development
    Development,
    /// JSON structured output for production
    Production,
    /// No-op subscriber for deterministic testing
    Test,
}

static INIT_ONCE: Once = Once::new();

/// Initialize the logging facility
///
/// Call once at application startup. Subsequent calls are no-ops.
pub fn init(profile: Profile) {
    INIT_ONCE.call_once(|| {
        match profile {
            Profile::Development => {
                tracing_subscriber::fmt()
                    .with_env_filter(
                        EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| EnvFilter::new("usermerge=debug")),
                    )
                    .init();
            }
            Profile::Production => {
                tracing_subscriber::fmt()
                    .json()
                    .with_env_filter(
                        EnvFilter::try_from_default_env()
                            .unwrap_or_else(|_| EnvFilter::new("usermerge=info")),
                    )
                    .init();
            }
            Profile::Test => {
                // Tests assert on returned logs, not on trace output.
                tracing_subscriber::registry().init();
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        init(Profile::Test);
        init(Profile::Test);
    }
}
