//! Structured logging bootstrap for embedders.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

static INIT: Once = Once::new();

/// Initialize the tracing subscriber once.
/// `RUST_LOG` overrides the default `info` level.
pub fn init() {
    INIT.call_once(|| {
        let spec = std::env::var(EnvFilter::DEFAULT_ENV).ok();
        tracing_subscriber::fmt()
            .with_env_filter(filter(spec.as_deref()))
            .init();
    });
}

/// Build the filter from an optional `RUST_LOG` value; `info` when unset
fn filter(spec: Option<&str>) -> EnvFilter {
    match spec {
        Some(spec) => EnvFilter::new(spec),
        None => EnvFilter::new("info"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_spec_replaces_default_level() {
        // "error" must lower verbosity below the default, not merge with it
        assert_eq!(filter(Some("error")).to_string(), "error");
        assert_eq!(filter(None).to_string(), "info");
    }
}
