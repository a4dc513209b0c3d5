//! Logging initialization
//!
//! Logs go to stderr; stdout carries JSON results only.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

static INIT_ONCE: Once = Once::new();

/// Default filter directive for a `-v` count.
pub fn default_directive(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "pdfpromote_core=info,pdfpromote_cli=info",
        1 => "pdfpromote_core=debug,pdfpromote_cli=debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` wins over `verbosity`.
/// Later calls are no-ops.
pub fn init(format: LogFormat, verbosity: u8) {
    INIT_ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive(verbosity)));
        let builder = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr);
        // A subscriber set elsewhere (e.g. by a test harness) is left in place.
        let _ = match format {
            LogFormat::Text => builder.try_init(),
            LogFormat::Json => builder.json().try_init(),
        };
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_idempotent() {
        init(LogFormat::Text, 0);
        init(LogFormat::Json, 2);
    }

    #[test]
    fn test_verbosity_directives() {
        assert!(default_directive(0).contains("info"));
        assert!(default_directive(1).contains("debug"));
        assert_eq!(default_directive(5), "trace");
    }
}
