//! Logging setup.
//!
//! Diagnostics go to stderr through `tracing`, so thumbnail bytes written to
//! stdout by the `thumb` command stay clean. The filter comes from `RUST_LOG`
//! when set, otherwise from the verbosity flag.

use tracing_subscriber::EnvFilter;

/// Default filter directive for a verbosity level.
pub fn default_directive(verbose: u8) -> &'static str {
    match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber.
///
/// Returns an error if a subscriber is already installed.
pub fn init(verbose: u8) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_parse() {
        for verbose in 0..3 {
            EnvFilter::try_new(default_directive(verbose)).unwrap();
        }
    }

    #[test]
    fn second_init_is_an_error() {
        // Whichever call runs first in this process may win; the second must not.
        let _ = init(0);
        assert!(init(0).is_err());
    }
}
