use std::env;

/// Environment variable holding the log filter for inquest processes.
pub const LOG_ENV: &str = "INQUEST_LOG";

/// Install the global tracing subscriber, writing to stderr.
///
/// The filter comes from `INQUEST_LOG`, then `RUST_LOG`, then `default_filter`.
/// Provider processes must not log to stdout since it carries the wire protocol.
pub fn init_tracing(default_filter: &str) {
    let filter = filter_directive(default_filter);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn filter_directive(default_filter: &str) -> String {
    [LOG_ENV, "RUST_LOG"]
        .into_iter()
        .filter_map(|name| env::var(name).ok())
        .find(|value| !value.trim().is_empty())
        .unwrap_or_else(|| default_filter.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inquest_log_wins_over_rust_log() {
        temp_env::with_vars([(LOG_ENV, Some("debug")), ("RUST_LOG", Some("warn"))], || {
            assert_eq!(filter_directive("info"), "debug");
        });
        temp_env::with_vars([(LOG_ENV, None), ("RUST_LOG", Some("warn"))], || {
            assert_eq!(filter_directive("info"), "warn");
        });
        temp_env::with_vars([(LOG_ENV, None::<&str>), ("RUST_LOG", None)], || {
            assert_eq!(filter_directive("info"), "info");
        });
    }
}
