use tracing_subscriber::filter::{Directive, EnvFilter};

/// HTTP and OAuth crates that log every request at debug level.
const CHATTY_TARGETS: &[&str] = &["h2", "hyper", "hyper_util", "reqwest", "rustls", "yup_oauth2"];

/// Install the stderr subscriber. A non-empty `RUST_LOG` replaces `log_level` entirely.
pub fn init(log_level: &str) {
    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    let _ = tracing_subscriber::fmt()
        .with_env_filter(build_filter(log_level, rust_log.as_deref()))
        .with_writer(std::io::stderr)
        .try_init();
}

fn build_filter(log_level: &str, rust_log: Option<&str>) -> EnvFilter {
    if let Some(filter) = rust_log
        .filter(|s| !s.trim().is_empty())
        .and_then(|s| EnvFilter::try_new(s).ok())
    {
        return filter;
    }

    let mut filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    for target in CHATTY_TARGETS {
        if let Ok(directive) = format!("{}=warn", target).parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }
    filter
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_flag_quiets_http_stack() {
        let filter = build_filter("debug", None).to_string();
        assert!(filter.contains("debug"));
        assert!(filter.contains("hyper=warn"));
        assert!(filter.contains("yup_oauth2=warn"));
    }

    #[test]
    fn test_rust_log_replaces_level_flag() {
        let filter = build_filter("debug", Some("bqviz=trace")).to_string();
        assert_eq!(filter, "bqviz=trace");
    }

    #[test]
    fn test_blank_rust_log_is_ignored() {
        let filter = build_filter("warn", Some("  ")).to_string();
        assert!(filter.contains("reqwest=warn"));
    }
}
