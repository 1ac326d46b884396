use tracing::metadata::LevelFilter;

pub const ENV_LOG_LEVEL: &str = "MODEL_CENTER_LOG";

/// Installs a compact stderr subscriber. The level comes from
/// `MODEL_CENTER_LOG` and defaults to `info`.
pub fn setup_logging() {
    let filter = level_from(std::env::var(ENV_LOG_LEVEL).ok().as_deref());

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    let _ = tracing::subscriber::set_global_default(subscriber);
}

fn level_from(value: Option<&str>) -> LevelFilter {
    value
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(LevelFilter::INFO)
}
