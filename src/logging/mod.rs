use crate::cli::TracingFormat;
use crate::config::Config;
use tracing_subscriber::EnvFilter;

/// Configure and initialize logging for the application.
pub fn setup_logging(config: &Config, format: TracingFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let base_level = &config.log_level;
        EnvFilter::new(format!("warn,sentinel={base_level}"))
    });

    let builder = tracing_subscriber::fmt().with_target(true).with_env_filter(filter);

    match format {
        TracingFormat::Pretty => builder.pretty().init(),
        TracingFormat::Json => builder.json().init(),
    }
}
