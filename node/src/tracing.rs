use clap::ValueEnum;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    /// One JSON object per line, for log collectors.
    Json,
}

/// Installs the global subscriber; verbosity comes from `RUST_LOG`.
pub fn init_logging(format: LogFormat) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env());
    match format {
        LogFormat::Plain => builder.try_init().ok(),
        LogFormat::Json => builder.json().try_init().ok(),
    };
}

/// Span wrapping the handling of one inbound request.
pub fn request_span() -> tracing::Span {
    let request_id = format!("{:016x}", rand::random::<u64>());
    tracing::info_span!(target: "cosigner", "cosign_request", %request_id)
}
