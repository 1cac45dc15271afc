//! Logging setup for ragkit services.
//!
//! [`init_telemetry`] installs a global `tracing` subscriber filtered by
//! `RUST_LOG` (default `info`). Output is human-readable unless
//! `RAGKIT_LOG_FORMAT=json`, in which case one JSON object is written per
//! event. [`init_with_storage`] additionally captures closed spans into a
//! [`SharedTraceStorage`] for inspection.

pub mod memory;

use std::str::FromStr;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, Layer};

pub use memory::{InMemoryTraceLayer, SharedTraceStorage, SpanData};

/// Environment variable selecting the output format.
pub const LOG_FORMAT_ENV: &str = "RAGKIT_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("unknown log format '{other}'")),
        }
    }
}

impl LogFormat {
    /// Read the format from `RAGKIT_LOG_FORMAT`, falling back to pretty.
    pub fn from_env() -> Self {
        std::env::var(LOG_FORMAT_ENV).ok().and_then(|v| v.parse().ok()).unwrap_or_default()
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::layer().with_target(false).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_current_span(true).boxed(),
    }
}

/// Install the global subscriber for `service_name`.
///
/// Fails if a global subscriber is already set.
pub fn init_telemetry(service_name: &str) -> Result<(), TryInitError> {
    let format = LogFormat::from_env();
    tracing_subscriber::registry()
        .with(fmt_layer(format).with_filter(env_filter()))
        .try_init()?;
    tracing::info!(service.name = service_name, ?format, "telemetry initialized");
    Ok(())
}

/// Like [`init_telemetry`], also recording every closed span into `storage`.
pub fn init_with_storage(
    service_name: &str,
    storage: Arc<SharedTraceStorage>,
) -> Result<(), TryInitError> {
    let format = LogFormat::from_env();
    tracing_subscriber::registry()
        .with(fmt_layer(format).with_filter(env_filter()))
        .with(InMemoryTraceLayer::new(storage))
        .try_init()?;
    tracing::info!(service.name = service_name, ?format, "telemetry initialized with span capture");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_known_names() {
        assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" JSON ".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!("pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!("".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[tokio::test]
    async fn global_init_captures_spans_and_rejects_second_install() {
        let storage = Arc::new(SharedTraceStorage::new());
        init_with_storage("telemetry-test", storage.clone()).unwrap();

        {
            let _span = tracing::info_span!("answer_query", query_len = 12u64).entered();
            tracing::info!("inside span");
        }

        assert_eq!(storage.spans_named("answer_query").len(), 1);
        assert!(init_telemetry("telemetry-test").is_err());
    }
}
