//! Spans around user-initiated actions and subscriber setup for the binary.

use std::fmt::Display;
use std::future::Future;

use tracing::Instrument;

/// Run `fut` inside a `ui.action` span, recording failures on the span.
pub async fn in_ui_span<T, E, F>(action: &'static str, fut: F) -> Result<T, E>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    let span = tracing::info_span!("ui.action", action, status = tracing::field::Empty);
    let result = fut.instrument(span.clone()).await;
    match &result {
        Ok(_) => {
            span.record("status", "ok");
        }
        Err(err) => {
            span.record("status", "error");
            span.in_scope(|| tracing::warn!(action, error = %err, "UI action failed"));
        }
    }
    result
}

/// Install the fmt subscriber honouring `RUST_LOG` (default `info`).
pub fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    // Logs go to stderr so stdout stays machine-readable.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
