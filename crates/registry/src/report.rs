//! In-process error reporting. Reports carry a sanitized, size-capped view
//! of the failure; the reporter itself never raises.

use {
    chrono::{DateTime, Utc},
    serde_json::Value,
    std::{fmt::Write as _, sync::Arc},
};

pub const STACK_MAX_BYTES: usize = 4000;
pub const CONTEXT_MAX_BYTES: usize = 2000;
pub const PREVIEW_MAX_BYTES: usize = 1500;

#[derive(Clone, Debug, serde::Serialize)]
pub struct ErrorReport {
    pub message: String,
    pub error: String,
    /// The flattened cause chain, standing in for a stack trace.
    pub stack: String,
    pub context: Value,
    pub at: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait ErrorSink: Send + Sync {
    async fn record(&self, report: ErrorReport) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct Reporter {
    sink: Arc<dyn ErrorSink>,
}

impl Reporter {
    pub fn new(sink: Arc<dyn ErrorSink>) -> Self {
        Self { sink }
    }

    pub async fn record(
        &self,
        message: &str,
        error: &(dyn std::error::Error + 'static),
        context: Value,
    ) {
        let report = ErrorReport {
            message: clip(message, PREVIEW_MAX_BYTES),
            error: clip(&error.to_string(), PREVIEW_MAX_BYTES),
            stack: clip(&cause_chain(error), STACK_MAX_BYTES),
            context: clip_context(context),
            at: Utc::now(),
        };
        if let Err(err) = self.sink.record(report).await {
            tracing::debug!(?err, "error reporter sink failed");
        }
    }
}

/// Default sink: reports go to the log stream.
pub struct TracingSink;

#[async_trait::async_trait]
impl ErrorSink for TracingSink {
    async fn record(&self, report: ErrorReport) -> anyhow::Result<()> {
        tracing::error!(
            error = %report.error,
            stack = %report.stack,
            context = %report.context,
            "{}",
            report.message
        );
        Ok(())
    }
}

fn cause_chain(error: &(dyn std::error::Error + 'static)) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        let _ = write!(chain, "\ncaused by: {cause}");
        source = cause.source();
    }
    chain
}

fn clip(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

/// Context stays structured while it fits; an oversized context degrades to
/// a clipped string preview rather than being dropped.
fn clip_context(context: Value) -> Value {
    let encoded = context.to_string();
    if encoded.len() <= CONTEXT_MAX_BYTES {
        context
    } else {
        Value::String(clip(&encoded, CONTEXT_MAX_BYTES))
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        serde_json::json,
        std::sync::{Mutex, PoisonError},
    };

    struct FailingSink;

    #[async_trait::async_trait]
    impl ErrorSink for FailingSink {
        async fn record(&self, _report: ErrorReport) -> anyhow::Result<()> {
            anyhow::bail!("sink down")
        }
    }

    struct RecordingSink {
        reports: Mutex<Vec<ErrorReport>>,
    }

    #[async_trait::async_trait]
    impl ErrorSink for RecordingSink {
        async fn record(&self, report: ErrorReport) -> anyhow::Result<()> {
            self.reports
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(report);
            Ok(())
        }
    }

    #[test]
    fn clips_on_char_boundaries() {
        let text = "é".repeat(1000);
        let clipped = clip(&text, PREVIEW_MAX_BYTES);
        assert!(clipped.len() <= PREVIEW_MAX_BYTES);
        assert!(clipped.is_char_boundary(clipped.len()));
        assert_eq!(clip("short", PREVIEW_MAX_BYTES), "short");
    }

    #[test]
    fn oversized_context_degrades_to_a_preview() {
        let kept = clip_context(json!({"k": "v"}));
        assert_eq!(kept, json!({"k": "v"}));

        let clipped = clip_context(json!({"k": "x".repeat(3000)}));
        let Value::String(preview) = clipped else {
            panic!("expected string preview")
        };
        assert!(preview.len() <= CONTEXT_MAX_BYTES);
    }

    #[tokio::test]
    async fn reporter_swallows_sink_failures() {
        let reporter = Reporter::new(Arc::new(FailingSink));
        let err = crate::error::Error::InvalidStatus;
        reporter.record("operation failed", &err, json!({})).await;
    }

    #[tokio::test]
    async fn reports_carry_the_cause_chain() {
        let sink = Arc::new(RecordingSink {
            reports: Mutex::new(Vec::new()),
        });
        let reporter = Reporter::new(sink.clone());
        let err = crate::error::Error::Store(database::Error::classify(sqlx::Error::PoolTimedOut));
        reporter
            .record("query failed", &err, json!({"operation": "query"}))
            .await;
        let reports = sink.reports.lock().unwrap();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].stack.contains("caused by:"));
        assert_eq!(reports[0].context, json!({"operation": "query"}));
    }
}
