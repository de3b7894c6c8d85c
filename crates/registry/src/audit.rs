//! Per-entity audit events. Events are emitted after the durable state
//! change they describe; delivery is best effort and never fails the owning
//! operation.

use {serde_json::Value, std::sync::Arc};

#[derive(Clone, Debug, serde::Serialize)]
pub struct AuditEvent {
    /// Entity class the event belongs to (`transaction`, `customer`,
    /// `owner`).
    pub flag: String,
    /// Event name as downstream sinks know it, e.g. `transactionCreation`.
    pub action: String,
    pub message: String,
    pub data: Value,
    pub critical: bool,
}

impl AuditEvent {
    pub fn new(flag: &str, action: &str, message: impl Into<String>, data: Value) -> Self {
        Self {
            flag: flag.to_string(),
            action: action.to_string(),
            message: message.into(),
            data,
            critical: false,
        }
    }

    pub fn critical(mut self) -> Self {
        self.critical = true;
        self
    }
}

#[async_trait::async_trait]
pub trait AuditSink: Send + Sync {
    async fn emit(&self, event: AuditEvent) -> anyhow::Result<()>;
}

/// Best-effort wrapper around the configured sink. A sink failure is logged
/// at debug level and otherwise dropped.
#[derive(Clone)]
pub struct Emitter {
    sink: Arc<dyn AuditSink>,
}

impl Emitter {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self { sink }
    }

    pub async fn emit(&self, event: AuditEvent) {
        let action = event.action.clone();
        if let Err(err) = self.sink.emit(event).await {
            tracing::debug!(?err, %action, "audit emit failed");
        }
    }
}

/// Default sink: events go to the log stream.
pub struct TracingSink;

#[async_trait::async_trait]
impl AuditSink for TracingSink {
    async fn emit(&self, event: AuditEvent) -> anyhow::Result<()> {
        tracing::info!(
            flag = %event.flag,
            action = %event.action,
            critical = event.critical,
            data = %event.data,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// One old→new delta of an update event.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct ChangedField {
    pub field: String,
    pub old_value: Value,
    pub new_value: Value,
}

/// Deltas between two serialized rows, restricted to `fields` and to entries
/// that actually changed.
pub fn changed_fields<'a>(
    old: &Value,
    new: &Value,
    fields: impl IntoIterator<Item = &'a str>,
) -> Vec<ChangedField> {
    fields
        .into_iter()
        .filter_map(|field| {
            let old_value = old.get(field).cloned().unwrap_or(Value::Null);
            let new_value = new.get(field).cloned().unwrap_or(Value::Null);
            (old_value != new_value).then(|| ChangedField {
                field: field.to_string(),
                old_value,
                new_value,
            })
        })
        .collect()
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
    impl AuditSink for FailingSink {
        async fn emit(&self, _event: AuditEvent) -> anyhow::Result<()> {
            anyhow::bail!("sink down")
        }
    }

    pub(crate) struct RecordingSink {
        pub events: Mutex<Vec<AuditEvent>>,
    }

    #[async_trait::async_trait]
    impl AuditSink for RecordingSink {
        async fn emit(&self, event: AuditEvent) -> anyhow::Result<()> {
            self.events
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(event);
            Ok(())
        }
    }

    #[tokio::test]
    async fn emitter_swallows_sink_failures() {
        let emitter = Emitter::new(Arc::new(FailingSink));
        emitter
            .emit(AuditEvent::new("transaction", "transactionCreation", "m", json!({})))
            .await;
    }

    #[tokio::test]
    async fn emitter_delivers_in_order() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let emitter = Emitter::new(sink.clone());
        emitter
            .emit(AuditEvent::new("transaction", "transactionCreation", "a", json!({})))
            .await;
        emitter
            .emit(
                AuditEvent::new("customer", "transactionCreationCustomer", "b", json!({}))
                    .critical(),
            )
            .await;
        let events = sink.events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "transactionCreation");
        assert!(!events[0].critical);
        assert!(events[1].critical);
    }

    #[test]
    fn diff_is_restricted_to_requested_fields() {
        let old = json!({"status": "pending", "refund_reason": "late", "amount": 5});
        let new = json!({"status": "completed", "refund_reason": null, "amount": 7});
        let diff = changed_fields(&old, &new, ["status", "refund_reason"]);
        assert_eq!(
            diff,
            vec![
                ChangedField {
                    field: "status".to_string(),
                    old_value: json!("pending"),
                    new_value: json!("completed"),
                },
                ChangedField {
                    field: "refund_reason".to_string(),
                    old_value: json!("late"),
                    new_value: json!(null),
                },
            ]
        );
        assert!(changed_fields(&old, &old, ["status"]).is_empty());
    }
}
