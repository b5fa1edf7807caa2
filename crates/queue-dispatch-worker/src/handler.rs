use async_trait::async_trait;
use queue_dispatch_core::{HandlerResult, MessageHandler};
use tracing::info;

/// Example handler that logs every payload
pub struct LogHandler {
    queue_name: String,
}

impl LogHandler {
    pub fn new(queue_name: impl Into<String>) -> Self {
        LogHandler {
            queue_name: queue_name.into(),
        }
    }
}

#[async_trait]
impl MessageHandler for LogHandler {
    async fn handle(&self, message: String) -> HandlerResult {
        info!(queue = %self.queue_name, "{}", message);
        Ok(())
    }

    fn name(&self) -> &str {
        "log"
    }
}

/// Example handler that expects JSON and reports its shape
pub struct JsonHandler {
    queue_name: String,
}

impl JsonHandler {
    pub fn new(queue_name: impl Into<String>) -> Self {
        JsonHandler {
            queue_name: queue_name.into(),
        }
    }

    fn describe(message: &str) -> anyhow::Result<String> {
        let json: serde_json::Value = serde_json::from_str(message)
            .map_err(|e| anyhow::anyhow!("Invalid JSON: {}", e))?;

        let summary = match &json {
            serde_json::Value::Object(obj) => {
                let keys: Vec<&str> = obj.keys().map(String::as_str).collect();
                format!("object with keys [{}]", keys.join(", "))
            }
            serde_json::Value::Array(items) => format!("array of {} items", items.len()),
            other => format!("scalar {}", other),
        };
        Ok(summary)
    }
}

#[async_trait]
impl MessageHandler for JsonHandler {
    async fn handle(&self, message: String) -> HandlerResult {
        let summary = Self::describe(&message)?;
        info!(queue = %self.queue_name, "Received {}", summary);
        Ok(())
    }

    fn name(&self) -> &str {
        "json"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_handler() {
        let handler = LogHandler::new("events");
        assert!(handler.handle("anything".to_string()).await.is_ok());
        assert_eq!(handler.name(), "log");
    }

    #[tokio::test]
    async fn test_json_handler() {
        let handler = JsonHandler::new("events");

        assert!(handler.handle(r#"{"a": 1}"#.to_string()).await.is_ok());
        let err = handler.handle("not json".to_string()).await.unwrap_err();
        assert!(err.to_string().contains("Invalid JSON"));
    }

    #[test]
    fn test_json_describe() {
        assert_eq!(
            JsonHandler::describe(r#"{"user": "x", "id": 7}"#).unwrap(),
            "object with keys [id, user]"
        );
        assert_eq!(JsonHandler::describe("[1, 2, 3]").unwrap(), "array of 3 items");
        assert_eq!(JsonHandler::describe("42").unwrap(), "scalar 42");
    }
}
