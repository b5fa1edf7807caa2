use crate::{DispatchError, MessageHandler, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// What to do when a queue already has a handler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicatePolicy {
    /// Last registration wins
    #[default]
    Overwrite,
    /// Keep the first handler and return an error
    Reject,
}

struct Entry {
    queue_name: String,
    handler: Arc<dyn MessageHandler>,
}

/// Registry of message handlers by queue name, in registration order
pub struct HandlerRegistry {
    entries: RwLock<Vec<Entry>>,
    policy: DuplicatePolicy,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::with_policy(DuplicatePolicy::default())
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        HandlerRegistry {
            entries: RwLock::new(Vec::new()),
            policy,
        }
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Register a handler for a queue and hand it back to the caller.
    ///
    /// Re-registering a queue keeps its original position in the registry.
    pub fn register<H: MessageHandler + 'static>(
        &self,
        queue_name: impl Into<String>,
        handler: H,
    ) -> Result<Arc<H>> {
        let handler = Arc::new(handler);
        self.register_arc(queue_name, handler.clone())?;
        Ok(handler)
    }

    /// Register an already shared handler
    pub fn register_arc(
        &self,
        queue_name: impl Into<String>,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let queue_name = queue_name.into();
        let mut entries = self.entries.write();

        match entries.iter_mut().find(|e| e.queue_name == queue_name) {
            Some(_) if self.policy == DuplicatePolicy::Reject => {
                return Err(DispatchError::DuplicateHandler(queue_name));
            }
            Some(existing) => {
                info!(
                    queue = %queue_name,
                    previous = existing.handler.name(),
                    handler = handler.name(),
                    "Replacing handler"
                );
                existing.handler = handler;
            }
            None => {
                info!(queue = %queue_name, handler = handler.name(), "Registered handler");
                entries.push(Entry {
                    queue_name,
                    handler,
                });
            }
        }

        Ok(())
    }

    /// Get the handler for a queue
    pub fn get(&self, queue_name: &str) -> Option<Arc<dyn MessageHandler>> {
        let entries = self.entries.read();
        entries
            .iter()
            .find(|e| e.queue_name == queue_name)
            .map(|e| e.handler.clone())
    }

    /// Check if a handler is registered for a queue
    pub fn has_handler(&self, queue_name: &str) -> bool {
        self.get(queue_name).is_some()
    }

    /// Get all registered queue names
    pub fn queue_names(&self) -> Vec<String> {
        let entries = self.entries.read();
        entries.iter().map(|e| e.queue_name.clone()).collect()
    }

    /// Owned copy of every (queue, handler) pair, used to spawn workers
    pub fn snapshot(&self) -> Vec<(String, Arc<dyn MessageHandler>)> {
        let entries = self.entries.read();
        entries
            .iter()
            .map(|e| (e.queue_name.clone(), e.handler.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{handler_fn, HandlerResult};
    use async_trait::async_trait;
    use proptest::prelude::*;

    #[derive(Debug)]
    struct Tagged(&'static str);

    #[async_trait]
    impl MessageHandler for Tagged {
        async fn handle(&self, _message: String) -> HandlerResult {
            Ok(())
        }

        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_register_returns_handler() {
        let registry = HandlerRegistry::new();
        let handler = registry.register("emails", Tagged("mailer")).unwrap();

        assert_eq!(handler.name(), "mailer");
        assert!(registry.has_handler("emails"));
        assert!(!registry.has_handler("unknown"));
        assert_eq!(registry.get("emails").unwrap().name(), "mailer");
    }

    #[test]
    fn test_overwrite_keeps_position() {
        let registry = HandlerRegistry::new();
        registry.register("a", Tagged("first")).unwrap();
        registry.register("b", Tagged("second")).unwrap();
        registry.register("a", Tagged("third")).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(registry.queue_names(), vec!["a", "b"]);
        assert_eq!(registry.get("a").unwrap().name(), "third");
    }

    #[test]
    fn test_reject_duplicate() {
        let registry = HandlerRegistry::with_policy(DuplicatePolicy::Reject);
        registry.register("a", Tagged("first")).unwrap();

        let err = registry.register("a", Tagged("second")).unwrap_err();
        assert!(matches!(err, DispatchError::DuplicateHandler(ref q) if q == "a"));
        assert_eq!(registry.get("a").unwrap().name(), "first");
    }

    #[test]
    fn test_snapshot_is_detached() {
        let registry = HandlerRegistry::new();
        registry
            .register("q", handler_fn(|_m: String| async { Ok(()) }))
            .unwrap();

        let snapshot = registry.snapshot();
        registry.register("later", Tagged("late")).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].0, "q");
        assert_eq!(registry.len(), 2);
    }

    proptest! {
        #[test]
        fn prop_last_registration_wins(names in proptest::collection::vec("[a-d]", 1..20)) {
            let registry = HandlerRegistry::new();
            let labels = ["l0", "l1", "l2", "l3", "l4", "l5", "l6", "l7", "l8", "l9",
                "l10", "l11", "l12", "l13", "l14", "l15", "l16", "l17", "l18", "l19"];

            for (i, name) in names.iter().enumerate() {
                registry.register(name.clone(), Tagged(labels[i])).unwrap();
            }

            let mut expected_order: Vec<String> = Vec::new();
            for name in &names {
                if !expected_order.contains(name) {
                    expected_order.push(name.clone());
                }
            }
            prop_assert_eq!(registry.queue_names(), expected_order.clone());

            for queue in expected_order {
                let last = names.iter().rposition(|n| *n == queue).unwrap();
                let handler = registry.get(&queue).unwrap();
                prop_assert_eq!(handler.name(), labels[last]);
            }
        }
    }
}
