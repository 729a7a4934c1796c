//! Interceptor hooks around record writes
//!
//! The record server calls `before` ahead of every create, update and delete,
//! `after` once the write succeeded, and `on_error` if it failed. Dispatch is
//! broadcast: every interceptor registered for an operation sees every
//! resource and ignores kinds it does not handle.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::StatsError;
use crate::resources::Resource;

/// Write operation a hook runs around
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Update => f.write_str("update"),
            Operation::Delete => f.write_str("delete"),
        }
    }
}

/// Hooks invoked around one operation.
///
/// For updates `before` receives the stored pre-image and `after` the new
/// record. Hooks never fail the write; implementations handle their own
/// errors.
pub trait Interceptor: Send + Sync {
    fn name(&self) -> &'static str;

    fn before(&self, resource: &Resource);

    fn after(&self, resource: &Resource);

    fn on_error(&self, _error: &StatsError, _resource: &Resource) {}
}

/// Interceptors per operation, in registration order
#[derive(Default)]
pub struct InterceptorRegistry {
    create: Vec<Arc<dyn Interceptor>>,
    update: Vec<Arc<dyn Interceptor>>,
    delete: Vec<Arc<dyn Interceptor>>,
}

impl InterceptorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, operation: Operation, interceptor: Arc<dyn Interceptor>) {
        trace!(operation = %operation, interceptor = interceptor.name(), "Registered interceptor");
        self.slot_mut(operation).push(interceptor);
    }

    pub fn interceptors(&self, operation: Operation) -> &[Arc<dyn Interceptor>] {
        match operation {
            Operation::Create => &self.create,
            Operation::Update => &self.update,
            Operation::Delete => &self.delete,
        }
    }

    fn slot_mut(&mut self, operation: Operation) -> &mut Vec<Arc<dyn Interceptor>> {
        match operation {
            Operation::Create => &mut self.create,
            Operation::Update => &mut self.update,
            Operation::Delete => &mut self.delete,
        }
    }

    pub fn before(&self, operation: Operation, resource: &Resource) {
        for interceptor in self.interceptors(operation) {
            interceptor.before(resource);
        }
    }

    pub fn after(&self, operation: Operation, resource: &Resource) {
        for interceptor in self.interceptors(operation) {
            interceptor.after(resource);
        }
    }

    pub fn on_error(&self, operation: Operation, error: &StatsError, resource: &Resource) {
        for interceptor in self.interceptors(operation) {
            interceptor.on_error(error, resource);
        }
    }

    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One record write as published by the record server, one JSON object per
/// line:
///
/// ```json
/// {"operation":"create","resource":{"resourceType":"Patient","id":"p1"}}
/// {"operation":"update","before":{..},"after":{..}}
/// {"operation":"delete","resource":{..}}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "lowercase")]
pub enum Notification {
    Create { resource: Resource },
    Update { before: Resource, after: Resource },
    Delete { resource: Resource },
}

impl Notification {
    pub fn operation(&self) -> Operation {
        match self {
            Notification::Create { .. } => Operation::Create,
            Notification::Update { .. } => Operation::Update,
            Notification::Delete { .. } => Operation::Delete,
        }
    }

    /// The record as it stands once the write is done
    pub fn resource(&self) -> &Resource {
        match self {
            Notification::Create { resource } | Notification::Delete { resource } => resource,
            Notification::Update { after, .. } => after,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Interceptor for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        fn before(&self, resource: &Resource) {
            self.calls.lock().unwrap().push(format!("before:{}", resource.kind()));
        }

        fn after(&self, resource: &Resource) {
            self.calls.lock().unwrap().push(format!("after:{}", resource.kind()));
        }
    }

    #[test]
    fn test_dispatch_is_per_operation() {
        let recorder = Arc::new(Recorder::default());
        let mut registry = InterceptorRegistry::new();
        registry.register(Operation::Create, recorder.clone());
        assert_eq!(registry.len(), 1);

        let resource = Resource::Other;
        registry.before(Operation::Create, &resource);
        registry.after(Operation::Create, &resource);
        registry.after(Operation::Delete, &resource);
        registry.on_error(Operation::Create, &StatsError::Rejected("x".into()), &resource);

        assert_eq!(*recorder.calls.lock().unwrap(), vec!["before:Other", "after:Other"]);
    }

    #[test]
    fn test_notification_json() {
        let line = r#"{"operation":"update",
            "before":{"resourceType":"Patient","id":"p1","gender":"male"},
            "after":{"resourceType":"Patient","id":"p1","gender":"female"}}"#;
        let notification: Notification = serde_json::from_str(line).unwrap();
        assert_eq!(notification.operation(), Operation::Update);
        assert_eq!(notification.resource().id(), Some("p1"));

        let line = r#"{"operation":"create","resource":{"resourceType":"Observation","id":"o1"}}"#;
        let notification: Notification = serde_json::from_str(line).unwrap();
        assert_eq!(notification.resource(), &Resource::Other);
    }
}
