//! Notification replay
//!
//! Reads notifications as JSON lines and drives them through an interceptor
//! registry the way the record server does: Before hooks, then the primary
//! write to the patient directory, then After hooks (or `on_error` if the
//! write was rejected).

use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use crate::error::StatsError;
use crate::interceptor::{InterceptorRegistry, Notification, Operation};
use crate::resources::{kinds, Resource};
use crate::subjects::InMemorySubjects;

/// Totals for one replay run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReplaySummary {
    pub notifications: usize,
    pub malformed: usize,
    pub rejected: usize,
}

pub struct Replayer {
    registry: Arc<InterceptorRegistry>,
    subjects: Arc<InMemorySubjects>,
}

impl Replayer {
    pub fn new(registry: Arc<InterceptorRegistry>, subjects: Arc<InMemorySubjects>) -> Self {
        Self { registry, subjects }
    }

    /// Run one notification through the hooks
    pub fn apply(&self, notification: &Notification) -> Result<(), StatsError> {
        let operation = notification.operation();
        let hook_input = match notification {
            Notification::Create { resource } | Notification::Delete { resource } => resource,
            Notification::Update { before, .. } => before,
        };
        self.registry.before(operation, hook_input);

        let written = notification.resource();
        match self.write(operation, written) {
            Ok(()) => {
                self.registry.after(operation, written);
                Ok(())
            }
            Err(e) => {
                self.registry.on_error(operation, &e, written);
                Err(e)
            }
        }
    }

    /// The primary write. Patients land in the directory conditions look
    /// their subjects up in.
    fn write(&self, operation: Operation, resource: &Resource) -> Result<(), StatsError> {
        if matches!(resource, Resource::Other) {
            return Ok(());
        }
        let id = resource
            .id()
            .ok_or_else(|| StatsError::Rejected(format!("{} without an id", resource.kind())))?;

        if let Resource::Patient(patient) = resource {
            match operation {
                Operation::Create | Operation::Update => {
                    self.subjects.put(patient.clone());
                }
                Operation::Delete => {
                    if self.subjects.remove(id).is_none() {
                        return Err(StatsError::Rejected(format!(
                            "{} {} does not exist",
                            kinds::PATIENT,
                            id
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Replay a stream of JSON-line notifications.
    ///
    /// Malformed lines are logged and counted, rejected writes likewise; only
    /// read errors stop the replay.
    pub async fn replay<R>(&self, reader: R) -> Result<ReplaySummary, StatsError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut summary = ReplaySummary::default();
        let mut lines = reader.lines();
        let mut line_no = 0usize;

        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let notification: Notification = match serde_json::from_str(line) {
                Ok(n) => n,
                Err(e) => {
                    warn!(line = line_no, error = %e, "Skipping malformed notification");
                    summary.malformed += 1;
                    continue;
                }
            };

            summary.notifications += 1;
            if let Err(e) = self.apply(&notification) {
                warn!(line = line_no, error = %e, "Primary write rejected");
                summary.rejected += 1;
            }
        }

        info!(
            notifications = summary.notifications,
            malformed = summary.malformed,
            rejected = summary.rejected,
            "Replay finished"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::Patient;

    fn replayer() -> (Replayer, Arc<InMemorySubjects>) {
        let subjects = Arc::new(InMemorySubjects::new());
        let replayer = Replayer::new(Arc::new(InterceptorRegistry::new()), subjects.clone());
        (replayer, subjects)
    }

    #[tokio::test]
    async fn test_replay_counts_lines() {
        let (replayer, subjects) = replayer();
        let input = concat!(
            r#"{"operation":"create","resource":{"resourceType":"Patient","id":"p1","gender":"male"}}"#,
            "\n\n",
            "not json\n",
            r#"{"operation":"delete","resource":{"resourceType":"Patient","id":"p9"}}"#,
            "\n",
            r#"{"operation":"create","resource":{"resourceType":"Encounter","id":"e1"}}"#,
            "\n",
        );

        let summary = replayer.replay(input.as_bytes()).await.unwrap();
        assert_eq!(
            summary,
            ReplaySummary { notifications: 3, malformed: 1, rejected: 1 }
        );
        assert_eq!(subjects.len(), 1);
    }

    #[test]
    fn test_patient_without_id_is_rejected() {
        let (replayer, subjects) = replayer();
        let notification = Notification::Create {
            resource: Resource::Patient(Patient::default()),
        };
        assert!(matches!(replayer.apply(&notification), Err(StatsError::Rejected(_))));
        assert!(subjects.is_empty());
    }
}
