//! # Session
//!
//! The single writer for one notebook. A [`Session`] runs as a tokio task
//! and owns the authoritative [`Data`]; everything else talks to it through
//! a cloneable [`SessionHandle`].
//!
//! ```text
//!  SessionHandle::submit ──mpsc──▶ Session ──apply──▶ Data
//!                                    │
//!                                    ├─watch────▶ latest Snapshot
//!                                    ├─broadcast─▶ OperationEvent subscribers
//!                                    ├─append────▶ OperationLog
//!                                    └─dispatch──▶ Runtime
//! ```
//!
//! Accepted operations are numbered from 1. Each one is logged, then
//! published as a snapshot, then broadcast, and only then are its actions
//! handed to the runtime. An operation that cannot be logged is not
//! accepted, so the log never has gaps. A runtime callback therefore always lands on a
//! state that already contains the evaluation it answers.

use crate::config::SessionConfig;
use crate::errors::SessionError;
use crate::log::OperationLog;
use crate::runtime::Runtime;
use chrono::{DateTime, Utc};
use quire_editor::{Action, Data, Operation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, warn};

/// An accepted operation, as seen by subscribers and the operation log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub operation: Operation,
    /// What the reducer asked for, including rebased deltas for clients
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Session state after a given number of accepted operations
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub sequence: u64,
    pub data: Arc<Data>,
}

impl Snapshot {
    pub fn initial(data: Data) -> Self {
        Self {
            sequence: 0,
            data: Arc::new(data),
        }
    }
}

enum Command {
    Apply {
        operation: Operation,
        reply: oneshot::Sender<Result<u64, SessionError>>,
    },
    Shutdown,
}

#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
    events: broadcast::Sender<OperationEvent>,
}

impl SessionHandle {
    /// Submit an operation, returning its sequence number once accepted
    pub async fn submit(&self, operation: Operation) -> Result<u64, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Apply { operation, reply })
            .await
            .map_err(|_| SessionError::Closed)?;

        response.await.map_err(|_| SessionError::Closed)?
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    /// Receive every operation accepted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<OperationEvent> {
        self.events.subscribe()
    }

    /// Subscribe, then build a replica from the current snapshot. Events the
    /// replica already contains are skipped when folded.
    pub fn replica(&self) -> (Replica, broadcast::Receiver<OperationEvent>) {
        let events = self.subscribe();
        (Replica::new(self.snapshot()), events)
    }

    /// Wait until the session state satisfies `predicate`
    pub async fn wait_until(
        &self,
        mut predicate: impl FnMut(&Data) -> bool,
    ) -> Result<Snapshot, SessionError> {
        let mut snapshot = self.snapshot.clone();
        let snapshot = snapshot
            .wait_for(|s| predicate(&s.data))
            .await
            .map_err(|_| SessionError::Closed)?
            .clone();
        Ok(snapshot)
    }

    /// Ask the session to stop after the operations already queued
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| SessionError::Closed)
    }
}

pub struct Session {
    data: Arc<Data>,
    sequence: u64,
    commands: mpsc::Receiver<Command>,
    /// Weak so that the session ends once every outside handle is gone
    own_commands: mpsc::WeakSender<Command>,
    snapshot: watch::Sender<Snapshot>,
    events: broadcast::Sender<OperationEvent>,
    runtime: Box<dyn Runtime>,
    log: Option<OperationLog>,
}

impl Session {
    /// Start a session task. Must be called from within a tokio runtime.
    ///
    /// A logged session must start from [`Data::new`], the state the log is
    /// replayed over.
    pub fn spawn(
        config: &SessionConfig,
        data: Data,
        runtime: impl Runtime,
    ) -> Result<SessionHandle, SessionError> {
        if config.operation_log.is_some() && data != Data::new() {
            return Err(SessionError::UnloggedInitialState);
        }
        let log = config
            .operation_log
            .as_deref()
            .map(OperationLog::open)
            .transpose()?;

        let (commands_tx, commands_rx) = mpsc::channel(config.command_capacity);
        let initial = Snapshot::initial(data);
        let data = initial.data.clone();
        let (snapshot_tx, snapshot_rx) = watch::channel(initial);
        let (events_tx, _) = broadcast::channel(config.event_capacity);

        let handle = SessionHandle {
            commands: commands_tx.clone(),
            snapshot: snapshot_rx,
            events: events_tx.clone(),
        };

        let session = Session {
            data,
            sequence: 0,
            commands: commands_rx,
            own_commands: commands_tx.downgrade(),
            snapshot: snapshot_tx,
            events: events_tx,
            runtime: Box::new(runtime),
            log,
        };

        info!(
            log = ?session.log.as_ref().map(|log| log.path().display().to_string()),
            "session started"
        );
        tokio::spawn(session.run());

        Ok(handle)
    }

    async fn run(mut self) {
        while let Some(command) = self.commands.recv().await {
            match command {
                Command::Apply { operation, reply } => {
                    let result = self.apply(operation);
                    // The submitter may have given up waiting
                    let _ = reply.send(result);
                }
                Command::Shutdown => break,
            }
        }

        info!(sequence = self.sequence, "session stopped");
    }

    fn apply(&mut self, operation: Operation) -> Result<u64, SessionError> {
        let name = operation.name();
        let (data, actions) = match self.data.apply(operation.clone()) {
            Ok(reduced) => reduced,
            Err(error) => {
                warn!(operation = name, %error, "operation rejected");
                return Err(error.into());
            }
        };

        let event = OperationEvent {
            sequence: self.sequence + 1,
            timestamp: Utc::now(),
            operation,
            actions,
        };
        if let Some(log) = &mut self.log {
            if let Err(error) = log.append(&event) {
                error!(operation = name, %error, "failed to append to operation log");
                return Err(error.into());
            }
        }

        self.sequence = event.sequence;
        self.data = Arc::new(data);

        self.snapshot.send_replace(Snapshot {
            sequence: self.sequence,
            data: self.data.clone(),
        });
        debug!(operation = name, sequence = self.sequence, "operation accepted");

        let actions = event.actions.clone();
        // No subscribers is fine
        let _ = self.events.send(event);

        self.dispatch(&actions);
        Ok(self.sequence)
    }

    fn dispatch(&mut self, actions: &[Action]) {
        if actions.is_empty() {
            return;
        }
        let Some(commands) = self.own_commands.upgrade() else {
            debug!("no handles left, skipping runtime actions");
            return;
        };
        let handle = SessionHandle {
            commands,
            snapshot: self.snapshot.subscribe(),
            events: self.events.clone(),
        };

        for action in actions {
            match action {
                Action::StartEvaluation {
                    cell_id,
                    section_id,
                } => {
                    info!(cell = %cell_id, section = %section_id, "starting evaluation");
                    let source = self.data.source(*cell_id).unwrap_or_default();
                    self.runtime
                        .evaluate(&handle, *cell_id, *section_id, source);
                }
                Action::StopEvaluation { section_id } => {
                    info!(section = %section_id, "stopping evaluation");
                    self.runtime.stop(&handle, *section_id);
                }
                Action::ForgetEvaluation {
                    cell_id,
                    section_id,
                } => {
                    self.runtime.forget(&handle, *cell_id, *section_id);
                }
                // Subscribers receive these with the event
                Action::BroadcastDelta { .. } => {}
            }
        }
    }
}

/// A copy of the session state kept current by folding broadcast events
#[derive(Debug, Clone)]
pub struct Replica {
    sequence: u64,
    data: Arc<Data>,
}

impl Replica {
    pub fn new(snapshot: Snapshot) -> Self {
        Self {
            sequence: snapshot.sequence,
            data: snapshot.data,
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn data(&self) -> &Data {
        &self.data
    }

    /// Apply one event. Returns `false` for an event the replica already
    /// contains.
    pub fn fold(&mut self, event: &OperationEvent) -> Result<bool, SessionError> {
        if event.sequence <= self.sequence {
            return Ok(false);
        }
        if event.sequence != self.sequence + 1 {
            return Err(SessionError::OutOfOrder {
                expected: self.sequence + 1,
                received: event.sequence,
            });
        }

        let (data, _) = self.data.apply(event.operation.clone())?;
        self.data = Arc::new(data);
        self.sequence = event.sequence;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_editor::{CellId, SectionId};

    fn event(sequence: u64, operation: Operation) -> OperationEvent {
        OperationEvent {
            sequence,
            timestamp: Utc::now(),
            operation,
            actions: vec![],
        }
    }

    #[test]
    fn test_replica_skips_known_events() {
        let mut replica = Replica::new(Snapshot::initial(Data::new()));

        assert!(replica
            .fold(&event(1, Operation::InsertSection { index: 0 }))
            .unwrap());
        assert!(!replica
            .fold(&event(1, Operation::InsertSection { index: 0 }))
            .unwrap());

        assert_eq!(replica.sequence(), 1);
        assert_eq!(replica.data().notebook().section_ids(), &[SectionId(1)]);
    }

    #[test]
    fn test_replica_detects_gaps() {
        let mut replica = Replica::new(Snapshot::initial(Data::new()));

        let result = replica.fold(&event(
            3,
            Operation::QueueCellEvaluation {
                cell_id: CellId::SETUP,
            },
        ));

        assert!(matches!(
            result,
            Err(SessionError::OutOfOrder {
                expected: 1,
                received: 3
            })
        ));
    }

    #[test]
    fn test_event_wire_form() {
        let json = r#"{
            "sequence": 4,
            "timestamp": "2024-01-01T00:00:00Z",
            "operation": { "type": "set_notebook_name", "name": "Notes" }
        }"#;

        let event: OperationEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.sequence, 4);
        assert!(event.actions.is_empty());
        assert_eq!(
            event.operation,
            Operation::SetNotebookName {
                name: "Notes".to_string()
            }
        );
    }
}
