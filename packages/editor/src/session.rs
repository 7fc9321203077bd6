//! # Edit Session
//!
//! One client's view of one cell's source while collaborating.
//!
//! Local edits apply immediately and are sent to the session one at a time.
//! While a delta is in flight, further local edits are composed into a
//! buffer. Deltas from other clients are rebased over whatever is pending
//! before being applied locally, mirroring what the session does to our
//! pending edits when they arrive.
//!
//! ```text
//!               local edit                    local edit
//! Synchronized ───────────▶ Awaiting ──────────────────▶ AwaitingWithBuffer
//!      ▲                       │  ▲                              │
//!      └──────── confirm ──────┘  └────────── confirm ───────────┘
//! ```

use crate::ids::{CellId, ClientId};
use crate::operation::Operation;
use crate::Data;
use quire_delta::{Delta, DeltaError, Priority};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncState {
    Synchronized,
    /// One delta sent and not yet acknowledged
    Awaiting(Delta),
    /// In-flight delta plus local edits made since it was sent
    AwaitingWithBuffer(Delta, Delta),
}

#[derive(Debug, Clone)]
pub struct EditSession {
    pub client_id: ClientId,
    pub cell_id: CellId,

    /// Last revision received from the session
    pub revision: u64,

    /// Local source, pending edits included
    pub source: String,

    pub state: SyncState,
}

impl EditSession {
    pub fn new(client_id: ClientId, cell_id: CellId, source: String, revision: u64) -> Self {
        Self {
            client_id,
            cell_id,
            revision,
            source,
            state: SyncState::Synchronized,
        }
    }

    /// Start editing a cell from a session snapshot
    pub fn from_data(data: &Data, client_id: ClientId, cell_id: CellId) -> Option<Self> {
        let source = data.source(cell_id)?.to_string();
        let revision = data.cell_info(cell_id)?.revision;
        Some(Self::new(client_id, cell_id, source, revision))
    }

    /// Apply a local edit, returning the operation to submit if nothing was
    /// already in flight
    pub fn edit(&mut self, delta: Delta) -> Result<Option<Operation>, DeltaError> {
        self.source = delta.apply(&self.source)?;

        let (state, outgoing) = match std::mem::replace(&mut self.state, SyncState::Synchronized) {
            SyncState::Synchronized => {
                let operation = self.submission(delta.clone());
                (SyncState::Awaiting(delta), Some(operation))
            }
            SyncState::Awaiting(in_flight) => {
                (SyncState::AwaitingWithBuffer(in_flight, delta), None)
            }
            SyncState::AwaitingWithBuffer(in_flight, buffer) => {
                (SyncState::AwaitingWithBuffer(in_flight, buffer.compose(&delta)), None)
            }
        };

        self.state = state;
        Ok(outgoing)
    }

    /// The session acknowledged our in-flight delta. Returns the buffered
    /// edits to submit next, if any.
    pub fn confirm(&mut self) -> Option<Operation> {
        self.revision += 1;

        match std::mem::replace(&mut self.state, SyncState::Synchronized) {
            SyncState::Synchronized | SyncState::Awaiting(_) => None,
            SyncState::AwaitingWithBuffer(_, buffer) => {
                let operation = self.submission(buffer.clone());
                self.state = SyncState::Awaiting(buffer);
                Some(operation)
            }
        }
    }

    /// Apply a delta another client authored, as broadcast by the session
    pub fn receive(&mut self, delta: &Delta) -> Result<(), DeltaError> {
        let (state, incoming) = match std::mem::replace(&mut self.state, SyncState::Synchronized) {
            SyncState::Synchronized => (SyncState::Synchronized, delta.clone()),
            SyncState::Awaiting(in_flight) => {
                let incoming = in_flight.transform(delta, Priority::Right);
                let in_flight = delta.transform(&in_flight, Priority::Left);
                (SyncState::Awaiting(in_flight), incoming)
            }
            SyncState::AwaitingWithBuffer(in_flight, buffer) => {
                let past_in_flight = in_flight.transform(delta, Priority::Right);
                let in_flight = delta.transform(&in_flight, Priority::Left);
                let incoming = buffer.transform(&past_in_flight, Priority::Right);
                let buffer = past_in_flight.transform(&buffer, Priority::Left);
                (SyncState::AwaitingWithBuffer(in_flight, buffer), incoming)
            }
        };

        self.source = incoming.apply(&self.source)?;
        self.state = state;
        self.revision += 1;
        Ok(())
    }

    pub fn is_synchronized(&self) -> bool {
        self.state == SyncState::Synchronized
    }

    fn submission(&self, delta: Delta) -> Operation {
        Operation::ApplyCellDelta {
            client_id: self.client_id.clone(),
            cell_id: self.cell_id,
            delta,
            revision: self.revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> EditSession {
        EditSession::new(ClientId::from("a"), CellId(1), "hello".to_string(), 3)
    }

    #[test]
    fn test_first_edit_is_submitted() {
        let mut session = session();
        let operation = session.edit(Delta::new().retain(5).insert("!")).unwrap();

        assert_eq!(
            operation,
            Some(Operation::ApplyCellDelta {
                client_id: ClientId::from("a"),
                cell_id: CellId(1),
                delta: Delta::new().retain(5).insert("!"),
                revision: 3,
            })
        );
        assert_eq!(session.source, "hello!");
        assert!(!session.is_synchronized());
    }

    #[test]
    fn test_edits_buffer_while_awaiting() {
        let mut session = session();
        session.edit(Delta::new().insert("a")).unwrap();
        assert_eq!(session.edit(Delta::new().insert("b")).unwrap(), None);
        assert_eq!(session.edit(Delta::new().retain(1).insert("c")).unwrap(), None);

        let next = session.confirm();
        assert_eq!(
            next,
            Some(Operation::ApplyCellDelta {
                client_id: ClientId::from("a"),
                cell_id: CellId(1),
                delta: Delta::new().insert("bc"),
                revision: 4,
            })
        );

        assert_eq!(session.confirm(), None);
        assert!(session.is_synchronized());
        assert_eq!(session.revision, 5);
        assert_eq!(session.source, "bcahello");
    }

    #[test]
    fn test_receive_rebases_over_pending() {
        let mut session = session();
        session.edit(Delta::new().retain(5).insert(" world")).unwrap();

        // Someone else prepended text before our edit reached the session
        session.receive(&Delta::new().insert(">> ")).unwrap();

        assert_eq!(session.source, ">> hello world");
        assert_eq!(session.revision, 4);
        assert_eq!(
            session.state,
            SyncState::Awaiting(Delta::new().retain(8).insert(" world"))
        );
    }
}
