mod error;
mod journal;
mod locks;
mod mutations;
mod queries;
mod quota;
mod store;
mod validate;

pub use error::{LedgerError, StoreError};
pub use store::{AssignmentStore, MemoryAssignmentStore, MemoryRoomStore, RoomChange, RoomStore};

use std::io;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::RwLock;
use ulid::Ulid;

use crate::limits::{MAX_ROOMS, MAX_STUDENTS};
use crate::model::*;
use crate::observability::CONSISTENCY_WARNINGS_TOTAL;
use crate::wal::Wal;

use journal::Journal;
use locks::LockTable;
use quota::Quota;
use store::apply_event;

/// The occupancy ledger: the only writer of room counters and student
/// assignments.
///
/// Every mutation follows the same shape: take the locks for the records it
/// touches, validate against the stores, commit one journal record, then
/// apply that record to the stores. The journal record is the transaction:
/// if the append fails nothing changed, and once it succeeds replay will
/// always reproduce the full effect.
pub struct Ledger {
    rooms: Arc<dyn RoomStore>,
    students: Arc<dyn AssignmentStore>,
    locks: LockTable,
    /// Shared by every mutation; taken exclusively by whole-ledger passes
    /// (reconcile, compaction) so they see a quiescent state.
    gate: RwLock<()>,
    room_quota: Quota,
    student_quota: Quota,
    journal: Journal,
}

impl Ledger {
    /// Open the journal at `path` over fresh in-memory stores.
    pub fn open(path: &Path) -> io::Result<Self> {
        Self::with_stores(
            path,
            Arc::new(MemoryRoomStore::new()),
            Arc::new(MemoryAssignmentStore::new()),
        )
    }

    /// Replay the journal at `path` into the given stores and start the
    /// journal writer. The stores should be empty; the journal is the source
    /// of truth.
    pub fn with_stores(
        path: &Path,
        rooms: Arc<dyn RoomStore>,
        students: Arc<dyn AssignmentStore>,
    ) -> io::Result<Self> {
        let events = Wal::replay(path)?;
        let mut skipped = 0usize;
        for event in &events {
            if let Err(failure) = apply_event(rooms.as_ref(), students.as_ref(), event) {
                skipped += 1;
                tracing::warn!("replay: {} record did not apply cleanly: {failure}", event.kind());
            }
        }
        tracing::info!(
            "replayed {} journal records ({} rooms, {} students, {skipped} with errors)",
            events.len(),
            rooms.count(),
            students.count()
        );

        let wal = Wal::open(path)?;
        Ok(Self {
            rooms,
            students,
            locks: LockTable::default(),
            gate: RwLock::new(()),
            room_quota: Quota::new(MAX_ROOMS, "too many rooms"),
            student_quota: Quota::new(MAX_STUDENTS, "too many students"),
            journal: Journal::spawn(wal),
        })
    }

    /// Commit `event` to the journal, then apply it to the stores.
    ///
    /// A journal failure means nothing happened (`Store`). A store failure
    /// after the commit means the stores lag the journal
    /// (`ConsistencyWarning`).
    async fn commit(&self, entity: Ulid, event: Event) -> Result<(), LedgerError> {
        self.journal.append(&event).await?;
        if let Err(failure) = apply_event(self.rooms.as_ref(), self.students.as_ref(), &event) {
            metrics::counter!(CONSISTENCY_WARNINGS_TOTAL, "event" => event.kind()).increment(1);
            tracing::error!(
                "{} for {entity} committed to journal but not to stores: {failure}",
                event.kind()
            );
            return Err(LedgerError::ConsistencyWarning {
                entity,
                detail: failure.to_string(),
            });
        }
        Ok(())
    }

    fn room(&self, id: &Ulid) -> Result<Option<Room>, LedgerError> {
        Ok(self.rooms.get(id)?)
    }

    fn student(&self, id: &Ulid) -> Result<Student, LedgerError> {
        self.students
            .get(id)?
            .ok_or(LedgerError::StudentNotFound(*id))
    }
}
