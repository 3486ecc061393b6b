use ulid::Ulid;

use crate::model::*;
use crate::observability::{ADMISSION_REJECTIONS_TOTAL, RECONCILE_CORRECTIONS_TOTAL};

use super::validate::{check_admissible, validate_fields, validate_room, validate_room_shape};
use super::{Ledger, LedgerError};

impl Ledger {
    pub async fn create_room(
        &self,
        id: Ulid,
        room_type: String,
        capacity: u32,
        status: RoomStatus,
        floor: i32,
    ) -> Result<(), LedgerError> {
        validate_room_shape(&room_type, capacity)?;

        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[id]).await;
        if self.room(&id)?.is_some() {
            return Err(LedgerError::AlreadyExists(id));
        }
        let _slot = self.room_quota.reserve(|| self.rooms.count())?;

        let room = Room::new(id, room_type, capacity, status, floor);
        self.commit(id, Event::RoomCreated { room }).await?;
        tracing::debug!("room {id} created with capacity {capacity}");
        Ok(())
    }

    /// Create a student assigned to `room_id` and take one bed in it.
    pub async fn admit(
        &self,
        student_id: Ulid,
        room_id: Ulid,
        fields: StudentFields,
    ) -> Result<AssignmentResult, LedgerError> {
        validate_fields(&fields)?;

        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[student_id, room_id]).await;

        check_admissible(room_id, self.room(&room_id)?).inspect_err(record_rejection)?;
        if self.students.get(&student_id)?.is_some() {
            return Err(LedgerError::AlreadyExists(student_id));
        }
        let _slot = self.student_quota.reserve(|| self.students.count())?;

        self.commit(
            student_id,
            Event::StudentAdmitted {
                id: student_id,
                room_id,
                fields,
            },
        )
        .await?;
        Ok(AssignmentResult {
            student_id,
            room_id: Some(room_id),
            previous_room_id: None,
        })
    }

    /// Move a student to `new_room_id`, or just update their fields when
    /// they are already there.
    pub async fn transfer(
        &self,
        student_id: Ulid,
        new_room_id: Ulid,
        fields: StudentFields,
    ) -> Result<AssignmentResult, LedgerError> {
        self.reassign(student_id, Some(new_room_id), |_| fields).await
    }

    /// Clear a student's room. A student with no room only gets their fields
    /// updated.
    pub async fn vacate(
        &self,
        student_id: Ulid,
        fields: StudentFields,
    ) -> Result<AssignmentResult, LedgerError> {
        self.reassign(student_id, None, |_| fields).await
    }

    /// Apply `patch` to a student's current fields and, when `room` is set,
    /// move them (`Some(Some(id))`) or vacate them (`Some(None)`).
    ///
    /// Unset columns and the room are read under the student's lock, so a
    /// concurrent transfer is never undone by a fields-only update.
    pub async fn update_student(
        &self,
        student_id: Ulid,
        room: Option<Option<Ulid>>,
        patch: StudentPatch,
    ) -> Result<AssignmentResult, LedgerError> {
        if let Some(target) = room {
            return self.reassign(student_id, target, |f| patch.apply(f)).await;
        }

        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[student_id]).await;
        let current = self.student(&student_id)?;
        let fields = patch.apply(&current.fields);
        validate_fields(&fields)?;

        self.commit(student_id, Event::StudentUpdated { id: student_id, fields })
            .await?;
        Ok(AssignmentResult {
            student_id,
            room_id: current.room_id,
            previous_room_id: current.room_id,
        })
    }

    /// Point a student at `target` (or at no room) with the fields computed
    /// from their current ones.
    async fn reassign(
        &self,
        student_id: Ulid,
        target: Option<Ulid>,
        fields: impl FnOnce(&StudentFields) -> StudentFields,
    ) -> Result<AssignmentResult, LedgerError> {
        let _gate = self.gate.read().await;

        // The lock set depends on the current room, which can change while
        // we wait for the locks.
        let (current, _locks) = loop {
            let seen = self.student(&student_id)?.room_id;
            let mut keys = vec![student_id];
            keys.extend(target);
            keys.extend(seen);
            let locks = self.locks.acquire(&keys).await;
            let current = self.student(&student_id)?;
            if current.room_id == seen {
                break (current, locks);
            }
            tracing::debug!("student {student_id} moved while locking, retrying");
        };

        let fields = fields(&current.fields);
        validate_fields(&fields)?;

        let previous_room_id = current.room_id;
        let event = match (previous_room_id, target) {
            (from, Some(to)) if from == Some(to) => Event::StudentUpdated { id: student_id, fields },
            (from, Some(to)) => {
                check_admissible(to, self.room(&to)?).inspect_err(record_rejection)?;
                if let Some(old) = from {
                    self.note_floored_decrement(student_id, old)?;
                }
                Event::StudentTransferred {
                    id: student_id,
                    from,
                    to,
                    fields,
                }
            }
            (Some(from), None) => {
                self.note_floored_decrement(student_id, from)?;
                Event::StudentVacated {
                    id: student_id,
                    from,
                    fields,
                }
            }
            (None, None) => Event::StudentUpdated { id: student_id, fields },
        };

        self.commit(student_id, event).await?;
        Ok(AssignmentResult {
            student_id,
            room_id: target,
            previous_room_id,
        })
    }

    /// Administrative override of every room attribute, `occupied` included.
    ///
    /// No cross-check against the assignment count: a mismatch is logged and
    /// left for `reconcile`.
    pub async fn set_room_attributes(
        &self,
        room_id: Ulid,
        room_type: String,
        capacity: u32,
        occupied: u32,
        status: RoomStatus,
        floor: i32,
    ) -> Result<(), LedgerError> {
        let room = Room {
            id: room_id,
            room_type,
            capacity,
            occupied,
            status,
            floor,
        };
        validate_room(&room)?;

        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[room_id]).await;
        if self.room(&room_id)?.is_none() {
            return Err(LedgerError::RoomNotFound(room_id));
        }
        self.write_room_attributes(room).await
    }

    /// Set only the columns present in `patch`. The rest, `occupied`
    /// included, are taken from the room as it is once locked.
    pub async fn update_room(&self, room_id: Ulid, patch: RoomPatch) -> Result<(), LedgerError> {
        let _gate = self.gate.read().await;
        let _locks = self.locks.acquire(&[room_id]).await;
        let current = self.room(&room_id)?.ok_or(LedgerError::RoomNotFound(room_id))?;

        let room = patch.apply(&current);
        validate_room(&room)?;
        self.write_room_attributes(room).await
    }

    /// Caller holds the room's lock.
    async fn write_room_attributes(&self, room: Room) -> Result<(), LedgerError> {
        let actual = self.students.find_by_room(&room.id)?.len();
        if actual != room.occupied as usize {
            tracing::warn!(
                "room {} occupied set to {} but {actual} students are assigned",
                room.id,
                room.occupied
            );
        }

        self.commit(
            room.id,
            Event::RoomAttributesSet {
                id: room.id,
                room_type: room.room_type,
                capacity: room.capacity,
                occupied: room.occupied,
                status: room.status,
                floor: room.floor,
            },
        )
        .await
    }

    /// Recompute every room's `occupied` from its assignments and commit the
    /// corrections as one record. Counts are clamped to capacity, so a room
    /// holding more students than beds stays in drift.
    ///
    /// Returns the rooms whose counter changed.
    pub async fn reconcile(&self) -> Result<Vec<Drift>, LedgerError> {
        let _gate = self.gate.write().await;

        let mut corrected = Vec::new();
        let mut corrections = Vec::new();
        for drift in self.check_consistency()? {
            let Some(room) = self.room(&drift.room_id)? else {
                continue;
            };
            let target = drift.actual.min(room.capacity);
            if drift.actual > room.capacity {
                tracing::warn!(
                    "room {} has {} students for {} beds; counter clamped",
                    room.id,
                    drift.actual,
                    room.capacity
                );
            }
            if target != drift.recorded {
                corrections.push((drift.room_id, target));
                corrected.push(drift);
            }
        }

        if corrections.is_empty() {
            return Ok(corrected);
        }
        self.commit(Ulid::nil(), Event::OccupancyReconciled { corrections })
            .await?;
        metrics::counter!(RECONCILE_CORRECTIONS_TOTAL).increment(corrected.len() as u64);
        tracing::info!("reconciled {} room counters", corrected.len());
        Ok(corrected)
    }

    /// Rewrite the journal as a snapshot of the current stores.
    pub async fn compact_journal(&self) -> Result<(), LedgerError> {
        let _gate = self.gate.write().await;

        let mut rooms = self.rooms.find(&|_| true)?;
        rooms.sort_by_key(|r| r.id);
        let mut students = self.students.find(&|_| true)?;
        students.sort_by_key(|s| s.id);

        let snapshot = rooms
            .into_iter()
            .map(|room| Event::RoomCreated { room })
            .chain(students.into_iter().map(|student| Event::StudentRestored { student }))
            .collect();
        Ok(self.journal.compact(snapshot).await?)
    }

    pub async fn journal_appends_since_compact(&self) -> u64 {
        self.journal.appends_since_compact().await
    }

    /// A decrement on a counter already at zero is floored by the store;
    /// log it so the drift is visible.
    fn note_floored_decrement(&self, student_id: Ulid, room_id: Ulid) -> Result<(), LedgerError> {
        match self.room(&room_id)? {
            Some(room) if room.occupied == 0 => tracing::warn!(
                "student {student_id} leaving room {room_id} whose counter is already 0"
            ),
            None => tracing::warn!("student {student_id} assigned to unknown room {room_id}"),
            Some(_) => {}
        }
        Ok(())
    }
}

fn record_rejection(e: &LedgerError) {
    metrics::counter!(ADMISSION_REJECTIONS_TOTAL, "reason" => e.label()).increment(1);
}
