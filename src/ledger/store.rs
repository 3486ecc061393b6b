use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ulid::Ulid;

use crate::model::*;

use super::error::StoreError;

/// A write to a single room record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomChange {
    Attributes {
        room_type: String,
        capacity: u32,
        occupied: u32,
        status: RoomStatus,
        floor: i32,
    },
    /// Conditional: refused with `StoreError::Conflict` when the room is full.
    Increment,
    /// Floored at zero.
    Decrement,
    SetOccupied(u32),
}

/// Durable table of rooms. Only the ledger writes to it.
pub trait RoomStore: Send + Sync {
    fn get(&self, id: &Ulid) -> Result<Option<Room>, StoreError>;
    fn insert(&self, room: Room) -> Result<Ulid, StoreError>;
    /// Apply `change` atomically and return the updated record.
    fn update(&self, id: &Ulid, change: RoomChange) -> Result<Room, StoreError>;
    fn find(&self, predicate: &dyn Fn(&Room) -> bool) -> Result<Vec<Room>, StoreError>;
    fn count(&self) -> usize;
}

/// Durable table of students and the room each one occupies.
pub trait AssignmentStore: Send + Sync {
    fn get(&self, id: &Ulid) -> Result<Option<Student>, StoreError>;
    fn insert(&self, student: Student) -> Result<Ulid, StoreError>;
    /// Replace the room pointer and fields; returns the previous record.
    fn update(
        &self,
        id: &Ulid,
        room_id: Option<Ulid>,
        fields: StudentFields,
    ) -> Result<Student, StoreError>;
    fn find(&self, predicate: &dyn Fn(&Student) -> bool) -> Result<Vec<Student>, StoreError>;
    fn count(&self) -> usize;

    fn find_by_room(&self, room_id: &Ulid) -> Result<Vec<Student>, StoreError> {
        let room_id = *room_id;
        self.find(&move |s: &Student| s.room_id == Some(room_id))
    }
}

// ── In-memory rooms ──────────────────────────────────────────

#[derive(Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<Ulid, Room>,
}

impl MemoryRoomStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RoomStore for MemoryRoomStore {
    fn get(&self, id: &Ulid) -> Result<Option<Room>, StoreError> {
        Ok(self.rooms.get(id).map(|e| e.value().clone()))
    }

    fn insert(&self, room: Room) -> Result<Ulid, StoreError> {
        let id = room.id;
        match self.rooms.entry(id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(room);
                Ok(id)
            }
        }
    }

    fn update(&self, id: &Ulid, change: RoomChange) -> Result<Room, StoreError> {
        // The shard lock held by `get_mut` makes check-and-write one step.
        let mut room = self.rooms.get_mut(id).ok_or(StoreError::Missing(*id))?;
        match change {
            RoomChange::Attributes {
                room_type,
                capacity,
                occupied,
                status,
                floor,
            } => {
                room.room_type = room_type;
                room.capacity = capacity;
                room.occupied = occupied;
                room.status = status;
                room.floor = floor;
            }
            RoomChange::Increment => {
                if room.occupied >= room.capacity {
                    return Err(StoreError::Conflict("room at capacity"));
                }
                room.occupied += 1;
            }
            RoomChange::Decrement => room.occupied = room.occupied.saturating_sub(1),
            RoomChange::SetOccupied(n) => room.occupied = n,
        }
        Ok(room.clone())
    }

    fn find(&self, predicate: &dyn Fn(&Room) -> bool) -> Result<Vec<Room>, StoreError> {
        Ok(self
            .rooms
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect())
    }

    fn count(&self) -> usize {
        self.rooms.len()
    }
}

// ── In-memory assignments ────────────────────────────────────

#[derive(Default)]
pub struct MemoryAssignmentStore {
    students: DashMap<Ulid, Student>,
    /// Room → assigned students, kept in step with `students`.
    by_room: DashMap<Ulid, Vec<Ulid>>,
}

impl MemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn index(&self, room_id: Option<Ulid>, student_id: Ulid) {
        if let Some(rid) = room_id {
            self.by_room.entry(rid).or_default().push(student_id);
        }
    }

    fn unindex(&self, room_id: Option<Ulid>, student_id: &Ulid) {
        if let Some(rid) = room_id
            && let Some(mut ids) = self.by_room.get_mut(&rid)
        {
            ids.retain(|s| s != student_id);
        }
    }
}

impl AssignmentStore for MemoryAssignmentStore {
    fn get(&self, id: &Ulid) -> Result<Option<Student>, StoreError> {
        Ok(self.students.get(id).map(|e| e.value().clone()))
    }

    fn insert(&self, student: Student) -> Result<Ulid, StoreError> {
        let (id, room_id) = (student.id, student.room_id);
        match self.students.entry(id) {
            Entry::Occupied(_) => return Err(StoreError::Duplicate(id)),
            Entry::Vacant(slot) => {
                slot.insert(student);
            }
        }
        self.index(room_id, id);
        Ok(id)
    }

    fn update(
        &self,
        id: &Ulid,
        room_id: Option<Ulid>,
        fields: StudentFields,
    ) -> Result<Student, StoreError> {
        let previous = {
            let mut entry = self.students.get_mut(id).ok_or(StoreError::Missing(*id))?;
            let previous = entry.clone();
            entry.room_id = room_id;
            entry.fields = fields;
            previous
        };
        if previous.room_id != room_id {
            self.unindex(previous.room_id, id);
            self.index(room_id, *id);
        }
        Ok(previous)
    }

    fn find(&self, predicate: &dyn Fn(&Student) -> bool) -> Result<Vec<Student>, StoreError> {
        Ok(self
            .students
            .iter()
            .filter(|e| predicate(e.value()))
            .map(|e| e.value().clone())
            .collect())
    }

    fn count(&self) -> usize {
        self.students.len()
    }

    fn find_by_room(&self, room_id: &Ulid) -> Result<Vec<Student>, StoreError> {
        let ids = self
            .by_room
            .get(room_id)
            .map(|e| e.value().clone())
            .unwrap_or_default();
        Ok(ids
            .iter()
            .filter_map(|id| self.students.get(id).map(|e| e.value().clone()))
            .collect())
    }
}

/// Apply one journal record to the stores, step by step.
///
/// Steps run in a fixed order and stop at the first failure; the error
/// reports how far the record got.
pub(crate) fn apply_event(
    rooms: &dyn RoomStore,
    students: &dyn AssignmentStore,
    event: &Event,
) -> Result<(), ApplyFailure> {
    let mut steps = Steps::default();
    match event {
        Event::RoomCreated { room } => {
            steps.total = 1;
            steps.run(rooms.insert(room.clone()))?;
        }
        Event::RoomAttributesSet {
            id,
            room_type,
            capacity,
            occupied,
            status,
            floor,
        } => {
            steps.total = 1;
            let change = RoomChange::Attributes {
                room_type: room_type.clone(),
                capacity: *capacity,
                occupied: *occupied,
                status: *status,
                floor: *floor,
            };
            steps.run(rooms.update(id, change))?;
        }
        Event::StudentAdmitted { id, room_id, fields } => {
            steps.total = 2;
            steps.run(students.insert(Student {
                id: *id,
                room_id: Some(*room_id),
                fields: fields.clone(),
            }))?;
            steps.run(rooms.update(room_id, RoomChange::Increment))?;
        }
        Event::StudentUpdated { id, fields } => {
            steps.total = 1;
            let room_id = students.get(id).map_err(|e| steps.fail(e))?.and_then(|s| s.room_id);
            steps.run(students.update(id, room_id, fields.clone()))?;
        }
        Event::StudentTransferred { id, from, to, fields } => {
            steps.total = if from.is_some() { 3 } else { 2 };
            steps.run(students.update(id, Some(*to), fields.clone()))?;
            if let Some(from) = from {
                steps.run(rooms.update(from, RoomChange::Decrement))?;
            }
            steps.run(rooms.update(to, RoomChange::Increment))?;
        }
        Event::StudentVacated { id, from, fields } => {
            steps.total = 2;
            steps.run(students.update(id, None, fields.clone()))?;
            steps.run(rooms.update(from, RoomChange::Decrement))?;
        }
        Event::StudentRestored { student } => {
            steps.total = 1;
            steps.run(students.insert(student.clone()))?;
        }
        Event::OccupancyReconciled { corrections } => {
            steps.total = corrections.len();
            for (room_id, occupied) in corrections {
                steps.run(rooms.update(room_id, RoomChange::SetOccupied(*occupied)))?;
            }
        }
    }
    Ok(())
}

#[derive(Default)]
struct Steps {
    applied: usize,
    total: usize,
}

impl Steps {
    fn run<T>(&mut self, result: Result<T, StoreError>) -> Result<T, ApplyFailure> {
        let value = result.map_err(|e| self.fail(e))?;
        self.applied += 1;
        Ok(value)
    }

    fn fail(&self, error: StoreError) -> ApplyFailure {
        ApplyFailure {
            applied: self.applied,
            total: self.total,
            error,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ApplyFailure {
    pub applied: usize,
    pub total: usize,
    pub error: StoreError,
}

impl std::fmt::Display for ApplyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "applied {} of {} writes, then: {}",
            self.applied, self.total, self.error
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn room(capacity: u32) -> Room {
        Room::new(Ulid::new(), "Double".into(), capacity, RoomStatus::Available, 1)
    }

    fn student(room_id: Option<Ulid>) -> Student {
        Student {
            id: Ulid::new(),
            room_id,
            fields: StudentFields::named("Ada"),
        }
    }

    #[test]
    fn room_insert_rejects_duplicate() {
        let store = MemoryRoomStore::new();
        let r = room(2);
        store.insert(r.clone()).unwrap();
        assert_eq!(store.insert(r.clone()), Err(StoreError::Duplicate(r.id)));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn increment_is_conditional_on_capacity() {
        let store = MemoryRoomStore::new();
        let r = room(1);
        store.insert(r.clone()).unwrap();
        assert_eq!(store.update(&r.id, RoomChange::Increment).unwrap().occupied, 1);
        assert_eq!(
            store.update(&r.id, RoomChange::Increment),
            Err(StoreError::Conflict("room at capacity"))
        );
        assert_eq!(store.get(&r.id).unwrap().unwrap().occupied, 1);
    }

    #[test]
    fn decrement_floors_at_zero() {
        let store = MemoryRoomStore::new();
        let r = room(2);
        store.insert(r.clone()).unwrap();
        assert_eq!(store.update(&r.id, RoomChange::Decrement).unwrap().occupied, 0);
    }

    #[test]
    fn update_missing_room() {
        let store = MemoryRoomStore::new();
        let id = Ulid::new();
        assert_eq!(store.update(&id, RoomChange::Increment), Err(StoreError::Missing(id)));
    }

    #[test]
    fn find_by_room_follows_updates() {
        let store = MemoryAssignmentStore::new();
        let (a, b) = (Ulid::new(), Ulid::new());
        let s = student(Some(a));
        store.insert(s.clone()).unwrap();
        assert_eq!(store.find_by_room(&a).unwrap().len(), 1);

        let previous = store.update(&s.id, Some(b), StudentFields::named("Ada L.")).unwrap();
        assert_eq!(previous.room_id, Some(a));
        assert!(store.find_by_room(&a).unwrap().is_empty());
        let in_b = store.find_by_room(&b).unwrap();
        assert_eq!(in_b.len(), 1);
        assert_eq!(in_b[0].fields.name, "Ada L.");

        store.update(&s.id, None, StudentFields::named("Ada")).unwrap();
        assert!(store.find_by_room(&b).unwrap().is_empty());
        assert_eq!(store.get(&s.id).unwrap().unwrap().room_id, None);
    }

    #[test]
    fn find_by_room_default_matches_index() {
        struct Scan<'a>(&'a MemoryAssignmentStore);
        impl AssignmentStore for Scan<'_> {
            fn get(&self, id: &Ulid) -> Result<Option<Student>, StoreError> {
                self.0.get(id)
            }
            fn insert(&self, student: Student) -> Result<Ulid, StoreError> {
                self.0.insert(student)
            }
            fn update(&self, id: &Ulid, room_id: Option<Ulid>, fields: StudentFields) -> Result<Student, StoreError> {
                self.0.update(id, room_id, fields)
            }
            fn find(&self, predicate: &dyn Fn(&Student) -> bool) -> Result<Vec<Student>, StoreError> {
                self.0.find(predicate)
            }
            fn count(&self) -> usize {
                self.0.count()
            }
        }

        let store = MemoryAssignmentStore::new();
        let rid = Ulid::new();
        for _ in 0..3 {
            store.insert(student(Some(rid))).unwrap();
        }
        store.insert(student(None)).unwrap();

        let mut indexed: Vec<Ulid> = store.find_by_room(&rid).unwrap().iter().map(|s| s.id).collect();
        let mut scanned: Vec<Ulid> = Scan(&store).find_by_room(&rid).unwrap().iter().map(|s| s.id).collect();
        indexed.sort();
        scanned.sort();
        assert_eq!(indexed, scanned);
        assert_eq!(indexed.len(), 3);
    }

    #[test]
    fn apply_admission_touches_both_tables() {
        let rooms = MemoryRoomStore::new();
        let students = MemoryAssignmentStore::new();
        let r = room(2);
        rooms.insert(r.clone()).unwrap();

        let sid = Ulid::new();
        apply_event(
            &rooms,
            &students,
            &Event::StudentAdmitted { id: sid, room_id: r.id, fields: StudentFields::named("Ada") },
        )
        .unwrap();

        assert_eq!(rooms.get(&r.id).unwrap().unwrap().occupied, 1);
        assert_eq!(students.get(&sid).unwrap().unwrap().room_id, Some(r.id));
    }

    #[test]
    fn apply_reports_partial_progress() {
        let rooms = MemoryRoomStore::new();
        let students = MemoryAssignmentStore::new();
        let missing_room = Ulid::new();

        let failure = apply_event(
            &rooms,
            &students,
            &Event::StudentAdmitted {
                id: Ulid::new(),
                room_id: missing_room,
                fields: StudentFields::named("Ada"),
            },
        )
        .unwrap_err();

        assert_eq!(failure.applied, 1);
        assert_eq!(failure.total, 2);
        assert_eq!(failure.error, StoreError::Missing(missing_room));
        assert!(failure.to_string().starts_with("applied 1 of 2 writes"));
    }

    #[test]
    fn apply_transfer_from_unassigned_has_no_decrement() {
        let rooms = MemoryRoomStore::new();
        let students = MemoryAssignmentStore::new();
        let r = room(1);
        rooms.insert(r.clone()).unwrap();
        let s = student(None);
        students.insert(s.clone()).unwrap();

        apply_event(
            &rooms,
            &students,
            &Event::StudentTransferred { id: s.id, from: None, to: r.id, fields: s.fields.clone() },
        )
        .unwrap();
        assert_eq!(rooms.get(&r.id).unwrap().unwrap().occupied, 1);
    }
}
