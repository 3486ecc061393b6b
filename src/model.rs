use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Administratively set room flag.
///
/// `Maintenance` is an override: it blocks new admissions and transfers into
/// the room but never evicts the students already assigned to it.
/// `Available` and `Occupied` are labels only and do not gate admission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Maintenance,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "Available",
            RoomStatus::Occupied => "Occupied",
            RoomStatus::Maintenance => "Maintenance",
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoomStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "available" => Ok(RoomStatus::Available),
            "occupied" => Ok(RoomStatus::Occupied),
            "maintenance" => Ok(RoomStatus::Maintenance),
            _ => Err(format!("unknown room status: {s}")),
        }
    }
}

/// Occupancy derived from `occupied` vs `capacity`. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Occupancy {
    Vacant,
    Partial,
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub room_type: String,
    pub capacity: u32,
    pub occupied: u32,
    pub status: RoomStatus,
    pub floor: i32,
}

impl Room {
    pub fn new(id: Ulid, room_type: String, capacity: u32, status: RoomStatus, floor: i32) -> Self {
        Self {
            id,
            room_type,
            capacity,
            occupied: 0,
            status,
            floor,
        }
    }

    pub fn occupancy(&self) -> Occupancy {
        if self.occupied == 0 {
            Occupancy::Vacant
        } else if self.occupied >= self.capacity {
            Occupancy::Full
        } else {
            Occupancy::Partial
        }
    }

    pub fn is_full(&self) -> bool {
        self.occupancy() == Occupancy::Full
    }

    pub fn free_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.occupied)
    }

    /// What a client sees: the maintenance flag wins, otherwise fullness decides.
    pub fn display_status(&self) -> RoomStatus {
        match (self.status, self.occupancy()) {
            (RoomStatus::Maintenance, _) => RoomStatus::Maintenance,
            (_, Occupancy::Full) => RoomStatus::Occupied,
            _ => RoomStatus::Available,
        }
    }
}

/// Columns set by a room update. Unset columns keep their current value,
/// `occupied` included.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomPatch {
    pub room_type: Option<String>,
    pub capacity: Option<u32>,
    pub occupied: Option<u32>,
    pub status: Option<RoomStatus>,
    pub floor: Option<i32>,
}

impl RoomPatch {
    pub fn apply(&self, room: &Room) -> Room {
        Room {
            id: room.id,
            room_type: self.room_type.clone().unwrap_or_else(|| room.room_type.clone()),
            capacity: self.capacity.unwrap_or(room.capacity),
            occupied: self.occupied.unwrap_or(room.occupied),
            status: self.status.unwrap_or(room.status),
            floor: self.floor.unwrap_or(room.floor),
        }
    }
}

/// Descriptive student data. The ledger passes it through untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StudentFields {
    pub name: String,
    pub course: Option<String>,
    pub year: Option<String>,
    pub contact: Option<String>,
    pub status: Option<String>,
    pub email: Option<String>,
}

impl StudentFields {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub(crate) fn optional_values(&self) -> [Option<&str>; 5] {
        [
            self.course.as_deref(),
            self.year.as_deref(),
            self.contact.as_deref(),
            self.status.as_deref(),
            self.email.as_deref(),
        ]
    }
}

/// Fields set by a student update. The outer `Option` is "column
/// mentioned"; the inner one is the value, where NULL clears it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StudentPatch {
    pub name: Option<String>,
    pub course: Option<Option<String>>,
    pub year: Option<Option<String>>,
    pub contact: Option<Option<String>>,
    pub status: Option<Option<String>>,
    pub email: Option<Option<String>>,
}

impl StudentPatch {
    pub fn apply(&self, fields: &StudentFields) -> StudentFields {
        let pick = |set: &Option<Option<String>>, current: &Option<String>| {
            set.clone().unwrap_or_else(|| current.clone())
        };
        StudentFields {
            name: self.name.clone().unwrap_or_else(|| fields.name.clone()),
            course: pick(&self.course, &fields.course),
            year: pick(&self.year, &fields.year),
            contact: pick(&self.contact, &fields.contact),
            status: pick(&self.status, &fields.status),
            email: pick(&self.email, &fields.email),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Student {
    pub id: Ulid,
    /// `None` when the student currently has no room.
    pub room_id: Option<Ulid>,
    pub fields: StudentFields,
}

/// Journal record. One record per ledger mutation, so each record is a
/// complete unit of work: replaying it applies every write it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Also used by compaction to restore a room verbatim (occupied included).
    RoomCreated {
        room: Room,
    },
    RoomAttributesSet {
        id: Ulid,
        room_type: String,
        capacity: u32,
        occupied: u32,
        status: RoomStatus,
        floor: i32,
    },
    /// Student inserted pointing at `room_id`; `room_id.occupied += 1`.
    StudentAdmitted {
        id: Ulid,
        room_id: Ulid,
        fields: StudentFields,
    },
    /// Fields changed, room unchanged. No counter effect.
    StudentUpdated {
        id: Ulid,
        fields: StudentFields,
    },
    /// Pointer moved; `from.occupied -= 1` (floored), `to.occupied += 1`.
    StudentTransferred {
        id: Ulid,
        from: Option<Ulid>,
        to: Ulid,
        fields: StudentFields,
    },
    /// Pointer cleared; `from.occupied -= 1` (floored).
    StudentVacated {
        id: Ulid,
        from: Ulid,
        fields: StudentFields,
    },
    /// Compaction only: insert the student as-is, no counter effect.
    StudentRestored {
        student: Student,
    },
    OccupancyReconciled {
        corrections: Vec<(Ulid, u32)>,
    },
}

impl Event {
    pub fn kind(&self) -> &'static str {
        match self {
            Event::RoomCreated { .. } => "room_created",
            Event::RoomAttributesSet { .. } => "room_attributes_set",
            Event::StudentAdmitted { .. } => "student_admitted",
            Event::StudentUpdated { .. } => "student_updated",
            Event::StudentTransferred { .. } => "student_transferred",
            Event::StudentVacated { .. } => "student_vacated",
            Event::StudentRestored { .. } => "student_restored",
            Event::OccupancyReconciled { .. } => "occupancy_reconciled",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentResult {
    pub student_id: Ulid,
    pub room_id: Option<Ulid>,
    pub previous_room_id: Option<Ulid>,
}

impl AssignmentResult {
    pub fn moved(&self) -> bool {
        self.room_id != self.previous_room_id
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OccupancySummary {
    pub total_rooms: u64,
    pub total_capacity: u64,
    pub total_occupied: u64,
    /// Rooms with `occupied < capacity`, maintenance included.
    pub available_rooms: u64,
}

/// A room whose stored counter disagrees with its assignment count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Drift {
    pub room_id: Ulid,
    pub recorded: u32,
    pub actual: u32,
}
