use std::collections::HashMap;

use ulid::Ulid;

use crate::model::*;

use super::{Ledger, LedgerError};

impl Ledger {
    pub fn get_room(&self, id: &Ulid) -> Result<Room, LedgerError> {
        self.room(id)?.ok_or(LedgerError::RoomNotFound(*id))
    }

    pub fn list_rooms(&self) -> Result<Vec<Room>, LedgerError> {
        let mut rooms = self.rooms.find(&|_| true)?;
        rooms.sort_by_key(|r| r.id);
        Ok(rooms)
    }

    pub fn get_student(&self, id: &Ulid) -> Result<Student, LedgerError> {
        self.student(id)
    }

    pub fn list_students(&self) -> Result<Vec<Student>, LedgerError> {
        let mut students = self.students.find(&|_| true)?;
        students.sort_by_key(|s| s.id);
        Ok(students)
    }

    /// Students currently assigned to `room_id`, sorted by student id.
    pub fn list_room_occupants(&self, room_id: &Ulid) -> Result<Vec<Student>, LedgerError> {
        if self.room(room_id)?.is_none() {
            return Err(LedgerError::RoomNotFound(*room_id));
        }
        let mut students = self.students.find_by_room(room_id)?;
        students.sort_by_key(|s| s.id);
        Ok(students)
    }

    pub fn occupancy_summary(&self) -> Result<OccupancySummary, LedgerError> {
        let summary = self
            .rooms
            .find(&|_| true)?
            .iter()
            .fold(OccupancySummary::default(), |mut acc, room| {
                acc.total_rooms += 1;
                acc.total_capacity += u64::from(room.capacity);
                acc.total_occupied += u64::from(room.occupied);
                if room.occupied < room.capacity {
                    acc.available_rooms += 1;
                }
                acc
            });
        Ok(summary)
    }

    /// Rooms whose stored counter disagrees with the number of students
    /// assigned to them, sorted by room id. Read-only.
    pub fn check_consistency(&self) -> Result<Vec<Drift>, LedgerError> {
        let mut assigned: HashMap<Ulid, u32> = HashMap::new();
        for student in self.students.find(&|s| s.room_id.is_some())? {
            if let Some(room_id) = student.room_id {
                *assigned.entry(room_id).or_default() += 1;
            }
        }

        let mut drift: Vec<Drift> = self
            .rooms
            .find(&|_| true)?
            .into_iter()
            .filter_map(|room| {
                let actual = assigned.get(&room.id).copied().unwrap_or(0);
                (actual != room.occupied).then_some(Drift {
                    room_id: room.id,
                    recorded: room.occupied,
                    actual,
                })
            })
            .collect();
        drift.sort_by_key(|d| d.room_id);
        Ok(drift)
    }
}
