use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::LedgerError;

/// Admission checks, in order: the room exists, is not under maintenance,
/// and has a free bed.
pub(crate) fn check_admissible(room_id: Ulid, room: Option<Room>) -> Result<Room, LedgerError> {
    let room = room.ok_or(LedgerError::RoomNotFound(room_id))?;
    if room.status == RoomStatus::Maintenance {
        return Err(LedgerError::RoomUnavailable(room_id));
    }
    if room.occupied >= room.capacity {
        return Err(LedgerError::RoomFull {
            room_id,
            capacity: room.capacity,
        });
    }
    Ok(room)
}

pub(crate) fn validate_fields(fields: &StudentFields) -> Result<(), LedgerError> {
    if fields.name.trim().is_empty() {
        return Err(LedgerError::InvalidAttributes("student name is empty"));
    }
    let too_long = std::iter::once(Some(fields.name.as_str()))
        .chain(fields.optional_values())
        .flatten()
        .any(|v| v.len() > MAX_FIELD_LEN);
    if too_long {
        return Err(LedgerError::LimitExceeded("student field too long"));
    }
    Ok(())
}

pub(crate) fn validate_room_shape(room_type: &str, capacity: u32) -> Result<(), LedgerError> {
    if room_type.trim().is_empty() {
        return Err(LedgerError::InvalidAttributes("room type is empty"));
    }
    if room_type.len() > MAX_ROOM_TYPE_LEN {
        return Err(LedgerError::LimitExceeded("room type too long"));
    }
    if capacity == 0 {
        return Err(LedgerError::InvalidAttributes("capacity must be positive"));
    }
    if capacity > MAX_ROOM_CAPACITY {
        return Err(LedgerError::LimitExceeded("capacity too large"));
    }
    Ok(())
}

/// Shape checks plus `occupied <= capacity`.
pub(crate) fn validate_room(room: &Room) -> Result<(), LedgerError> {
    validate_room_shape(&room.room_type, room.capacity)?;
    if room.occupied > room.capacity {
        return Err(LedgerError::InvalidAttributes("occupied exceeds capacity"));
    }
    Ok(())
}
