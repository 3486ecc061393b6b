pub const MAX_ROOMS: usize = 100_000;
pub const MAX_STUDENTS: usize = 1_000_000;
pub const MAX_ROOM_CAPACITY: u32 = 1_000;
pub const MAX_ROOM_TYPE_LEN: usize = 64;
/// Applies to every descriptive student field.
pub const MAX_FIELD_LEN: usize = 256;
/// Queued commands before journal writers apply backpressure.
pub const JOURNAL_CHANNEL_CAPACITY: usize = 4096;
