use ulid::Ulid;

/// Failure reported by a room or assignment store, or by the journal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    Duplicate(Ulid),
    Missing(Ulid),
    /// A conditional update refused to apply (e.g. increment on a full room).
    Conflict(&'static str),
    Journal(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Duplicate(id) => write!(f, "duplicate record: {id}"),
            StoreError::Missing(id) => write!(f, "missing record: {id}"),
            StoreError::Conflict(msg) => write!(f, "conditional update refused: {msg}"),
            StoreError::Journal(e) => write!(f, "journal error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    RoomNotFound(Ulid),
    /// Room is flagged for maintenance.
    RoomUnavailable(Ulid),
    RoomFull {
        room_id: Ulid,
        capacity: u32,
    },
    StudentNotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidAttributes(&'static str),
    LimitExceeded(&'static str),
    /// The journal record committed but the stores could not apply all of
    /// it. Not retryable: replay or `reconcile` repairs the stores.
    ConsistencyWarning {
        entity: Ulid,
        detail: String,
    },
    Store(StoreError),
}

impl LedgerError {
    /// Input problems the caller can fix. Never retried by the ledger.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, LedgerError::ConsistencyWarning { .. } | LedgerError::Store(_))
    }

    pub fn sqlstate(&self) -> &'static str {
        match self {
            LedgerError::RoomNotFound(_) | LedgerError::StudentNotFound(_) => "P0002",
            LedgerError::RoomUnavailable(_) | LedgerError::RoomFull { .. } => "23514",
            LedgerError::AlreadyExists(_) => "23505",
            LedgerError::InvalidAttributes(_) | LedgerError::LimitExceeded(_) => "22023",
            LedgerError::ConsistencyWarning { .. } => "40003",
            LedgerError::Store(_) => "XX000",
        }
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            LedgerError::RoomNotFound(_) => "room_not_found",
            LedgerError::RoomUnavailable(_) => "room_unavailable",
            LedgerError::RoomFull { .. } => "room_full",
            LedgerError::StudentNotFound(_) => "student_not_found",
            LedgerError::AlreadyExists(_) => "already_exists",
            LedgerError::InvalidAttributes(_) => "invalid_attributes",
            LedgerError::LimitExceeded(_) => "limit_exceeded",
            LedgerError::ConsistencyWarning { .. } => "consistency_warning",
            LedgerError::Store(_) => "store_error",
        }
    }
}

impl std::fmt::Display for LedgerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            LedgerError::RoomUnavailable(id) => write!(f, "room {id} is under maintenance"),
            LedgerError::RoomFull { room_id, capacity } => {
                write!(f, "room {room_id} is full: all {capacity} beds occupied")
            }
            LedgerError::StudentNotFound(id) => write!(f, "student not found: {id}"),
            LedgerError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            LedgerError::InvalidAttributes(msg) => write!(f, "invalid attributes: {msg}"),
            LedgerError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            LedgerError::ConsistencyWarning { entity, detail } => {
                write!(f, "committed {entity} but stores diverged: {detail}")
            }
            LedgerError::Store(e) => write!(f, "store error: {e}"),
        }
    }
}

impl std::error::Error for LedgerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LedgerError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        LedgerError::Store(e)
    }
}
