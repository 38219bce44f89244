use ulid::Ulid;

use crate::model::Role;

#[derive(Debug)]
pub enum EngineError {
    InvalidInterval { start: i64, end: i64 },
    LimitExceeded(&'static str),
    Unauthenticated,
    Forbidden { role: Role, action: &'static str },
    NotFound(Ulid),
    NameTaken(String),
    UnknownSystemType(Ulid),
    Conflict(Ulid),
    CapacityExceeded(u32),
    Inactive(Ulid),
    TypeMismatch { game_id: Ulid, game_system_id: Ulid },
    Referenced { id: Ulid, reservations: usize },
    Timeout,
    WalError(String),
}

/// Error taxonomy exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    Validation,
    Authorization,
    CapacityConflict,
    ReferentialIntegrity,
    NotFound,
    Fatal,
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::InvalidInterval { .. }
            | EngineError::LimitExceeded(_)
            | EngineError::NameTaken(_)
            | EngineError::UnknownSystemType(_) => ErrorClass::Validation,
            EngineError::Unauthenticated | EngineError::Forbidden { .. } => {
                ErrorClass::Authorization
            }
            EngineError::Conflict(_)
            | EngineError::CapacityExceeded(_)
            | EngineError::Inactive(_)
            | EngineError::TypeMismatch { .. } => ErrorClass::CapacityConflict,
            EngineError::Referenced { .. } => ErrorClass::ReferentialIntegrity,
            EngineError::NotFound(_) => ErrorClass::NotFound,
            EngineError::Timeout | EngineError::WalError(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.class() == ErrorClass::Fatal
    }

    /// Label for the rejected-admission metric.
    pub fn reason(&self) -> &'static str {
        match self {
            EngineError::InvalidInterval { .. } => "invalid_interval",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::Unauthenticated => "unauthenticated",
            EngineError::Forbidden { .. } => "forbidden",
            EngineError::NotFound(_) => "not_found",
            EngineError::NameTaken(_) => "name_taken",
            EngineError::UnknownSystemType(_) => "unknown_system_type",
            EngineError::Conflict(_) => "conflict",
            EngineError::CapacityExceeded(_) => "capacity_exceeded",
            EngineError::Inactive(_) => "inactive",
            EngineError::TypeMismatch { .. } => "type_mismatch",
            EngineError::Referenced { .. } => "referenced",
            EngineError::Timeout => "timeout",
            EngineError::WalError(_) => "wal_error",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval { start, end } => {
                write!(f, "invalid interval [{start}, {end}): end must be after start")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Unauthenticated => write!(f, "you must be signed in to do that"),
            EngineError::Forbidden { role, action } => {
                write!(f, "role {role} is not authorized to {action}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::NameTaken(name) => write!(f, "name already in use: {name}"),
            EngineError::UnknownSystemType(id) => write!(f, "unknown system type: {id}"),
            EngineError::Conflict(id) => {
                write!(f, "no longer available: conflicts with reservation {id}")
            }
            EngineError::CapacityExceeded(cap) => {
                write!(f, "no longer available: all {cap} copies are reserved")
            }
            EngineError::Inactive(id) => write!(f, "{id} is not available for reservation"),
            EngineError::TypeMismatch {
                game_id,
                game_system_id,
            } => write!(
                f,
                "game {game_id} cannot be played on system {game_system_id}"
            ),
            EngineError::Referenced { id, reservations } => write!(
                f,
                "{id} cannot be deleted because it has {reservations} reservation(s)"
            ),
            EngineError::Timeout => write!(f, "timed out waiting for the resource"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
