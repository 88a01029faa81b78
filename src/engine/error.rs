use ulid::Ulid;

use crate::model::Day;

#[derive(Debug)]
pub enum EngineError {
    NotFound(Ulid),
    AlreadyExists(Ulid),
    /// Bed already committed to another occupant over the requested dates.
    BedConflict {
        bed_id: Ulid,
        occupant_id: Ulid,
    },
    /// Approve attempted while an occupant has no complete placement.
    IncompletePlacement(Ulid),
    /// Guest occupants present but no companion on record.
    MissingCompanion(Ulid),
    /// Room gender policy does not admit the occupant.
    GenderMismatch {
        occupant_id: Ulid,
        room_id: Ulid,
    },
    /// Guest occupant placed into an employee-only room.
    AllocationMismatch {
        occupant_id: Ulid,
        room_id: Ulid,
    },
    BedUnderMaintenance(Ulid),
    /// A required reason/actor field was empty.
    EmptyField(&'static str),
    /// Transition not permitted from the current status.
    InvalidTransition {
        entity: &'static str,
        from: &'static str,
        action: &'static str,
    },
    /// Check-out attempted before the scheduled out date.
    TooEarly {
        occupant_id: Ulid,
        scheduled: Day,
    },
    /// Occupant dates outside the request window or inverted.
    BadDates(Ulid),
    /// Scanned tag matched no occupant; carries the raw input.
    TagNotFound(String),
    RequestExpired(Ulid),
    LimitExceeded(&'static str),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::BedConflict { bed_id, occupant_id } => {
                write!(f, "bed {bed_id} already committed to occupant {occupant_id}")
            }
            EngineError::IncompletePlacement(id) => {
                write!(f, "occupant {id} has no complete bed placement")
            }
            EngineError::MissingCompanion(id) => {
                write!(f, "request {id} has guest occupants but no companion")
            }
            EngineError::GenderMismatch { occupant_id, room_id } => {
                write!(f, "room {room_id} gender policy does not admit occupant {occupant_id}")
            }
            EngineError::AllocationMismatch { occupant_id, room_id } => {
                write!(f, "room {room_id} is employee-only; occupant {occupant_id} is a guest")
            }
            EngineError::BedUnderMaintenance(id) => write!(f, "bed {id} is under maintenance"),
            EngineError::EmptyField(field) => write!(f, "{field} must not be empty"),
            EngineError::InvalidTransition { entity, from, action } => {
                write!(f, "cannot {action} {entity}: status is {from}")
            }
            EngineError::TooEarly { occupant_id, scheduled } => {
                write!(
                    f,
                    "occupant {occupant_id} is scheduled to check out on day {scheduled}"
                )
            }
            EngineError::BadDates(id) => {
                write!(f, "occupant {id}: dates inverted or outside the request window")
            }
            EngineError::TagNotFound(raw) => write!(f, "no occupant matches scanned tag: {raw}"),
            EngineError::RequestExpired(id) => write!(f, "request {id} has expired"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
