use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as Ms
}

/// Malformed ranges are rejected here, at the edge — the availability
/// calculator itself is total over well-formed input.
pub(crate) fn validate_range(range: &DayRange) -> Result<(), EngineError> {
    if range.check_in < MIN_VALID_DAY || range.check_out > MAX_VALID_DAY {
        return Err(EngineError::LimitExceeded("date out of range"));
    }
    if range.check_in >= range.check_out {
        return Err(EngineError::LimitExceeded("check_out must be after check_in"));
    }
    Ok(())
}

pub(crate) fn validate_query_window(range: &DayRange) -> Result<(), EngineError> {
    validate_range(range)?;
    if range.nights() > MAX_QUERY_WINDOW_DAYS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(())
}

pub(crate) fn validate_timestamp(ms: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&ms) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn require_nonempty(value: &str, field: &'static str) -> Result<(), EngineError> {
    if value.trim().is_empty() {
        return Err(EngineError::EmptyField(field));
    }
    Ok(())
}

/// Occupant dates must be strictly ordered and inside the request window.
pub(crate) fn validate_occupant_dates(
    occupant_id: Ulid,
    dates: &DayRange,
    window: &DayRange,
) -> Result<(), EngineError> {
    if dates.check_in >= dates.check_out || !window.contains_range(dates) {
        return Err(EngineError::BadDates(occupant_id));
    }
    Ok(())
}

/// Room must admit the occupant's gender and kind.
pub(crate) fn check_room_policies(
    room: &RoomState,
    occupant: &Occupant,
) -> Result<(), EngineError> {
    if !room.gender_policy.admits(occupant.gender) {
        return Err(EngineError::GenderMismatch {
            occupant_id: occupant.id,
            room_id: room.id,
        });
    }
    if !room.allocation.admits(occupant.kind) {
        return Err(EngineError::AllocationMismatch {
            occupant_id: occupant.id,
            room_id: room.id,
        });
    }
    Ok(())
}

/// A bed accepts a placement only if no committed stay and no live pending
/// shadow overlaps the requested dates. The occupant's own shadow is
/// skipped so re-staging and approval don't conflict with themselves;
/// shadows of sibling occupants on the same request still conflict.
/// Half-open ranges make same-day turnover legal by construction.
pub(crate) fn check_bed_free_for(
    bed: &BedState,
    dates: &DayRange,
    own_occupant: Option<Ulid>,
    now: Ms,
) -> Result<(), EngineError> {
    if bed.maintenance {
        return Err(EngineError::BedUnderMaintenance(bed.id));
    }
    for stay in bed.overlapping(dates) {
        if own_occupant == Some(stay.occupant_id) {
            continue;
        }
        if let StayKind::Pending { expires_at, .. } = stay.kind
            && expires_at <= now
        {
            continue;
        }
        return Err(EngineError::BedConflict {
            bed_id: bed.id,
            occupant_id: stay.occupant_id,
        });
    }
    Ok(())
}
