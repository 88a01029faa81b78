//! Transition rules for booking requests and their occupants.
//!
//! Every mutation that moves a request or an occupant between states goes
//! through these guards, so the legal edges live in exactly one place.

use crate::model::{OccupantStatus, RequestStatus};

use super::EngineError;

/// Actions that move a request between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    Approve,
    Reject,
    Cancel,
    Expire,
    StagePlacement,
}

impl RequestAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestAction::Approve => "approve",
            RequestAction::Reject => "reject",
            RequestAction::Cancel => "cancel",
            RequestAction::Expire => "expire",
            RequestAction::StagePlacement => "stage_placement",
        }
    }
}

/// Actions that move an occupant between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccupantAction {
    CheckIn,
    CheckOut,
    Cancel,
}

impl OccupantAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupantAction::CheckIn => "check_in",
            OccupantAction::CheckOut => "check_out",
            OccupantAction::Cancel => "cancel",
        }
    }
}

/// Returns the target state if `action` is legal from `from`.
/// Requests leave `Requested` exactly once; the terminal states
/// (`Rejected`, `Cancelled`, `Expired`) and `Approved` admit nothing
/// at request level — occupant edges carry the rest of the lifecycle.
pub fn request_transition(
    from: RequestStatus,
    action: RequestAction,
) -> Result<RequestStatus, EngineError> {
    use RequestAction::*;
    use RequestStatus::*;
    let to = match (from, action) {
        (Requested, Approve) => Approved,
        (Requested, Reject) => Rejected,
        (Requested, Cancel) => Cancelled,
        (Requested, Expire) => Expired,
        (Requested, StagePlacement) => Requested,
        _ => {
            return Err(EngineError::InvalidTransition {
                entity: "request",
                from: from.as_str(),
                action: action.as_str(),
            });
        }
    };
    Ok(to)
}

/// Occupant edges: `Scheduled -> CheckedIn -> CheckedOut`, plus
/// cancellation from any non-terminal state. `CheckedOut` and
/// `Cancelled` are terminal.
pub fn occupant_transition(
    from: OccupantStatus,
    action: OccupantAction,
) -> Result<OccupantStatus, EngineError> {
    use OccupantAction::*;
    use OccupantStatus::*;
    let to = match (from, action) {
        (Scheduled, CheckIn) => CheckedIn,
        (CheckedIn, CheckOut) => CheckedOut,
        (Scheduled, Cancel) | (CheckedIn, Cancel) => Cancelled,
        _ => {
            return Err(EngineError::InvalidTransition {
                entity: "occupant",
                from: from.as_str(),
                action: action.as_str(),
            });
        }
    };
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_leaves_requested_once() {
        assert_eq!(
            request_transition(RequestStatus::Requested, RequestAction::Approve).unwrap(),
            RequestStatus::Approved
        );
        assert_eq!(
            request_transition(RequestStatus::Requested, RequestAction::Reject).unwrap(),
            RequestStatus::Rejected
        );
        assert_eq!(
            request_transition(RequestStatus::Requested, RequestAction::Cancel).unwrap(),
            RequestStatus::Cancelled
        );
        assert_eq!(
            request_transition(RequestStatus::Requested, RequestAction::Expire).unwrap(),
            RequestStatus::Expired
        );
    }

    #[test]
    fn terminal_requests_admit_nothing() {
        for from in [
            RequestStatus::Approved,
            RequestStatus::Rejected,
            RequestStatus::Cancelled,
            RequestStatus::Expired,
        ] {
            for action in [
                RequestAction::Approve,
                RequestAction::Reject,
                RequestAction::Cancel,
                RequestAction::Expire,
                RequestAction::StagePlacement,
            ] {
                assert!(
                    request_transition(from, action).is_err(),
                    "{from:?} must not admit {action:?}"
                );
            }
        }
    }

    #[test]
    fn staging_keeps_request_in_requested() {
        assert_eq!(
            request_transition(RequestStatus::Requested, RequestAction::StagePlacement).unwrap(),
            RequestStatus::Requested
        );
    }

    #[test]
    fn occupant_happy_path() {
        let s = occupant_transition(OccupantStatus::Scheduled, OccupantAction::CheckIn).unwrap();
        assert_eq!(s, OccupantStatus::CheckedIn);
        let s = occupant_transition(s, OccupantAction::CheckOut).unwrap();
        assert_eq!(s, OccupantStatus::CheckedOut);
    }

    #[test]
    fn occupant_cancel_from_non_terminal() {
        assert_eq!(
            occupant_transition(OccupantStatus::Scheduled, OccupantAction::Cancel).unwrap(),
            OccupantStatus::Cancelled
        );
        assert_eq!(
            occupant_transition(OccupantStatus::CheckedIn, OccupantAction::Cancel).unwrap(),
            OccupantStatus::Cancelled
        );
    }

    #[test]
    fn occupant_terminal_states_admit_nothing() {
        for from in [OccupantStatus::CheckedOut, OccupantStatus::Cancelled] {
            for action in [
                OccupantAction::CheckIn,
                OccupantAction::CheckOut,
                OccupantAction::Cancel,
            ] {
                assert!(occupant_transition(from, action).is_err());
            }
        }
    }

    #[test]
    fn no_double_check_in() {
        assert!(occupant_transition(OccupantStatus::CheckedIn, OccupantAction::CheckIn).is_err());
    }

    #[test]
    fn no_check_out_before_check_in() {
        assert!(occupant_transition(OccupantStatus::Scheduled, OccupantAction::CheckOut).is_err());
    }
}
