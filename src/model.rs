use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds — wall-clock timestamps only.
pub type Ms = i64;

/// Days since the Unix epoch — the granularity of every stay.
pub type Day = i64;

pub const MS_PER_DAY: Ms = 86_400_000;

/// Truncate a wall-clock timestamp to its epoch day.
pub fn day_of_ms(ms: Ms) -> Day {
    ms.div_euclid(MS_PER_DAY)
}

/// Half-open date range `[check_in, check_out)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayRange {
    pub check_in: Day,
    pub check_out: Day,
}

impl DayRange {
    pub fn new(check_in: Day, check_out: Day) -> Self {
        debug_assert!(check_in < check_out, "check_in must be before check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> Day {
        self.check_out - self.check_in
    }

    pub fn overlaps(&self, other: &DayRange) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_day(&self, d: Day) -> bool {
        self.check_in <= d && d < self.check_out
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_range(&self, other: &DayRange) -> bool {
        self.check_in <= other.check_in && other.check_out <= self.check_out
    }

    pub fn days(&self) -> impl Iterator<Item = Day> + use<> {
        self.check_in..self.check_out
    }
}

/// What a stay on a bed represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StayKind {
    /// Approved placement, not yet checked in.
    Reserved,
    /// Occupant in the bed. Open-ended until check-out.
    CheckedIn,
    /// Provisional shadow from an unresolved booking request. Stops
    /// blocking once the request's expiry passes, even before the
    /// expiry is persisted.
    Pending { request_id: Ulid, expires_at: Ms },
}

/// A single occupant's claim on a bed. Keyed by the occupant id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub occupant_id: Ulid,
    pub check_in: Day,
    /// None while the occupant is checked in (blocks indefinitely).
    pub check_out: Option<Day>,
    pub kind: StayKind,
}

impl Stay {
    /// A day is blocked when `check_in <= d` and the stay has not ended by `d`.
    pub fn blocks_day(&self, d: Day) -> bool {
        self.check_in <= d && self.check_out.is_none_or(|out| d < out)
    }

    /// Whether any day of `range` is blocked by this stay.
    pub fn blocks_range(&self, range: &DayRange) -> bool {
        self.check_in < range.check_out
            && self.check_out.is_none_or(|out| out > range.check_in)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BedState {
    pub id: Ulid,
    pub label: String,
    pub maintenance: bool,
    /// All stays, sorted by `check_in`.
    pub stays: Vec<Stay>,
}

impl BedState {
    pub fn new(id: Ulid, label: String) -> Self {
        Self {
            id,
            label,
            maintenance: false,
            stays: Vec::new(),
        }
    }

    /// Insert a stay maintaining sort order by check_in.
    pub fn insert_stay(&mut self, stay: Stay) {
        let pos = self
            .stays
            .binary_search_by_key(&stay.check_in, |s| s.check_in)
            .unwrap_or_else(|e| e);
        self.stays.insert(pos, stay);
    }

    pub fn remove_stay(&mut self, occupant_id: Ulid) -> Option<Stay> {
        self.stays
            .iter()
            .position(|s| s.occupant_id == occupant_id)
            .map(|pos| self.stays.remove(pos))
    }

    pub fn stay_mut(&mut self, occupant_id: Ulid) -> Option<&mut Stay> {
        self.stays.iter_mut().find(|s| s.occupant_id == occupant_id)
    }

    /// Only stays touching the query window. Binary search skips stays
    /// starting at or after `range.check_out`; open-ended stays never
    /// end, so the left side is a plain filter.
    pub fn overlapping(&self, range: &DayRange) -> impl Iterator<Item = &Stay> {
        let right_bound = self
            .stays
            .partition_point(|s| s.check_in < range.check_out);
        self.stays[..right_bound]
            .iter()
            .filter(move |s| s.check_out.is_none_or(|out| out > range.check_in))
    }
}

/// Occupant gender as recorded on the booking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Gender {
    Male,
    Female,
}

/// Who a room may host, by gender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GenderPolicy {
    MaleOnly,
    FemaleOnly,
    Mixed,
    Flexible,
}

impl GenderPolicy {
    pub fn admits(&self, gender: Gender) -> bool {
        match self {
            GenderPolicy::MaleOnly => gender == Gender::Male,
            GenderPolicy::FemaleOnly => gender == Gender::Female,
            GenderPolicy::Mixed | GenderPolicy::Flexible => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupantKind {
    Employee,
    Guest,
}

/// Whether a room may host guests or only employees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AllocationPolicy {
    EmployeeOnly,
    GuestAllowed,
}

impl AllocationPolicy {
    pub fn admits(&self, kind: OccupantKind) -> bool {
        match self {
            AllocationPolicy::EmployeeOnly => kind == OccupantKind::Employee,
            AllocationPolicy::GuestAllowed => true,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub building_id: Ulid,
    pub name: String,
    pub gender_policy: GenderPolicy,
    pub allocation: AllocationPolicy,
    pub beds: Vec<BedState>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        building_id: Ulid,
        name: String,
        gender_policy: GenderPolicy,
        allocation: AllocationPolicy,
    ) -> Self {
        Self {
            id,
            building_id,
            name,
            gender_policy,
            allocation,
            beds: Vec::new(),
        }
    }

    pub fn bed(&self, bed_id: Ulid) -> Option<&BedState> {
        self.beds.iter().find(|b| b.id == bed_id)
    }

    pub fn bed_mut(&mut self, bed_id: Ulid) -> Option<&mut BedState> {
        self.beds.iter_mut().find(|b| b.id == bed_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Building {
    pub id: Ulid,
    pub name: String,
}

// ── Booking side ─────────────────────────────────────────────────

/// Request-level status. `Requested` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestStatus {
    Requested,
    Approved,
    Rejected,
    Cancelled,
    Expired,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Requested => "requested",
            RequestStatus::Approved => "approved",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Expired => "expired",
        }
    }
}

/// Occupant-level status. Meaningful once the parent request is approved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OccupantStatus {
    Scheduled,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl OccupantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OccupantStatus::Scheduled => "scheduled",
            OccupantStatus::CheckedIn => "checked_in",
            OccupantStatus::CheckedOut => "checked_out",
            OccupantStatus::Cancelled => "cancelled",
        }
    }
}

/// The employee of record sponsoring guest occupants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Companion {
    pub nik: String,
    pub name: String,
}

/// Concrete building/room/bed assignment given to an occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub building_id: Ulid,
    pub room_id: Ulid,
    pub bed_id: Ulid,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Occupant {
    pub id: Ulid,
    pub name: String,
    /// Employee ID or guest ID document number. The scan-tag key.
    pub identifier: String,
    pub kind: OccupantKind,
    pub gender: Gender,
    pub dates: DayRange,
    /// Bed the guided flow asked for; shadows availability until resolution.
    pub requested_bed: Option<Ulid>,
    /// Staged by the admin before approval; final once approved.
    pub placement: Option<Placement>,
    pub status: OccupantStatus,
    pub checked_in_at: Option<Ms>,
    pub checked_out_at: Option<Ms>,
    pub cancel_reason: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestState {
    pub id: Ulid,
    pub requester: String,
    pub agency: String,
    pub purpose: String,
    pub admin_note: Option<String>,
    pub companion: Option<Companion>,
    pub window: DayRange,
    pub status: RequestStatus,
    pub occupants: Vec<Occupant>,
    pub requested_at: Ms,
    pub expires_at: Ms,
    pub approved_at: Option<Ms>,
    pub reject_reason: Option<String>,
    pub cancelled_by: Option<String>,
    pub cancel_reason: Option<String>,
}

impl RequestState {
    /// Request status with lazy expiry applied: an untouched request past
    /// `expires_at` reads as expired even before the sweeper persists it.
    pub fn effective_status(&self, now: Ms) -> RequestStatus {
        if self.status == RequestStatus::Requested && now > self.expires_at {
            RequestStatus::Expired
        } else {
            self.status
        }
    }

    pub fn occupant(&self, occupant_id: Ulid) -> Option<&Occupant> {
        self.occupants.iter().find(|o| o.id == occupant_id)
    }

    pub fn occupant_mut(&mut self, occupant_id: Ulid) -> Option<&mut Occupant> {
        self.occupants.iter_mut().find(|o| o.id == occupant_id)
    }

    pub fn has_guest(&self) -> bool {
        self.occupants.iter().any(|o| o.kind == OccupantKind::Guest)
    }
}

// ── WAL record format ────────────────────────────────────────────

/// The event types — flat, no nesting beyond the submitted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    BuildingCreated {
        id: Ulid,
        name: String,
    },
    RoomCreated {
        id: Ulid,
        building_id: Ulid,
        name: String,
        gender_policy: GenderPolicy,
        allocation: AllocationPolicy,
    },
    BedCreated {
        id: Ulid,
        room_id: Ulid,
        label: String,
    },
    BedMaintenanceSet {
        id: Ulid,
        room_id: Ulid,
        on: bool,
    },
    RequestSubmitted {
        id: Ulid,
        requester: String,
        agency: String,
        purpose: String,
        companion: Option<Companion>,
        window: DayRange,
        requested_at: Ms,
        expires_at: Ms,
    },
    OccupantAdded {
        id: Ulid,
        request_id: Ulid,
        name: String,
        identifier: String,
        kind: OccupantKind,
        gender: Gender,
        dates: DayRange,
        requested_bed: Option<Ulid>,
    },
    PlacementStaged {
        request_id: Ulid,
        occupant_id: Ulid,
        placement: Placement,
    },
    RequestApproved {
        id: Ulid,
        note: Option<String>,
        at: Ms,
    },
    RequestRejected {
        id: Ulid,
        reason: String,
        note: Option<String>,
        at: Ms,
    },
    RequestCancelled {
        id: Ulid,
        by: String,
        reason: String,
        at: Ms,
    },
    RequestExpired {
        id: Ulid,
        at: Ms,
    },
    OccupantCheckedIn {
        request_id: Ulid,
        occupant_id: Ulid,
        at: Ms,
    },
    OccupantCheckedOut {
        request_id: Ulid,
        occupant_id: Ulid,
        at: Ms,
    },
    OccupantCancelled {
        request_id: Ulid,
        occupant_id: Ulid,
        reason: String,
        at: Ms,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub building_id: Ulid,
    pub name: String,
    pub gender_policy: GenderPolicy,
    pub allocation: AllocationPolicy,
    pub bed_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BedInfo {
    pub id: Ulid,
    pub room_id: Ulid,
    pub label: String,
    pub maintenance: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub id: Ulid,
    pub requester: String,
    pub purpose: String,
    pub status: RequestStatus,
    pub window: DayRange,
    pub occupant_count: usize,
    pub requested_at: Ms,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccupantInfo {
    pub id: Ulid,
    pub request_id: Ulid,
    pub name: String,
    pub identifier: String,
    pub kind: OccupantKind,
    pub gender: Gender,
    pub status: OccupantStatus,
    pub dates: DayRange,
    pub placement: Option<Placement>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_range_basics() {
        let r = DayRange::new(100, 110);
        assert_eq!(r.nights(), 10);
        assert!(r.contains_day(100));
        assert!(r.contains_day(109));
        assert!(!r.contains_day(110)); // half-open
    }

    #[test]
    fn day_range_overlap() {
        let a = DayRange::new(100, 110);
        let b = DayRange::new(105, 120);
        let c = DayRange::new(110, 120);
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // back-to-back turnover is not overlap
    }

    #[test]
    fn day_range_contains_range() {
        let outer = DayRange::new(100, 200);
        let inner = DayRange::new(120, 150);
        let partial = DayRange::new(90, 120);
        assert!(outer.contains_range(&inner));
        assert!(outer.contains_range(&outer));
        assert!(!outer.contains_range(&partial));
    }

    #[test]
    fn open_ended_stay_blocks_forever() {
        let s = Stay {
            occupant_id: Ulid::new(),
            check_in: 100,
            check_out: None,
            kind: StayKind::CheckedIn,
        };
        assert!(s.blocks_day(100));
        assert!(s.blocks_day(10_000));
        assert!(!s.blocks_day(99));
        assert!(s.blocks_range(&DayRange::new(5_000, 5_010)));
    }

    #[test]
    fn bounded_stay_half_open() {
        let s = Stay {
            occupant_id: Ulid::new(),
            check_in: 100,
            check_out: Some(110),
            kind: StayKind::Reserved,
        };
        assert!(s.blocks_day(109));
        assert!(!s.blocks_day(110));
        assert!(!s.blocks_range(&DayRange::new(110, 120)));
    }

    #[test]
    fn stay_ordering() {
        let mut bed = BedState::new(Ulid::new(), "A-1".into());
        for check_in in [300, 100, 200] {
            bed.insert_stay(Stay {
                occupant_id: Ulid::new(),
                check_in,
                check_out: Some(check_in + 10),
                kind: StayKind::Reserved,
            });
        }
        assert_eq!(bed.stays[0].check_in, 100);
        assert_eq!(bed.stays[1].check_in, 200);
        assert_eq!(bed.stays[2].check_in, 300);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut bed = BedState::new(Ulid::new(), "A-1".into());
        let mid = Ulid::new();
        bed.insert_stay(Stay {
            occupant_id: Ulid::new(),
            check_in: 0,
            check_out: Some(50),
            kind: StayKind::Reserved,
        });
        bed.insert_stay(Stay {
            occupant_id: mid,
            check_in: 95,
            check_out: Some(105),
            kind: StayKind::Reserved,
        });
        bed.insert_stay(Stay {
            occupant_id: Ulid::new(),
            check_in: 500,
            check_out: Some(510),
            kind: StayKind::Reserved,
        });

        let hits: Vec<_> = bed.overlapping(&DayRange::new(100, 200)).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].occupant_id, mid);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut bed = BedState::new(Ulid::new(), "A-1".into());
        bed.insert_stay(Stay {
            occupant_id: Ulid::new(),
            check_in: 100,
            check_out: Some(110),
            kind: StayKind::Reserved,
        });
        let hits: Vec<_> = bed.overlapping(&DayRange::new(110, 120)).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn overlapping_includes_open_ended() {
        let mut bed = BedState::new(Ulid::new(), "A-1".into());
        bed.insert_stay(Stay {
            occupant_id: Ulid::new(),
            check_in: 10,
            check_out: None,
            kind: StayKind::CheckedIn,
        });
        let hits: Vec<_> = bed.overlapping(&DayRange::new(1_000, 1_010)).collect();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn gender_policy_admission() {
        assert!(GenderPolicy::MaleOnly.admits(Gender::Male));
        assert!(!GenderPolicy::MaleOnly.admits(Gender::Female));
        assert!(!GenderPolicy::FemaleOnly.admits(Gender::Male));
        assert!(GenderPolicy::Mixed.admits(Gender::Female));
        assert!(GenderPolicy::Flexible.admits(Gender::Male));
    }

    #[test]
    fn allocation_policy_admission() {
        assert!(AllocationPolicy::EmployeeOnly.admits(OccupantKind::Employee));
        assert!(!AllocationPolicy::EmployeeOnly.admits(OccupantKind::Guest));
        assert!(AllocationPolicy::GuestAllowed.admits(OccupantKind::Guest));
    }

    #[test]
    fn lazy_expiry_reads_as_expired() {
        let req = RequestState {
            id: Ulid::new(),
            requester: "a".into(),
            agency: "PT Maju".into(),
            purpose: "stay".into(),
            admin_note: None,
            companion: None,
            window: DayRange::new(100, 110),
            status: RequestStatus::Requested,
            occupants: Vec::new(),
            requested_at: 1_000,
            expires_at: 2_000,
            approved_at: None,
            reject_reason: None,
            cancelled_by: None,
            cancel_reason: None,
        };
        assert_eq!(req.effective_status(1_500), RequestStatus::Requested);
        assert_eq!(req.effective_status(2_001), RequestStatus::Expired);
    }

    #[test]
    fn terminal_status_not_affected_by_expiry() {
        let mut req = RequestState {
            id: Ulid::new(),
            requester: "a".into(),
            agency: "PT Maju".into(),
            purpose: "stay".into(),
            admin_note: None,
            companion: None,
            window: DayRange::new(100, 110),
            status: RequestStatus::Approved,
            occupants: Vec::new(),
            requested_at: 1_000,
            expires_at: 2_000,
            approved_at: Some(1_500),
            reject_reason: None,
            cancelled_by: None,
            cancel_reason: None,
        };
        assert_eq!(req.effective_status(9_999), RequestStatus::Approved);
        req.status = RequestStatus::Rejected;
        assert_eq!(req.effective_status(9_999), RequestStatus::Rejected);
    }

    #[test]
    fn day_of_ms_truncates() {
        assert_eq!(day_of_ms(0), 0);
        assert_eq!(day_of_ms(MS_PER_DAY - 1), 0);
        assert_eq!(day_of_ms(MS_PER_DAY), 1);
        assert_eq!(day_of_ms(19_723 * MS_PER_DAY + 3_600_000), 19_723);
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::RequestSubmitted {
            id: Ulid::new(),
            requester: "Budi".into(),
            agency: "PT Maju".into(),
            purpose: "site visit".into(),
            companion: Some(Companion {
                nik: "3201".into(),
                name: "Sari".into(),
            }),
            window: DayRange::new(19_723, 19_730),
            requested_at: 1,
            expires_at: 2,
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
