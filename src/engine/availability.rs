use ulid::Ulid;

use crate::model::*;

// ── Availability Algorithm ────────────────────────────────────────

/// Per-day classification of a bed. Exactly one state per bed per day,
/// assigned by priority: maintenance > occupied > reserved > pending >
/// available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DayState {
    Available,
    Pending,
    Reserved,
    Occupied,
    Maintenance,
}

impl DayState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DayState::Available => "available",
            DayState::Pending => "pending",
            DayState::Reserved => "reserved",
            DayState::Occupied => "occupied",
            DayState::Maintenance => "maintenance",
        }
    }
}

/// One cell of the room timeline grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimelineCell {
    pub day: Day,
    pub bed_id: Ulid,
    pub state: DayState,
}

/// A stay blocks unless it is a pending shadow whose request has lapsed.
fn stay_active(stay: &Stay, now: Ms) -> bool {
    match stay.kind {
        StayKind::Pending { expires_at, .. } => expires_at > now,
        StayKind::Reserved | StayKind::CheckedIn => true,
    }
}

/// Whether a bed is free for the ENTIRE range — no stay overlapping any
/// day, and not under maintenance. Open-ended stays block every day from
/// their check-in onward; bounded stays use half-open overlap, so
/// back-to-back turnover on the boundary day is allowed.
pub fn is_bed_free(bed: &BedState, range: &DayRange, now: Ms) -> bool {
    if bed.maintenance {
        return false;
    }
    !bed.overlapping(range).any(|s| stay_active(s, now))
}

/// Beds of a room free for the whole query range.
pub fn free_beds(room: &RoomState, range: &DayRange, now: Ms) -> Vec<Ulid> {
    room.beds
        .iter()
        .filter(|b| is_bed_free(b, range, now))
        .map(|b| b.id)
        .collect()
}

/// Classify a single bed on a single day.
pub fn classify_day(bed: &BedState, day: Day, now: Ms) -> DayState {
    if bed.maintenance {
        return DayState::Maintenance;
    }
    let probe = DayRange::new(day, day + 1);
    let mut state = DayState::Available;
    for stay in bed.overlapping(&probe) {
        if !stay.blocks_day(day) || !stay_active(stay, now) {
            continue;
        }
        let s = match stay.kind {
            StayKind::CheckedIn => DayState::Occupied,
            StayKind::Reserved => DayState::Reserved,
            StayKind::Pending { .. } => DayState::Pending,
        };
        if s == DayState::Occupied {
            // Highest remaining priority — nothing can override it.
            return s;
        }
        state = state.max(s);
    }
    state
}

/// Day-by-day classification of every bed in a room, for timeline display.
/// Pure and deterministic: identical inputs yield identical grids.
pub fn day_grid(room: &RoomState, range: &DayRange, now: Ms) -> Vec<TimelineCell> {
    let mut cells = Vec::with_capacity(room.beds.len() * range.nights() as usize);
    for day in range.days() {
        for bed in &room.beds {
            cells.push(TimelineCell {
                day,
                bed_id: bed.id,
                state: classify_day(bed, day, now),
            });
        }
    }
    cells
}

/// Count of free beds per day, for calendar summaries.
pub fn free_count_per_day(room: &RoomState, range: &DayRange, now: Ms) -> Vec<(Day, usize)> {
    range
        .days()
        .map(|day| {
            let free = room
                .beds
                .iter()
                .filter(|b| classify_day(b, day, now) == DayState::Available)
                .count();
            (day, free)
        })
        .collect()
}
