mod availability;
mod error;
mod lifecycle;
mod mutations;
mod queries;
mod validate;

pub use availability::{classify_day, day_grid, free_beds, free_count_per_day, is_bed_free, DayState, TimelineCell};
pub use error::EngineError;
pub use lifecycle::{occupant_transition, request_transition, OccupantAction, RequestAction};
pub use validate::now_ms;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedRoomState = Arc<RwLock<RoomState>>;
pub type SharedRequestState = Arc<RwLock<RequestState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond Ok to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];

                // Drain all immediately available appends
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Flush current batch first, then handle the non-append command
                            metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                                .record(batch.len() as f64);
                            let flush_start = std::time::Instant::now();
                            let result = flush_batch(&mut wal, &mut batch);
                            metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                                .record(flush_start.elapsed().as_secs_f64());
                            respond_batch(&mut batch, &result);
                            handle_non_append(&mut wal, other);
                            break;
                        }
                        Err(_) => break, // channel empty — flush batch
                    }
                }

                if !batch.is_empty() {
                    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE)
                        .record(batch.len() as f64);
                    let flush_start = std::time::Instant::now();
                    let result = flush_batch(&mut wal, &mut batch);
                    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
                        .record(flush_start.elapsed().as_secs_f64());
                    respond_batch(&mut batch, &result);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &mut [(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch.iter() {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush — even on append error — so partially buffered bytes
    // don't leak into the next batch (callers were told this batch failed).
    let flush_err = wal.flush_sync().err();
    if let Some(e) = append_err {
        return Err(e);
    }
    if let Some(e) = flush_err {
        return Err(e);
    }
    Ok(())
}

fn respond_batch(batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch.drain(..) {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!(),
    }
}

// ── Bed stay helpers ─────────────────────────────────────
//
// Shared between WAL replay and the live mutation paths so both produce
// identical bed state for the same event sequence.

pub(super) fn bed_stage_pending(
    bed: &mut BedState,
    occupant_id: Ulid,
    dates: &DayRange,
    request_id: Ulid,
    expires_at: Ms,
) {
    bed.remove_stay(occupant_id);
    bed.insert_stay(Stay {
        occupant_id,
        check_in: dates.check_in,
        check_out: Some(dates.check_out),
        kind: StayKind::Pending { request_id, expires_at },
    });
}

/// Pending shadow → committed reservation.
pub(super) fn bed_commit_stay(bed: &mut BedState, occupant_id: Ulid) {
    if let Some(stay) = bed.stay_mut(occupant_id) {
        stay.kind = StayKind::Reserved;
    }
}

/// Reservation → open-ended occupancy; the bed blocks indefinitely
/// until the matching check-out arrives.
pub(super) fn bed_check_in(bed: &mut BedState, occupant_id: Ulid) {
    if let Some(stay) = bed.stay_mut(occupant_id) {
        stay.kind = StayKind::CheckedIn;
        stay.check_out = None;
    }
}

/// Closes an open-ended occupancy at the actual departure day.
pub(super) fn bed_check_out(bed: &mut BedState, occupant_id: Ulid, day: Day) {
    if let Some(stay) = bed.stay_mut(occupant_id) {
        stay.check_out = Some(day.max(stay.check_in + 1));
    }
}

pub(super) fn bed_release(bed: &mut BedState, occupant_id: Ulid) {
    bed.remove_stay(occupant_id);
}

/// Apply request-side effects of an event. Bed-side effects are applied
/// separately under the room locks.
pub(super) fn apply_to_request(req: &mut RequestState, event: &Event) {
    match event {
        Event::OccupantAdded {
            id,
            name,
            identifier,
            kind,
            gender,
            dates,
            requested_bed,
            ..
        } => {
            req.occupants.push(Occupant {
                id: *id,
                name: name.clone(),
                identifier: identifier.clone(),
                kind: *kind,
                gender: *gender,
                dates: *dates,
                requested_bed: *requested_bed,
                placement: None,
                status: OccupantStatus::Scheduled,
                checked_in_at: None,
                checked_out_at: None,
                cancel_reason: None,
            });
        }
        Event::PlacementStaged { occupant_id, placement, .. } => {
            if let Some(occ) = req.occupants.iter_mut().find(|o| o.id == *occupant_id) {
                occ.placement = Some(*placement);
            }
        }
        Event::RequestApproved { note, at, .. } => {
            req.status = RequestStatus::Approved;
            req.admin_note = note.clone();
            req.approved_at = Some(*at);
        }
        Event::RequestRejected { reason, note, .. } => {
            req.status = RequestStatus::Rejected;
            req.reject_reason = Some(reason.clone());
            req.admin_note = note.clone();
        }
        Event::RequestCancelled { by, reason, .. } => {
            req.status = RequestStatus::Cancelled;
            req.cancelled_by = Some(by.clone());
            req.cancel_reason = Some(reason.clone());
        }
        Event::RequestExpired { .. } => {
            req.status = RequestStatus::Expired;
        }
        Event::OccupantCheckedIn { occupant_id, at, .. } => {
            if let Some(occ) = req.occupants.iter_mut().find(|o| o.id == *occupant_id) {
                occ.status = OccupantStatus::CheckedIn;
                occ.checked_in_at = Some(*at);
            }
        }
        Event::OccupantCheckedOut { occupant_id, at, .. } => {
            if let Some(occ) = req.occupants.iter_mut().find(|o| o.id == *occupant_id) {
                occ.status = OccupantStatus::CheckedOut;
                occ.checked_out_at = Some(*at);
            }
        }
        Event::OccupantCancelled { occupant_id, reason, .. } => {
            if let Some(occ) = req.occupants.iter_mut().find(|o| o.id == *occupant_id) {
                occ.status = OccupantStatus::Cancelled;
                occ.cancel_reason = Some(reason.clone());
            }
        }
        // Structural events are handled at the map level, not here
        Event::BuildingCreated { .. }
        | Event::RoomCreated { .. }
        | Event::BedCreated { .. }
        | Event::BedMaintenanceSet { .. }
        | Event::RequestSubmitted { .. } => {}
    }
}

pub struct Engine {
    pub rooms: DashMap<Ulid, SharedRoomState>,
    pub requests: DashMap<Ulid, SharedRequestState>,
    pub buildings: DashMap<Ulid, Building>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Reverse lookup: bed id → room id
    pub(super) bed_to_room: DashMap<Ulid, Ulid>,
    /// Reverse lookup: occupant id → request id
    pub(super) occupant_to_request: DashMap<Ulid, Ulid>,
    /// Identification tag → occupant id, for badge scans.
    pub(super) tag_to_occupant: DashMap<String, Ulid>,
    /// Building → rooms index for O(1) child lookups.
    pub(super) building_rooms: DashMap<Ulid, Vec<Ulid>>,
}

impl Engine {
    pub fn new(wal_path: PathBuf) -> std::io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            rooms: DashMap::new(),
            requests: DashMap::new(),
            buildings: DashMap::new(),
            wal_tx,
            bed_to_room: DashMap::new(),
            occupant_to_request: DashMap::new(),
            tag_to_occupant: DashMap::new(),
            building_rooms: DashMap::new(),
        };

        // Replay events — we're the sole owner of these Arcs, so try_read/try_write
        // always succeed instantly (no contention). Never use blocking_read/blocking_write
        // here because this may run inside an async context (e.g. lazy tenant creation).
        for event in &events {
            engine.apply_replay(event);
        }

        Ok(engine)
    }

    /// Apply one event during replay. Only called before the engine is
    /// shared, so every lock acquisition is uncontended.
    fn apply_replay(&self, event: &Event) {
        match event {
            Event::BuildingCreated { id, name } => {
                self.buildings.insert(*id, Building { id: *id, name: name.clone() });
                self.building_rooms.entry(*id).or_default();
            }
            Event::RoomCreated { id, building_id, name, gender_policy, allocation } => {
                let room = RoomState::new(*id, *building_id, name.clone(), *gender_policy, *allocation);
                self.rooms.insert(*id, Arc::new(RwLock::new(room)));
                self.building_rooms.entry(*building_id).or_default().push(*id);
            }
            Event::BedCreated { id, room_id, label } => {
                if let Some(entry) = self.rooms.get(room_id) {
                    let mut room = entry.try_write().expect("replay: uncontended write");
                    room.beds.push(BedState::new(*id, label.clone()));
                    self.bed_to_room.insert(*id, *room_id);
                }
            }
            Event::BedMaintenanceSet { id, room_id, on } => {
                if let Some(entry) = self.rooms.get(room_id) {
                    let mut room = entry.try_write().expect("replay: uncontended write");
                    if let Some(bed) = room.bed_mut(*id) {
                        bed.maintenance = *on;
                    }
                }
            }
            Event::RequestSubmitted {
                id,
                requester,
                agency,
                purpose,
                companion,
                window,
                requested_at,
                expires_at,
            } => {
                let req = RequestState {
                    id: *id,
                    requester: requester.clone(),
                    agency: agency.clone(),
                    purpose: purpose.clone(),
                    admin_note: None,
                    companion: companion.clone(),
                    window: *window,
                    status: RequestStatus::Requested,
                    occupants: Vec::new(),
                    requested_at: *requested_at,
                    expires_at: *expires_at,
                    approved_at: None,
                    reject_reason: None,
                    cancelled_by: None,
                    cancel_reason: None,
                };
                self.requests.insert(*id, Arc::new(RwLock::new(req)));
            }
            Event::OccupantAdded { id, request_id, identifier, .. } => {
                if let Some(entry) = self.requests.get(request_id) {
                    let mut req = entry.try_write().expect("replay: uncontended write");
                    apply_to_request(&mut req, event);
                    self.occupant_to_request.insert(*id, *request_id);
                    self.tag_to_occupant.insert(identifier.clone(), *id);
                }
            }
            Event::PlacementStaged { request_id, occupant_id, placement } => {
                if let Some(entry) = self.requests.get(request_id) {
                    let mut req = entry.try_write().expect("replay: uncontended write");
                    let prior = req
                        .occupants
                        .iter()
                        .find(|o| o.id == *occupant_id)
                        .and_then(|o| o.placement);
                    let (dates, expires_at) = match req.occupants.iter().find(|o| o.id == *occupant_id) {
                        Some(occ) => (occ.dates, req.expires_at),
                        None => return,
                    };
                    apply_to_request(&mut req, event);
                    if let Some(old) = prior
                        && old.bed_id != placement.bed_id
                        && let Some(room) = self.rooms.get(&old.room_id)
                    {
                        let mut guard = room.try_write().expect("replay: uncontended write");
                        if let Some(bed) = guard.bed_mut(old.bed_id) {
                            bed_release(bed, *occupant_id);
                        }
                    }
                    if let Some(room) = self.rooms.get(&placement.room_id) {
                        let mut guard = room.try_write().expect("replay: uncontended write");
                        if let Some(bed) = guard.bed_mut(placement.bed_id) {
                            bed_stage_pending(bed, *occupant_id, &dates, *request_id, expires_at);
                        }
                    }
                }
            }
            Event::RequestApproved { id, .. } => {
                if let Some(entry) = self.requests.get(id) {
                    let mut req = entry.try_write().expect("replay: uncontended write");
                    apply_to_request(&mut req, event);
                    for occ in &req.occupants {
                        if let Some(p) = occ.placement
                            && let Some(room) = self.rooms.get(&p.room_id)
                        {
                            let mut guard = room.try_write().expect("replay: uncontended write");
                            if let Some(bed) = guard.bed_mut(p.bed_id) {
                                bed_commit_stay(bed, occ.id);
                            }
                        }
                    }
                }
            }
            Event::RequestRejected { id, .. }
            | Event::RequestCancelled { id, .. }
            | Event::RequestExpired { id, .. } => {
                if let Some(entry) = self.requests.get(id) {
                    let mut req = entry.try_write().expect("replay: uncontended write");
                    apply_to_request(&mut req, event);
                    for occ in &req.occupants {
                        if let Some(p) = occ.placement
                            && let Some(room) = self.rooms.get(&p.room_id)
                        {
                            let mut guard = room.try_write().expect("replay: uncontended write");
                            if let Some(bed) = guard.bed_mut(p.bed_id) {
                                bed_release(bed, occ.id);
                            }
                        }
                    }
                }
            }
            Event::OccupantCheckedIn { request_id, occupant_id, .. } => {
                self.replay_occupant_bed(request_id, occupant_id, event, bed_check_in);
            }
            Event::OccupantCheckedOut { request_id, occupant_id, at } => {
                let day = day_of_ms(*at);
                self.replay_occupant_bed(request_id, occupant_id, event, move |bed, occ_id| {
                    bed_check_out(bed, occ_id, day)
                });
            }
            Event::OccupantCancelled { request_id, occupant_id, .. } => {
                self.replay_occupant_bed(request_id, occupant_id, event, bed_release);
            }
        }
    }

    fn replay_occupant_bed(
        &self,
        request_id: &Ulid,
        occupant_id: &Ulid,
        event: &Event,
        f: impl FnOnce(&mut BedState, Ulid),
    ) {
        if let Some(entry) = self.requests.get(request_id) {
            let mut req = entry.try_write().expect("replay: uncontended write");
            apply_to_request(&mut req, event);
            let placement = req
                .occupants
                .iter()
                .find(|o| o.id == *occupant_id)
                .and_then(|o| o.placement);
            if let Some(p) = placement
                && let Some(room) = self.rooms.get(&p.room_id)
            {
                let mut guard = room.try_write().expect("replay: uncontended write");
                if let Some(bed) = guard.bed_mut(p.bed_id) {
                    f(bed, *occupant_id);
                }
            }
        }
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_room(&self, id: &Ulid) -> Option<SharedRoomState> {
        self.rooms.get(id).map(|e| e.value().clone())
    }

    pub fn get_request(&self, id: &Ulid) -> Option<SharedRequestState> {
        self.requests.get(id).map(|e| e.value().clone())
    }

    pub fn room_of_bed(&self, bed_id: &Ulid) -> Option<Ulid> {
        self.bed_to_room.get(bed_id).map(|e| *e.value())
    }

    pub fn request_of_occupant(&self, occupant_id: &Ulid) -> Option<Ulid> {
        self.occupant_to_request.get(occupant_id).map(|e| *e.value())
    }

    /// Lookup request id, get its state, acquire write lock. Request locks
    /// are always taken before room locks.
    pub(super) async fn resolve_request_write(
        &self,
        request_id: &Ulid,
    ) -> Result<tokio::sync::OwnedRwLockWriteGuard<RequestState>, EngineError> {
        let req = self
            .get_request(request_id)
            .ok_or(EngineError::NotFound(*request_id))?;
        Ok(req.write_owned().await)
    }
}
