use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{oneshot, OwnedRwLockWriteGuard, RwLock};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::lifecycle::{occupant_transition, request_transition, OccupantAction, RequestAction};
use super::validate::{
    check_bed_free_for, check_room_policies, now_ms, require_nonempty, validate_occupant_dates,
    validate_range, validate_timestamp,
};
use super::{
    apply_to_request, bed_check_in, bed_check_out, bed_commit_stay, bed_release,
    bed_stage_pending, Engine, EngineError, WalCommand,
};

/// A request only accepts staging/decision actions while it is live:
/// still `Requested` and not past its deadline.
fn ensure_live(req: &RequestState, now: Ms) -> Result<(), EngineError> {
    if req.status == RequestStatus::Requested && now > req.expires_at {
        return Err(EngineError::RequestExpired(req.id));
    }
    Ok(())
}

impl Engine {
    pub async fn create_building(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        if self.buildings.len() >= MAX_BUILDINGS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many buildings"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("building name too long"));
        }
        require_nonempty(&name, "name")?;
        if self.buildings.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::BuildingCreated { id, name: name.clone() };
        self.wal_append(&event).await?;
        self.buildings.insert(id, Building { id, name });
        self.building_rooms.entry(id).or_default();
        Ok(())
    }

    pub async fn create_room(
        &self,
        id: Ulid,
        building_id: Ulid,
        name: String,
        gender_policy: GenderPolicy,
        allocation: AllocationPolicy,
    ) -> Result<(), EngineError> {
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if name.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("room name too long"));
        }
        require_nonempty(&name, "name")?;
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if !self.buildings.contains_key(&building_id) {
            return Err(EngineError::NotFound(building_id));
        }

        let event = Event::RoomCreated {
            id,
            building_id,
            name: name.clone(),
            gender_policy,
            allocation,
        };
        self.wal_append(&event).await?;
        let room = RoomState::new(id, building_id, name, gender_policy, allocation);
        self.rooms.insert(id, Arc::new(RwLock::new(room)));
        self.building_rooms.entry(building_id).or_default().push(id);
        Ok(())
    }

    pub async fn create_bed(
        &self,
        id: Ulid,
        room_id: Ulid,
        label: String,
    ) -> Result<(), EngineError> {
        if label.len() > MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("bed label too long"));
        }
        require_nonempty(&label, "label")?;
        if self.bed_to_room.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut room = rs.write().await;
        if room.beds.len() >= MAX_BEDS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many beds in room"));
        }

        let event = Event::BedCreated { id, room_id, label: label.clone() };
        self.wal_append(&event).await?;
        room.beds.push(BedState::new(id, label));
        self.bed_to_room.insert(id, room_id);
        Ok(())
    }

    /// Maintenance outranks every stay for availability purposes; existing
    /// stays are kept so the flag can be lifted without losing them.
    pub async fn set_bed_maintenance(&self, bed_id: Ulid, on: bool) -> Result<(), EngineError> {
        let room_id = self
            .room_of_bed(&bed_id)
            .ok_or(EngineError::NotFound(bed_id))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(room_id))?;
        let mut room = rs.write().await;
        if room.bed(bed_id).is_none() {
            return Err(EngineError::NotFound(bed_id));
        }

        let event = Event::BedMaintenanceSet { id: bed_id, room_id, on };
        self.wal_append(&event).await?;
        if let Some(bed) = room.bed_mut(bed_id) {
            bed.maintenance = on;
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn submit_request(
        &self,
        id: Ulid,
        requester: String,
        agency: String,
        purpose: String,
        companion: Option<Companion>,
        window: DayRange,
        expires_at: Option<Ms>,
    ) -> Result<(), EngineError> {
        if self.requests.len() >= MAX_REQUESTS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many requests"));
        }
        require_nonempty(&requester, "requester")?;
        require_nonempty(&agency, "agency")?;
        require_nonempty(&purpose, "purpose")?;
        for (value, field) in [
            (&requester, "requester"),
            (&agency, "agency"),
            (&purpose, "purpose"),
        ] {
            if value.len() > MAX_TEXT_LEN {
                return Err(EngineError::LimitExceeded(field));
            }
        }
        validate_range(&window)?;
        if self.requests.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }
        let requested_at = now_ms();
        let expires_at = expires_at.unwrap_or(requested_at + DEFAULT_REQUEST_TTL_MS);
        validate_timestamp(expires_at)?;

        let event = Event::RequestSubmitted {
            id,
            requester: requester.clone(),
            agency: agency.clone(),
            purpose: purpose.clone(),
            companion: companion.clone(),
            window,
            requested_at,
            expires_at,
        };
        self.wal_append(&event).await?;
        let req = RequestState {
            id,
            requester,
            agency,
            purpose,
            admin_note: None,
            companion,
            window,
            status: RequestStatus::Requested,
            occupants: Vec::new(),
            requested_at,
            expires_at,
            approved_at: None,
            reject_reason: None,
            cancelled_by: None,
            cancel_reason: None,
        };
        self.requests.insert(id, Arc::new(RwLock::new(req)));
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn add_occupant(
        &self,
        id: Ulid,
        request_id: Ulid,
        name: String,
        identifier: String,
        kind: OccupantKind,
        gender: Gender,
        dates: DayRange,
        requested_bed: Option<Ulid>,
    ) -> Result<(), EngineError> {
        require_nonempty(&name, "name")?;
        require_nonempty(&identifier, "identifier")?;
        if name.len() > MAX_NAME_LEN || identifier.len() > MAX_TAG_LEN {
            return Err(EngineError::LimitExceeded("occupant field too long"));
        }
        if self.occupant_to_request.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let mut req = self.resolve_request_write(&request_id).await?;
        let now = now_ms();
        ensure_live(&req, now)?;
        request_transition(req.status, RequestAction::StagePlacement)?;
        if req.occupants.len() >= MAX_OCCUPANTS_PER_REQUEST {
            return Err(EngineError::LimitExceeded("too many occupants on request"));
        }
        validate_occupant_dates(id, &dates, &req.window)?;
        // External guests must arrive with an accompanying employee on file.
        if kind == OccupantKind::Guest && req.companion.is_none() {
            return Err(EngineError::MissingCompanion(request_id));
        }

        let event = Event::OccupantAdded {
            id,
            request_id,
            name,
            identifier: identifier.clone(),
            kind,
            gender,
            dates,
            requested_bed,
        };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        self.occupant_to_request.insert(id, request_id);
        self.tag_to_occupant.insert(identifier, id);
        Ok(())
    }

    /// Stage (or move) an occupant's placement while the request is still
    /// pending. The bed gains a pending shadow so concurrent staging on
    /// other requests sees it, and availability reports the day as pending.
    pub async fn stage_placement(
        &self,
        request_id: Ulid,
        occupant_id: Ulid,
        placement: Placement,
    ) -> Result<(), EngineError> {
        let mut req = self.resolve_request_write(&request_id).await?;
        let now = now_ms();
        ensure_live(&req, now)?;
        request_transition(req.status, RequestAction::StagePlacement)?;

        let occ = req
            .occupants
            .iter()
            .find(|o| o.id == occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        if occ.status != OccupantStatus::Scheduled {
            return Err(EngineError::InvalidTransition {
                entity: "occupant",
                from: occ.status.as_str(),
                action: "stage_placement",
            });
        }
        let dates = occ.dates;
        let prior = occ.placement;

        // Room locks after the request lock, sorted by id.
        let mut room_ids = vec![placement.room_id];
        if let Some(old) = prior
            && old.room_id != placement.room_id
        {
            room_ids.push(old.room_id);
        }
        room_ids.sort();
        let mut guards: HashMap<Ulid, OwnedRwLockWriteGuard<RoomState>> = HashMap::new();
        for rid in &room_ids {
            let rs = self.get_room(rid).ok_or(EngineError::NotFound(*rid))?;
            guards.insert(*rid, rs.write_owned().await);
        }

        {
            let room = &guards[&placement.room_id];
            if room.building_id != placement.building_id {
                return Err(EngineError::NotFound(placement.building_id));
            }
            let bed = room
                .bed(placement.bed_id)
                .ok_or(EngineError::NotFound(placement.bed_id))?;
            if bed.stays.len() >= MAX_STAYS_PER_BED {
                return Err(EngineError::LimitExceeded("too many stays on bed"));
            }
            check_room_policies(room, occ)?;
            check_bed_free_for(bed, &dates, Some(occupant_id), now)?;
        }

        let event = Event::PlacementStaged { request_id, occupant_id, placement };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        if let Some(old) = prior
            && old.bed_id != placement.bed_id
            && let Some(room) = guards.get_mut(&old.room_id)
            && let Some(bed) = room.bed_mut(old.bed_id)
        {
            bed_release(bed, occupant_id);
        }
        let expires_at = req.expires_at;
        if let Some(room) = guards.get_mut(&placement.room_id)
            && let Some(bed) = room.bed_mut(placement.bed_id)
        {
            bed_stage_pending(bed, occupant_id, &dates, request_id, expires_at);
        }
        Ok(())
    }

    /// Approve a pending request. All-or-nothing: every scheduled occupant
    /// must have a complete placement and every placement must still be
    /// valid; if any check fails, nothing is committed.
    pub async fn approve_request(
        &self,
        id: Ulid,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        let mut req = self.resolve_request_write(&id).await?;
        let now = now_ms();
        ensure_live(&req, now)?;
        request_transition(req.status, RequestAction::Approve)?;
        let has_guest = req
            .occupants
            .iter()
            .any(|o| o.kind == OccupantKind::Guest && o.status != OccupantStatus::Cancelled);
        if has_guest && req.companion.is_none() {
            return Err(EngineError::MissingCompanion(id));
        }

        let staged: Vec<(Ulid, DayRange, Placement)> = req
            .occupants
            .iter()
            .filter(|o| o.status == OccupantStatus::Scheduled)
            .map(|o| match o.placement {
                Some(p) => Ok((o.id, o.dates, p)),
                None => Err(EngineError::IncompletePlacement(o.id)),
            })
            .collect::<Result<_, _>>()?;

        // Acquire room write locks in sorted order to prevent deadlocks.
        let mut room_ids: Vec<Ulid> = staged.iter().map(|(_, _, p)| p.room_id).collect();
        room_ids.sort();
        room_ids.dedup();
        let mut guards: HashMap<Ulid, OwnedRwLockWriteGuard<RoomState>> = HashMap::new();
        for rid in &room_ids {
            let rs = self.get_room(rid).ok_or(EngineError::NotFound(*rid))?;
            guards.insert(*rid, rs.write_owned().await);
        }

        // Phase 1: validate every placement against current state.
        for (occ_id, dates, p) in &staged {
            let room = &guards[&p.room_id];
            let occ = req
                .occupants
                .iter()
                .find(|o| o.id == *occ_id)
                .ok_or(EngineError::NotFound(*occ_id))?;
            check_room_policies(room, occ)?;
            let bed = room
                .bed(p.bed_id)
                .ok_or(EngineError::NotFound(p.bed_id))?;
            check_bed_free_for(bed, dates, Some(*occ_id), now)?;
        }

        // Phase 2: all validated — commit.
        let event = Event::RequestApproved { id, note, at: now };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        for (occ_id, _, p) in &staged {
            if let Some(room) = guards.get_mut(&p.room_id)
                && let Some(bed) = room.bed_mut(p.bed_id)
            {
                bed_commit_stay(bed, *occ_id);
            }
        }
        Ok(())
    }

    pub async fn reject_request(
        &self,
        id: Ulid,
        reason: String,
        note: Option<String>,
    ) -> Result<(), EngineError> {
        require_nonempty(&reason, "reason")?;
        if reason.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut req = self.resolve_request_write(&id).await?;
        let now = now_ms();
        ensure_live(&req, now)?;
        request_transition(req.status, RequestAction::Reject)?;

        let event = Event::RequestRejected { id, reason, note, at: now };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        self.release_staged(&req).await;
        Ok(())
    }

    pub async fn cancel_request(
        &self,
        id: Ulid,
        by: String,
        reason: String,
    ) -> Result<(), EngineError> {
        require_nonempty(&by, "cancelled_by")?;
        require_nonempty(&reason, "reason")?;
        if reason.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let mut req = self.resolve_request_write(&id).await?;
        let now = now_ms();
        ensure_live(&req, now)?;
        request_transition(req.status, RequestAction::Cancel)?;

        let event = Event::RequestCancelled { id, by, reason, at: now };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        self.release_staged(&req).await;
        Ok(())
    }

    /// Persist the lapse of a request whose deadline has passed. Reads
    /// already treat such requests as expired; this makes it durable and
    /// frees the staged beds.
    pub async fn expire_request(&self, id: Ulid, now: Ms) -> Result<(), EngineError> {
        let mut req = self.resolve_request_write(&id).await?;
        request_transition(req.status, RequestAction::Expire)?;
        if now <= req.expires_at {
            return Err(EngineError::InvalidTransition {
                entity: "request",
                from: req.status.as_str(),
                action: "expire",
            });
        }

        let event = Event::RequestExpired { id, at: now };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        self.release_staged(&req).await;
        Ok(())
    }

    /// Drop the pending shadows of every still-scheduled occupant. Called
    /// when a request reaches a terminal state without approval.
    async fn release_staged(&self, req: &RequestState) {
        for occ in &req.occupants {
            if occ.status != OccupantStatus::Scheduled {
                continue;
            }
            if let Some(p) = occ.placement
                && let Some(rs) = self.get_room(&p.room_id)
            {
                let mut room = rs.write().await;
                if let Some(bed) = room.bed_mut(p.bed_id) {
                    bed_release(bed, occ.id);
                }
            }
        }
    }

    /// Arrival: flips the occupant to checked-in and leaves the bed
    /// blocked open-ended until check-out, whatever the planned dates say.
    pub async fn check_in(&self, occupant_id: Ulid) -> Result<(), EngineError> {
        let request_id = self
            .request_of_occupant(&occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        let mut req = self.resolve_request_write(&request_id).await?;
        if req.status != RequestStatus::Approved {
            return Err(EngineError::InvalidTransition {
                entity: "request",
                from: req.status.as_str(),
                action: "check_in",
            });
        }
        let now = now_ms();
        let occ = req
            .occupants
            .iter()
            .find(|o| o.id == occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        occupant_transition(occ.status, OccupantAction::CheckIn)?;
        let placement = occ.placement.ok_or(EngineError::IncompletePlacement(occupant_id))?;

        let event = Event::OccupantCheckedIn { request_id, occupant_id, at: now };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        if let Some(rs) = self.get_room(&placement.room_id) {
            let mut room = rs.write().await;
            if let Some(bed) = room.bed_mut(placement.bed_id) {
                bed_check_in(bed, occupant_id);
            }
        }
        Ok(())
    }

    /// Departure. Check-out before the planned departure day is refused
    /// here, for every caller, so no surface can slip an early release
    /// past the availability books.
    pub async fn check_out(&self, occupant_id: Ulid) -> Result<(), EngineError> {
        let request_id = self
            .request_of_occupant(&occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        let mut req = self.resolve_request_write(&request_id).await?;
        let now = now_ms();
        let occ = req
            .occupants
            .iter()
            .find(|o| o.id == occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        occupant_transition(occ.status, OccupantAction::CheckOut)?;
        if day_of_ms(now) < occ.dates.check_out {
            return Err(EngineError::TooEarly {
                occupant_id,
                scheduled: occ.dates.check_out,
            });
        }
        let placement = occ.placement;

        let event = Event::OccupantCheckedOut { request_id, occupant_id, at: now };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        if let Some(p) = placement
            && let Some(rs) = self.get_room(&p.room_id)
        {
            let mut room = rs.write().await;
            if let Some(bed) = room.bed_mut(p.bed_id) {
                bed_check_out(bed, occupant_id, day_of_ms(now));
            }
        }
        Ok(())
    }

    pub async fn cancel_occupant(
        &self,
        occupant_id: Ulid,
        reason: String,
    ) -> Result<(), EngineError> {
        require_nonempty(&reason, "reason")?;
        if reason.len() > MAX_TEXT_LEN {
            return Err(EngineError::LimitExceeded("reason too long"));
        }
        let request_id = self
            .request_of_occupant(&occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        let mut req = self.resolve_request_write(&request_id).await?;
        let now = now_ms();
        let occ = req
            .occupants
            .iter()
            .find(|o| o.id == occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        occupant_transition(occ.status, OccupantAction::Cancel)?;
        let placement = occ.placement;

        let event = Event::OccupantCancelled { request_id, occupant_id, reason, at: now };
        self.wal_append(&event).await?;
        apply_to_request(&mut req, &event);
        if let Some(p) = placement
            && let Some(rs) = self.get_room(&p.room_id)
        {
            let mut room = rs.write().await;
            if let Some(bed) = room.bed_mut(p.bed_id) {
                bed_release(bed, occupant_id);
            }
        }
        Ok(())
    }

    /// Requests whose deadline has passed while still pending. Lazy
    /// read-time expiry already hides them; the reaper persists the lapse.
    pub fn collect_expired_requests(&self, now: Ms) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for entry in self.requests.iter() {
            let rs = entry.value().clone();
            if let Ok(guard) = rs.try_read()
                && guard.status == RequestStatus::Requested
                && guard.expires_at <= now
            {
                expired.push(guard.id);
            }
        }
        expired
    }

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let mut events = Vec::new();

        for entry in self.buildings.iter() {
            let b = entry.value();
            events.push(Event::BuildingCreated { id: b.id, name: b.name.clone() });
        }

        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        for id in room_ids {
            let rs = match self.rooms.get(&id) {
                Some(e) => e.value().clone(),
                None => continue,
            };
            // Mutations may hold the write lock across their WAL fsync;
            // wait for them rather than assuming an uncontended map.
            let room = rs.read().await;
            events.push(Event::RoomCreated {
                id: room.id,
                building_id: room.building_id,
                name: room.name.clone(),
                gender_policy: room.gender_policy,
                allocation: room.allocation,
            });
            for bed in &room.beds {
                events.push(Event::BedCreated {
                    id: bed.id,
                    room_id: room.id,
                    label: bed.label.clone(),
                });
                if bed.maintenance {
                    events.push(Event::BedMaintenanceSet {
                        id: bed.id,
                        room_id: room.id,
                        on: true,
                    });
                }
            }
        }

        let request_ids: Vec<Ulid> = self.requests.iter().map(|e| *e.key()).collect();
        for id in request_ids {
            let rs = match self.requests.get(&id) {
                Some(e) => e.value().clone(),
                None => continue,
            };
            let req = rs.read().await;
            emit_request(&req, &mut events);
        }

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

/// Emit the event sequence that recreates one request (and its bed stays)
/// on replay: submission, occupants, placements, then the status edges in
/// the order the lifecycle allows them.
fn emit_request(req: &RequestState, events: &mut Vec<Event>) {
    events.push(Event::RequestSubmitted {
        id: req.id,
        requester: req.requester.clone(),
        agency: req.agency.clone(),
        purpose: req.purpose.clone(),
        companion: req.companion.clone(),
        window: req.window,
        requested_at: req.requested_at,
        expires_at: req.expires_at,
    });
    for occ in &req.occupants {
        events.push(Event::OccupantAdded {
            id: occ.id,
            request_id: req.id,
            name: occ.name.clone(),
            identifier: occ.identifier.clone(),
            kind: occ.kind,
            gender: occ.gender,
            dates: occ.dates,
            requested_bed: occ.requested_bed,
        });
        if let Some(p) = occ.placement {
            events.push(Event::PlacementStaged {
                request_id: req.id,
                occupant_id: occ.id,
                placement: p,
            });
        }
    }
    match req.status {
        RequestStatus::Requested => {}
        RequestStatus::Approved => events.push(Event::RequestApproved {
            id: req.id,
            note: req.admin_note.clone(),
            at: req.approved_at.unwrap_or(req.requested_at),
        }),
        RequestStatus::Rejected => events.push(Event::RequestRejected {
            id: req.id,
            reason: req.reject_reason.clone().unwrap_or_default(),
            note: req.admin_note.clone(),
            at: req.requested_at,
        }),
        RequestStatus::Cancelled => events.push(Event::RequestCancelled {
            id: req.id,
            by: req.cancelled_by.clone().unwrap_or_default(),
            reason: req.cancel_reason.clone().unwrap_or_default(),
            at: req.requested_at,
        }),
        RequestStatus::Expired => events.push(Event::RequestExpired {
            id: req.id,
            at: req.expires_at,
        }),
    }
    for occ in &req.occupants {
        if let Some(at) = occ.checked_in_at {
            events.push(Event::OccupantCheckedIn {
                request_id: req.id,
                occupant_id: occ.id,
                at,
            });
        }
        if let Some(at) = occ.checked_out_at {
            events.push(Event::OccupantCheckedOut {
                request_id: req.id,
                occupant_id: occ.id,
                at,
            });
        }
        if occ.status == OccupantStatus::Cancelled {
            events.push(Event::OccupantCancelled {
                request_id: req.id,
                occupant_id: occ.id,
                reason: occ.cancel_reason.clone().unwrap_or_default(),
                at: req.requested_at,
            });
        }
    }
}
