use ulid::Ulid;

use crate::model::*;
use crate::scan;

use super::availability::{day_grid, free_beds, free_count_per_day, TimelineCell};
use super::validate::{now_ms, validate_query_window};
use super::{Engine, EngineError};

impl Engine {
    /// Beds free across the whole `[check_in, check_out)` window.
    /// An unknown room yields an empty set, not an error.
    pub async fn free_beds_for_range(
        &self,
        room_id: Ulid,
        range: DayRange,
    ) -> Result<Vec<BedInfo>, EngineError> {
        validate_query_window(&range)?;
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let room = rs.read().await;
        let now = now_ms();
        let free = free_beds(&room, &range, now);
        Ok(room
            .beds
            .iter()
            .filter(|b| free.contains(&b.id))
            .map(|b| BedInfo {
                id: b.id,
                room_id,
                label: b.label.clone(),
                maintenance: b.maintenance,
            })
            .collect())
    }

    /// Per-day, per-bed classification for the admin calendar grid.
    pub async fn room_timeline(
        &self,
        room_id: Ulid,
        range: DayRange,
    ) -> Result<Vec<TimelineCell>, EngineError> {
        validate_query_window(&range)?;
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let room = rs.read().await;
        Ok(day_grid(&room, &range, now_ms()))
    }

    /// Free-bed count per day across the window.
    pub async fn room_free_counts(
        &self,
        room_id: Ulid,
        range: DayRange,
    ) -> Result<Vec<(Day, usize)>, EngineError> {
        validate_query_window(&range)?;
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return Ok(vec![]),
        };
        let room = rs.read().await;
        Ok(free_count_per_day(&room, &range, now_ms()))
    }

    pub fn list_buildings(&self) -> Vec<Building> {
        let mut out: Vec<Building> = self.buildings.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|b| b.id);
        out
    }

    pub async fn list_rooms(&self, building_id: Option<Ulid>) -> Vec<RoomInfo> {
        let ids: Vec<Ulid> = match building_id {
            Some(bid) => self
                .building_rooms
                .get(&bid)
                .map(|e| e.value().clone())
                .unwrap_or_default(),
            None => self.rooms.iter().map(|e| *e.key()).collect(),
        };
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            let rs = match self.get_room(&id) {
                Some(rs) => rs,
                None => continue,
            };
            let room = rs.read().await;
            out.push(RoomInfo {
                id: room.id,
                building_id: room.building_id,
                name: room.name.clone(),
                gender_policy: room.gender_policy,
                allocation: room.allocation,
                bed_count: room.beds.len(),
            });
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn list_beds(&self, room_id: Ulid) -> Vec<BedInfo> {
        let rs = match self.get_room(&room_id) {
            Some(rs) => rs,
            None => return vec![],
        };
        let room = rs.read().await;
        room.beds
            .iter()
            .map(|b| BedInfo {
                id: b.id,
                room_id,
                label: b.label.clone(),
                maintenance: b.maintenance,
            })
            .collect()
    }

    /// Requests, newest first, optionally filtered by status. The filter
    /// and the reported status both use the deadline-aware view, so a
    /// lapsed request reads as expired before the reaper persists it.
    pub async fn list_requests(&self, status: Option<RequestStatus>) -> Vec<RequestInfo> {
        let now = now_ms();
        let ids: Vec<Ulid> = self.requests.iter().map(|e| *e.key()).collect();
        let mut out = Vec::new();
        for id in ids {
            let rs = match self.get_request(&id) {
                Some(rs) => rs,
                None => continue,
            };
            let req = rs.read().await;
            let effective = req.effective_status(now);
            if status.is_some_and(|s| s != effective) {
                continue;
            }
            out.push(RequestInfo {
                id: req.id,
                requester: req.requester.clone(),
                purpose: req.purpose.clone(),
                status: effective,
                window: req.window,
                occupant_count: req.occupants.len(),
                requested_at: req.requested_at,
            });
        }
        out.sort_by(|a, b| b.requested_at.cmp(&a.requested_at).then(a.id.cmp(&b.id)));
        out
    }

    pub async fn list_occupants(&self, request_id: Ulid) -> Result<Vec<OccupantInfo>, EngineError> {
        let rs = self
            .get_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let req = rs.read().await;
        Ok(req
            .occupants
            .iter()
            .map(|o| OccupantInfo {
                id: o.id,
                request_id,
                name: o.name.clone(),
                identifier: o.identifier.clone(),
                kind: o.kind,
                gender: o.gender,
                status: o.status,
                dates: o.dates,
                placement: o.placement,
            })
            .collect())
    }

    /// Resolve a scanned badge payload to the occupant it identifies.
    /// Unknown tags carry the raw scan back to the caller.
    pub async fn scan_tag(&self, raw: &str) -> Result<(OccupantInfo, RequestStatus), EngineError> {
        let identifier = scan::decode_tag(raw);
        let occupant_id = self
            .tag_to_occupant
            .get(&identifier)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::TagNotFound(raw.to_string()))?;
        let request_id = self
            .request_of_occupant(&occupant_id)
            .ok_or_else(|| EngineError::TagNotFound(raw.to_string()))?;
        let rs = self
            .get_request(&request_id)
            .ok_or(EngineError::NotFound(request_id))?;
        let req = rs.read().await;
        let occ = req
            .occupants
            .iter()
            .find(|o| o.id == occupant_id)
            .ok_or(EngineError::NotFound(occupant_id))?;
        Ok((
            OccupantInfo {
                id: occ.id,
                request_id,
                name: occ.name.clone(),
                identifier: occ.identifier.clone(),
                kind: occ.kind,
                gender: occ.gender,
                status: occ.status,
                dates: occ.dates,
                placement: occ.placement,
            },
            req.effective_status(now_ms()),
        ))
    }

    /// Full request snapshots for the manifest export, oldest first.
    pub async fn snapshot_requests(&self) -> Vec<RequestState> {
        let ids: Vec<Ulid> = self.requests.iter().map(|e| *e.key()).collect();
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(rs) = self.get_request(&id) {
                out.push(rs.read().await.clone());
            }
        }
        out.sort_by(|a, b| a.requested_at.cmp(&b.requested_at).then(a.id.cmp(&b.id)));
        out
    }

    /// Building, room and bed display names for a placement, if all three
    /// still exist.
    pub async fn placement_names(&self, p: &Placement) -> Option<(String, String, String)> {
        let building = self.buildings.get(&p.building_id)?.name.clone();
        let rs = self.get_room(&p.room_id)?;
        let room = rs.read().await;
        let bed = room.bed(p.bed_id)?.label.clone();
        Some((building, room.name.clone(), bed))
    }
}
