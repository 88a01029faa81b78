//! Occupancy manifest export.
//!
//! One row per occupant across every request, in the fixed 14-column
//! layout the administration's spreadsheet template expects. Column
//! headers are kept in Indonesian to match that template.

use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, OffsetDateTime};

use crate::engine::{now_ms, Engine};
use crate::model::*;

pub const MANIFEST_COLUMNS: [&str; 14] = [
    "No",
    "Kode Booking",
    "Tgl Request",
    "Pemohon",
    "Instansi Pemohon",
    "Tujuan",
    "Status Booking",
    "Nama Tamu",
    "Tipe",
    "NIK/ID",
    "Lokasi",
    "Check In",
    "Check Out",
    "Status Item",
];

const DATE_FORMAT: &[BorrowedFormatItem<'_>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub no: i64,
    pub booking_code: String,
    pub requested_on: String,
    pub requester: String,
    pub agency: String,
    pub purpose: String,
    pub booking_status: String,
    pub occupant_name: String,
    pub occupant_kind: String,
    pub identifier: String,
    pub location: String,
    pub check_in: String,
    pub check_out: String,
    pub occupant_status: String,
}

/// Render an epoch day as `YYYY-MM-DD`. Out-of-range days (which the
/// engine never stores) fall back to the raw number.
pub fn format_day(day: Day) -> String {
    OffsetDateTime::from_unix_timestamp(day * 86_400)
        .ok()
        .map(|dt| dt.date())
        .and_then(|d: Date| d.format(&DATE_FORMAT).ok())
        .unwrap_or_else(|| day.to_string())
}

fn format_ms(ms: Ms) -> String {
    format_day(day_of_ms(ms))
}

fn kind_label(kind: OccupantKind) -> &'static str {
    match kind {
        OccupantKind::Employee => "employee",
        OccupantKind::Guest => "guest",
    }
}

/// `Building / Room / Bed` for a resolved placement; a dash when the
/// occupant is not placed yet.
fn location_label(names: Option<(String, String, String)>) -> String {
    match names {
        Some((building, room, bed)) => format!("{building} / {room} / {bed}"),
        None => "-".to_string(),
    }
}

/// Build the full manifest. Check-in/check-out columns show the actual
/// movement timestamps once they exist, the planned dates until then.
pub async fn manifest_rows(engine: &Engine) -> Vec<ManifestRow> {
    let now = now_ms();
    let mut rows = Vec::new();
    for req in engine.snapshot_requests().await {
        let status = req.effective_status(now);
        for occ in &req.occupants {
            let names = match occ.placement {
                Some(ref p) => engine.placement_names(p).await,
                None => None,
            };
            let check_in = match occ.checked_in_at {
                Some(at) => format_ms(at),
                None => format_day(occ.dates.check_in),
            };
            let check_out = match occ.checked_out_at {
                Some(at) => format_ms(at),
                None => format_day(occ.dates.check_out),
            };
            rows.push(ManifestRow {
                no: rows.len() as i64 + 1,
                booking_code: req.id.to_string(),
                requested_on: format_ms(req.requested_at),
                requester: req.requester.clone(),
                agency: req.agency.clone(),
                purpose: req.purpose.clone(),
                booking_status: status.as_str().to_string(),
                occupant_name: occ.name.clone(),
                occupant_kind: kind_label(occ.kind).to_string(),
                identifier: occ.identifier.clone(),
                location: location_label(names),
                check_in,
                check_out,
                occupant_status: occ.status.as_str().to_string(),
            });
        }
    }
    rows
}
