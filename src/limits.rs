//! Hard limits protecting a tenant engine from unbounded input.

use crate::model::{Day, Ms};

pub const MAX_BUILDINGS_PER_TENANT: usize = 1_000;
pub const MAX_ROOMS_PER_TENANT: usize = 50_000;
pub const MAX_BEDS_PER_ROOM: usize = 64;
pub const MAX_REQUESTS_PER_TENANT: usize = 500_000;
pub const MAX_OCCUPANTS_PER_REQUEST: usize = 50;
pub const MAX_STAYS_PER_BED: usize = 10_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TEXT_LEN: usize = 2_048;
pub const MAX_TAG_LEN: usize = 512;

/// Query windows wider than this are rejected outright.
pub const MAX_QUERY_WINDOW_DAYS: Day = 400;

/// 1970-01-01 .. 2200-01-01, in epoch days.
pub const MIN_VALID_DAY: Day = 0;
pub const MAX_VALID_DAY: Day = 84_006;

/// Timestamps must fall in 1970..2200 (ms).
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 7_258_118_400_000;

/// Pending requests lapse this long after submission unless an explicit
/// deadline is supplied.
pub const DEFAULT_REQUEST_TTL_MS: Ms = 7 * 24 * 60 * 60 * 1_000;

pub const MAX_TENANTS: usize = 256;
pub const MAX_TENANT_NAME_LEN: usize = 64;
