use crate::model::Ms;

const MINUTE_MS: Ms = 60_000;
const DAY_MS: Ms = 24 * 60 * MINUTE_MS;

/// Cleanup time appended after every reservation's nominal end.
pub const BUFFER_MS: Ms = 30 * MINUTE_MS;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTICE_LEN: usize = 16 * 1024;
pub const MAX_USER_ID_LEN: usize = 256;

/// 1970-01-01T00:00:00Z .. 2100-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_RESERVATION_DURATION_MS: Ms = 7 * DAY_MS;
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * DAY_MS;

/// Default bounds for reservation listings when the caller gives none.
pub const LIST_DEFAULT_START_MS: Ms = 0;
/// 2099-01-01T00:00:00Z
pub const LIST_DEFAULT_END_MS: Ms = 4_070_908_800_000;

pub const MAX_RESOURCES: usize = 10_000;
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;
