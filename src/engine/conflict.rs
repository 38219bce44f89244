use crate::limits::*;
use crate::model::*;

use super::availability::compute_saturated_spans;
use super::EngineError;

pub(crate) fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or(0)
}

/// Query-side overlap test: does `existing`, whose occupancy runs `buffer`
/// past its nominal end, intersect the `[candidate.start, candidate.end)` window?
///
/// Touching is not overlapping: `existing.end + buffer == candidate.start` is free.
pub fn overlaps(candidate: &Span, existing: &Span, buffer: Ms) -> bool {
    existing.start < candidate.end && existing.end + buffer > candidate.start
}

/// The same predicate with the buffer folded into the query window instead:
/// the window's start is pulled back by `buffer`.
pub fn overlaps_adjusted(query: &Span, existing: &Span, buffer: Ms) -> bool {
    let adjusted_start = query.start - buffer;
    existing.start < query.end && existing.end > adjusted_start
}

/// Two reservations conflict when either one's occupancy reaches into the other,
/// i.e. their effective intervals intersect.
pub fn conflicts(a: &Span, b: &Span, buffer: Ms) -> bool {
    overlaps(a, b, buffer) || overlaps(b, a, buffer)
}

pub(crate) fn validate_span(span: &Span) -> Result<(), EngineError> {
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    if span.duration_ms() > MAX_RESERVATION_DURATION_MS {
        return Err(EngineError::LimitExceeded("reservation too long"));
    }
    Ok(())
}

/// Build a span, rejecting `end <= start` before anything else looks at it.
pub fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    if end <= start {
        return Err(EngineError::InvalidInterval { start, end });
    }
    Ok(Span::new(start, end))
}

/// Admission check for one resource, run while holding its write lock.
pub(crate) fn check_no_conflict(rs: &ResourceState, span: &Span) -> Result<(), EngineError> {
    let capacity = rs.capacity();
    if capacity == 0 {
        return Err(EngineError::CapacityExceeded(0));
    }
    // Existing reservations whose occupancy could touch ours start before our
    // effective end and end after our start minus the buffer.
    let search_span = Span::new(span.start - BUFFER_MS, span.end + BUFFER_MS);

    if capacity == 1 {
        for interval in rs.overlapping(&search_span) {
            if conflicts(span, &interval.span, BUFFER_MS) {
                return Err(EngineError::Conflict(interval.id));
            }
        }
    } else {
        let mut allocs: Vec<Span> = rs
            .overlapping(&search_span)
            .map(|i| i.span.effective(BUFFER_MS))
            .collect();
        allocs.sort_by_key(|s| s.start);
        let ours = span.effective(BUFFER_MS);
        for sat in compute_saturated_spans(&allocs, capacity) {
            if sat.overlaps(&ours) {
                return Err(EngineError::CapacityExceeded(capacity));
            }
        }
    }
    Ok(())
}
