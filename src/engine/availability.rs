use std::collections::{BTreeMap, HashMap, HashSet};

use ulid::Ulid;

use crate::limits::BUFFER_MS;
use crate::model::*;

use super::conflict::overlaps;

// ── Availability Algorithm ────────────────────────────────────────

/// Reservations whose occupancy intersects a query window, tallied per resource.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Occupancy {
    /// game id → number of overlapping reservations
    pub games: HashMap<Ulid, u32>,
    pub systems: HashSet<Ulid>,
}

impl Occupancy {
    pub fn game_count(&self, game_id: &Ulid) -> u32 {
        self.games.get(game_id).copied().unwrap_or(0)
    }
}

/// Single pass over the ledger: every reservation whose effective interval
/// `[start, end + BUFFER)` overlaps `query` counts against its game and system.
pub fn tally_occupancy<'a, I>(reservations: I, query: &Span) -> Occupancy
where
    I: IntoIterator<Item = &'a Reservation>,
{
    let mut occ = Occupancy::default();
    for r in reservations {
        if overlaps(query, &r.span, BUFFER_MS) {
            *occ.games.entry(r.game_id).or_default() += 1;
            occ.systems.insert(r.game_system_id);
        }
    }
    occ
}

/// Listing rule for titles: active, single-copy, and not fully booked.
/// Multi-copy titles are left out of this view.
pub fn game_is_listed(game: &GameInfo, occ: &Occupancy) -> bool {
    game.active && game.quantity == 1 && occ.game_count(&game.id) < game.quantity
}

/// Hardware is single-capacity: any overlapping reservation takes it.
pub fn system_is_free(system: &GameSystemInfo, occ: &Occupancy) -> bool {
    system.active && !occ.systems.contains(&system.id)
}

/// Group listed games under the system type of every free system.
///
/// A type appears once at least one of its systems is free, even when no
/// title for it is listed. Games keep catalog order.
pub fn group_available(
    system_types: &[SystemType],
    systems: &[GameSystemInfo],
    games: &[GameInfo],
    occ: &Occupancy,
) -> AvailabilityView {
    let listed: Vec<&GameInfo> = games.iter().filter(|g| game_is_listed(g, occ)).collect();

    let mut view = BTreeMap::new();
    for system in systems.iter().filter(|s| system_is_free(s, occ)) {
        let Some(system_type) = system_types.iter().find(|t| t.id == system.system_type_id) else {
            continue;
        };
        view.entry(system_type.name.clone()).or_insert_with(|| {
            listed
                .iter()
                .filter(|g| g.system_type_id == system_type.id)
                .map(|g| (*g).clone())
                .collect()
        });
    }
    view
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut() {
            if span.start <= last.end {
                last.end = last.end.max(span.end);
                continue;
            }
        }
        merged.push(span);
    }
    merged
}

/// Sweep-line algorithm: find time ranges where allocation count >= capacity.
/// Returns sorted, merged spans representing fully-saturated time ranges.
pub fn compute_saturated_spans(allocs: &[Span], capacity: u32) -> Vec<Span> {
    if allocs.is_empty() || capacity == 0 {
        return Vec::new();
    }
    if capacity == 1 {
        return merge_overlapping(allocs);
    }

    // Build sweep-line events: +1 at start, -1 at end
    let mut events: Vec<(Ms, i32)> = Vec::with_capacity(allocs.len() * 2);
    for a in allocs {
        events.push((a.start, 1));
        events.push((a.end, -1));
    }
    events.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)));

    let mut result = Vec::new();
    let mut count: u32 = 0;
    let mut saturated_start: Option<Ms> = None;

    for (time, delta) in &events {
        if *delta > 0 {
            count += *delta as u32;
        } else {
            count -= (-*delta) as u32;
        }

        if count >= capacity && saturated_start.is_none() {
            saturated_start = Some(*time);
        } else if count < capacity {
            if let Some(start) = saturated_start.take() {
                if *time > start {
                    result.push(Span::new(start, *time));
                }
            }
        }
    }

    result
}
