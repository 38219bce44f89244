use std::collections::HashMap;

use tokio::time::{Instant, timeout_at};
use tracing::debug;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::availability::{group_available, tally_occupancy};
use super::{Engine, EngineError};

impl Engine {
    /// System types in creation order.
    pub fn list_system_types(&self) -> Vec<SystemType> {
        let mut types: Vec<(u64, SystemType)> = self
            .system_types
            .iter()
            .map(|e| {
                (
                    e.value().seq,
                    SystemType {
                        id: *e.key(),
                        name: e.value().name.clone(),
                    },
                )
            })
            .collect();
        types.sort_by_key(|(seq, _)| *seq);
        types.into_iter().map(|(_, t)| t).collect()
    }

    /// Systems and games in creation order, read under each resource's read lock.
    async fn catalog_snapshot(
        &self,
        deadline: Instant,
    ) -> Result<(Vec<GameSystemInfo>, Vec<GameInfo>), EngineError> {
        let mut systems: Vec<(u64, GameSystemInfo)> = Vec::new();
        let mut games: Vec<(u64, GameInfo)> = Vec::new();
        for rs in self.resource_handles() {
            let guard = timeout_at(deadline, rs.read())
                .await
                .map_err(|_| EngineError::Timeout)?;
            if guard.deleted {
                continue;
            }
            if guard.is_game() {
                games.push((guard.seq, guard.game_info()));
            } else {
                systems.push((guard.seq, guard.system_info()));
            }
        }
        systems.sort_by_key(|(seq, _)| *seq);
        games.sort_by_key(|(seq, _)| *seq);
        Ok((
            systems.into_iter().map(|(_, s)| s).collect(),
            games.into_iter().map(|(_, g)| g).collect(),
        ))
    }

    pub async fn list_game_systems(&self, deadline: Instant) -> Result<Vec<GameSystemInfo>, EngineError> {
        Ok(self.catalog_snapshot(deadline).await?.0)
    }

    pub async fn list_games(&self, deadline: Instant) -> Result<Vec<GameInfo>, EngineError> {
        Ok(self.catalog_snapshot(deadline).await?.1)
    }

    fn ledger_snapshot(&self) -> Vec<Reservation> {
        self.reservations.iter().map(|e| e.value().clone()).collect()
    }

    /// What can be booked for `query`: the games listed under each system
    /// type that has a free system, keyed by type name.
    pub async fn compute_availability(
        &self,
        query: Span,
        deadline: Instant,
    ) -> Result<AvailabilityView, EngineError> {
        if query.duration_ms() > MAX_QUERY_WINDOW_MS {
            return Err(EngineError::LimitExceeded("query window too wide"));
        }
        let started = std::time::Instant::now();

        let system_types = self.list_system_types();
        let (systems, games) = self.catalog_snapshot(deadline).await?;
        let ledger = self.ledger_snapshot();
        let occupancy = tally_occupancy(&ledger, &query);
        let view = group_available(&system_types, &systems, &games, &occupancy);

        metrics::histogram!(crate::observability::AVAILABILITY_QUERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        debug!(
            "availability [{}, {}): {} type(s), {} occupied game(s)",
            query.start,
            query.end,
            view.len(),
            occupancy.games.len()
        );
        Ok(view)
    }

    /// Reservations starting within `[start, end]` (both inclusive), ordered
    /// by start and joined with their catalog entries.
    pub async fn list_reservations(
        &self,
        start: Ms,
        end: Ms,
        deadline: Instant,
    ) -> Result<Vec<ReservationRow>, EngineError> {
        if end < start {
            return Err(EngineError::InvalidInterval { start, end });
        }
        let types: HashMap<Ulid, SystemType> = self
            .list_system_types()
            .into_iter()
            .map(|t| (t.id, t))
            .collect();
        let (systems, games) = self.catalog_snapshot(deadline).await?;
        let systems: HashMap<Ulid, GameSystemInfo> = systems.into_iter().map(|s| (s.id, s)).collect();
        let games: HashMap<Ulid, GameInfo> = games.into_iter().map(|g| (g.id, g)).collect();

        let mut matching: Vec<Reservation> = self
            .ledger_snapshot()
            .into_iter()
            .filter(|r| r.span.start >= start && r.span.start <= end)
            .collect();
        matching.sort_by_key(|r| (r.span.start, r.id));

        Ok(matching
            .into_iter()
            .filter_map(|reservation| {
                let game = games.get(&reservation.game_id)?.clone();
                let game_system = systems.get(&reservation.game_system_id)?.clone();
                let system_type = types.get(&game_system.system_type_id)?.clone();
                Some(ReservationRow {
                    reservation,
                    game,
                    game_system,
                    system_type,
                })
            })
            .collect())
    }
}
