use tokio::time::Instant;
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::{check_no_conflict, now_ms, validate_span};
use super::{Engine, EngineError};

/// An admission request whose caller has already been authorized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewReservation {
    pub user_id: UserId,
    pub span: Span,
    pub game_system_id: Ulid,
    pub game_id: Ulid,
}

impl Engine {
    /// Admit a reservation. The system and the game stay write-locked from
    /// the eligibility check through the WAL commit, so two racing admissions
    /// for overlapping slots cannot both pass.
    pub async fn create_reservation(
        &self,
        request: NewReservation,
        deadline: Instant,
    ) -> Result<Reservation, EngineError> {
        validate_span(&request.span)?;
        if request.user_id.is_empty() || request.user_id.len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user id must be 1..=256 bytes"));
        }

        let (mut system, mut game) = self
            .lock_pair(request.game_system_id, request.game_id, deadline)
            .await?;
        if system.is_game() {
            return Err(EngineError::NotFound(request.game_system_id));
        }
        if !game.is_game() {
            return Err(EngineError::NotFound(request.game_id));
        }
        if !system.active {
            return Err(EngineError::Inactive(system.id));
        }
        if !game.active {
            return Err(EngineError::Inactive(game.id));
        }
        if game.system_type_id != system.system_type_id {
            return Err(EngineError::TypeMismatch {
                game_id: game.id,
                game_system_id: system.id,
            });
        }
        if system.intervals.len() >= MAX_RESERVATIONS_PER_RESOURCE
            || game.intervals.len() >= MAX_RESERVATIONS_PER_RESOURCE
        {
            return Err(EngineError::LimitExceeded("too many reservations on resource"));
        }
        check_no_conflict(&system, &request.span)?;
        check_no_conflict(&game, &request.span)?;

        let reservation = Reservation {
            id: Ulid::new(),
            user_id: request.user_id,
            span: request.span,
            game_system_id: request.game_system_id,
            game_id: request.game_id,
            created_at: now_ms(),
        };
        let event = Event::reservation_created(&reservation);
        self.persist_and_apply(&mut [&mut *system, &mut *game], &event)
            .await?;
        info!(
            "reservation {} admitted: game {} on system {} [{}, {})",
            reservation.id,
            reservation.game_id,
            reservation.game_system_id,
            reservation.span.start,
            reservation.span.end
        );
        Ok(reservation)
    }

    /// Remove a reservation, returning what was removed.
    pub async fn cancel_reservation(
        &self,
        id: Ulid,
        deadline: Instant,
    ) -> Result<Reservation, EngineError> {
        let (game_system_id, game_id) = self
            .reservations
            .get(&id)
            .map(|r| (r.game_system_id, r.game_id))
            .ok_or(EngineError::NotFound(id))?;

        let (mut system, mut game) = self.lock_pair(game_system_id, game_id, deadline).await?;
        // Another cancel may have won the locks first.
        let reservation = self
            .reservations
            .get(&id)
            .map(|r| r.value().clone())
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::ReservationCancelled {
            id,
            game_system_id,
            game_id,
        };
        self.persist_and_apply(&mut [&mut *system, &mut *game], &event)
            .await?;
        info!("reservation {id} cancelled");
        Ok(reservation)
    }

    pub fn get_reservation(&self, id: &Ulid) -> Option<Reservation> {
        self.reservations.get(id).map(|r| r.value().clone())
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.len()
    }
}
