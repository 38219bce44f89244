use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::dispatch::NotificationDispatcher;
use crate::engine::{Engine, EngineError, GamePatch, NewReservation, SystemPatch, checked_span};
use crate::gate::AuthorizationGate;
use crate::limits::*;
use crate::model::*;
use crate::observability;

/// The capability a command needs, and how a refusal names the action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    pub capability: Capability,
    pub action: &'static str,
}

impl Policy {
    pub const RESERVE: Policy = Policy {
        capability: Capability::Reserve,
        action: "create a reservation",
    };
    pub const CANCEL: Policy = Policy {
        capability: Capability::CancelReservation,
        action: "cancel reservations",
    };
    pub const MANAGE_CATALOG: Policy = Policy {
        capability: Capability::ManageCatalog,
        action: "manage the catalog",
    };
    pub const MANAGE_NOTICE: Policy = Policy {
        capability: Capability::ManageCatalog,
        action: "update the weekly notice",
    };
}

/// Who is asking, and until when they are willing to wait.
#[derive(Debug, Clone)]
pub struct RequestCtx {
    pub caller: Option<Caller>,
    pub deadline: Instant,
}

impl RequestCtx {
    pub fn new(caller: Option<Caller>, timeout: Duration) -> Self {
        Self {
            caller,
            deadline: Instant::now() + timeout,
        }
    }

    fn authorize(&self, policy: Policy) -> Result<&Caller, EngineError> {
        let caller = self.caller.as_ref().ok_or(EngineError::Unauthenticated)?;
        if !caller.role.can(policy.capability) {
            return Err(EngineError::Forbidden {
                role: caller.role,
                action: policy.action,
            });
        }
        Ok(caller)
    }

    /// Check `policy` before the request body is even looked at. A refusal
    /// is the same result `Booker::execute` would have produced.
    pub fn admit(&self, policy: Policy) -> Result<(), CommandResult> {
        self.authorize(policy)
            .map(|_| ())
            .map_err(|e| CommandResult::failed(&e))
    }
}

/// A state-changing request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    CreateReservation {
        /// Book on behalf of this user; defaults to the caller.
        user_id: Option<UserId>,
        start: Ms,
        end: Ms,
        game_system_id: Ulid,
        game_id: Ulid,
    },
    CancelReservation {
        id: Ulid,
    },
    CreateSystemType {
        name: String,
    },
    RenameSystemType {
        id: Ulid,
        name: String,
    },
    CreateGameSystem {
        name: String,
        system_type_id: Ulid,
    },
    UpdateGameSystem {
        id: Ulid,
        patch: SystemPatch,
    },
    DeleteGameSystem {
        id: Ulid,
    },
    CreateGame {
        name: String,
        system_type_id: Ulid,
        quantity: u32,
    },
    UpdateGame {
        id: Ulid,
        patch: GamePatch,
    },
    DeleteGame {
        id: Ulid,
    },
    UpdateWeeklyNotice {
        content: String,
    },
}

impl Command {
    /// Operation label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::CreateReservation { .. } => "create_reservation",
            Command::CancelReservation { .. } => "cancel_reservation",
            Command::CreateSystemType { .. } => "create_system_type",
            Command::RenameSystemType { .. } => "rename_system_type",
            Command::CreateGameSystem { .. } => "create_game_system",
            Command::UpdateGameSystem { .. } => "update_game_system",
            Command::DeleteGameSystem { .. } => "delete_game_system",
            Command::CreateGame { .. } => "create_game",
            Command::UpdateGame { .. } => "update_game",
            Command::DeleteGame { .. } => "delete_game",
            Command::UpdateWeeklyNotice { .. } => "update_weekly_notice",
        }
    }

    pub fn policy(&self) -> Policy {
        match self {
            Command::CreateReservation { .. } => Policy::RESERVE,
            Command::CancelReservation { .. } => Policy::CANCEL,
            Command::UpdateWeeklyNotice { .. } => Policy::MANAGE_NOTICE,
            _ => Policy::MANAGE_CATALOG,
        }
    }
}

/// What a successful command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Reservation(Reservation),
    SystemType(SystemType),
    GameSystem(GameSystemInfo),
    Game(GameInfo),
    Removed(Ulid),
    WeeklyNotice(WeeklyNotice),
}

/// Structured command result: business failures are values, not errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub success: bool,
    pub message: String,
    pub outcome: Option<Outcome>,
}

impl CommandResult {
    fn ok(message: &str, outcome: Outcome) -> Self {
        Self {
            success: true,
            message: message.to_string(),
            outcome: Some(outcome),
        }
    }

    fn failed(e: &EngineError) -> Self {
        Self {
            success: false,
            message: e.to_string(),
            outcome: None,
        }
    }
}

/// A listed reservation with the owner's display data, when the directory has it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationListing {
    pub row: ReservationRow,
    pub user: Option<UserProfile>,
}

/// Request-scoped front of the engine: authorization, structured results,
/// and post-commit notification.
pub struct Booker {
    engine: Arc<Engine>,
    gate: Arc<dyn AuthorizationGate>,
    dispatcher: Arc<dyn NotificationDispatcher>,
}

impl Booker {
    pub fn new(
        engine: Arc<Engine>,
        gate: Arc<dyn AuthorizationGate>,
        dispatcher: Arc<dyn NotificationDispatcher>,
    ) -> Self {
        Self {
            engine,
            gate,
            dispatcher,
        }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Resolve the caller behind an optional session token.
    pub async fn context(&self, token: Option<&str>, timeout: Duration) -> RequestCtx {
        let caller = match token {
            Some(token) => self.gate.session(token).await,
            None => None,
        };
        RequestCtx::new(caller, timeout)
    }

    /// Run a command. Only fatal errors come back as `Err`.
    pub async fn execute(&self, ctx: &RequestCtx, cmd: Command) -> Result<CommandResult, EngineError> {
        let operation = cmd.name();
        let is_admission = matches!(cmd, Command::CreateReservation { .. });

        match self.execute_command(ctx, cmd).await {
            Ok((message, outcome)) => {
                metrics::counter!(observability::REQUESTS_TOTAL, "operation" => operation, "status" => "ok")
                    .increment(1);
                Ok(CommandResult::ok(message, outcome))
            }
            Err(e) if e.is_fatal() => {
                error!("{operation} failed: {e}");
                metrics::counter!(observability::REQUESTS_TOTAL, "operation" => operation, "status" => "error")
                    .increment(1);
                Err(e)
            }
            Err(e) => {
                if is_admission {
                    warn!("admission rejected: {e}");
                    metrics::counter!(observability::ADMISSIONS_REJECTED_TOTAL, "reason" => e.reason())
                        .increment(1);
                }
                metrics::counter!(observability::REQUESTS_TOTAL, "operation" => operation, "status" => "rejected")
                    .increment(1);
                Ok(CommandResult::failed(&e))
            }
        }
    }

    async fn execute_command(
        &self,
        ctx: &RequestCtx,
        cmd: Command,
    ) -> Result<(&'static str, Outcome), EngineError> {
        let caller = ctx.authorize(cmd.policy())?;
        let deadline = ctx.deadline;

        match cmd {
            Command::CreateReservation {
                user_id,
                start,
                end,
                game_system_id,
                game_id,
            } => {
                let span = checked_span(start, end)?;
                let owner = match user_id {
                    Some(target) if target != caller.user_id => {
                        if !caller.role.can(Capability::ReserveForOthers) {
                            return Err(EngineError::Forbidden {
                                role: caller.role,
                                action: "create a reservation for this user",
                            });
                        }
                        target
                    }
                    _ => caller.user_id.clone(),
                };
                let reservation = self
                    .engine
                    .create_reservation(
                        NewReservation {
                            user_id: owner,
                            span,
                            game_system_id,
                            game_id,
                        },
                        deadline,
                    )
                    .await?;
                metrics::counter!(observability::RESERVATIONS_CREATED_TOTAL).increment(1);
                self.spawn_notification(&reservation);
                Ok(("Reservation created!", Outcome::Reservation(reservation)))
            }
            Command::CancelReservation { id } => {
                let removed = self.engine.cancel_reservation(id, deadline).await?;
                metrics::counter!(observability::RESERVATIONS_CANCELLED_TOTAL).increment(1);
                info!("{} cancelled reservation {id}", caller.user_id);
                Ok(("Reservation cancelled", Outcome::Reservation(removed)))
            }
            Command::CreateSystemType { name } => {
                let t = self.engine.create_system_type(name, deadline).await?;
                Ok(("System type created", Outcome::SystemType(t)))
            }
            Command::RenameSystemType { id, name } => {
                let t = self.engine.rename_system_type(id, name, deadline).await?;
                Ok(("System type renamed", Outcome::SystemType(t)))
            }
            Command::CreateGameSystem {
                name,
                system_type_id,
            } => {
                let s = self
                    .engine
                    .create_game_system(name, system_type_id, deadline)
                    .await?;
                Ok(("Game system created", Outcome::GameSystem(s)))
            }
            Command::UpdateGameSystem { id, patch } => {
                let s = self.engine.update_game_system(id, patch, deadline).await?;
                Ok(("Game system updated", Outcome::GameSystem(s)))
            }
            Command::DeleteGameSystem { id } => {
                self.engine.delete_game_system(id, deadline).await?;
                Ok(("Game system deleted", Outcome::Removed(id)))
            }
            Command::CreateGame {
                name,
                system_type_id,
                quantity,
            } => {
                let g = self
                    .engine
                    .create_game(name, system_type_id, quantity, deadline)
                    .await?;
                Ok(("Game created", Outcome::Game(g)))
            }
            Command::UpdateGame { id, patch } => {
                let g = self.engine.update_game(id, patch, deadline).await?;
                Ok(("Game updated", Outcome::Game(g)))
            }
            Command::DeleteGame { id } => {
                self.engine.delete_game(id, deadline).await?;
                Ok(("Game deleted", Outcome::Removed(id)))
            }
            Command::UpdateWeeklyNotice { content } => {
                let notice = self
                    .engine
                    .update_weekly_notice(content, caller.user_id.clone(), deadline)
                    .await?;
                Ok(("Weekly notice updated!", Outcome::WeeklyNotice(notice)))
            }
        }
    }

    /// Tell the reservation's owner, off the request path. Failures are
    /// logged and counted only.
    fn spawn_notification(&self, reservation: &Reservation) {
        let gate = self.gate.clone();
        let dispatcher = self.dispatcher.clone();
        let id = reservation.id;
        let user_id = reservation.user_id.clone();
        tokio::spawn(async move {
            let Some(profile) = gate.user(&user_id).await else {
                warn!("no directory entry for {user_id}, reservation {id} not notified");
                metrics::counter!(observability::NOTIFY_FAILURES_TOTAL).increment(1);
                return;
            };
            if let Err(e) = dispatcher.reservation_created(id, &profile.email).await {
                warn!("reservation {id}: {e}");
                metrics::counter!(observability::NOTIFY_FAILURES_TOTAL).increment(1);
            }
        });
    }

    pub fn weekly_notice(&self) -> Option<WeeklyNotice> {
        self.engine.weekly_notice()
    }

    pub async fn availability(&self, ctx: &RequestCtx, start: Ms, end: Ms) -> Result<AvailabilityView, EngineError> {
        let span = checked_span(start, end)?;
        self.engine.compute_availability(span, ctx.deadline).await
    }

    /// Reservations starting in `[start, end]`, defaulting to the whole calendar.
    pub async fn reservations(
        &self,
        ctx: &RequestCtx,
        start: Option<Ms>,
        end: Option<Ms>,
    ) -> Result<Vec<ReservationListing>, EngineError> {
        let rows = self
            .engine
            .list_reservations(
                start.unwrap_or(LIST_DEFAULT_START_MS),
                end.unwrap_or(LIST_DEFAULT_END_MS),
                ctx.deadline,
            )
            .await?;
        let mut listings = Vec::with_capacity(rows.len());
        for row in rows {
            let user = self.gate.user(&row.reservation.user_id).await;
            listings.push(ReservationListing { row, user });
        }
        Ok(listings)
    }
}
