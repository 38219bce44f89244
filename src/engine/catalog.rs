use serde::Deserialize;
use tokio::sync::MutexGuard;
use tokio::time::{Instant, timeout_at};
use tracing::info;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::{Engine, EngineError, ResourceGuard, SharedResourceState};

/// Partial update for a game system. Absent fields keep their value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemPatch {
    pub name: Option<String>,
    pub active: Option<bool>,
}

/// Partial update for a game title.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePatch {
    pub name: Option<String>,
    pub quantity: Option<u32>,
    pub active: Option<bool>,
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::LimitExceeded("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

impl Engine {
    pub(super) async fn lock_catalog(&self, deadline: Instant) -> Result<MutexGuard<'_, ()>, EngineError> {
        timeout_at(deadline, self.catalog_lock.lock())
            .await
            .map_err(|_| EngineError::Timeout)
    }

    fn type_name_in_use(&self, name: &str, except: Option<Ulid>) -> bool {
        self.system_types
            .iter()
            .any(|e| Some(*e.key()) != except && e.value().name == name)
    }

    /// Is `name` taken by another game (`games`) or another system?
    /// Skips `except` without locking it, so the caller may hold its write lock.
    async fn resource_name_in_use(
        &self,
        name: &str,
        games: bool,
        except: Option<Ulid>,
        deadline: Instant,
    ) -> Result<bool, EngineError> {
        let handles: Vec<(Ulid, SharedResourceState)> = self
            .resources
            .iter()
            .filter(|e| Some(*e.key()) != except)
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        for (_, rs) in handles {
            let guard = timeout_at(deadline, rs.read())
                .await
                .map_err(|_| EngineError::Timeout)?;
            if !guard.deleted && guard.is_game() == games && guard.name == name {
                return Ok(true);
            }
        }
        Ok(false)
    }

    // ── System types ──────────────────────────────────────

    pub async fn create_system_type(
        &self,
        name: String,
        deadline: Instant,
    ) -> Result<SystemType, EngineError> {
        validate_name(&name)?;
        let _catalog = self.lock_catalog(deadline).await?;
        if self.type_name_in_use(&name, None) {
            return Err(EngineError::NameTaken(name));
        }

        let id = Ulid::new();
        let event = Event::SystemTypeCreated {
            id,
            name: name.clone(),
        };
        self.persist_and_apply(&mut [], &event).await?;
        info!("system type {id} created: {name}");
        Ok(SystemType { id, name })
    }

    pub async fn rename_system_type(
        &self,
        id: Ulid,
        name: String,
        deadline: Instant,
    ) -> Result<SystemType, EngineError> {
        validate_name(&name)?;
        let _catalog = self.lock_catalog(deadline).await?;
        if !self.system_types.contains_key(&id) {
            return Err(EngineError::NotFound(id));
        }
        if self.type_name_in_use(&name, Some(id)) {
            return Err(EngineError::NameTaken(name));
        }

        let event = Event::SystemTypeRenamed {
            id,
            name: name.clone(),
        };
        self.persist_and_apply(&mut [], &event).await?;
        Ok(SystemType { id, name })
    }

    // ── Game systems and games ────────────────────────────

    async fn create_resource(
        &self,
        kind: ResourceKind,
        name: String,
        system_type_id: Ulid,
        deadline: Instant,
    ) -> Result<Ulid, EngineError> {
        validate_name(&name)?;
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        let _catalog = self.lock_catalog(deadline).await?;
        if !self.system_types.contains_key(&system_type_id) {
            return Err(EngineError::UnknownSystemType(system_type_id));
        }
        let games = matches!(kind, ResourceKind::Game { .. });
        if self.resource_name_in_use(&name, games, None, deadline).await? {
            return Err(EngineError::NameTaken(name));
        }

        let id = Ulid::new();
        let event = Event::ResourceCreated {
            id,
            kind,
            name,
            system_type_id,
        };
        self.persist_and_apply(&mut [], &event).await?;
        info!("{} {id} created", if games { "game" } else { "game system" });
        Ok(id)
    }

    pub async fn create_game_system(
        &self,
        name: String,
        system_type_id: Ulid,
        deadline: Instant,
    ) -> Result<GameSystemInfo, EngineError> {
        let id = self
            .create_resource(ResourceKind::System, name.clone(), system_type_id, deadline)
            .await?;
        Ok(GameSystemInfo {
            id,
            name,
            system_type_id,
            active: true,
        })
    }

    pub async fn create_game(
        &self,
        name: String,
        system_type_id: Ulid,
        quantity: u32,
        deadline: Instant,
    ) -> Result<GameInfo, EngineError> {
        let id = self
            .create_resource(ResourceKind::Game { quantity }, name.clone(), system_type_id, deadline)
            .await?;
        Ok(GameInfo {
            id,
            name,
            system_type_id,
            active: true,
            quantity,
        })
    }

    /// Rename, re-stock or (de)activate one resource. Existing reservations
    /// are left alone even when a lower quantity no longer covers them.
    async fn update_resource(
        &self,
        id: Ulid,
        games: bool,
        name: Option<String>,
        quantity: Option<u32>,
        active: Option<bool>,
        deadline: Instant,
    ) -> Result<ResourceGuard, EngineError> {
        if let Some(ref n) = name {
            validate_name(n)?;
        }
        let _catalog = self.lock_catalog(deadline).await?;
        // Names only change under the catalog lock. Scan them before taking
        // the target's write lock, never while holding it.
        if let Some(ref n) = name {
            if self.resource_name_in_use(n, games, Some(id), deadline).await? {
                return Err(EngineError::NameTaken(n.clone()));
            }
        }
        let mut guard = self.lock_resource(&id, deadline).await?;
        if guard.is_game() != games {
            return Err(EngineError::NotFound(id));
        }

        let kind = match guard.kind {
            ResourceKind::Game { quantity: current } => ResourceKind::Game {
                quantity: quantity.unwrap_or(current),
            },
            ResourceKind::System => ResourceKind::System,
        };
        let event = Event::ResourceUpdated {
            id,
            kind,
            name: name.unwrap_or_else(|| guard.name.clone()),
            active: active.unwrap_or(guard.active),
        };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        Ok(guard)
    }

    pub async fn update_game_system(
        &self,
        id: Ulid,
        patch: SystemPatch,
        deadline: Instant,
    ) -> Result<GameSystemInfo, EngineError> {
        let guard = self
            .update_resource(id, false, patch.name, None, patch.active, deadline)
            .await?;
        Ok(guard.system_info())
    }

    pub async fn update_game(
        &self,
        id: Ulid,
        patch: GamePatch,
        deadline: Instant,
    ) -> Result<GameInfo, EngineError> {
        let guard = self
            .update_resource(id, true, patch.name, patch.quantity, patch.active, deadline)
            .await?;
        Ok(guard.game_info())
    }

    /// Remove a resource nobody has booked. Reservations are never cascaded.
    async fn delete_resource(&self, id: Ulid, games: bool, deadline: Instant) -> Result<(), EngineError> {
        let _catalog = self.lock_catalog(deadline).await?;
        let mut guard = self.lock_resource(&id, deadline).await?;
        if guard.is_game() != games {
            return Err(EngineError::NotFound(id));
        }
        if guard.is_referenced() {
            return Err(EngineError::Referenced {
                id,
                reservations: guard.intervals.len(),
            });
        }

        let event = Event::ResourceDeleted { id };
        self.persist_and_apply(&mut [&mut *guard], &event).await?;
        info!("{} {id} deleted", if games { "game" } else { "game system" });
        Ok(())
    }

    pub async fn delete_game_system(&self, id: Ulid, deadline: Instant) -> Result<(), EngineError> {
        self.delete_resource(id, false, deadline).await
    }

    pub async fn delete_game(&self, id: Ulid, deadline: Instant) -> Result<(), EngineError> {
        self.delete_resource(id, true, deadline).await
    }
}
