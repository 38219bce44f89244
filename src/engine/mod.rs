mod availability;
mod catalog;
mod conflict;
mod error;
mod ledger;
mod notice;
mod queries;

pub use availability::{
    Occupancy, compute_saturated_spans, game_is_listed, group_available, merge_overlapping,
    system_is_free, tally_occupancy,
};
pub use catalog::{GamePatch, SystemPatch};
pub use conflict::{checked_span, conflicts, overlaps, overlaps_adjusted};
pub use error::{EngineError, ErrorClass};
pub use ledger::NewReservation;

use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex};
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tokio::time::{Instant, timeout_at};
use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;
type ResourceGuard = OwnedRwLockWriteGuard<ResourceState>;

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            WalCommand::AppendsSinceCompact { response } => {
                let _ = response.send(wal.appends_since_compact());
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;

        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = std::time::Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        for (_, tx) in batch {
            let r = match &result {
                Ok(()) => Ok(()),
                Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
            };
            let _ = tx.send(r);
        }

        if let Some(WalCommand::AppendsSinceCompact { response }) = deferred {
            let _ = response.send(wal.appends_since_compact());
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Always flush, even on append error, so partially buffered bytes
    // don't leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

struct TypeEntry {
    seq: u64,
    name: String,
}

/// Catalog, ledger and per-resource locks. All mutations go WAL-first.
pub struct Engine {
    system_types: DashMap<Ulid, TypeEntry>,
    resources: DashMap<Ulid, SharedResourceState>,
    /// Reservation id → record; the source of truth for occupancy queries.
    reservations: DashMap<Ulid, Reservation>,
    next_seq: AtomicU64,
    weekly_notice: StdMutex<Option<WeeklyNotice>>,
    /// Serialises catalog mutations (name uniqueness, deletes).
    catalog_lock: Mutex<()>,
    wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
}

/// Apply an event to one resource. The caller holds its lock.
fn apply_to_resource(rs: &mut ResourceState, event: &Event) {
    match event {
        Event::ResourceUpdated {
            id,
            kind,
            name,
            active,
        } if *id == rs.id => {
            rs.kind = *kind;
            rs.name = name.clone();
            rs.active = *active;
        }
        Event::ResourceDeleted { id } if *id == rs.id => rs.deleted = true,
        Event::ReservationCreated {
            id,
            span,
            game_system_id,
            game_id,
            ..
        } if *game_system_id == rs.id || *game_id == rs.id => {
            rs.insert_interval(Interval { id: *id, span: *span });
        }
        Event::ReservationCancelled {
            id,
            game_system_id,
            game_id,
        } if *game_system_id == rs.id || *game_id == rs.id => {
            rs.remove_interval(*id);
        }
        _ => {}
    }
}

impl Engine {
    /// Replay the log at `wal_path`, compact it when it holds at least
    /// `compact_threshold` events (0 disables), and start the WAL writer.
    pub fn new(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        compact_threshold: u64,
    ) -> io::Result<Self> {
        let events = Wal::recover(&wal_path)?;
        let mut wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);

        let engine = Self {
            system_types: DashMap::new(),
            resources: DashMap::new(),
            reservations: DashMap::new(),
            next_seq: AtomicU64::new(0),
            weekly_notice: StdMutex::new(None),
            catalog_lock: Mutex::new(()),
            wal_tx,
            notify,
        };

        // We're the sole owner of every Arc here, so try_write always succeeds.
        for event in &events {
            engine.apply_to_index(event);
            for resource_id in event_resource_ids(event) {
                if let Some(rs) = engine.get_resource(&resource_id) {
                    if let Ok(mut guard) = rs.try_write() {
                        apply_to_resource(&mut guard, event);
                    }
                }
            }
            if let Event::ResourceDeleted { id } = event {
                engine.resources.remove(id);
            }
        }

        if compact_threshold > 0 && events.len() as u64 >= compact_threshold {
            let snapshot = engine.snapshot_events();
            wal.compact(&snapshot)?;
            info!(
                "compacted WAL {}: {} events -> {}",
                wal_path.display(),
                events.len(),
                snapshot.len()
            );
        }

        tokio::spawn(wal_writer_loop(wal, wal_rx));
        Ok(engine)
    }

    fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Apply the catalog/ledger-index part of an event (type table,
    /// resource map, reservation map). Resource interiors are handled by
    /// `apply_to_resource` under the resource's lock.
    fn apply_to_index(&self, event: &Event) {
        match event {
            Event::SystemTypeCreated { id, name } => {
                let seq = self.next_seq();
                self.system_types.insert(
                    *id,
                    TypeEntry {
                        seq,
                        name: name.clone(),
                    },
                );
            }
            Event::SystemTypeRenamed { id, name } => {
                if let Some(mut entry) = self.system_types.get_mut(id) {
                    entry.name = name.clone();
                }
            }
            Event::ResourceCreated {
                id,
                kind,
                name,
                system_type_id,
            } => {
                let rs = ResourceState::new(*id, self.next_seq(), *kind, name.clone(), *system_type_id);
                self.resources.insert(*id, Arc::new(RwLock::new(rs)));
            }
            Event::ReservationCreated {
                id,
                user_id,
                span,
                game_system_id,
                game_id,
                created_at,
            } => {
                self.reservations.insert(
                    *id,
                    Reservation {
                        id: *id,
                        user_id: user_id.clone(),
                        span: *span,
                        game_system_id: *game_system_id,
                        game_id: *game_id,
                        created_at: *created_at,
                    },
                );
            }
            Event::ReservationCancelled { id, .. } => {
                self.reservations.remove(id);
            }
            Event::WeeklyNoticeUpdated {
                content,
                updated_by,
                updated_at,
            } => {
                *self.notice_slot() = Some(WeeklyNotice {
                    content: content.clone(),
                    updated_by: updated_by.clone(),
                    updated_at: *updated_at,
                });
            }
            // Removal from the resource map happens after the resource is marked deleted.
            Event::ResourceUpdated { .. } | Event::ResourceDeleted { .. } => {}
        }
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, then apply to the locked resources and the index, then notify.
    async fn persist_and_apply(
        &self,
        locked: &mut [&mut ResourceState],
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        for rs in locked.iter_mut() {
            apply_to_resource(rs, event);
        }
        self.apply_to_index(event);
        if let Event::ResourceDeleted { id } = event {
            self.resources.remove(id);
        }
        self.notify.send(event);
        Ok(())
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    fn resource_handles(&self) -> Vec<SharedResourceState> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    /// Write-lock one resource, bounded by the request deadline.
    async fn lock_resource(&self, id: &Ulid, deadline: Instant) -> Result<ResourceGuard, EngineError> {
        let rs = self.get_resource(id).ok_or(EngineError::NotFound(*id))?;
        let guard = timeout_at(deadline, rs.write_owned())
            .await
            .map_err(|_| EngineError::Timeout)?;
        if guard.deleted {
            return Err(EngineError::NotFound(*id));
        }
        Ok(guard)
    }

    /// Write-lock a system and a game in ascending id order so concurrent
    /// admissions on overlapping pairs cannot deadlock.
    async fn lock_pair(
        &self,
        game_system_id: Ulid,
        game_id: Ulid,
        deadline: Instant,
    ) -> Result<(ResourceGuard, ResourceGuard), EngineError> {
        if game_system_id == game_id {
            return Err(EngineError::TypeMismatch {
                game_id,
                game_system_id,
            });
        }
        if game_system_id < game_id {
            let system = self.lock_resource(&game_system_id, deadline).await?;
            let game = self.lock_resource(&game_id, deadline).await?;
            Ok((system, game))
        } else {
            let game = self.lock_resource(&game_id, deadline).await?;
            let system = self.lock_resource(&game_system_id, deadline).await?;
            Ok((system, game))
        }
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }

    /// Minimal event list that recreates the current state, in creation order.
    /// Only called while nothing else holds the resources.
    fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();

        let mut types: Vec<(u64, Event)> = self
            .system_types
            .iter()
            .map(|e| {
                (
                    e.value().seq,
                    Event::SystemTypeCreated {
                        id: *e.key(),
                        name: e.value().name.clone(),
                    },
                )
            })
            .collect();
        types.sort_by_key(|(seq, _)| *seq);
        events.extend(types.into_iter().map(|(_, e)| e));

        if let Some(notice) = self.weekly_notice() {
            events.push(Event::WeeklyNoticeUpdated {
                content: notice.content,
                updated_by: notice.updated_by,
                updated_at: notice.updated_at,
            });
        }

        let mut resources: Vec<(u64, Vec<Event>)> = Vec::new();
        for rs in self.resource_handles() {
            let Ok(guard) = rs.try_read() else { continue };
            let mut batch = vec![Event::ResourceCreated {
                id: guard.id,
                kind: guard.kind,
                name: guard.name.clone(),
                system_type_id: guard.system_type_id,
            }];
            if !guard.active {
                batch.push(Event::ResourceUpdated {
                    id: guard.id,
                    kind: guard.kind,
                    name: guard.name.clone(),
                    active: false,
                });
            }
            resources.push((guard.seq, batch));
        }
        resources.sort_by_key(|(seq, _)| *seq);
        events.extend(resources.into_iter().flat_map(|(_, batch)| batch));

        let mut ledger: Vec<Reservation> = self.reservations.iter().map(|e| e.value().clone()).collect();
        ledger.sort_by_key(|r| r.id);
        events.extend(ledger.iter().map(Event::reservation_created));

        events
    }
}

/// Resources whose interior an event touches.
fn event_resource_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::ResourceUpdated { id, .. } | Event::ResourceDeleted { id } => vec![*id],
        Event::ReservationCreated {
            game_system_id,
            game_id,
            ..
        }
        | Event::ReservationCancelled {
            game_system_id,
            game_id,
            ..
        } => vec![*game_system_id, *game_id],
        Event::SystemTypeCreated { .. }
        | Event::SystemTypeRenamed { .. }
        | Event::ResourceCreated { .. }
        | Event::WeeklyNoticeUpdated { .. } => Vec::new(),
    }
}
