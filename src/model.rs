use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// User ids are owned by the external auth service and treated as opaque strings.
pub type UserId = String;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The occupancy window: the span extended by `buffer` past its nominal end.
    pub fn effective(&self, buffer: Ms) -> Span {
        Span::new(self.start, self.end + buffer)
    }
}

// ── Roles ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Staff,
    Admin,
}

/// Something a command needs the caller to be allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Reserve,
    ReserveForOthers,
    CancelReservation,
    ManageCatalog,
}

impl Role {
    fn capabilities(self) -> &'static [Capability] {
        match self {
            Role::User => &[Capability::Reserve],
            Role::Staff => &[Capability::Reserve, Capability::CancelReservation],
            Role::Admin => &[
                Capability::Reserve,
                Capability::ReserveForOthers,
                Capability::CancelReservation,
                Capability::ManageCatalog,
            ],
        }
    }

    pub fn can(self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::User => "user",
            Role::Staff => "staff",
            Role::Admin => "admin",
        };
        f.write_str(s)
    }
}

/// The `(userId, role)` pair a session resolves to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Caller {
    pub user_id: UserId,
    pub role: Role,
}

/// Display data for a user, read from the auth service's directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub name: String,
    pub email: String,
    pub role: Role,
}

// ── Catalog ──────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemType {
    pub id: Ulid,
    pub name: String,
}

/// What a bookable resource represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceKind {
    /// One physical console; always single capacity.
    System,
    /// A pool of `quantity` interchangeable copies of a title.
    Game { quantity: u32 },
}

/// A reservation's footprint on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interval {
    /// The reservation id.
    pub id: Ulid,
    pub span: Span,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    /// Creation order; catalog listings are sorted by it.
    pub seq: u64,
    pub kind: ResourceKind,
    pub name: String,
    pub system_type_id: Ulid,
    pub active: bool,
    /// Set under the write lock when the resource is removed, so a waiter
    /// holding a stale handle sees the removal.
    pub deleted: bool,
    /// Reservations on this resource, sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl ResourceState {
    pub fn new(id: Ulid, seq: u64, kind: ResourceKind, name: String, system_type_id: Ulid) -> Self {
        Self {
            id,
            seq,
            kind,
            name,
            system_type_id,
            active: true,
            deleted: false,
            intervals: Vec::new(),
        }
    }

    /// Max concurrent reservations.
    pub fn capacity(&self) -> u32 {
        match self.kind {
            ResourceKind::System => 1,
            ResourceKind::Game { quantity } => quantity,
        }
    }

    pub fn is_game(&self) -> bool {
        matches!(self.kind, ResourceKind::Game { .. })
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by reservation id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    /// Return only intervals whose nominal span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn is_referenced(&self) -> bool {
        !self.intervals.is_empty()
    }

    pub fn game_info(&self) -> GameInfo {
        let quantity = match self.kind {
            ResourceKind::Game { quantity } => quantity,
            ResourceKind::System => 1,
        };
        GameInfo {
            id: self.id,
            name: self.name.clone(),
            system_type_id: self.system_type_id,
            active: self.active,
            quantity,
        }
    }

    pub fn system_info(&self) -> GameSystemInfo {
        GameSystemInfo {
            id: self.id,
            name: self.name.clone(),
            system_type_id: self.system_type_id,
            active: self.active,
        }
    }
}

// ── Ledger ───────────────────────────────────────────────────────

/// A committed reservation. `span.end` is the nominal end; the cleanup
/// buffer is added at comparison time, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: UserId,
    pub span: Span,
    pub game_system_id: Ulid,
    pub game_id: Ulid,
    pub created_at: Ms,
}

/// WAL record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    SystemTypeCreated {
        id: Ulid,
        name: String,
    },
    SystemTypeRenamed {
        id: Ulid,
        name: String,
    },
    ResourceCreated {
        id: Ulid,
        kind: ResourceKind,
        name: String,
        system_type_id: Ulid,
    },
    ResourceUpdated {
        id: Ulid,
        kind: ResourceKind,
        name: String,
        active: bool,
    },
    ResourceDeleted {
        id: Ulid,
    },
    ReservationCreated {
        id: Ulid,
        user_id: UserId,
        span: Span,
        game_system_id: Ulid,
        game_id: Ulid,
        created_at: Ms,
    },
    ReservationCancelled {
        id: Ulid,
        game_system_id: Ulid,
        game_id: Ulid,
    },
    /// Replaces the single weekly notice.
    WeeklyNoticeUpdated {
        content: String,
        updated_by: UserId,
        updated_at: Ms,
    },
}

impl Event {
    pub fn reservation_created(r: &Reservation) -> Self {
        Event::ReservationCreated {
            id: r.id,
            user_id: r.user_id.clone(),
            span: r.span,
            game_system_id: r.game_system_id,
            game_id: r.game_id,
            created_at: r.created_at,
        }
    }

    /// Short name used for the change feed.
    pub fn label(&self) -> &'static str {
        match self {
            Event::SystemTypeCreated { .. } => "system_type_created",
            Event::SystemTypeRenamed { .. } => "system_type_renamed",
            Event::ResourceCreated { .. } => "resource_created",
            Event::ResourceUpdated { .. } => "resource_updated",
            Event::ResourceDeleted { .. } => "resource_deleted",
            Event::ReservationCreated { .. } => "reservation_created",
            Event::ReservationCancelled { .. } => "reservation_cancelled",
            Event::WeeklyNoticeUpdated { .. } => "weekly_notice_updated",
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameInfo {
    pub id: Ulid,
    pub name: String,
    pub system_type_id: Ulid,
    pub active: bool,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSystemInfo {
    pub id: Ulid,
    pub name: String,
    pub system_type_id: Ulid,
    pub active: bool,
}

/// System-type name → games bookable on a free system of that type.
pub type AvailabilityView = BTreeMap<String, Vec<GameInfo>>;

/// The admin-authored notice shown alongside the calendar. There is at most one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyNotice {
    pub content: String,
    pub updated_by: UserId,
    pub updated_at: Ms,
}

/// A reservation joined with the catalog entries it references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRow {
    pub reservation: Reservation,
    pub game: GameInfo,
    pub game_system: GameSystemInfo,
    pub system_type: SystemType,
}
