use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::calendar::CalendarDay;

/// Opaque user identifier supplied by the identity collaborator.
/// The core never validates existence, it only compares for equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A bookable room. The id is assigned on create and immutable; name and
/// capacity are mutable through the registry. Capacity 0 means locked —
/// no new bookings, existing ones are cleared on reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
    pub capacity: u32,
}

/// Per-room booking state: day → ordered bookers (insertion order is the
/// booking order, which decides who survives a capacity shrink).
///
/// Invariants, maintained by every mutation:
/// - no day maps to an empty vec (pruned immediately)
/// - a user appears at most once per day
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBook {
    pub days: BTreeMap<CalendarDay, Vec<UserId>>,
}

impl RoomBook {
    pub fn users(&self, day: &CalendarDay) -> &[UserId] {
        self.days.get(day).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Append `user` to `day`. Returns false (no mutation) on duplicate.
    /// Capacity is the caller's concern — the book only guards uniqueness.
    pub fn add(&mut self, day: CalendarDay, user: UserId) -> bool {
        let seq = self.days.entry(day).or_default();
        if seq.contains(&user) {
            return false;
        }
        seq.push(user);
        true
    }

    /// Remove `user` from `day`, pruning the day when it empties.
    /// Returns false if there was nothing to remove.
    pub fn remove(&mut self, day: &CalendarDay, user: &UserId) -> bool {
        let Some(seq) = self.days.get_mut(day) else {
            return false;
        };
        let Some(pos) = seq.iter().position(|u| u == user) else {
            return false;
        };
        seq.remove(pos);
        if seq.is_empty() {
            self.days.remove(day);
        }
        true
    }

    /// Re-enforce a capacity across every day: clear everything on 0,
    /// otherwise truncate from the end so the earliest bookers keep their
    /// slot. Returns true if anything changed.
    pub fn reconcile(&mut self, capacity: u32) -> bool {
        if capacity == 0 {
            let had_any = !self.days.is_empty();
            self.days.clear();
            return had_any;
        }
        let cap = capacity as usize;
        let mut changed = false;
        self.days.retain(|_, seq| {
            if seq.len() > cap {
                seq.truncate(cap);
                changed = true;
            }
            !seq.is_empty()
        });
        changed
    }

    pub fn is_empty(&self) -> bool {
        self.days.is_empty()
    }
}

/// The event types — flat, no nesting. This is the WAL record format.
///
/// Reconciliation sweeps are logged as a single record each
/// (`BookingsReconciled` / `BookingsPurged`); replay re-runs the sweep, so
/// one append covers the whole mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    RoomUpdated {
        id: Ulid,
        name: String,
        capacity: u32,
    },
    RoomDeleted {
        id: Ulid,
    },
    BookingAdded {
        room_id: Ulid,
        day: CalendarDay,
        user: UserId,
    },
    BookingCancelled {
        room_id: Ulid,
        day: CalendarDay,
        user: UserId,
    },
    /// Capacity re-enforcement sweep over every day of a room's book.
    BookingsReconciled {
        room_id: Ulid,
        capacity: u32,
    },
    /// Removal of a deleted room's entire book.
    BookingsPurged {
        room_id: Ulid,
    },
}
