use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock, mpsc};
use ulid::Ulid;

use crate::calendar::CalendarDay;
use crate::limits::MAX_USER_ID_LEN;
use crate::model::{Event, Room, RoomBook, UserId};
use crate::notify::NotifyHub;

use super::{EngineError, WalCommand, append_event};

pub type SharedRoomBook = Arc<RwLock<RoomBook>>;

/// The booking ledger: per-room books behind per-room write locks.
///
/// Every mutation of a room's book runs under that room's write lock, so the
/// read-check-write capacity test in `book` is atomic with respect to all
/// other writers on the same room — two concurrent bookers can never both
/// observe a free slot and overshoot. Operations on different rooms proceed
/// concurrently.
///
/// The ledger never validates room existence; capacity comes from the Room
/// snapshot the caller resolved from the registry.
pub struct BookingLedger {
    books: DashMap<Ulid, SharedRoomBook>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
}

impl BookingLedger {
    pub(super) fn new(wal_tx: mpsc::Sender<WalCommand>, notify: Arc<NotifyHub>) -> Self {
        Self {
            books: DashMap::new(),
            wal_tx,
            notify,
        }
    }

    fn get_book(&self, room_id: &Ulid) -> Option<SharedRoomBook> {
        self.books.get(room_id).map(|e| e.value().clone())
    }

    /// Get-or-create the room's book and take its write lock, re-checking
    /// after acquisition that a concurrent purge has not detached the shard —
    /// otherwise a booking could land in an orphan book and resurface on
    /// replay.
    async fn lock_book(&self, room_id: Ulid) -> OwnedRwLockWriteGuard<RoomBook> {
        loop {
            let book = self.books.entry(room_id).or_default().clone();
            let guard = book.clone().write_owned().await;
            let still_mapped = self
                .books
                .get(&room_id)
                .is_some_and(|e| Arc::ptr_eq(e.value(), &book));
            if still_mapped {
                return guard;
            }
        }
    }

    /// The users booked into (room, day), in booking order. Never fails.
    pub async fn booked_users(&self, room_id: Ulid, day: CalendarDay) -> Vec<UserId> {
        match self.get_book(&room_id) {
            Some(book) => book.read().await.users(&day).to_vec(),
            None => Vec::new(),
        }
    }

    /// All non-empty days of a room's book, in day order.
    pub async fn days(&self, room_id: Ulid) -> Vec<(CalendarDay, Vec<UserId>)> {
        match self.get_book(&room_id) {
            Some(book) => {
                let guard = book.read().await;
                guard
                    .days
                    .iter()
                    .map(|(day, users)| (*day, users.clone()))
                    .collect()
            }
            None => Vec::new(),
        }
    }

    /// True iff any day holds a booking for this room. Callers use this to
    /// warn before deleting a room with live bookings.
    pub async fn has_any_booking(&self, room_id: Ulid) -> bool {
        match self.get_book(&room_id) {
            Some(book) => !book.read().await.is_empty(),
            None => false,
        }
    }

    /// Pruning probe: does a (room, day) entry exist at all? An emptied entry
    /// must be gone, not merely empty.
    pub async fn has_entry(&self, room_id: Ulid, day: CalendarDay) -> bool {
        match self.get_book(&room_id) {
            Some(book) => book.read().await.days.contains_key(&day),
            None => false,
        }
    }

    /// Try to book `user` into (room, day).
    ///
    /// Returns Ok(false) without mutating on: locked room (capacity 0), room
    /// full at call time, or the user already holding a slot that day. These
    /// are expected business outcomes, not errors — the caller decides how to
    /// present them. Capacity is read from the passed-in snapshot, so callers
    /// must resolve a fresh Room from the registry.
    pub async fn book(
        &self,
        room: &Room,
        day: CalendarDay,
        user: &UserId,
    ) -> Result<bool, EngineError> {
        if user.as_str().is_empty() {
            return Err(EngineError::InvalidArgument("empty user id".into()));
        }
        if user.as_str().len() > MAX_USER_ID_LEN {
            return Err(EngineError::LimitExceeded("user id too long"));
        }
        if room.capacity == 0 {
            return Ok(false); // locked
        }

        let mut guard = self.lock_book(room.id).await;
        let seq = guard.users(&day);
        if seq.len() >= room.capacity as usize {
            return Ok(false); // full
        }
        if seq.contains(user) {
            return Ok(false); // duplicate attempt — report, don't error
        }

        let event = Event::BookingAdded {
            room_id: room.id,
            day,
            user: user.clone(),
        };
        // WAL first: a failed append leaves the book untouched.
        append_event(&self.wal_tx, &event).await?;
        guard.add(day, user.clone());
        self.notify.send(room.id, &event);
        Ok(true)
    }

    /// Cancel `user`'s booking for (room, day). Idempotent: returns Ok(false)
    /// when there was nothing to cancel. Prunes the day entry when it empties.
    pub async fn cancel(
        &self,
        room_id: Ulid,
        day: CalendarDay,
        user: &UserId,
    ) -> Result<bool, EngineError> {
        let Some(book) = self.get_book(&room_id) else {
            return Ok(false);
        };
        let mut guard = book.clone().write_owned().await;
        if !guard.users(&day).contains(user) {
            return Ok(false);
        }

        let event = Event::BookingCancelled {
            room_id,
            day,
            user: user.clone(),
        };
        append_event(&self.wal_tx, &event).await?;
        guard.remove(&day, user);
        let emptied = guard.is_empty();
        drop(guard);
        if emptied {
            // Only drop the shard if it is still ours and still empty.
            self.books.remove_if(&room_id, |_, b| {
                Arc::ptr_eq(b, &book) && b.try_read().map(|g| g.is_empty()).unwrap_or(false)
            });
        }
        self.notify.send(room_id, &event);
        Ok(true)
    }

    /// Room-deletion hook: drop every day's entry for this room. One WAL
    /// record covers the whole sweep.
    pub async fn on_room_deleted(&self, room_id: Ulid) -> Result<(), EngineError> {
        let Some(book) = self.get_book(&room_id) else {
            return Ok(());
        };
        let guard = book.write().await;
        if guard.is_empty() {
            drop(guard);
            self.books.remove(&room_id);
            return Ok(());
        }

        let event = Event::BookingsPurged { room_id };
        append_event(&self.wal_tx, &event).await?;
        drop(guard);
        self.books.remove(&room_id);
        self.notify.send(room_id, &event);
        Ok(())
    }

    /// Capacity-change hook: clear the book on capacity 0, otherwise truncate
    /// oversubscribed days from the end so the earliest bookers keep their
    /// slot. One WAL record covers the whole sweep; nothing is written when
    /// no day needed adjusting.
    pub async fn on_room_capacity_changed(&self, room: &Room) -> Result<(), EngineError> {
        let Some(book) = self.get_book(&room.id) else {
            return Ok(());
        };
        let mut guard = book.clone().write_owned().await;

        let needs_sweep = if room.capacity == 0 {
            !guard.is_empty()
        } else {
            let cap = room.capacity as usize;
            guard.days.values().any(|seq| seq.len() > cap)
        };
        if !needs_sweep {
            return Ok(());
        }

        let event = Event::BookingsReconciled {
            room_id: room.id,
            capacity: room.capacity,
        };
        append_event(&self.wal_tx, &event).await?;
        guard.reconcile(room.capacity);
        let emptied = guard.is_empty();
        drop(guard);
        if emptied {
            self.books.remove_if(&room.id, |_, b| {
                Arc::ptr_eq(b, &book) && b.try_read().map(|g| g.is_empty()).unwrap_or(false)
            });
        }
        self.notify.send(room.id, &event);
        Ok(())
    }

    /// Apply a replayed event. Startup only — uncontended locks.
    pub(super) fn apply_replay(&self, event: &Event) {
        match event {
            Event::BookingAdded { room_id, day, user } => {
                let book = self.books.entry(*room_id).or_default().clone();
                let mut guard = book.try_write().expect("replay: uncontended write");
                guard.add(*day, user.clone());
            }
            Event::BookingCancelled { room_id, day, user } => {
                if let Some(book) = self.get_book(room_id) {
                    let mut guard = book.try_write().expect("replay: uncontended write");
                    guard.remove(day, user);
                    let emptied = guard.is_empty();
                    drop(guard);
                    if emptied {
                        self.books.remove(room_id);
                    }
                }
            }
            Event::BookingsReconciled { room_id, capacity } => {
                if let Some(book) = self.get_book(room_id) {
                    let mut guard = book.try_write().expect("replay: uncontended write");
                    guard.reconcile(*capacity);
                    let emptied = guard.is_empty();
                    drop(guard);
                    if emptied {
                        self.books.remove(room_id);
                    }
                }
            }
            Event::BookingsPurged { room_id } => {
                self.books.remove(room_id);
            }
            _ => {}
        }
    }

    /// Minimal events recreating all live bookings, for WAL compaction.
    /// Empty shards contribute nothing, so a compacted log carries no
    /// residual keys.
    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let mut events = Vec::new();
        for entry in self.books.iter() {
            let room_id = *entry.key();
            let guard = entry.value().try_read().expect("compact: uncontended read");
            for (day, users) in &guard.days {
                for user in users {
                    events.push(Event::BookingAdded {
                        room_id,
                        day: *day,
                        user: user.clone(),
                    });
                }
            }
        }
        events
    }
}
