use std::sync::Arc;

use tokio::sync::{RwLock, mpsc};
use ulid::Ulid;

use crate::limits::*;
use crate::model::{Event, Room};
use crate::notify::NotifyHub;

use super::{EngineError, WalCommand, append_event};

/// CRUD over the durable room set; source of truth for capacity.
///
/// Rooms are kept in creation order. The registry holds no reference to the
/// booking ledger — after an update that changed capacity, or a delete, the
/// orchestrating caller must invoke the ledger's reconciliation hooks.
pub struct RoomRegistry {
    rooms: RwLock<Vec<Room>>,
    wal_tx: mpsc::Sender<WalCommand>,
    notify: Arc<NotifyHub>,
}

impl RoomRegistry {
    pub(super) fn new(wal_tx: mpsc::Sender<WalCommand>, notify: Arc<NotifyHub>) -> Self {
        Self {
            rooms: RwLock::new(Vec::new()),
            wal_tx,
            notify,
        }
    }

    /// All rooms in creation order. Never fails.
    pub async fn list(&self) -> Vec<Room> {
        self.rooms.read().await.clone()
    }

    /// Snapshot of a single room. Booking callers resolve the room here and
    /// pass the snapshot into the ledger, so capacity is read at call time.
    pub async fn get(&self, id: Ulid) -> Option<Room> {
        self.rooms.read().await.iter().find(|r| r.id == id).cloned()
    }

    pub async fn create(&self, name: &str, capacity: u32) -> Result<Room, EngineError> {
        validate_room(name, capacity)?;
        let mut rooms = self.rooms.write().await;
        if rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }

        let room = Room {
            id: Ulid::new(),
            name: name.to_string(),
            capacity,
        };
        let event = Event::RoomCreated {
            id: room.id,
            name: room.name.clone(),
            capacity,
        };
        append_event(&self.wal_tx, &event).await?;
        rooms.push(room.clone());
        self.notify.send(room.id, &event);
        Ok(room)
    }

    /// Rename and/or resize a room. The id is immutable. Does NOT touch the
    /// booking ledger; the caller invokes `on_room_capacity_changed` when the
    /// capacity actually changed.
    pub async fn update(&self, id: Ulid, name: &str, capacity: u32) -> Result<Room, EngineError> {
        validate_room(name, capacity)?;
        let mut rooms = self.rooms.write().await;
        let pos = rooms
            .iter()
            .position(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::RoomUpdated {
            id,
            name: name.to_string(),
            capacity,
        };
        append_event(&self.wal_tx, &event).await?;
        rooms[pos].name = name.to_string();
        rooms[pos].capacity = capacity;
        self.notify.send(id, &event);
        Ok(rooms[pos].clone())
    }

    /// Remove a room. The caller invokes the ledger's `on_room_deleted`
    /// afterwards.
    pub async fn delete(&self, id: Ulid) -> Result<(), EngineError> {
        let mut rooms = self.rooms.write().await;
        let pos = rooms
            .iter()
            .position(|r| r.id == id)
            .ok_or(EngineError::NotFound(id))?;

        let event = Event::RoomDeleted { id };
        append_event(&self.wal_tx, &event).await?;
        rooms.remove(pos);
        self.notify.send(id, &event);
        Ok(())
    }

    /// Apply a replayed event. Only called during startup — we are the sole
    /// owner, so try_write always succeeds instantly.
    pub(super) fn apply_replay(&self, event: &Event) {
        let mut rooms = self.rooms.try_write().expect("replay: uncontended write");
        match event {
            Event::RoomCreated { id, name, capacity } => {
                rooms.push(Room {
                    id: *id,
                    name: name.clone(),
                    capacity: *capacity,
                });
            }
            Event::RoomUpdated { id, name, capacity } => {
                if let Some(room) = rooms.iter_mut().find(|r| r.id == *id) {
                    room.name = name.clone();
                    room.capacity = *capacity;
                }
            }
            Event::RoomDeleted { id } => {
                rooms.retain(|r| r.id != *id);
            }
            _ => {}
        }
    }

    /// Minimal events recreating the current room set, for WAL compaction.
    pub(super) fn snapshot_events(&self) -> Vec<Event> {
        let rooms = self.rooms.try_read().expect("compact: uncontended read");
        rooms
            .iter()
            .map(|r| Event::RoomCreated {
                id: r.id,
                name: r.name.clone(),
                capacity: r.capacity,
            })
            .collect()
    }
}

fn validate_room(name: &str, capacity: u32) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::InvalidArgument("empty room name".into()));
    }
    if name.len() > MAX_ROOM_NAME_LEN {
        return Err(EngineError::LimitExceeded("room name too long"));
    }
    if capacity > MAX_ROOM_CAPACITY {
        return Err(EngineError::LimitExceeded("capacity too large"));
    }
    Ok(())
}

/// Default rooms written on first run with an empty log. A bootstrap
/// convenience, disableable via configuration.
pub(super) fn seed_events() -> Vec<Event> {
    [
        ("Konferenzraum Alpha", 3),
        ("Meetingraum Beta", 2),
        ("Projektraum Gamma", 5),
    ]
    .into_iter()
    .map(|(name, capacity)| Event::RoomCreated {
        id: Ulid::new(),
        name: name.to_string(),
        capacity,
    })
    .collect()
}
