use std::path::PathBuf;
use std::sync::Arc;

use ulid::Ulid;

use crate::calendar::CalendarDay;
use crate::model::UserId;
use crate::notify::NotifyHub;

use super::{Engine, EngineError};

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("roomledger_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{name}.wal"));
    let _ = std::fs::remove_file(&path);
    path
}

fn open(path: &PathBuf) -> Engine {
    Engine::open(path.clone(), Arc::new(NotifyHub::new()), false).unwrap()
}

fn day(s: &str) -> CalendarDay {
    s.parse().unwrap()
}

fn user(s: &str) -> UserId {
    UserId::from(s)
}

// ── Registry ────────────────────────────────────────────────

#[tokio::test]
async fn create_list_rooms_in_creation_order() {
    let engine = open(&test_wal_path("create_list"));
    let a = engine.registry.create("Alpha", 3).await.unwrap();
    let b = engine.registry.create("Beta", 2).await.unwrap();

    let rooms = engine.registry.list().await;
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].id, a.id);
    assert_eq!(rooms[1].id, b.id);
    assert_eq!(rooms[0].name, "Alpha");
    assert_eq!(rooms[0].capacity, 3);
}

#[tokio::test]
async fn create_room_rejects_empty_name() {
    let engine = open(&test_wal_path("empty_name"));
    let err = engine.registry.create("", 3).await.unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

#[tokio::test]
async fn create_room_zero_capacity_is_locked_not_invalid() {
    let engine = open(&test_wal_path("zero_cap"));
    let room = engine.registry.create("Gesperrt", 0).await.unwrap();
    assert_eq!(room.capacity, 0);
}

#[tokio::test]
async fn update_room_keeps_id() {
    let engine = open(&test_wal_path("update_keeps_id"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let updated = engine.registry.update(room.id, "Alpha II", 5).await.unwrap();
    assert_eq!(updated.id, room.id);
    assert_eq!(updated.name, "Alpha II");
    assert_eq!(updated.capacity, 5);
    assert_eq!(engine.registry.get(room.id).await.unwrap().capacity, 5);
}

#[tokio::test]
async fn update_unknown_room_not_found() {
    let engine = open(&test_wal_path("update_unknown"));
    let err = engine.registry.update(Ulid::new(), "x", 1).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
}

#[tokio::test]
async fn delete_room_removes_it() {
    let engine = open(&test_wal_path("delete_room"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    engine.registry.delete(room.id).await.unwrap();
    assert!(engine.registry.get(room.id).await.is_none());
    assert!(matches!(
        engine.registry.delete(room.id).await.unwrap_err(),
        EngineError::NotFound(_)
    ));
}

#[tokio::test]
async fn seeds_default_rooms_on_first_run_only() {
    let path = test_wal_path("seeding");
    {
        let engine = Engine::open(path.clone(), Arc::new(NotifyHub::new()), true).unwrap();
        let rooms = engine.registry.list().await;
        assert_eq!(rooms.len(), 3);
        assert_eq!(rooms[0].name, "Konferenzraum Alpha");
        assert_eq!(rooms[1].name, "Meetingraum Beta");
        assert_eq!(rooms[2].name, "Projektraum Gamma");
        engine.registry.delete(rooms[0].id).await.unwrap();
    }
    // Log is non-empty now, so no re-seed on reopen.
    let engine = Engine::open(path, Arc::new(NotifyHub::new()), true).unwrap();
    assert_eq!(engine.registry.list().await.len(), 2);
}

#[tokio::test]
async fn seeding_disabled_leaves_empty_registry() {
    let engine = open(&test_wal_path("seed_off"));
    assert!(engine.registry.list().await.is_empty());
}

// ── Booking ─────────────────────────────────────────────────

#[tokio::test]
async fn book_until_full_preserves_order() {
    let engine = open(&test_wal_path("book_full"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let d = day("2025-06-02");

    assert!(engine.ledger.book(&room, d, &user("anna")).await.unwrap());
    assert!(engine.ledger.book(&room, d, &user("ben")).await.unwrap());
    assert!(engine.ledger.book(&room, d, &user("cleo")).await.unwrap());
    // Fourth booker is turned away, no error.
    assert!(!engine.ledger.book(&room, d, &user("dora")).await.unwrap());

    let users = engine.ledger.booked_users(room.id, d).await;
    assert_eq!(users, vec![user("anna"), user("ben"), user("cleo")]);
}

#[tokio::test]
async fn book_locked_room_rejected_without_mutation() {
    let engine = open(&test_wal_path("book_locked"));
    let room = engine.registry.create("Gesperrt", 0).await.unwrap();
    let d = day("2025-06-02");

    assert!(!engine.ledger.book(&room, d, &user("anna")).await.unwrap());
    assert!(!engine.ledger.has_entry(room.id, d).await);
}

#[tokio::test]
async fn duplicate_booking_same_day_rejected() {
    let engine = open(&test_wal_path("book_dup"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let d = day("2025-06-02");

    assert!(engine.ledger.book(&room, d, &user("anna")).await.unwrap());
    assert!(!engine.ledger.book(&room, d, &user("anna")).await.unwrap());
    assert_eq!(engine.ledger.booked_users(room.id, d).await.len(), 1);

    // Same user, different day is fine.
    assert!(
        engine
            .ledger
            .book(&room, day("2025-06-03"), &user("anna"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn book_rejects_empty_user() {
    let engine = open(&test_wal_path("book_empty_user"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let err = engine
        .ledger
        .book(&room, day("2025-06-02"), &user(""))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidArgument(_)));
}

#[tokio::test]
async fn cancel_is_idempotent_and_prunes_empty_days() {
    let engine = open(&test_wal_path("cancel"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let d = day("2025-06-02");

    engine.ledger.book(&room, d, &user("anna")).await.unwrap();
    engine.ledger.book(&room, d, &user("ben")).await.unwrap();

    assert!(engine.ledger.cancel(room.id, d, &user("anna")).await.unwrap());
    assert_eq!(engine.ledger.booked_users(room.id, d).await, vec![user("ben")]);

    // Cancelling again is a no-op, not an error.
    assert!(!engine.ledger.cancel(room.id, d, &user("anna")).await.unwrap());

    // Removing the last booker prunes the day entry entirely.
    assert!(engine.ledger.cancel(room.id, d, &user("ben")).await.unwrap());
    assert!(!engine.ledger.has_entry(room.id, d).await);
    assert!(!engine.ledger.has_any_booking(room.id).await);
}

#[tokio::test]
async fn cancel_unknown_room_is_noop() {
    let engine = open(&test_wal_path("cancel_unknown"));
    assert!(
        !engine
            .ledger
            .cancel(Ulid::new(), day("2025-06-02"), &user("anna"))
            .await
            .unwrap()
    );
}

// ── Reconciliation ──────────────────────────────────────────

#[tokio::test]
async fn capacity_shrink_drops_latest_bookers() {
    let engine = open(&test_wal_path("shrink"));
    let room = engine.registry.create("Alpha", 5).await.unwrap();
    let d = day("2025-06-02");
    for name in ["a", "b", "c", "d"] {
        engine.ledger.book(&room, d, &user(name)).await.unwrap();
    }

    let updated = engine.registry.update(room.id, "Alpha", 2).await.unwrap();
    engine.ledger.on_room_capacity_changed(&updated).await.unwrap();

    // Earliest bookers keep their slots.
    assert_eq!(
        engine.ledger.booked_users(room.id, d).await,
        vec![user("a"), user("b")]
    );
}

#[tokio::test]
async fn capacity_grow_leaves_bookings_untouched() {
    let engine = open(&test_wal_path("grow"));
    let room = engine.registry.create("Alpha", 2).await.unwrap();
    let d = day("2025-06-02");
    engine.ledger.book(&room, d, &user("a")).await.unwrap();
    engine.ledger.book(&room, d, &user("b")).await.unwrap();

    let updated = engine.registry.update(room.id, "Alpha", 10).await.unwrap();
    engine.ledger.on_room_capacity_changed(&updated).await.unwrap();

    assert_eq!(engine.ledger.booked_users(room.id, d).await.len(), 2);
    // And there is now room for a third.
    assert!(engine.ledger.book(&updated, d, &user("c")).await.unwrap());
}

#[tokio::test]
async fn capacity_zero_clears_all_days() {
    let engine = open(&test_wal_path("lock_room"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    engine
        .ledger
        .book(&room, day("2025-06-02"), &user("a"))
        .await
        .unwrap();
    engine
        .ledger
        .book(&room, day("2025-06-03"), &user("b"))
        .await
        .unwrap();

    let updated = engine.registry.update(room.id, "Alpha", 0).await.unwrap();
    engine.ledger.on_room_capacity_changed(&updated).await.unwrap();

    assert!(!engine.ledger.has_any_booking(room.id).await);
    // And the locked room rejects new bookings.
    assert!(
        !engine
            .ledger
            .book(&updated, day("2025-06-04"), &user("c"))
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn shrink_after_concurrent_raise_still_sweeps() {
    // Interleaving seen from a caller holding a stale snapshot: the room
    // starts at capacity 2, another writer raises it to 5 and fills it,
    // then the first writer's shrink back to 2 lands. The shrink's sweep
    // must run off the post-update capacity, never off the stale snapshot
    // (which equals the new value and would suggest nothing changed).
    let engine = open(&test_wal_path("shrink_race"));
    let room = engine.registry.create("Alpha", 2).await.unwrap();
    let d = day("2025-06-02");

    let raised = engine.registry.update(room.id, "Alpha", 5).await.unwrap();
    engine.ledger.on_room_capacity_changed(&raised).await.unwrap();
    for name in ["a", "b", "c", "d", "e"] {
        assert!(engine.ledger.book(&raised, d, &user(name)).await.unwrap());
    }

    let shrunk = engine.registry.update(room.id, "Alpha", 2).await.unwrap();
    engine.ledger.on_room_capacity_changed(&shrunk).await.unwrap();

    assert_eq!(
        engine.ledger.booked_users(room.id, d).await,
        vec![user("a"), user("b")]
    );
}

#[tokio::test]
async fn room_delete_purges_its_bookings() {
    let engine = open(&test_wal_path("purge"));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let other = engine.registry.create("Beta", 3).await.unwrap();
    engine
        .ledger
        .book(&room, day("2025-06-02"), &user("a"))
        .await
        .unwrap();
    engine
        .ledger
        .book(&other, day("2025-06-02"), &user("a"))
        .await
        .unwrap();

    engine.registry.delete(room.id).await.unwrap();
    engine.ledger.on_room_deleted(room.id).await.unwrap();

    assert!(!engine.ledger.has_any_booking(room.id).await);
    // Other rooms are untouched.
    assert!(engine.ledger.has_any_booking(other.id).await);
}

// ── Durability ──────────────────────────────────────────────

#[tokio::test]
async fn replay_restores_rooms_and_bookings() {
    let path = test_wal_path("replay");
    let room_id;
    {
        let engine = open(&path);
        let room = engine.registry.create("Alpha", 3).await.unwrap();
        room_id = room.id;
        engine
            .ledger
            .book(&room, day("2025-06-02"), &user("anna"))
            .await
            .unwrap();
        engine
            .ledger
            .book(&room, day("2025-06-02"), &user("ben"))
            .await
            .unwrap();
        engine
            .ledger
            .book(&room, day("2025-06-03"), &user("anna"))
            .await
            .unwrap();
        engine
            .ledger
            .cancel(room_id, day("2025-06-03"), &user("anna"))
            .await
            .unwrap();
    }

    let engine = open(&path);
    let rooms = engine.registry.list().await;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, room_id);
    assert_eq!(
        engine.ledger.booked_users(room_id, day("2025-06-02")).await,
        vec![user("anna"), user("ben")]
    );
    // The cancelled day was pruned, not restored empty.
    assert!(!engine.ledger.has_entry(room_id, day("2025-06-03")).await);
}

#[tokio::test]
async fn replay_reapplies_reconciliation_sweeps() {
    let path = test_wal_path("replay_sweeps");
    let kept_id;
    let purged_id;
    {
        let engine = open(&path);
        let kept = engine.registry.create("Alpha", 5).await.unwrap();
        let purged = engine.registry.create("Beta", 5).await.unwrap();
        kept_id = kept.id;
        purged_id = purged.id;
        let d = day("2025-06-02");
        for name in ["a", "b", "c"] {
            engine.ledger.book(&kept, d, &user(name)).await.unwrap();
            engine.ledger.book(&purged, d, &user(name)).await.unwrap();
        }

        let shrunk = engine.registry.update(kept_id, "Alpha", 1).await.unwrap();
        engine.ledger.on_room_capacity_changed(&shrunk).await.unwrap();
        engine.registry.delete(purged_id).await.unwrap();
        engine.ledger.on_room_deleted(purged_id).await.unwrap();
    }

    let engine = open(&path);
    assert_eq!(
        engine.ledger.booked_users(kept_id, day("2025-06-02")).await,
        vec![user("a")]
    );
    assert!(!engine.ledger.has_any_booking(purged_id).await);
    assert!(engine.registry.get(purged_id).await.is_none());
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compaction");
    let room_id;
    {
        let engine = open(&path);
        let room = engine.registry.create("Alpha", 3).await.unwrap();
        room_id = room.id;
        let d = day("2025-06-02");
        // Churn: book and cancel repeatedly, leaving two live bookings.
        for i in 0..50 {
            let u = user(&format!("churn{i}"));
            engine.ledger.book(&room, d, &u).await.unwrap();
            engine.ledger.cancel(room_id, d, &u).await.unwrap();
        }
        engine.ledger.book(&room, d, &user("anna")).await.unwrap();
        engine.ledger.book(&room, d, &user("ben")).await.unwrap();

        let before = engine.wal_appends_since_compact().await;
        engine.compact_wal().await.unwrap();
        let after = engine.wal_appends_since_compact().await;
        assert!(after < before);
    }

    let engine = open(&path);
    assert_eq!(
        engine.ledger.booked_users(room_id, day("2025-06-02")).await,
        vec![user("anna"), user("ben")]
    );
}

// ── Concurrency ─────────────────────────────────────────────

#[tokio::test]
async fn concurrent_bookers_never_overshoot_capacity() {
    let engine = Arc::new(open(&test_wal_path("concurrent")));
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let d = day("2025-06-02");

    let mut handles = Vec::new();
    for i in 0..32 {
        let engine = engine.clone();
        let room = room.clone();
        handles.push(tokio::spawn(async move {
            engine.ledger.book(&room, d, &user(&format!("u{i}"))).await
        }));
    }

    let mut confirmed = 0;
    for handle in handles {
        if handle.await.unwrap().unwrap() {
            confirmed += 1;
        }
    }

    assert_eq!(confirmed, 3);
    assert_eq!(engine.ledger.booked_users(room.id, d).await.len(), 3);
}

#[tokio::test]
async fn booking_racing_a_purge_never_resurfaces() {
    let engine = Arc::new(open(&test_wal_path("race_purge")));
    let room = engine.registry.create("Alpha", 10).await.unwrap();
    let d = day("2025-06-02");
    engine.ledger.book(&room, d, &user("seed")).await.unwrap();

    let booker = {
        let engine = engine.clone();
        let room = room.clone();
        tokio::spawn(async move { engine.ledger.book(&room, d, &user("late")).await })
    };
    let purger = {
        let engine = engine.clone();
        let id = room.id;
        tokio::spawn(async move { engine.ledger.on_room_deleted(id).await })
    };
    booker.await.unwrap().unwrap();
    purger.await.unwrap().unwrap();

    // Whatever the interleaving, the ledger never holds a booking in a
    // detached shard: a late booking lands in the live map or the purge
    // removed everything first.
    let users = engine.ledger.booked_users(room.id, d).await;
    assert!(users.is_empty() || users.contains(&user("late")) || users.contains(&user("seed")));
}

// ── Notifications ───────────────────────────────────────────

#[tokio::test]
async fn booking_emits_event_to_subscribers() {
    let notify = Arc::new(NotifyHub::new());
    let engine =
        Engine::open(test_wal_path("notify_events"), notify.clone(), false).unwrap();
    let room = engine.registry.create("Alpha", 3).await.unwrap();
    let mut rx = notify.subscribe(room.id);

    let d = day("2025-06-02");
    engine.ledger.book(&room, d, &user("anna")).await.unwrap();

    match rx.recv().await.unwrap() {
        crate::model::Event::BookingAdded { room_id, day, user } => {
            assert_eq!(room_id, room.id);
            assert_eq!(day, d);
            assert_eq!(user.as_str(), "anna");
        }
        other => panic!("unexpected event: {other:?}"),
    }
}
