//! End-to-end editing scenarios between sessions sharing one operation log.

mod common;

use std::sync::Arc;

use common::{base, key, open, open_flaky, open_with, store};
use reelsync_client::{
    EditOutcome, PollOutcome, Resolution, SessionError, SyncConfig, TransportError,
};
use reelsync_types::{Clip, Marker, MarkerId, PollRequest};

fn history_kinds(store: &reelsync_server::OpLogStore) -> Vec<&'static str> {
    store
        .operations_since(
            &key(),
            PollRequest {
                since_version: 0,
                limit: 0,
            },
        )
        .unwrap()
        .operations
        .iter()
        .map(|item| item.operation.kind())
        .collect()
}

#[tokio::test]
async fn test_moving_a_clip_writes_one_operation() {
    let store = store();
    let mut alice = open(&store, "alice").await;

    let mut desired = alice.snapshot().clone();
    desired.layers[0].clips[0].start_ms = 5000;
    let outcome = alice.edit(desired.clone(), "move clip").await.unwrap();

    assert_eq!(outcome, EditOutcome::Applied { version: 1 });
    assert_eq!(history_kinds(&store), vec!["clip.move"]);
    assert_eq!(store.fetch(&key()).unwrap().timeline_data, desired);
}

#[tokio::test]
async fn test_conflict_then_reload() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    let bobs = bob.snapshot().clone().with_duration(5000);
    bob.edit(bobs.clone(), "bob lengthens").await.unwrap();
    alice
        .edit(alice.snapshot().clone().with_duration(1500), "alice trims")
        .await
        .unwrap();
    let outcome = alice
        .edit(alice.snapshot().clone().with_duration(7000), "alice lengthens")
        .await;
    // alice's first edit already lost the race; she is now blocked.
    assert_eq!(
        outcome.unwrap_err(),
        SessionError::ConflictUnresolved { server_version: 1 }
    );
    assert_eq!(alice.snapshot().duration_ms, 1500);

    let outcome = alice.resolve(Resolution::Reload).await.unwrap();
    assert_eq!(outcome, EditOutcome::Reloaded { version: 1 });
    assert!(!alice.state().is_conflict());
    assert_eq!(alice.snapshot(), &bobs);
    assert!(!alice.history().can_undo());
}

#[tokio::test]
async fn test_conflict_then_force() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    bob.edit(bob.snapshot().clone().with_duration(5000), "bob")
        .await
        .unwrap();
    let mine = alice.snapshot().clone().with_duration(7000);
    let outcome = alice.edit(mine.clone(), "alice").await.unwrap();
    assert_eq!(outcome, EditOutcome::Conflict { server_version: 1 });

    let outcome = alice.resolve(Resolution::Force).await.unwrap();
    assert_eq!(outcome, EditOutcome::Applied { version: 2 });
    assert_eq!(store.fetch(&key()).unwrap().timeline_data, mine);
    assert_eq!(history_kinds(&store), vec!["timeline.update", "timeline.replace"]);

    // bob sees alice's state on his next poll.
    assert!(matches!(
        bob.poll_remote().await.unwrap(),
        PollOutcome::Merged { version: 2, .. }
    ));
    assert_eq!(bob.snapshot(), &mine);
}

#[tokio::test]
async fn test_force_that_loses_again_stays_in_conflict() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    bob.edit(bob.snapshot().clone().with_duration(5000), "bob 1")
        .await
        .unwrap();
    alice
        .edit(alice.snapshot().clone().with_duration(7000), "alice")
        .await
        .unwrap();
    bob.edit(bob.snapshot().clone().with_duration(6000), "bob 2")
        .await
        .unwrap();

    let outcome = alice.resolve(Resolution::Force).await.unwrap();
    assert_eq!(outcome, EditOutcome::Conflict { server_version: 2 });
    assert_eq!(alice.state().conflict().unwrap().server_version, 2);
    assert_eq!(store.version(&key()).unwrap(), 2);

    assert_eq!(
        alice.resolve(Resolution::Force).await.unwrap(),
        EditOutcome::Applied { version: 3 }
    );
}

#[tokio::test]
async fn test_forced_edit_is_undoable() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    let mut moved = alice.snapshot().clone();
    moved.layers[0].clips[0].start_ms = 5000;
    alice.edit(moved.clone(), "move clip").await.unwrap();

    bob.poll_remote().await.unwrap();
    bob.edit(
        bob.snapshot()
            .clone()
            .with_marker(Marker::new("M2", 900, "cue")),
        "add marker",
    )
    .await
    .unwrap();

    let outcome = alice
        .edit(moved.clone().with_duration(7000), "lengthen")
        .await
        .unwrap();
    assert_eq!(outcome, EditOutcome::Conflict { server_version: 2 });
    assert_eq!(
        alice.resolve(Resolution::Force).await.unwrap(),
        EditOutcome::Applied { version: 3 }
    );
    assert_eq!(alice.history().undo_labels(), vec!["lengthen", "move clip"]);

    assert_eq!(alice.undo().await.unwrap(), EditOutcome::Applied { version: 4 });
    assert_eq!(alice.snapshot(), &moved);
    let server = store.fetch(&key()).unwrap().timeline_data;
    assert_eq!(server.duration_ms, 2000);
    assert_eq!(server.layers[0].clips[0].start_ms, 5000);
}

#[tokio::test]
async fn test_undo_reverses_three_edits() {
    let store = store();
    let mut alice = open(&store, "alice").await;

    let mut added = alice.snapshot().clone();
    added.layers[0].clips.push_back(Clip::new("C3", 2000, 500));
    alice.edit(added.clone(), "add clip").await.unwrap();

    let mut moved = added.clone();
    moved.layers[0].clips[0].start_ms = 300;
    alice.edit(moved.clone(), "move clip").await.unwrap();

    let mut deleted = moved.clone();
    deleted.markers.remove(&MarkerId::from("M1"));
    alice.edit(deleted, "delete marker").await.unwrap();

    assert_eq!(
        alice.history().undo_labels(),
        vec!["delete marker", "move clip", "add clip"]
    );

    let mut versions = Vec::new();
    for expected in [&moved, &added, &base()] {
        match alice.undo().await.unwrap() {
            EditOutcome::Applied { version } => versions.push(version),
            other => panic!("undo failed: {other:?}"),
        }
        assert_eq!(alice.snapshot(), expected);
    }
    assert_eq!(versions, vec![4, 5, 6]);
    assert_eq!(alice.undo().await.unwrap(), EditOutcome::NothingToUndo);
    assert_eq!(
        alice.history().redo_labels(),
        vec!["add clip", "move clip", "delete marker"]
    );
    assert_eq!(store.fetch(&key()).unwrap().timeline_data, base());
}

#[tokio::test]
async fn test_undo_keeps_remote_work() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    let mut moved = alice.snapshot().clone();
    moved.layers[0].clips[0].start_ms = 500;
    alice.edit(moved, "move clip").await.unwrap();

    assert_eq!(
        bob.poll_remote().await.unwrap(),
        PollOutcome::Merged {
            version: 1,
            applied: 1,
            skipped: 0
        }
    );
    let with_marker = bob
        .snapshot()
        .clone()
        .with_marker(Marker::new("M2", 900, "bob's cue"));
    bob.edit(with_marker, "add marker").await.unwrap();

    alice.poll_remote().await.unwrap();
    assert_eq!(alice.version(), 2);
    assert_eq!(alice.undo().await.unwrap(), EditOutcome::Applied { version: 3 });

    let server = store.fetch(&key()).unwrap().timeline_data;
    assert_eq!(server.layers[0].clips[0].start_ms, 0);
    assert!(server.markers.contains_key(&MarkerId::from("M2")));
    assert_eq!(alice.snapshot(), &server);
}

#[tokio::test]
async fn test_undo_skips_what_a_remote_actor_deleted() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    let mut renamed = alice.snapshot().clone();
    renamed.layers[0].clips[1].name = "B-roll".into();
    alice.edit(renamed, "rename").await.unwrap();

    bob.poll_remote().await.unwrap();
    let mut gone = bob.snapshot().clone();
    gone.layers[0].clips.remove(1);
    bob.edit(gone.clone(), "delete clip").await.unwrap();

    alice.poll_remote().await.unwrap();
    // The clip the rename touched no longer exists, so undo has nothing left.
    assert_eq!(alice.undo().await.unwrap(), EditOutcome::NoChange);
    assert_eq!(alice.version(), 2);
    assert!(alice.history().can_redo());
    assert_eq!(store.fetch(&key()).unwrap().timeline_data, gone);
}

#[tokio::test]
async fn test_remote_merge_updates_preview() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    let mut frame = alice.confirmed().clone();
    frame.layers[0].clips[0].start_ms = 250;
    alice.preview(frame).unwrap();

    bob.edit(
        bob.snapshot()
            .clone()
            .with_marker(Marker::new("M2", 900, "cue")),
        "add marker",
    )
    .await
    .unwrap();

    alice.poll_remote().await.unwrap();
    let view = alice.subscribe().borrow().clone();
    assert!(view.previewing);
    assert_eq!(view.version, 1);
    assert_eq!(alice.snapshot().layers[0].clips[0].start_ms, 250);
    assert!(alice.snapshot().markers.contains_key(&MarkerId::from("M2")));
    assert!(alice.confirmed().markers.contains_key(&MarkerId::from("M2")));
    assert_eq!(alice.confirmed().layers[0].clips[0].start_ms, 0);
}

#[tokio::test]
async fn test_transport_failure_keeps_pending_edit() {
    let store = store();
    let (mut alice, link) = open_flaky(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    link.set_offline(true);
    let mut moved = alice.snapshot().clone();
    moved.layers[0].clips[0].start_ms = 500;
    let err = alice.edit(moved, "move clip").await.unwrap_err();
    assert!(matches!(
        err,
        SessionError::Transport(TransportError::Unavailable(_))
    ));
    assert_eq!(alice.version(), 0);
    assert_eq!(alice.snapshot(), &base());
    assert_eq!(alice.pending().unwrap().label, "move clip");
    assert!(alice.subscribe().borrow().has_pending);
    assert!(!alice.history().can_undo());

    bob.edit(
        bob.snapshot()
            .clone()
            .with_marker(Marker::new("M2", 900, "cue")),
        "add marker",
    )
    .await
    .unwrap();

    link.set_offline(false);
    alice.poll_remote().await.unwrap();
    assert_eq!(
        alice.retry_pending().await.unwrap(),
        EditOutcome::Applied { version: 2 }
    );
    assert!(alice.pending().is_none());
    assert_eq!(alice.history().undo_labels(), vec!["move clip"]);

    let server = store.fetch(&key()).unwrap().timeline_data;
    assert_eq!(server.layers[0].clips[0].start_ms, 500);
    assert!(server.markers.contains_key(&MarkerId::from("M2")));
}

#[tokio::test]
async fn test_edit_after_failed_delivery_lands_both() {
    let store = store();
    let (mut alice, link) = open_flaky(&store, "alice").await;

    link.set_offline(true);
    let mut moved = alice.snapshot().clone();
    moved.layers[0].clips[0].start_ms = 500;
    alice.edit(moved, "move clip").await.unwrap_err();
    assert!(alice.pending().is_some());

    link.set_offline(false);
    let outcome = alice
        .edit(base().with_duration(3000), "lengthen")
        .await
        .unwrap();
    assert_eq!(outcome, EditOutcome::Applied { version: 2 });
    assert!(alice.pending().is_none());
    assert_eq!(alice.history().undo_labels(), vec!["lengthen", "move clip"]);

    let server = store.fetch(&key()).unwrap().timeline_data;
    assert_eq!(server.layers[0].clips[0].start_ms, 500);
    assert_eq!(server.duration_ms, 3000);
    assert_eq!(alice.snapshot(), &server);
}

#[tokio::test]
async fn test_edits_while_offline_queue_behind_pending() {
    let store = store();
    let (mut alice, link) = open_flaky(&store, "alice").await;

    link.set_offline(true);
    let mut moved = alice.snapshot().clone();
    moved.layers[0].clips[0].start_ms = 500;
    alice.edit(moved, "move clip").await.unwrap_err();
    let err = alice
        .edit(base().with_duration(3000), "lengthen")
        .await
        .unwrap_err();
    assert!(matches!(err, SessionError::Transport(_)));
    assert_eq!(alice.pending().unwrap().label, "move clip, lengthen");
    assert_eq!(alice.version(), 0);

    link.set_offline(false);
    assert_eq!(
        alice.retry_pending().await.unwrap(),
        EditOutcome::Applied { version: 1 }
    );
    let server = store.fetch(&key()).unwrap().timeline_data;
    assert_eq!(server.layers[0].clips[0].start_ms, 500);
    assert_eq!(server.duration_ms, 3000);
}

#[tokio::test]
async fn test_failed_undo_restores_stacks() {
    let store = store();
    let (mut alice, link) = open_flaky(&store, "alice").await;

    alice
        .edit(alice.snapshot().clone().with_duration(9000), "lengthen")
        .await
        .unwrap();

    link.set_offline(true);
    assert!(matches!(
        alice.undo().await.unwrap_err(),
        SessionError::Transport(_)
    ));
    assert_eq!(alice.history().undo_labels(), vec!["lengthen"]);
    assert!(!alice.history().can_redo());
    assert_eq!(alice.snapshot().duration_ms, 9000);

    link.set_offline(false);
    assert_eq!(alice.undo().await.unwrap(), EditOutcome::Applied { version: 2 });
    assert_eq!(alice.snapshot(), &base());
}

#[tokio::test]
async fn test_missing_poll_items_trigger_resync() {
    let store = store();
    let (mut alice, link) = open_flaky(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    let bobs = bob.snapshot().clone().with_duration(4000);
    bob.edit(bobs.clone(), "bob").await.unwrap();

    link.set_drop_poll_items(true);
    assert_eq!(
        alice.poll_remote().await.unwrap(),
        PollOutcome::Resynced { version: 1 }
    );
    assert_eq!(alice.snapshot(), &bobs);

    link.set_drop_poll_items(false);
    assert_eq!(alice.poll_remote().await.unwrap(), PollOutcome::UpToDate);
}

#[tokio::test]
async fn test_server_ahead_without_new_items_resyncs() {
    let store = store();
    let (mut alice, link) = open_flaky(&store, "alice").await;
    let mut bob = open(&store, "bob").await;

    alice
        .edit(alice.snapshot().clone().with_duration(3000), "lengthen")
        .await
        .unwrap();
    bob.poll_remote().await.unwrap();
    bob.edit(bob.snapshot().clone().with_duration(4000), "bob")
        .await
        .unwrap();

    link.set_withhold_new_items(true);
    assert_eq!(
        alice.poll_remote().await.unwrap(),
        PollOutcome::Resynced { version: 2 }
    );
    assert_eq!(alice.snapshot().duration_ms, 4000);

    link.set_withhold_new_items(false);
    assert_eq!(alice.poll_remote().await.unwrap(), PollOutcome::UpToDate);
}

#[tokio::test]
async fn test_unexpected_apply_version_resyncs() {
    let store = store();
    let (mut alice, link) = open_flaky(&store, "alice").await;

    link.set_skew_versions(true);
    let err = alice
        .edit(alice.snapshot().clone().with_duration(3000), "lengthen")
        .await
        .unwrap_err();
    assert_eq!(err, SessionError::ProtocolViolation { expected: 1, got: 2 });
    assert_eq!(alice.version(), 1);
    assert_eq!(alice.snapshot(), &store.fetch(&key()).unwrap().timeline_data);
    assert!(!alice.state().is_conflict());
    assert!(!alice.history().can_undo());

    link.set_skew_versions(false);
    assert_eq!(
        alice
            .edit(alice.snapshot().clone().with_duration(5000), "lengthen more")
            .await
            .unwrap(),
        EditOutcome::Applied { version: 2 }
    );
}

#[tokio::test]
async fn test_poll_pages_through_backlog() {
    let store = store();
    let config = SyncConfig {
        poll_limit: 2,
        ..Default::default()
    };
    let mut alice = open_with(&store, "alice", config).await;
    let mut bob = open(&store, "bob").await;

    for n in 1..=5u64 {
        bob.edit(bob.snapshot().clone().with_duration(n * 1000), format!("bob {n}"))
            .await
            .unwrap();
    }

    assert_eq!(
        alice.poll_remote().await.unwrap(),
        PollOutcome::Merged {
            version: 5,
            applied: 5,
            skipped: 0
        }
    );
    assert_eq!(alice.snapshot(), bob.snapshot());
}

#[tokio::test]
async fn test_versions_only_move_forward() {
    let store = store();
    let mut alice = open(&store, "alice").await;
    let mut bob = open(&store, "bob").await;
    let rx = alice.subscribe();

    let mut seen = vec![alice.version()];
    for n in 1..=6u64 {
        if n % 2 == 0 {
            bob.poll_remote().await.unwrap();
            bob.edit(bob.snapshot().clone().with_duration(n * 100), "bob")
                .await
                .unwrap();
            alice.poll_remote().await.unwrap();
        } else {
            alice
                .edit(alice.snapshot().clone().with_duration(n * 100), "alice")
                .await
                .unwrap();
        }
        seen.push(rx.borrow().version);
    }
    alice.undo().await.unwrap();
    seen.push(rx.borrow().version);

    assert!(seen.windows(2).all(|w| w[0] < w[1]), "versions: {seen:?}");
    assert_eq!(*seen.last().unwrap(), store.version(&key()).unwrap());
}

#[tokio::test]
async fn test_session_resumes_from_persisted_log() {
    use reelsync_client::{LocalTransport, OpLogClient, SyncSession};
    use reelsync_server::{OpLogDb, OpLogStore};
    use reelsync_types::ActorId;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reelsync.db");

    let edited = {
        let store = Arc::new(OpLogStore::with_db(OpLogDb::open(&path).unwrap()));
        store
            .create_document(key(), base(), &ActorId::from("setup"))
            .unwrap();
        let mut alice = open(&store, "alice").await;
        let desired = alice.snapshot().clone().with_duration(3000);
        alice.edit(desired.clone(), "lengthen").await.unwrap();
        desired
    };

    let store = Arc::new(OpLogStore::with_db(OpLogDb::open(&path).unwrap()));
    let client = OpLogClient::new(Arc::new(LocalTransport::new(store.clone(), "bob")), key());
    let bob = SyncSession::open(client, SyncConfig::default()).await.unwrap();
    assert_eq!(bob.version(), 1);
    assert_eq!(bob.snapshot(), &edited);
    assert_eq!(history_kinds(&store), vec!["timeline.update"]);
}
