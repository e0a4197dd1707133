use super::*;

fn identity(id: i64, username: &str) -> UserIdentity {
    UserIdentity { id, username: username.into(), role: "user".into() }
}

async fn registered(presence: &Presence, user_id: i64, username: &str) -> ConnId {
    let conn_id = Uuid::new_v4();
    let (tx, _rx) = mpsc::channel(8);
    presence
        .register(conn_id, identity(user_id, username), tx)
        .await
        .expect("register should succeed");
    conn_id
}

#[tokio::test]
async fn register_reports_first_connection_per_user() {
    let presence = Presence::new();
    let c1 = Uuid::new_v4();
    let c2 = Uuid::new_v4();
    let (tx1, _rx1) = mpsc::channel(8);
    let (tx2, _rx2) = mpsc::channel(8);

    let first = presence
        .register(c1, identity(1, "alice"), tx1)
        .await
        .expect("register c1");
    let second = presence
        .register(c2, identity(1, "alice"), tx2)
        .await
        .expect("register c2");

    assert!(first);
    assert!(!second, "second device must not count as a fresh online");
}

#[tokio::test]
async fn duplicate_register_is_rejected_without_corrupting_state() {
    let presence = Presence::new();
    let conn_id = registered(&presence, 1, "alice").await;
    presence.join(conn_id, "general").await.expect("join");

    let (tx, _rx) = mpsc::channel(8);
    let err = presence.register(conn_id, identity(2, "mallory"), tx).await;
    assert!(matches!(err, Err(PresenceError::DuplicateConnection(id)) if id == conn_id));

    // Original registration is untouched.
    let user = presence.identity_of(conn_id).await.expect("identity");
    assert_eq!(user.id, 1);
    assert_eq!(presence.members_of("general").await, vec![conn_id]);
}

#[tokio::test]
async fn join_is_idempotent() {
    let presence = Presence::new();
    let conn_id = registered(&presence, 1, "alice").await;

    assert!(presence.join(conn_id, "dev").await.expect("first join"));
    assert!(!presence.join(conn_id, "dev").await.expect("second join"));

    assert_eq!(presence.members_of("dev").await, vec![conn_id]);
    assert_eq!(presence.rooms_of(conn_id).await, vec!["dev".to_string()]);
}

#[tokio::test]
async fn leave_is_idempotent_and_inverse_of_join() {
    let presence = Presence::new();
    let conn_id = registered(&presence, 1, "alice").await;

    assert!(!presence.leave(conn_id, "dev").await.expect("leave before join"));
    presence.join(conn_id, "dev").await.expect("join");
    assert!(presence.leave(conn_id, "dev").await.expect("leave"));
    assert!(!presence.leave(conn_id, "dev").await.expect("second leave"));

    assert!(presence.members_of("dev").await.is_empty());
    assert!(presence.rooms_of(conn_id).await.is_empty());
}

#[tokio::test]
async fn join_leave_net_effect_matches_causal_order() {
    let presence = Presence::new();
    let conn_id = registered(&presence, 1, "alice").await;

    // join, join, leave → not a member; trailing join → member again.
    presence.join(conn_id, "ops").await.expect("join 1");
    presence.join(conn_id, "ops").await.expect("join 2");
    presence.leave(conn_id, "ops").await.expect("leave");
    assert!(!presence.is_member(conn_id, "ops").await);

    presence.join(conn_id, "ops").await.expect("join 3");
    assert!(presence.is_member(conn_id, "ops").await);
}

#[tokio::test]
async fn join_unknown_connection_is_an_error() {
    let presence = Presence::new();
    let ghost = Uuid::new_v4();
    let err = presence.join(ghost, "general").await;
    assert!(matches!(err, Err(PresenceError::UnknownConnection(id)) if id == ghost));
    assert!(presence.members_of("general").await.is_empty());
}

#[tokio::test]
async fn unregister_removes_connection_from_every_room() {
    let presence = Presence::new();
    let conn_id = registered(&presence, 1, "alice").await;
    let peer = registered(&presence, 2, "bob").await;
    presence.join(conn_id, "general").await.expect("join general");
    presence.join(conn_id, "dev").await.expect("join dev");
    presence.join(peer, "general").await.expect("peer join");

    let unreg = presence.unregister(conn_id).await.expect("unregister");
    assert_eq!(unreg.user_id, 1);
    assert!(unreg.last_for_user);
    assert_eq!(unreg.rooms, vec!["dev".to_string(), "general".to_string()]);

    assert!(presence.rooms_of(conn_id).await.is_empty());
    assert_eq!(presence.members_of("general").await, vec![peer]);
    assert!(presence.members_of("dev").await.is_empty());
}

#[tokio::test]
async fn unregister_twice_returns_none() {
    let presence = Presence::new();
    let conn_id = registered(&presence, 1, "alice").await;

    assert!(presence.unregister(conn_id).await.is_some());
    assert!(presence.unregister(conn_id).await.is_none());
}

#[tokio::test]
async fn unregister_reports_last_only_when_no_device_remains() {
    let presence = Presence::new();
    let c1 = registered(&presence, 1, "alice").await;
    let c2 = registered(&presence, 1, "alice").await;

    let first = presence.unregister(c1).await.expect("unregister c1");
    assert!(!first.last_for_user);
    assert!(presence.user_online(1).await);

    let second = presence.unregister(c2).await.expect("unregister c2");
    assert!(second.last_for_user);
    assert!(!presence.user_online(1).await);
}

#[tokio::test]
async fn concurrent_joins_and_leaves_leave_index_consistent() {
    let presence = Presence::new();
    let a = registered(&presence, 1, "alice").await;
    let b = registered(&presence, 2, "bob").await;

    let (ra, rb, rl) = tokio::join!(
        presence.join(a, "general"),
        presence.join(b, "general"),
        presence.leave(a, "general"),
    );
    ra.expect("join a");
    rb.expect("join b");
    rl.expect("leave a");

    // Whatever the interleaving, both directions of the index agree.
    let members = presence.members_of("general").await;
    assert!(members.contains(&b));
    let a_in_room = members.contains(&a);
    assert_eq!(presence.is_member(a, "general").await, a_in_room);
    assert_eq!(
        presence.rooms_of(a).await.contains(&"general".to_string()),
        a_in_room
    );
}

#[tokio::test]
async fn room_senders_excludes_requested_connection() {
    let presence = Presence::new();
    let a = registered(&presence, 1, "alice").await;
    let b = registered(&presence, 2, "bob").await;
    presence.join(a, "general").await.expect("join a");
    presence.join(b, "general").await.expect("join b");

    let senders = presence.room_senders("general", Some(a)).await;
    assert_eq!(senders.len(), 1);
    assert_eq!(senders[0].0, b);
}

#[tokio::test]
async fn user_senders_covers_all_devices() {
    let presence = Presence::new();
    let c1 = registered(&presence, 1, "alice").await;
    let c2 = registered(&presence, 1, "alice").await;
    let other = registered(&presence, 2, "bob").await;

    let mut ids: Vec<ConnId> = presence.user_senders(1).await.into_iter().map(|(id, _)| id).collect();
    ids.sort_unstable();
    let mut expected = vec![c1, c2];
    expected.sort_unstable();
    assert_eq!(ids, expected);
    assert!(!ids.contains(&other));
}

#[tokio::test]
async fn empty_room_is_dropped_from_index() {
    let presence = Presence::new();
    let conn_id = registered(&presence, 1, "alice").await;
    presence.join(conn_id, "ephemeral").await.expect("join");
    presence.leave(conn_id, "ephemeral").await.expect("leave");

    // members_of on a vanished room behaves like an empty one.
    assert!(presence.members_of("ephemeral").await.is_empty());
    assert!(presence.room_senders("ephemeral", None).await.is_empty());
}
