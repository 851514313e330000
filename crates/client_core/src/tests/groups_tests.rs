use super::*;
use serde_json::json;
use shared::{domain::TeamId, protocol::WebSocketBroadcast};

const SERVER: &str = "https://chat.example.com";

async fn router_with_store() -> (RealtimeGroupEventRouter, Storage) {
    let registry = ServerConnectionRegistry::new();
    let storage = Storage::new("sqlite::memory:").await.expect("storage");
    registry.register(SERVER, storage.clone()).await;
    (RealtimeGroupEventRouter::new(registry), storage)
}

fn group_json(id: &str, display_name: &str) -> String {
    json!({
        "id": id,
        "name": "devs",
        "display_name": display_name,
        "description": "",
        "source": "ldap",
        "remote_id": "cn=devs",
        "allow_reference": true,
        "member_count": 12,
        "create_at": 1_600_000_000_000_i64,
        "update_at": 1_600_000_100_000_i64,
        "delete_at": 0
    })
    .to_string()
}

fn group_updated(group: &str) -> WebSocketMessage {
    WebSocketMessage::new(
        GroupEventKind::Updated.event_name(),
        json!({ "group": group }),
    )
}

#[tokio::test]
async fn group_updated_upserts_group() {
    let (router, storage) = router_with_store().await;

    let outcome = router
        .handle(SERVER, &group_updated(&group_json("g1", "Developers")))
        .await;
    assert_eq!(
        outcome,
        GroupEventOutcome::Applied {
            group_id: GroupId::from("g1")
        }
    );

    let stored = storage
        .group(&GroupId::from("g1"))
        .await
        .expect("group")
        .expect("stored");
    assert_eq!(stored.display_name, "Developers");
    assert_eq!(stored.member_count, 12);
    assert!(stored.allow_reference);

    router
        .handle(SERVER, &group_updated(&group_json("g1", "Engineering")))
        .await;
    let stored = storage
        .group(&GroupId::from("g1"))
        .await
        .expect("group")
        .expect("stored");
    assert_eq!(stored.display_name, "Engineering");
    assert_eq!(storage.count_groups().await.expect("count"), 1);
}

#[tokio::test]
async fn custom_group_with_null_remote_id_is_applied() {
    let (router, storage) = router_with_store().await;
    let custom = json!({
        "id": "g-custom",
        "name": "qa",
        "display_name": "QA",
        "description": "",
        "source": "custom",
        "remote_id": null,
        "allow_reference": true,
        "member_count": 3,
        "create_at": 1_600_000_000_000_i64,
        "update_at": 1_600_000_000_000_i64,
        "delete_at": 0
    })
    .to_string();

    let outcome = router.handle(SERVER, &group_updated(&custom)).await;
    assert_eq!(
        outcome,
        GroupEventOutcome::Applied {
            group_id: GroupId::from("g-custom")
        }
    );
    let stored = storage
        .group(&GroupId::from("g-custom"))
        .await
        .expect("group")
        .expect("stored");
    assert_eq!(stored.source, "custom");
    assert_eq!(stored.remote_id, None);
}

#[tokio::test]
async fn malformed_payload_is_dropped_and_router_keeps_going() {
    let (router, storage) = router_with_store().await;

    let outcome = router.handle(SERVER, &group_updated("{not json")).await;
    assert!(matches!(
        outcome,
        GroupEventOutcome::Dropped {
            kind: GroupEventKind::Updated,
            ..
        }
    ));

    let missing = WebSocketMessage::new(GroupEventKind::Updated.event_name(), json!({}));
    assert!(matches!(
        router.handle(SERVER, &missing).await,
        GroupEventOutcome::Dropped { .. }
    ));
    assert_eq!(storage.count_groups().await.expect("count"), 0);

    let outcome = router
        .handle(SERVER, &group_updated(&group_json("g2", "Ops")))
        .await;
    assert!(matches!(outcome, GroupEventOutcome::Applied { .. }));
    assert_eq!(storage.count_groups().await.expect("count"), 1);
}

#[tokio::test]
async fn association_events_are_recognised_but_not_applied() {
    let (router, storage) = router_with_store().await;

    for kind in [
        GroupEventKind::AssociatedToTeam,
        GroupEventKind::NotAssociatedToTeam,
        GroupEventKind::AssociatedToChannel,
        GroupEventKind::NotAssociatedToChannel,
    ] {
        let mut msg = WebSocketMessage::new(kind.event_name(), json!({ "group_id": "g1" }));
        msg.broadcast = WebSocketBroadcast {
            team_id: Some(TeamId::from("team-1")),
            ..WebSocketBroadcast::default()
        };
        assert_eq!(
            router.handle(SERVER, &msg).await,
            GroupEventOutcome::NotYetHandled(kind)
        );
    }
    assert_eq!(storage.count_groups().await.expect("count"), 0);
}

#[tokio::test]
async fn events_for_unknown_server_are_not_applied() {
    let (router, storage) = router_with_store().await;

    let outcome = router
        .handle("https://other.example.com", &group_updated(&group_json("g1", "x")))
        .await;
    assert_eq!(outcome, GroupEventOutcome::ServerNotFound);
    assert_eq!(storage.count_groups().await.expect("count"), 0);
}

#[tokio::test]
async fn non_group_events_are_ignored() {
    let (router, _storage) = router_with_store().await;
    let msg = WebSocketMessage::new("posted", json!({ "post": "{}" }));
    assert_eq!(router.handle(SERVER, &msg).await, GroupEventOutcome::Ignored);
}

#[tokio::test]
async fn run_counts_outcomes_over_a_stream() {
    let (router, storage) = router_with_store().await;

    let events = futures::stream::iter(vec![
        WebSocketMessage::new("hello", json!({})),
        group_updated("garbage"),
        group_updated(&group_json("g1", "One")),
        WebSocketMessage::new(
            GroupEventKind::AssociatedToChannel.event_name(),
            json!({ "group_id": "g1" }),
        ),
        group_updated(&group_json("g2", "Two")),
    ]);

    let stats = router.run(SERVER, events).await;
    assert_eq!(
        stats,
        RouterStats {
            applied: 2,
            dropped: 1,
            not_yet_handled: 1,
            server_not_found: 0,
            ignored: 1,
        }
    );
    assert_eq!(storage.count_groups().await.expect("count"), 2);
}
