use super::*;
use shared::protocol::RawPost;

fn raw_thread(id: &str, last_reply_at: i64, participants: &[&str]) -> RawThread {
    RawThread {
        id: ThreadId::from(id),
        reply_count: participants.len() as i64,
        last_reply_at,
        last_viewed_at: 0,
        participants: participants
            .iter()
            .map(|user| RawParticipant::new(*user))
            .collect(),
        post: None,
        unread_replies: 0,
        unread_mentions: 0,
        is_following: true,
    }
}

fn user_ids(participants: &[ThreadParticipant]) -> Vec<&str> {
    participants.iter().map(|p| p.user_id.as_str()).collect()
}

fn sample_group(id: &str, display_name: &str) -> Group {
    Group {
        id: GroupId::from(id),
        name: format!("{id}-name"),
        display_name: display_name.to_string(),
        description: String::new(),
        source: "ldap".into(),
        remote_id: Some(format!("{id}-remote")),
        allow_reference: true,
        member_count: 3,
        create_at: 1,
        update_at: 2,
        delete_at: 0,
    }
}

#[tokio::test]
async fn health_check_succeeds_for_live_pool() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage.health_check().await.expect("health check");
}

#[tokio::test]
async fn creates_database_file_when_missing() {
    let temp_root = tempfile::tempdir().expect("tempdir");
    let db_path = temp_root.path().join("nested").join("server.db");
    let database_url = format!("sqlite://{}", db_path.to_string_lossy().replace('\\', "/"));

    let storage = Storage::new(&database_url).await.expect("db");
    drop(storage);

    assert!(
        db_path.exists(),
        "database file should exist: {}",
        db_path.display()
    );
}

#[tokio::test]
async fn current_user_round_trips_and_clears() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert_eq!(storage.current_user_id().await.expect("read"), None);

    storage
        .set_current_user_id(&UserId::from("me"))
        .await
        .expect("set");
    assert_eq!(
        storage.current_user_id().await.expect("read"),
        Some(UserId::from("me"))
    );

    storage.clear_current_user_id().await.expect("clear");
    assert_eq!(storage.current_user_id().await.expect("read"), None);
}

#[tokio::test]
async fn server_config_defaults_to_empty_version() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    assert_eq!(
        storage.server_config().await.expect("config"),
        ServerConfig::default()
    );

    storage
        .set_server_config(&ServerConfig::with_version("7.1.0"))
        .await
        .expect("set config");
    assert_eq!(
        storage.server_config().await.expect("config").version,
        "7.1.0"
    );
}

#[tokio::test]
async fn ingest_creates_threads_and_participants() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let team = TeamId::from("team-a");
    let mut thread = raw_thread("t1", 1_000, &["alice", "bob"]);
    thread.participants[0].username = Some("alice".into());
    thread.post = Some(RawPost {
        id: PostId::from("t1"),
        channel_id: Some(ChannelId::from("town-square")),
        user_id: Some(UserId::from("alice")),
        message: "root".into(),
        create_at: 900,
    });

    let summary = storage
        .ingest_threads(&team, &[thread])
        .await
        .expect("ingest");
    assert_eq!(
        summary,
        IngestSummary {
            threads: 1,
            participants_created: 2,
            participants_deleted: 0,
        }
    );

    let stored = storage
        .thread(&ThreadId::from("t1"))
        .await
        .expect("load")
        .expect("thread exists");
    assert_eq!(stored.team_id, team);
    assert_eq!(stored.channel_id, Some(ChannelId::from("town-square")));
    assert_eq!(stored.reply_count, 2);
    assert!(stored.is_following);

    let participants = storage
        .participants_for_thread(&ThreadId::from("t1"))
        .await
        .expect("participants");
    assert_eq!(user_ids(&participants), vec!["alice", "bob"]);
    assert_eq!(
        storage
            .username_for_user(&UserId::from("alice"))
            .await
            .expect("username"),
        Some("alice".to_string())
    );
}

#[tokio::test]
async fn reingest_converges_participants_to_latest_snapshot() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let team = TeamId::from("team-a");

    storage
        .ingest_threads(&team, &[raw_thread("t1", 1_000, &["alice", "bob"])])
        .await
        .expect("first ingest");
    let summary = storage
        .ingest_threads(&team, &[raw_thread("t1", 2_000, &["bob", "carol", "carol"])])
        .await
        .expect("second ingest");
    assert_eq!(summary.participants_created, 1);
    assert_eq!(summary.participants_deleted, 1);

    let participants = storage
        .participants_for_thread(&ThreadId::from("t1"))
        .await
        .expect("participants");
    assert_eq!(user_ids(&participants), vec!["bob", "carol"]);

    let unchanged = storage
        .ingest_threads(&team, &[raw_thread("t1", 2_000, &["carol", "bob"])])
        .await
        .expect("third ingest");
    assert_eq!(unchanged.participants_created, 0);
    assert_eq!(unchanged.participants_deleted, 0);
}

#[tokio::test]
async fn ingest_never_deletes_threads_missing_from_a_page() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let team = TeamId::from("team-a");

    storage
        .ingest_threads(
            &team,
            &[raw_thread("t1", 1_000, &["alice"]), raw_thread("t2", 3_000, &["bob"])],
        )
        .await
        .expect("first page");
    storage
        .ingest_threads(&team, &[raw_thread("t3", 2_000, &[])])
        .await
        .expect("second page");

    let threads = storage.list_threads_for_team(&team).await.expect("list");
    let ids: Vec<&str> = threads.iter().map(|t| t.id.as_str()).collect();
    assert_eq!(ids, vec!["t2", "t3", "t1"]);
}

#[tokio::test]
async fn sync_window_widens_across_pages() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let team = TeamId::from("team-a");
    assert!(storage
        .team_threads_sync(&team)
        .await
        .expect("read")
        .is_none());

    storage
        .ingest_threads(
            &team,
            &[raw_thread("t1", 5_000, &[]), raw_thread("t2", 4_000, &[])],
        )
        .await
        .expect("newest page");
    storage
        .ingest_threads(&team, &[raw_thread("t3", 1_000, &[])])
        .await
        .expect("older page");
    storage.ingest_threads(&team, &[]).await.expect("empty page");

    let window = storage
        .team_threads_sync(&team)
        .await
        .expect("read")
        .expect("window");
    assert_eq!(window.earliest, 1_000);
    assert_eq!(window.latest, 5_000);
    assert!(window.synced_at <= Utc::now());
}

#[tokio::test]
async fn upsert_groups_replaces_existing_row() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    storage
        .upsert_groups(&[sample_group("g1", "Developers")])
        .await
        .expect("insert");
    storage
        .upsert_groups(&[sample_group("g1", "Platform Developers")])
        .await
        .expect("update");

    let group = storage
        .group(&GroupId::from("g1"))
        .await
        .expect("load")
        .expect("group exists");
    assert_eq!(group.display_name, "Platform Developers");
    assert_eq!(group.member_count, 3);
    assert_eq!(storage.count_groups().await.expect("count"), 1);
}

#[tokio::test]
async fn group_without_remote_id_is_stored() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let mut custom = sample_group("g2", "Custom");
    custom.source = "custom".into();
    custom.remote_id = None;
    storage
        .upsert_groups(std::slice::from_ref(&custom))
        .await
        .expect("insert");

    let group = storage
        .group(&GroupId::from("g2"))
        .await
        .expect("load")
        .expect("group exists");
    assert_eq!(group, custom);
}
