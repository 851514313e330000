use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
    Pool, Row, Sqlite, Transaction,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::{
    domain::{ChannelId, GroupId, PostId, ServerConfig, TeamId, ThreadId, ThreadParticipant, UserId},
    protocol::{Group, RawParticipant, RawThread},
};

pub mod reconcile;

pub use reconcile::{reconcile, ParticipantDelta};

const CURRENT_USER_ID_KEY: &str = "currentUserId";
const CONFIG_KEY: &str = "config";

/// Local replica of one server's thread state.
#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredThread {
    pub id: ThreadId,
    pub team_id: TeamId,
    pub root_post_id: PostId,
    pub channel_id: Option<ChannelId>,
    pub last_reply_at: i64,
    pub last_viewed_at: i64,
    pub reply_count: i64,
    pub unread_replies: i64,
    pub unread_mentions: i64,
    pub is_following: bool,
}

/// Range of reply timestamps covered by successful fetches for a team.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamThreadsSync {
    pub team_id: TeamId,
    pub earliest: i64,
    pub latest: i64,
    pub synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub threads: usize,
    pub participants_created: usize,
    pub participants_deleted: usize,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool_options = if is_in_memory(database_url) {
            // An in-memory database lives and dies with its single connection.
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };
        let pool = pool_options.connect_with(connect_options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    async fn system_value(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM system WHERE id = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read system value '{key}'"))?;
        Ok(row.map(|r| r.get::<String, _>(0)))
    }

    async fn set_system_value(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO system (id, value) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET value=excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write system value '{key}'"))?;
        Ok(())
    }

    pub async fn current_user_id(&self) -> Result<Option<UserId>> {
        Ok(self
            .system_value(CURRENT_USER_ID_KEY)
            .await?
            .filter(|id| !id.is_empty())
            .map(UserId))
    }

    pub async fn set_current_user_id(&self, user_id: &UserId) -> Result<()> {
        self.set_system_value(CURRENT_USER_ID_KEY, user_id.as_str())
            .await
    }

    pub async fn clear_current_user_id(&self) -> Result<()> {
        sqlx::query("DELETE FROM system WHERE id = ?")
            .bind(CURRENT_USER_ID_KEY)
            .execute(&self.pool)
            .await
            .context("failed to clear current user")?;
        Ok(())
    }

    /// Stored server config, or the default (empty version) when none was saved.
    pub async fn server_config(&self) -> Result<ServerConfig> {
        match self.system_value(CONFIG_KEY).await? {
            Some(raw) => serde_json::from_str(&raw).context("stored server config is not valid json"),
            None => Ok(ServerConfig::default()),
        }
    }

    pub async fn set_server_config(&self, config: &ServerConfig) -> Result<()> {
        let raw = serde_json::to_string(config)?;
        self.set_system_value(CONFIG_KEY, &raw).await
    }

    /// Persists one fetched page: thread rows, participant profiles and the
    /// participant set of every thread, reconciled against what is stored.
    /// Everything lands in a single transaction.
    pub async fn ingest_threads(
        &self,
        team_id: &TeamId,
        threads: &[RawThread],
    ) -> Result<IngestSummary> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("failed to begin thread ingestion")?;
        let mut summary = IngestSummary::default();

        for thread in threads {
            upsert_thread(&mut tx, team_id, thread).await?;
            upsert_users(&mut tx, &thread.participants).await?;

            let existing = participants_in(&mut tx, &thread.id).await?;
            let delta = reconcile(&existing, &thread.participants);
            apply_participant_delta(&mut tx, &thread.id, &delta).await?;

            summary.threads += 1;
            summary.participants_created += delta.to_create.len();
            summary.participants_deleted += delta.to_delete.len();
        }

        let earliest = threads.iter().map(|t| t.last_reply_at).min();
        let latest = threads.iter().map(|t| t.last_reply_at).max();
        if let (Some(earliest), Some(latest)) = (earliest, latest) {
            sqlx::query(
                "INSERT INTO team_threads_sync (team_id, earliest, latest, synced_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(team_id) DO UPDATE SET
                    earliest=MIN(team_threads_sync.earliest, excluded.earliest),
                    latest=MAX(team_threads_sync.latest, excluded.latest),
                    synced_at=excluded.synced_at",
            )
            .bind(team_id.as_str())
            .bind(earliest)
            .bind(latest)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .context("failed to advance team threads sync window")?;
        }

        tx.commit()
            .await
            .context("failed to commit thread ingestion")?;
        Ok(summary)
    }

    pub async fn thread(&self, thread_id: &ThreadId) -> Result<Option<StoredThread>> {
        let row = sqlx::query(
            "SELECT id, team_id, root_post_id, channel_id, last_reply_at, last_viewed_at,
                    reply_count, unread_replies, unread_mentions, is_following
             FROM threads WHERE id = ?",
        )
        .bind(thread_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.as_ref().map(stored_thread_from_row))
    }

    /// Threads of a team, most recently replied first.
    pub async fn list_threads_for_team(&self, team_id: &TeamId) -> Result<Vec<StoredThread>> {
        let rows = sqlx::query(
            "SELECT id, team_id, root_post_id, channel_id, last_reply_at, last_viewed_at,
                    reply_count, unread_replies, unread_mentions, is_following
             FROM threads
             WHERE team_id = ?
             ORDER BY last_reply_at DESC, id ASC",
        )
        .bind(team_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(stored_thread_from_row).collect())
    }

    pub async fn participants_for_thread(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<ThreadParticipant>> {
        let rows = sqlx::query(
            "SELECT thread_id, user_id FROM thread_participants WHERE thread_id = ? ORDER BY user_id ASC",
        )
        .bind(thread_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(participant_from_row).collect())
    }

    pub async fn username_for_user(&self, user_id: &UserId) -> Result<Option<String>> {
        let row = sqlx::query("SELECT username FROM users WHERE id = ?")
            .bind(user_id.as_str())
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|r| r.get::<Option<String>, _>(0)))
    }

    pub async fn team_threads_sync(&self, team_id: &TeamId) -> Result<Option<TeamThreadsSync>> {
        let row = sqlx::query(
            "SELECT team_id, earliest, latest, synced_at FROM team_threads_sync WHERE team_id = ?",
        )
        .bind(team_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| TeamThreadsSync {
            team_id: TeamId(r.get::<String, _>(0)),
            earliest: r.get::<i64, _>(1),
            latest: r.get::<i64, _>(2),
            synced_at: r.get::<DateTime<Utc>, _>(3),
        }))
    }

    /// Inserts or replaces groups and commits right away.
    pub async fn upsert_groups(&self, groups: &[Group]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for group in groups {
            sqlx::query(
                "INSERT INTO groups (id, name, display_name, description, source, remote_id,
                                     allow_reference, member_count, create_at, update_at, delete_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                 ON CONFLICT(id) DO UPDATE SET
                    name=excluded.name,
                    display_name=excluded.display_name,
                    description=excluded.description,
                    source=excluded.source,
                    remote_id=excluded.remote_id,
                    allow_reference=excluded.allow_reference,
                    member_count=excluded.member_count,
                    create_at=excluded.create_at,
                    update_at=excluded.update_at,
                    delete_at=excluded.delete_at",
            )
            .bind(group.id.as_str())
            .bind(&group.name)
            .bind(&group.display_name)
            .bind(&group.description)
            .bind(&group.source)
            .bind(group.remote_id.as_deref())
            .bind(group.allow_reference)
            .bind(group.member_count)
            .bind(group.create_at)
            .bind(group.update_at)
            .bind(group.delete_at)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("failed to upsert group {}", group.id))?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn group(&self, group_id: &GroupId) -> Result<Option<Group>> {
        let row = sqlx::query(
            "SELECT id, name, display_name, description, source, remote_id,
                    allow_reference, member_count, create_at, update_at, delete_at
             FROM groups WHERE id = ?",
        )
        .bind(group_id.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| Group {
            id: GroupId(r.get::<String, _>(0)),
            name: r.get::<String, _>(1),
            display_name: r.get::<String, _>(2),
            description: r.get::<String, _>(3),
            source: r.get::<String, _>(4),
            remote_id: r.get::<Option<String>, _>(5),
            allow_reference: r.get::<bool, _>(6),
            member_count: r.get::<i64, _>(7),
            create_at: r.get::<i64, _>(8),
            update_at: r.get::<i64, _>(9),
            delete_at: r.get::<i64, _>(10),
        }))
    }

    pub async fn count_groups(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM groups")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

async fn upsert_thread(
    tx: &mut Transaction<'_, Sqlite>,
    team_id: &TeamId,
    thread: &RawThread,
) -> Result<()> {
    let root_post_id = thread
        .post
        .as_ref()
        .map(|post| post.id.as_str())
        .unwrap_or(thread.id.as_str());
    let channel_id = thread
        .post
        .as_ref()
        .and_then(|post| post.channel_id.as_ref())
        .map(ChannelId::as_str);

    sqlx::query(
        "INSERT INTO threads (id, team_id, root_post_id, channel_id, last_reply_at, last_viewed_at,
                              reply_count, unread_replies, unread_mentions, is_following)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            team_id=excluded.team_id,
            root_post_id=excluded.root_post_id,
            channel_id=COALESCE(excluded.channel_id, threads.channel_id),
            last_reply_at=excluded.last_reply_at,
            last_viewed_at=excluded.last_viewed_at,
            reply_count=excluded.reply_count,
            unread_replies=excluded.unread_replies,
            unread_mentions=excluded.unread_mentions,
            is_following=excluded.is_following",
    )
    .bind(thread.id.as_str())
    .bind(team_id.as_str())
    .bind(root_post_id)
    .bind(channel_id)
    .bind(thread.last_reply_at)
    .bind(thread.last_viewed_at)
    .bind(thread.reply_count.max(0))
    .bind(thread.unread_replies.max(0))
    .bind(thread.unread_mentions.max(0))
    .bind(thread.is_following)
    .execute(&mut **tx)
    .await
    .with_context(|| format!("failed to upsert thread {}", thread.id))?;
    Ok(())
}

async fn upsert_users(
    tx: &mut Transaction<'_, Sqlite>,
    participants: &[RawParticipant],
) -> Result<()> {
    for participant in participants {
        sqlx::query(
            "INSERT INTO users (id, username) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET username=COALESCE(excluded.username, users.username)",
        )
        .bind(participant.id.as_str())
        .bind(participant.username.as_deref())
        .execute(&mut **tx)
        .await
        .with_context(|| format!("failed to upsert user {}", participant.id))?;
    }
    Ok(())
}

async fn participants_in(
    tx: &mut Transaction<'_, Sqlite>,
    thread_id: &ThreadId,
) -> Result<Vec<ThreadParticipant>> {
    let rows = sqlx::query("SELECT thread_id, user_id FROM thread_participants WHERE thread_id = ?")
        .bind(thread_id.as_str())
        .fetch_all(&mut **tx)
        .await
        .with_context(|| format!("failed to load participants of thread {thread_id}"))?;
    Ok(rows.iter().map(participant_from_row).collect())
}

async fn apply_participant_delta(
    tx: &mut Transaction<'_, Sqlite>,
    thread_id: &ThreadId,
    delta: &ParticipantDelta,
) -> Result<()> {
    for participant in &delta.to_delete {
        sqlx::query("DELETE FROM thread_participants WHERE thread_id = ? AND user_id = ?")
            .bind(participant.thread_id.as_str())
            .bind(participant.user_id.as_str())
            .execute(&mut **tx)
            .await?;
    }
    for participant in &delta.to_create {
        sqlx::query(
            "INSERT INTO thread_participants (thread_id, user_id) VALUES (?, ?)
             ON CONFLICT(thread_id, user_id) DO NOTHING",
        )
        .bind(thread_id.as_str())
        .bind(participant.id.as_str())
        .execute(&mut **tx)
        .await?;
    }
    Ok(())
}

fn stored_thread_from_row(r: &SqliteRow) -> StoredThread {
    StoredThread {
        id: ThreadId(r.get::<String, _>(0)),
        team_id: TeamId(r.get::<String, _>(1)),
        root_post_id: PostId(r.get::<String, _>(2)),
        channel_id: r.get::<Option<String>, _>(3).map(ChannelId),
        last_reply_at: r.get::<i64, _>(4),
        last_viewed_at: r.get::<i64, _>(5),
        reply_count: r.get::<i64, _>(6),
        unread_replies: r.get::<i64, _>(7),
        unread_mentions: r.get::<i64, _>(8),
        is_following: r.get::<bool, _>(9),
    }
}

fn participant_from_row(r: &SqliteRow) -> ThreadParticipant {
    ThreadParticipant {
        thread_id: ThreadId(r.get::<String, _>(0)),
        user_id: UserId(r.get::<String, _>(1)),
    }
}

fn is_in_memory(database_url: &str) -> bool {
    database_url.starts_with("sqlite::memory:") || database_url.contains("mode=memory")
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    if parent.as_os_str().is_empty() {
        return Ok(());
    }

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if is_in_memory(database_url) || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
