use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use client_core::{
    load_settings, spawn_group_event_listener, ClientSettings, FetchThreadsOutcome,
    FetchThreadsRequest, RealtimeGroupEventRouter, ServerConnectionRegistry,
    ThreadFetchCoordinator,
};
use serde_json::json;
use shared::{
    domain::{ServerConfig, TeamId, ThreadId, UserId},
    protocol::RawThread,
};
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "thread-sync", about = "Local thread replica for chat servers")]
struct Cli {
    /// Overrides `data_dir` from the settings file.
    #[arg(long)]
    data_dir: Option<std::path::PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Records the logged-in user and server version for a server.
    SeedSession {
        #[arg(long)]
        server_url: String,
        #[arg(long)]
        user_id: String,
        #[arg(long, default_value = "")]
        server_version: String,
    },
    FetchThreads {
        #[arg(long)]
        server_url: String,
        #[arg(long)]
        team_id: String,
        #[arg(long, env = "THREAD_SYNC_TOKEN")]
        token: Option<String>,
        #[arg(long)]
        before: Option<String>,
        #[arg(long)]
        after: Option<String>,
        #[arg(long)]
        per_page: Option<u32>,
        #[arg(long)]
        deleted: bool,
        #[arg(long)]
        unread: bool,
        #[arg(long, default_value_t = 0)]
        since: i64,
    },
    ListThreads {
        #[arg(long)]
        server_url: String,
        #[arg(long)]
        team_id: String,
    },
    Participants {
        #[arg(long)]
        server_url: String,
        #[arg(long)]
        thread_id: String,
    },
    /// Applies realtime group events until the socket closes.
    Listen {
        #[arg(long)]
        server_url: String,
        #[arg(long, env = "THREAD_SYNC_TOKEN")]
        token: String,
    },
}

async fn open_storage(settings: &ClientSettings, server_url: &str) -> Result<Storage> {
    let database_url = settings.database_url_for_server(server_url);
    let storage = Storage::new(&database_url)
        .await
        .with_context(|| format!("failed to open local store {database_url}"))?;
    storage.health_check().await?;
    Ok(storage)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    let mut settings = load_settings();
    if let Some(data_dir) = cli.data_dir {
        settings.data_dir = data_dir;
    }

    match cli.command {
        Command::SeedSession {
            server_url,
            user_id,
            server_version,
        } => {
            let storage = open_storage(&settings, &server_url).await?;
            storage.set_current_user_id(&UserId::new(user_id)).await?;
            storage
                .set_server_config(&ServerConfig::with_version(server_version))
                .await?;
            info!(%server_url, "session seeded");
        }
        Command::FetchThreads {
            server_url,
            team_id,
            token,
            before,
            after,
            per_page,
            deleted,
            unread,
            since,
        } => {
            let registry = ServerConnectionRegistry::new();
            registry
                .register(&server_url, open_storage(&settings, &server_url).await?)
                .await;
            registry
                .attach_http_client(&server_url, token, settings.request_timeout())
                .await?;

            let mut request = FetchThreadsRequest::new(TeamId::new(team_id))
                .per_page(per_page.unwrap_or(settings.threads_per_page))
                .deleted(deleted)
                .unread(unread)
                .since(since);
            if let Some(before) = before {
                request = request.before(ThreadId::new(before));
            }
            if let Some(after) = after {
                request = request.after(ThreadId::new(after));
            }

            let coordinator = ThreadFetchCoordinator::new(Arc::clone(&registry), &settings);
            let outcome = coordinator.fetch_threads(&server_url, request).await;
            println!("{}", serde_json::to_string_pretty(&outcome.to_envelope())?);
            if let Some(page) = outcome.page() {
                info!(
                    next_before = ?page.next_before(),
                    next_after = ?page.next_after(),
                    newest_reply_at = ?page.threads.first().and_then(RawThread::last_reply_at_utc),
                    "page cursors"
                );
            }
            if let FetchThreadsOutcome::Failed(err) = outcome {
                return Err(err.into());
            }
        }
        Command::ListThreads {
            server_url,
            team_id,
        } => {
            let storage = open_storage(&settings, &server_url).await?;
            for thread in storage.list_threads_for_team(&TeamId::new(team_id)).await? {
                println!(
                    "{}",
                    json!({
                        "id": thread.id,
                        "channel_id": thread.channel_id,
                        "last_reply_at": thread.last_reply_at,
                        "reply_count": thread.reply_count,
                        "unread_replies": thread.unread_replies,
                        "unread_mentions": thread.unread_mentions,
                        "is_following": thread.is_following,
                    })
                );
            }
        }
        Command::Participants {
            server_url,
            thread_id,
        } => {
            let storage = open_storage(&settings, &server_url).await?;
            for participant in storage
                .participants_for_thread(&ThreadId::new(thread_id))
                .await?
            {
                let username = storage.username_for_user(&participant.user_id).await?;
                println!(
                    "{}",
                    json!({ "user_id": participant.user_id, "username": username })
                );
            }
        }
        Command::Listen { server_url, token } => {
            let registry = ServerConnectionRegistry::new();
            registry
                .register(&server_url, open_storage(&settings, &server_url).await?)
                .await;
            let router = Arc::new(RealtimeGroupEventRouter::new(registry));
            let handle = spawn_group_event_listener(router, &server_url, &token).await?;
            let stats = handle.await.context("listener task failed")?;
            println!(
                "{}",
                json!({
                    "applied": stats.applied,
                    "dropped": stats.dropped,
                    "not_yet_handled": stats.not_yet_handled,
                    "server_not_found": stats.server_not_found,
                    "ignored": stats.ignored,
                })
            );
        }
    }

    Ok(())
}
