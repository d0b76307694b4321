//! Usher CLI - Offline-first client for the event registration backend.
//!
//! Reads are served from the local cache when fresh enough; writes that hit
//! a dead network are queued and replayed on the next sync.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use usher_api::types::{Event, Role};
use usher_api::{HttpEventService, StaticToken, TokenProvider};
use usher_client::{EventClient, Freshness};
use usher_common::{EventId, UserId};
use usher_net::{ConnectivityMonitor, HttpProbe, MonitorConfig};
use usher_sync::SyncConfig;

#[derive(Parser)]
#[command(name = "usher")]
#[command(about = "Usher - Offline-first event registration client")]
#[command(version)]
struct Cli {
    /// Backend base URL.
    #[arg(long, env = "USHER_BASE_URL", default_value = "http://localhost:8080")]
    base_url: String,

    /// Bearer token for authenticated endpoints.
    #[arg(long, env = "USHER_TOKEN")]
    token: Option<String>,

    /// Directory for the cache and queue registries.
    #[arg(long, env = "USHER_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show connectivity, pending queue and cache state.
    Status,

    /// List events.
    Events {
        /// Only events in this category.
        #[arg(short, long)]
        category: Option<String>,

        /// Only events that have not started yet.
        #[arg(short, long)]
        upcoming: bool,

        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// Show one event.
    Event {
        /// Event id.
        id: i64,

        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// List the events you are subscribed to.
    Subscriptions {
        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// List your attendance history.
    Attendances {
        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// Show the authenticated account.
    Me {
        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// Show a page of your audit log.
    Logs {
        /// Page number, starting at 0.
        #[arg(short, long, default_value_t = 0)]
        page: u32,

        /// Entries per page.
        #[arg(short, long, default_value_t = 20)]
        size: u32,

        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// List user accounts (admin).
    Users {
        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// List who is registered for an event (admin).
    Registrations {
        /// Event id.
        event: i64,

        /// Skip the cache and go to the network.
        #[arg(short, long)]
        refresh: bool,
    },

    /// Subscribe to an event. Queued for replay when offline.
    Subscribe {
        /// Event id.
        event: i64,
    },

    /// Cancel a subscription. Fails when offline; never queued.
    Unsubscribe {
        /// Event id.
        event: i64,
    },

    /// Create an account and register it for an event (admin).
    /// Queued for replay when offline.
    Register {
        /// Person's name.
        #[arg(short, long)]
        name: String,

        /// Person's email.
        #[arg(short, long)]
        email: String,

        /// Event id.
        #[arg(long)]
        event: i64,
    },

    /// Record attendance for a user at an event (admin).
    /// Queued for replay when offline.
    Attend {
        /// User id.
        #[arg(long)]
        user: i64,

        /// Event id.
        #[arg(long)]
        event: i64,

        /// Mark the user absent instead of present.
        #[arg(long)]
        absent: bool,
    },

    /// List operations waiting for replay.
    Pending,

    /// Drop every operation waiting for replay.
    ClearPending,

    /// Replay queued operations now.
    Sync,

    /// Warm the cache with the standard read set.
    Preload,

    /// Show what the cache holds.
    CacheInfo,

    /// Remove cache entries.
    ClearCache {
        /// Only remove entries past their time-to-live.
        #[arg(long)]
        expired_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let client = build_client(&cli).await?;

    match cli.command {
        Commands::Status => cmd_status(&client).await,

        Commands::Events {
            category,
            upcoming,
            refresh,
        } => cmd_events(&client, category.as_deref(), upcoming, refresh).await,

        Commands::Event { id, refresh } => cmd_event(&client, id, refresh).await,

        Commands::Subscriptions { refresh } => cmd_subscriptions(&client, refresh).await,

        Commands::Attendances { refresh } => cmd_attendances(&client, refresh).await,

        Commands::Me { refresh } => cmd_me(&client, refresh).await,

        Commands::Logs {
            page,
            size,
            refresh,
        } => cmd_logs(&client, page, size, refresh).await,

        Commands::Users { refresh } => cmd_users(&client, refresh).await,

        Commands::Registrations { event, refresh } => {
            cmd_registrations(&client, event, refresh).await
        }

        Commands::Subscribe { event } => cmd_subscribe(&client, event).await,

        Commands::Unsubscribe { event } => cmd_unsubscribe(&client, event).await,

        Commands::Register { name, email, event } => {
            cmd_register(&client, &name, &email, event).await
        }

        Commands::Attend {
            user,
            event,
            absent,
        } => cmd_attend(&client, user, event, !absent).await,

        Commands::Pending => cmd_pending(&client).await,

        Commands::ClearPending => cmd_clear_pending(&client).await,

        Commands::Sync => cmd_sync(&client).await,

        Commands::Preload => cmd_preload(&client).await,

        Commands::CacheInfo => cmd_cache_info(&client).await,

        Commands::ClearCache { expired_only } => cmd_clear_cache(&client, expired_only).await,
    }
}

/// Wire the HTTP service, connectivity monitor and local registries.
async fn build_client(cli: &Cli) -> Result<EventClient<HttpEventService>> {
    let data_dir = match &cli.data_dir {
        Some(dir) => dir.clone(),
        None => dirs::data_dir()
            .context("Could not determine a data directory; pass --data-dir")?
            .join("usher"),
    };
    info!("Using data directory: {}", data_dir.display());

    let tokens: Arc<dyn TokenProvider> = match &cli.token {
        Some(token) => Arc::new(StaticToken::new(token)),
        None => Arc::new(StaticToken::anonymous()),
    };
    let service = Arc::new(HttpEventService::new(&cli.base_url, tokens));

    let probe = Arc::new(HttpProbe::new(&cli.base_url));
    let (monitor, driver) = ConnectivityMonitor::new(probe, MonitorConfig::default());
    tokio::spawn(driver.run());

    EventClient::new(service, monitor, &data_dir, SyncConfig::default())
        .await
        .context("Failed to open the local registries")
}

fn freshness(refresh: bool) -> Freshness {
    if refresh {
        Freshness::ForceRefresh
    } else {
        Freshness::CachePreferred
    }
}

fn print_event(event: &Event) {
    let category = event.category.as_deref().unwrap_or("-");
    println!(
        "  [{}] {}  {} ({})",
        event.id,
        event.starts_at.format("%Y-%m-%d %H:%M"),
        event.title,
        category
    );
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::Admin => "admin",
        Role::User => "user",
    }
}

/// Show connectivity, queue and cache state.
async fn cmd_status(client: &EventClient<HttpEventService>) -> Result<()> {
    let state = client
        .monitor()
        .probe_now()
        .await
        .context("Connectivity monitor is not running")?;

    if state.is_reachable {
        println!("Backend: reachable");
    } else {
        println!("Backend: unreachable");
    }
    println!(
        "  Last transition: {}",
        state.last_transition_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!("  Pending operations: {}", client.pending_count().await);
    println!("  Cached entries: {}", client.cache_len().await);

    Ok(())
}

/// List events, optionally filtered.
async fn cmd_events(
    client: &EventClient<HttpEventService>,
    category: Option<&str>,
    upcoming: bool,
    refresh: bool,
) -> Result<()> {
    let events = match (category, upcoming) {
        (Some(category), _) => {
            client
                .events_by_category(category, freshness(refresh))
                .await
        }
        (None, true) => client.upcoming_events(freshness(refresh)).await,
        (None, false) => client.events(freshness(refresh)).await,
    }
    .context("Failed to list events")?;

    if events.is_empty() {
        println!("No events.");
    } else {
        println!("Events:");
        for event in &events {
            print_event(event);
        }
    }

    Ok(())
}

/// Show one event in full.
async fn cmd_event(client: &EventClient<HttpEventService>, id: i64, refresh: bool) -> Result<()> {
    let event = client
        .event(EventId::new(id), freshness(refresh))
        .await
        .context("Failed to fetch the event")?;

    println!("Event {}:", event.id);
    println!("  Title: {}", event.title);
    if let Some(description) = &event.description {
        println!("  Description: {}", description);
    }
    println!(
        "  Category: {}",
        event.category.as_deref().unwrap_or("none")
    );
    println!(
        "  Location: {}",
        event.location.as_deref().unwrap_or("none")
    );
    println!("  Starts: {}", event.starts_at.format("%Y-%m-%d %H:%M"));
    if let Some(ends_at) = event.ends_at {
        println!("  Ends: {}", ends_at.format("%Y-%m-%d %H:%M"));
    }
    if let Some(capacity) = event.capacity {
        println!("  Capacity: {}", capacity);
    }
    println!("  Active: {}", event.active);

    Ok(())
}

/// List the caller's subscriptions.
async fn cmd_subscriptions(client: &EventClient<HttpEventService>, refresh: bool) -> Result<()> {
    let subscriptions = client
        .my_subscriptions(freshness(refresh))
        .await
        .context("Failed to list subscriptions")?;

    if subscriptions.is_empty() {
        println!("No subscriptions.");
    } else {
        println!("Subscriptions:");
        for subscription in &subscriptions {
            print_event(&subscription.event);
            println!(
                "      subscribed {}",
                subscription.subscribed_at.format("%Y-%m-%d %H:%M")
            );
        }
    }

    Ok(())
}

/// List the caller's attendance history.
async fn cmd_attendances(client: &EventClient<HttpEventService>, refresh: bool) -> Result<()> {
    let attendances = client
        .my_attendances(freshness(refresh))
        .await
        .context("Failed to list attendances")?;

    if attendances.is_empty() {
        println!("No attendance records.");
    } else {
        println!("Attendance:");
        for record in &attendances {
            let mark = if record.present { "present" } else { "absent" };
            let confirmed = record
                .confirmed_at
                .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_else(|| "pending sync".to_string());
            println!("  event {}  {}  ({})", record.event_id, mark, confirmed);
        }
    }

    Ok(())
}

/// Show the authenticated account.
async fn cmd_me(client: &EventClient<HttpEventService>, refresh: bool) -> Result<()> {
    let user = client
        .current_user(freshness(refresh))
        .await
        .context("Failed to fetch the current user")?;

    println!("Signed in as:");
    println!("  Id: {}", user.id);
    println!("  Name: {}", user.name);
    println!("  Email: {}", user.email);
    println!("  Role: {}", role_name(user.role));

    Ok(())
}

/// Show a page of the caller's audit log.
async fn cmd_logs(
    client: &EventClient<HttpEventService>,
    page: u32,
    size: u32,
    refresh: bool,
) -> Result<()> {
    let logs = client
        .my_logs(page, size, freshness(refresh))
        .await
        .context("Failed to fetch logs")?;

    println!(
        "Log page {}/{} ({} entries total):",
        logs.number + 1,
        logs.total_pages.max(1),
        logs.total_elements
    );
    for entry in &logs.content {
        let detail = entry.detail.as_deref().unwrap_or("");
        println!(
            "  {}  {}  {}",
            entry.created_at.format("%Y-%m-%d %H:%M:%S"),
            entry.action,
            detail
        );
    }

    Ok(())
}

/// List user accounts.
async fn cmd_users(client: &EventClient<HttpEventService>, refresh: bool) -> Result<()> {
    let users = client
        .users(freshness(refresh))
        .await
        .context("Failed to list users")?;

    if users.is_empty() {
        println!("No users.");
    } else {
        println!("Users:");
        for user in &users {
            println!(
                "  [{}] {} <{}> {}",
                user.id,
                user.name,
                user.email,
                role_name(user.role)
            );
        }
    }

    Ok(())
}

/// List registrations for an event.
async fn cmd_registrations(
    client: &EventClient<HttpEventService>,
    event: i64,
    refresh: bool,
) -> Result<()> {
    let rows = client
        .registrations(EventId::new(event), freshness(refresh))
        .await
        .context("Failed to list registrations")?;

    if rows.is_empty() {
        println!("No registrations.");
    } else {
        println!("Registrations for event {}:", event);
        for row in &rows {
            let mark = if row.present { "[x]" } else { "[ ]" };
            println!("  {} [{}] {} <{}>", mark, row.user_id, row.name, row.email);
        }
    }

    Ok(())
}

/// Subscribe to an event.
async fn cmd_subscribe(client: &EventClient<HttpEventService>, event: i64) -> Result<()> {
    let before = client.pending_count().await;
    let subscribed = client
        .subscribe(EventId::new(event))
        .await
        .context("Failed to subscribe")?;

    if client.pending_count().await > before {
        println!("No connectivity; subscription to event {} queued for replay.", event);
    } else {
        println!("Subscribed to event {}: {}", subscribed.id, subscribed.title);
    }

    Ok(())
}

/// Cancel a subscription.
async fn cmd_unsubscribe(client: &EventClient<HttpEventService>, event: i64) -> Result<()> {
    client
        .cancel_subscription(EventId::new(event))
        .await
        .context("Failed to cancel the subscription")?;

    println!("Subscription to event {} cancelled.", event);

    Ok(())
}

/// Quick-register a person for an event.
async fn cmd_register(
    client: &EventClient<HttpEventService>,
    name: &str,
    email: &str,
    event: i64,
) -> Result<()> {
    let before = client.pending_count().await;
    let user = client
        .quick_register(name, email, EventId::new(event))
        .await
        .context("Failed to register")?;

    if client.pending_count().await > before {
        println!("No connectivity; registration of {} queued for replay.", email);
    } else {
        println!("Registered {} <{}> as user {}.", user.name, user.email, user.id);
    }

    Ok(())
}

/// Record attendance.
async fn cmd_attend(
    client: &EventClient<HttpEventService>,
    user: i64,
    event: i64,
    present: bool,
) -> Result<()> {
    let before = client.pending_count().await;
    let record = client
        .mark_attendance(UserId::new(user), EventId::new(event), present)
        .await
        .context("Failed to record attendance")?;

    let mark = if record.present { "present" } else { "absent" };
    if client.pending_count().await > before {
        println!("No connectivity; attendance ({}) queued for replay.", mark);
    } else {
        println!("User {} marked {} at event {}.", user, mark, event);
    }

    Ok(())
}

/// List the pending queue.
async fn cmd_pending(client: &EventClient<HttpEventService>) -> Result<()> {
    let pending = client.pending_operations().await;

    if pending.is_empty() {
        println!("No pending operations.");
    } else {
        println!("Pending operations:");
        for op in &pending {
            println!(
                "  {}  {}  created {}  retries {}",
                op.id,
                op.request.kind(),
                op.created_at.format("%Y-%m-%d %H:%M:%S"),
                op.retry_count
            );
        }
    }

    Ok(())
}

/// Drop the pending queue.
async fn cmd_clear_pending(client: &EventClient<HttpEventService>) -> Result<()> {
    let dropped = client
        .clear_pending()
        .await
        .context("Failed to clear the pending queue")?;

    println!("Dropped {} pending operations.", dropped);

    Ok(())
}

/// Replay the pending queue.
async fn cmd_sync(client: &EventClient<HttpEventService>) -> Result<()> {
    let report = client.sync_now().await;

    println!(
        "Sync finished: {} replayed, {} still queued, {} dropped.",
        report.success,
        report.failed,
        report.evicted.len()
    );
    for failure in &report.errors {
        println!(
            "  still queued {} ({}): {}",
            failure.operation_id, failure.kind, failure.message
        );
    }
    for failure in &report.evicted {
        println!(
            "  dropped {} ({}): {}",
            failure.operation_id, failure.kind, failure.message
        );
    }

    Ok(())
}

/// Warm the cache.
async fn cmd_preload(client: &EventClient<HttpEventService>) -> Result<()> {
    let report = client.preload().await;
    println!(
        "Preload finished: {} loaded, {} failed.",
        report.loaded, report.failed
    );

    Ok(())
}

/// Show cache contents.
async fn cmd_cache_info(client: &EventClient<HttpEventService>) -> Result<()> {
    let keys = client.cache_keys().await;

    println!("Cached entries: {}", keys.len());
    for key in &keys {
        println!("  {}", key);
    }

    Ok(())
}

/// Remove cache entries.
async fn cmd_clear_cache(client: &EventClient<HttpEventService>, expired_only: bool) -> Result<()> {
    let removed = if expired_only {
        client
            .clear_expired_cache()
            .await
            .context("Failed to clear expired entries")?
    } else {
        client.clear_cache().await.context("Failed to clear the cache")?
    };

    println!("Removed {} cache entries.", removed);

    Ok(())
}
