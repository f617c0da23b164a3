pub mod commands;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "estuary")]
#[command(about = "Feed ingestion and synchronization engine", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Subscribe to a feed
    Add {
        /// URL of the feed (or channel/playlist page for video sources)
        url: String,

        /// Source type: web, video, forum or audio
        #[arg(short, long, default_value = "web")]
        kind: String,

        /// Refresh cadence in minutes
        #[arg(short, long)]
        interval: Option<i64>,
    },
    /// Unsubscribe from a feed (soft delete)
    Remove {
        /// URL of the feed to remove
        url: String,
    },
    /// Import feeds from an OPML file
    Import {
        /// Path to the OPML file
        path: std::path::PathBuf,
    },
    /// Refresh one feed now, or every feed when no URL is given
    Refresh {
        /// URL of a single feed to refresh
        url: Option<String>,
    },
    /// Exclude a feed from scheduling without deleting it
    Pause {
        /// URL of the feed to pause
        url: String,
    },
    /// Re-enter a paused or failing feed into scheduling
    Resume {
        /// URL of the feed to resume
        url: String,
    },
    /// List feeds or articles
    List {
        /// Show articles instead of feeds
        #[arg(long)]
        articles: bool,
    },
    /// Compute a sync delta (debugging aid for the sync protocol)
    Sync {
        /// Cursor from a previous sync; omit for a full resync
        #[arg(short, long)]
        cursor: Option<String>,

        /// Comma-separated include set: feeds,folders,articles,read_state
        #[arg(short, long, default_value = "")]
        include: String,
    },
    /// Background scheduler daemon
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Database statistics and maintenance
    Maintenance {
        #[command(subcommand)]
        action: MaintenanceAction,
    },
    /// Retention policy management
    Retention {
        #[command(subcommand)]
        action: RetentionAction,
    },
}

#[derive(Subcommand)]
pub enum DaemonAction {
    /// Start the scheduler daemon
    Start {
        /// Tick interval (e.g., "5m", "1h")
        #[arg(short, long, default_value = "5m")]
        tick: String,

        /// Skip the warm-start refresh
        #[arg(long)]
        no_warm_start: bool,
    },
    /// Stop the running daemon
    Stop,
    /// Check daemon status
    Status,
}

#[derive(Subcommand)]
pub enum MaintenanceAction {
    /// Show table sizes and fragmentation
    Stats,
    /// Refresh statistics and rebuild indexes
    Optimize,
    /// Rewrite the database to reclaim free pages
    Compact {
        /// Compact even below the fragmentation threshold
        #[arg(long)]
        force: bool,
    },
    /// Hard-delete a soft-deleted feed and its articles
    Purge {
        /// Feed id to purge
        feed_id: i64,
    },
}

#[derive(Subcommand)]
pub enum RetentionAction {
    /// Show the current policy
    Show,
    /// Update the policy
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        /// Delete articles older than this many days (0 clears the limit)
        #[arg(long)]
        max_age_days: Option<i64>,
        /// Keep at most this many articles per feed (0 clears the limit)
        #[arg(long)]
        max_per_feed: Option<i64>,
        #[arg(long)]
        keep_starred: Option<bool>,
        #[arg(long)]
        keep_unread: Option<bool>,
    },
    /// Show what a retention run would delete
    Preview,
    /// Run retention now
    Run,
}
