//! # Estuary
//!
//! A single-process feed ingestion and synchronization engine. Heterogeneous
//! remote sources (web feeds, video channels, forums, audio episodes) are
//! normalized into one article model and served to clients through an
//! incremental, cursor-based sync protocol.
//!
//! ## Architecture
//!
//! ```text
//! Scheduler → Fetcher → Normalizer → Store → Sync
//!                           ↘ Enricher (full text, icons) ↗
//! ```
//!
//! - [`daemon`]: tick-driven scheduler selecting due feeds
//! - [`fetcher`]: pooled HTTP client with conditional requests and retries
//! - [`normalizer`]: per-source-type conversion to the canonical article shape
//! - [`readability`]: out-of-band full-text extraction
//! - [`store`]: SQLite persistence, retention statements, maintenance
//! - [`sync`]: cursor-based change feeds for thin clients
//!
//! ## Quick Start
//!
//! ```bash
//! # Subscribe to a feed
//! estuary add https://blog.rust-lang.org/feed.xml
//!
//! # Subscribe to a video channel by page URL
//! estuary add --kind video https://www.youtube.com/@somechannel
//!
//! # Refresh everything now
//! estuary refresh
//!
//! # Run the scheduler
//! estuary daemon start
//! ```

/// Application context and error handling.
///
/// [`AppContext`](app::AppContext) is the composition root wiring store,
/// transport, normalizer, asset cache and the background enricher.
pub mod app;

/// Content-addressed cache for remote icons and thumbnails.
pub mod assets;

/// Command-line interface using clap.
pub mod cli;

/// Configuration management.
///
/// Loads from `~/.config/estuary/config.toml`; a commented default file is
/// created on first run.
pub mod config;

/// Background scheduler.
///
/// - `estuary daemon start` - run the tick loop
/// - `estuary daemon stop` - stop a running daemon
/// - `estuary daemon status` - check liveness
pub mod daemon;

/// Core domain models.
///
/// - [`Feed`](domain::Feed): a subscribed source with fetch-state bookkeeping
/// - [`Article`](domain::Article): one ingested item with a SHA-256 identity
/// - [`ReadState`](domain::ReadState): per-user read/star flags
pub mod domain;

/// Change-notification fan-out over a bounded broadcast channel.
pub mod events;

/// HTTP transport with conditional requests, retries and backoff.
pub mod fetcher;

/// Feed parsing and normalization.
///
/// Converts RSS/Atom/JSON-feed payloads into [`Article`](domain::Article)s,
/// resolves video channel URLs, extracts hero images.
pub mod normalizer;

/// The per-feed refresh pipeline and its fetch-state machine.
pub mod pipeline;

/// Full-text article extraction, run out-of-band after ingestion.
pub mod readability;

/// Storage-bound enforcement: user policy plus per-kind hard caps.
pub mod retention;

/// SQLite persistence layer.
///
/// - [`Store`](store::Store): trait defining storage operations
/// - [`SqliteStore`](store::SqliteStore): implementation with WAL and a
///   versioned migration ledger
pub mod store;

/// Cursor-based incremental sync protocol.
pub mod sync;
