//! Background scheduler for automatic feed refreshes.
//!
//! An explicit object with `run`/`stop`, owned by the composition root.
//! Each tick selects the due feeds and walks them strictly sequentially;
//! ticks never overlap (a tick that outlasts the timer swallows the missed
//! firings). A separate, much slower timer drives retention and storage
//! maintenance, and a one-shot warm start refreshes shortly after boot so
//! a fresh process doesn't idle for a full tick.

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::app::AppContext;
use crate::pipeline;
use crate::retention;
use crate::store::Store;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub tick_secs: u64,
    pub batch_size: usize,
    pub inter_feed_delay_ms: u64,
    pub warm_start_delay_secs: u64,
    pub maintenance_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let section = crate::config::SchedulerSection::default();
        Self {
            tick_secs: section.tick_secs,
            batch_size: section.batch_size,
            inter_feed_delay_ms: section.inter_feed_delay_ms,
            warm_start_delay_secs: section.warm_start_delay_secs,
            maintenance_interval_secs: section.maintenance_interval_secs,
        }
    }
}

impl From<&crate::config::SchedulerSection> for SchedulerConfig {
    fn from(section: &crate::config::SchedulerSection) -> Self {
        Self {
            tick_secs: section.tick_secs,
            batch_size: section.batch_size,
            inter_feed_delay_ms: section.inter_feed_delay_ms,
            warm_start_delay_secs: section.warm_start_delay_secs,
            maintenance_interval_secs: section.maintenance_interval_secs,
        }
    }
}

impl SchedulerConfig {
    /// Parse interval string like "1h", "30m", "6h", "1d"
    pub fn parse_interval(s: &str) -> Result<u64, String> {
        let s = s.trim().to_lowercase();

        if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| h * 3600)
                .map_err(|_| format!("Invalid hours: {}", hours))
        } else if let Some(minutes) = s.strip_suffix('m') {
            minutes
                .parse::<u64>()
                .map(|m| m * 60)
                .map_err(|_| format!("Invalid minutes: {}", minutes))
        } else if let Some(days) = s.strip_suffix('d') {
            days.parse::<u64>()
                .map(|d| d * 86400)
                .map_err(|_| format!("Invalid days: {}", days))
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map_err(|_| format!("Invalid seconds: {}", secs))
        } else {
            s.parse::<u64>()
                .map_err(|_| format!("Invalid interval: {}. Use format like '1h', '30m', '1d'", s))
        }
    }

    /// Format interval for display
    pub fn format_interval(secs: u64) -> String {
        if secs >= 86400 && secs % 86400 == 0 {
            format!("{}d", secs / 86400)
        } else if secs >= 3600 && secs % 3600 == 0 {
            format!("{}h", secs / 3600)
        } else if secs >= 60 && secs % 60 == 0 {
            format!("{}m", secs / 60)
        } else {
            format!("{}s", secs)
        }
    }
}

/// Scheduler runner
pub struct Scheduler {
    ctx: Arc<AppContext>,
    config: SchedulerConfig,
    running: Arc<AtomicBool>,
}

impl Scheduler {
    pub fn new(ctx: Arc<AppContext>, config: SchedulerConfig) -> Self {
        Self {
            ctx,
            config,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Get the PID file path
    pub fn pid_file_path() -> Option<PathBuf> {
        dirs::runtime_dir()
            .or_else(dirs::cache_dir)
            .map(|d| d.join("estuary").join("daemon.pid"))
    }

    /// Check if another scheduler daemon is already running
    pub fn is_running() -> bool {
        if let Some(pid_path) = Self::pid_file_path() {
            if pid_path.exists() {
                if let Ok(pid_str) = fs::read_to_string(&pid_path) {
                    if let Ok(pid) = pid_str.trim().parse::<u32>() {
                        return Self::process_exists(pid);
                    }
                }
            }
        }
        false
    }

    #[cfg(unix)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("kill")
            .args(["-0", &pid.to_string()])
            .status()
            .map(|s| s.success())
            .unwrap_or(false)
    }

    #[cfg(windows)]
    fn process_exists(pid: u32) -> bool {
        use std::process::Command;
        Command::new("tasklist")
            .args(["/FI", &format!("PID eq {}", pid)])
            .output()
            .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
            .unwrap_or(false)
    }

    fn write_pid_file(&self) -> std::io::Result<()> {
        if let Some(pid_path) = Self::pid_file_path() {
            if let Some(parent) = pid_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut file = fs::File::create(&pid_path)?;
            writeln!(file, "{}", std::process::id())?;
        }
        Ok(())
    }

    fn remove_pid_file(&self) {
        if let Some(pid_path) = Self::pid_file_path() {
            let _ = fs::remove_file(pid_path);
        }
    }

    /// Run the scheduler until stopped
    pub async fn run(&self) -> crate::app::Result<()> {
        if Self::is_running() {
            return Err(crate::app::EstuaryError::Other(
                "Another scheduler instance is already running".to_string(),
            ));
        }

        self.write_pid_file().map_err(|e| {
            crate::app::EstuaryError::Other(format!("Failed to write PID file: {}", e))
        })?;

        let running = self.running.clone();

        #[cfg(unix)]
        {
            let running_clone = running.clone();
            tokio::spawn(async move {
                let mut sigterm =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                        .expect("Failed to set up SIGTERM handler");
                let mut sigint =
                    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
                        .expect("Failed to set up SIGINT handler");

                tokio::select! {
                    _ = sigterm.recv() => {},
                    _ = sigint.recv() => {},
                }
                running_clone.store(false, Ordering::SeqCst);
            });
        }

        #[cfg(windows)]
        {
            let running_clone = running.clone();
            tokio::spawn(async move {
                let _ = tokio::signal::ctrl_c().await;
                running_clone.store(false, Ordering::SeqCst);
            });
        }

        info!(
            tick = %SchedulerConfig::format_interval(self.config.tick_secs),
            pid = std::process::id(),
            "scheduler started"
        );

        // Warm start so a fresh process doesn't wait a full tick.
        if self.config.warm_start_delay_secs > 0 {
            tokio::time::sleep(Duration::from_secs(self.config.warm_start_delay_secs)).await;
            if self.running.load(Ordering::SeqCst) {
                info!("warm-start refresh");
                self.tick().await;
            }
        }

        let mut timer = interval(Duration::from_secs(self.config.tick_secs));
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer.tick().await; // Skip the first immediate tick

        let mut maintenance_timer =
            interval(Duration::from_secs(self.config.maintenance_interval_secs.max(60)));
        maintenance_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        maintenance_timer.tick().await;

        while self.running.load(Ordering::SeqCst) {
            tokio::select! {
                _ = timer.tick() => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    self.tick().await;
                }
                _ = maintenance_timer.tick() => {
                    if !self.running.load(Ordering::SeqCst) {
                        break;
                    }
                    self.run_maintenance().await;
                }
            }
        }

        info!("scheduler shutting down");
        if let Some(enricher) = &self.ctx.enricher {
            enricher.shutdown().await;
        }
        self.remove_pid_file();

        Ok(())
    }

    /// One scheduler tick: select due feeds and refresh them sequentially.
    /// A feed's failure is recorded on the feed and never aborts the batch.
    pub async fn tick(&self) {
        let started = Utc::now();

        let due = match self.ctx.store.due_feeds(started, self.config.batch_size) {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "due-feed selection failed");
                return;
            }
        };

        if due.is_empty() {
            return;
        }

        info!(count = due.len(), "refreshing due feeds");
        let mut total_new = 0;
        let mut errors = 0;

        for (i, feed) in due.iter().enumerate() {
            if i > 0 && self.config.inter_feed_delay_ms > 0 {
                tokio::time::sleep(Duration::from_millis(self.config.inter_feed_delay_ms)).await;
            }

            match pipeline::refresh_feed(
                self.ctx.store.as_ref(),
                self.ctx.fetcher.as_ref(),
                &self.ctx.normalizer,
                &self.ctx.notifier,
                self.ctx.enricher.as_ref(),
                feed,
            )
            .await
            {
                Ok(outcome) => {
                    total_new += outcome.new_articles;
                }
                Err(e) => {
                    errors += 1;
                    warn!(url = %feed.url, error = %e, "feed refresh failed");
                }
            }
        }

        let elapsed = Utc::now().signed_duration_since(started);
        info!(
            total_new,
            errors,
            elapsed_ms = elapsed.num_milliseconds(),
            "tick complete"
        );
    }

    /// Daily retention and storage maintenance across all users.
    pub async fn run_maintenance(&self) {
        info!("running maintenance");

        let users = match self.ctx.store.user_ids() {
            Ok(users) => users,
            Err(e) => {
                error!(error = %e, "maintenance user listing failed");
                return;
            }
        };

        for user_id in users {
            match retention::enforce(self.ctx.store.as_ref(), user_id) {
                Ok(report) if report.articles_deleted > 0 => {
                    info!(
                        user_id,
                        deleted = report.articles_deleted,
                        compacted = report.compacted,
                        "retention enforced"
                    );
                }
                Ok(_) => {}
                Err(e) => warn!(user_id, error = %e, "retention run failed"),
            }
        }

        if let Err(e) = self.ctx.store.optimize() {
            warn!(error = %e, "optimize failed");
        }
    }

    /// Stop the scheduler (called externally)
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

/// Stop a running scheduler daemon by reading the PID file and signalling it
pub fn stop_daemon() -> Result<(), String> {
    let pid_path =
        Scheduler::pid_file_path().ok_or_else(|| "Could not determine PID file path".to_string())?;

    if !pid_path.exists() {
        return Err("No daemon is running (PID file not found)".to_string());
    }

    let pid_str =
        fs::read_to_string(&pid_path).map_err(|e| format!("Failed to read PID file: {}", e))?;

    let pid: u32 = pid_str
        .trim()
        .parse()
        .map_err(|_| "Invalid PID in PID file".to_string())?;

    #[cfg(unix)]
    {
        use std::process::Command;
        let status = Command::new("kill")
            .args(["-TERM", &pid.to_string()])
            .status()
            .map_err(|e| format!("Failed to send signal: {}", e))?;

        if status.success() {
            let _ = fs::remove_file(&pid_path);
            Ok(())
        } else {
            Err(format!("Failed to stop daemon (PID {})", pid))
        }
    }

    #[cfg(windows)]
    {
        use std::process::Command;
        let status = Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/F"])
            .status()
            .map_err(|e| format!("Failed to stop process: {}", e))?;

        if status.success() {
            let _ = fs::remove_file(&pid_path);
            Ok(())
        } else {
            Err(format!("Failed to stop daemon (PID {})", pid))
        }
    }
}

/// Check scheduler daemon status
pub fn daemon_status() -> String {
    if let Some(pid_path) = Scheduler::pid_file_path() {
        if pid_path.exists() {
            if let Ok(pid_str) = fs::read_to_string(&pid_path) {
                if let Ok(pid) = pid_str.trim().parse::<u32>() {
                    if Scheduler::process_exists(pid) {
                        return format!("Daemon is running (PID: {})", pid);
                    } else {
                        return "Daemon is not running (stale PID file)".to_string();
                    }
                }
            }
        }
    }
    "Daemon is not running".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_interval() {
        assert_eq!(SchedulerConfig::parse_interval("1h").unwrap(), 3600);
        assert_eq!(SchedulerConfig::parse_interval("30m").unwrap(), 1800);
        assert_eq!(SchedulerConfig::parse_interval("1d").unwrap(), 86400);
        assert_eq!(SchedulerConfig::parse_interval("60s").unwrap(), 60);
        assert_eq!(SchedulerConfig::parse_interval("3600").unwrap(), 3600);
        assert!(SchedulerConfig::parse_interval("invalid").is_err());
    }

    #[test]
    fn format_interval() {
        assert_eq!(SchedulerConfig::format_interval(3600), "1h");
        assert_eq!(SchedulerConfig::format_interval(1800), "30m");
        assert_eq!(SchedulerConfig::format_interval(86400), "1d");
        assert_eq!(SchedulerConfig::format_interval(90), "90s");
        assert_eq!(SchedulerConfig::format_interval(7200), "2h");
    }

    #[test]
    fn default_matches_config_section() {
        let config = SchedulerConfig::default();
        assert_eq!(config.tick_secs, 300);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.inter_feed_delay_ms, 1000);
    }
}
