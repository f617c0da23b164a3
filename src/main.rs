use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use estuary::app::AppContext;
use estuary::cli::{commands, Cli, Commands, DaemonAction, MaintenanceAction, RetentionAction};
use estuary::config::Config;
use estuary::daemon::{self, Scheduler, SchedulerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;
    let ctx = AppContext::new(config, None)?;

    match cli.command {
        Commands::Add {
            url,
            kind,
            interval,
        } => {
            commands::add_feed(&ctx, &url, &kind, interval).await?;
        }
        Commands::Remove { url } => {
            commands::remove_feed(&ctx, &url).await?;
        }
        Commands::Import { path } => {
            commands::import_opml(&ctx, &path).await?;
        }
        Commands::Refresh { url } => {
            commands::refresh_feeds(&ctx, url.as_deref()).await?;
        }
        Commands::Pause { url } => {
            commands::pause_feed(&ctx, &url)?;
        }
        Commands::Resume { url } => {
            commands::resume_feed(&ctx, &url)?;
        }
        Commands::List { articles } => {
            if articles {
                commands::list_articles(&ctx)?;
            } else {
                commands::list_feeds(&ctx)?;
            }
        }
        Commands::Sync { cursor, include } => {
            commands::sync_changes(&ctx, cursor.as_deref(), &include)?;
        }
        Commands::Daemon { action } => match action {
            DaemonAction::Start {
                tick,
                no_warm_start,
            } => {
                let mut scheduler_config = SchedulerConfig::from(&ctx.config.scheduler);
                scheduler_config.tick_secs = SchedulerConfig::parse_interval(&tick)
                    .map_err(|e| anyhow::anyhow!(e))?;
                if no_warm_start {
                    scheduler_config.warm_start_delay_secs = 0;
                }
                let scheduler = Scheduler::new(Arc::new(ctx), scheduler_config);
                scheduler.run().await?;
            }
            DaemonAction::Stop => {
                daemon::stop_daemon().map_err(|e| anyhow::anyhow!(e))?;
                println!("Daemon stopped");
            }
            DaemonAction::Status => {
                println!("{}", daemon::daemon_status());
            }
        },
        Commands::Maintenance { action } => match action {
            MaintenanceAction::Stats => commands::maintenance_stats(&ctx)?,
            MaintenanceAction::Optimize => commands::maintenance_optimize(&ctx)?,
            MaintenanceAction::Compact { force } => commands::maintenance_compact(&ctx, force)?,
            MaintenanceAction::Purge { feed_id } => commands::maintenance_purge(&ctx, feed_id)?,
        },
        Commands::Retention { action } => match action {
            RetentionAction::Show => commands::retention_show(&ctx)?,
            RetentionAction::Set {
                enabled,
                max_age_days,
                max_per_feed,
                keep_starred,
                keep_unread,
            } => commands::retention_set(
                &ctx,
                enabled,
                max_age_days,
                max_per_feed,
                keep_starred,
                keep_unread,
            )?,
            RetentionAction::Preview => commands::retention_preview(&ctx)?,
            RetentionAction::Run => commands::retention_run(&ctx)?,
        },
    }

    Ok(())
}
