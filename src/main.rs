use std::sync::Arc;

use engagement_points::db::models::{CampaignId, CompanyId, CreatorId};
use engagement_points::db::{self, PgError, PgStore};
use engagement_points::engine::EngineError;
use engagement_points::engine::prelude::*;
use engagement_points::store::{SnapshotStore, StoreError};
use engagement_points::util::clock::{Clock, SystemClock};
use engagement_points::util::env::{self, Env, EnvErr};
use engagement_points::util::telemetry::Telemetry;
use serde::Serialize;
use thiserror::Error;

use crate::args::Command;

mod args;

#[derive(Debug, Error)]
enum RunnerErr {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Env(#[from] EnvErr),

    #[error(transparent)]
    Pg(#[from] PgError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("telemetry setup failed: {0}")]
    Telemetry(Box<dyn std::error::Error + Send + Sync>),
}

type Result<T> = core::result::Result<T, RunnerErr>;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = args::parse_cli_args();

    let env = match env::env().await {
        Ok(env) => env,
        Err(e) => {
            let _telemetry = Telemetry::local().register();
            tracing::error!(error = %e, "invalid configuration");
            return Err(e.into());
        }
    };

    let telemetry = Telemetry::new(env)
        .map_err(RunnerErr::Telemetry)?
        .register();

    tracing::info!(command = ?cli.command, "starting");
    let result = run(cli.command, env).await;
    if let Err(e) = &result {
        tracing::error!(error = ?e, "command failed");
    }

    telemetry.shutdown();
    result
}

async fn run(command: Command, env: &'static Env) -> Result<()> {
    let pool = db::db_pool().await?;
    if command == Command::Migrate {
        return Ok(db::migrate(pool).await?);
    }

    let store = Arc::new(PgStore::new(pool));
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let config = SchedulerConfig::new(env.sweep_interval(), env.startup_delay());
    let scheduler = BatchScheduler::new(store.clone(), clock.clone(), config);
    let ledger = PointsLedger::new(store.clone(), clock);

    match command {
        Command::Run => {
            scheduler.start().await;
            tokio::signal::ctrl_c().await?;
            tracing::info!("interrupt received, stopping scheduler");
            scheduler.stop().await;
        }
        Command::Sweep => print_json(&scheduler.run_sweep().await)?,
        Command::Reprocess { campaign, company } => print_json(
            &scheduler
                .reprocess_campaign(CampaignId(campaign), CompanyId(company))
                .await,
        )?,
        Command::ResetDaily => {
            let reset = scheduler.reset_daily().await?;
            println!("reset {reset} snapshot(s)");
        }
        Command::Ranks { campaign } => {
            let ranks = RankCalculator::new(store).ranks_for(CampaignId(campaign)).await?;
            print_json(&ranks)?;
        }
        Command::RebuildScores { campaign } => {
            let rebuilt = ledger.rebuild_creator_scores(CampaignId(campaign)).await?;
            println!("rebuilt {rebuilt} creator score(s)");
        }
        Command::Flagged { campaign } => {
            print_json(&store.flagged_snapshots(CampaignId(campaign)).await?)?
        }
        Command::History {
            creator,
            campaign,
            limit,
        } => {
            let entries = ledger
                .history_for(CreatorId(creator), campaign.map(CampaignId), limit)
                .await?;
            print_json(&entries)?;
        }
        Command::Migrate => (),
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
