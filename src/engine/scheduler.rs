//! Periodic driver for the points engine.
//!
//! A sweep walks every eligible campaign, runs each qualifying post through the
//! [`DeltaProcessor`], and refreshes ranks and milestone rewards for campaigns that earned
//! points. A separate timer zeroes the per-day counters at local midnight and re-arms itself.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::constants::{DEFAULT_STARTUP_DELAY_SECS, DEFAULT_SWEEP_INTERVAL_SECS};
use crate::db::models::{CampaignId, CampaignRef, CompanyId, CreatorId};
use crate::engine::EngineResult;
use crate::engine::delta::DeltaProcessor;
use crate::engine::ledger::PointsLedger;
use crate::engine::milestone::MilestoneRewardChecker;
use crate::engine::rank::{RankCalculator, RankEntry};
use crate::engine::rules::RuleResolver;
use crate::store::PointsStore;
use crate::util::clock::{Clock, until_next_midnight};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub sweep_interval: Duration,
    /// Delay before the first sweep after `start`
    pub startup_delay: Duration,
}

impl SchedulerConfig {
    pub fn new(sweep_interval: Duration, startup_delay: Duration) -> Self {
        Self {
            sweep_interval: sweep_interval.max(Duration::from_secs(1)),
            startup_delay,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            Duration::from_secs(DEFAULT_STARTUP_DELAY_SECS),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Sweeping,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostError {
    pub post_id: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CampaignReport {
    pub campaign_id: CampaignId,
    pub posts_processed: usize,
    pub points_awarded: i64,
    pub flagged: usize,
    pub entitlements_created: usize,
    pub ranks_recomputed: bool,
    /// Set when the campaign has no non-zero scoring rate
    pub skipped: bool,
    pub post_errors: Vec<PostError>,
    /// Failure that stopped the campaign before any post was processed
    pub error: Option<String>,
}

impl CampaignReport {
    fn new(campaign_id: CampaignId) -> Self {
        Self {
            campaign_id,
            posts_processed: 0,
            points_awarded: 0,
            flagged: 0,
            entitlements_created: 0,
            ranks_recomputed: false,
            skipped: false,
            post_errors: Vec::new(),
            error: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub sweep_id: Uuid,
    /// Another sweep was already running
    pub skipped: bool,
    pub campaigns: Vec<CampaignReport>,
    pub error: Option<String>,
}

impl SweepReport {
    fn new(skipped: bool) -> Self {
        Self {
            sweep_id: Uuid::new_v4(),
            skipped,
            campaigns: Vec::new(),
            error: None,
        }
    }

    pub fn points_awarded(&self) -> i64 {
        self.campaigns.iter().map(|c| c.points_awarded).sum()
    }

    pub fn posts_processed(&self) -> usize {
        self.campaigns.iter().map(|c| c.posts_processed).sum()
    }

    pub fn post_errors(&self) -> usize {
        self.campaigns.iter().map(|c| c.post_errors.len()).sum()
    }
}

/// Resets the scheduler to idle however the sweep ends
struct SweepGuard<'a>(&'a Mutex<SchedulerState>);

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(|e| e.into_inner()) = SchedulerState::Idle;
    }
}

#[derive(Debug)]
pub struct BatchScheduler<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
    config: SchedulerConfig,

    rules: RuleResolver<S>,
    processor: DeltaProcessor<S>,
    ledger: PointsLedger<S>,
    ranks: RankCalculator<S>,
    milestones: MilestoneRewardChecker<S>,

    state: Mutex<SchedulerState>,
    latest_ranks: RwLock<HashMap<CampaignId, Vec<RankEntry>>>,
    cancel: CancellationToken,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<S: PointsStore + ?Sized + 'static> BatchScheduler<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>, config: SchedulerConfig) -> Arc<Self> {
        Arc::new(Self {
            rules: RuleResolver::new(store.clone()),
            processor: DeltaProcessor::new(store.clone(), clock.clone()),
            ledger: PointsLedger::new(store.clone(), clock.clone()),
            ranks: RankCalculator::new(store.clone()),
            milestones: MilestoneRewardChecker::new(store.clone(), clock.clone()),
            store,
            clock,
            config,
            state: Mutex::new(SchedulerState::Idle),
            latest_ranks: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            handles: tokio::sync::Mutex::new(Vec::new()),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Rank list published by the most recent sweep that awarded points in `campaign_id`
    pub fn latest_ranks(&self, campaign_id: CampaignId) -> Option<Vec<RankEntry>> {
        self.latest_ranks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&campaign_id)
            .cloned()
    }

    /// Spawns the sweep loop and the midnight reset timer. A stopped scheduler cannot be
    /// restarted.
    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) {
        let mut handles = self.handles.lock().await;
        if !handles.is_empty() {
            tracing::warn!("scheduler already started");
            return;
        }

        tracing::info!(
            interval_secs = self.config.sweep_interval.as_secs(),
            startup_delay_secs = self.config.startup_delay.as_secs(),
            "starting scheduler"
        );

        handles.push(tokio::spawn(self.clone().sweep_loop()));
        handles.push(tokio::spawn(self.clone().midnight_loop()));
    }

    /// Cancels both timers and waits for an in-flight sweep to finish.
    #[instrument(skip(self))]
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                tracing::error!(error = ?e, "scheduler task ended abnormally");
            }
        }

        tracing::info!("scheduler stopped");
    }

    async fn sweep_loop(self: Arc<Self>) {
        let first = tokio::time::Instant::now() + self.config.startup_delay;
        let mut interval = tokio::time::interval_at(first, self.config.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {
                    self.run_sweep().await;
                }
            }
        }
    }

    async fn midnight_loop(self: Arc<Self>) {
        loop {
            let wait = until_next_midnight(self.clock.now());
            tracing::debug!(wait_secs = wait.as_secs(), "daily reset armed");

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {
                    if let Err(e) = self.reset_daily().await {
                        tracing::error!(error = ?e, "daily counter reset failed");
                    }
                }
            }
        }
    }

    /// Zeroes today's counters on every snapshot last credited before today.
    #[instrument(skip(self))]
    pub async fn reset_daily(&self) -> EngineResult<u64> {
        let today = self.clock.today();
        let reset = self.store.reset_daily_counters(today).await?;
        tracing::info!(%today, reset, "daily point counters reset");
        Ok(reset)
    }

    /// Runs one sweep over every eligible campaign. Returns a skipped report if a sweep is
    /// already in progress.
    #[instrument(skip(self))]
    pub async fn run_sweep(&self) -> SweepReport {
        {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if *state == SchedulerState::Sweeping {
                tracing::warn!("sweep already in progress, skipping tick");
                return SweepReport::new(true);
            }
            *state = SchedulerState::Sweeping;
        }
        let _guard = SweepGuard(&self.state);

        let mut report = SweepReport::new(false);
        match self.store.eligible_campaigns().await {
            Ok(campaigns) => {
                for campaign in campaigns {
                    report.campaigns.push(self.sweep_campaign(campaign).await);
                }
            }
            Err(e) => {
                tracing::error!(error = ?e, "failed to list eligible campaigns");
                report.error = Some(e.to_string());
            }
        }

        tracing::info!(
            sweep = %report.sweep_id,
            campaigns = report.campaigns.len(),
            posts = report.posts_processed(),
            points = report.points_awarded(),
            errors = report.post_errors(),
            "sweep complete"
        );

        report
    }

    /// Sweeps a single campaign on demand. Serializes with scheduled sweeps per post through the
    /// snapshot lock.
    pub async fn reprocess_campaign(
        &self,
        campaign_id: CampaignId,
        company_id: CompanyId,
    ) -> CampaignReport {
        self.sweep_campaign(CampaignRef {
            campaign_id,
            company_id,
        })
        .await
    }

    #[instrument(skip(self, campaign), fields(campaign = %campaign.campaign_id))]
    async fn sweep_campaign(&self, campaign: CampaignRef) -> CampaignReport {
        let CampaignRef {
            campaign_id,
            company_id,
        } = campaign;
        let mut report = CampaignReport::new(campaign_id);

        let rules = self.rules.resolve(campaign_id, company_id).await;
        if !rules.rates.has_nonzero_rate() {
            tracing::debug!("all scoring rates are zero, skipping campaign");
            report.skipped = true;
            return report;
        }

        let posts = match self
            .store
            .eligible_posts(
                campaign_id,
                &rules.allowed_platforms,
                rules.caps.counting_window_days,
                self.clock.now().naive_utc(),
            )
            .await
        {
            Ok(posts) => posts,
            Err(e) => {
                tracing::error!(error = ?e, "failed to load eligible posts");
                report.error = Some(e.to_string());
                return report;
            }
        };

        let mut awarded: BTreeSet<CreatorId> = BTreeSet::new();
        for post in &posts {
            match self
                .processor
                .apply(company_id, campaign_id, post.creator_id, post, &rules)
                .await
            {
                Ok(result) => {
                    report.posts_processed += 1;
                    report.points_awarded += result.points_awarded;
                    if result.flagged {
                        report.flagged += 1;
                    }
                    if result.points_awarded > 0 {
                        awarded.insert(post.creator_id);
                    }
                }
                Err(e) => {
                    tracing::warn!(post = %post.post_id, error = ?e, "post processing failed");
                    report.post_errors.push(PostError {
                        post_id: post.post_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        if report.points_awarded > 0 {
            match self.ranks.ranks_for(campaign_id).await {
                Ok(ranks) => {
                    self.latest_ranks
                        .write()
                        .unwrap_or_else(|e| e.into_inner())
                        .insert(campaign_id, ranks);
                    report.ranks_recomputed = true;
                }
                Err(e) => tracing::error!(error = ?e, "rank recomputation failed"),
            }

            for creator_id in awarded {
                match self.grant_milestones(company_id, campaign_id, creator_id).await {
                    Ok(created) => report.entitlements_created += created,
                    Err(e) => {
                        tracing::error!(creator = %creator_id, error = ?e, "milestone check failed")
                    }
                }
            }
        }

        tracing::debug!(
            posts = report.posts_processed,
            points = report.points_awarded,
            flagged = report.flagged,
            errors = report.post_errors.len(),
            "campaign swept"
        );

        report
    }

    async fn grant_milestones(
        &self,
        company_id: CompanyId,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> EngineResult<usize> {
        let total = self.ledger.creator_total(campaign_id, creator_id).await?;
        self.milestones
            .check_and_grant(company_id, campaign_id, creator_id, total)
            .await
    }
}
