//! Storage seams the engine is written against.
//!
//! [`crate::db::PgStore`] backs these with Postgres; [`memory::MemoryStore`] keeps everything in
//! process and is what the engine tests run on.

use core::fmt;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use thiserror::Error;

use crate::db::models::ledger::{CreatorScore, LedgerEntry, NewLedgerEntry};
use crate::db::models::post::Post;
use crate::db::models::reward::{Milestone, NewEntitlement, RewardEntitlement};
use crate::db::models::rules::{CampaignRuleRow, RuleRow};
use crate::db::models::snapshot::{MetricSnapshot, SnapshotKey};
use crate::db::models::{CampaignId, CampaignRef, CompanyId, CreatorId, Platform};

pub mod memory;

pub type StoreResult<T> = core::result::Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),

    #[error("write rejected for post '{post_id}': {reason}")]
    WriteRejected { post_id: String, reason: String },
}

/// State read under the post's lock, before the award is computed
#[derive(Debug, Clone, PartialEq)]
pub struct PostContext {
    pub snapshot: Option<MetricSnapshot>,
    /// Points granted across the whole campaign on the current day
    pub campaign_points_today: i64,
    /// Points granted across the whole campaign so far
    pub campaign_points_total: i64,
}

/// Everything a single post observation writes, committed atomically or not at all
#[derive(Debug, Clone, PartialEq)]
pub struct AwardPlan {
    pub snapshot: MetricSnapshot,
    pub entries: Vec<NewLedgerEntry>,
    pub points: i64,
    /// Set when this observation tripped the spike check
    pub flag: Option<String>,
    pub at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppliedAward {
    pub snapshot: MetricSnapshot,
    pub entries: Vec<LedgerEntry>,
    /// Points actually written; excludes entries that already existed
    pub points: i64,
    pub flag: Option<String>,
}

/// Computes the award from the locked state; `None` means nothing is written.
pub type Planner<'a> = &'a (dyn Fn(PostContext) -> Option<AwardPlan> + Send + Sync);

#[async_trait]
pub trait SnapshotStore: Send + Sync + fmt::Debug {
    /// Locks the snapshot for `key`, hands the locked state to `plan`, and persists the returned
    /// plan (snapshot, ledger rows, creator score increment) in one transaction.
    async fn process_post(
        &self,
        key: &SnapshotKey,
        today: NaiveDate,
        plan: Planner<'_>,
    ) -> StoreResult<Option<AppliedAward>>;

    async fn snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<MetricSnapshot>>;

    async fn flagged_snapshots(&self, campaign_id: CampaignId) -> StoreResult<Vec<MetricSnapshot>>;

    /// Zeroes `points_awarded_today` wherever `last_points_date` is before `today` or unset.
    async fn reset_daily_counters(&self, today: NaiveDate) -> StoreResult<u64>;
}

#[async_trait]
pub trait LedgerStore: Send + Sync + fmt::Debug {
    /// Returns `None` when an entry with the same natural key already exists.
    async fn append(
        &self,
        entry: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> StoreResult<Option<LedgerEntry>>;

    async fn sum_for(&self, creator_id: CreatorId, campaign_id: CampaignId) -> StoreResult<i64>;

    /// Newest first
    async fn history_for(
        &self,
        creator_id: CreatorId,
        campaign_id: Option<CampaignId>,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>>;

    /// Newest first
    async fn entries_for_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>>;

    /// Ledger-summed totals for every creator with at least one entry in the campaign
    async fn creator_totals(&self, campaign_id: CampaignId) -> StoreResult<Vec<CreatorScore>>;

    /// Cached total, if one has been materialized
    async fn creator_score(
        &self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> StoreResult<Option<i64>>;

    /// Replaces the cached totals for a campaign with the ledger sums.
    async fn rebuild_creator_scores(&self, campaign_id: CampaignId) -> StoreResult<u64>;
}

#[async_trait]
pub trait RuleStore: Send + Sync + fmt::Debug {
    async fn campaign_rules(&self, campaign_id: CampaignId)
    -> StoreResult<Option<CampaignRuleRow>>;

    async fn brand_rules(&self, company_id: CompanyId) -> StoreResult<Option<RuleRow>>;
}

#[async_trait]
pub trait RewardStore: Send + Sync + fmt::Debug {
    /// Ordered by threshold ascending
    async fn milestones_for(&self, campaign_id: CampaignId) -> StoreResult<Vec<Milestone>>;

    async fn entitlement_exists(&self, creator_id: CreatorId, milestone_id: i64)
    -> StoreResult<bool>;

    /// Creates the pending entitlement together with its `audit` ledger entry, both or neither.
    /// Returns `None` when the (creator, milestone) entitlement already exists.
    async fn grant_milestone(
        &self,
        entitlement: &NewEntitlement,
        audit: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> StoreResult<Option<RewardEntitlement>>;

    async fn entitlements_for(
        &self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> StoreResult<Vec<RewardEntitlement>>;
}

/// Campaign and post data owned by the rest of the marketplace
#[async_trait]
pub trait CampaignSource: Send + Sync + fmt::Debug {
    /// Open campaigns with gamification switched on
    async fn eligible_campaigns(&self) -> StoreResult<Vec<CampaignRef>>;

    /// Posts by accepted creators on `platforms`, published no earlier than `window_days`
    /// before `now`
    async fn eligible_posts(
        &self,
        campaign_id: CampaignId,
        platforms: &[Platform],
        window_days: i64,
        now: NaiveDateTime,
    ) -> StoreResult<Vec<Post>>;
}

/// Every seam at once, for the scheduler
pub trait PointsStore: SnapshotStore + LedgerStore + RuleStore + RewardStore + CampaignSource {}

impl<T> PointsStore for T where
    T: SnapshotStore + LedgerStore + RuleStore + RewardStore + CampaignSource
{
}
