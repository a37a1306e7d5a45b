//! In-process store. Every operation runs under one state lock, which also serializes
//! `process_post` per post the way the Postgres advisory lock does.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime, TimeDelta};

use crate::db::models::ledger::{CreatorScore, LedgerEntry, LedgerKey, NewLedgerEntry};
use crate::db::models::post::Post;
use crate::db::models::reward::{Milestone, NewEntitlement, RewardEntitlement, RewardStatus};
use crate::db::models::rules::{CampaignRuleRow, RuleRow};
use crate::db::models::snapshot::{MetricSnapshot, SnapshotKey};
use crate::db::models::{CampaignId, CampaignRef, CompanyId, CreatorId, Platform, PostId};
use crate::store::{
    AppliedAward, CampaignSource, LedgerStore, Planner, PostContext, RewardStore, RuleStore,
    SnapshotStore, StoreError, StoreResult,
};

#[derive(Debug, Default)]
struct State {
    next_id: i64,

    snapshots: HashMap<SnapshotKey, MetricSnapshot>,
    ledger: Vec<LedgerEntry>,
    ledger_keys: HashSet<LedgerKey>,
    scores: HashMap<(CampaignId, CreatorId), i64>,

    brand_rules: HashMap<CompanyId, RuleRow>,
    campaign_rules: HashMap<CampaignId, CampaignRuleRow>,
    milestones: Vec<Milestone>,
    entitlements: Vec<RewardEntitlement>,

    campaigns: Vec<CampaignRef>,
    posts: HashMap<CampaignId, Vec<Post>>,

    daily_resets: usize,
    faults: Faults,
}

/// Writes and lookups the test hooks have switched to failing
#[derive(Debug, Default)]
struct Faults {
    posts: HashSet<PostId>,
    rule_lookups: bool,
    ledger_writes: bool,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }

    fn insert_entry(&mut self, entry: &NewLedgerEntry, at: NaiveDateTime) -> Option<LedgerEntry> {
        if !self.ledger_keys.insert(entry.key()) {
            return None;
        }

        let id = self.next_id();
        let written = entry.clone().into_entry(id, at);
        *self
            .scores
            .entry((written.campaign_id, written.creator_id))
            .or_default() += written.delta;
        self.ledger.push(written.clone());

        Some(written)
    }

    fn check_rule_lookup(&self) -> StoreResult<()> {
        if self.faults.rule_lookups {
            return Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn check_ledger_write(&self) -> StoreResult<()> {
        if self.faults.ledger_writes {
            return Err(StoreError::Sqlx(sqlx::Error::PoolTimedOut));
        }
        Ok(())
    }

    fn campaign_snapshots(&self, campaign_id: CampaignId) -> impl Iterator<Item = &MetricSnapshot> {
        self.snapshots
            .values()
            .filter(move |s| s.campaign_id == campaign_id)
    }

    fn ledger_sums(&self, campaign_id: CampaignId) -> BTreeMap<CreatorId, i64> {
        let mut sums = BTreeMap::new();
        for entry in self.ledger.iter().filter(|e| e.campaign_id == campaign_id) {
            *sums.entry(entry.creator_id).or_default() += entry.delta;
        }
        sums
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_campaign(&self, campaign_id: CampaignId, company_id: CompanyId) {
        self.state().campaigns.push(CampaignRef {
            campaign_id,
            company_id,
        });
    }

    /// Inserts or replaces the post with the same id and platform.
    pub fn upsert_post(&self, campaign_id: CampaignId, post: Post) {
        let mut state = self.state();
        let posts = state.posts.entry(campaign_id).or_default();
        match posts
            .iter_mut()
            .find(|p| p.post_id == post.post_id && p.platform == post.platform)
        {
            Some(existing) => *existing = post,
            None => posts.push(post),
        }
    }

    pub fn set_brand_rules(&self, company_id: CompanyId, row: RuleRow) {
        self.state().brand_rules.insert(company_id, row);
    }

    pub fn set_campaign_rules(&self, campaign_id: CampaignId, row: CampaignRuleRow) {
        self.state().campaign_rules.insert(campaign_id, row);
    }

    pub fn add_milestone(&self, campaign_id: CampaignId, threshold_points: i64, label: &str) -> i64 {
        let mut state = self.state();
        let id = state.next_id();
        state.milestones.push(Milestone {
            id,
            campaign_id,
            threshold_points,
            label: label.to_string(),
        });
        id
    }
}

#[cfg(test)]
impl MemoryStore {
    /// Makes both rule lookups return an error.
    pub fn fail_rule_lookups(&self, fail: bool) {
        self.state().faults.rule_lookups = fail;
    }

    /// Makes every write for `post_id` roll back with [`StoreError::WriteRejected`].
    pub fn fail_post(&self, post_id: PostId) {
        self.state().faults.posts.insert(post_id);
    }

    /// Makes standalone ledger appends and milestone grants return an error.
    pub fn fail_ledger_writes(&self, fail: bool) {
        self.state().faults.ledger_writes = fail;
    }

    pub fn clear_failures(&self) {
        self.state().faults = Faults::default();
    }

    /// Drops every cached creator score, leaving the ledger alone.
    pub fn wipe_creator_scores(&self) {
        self.state().scores.clear();
    }

    /// How many times the daily counters have been reset
    pub fn daily_resets(&self) -> usize {
        self.state().daily_resets
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn process_post(
        &self,
        key: &SnapshotKey,
        today: NaiveDate,
        plan: Planner<'_>,
    ) -> StoreResult<Option<AppliedAward>> {
        let mut state = self.state();

        let ctx = PostContext {
            snapshot: state.snapshots.get(key).cloned(),
            campaign_points_today: state
                .campaign_snapshots(key.campaign_id)
                .map(|s| s.points_on(today))
                .sum(),
            campaign_points_total: state
                .campaign_snapshots(key.campaign_id)
                .map(|s| s.total_points_awarded)
                .sum(),
        };

        let Some(plan) = plan(ctx) else {
            return Ok(None);
        };

        if state.faults.posts.contains(&key.post_id) {
            return Err(StoreError::WriteRejected {
                post_id: key.post_id.to_string(),
                reason: "post marked as failing".to_string(),
            });
        }

        let entries: Vec<LedgerEntry> = plan
            .entries
            .iter()
            .filter_map(|entry| state.insert_entry(entry, plan.at))
            .collect();
        let points = entries.iter().map(|e| e.delta).sum();

        state.snapshots.insert(key.clone(), plan.snapshot.clone());

        Ok(Some(AppliedAward {
            snapshot: plan.snapshot,
            entries,
            points,
            flag: plan.flag,
        }))
    }

    async fn snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<MetricSnapshot>> {
        Ok(self.state().snapshots.get(key).cloned())
    }

    async fn flagged_snapshots(&self, campaign_id: CampaignId) -> StoreResult<Vec<MetricSnapshot>> {
        let state = self.state();
        let mut flagged: Vec<MetricSnapshot> = state
            .campaign_snapshots(campaign_id)
            .filter(|s| s.flagged_for_review)
            .cloned()
            .collect();
        flagged.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(flagged)
    }

    async fn reset_daily_counters(&self, today: NaiveDate) -> StoreResult<u64> {
        let mut state = self.state();
        state.daily_resets += 1;

        let mut reset = 0;
        for snapshot in state.snapshots.values_mut() {
            let stale = snapshot.last_points_date.is_none_or(|d| d < today);
            if stale && snapshot.points_awarded_today != 0 {
                snapshot.points_awarded_today = 0;
                reset += 1;
            }
        }
        Ok(reset)
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(
        &self,
        entry: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> StoreResult<Option<LedgerEntry>> {
        let mut state = self.state();
        state.check_ledger_write()?;
        Ok(state.insert_entry(entry, at))
    }

    async fn sum_for(&self, creator_id: CreatorId, campaign_id: CampaignId) -> StoreResult<i64> {
        Ok(self
            .state()
            .ledger
            .iter()
            .filter(|e| e.creator_id == creator_id && e.campaign_id == campaign_id)
            .map(|e| e.delta)
            .sum())
    }

    async fn history_for(
        &self,
        creator_id: CreatorId,
        campaign_id: Option<CampaignId>,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state();
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.creator_id == creator_id)
            .filter(|e| campaign_id.is_none_or(|c| e.campaign_id == c))
            .cloned()
            .collect();

        newest_first(&mut entries, limit);
        Ok(entries)
    }

    async fn entries_for_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>> {
        let state = self.state();
        let mut entries: Vec<LedgerEntry> = state
            .ledger
            .iter()
            .filter(|e| e.campaign_id == campaign_id)
            .cloned()
            .collect();

        newest_first(&mut entries, limit);
        Ok(entries)
    }

    async fn creator_totals(&self, campaign_id: CampaignId) -> StoreResult<Vec<CreatorScore>> {
        Ok(self
            .state()
            .ledger_sums(campaign_id)
            .into_iter()
            .map(|(creator_id, total)| CreatorScore {
                campaign_id,
                creator_id,
                total,
            })
            .collect())
    }

    async fn creator_score(
        &self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> StoreResult<Option<i64>> {
        Ok(self.state().scores.get(&(campaign_id, creator_id)).copied())
    }

    async fn rebuild_creator_scores(&self, campaign_id: CampaignId) -> StoreResult<u64> {
        let mut state = self.state();
        let sums = state.ledger_sums(campaign_id);

        state.scores.retain(|(campaign, _), _| *campaign != campaign_id);
        let rebuilt = sums.len() as u64;
        for (creator_id, total) in sums {
            state.scores.insert((campaign_id, creator_id), total);
        }
        Ok(rebuilt)
    }
}

#[async_trait]
impl RuleStore for MemoryStore {
    async fn campaign_rules(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<Option<CampaignRuleRow>> {
        let state = self.state();
        state.check_rule_lookup()?;
        Ok(state.campaign_rules.get(&campaign_id).cloned())
    }

    async fn brand_rules(&self, company_id: CompanyId) -> StoreResult<Option<RuleRow>> {
        let state = self.state();
        state.check_rule_lookup()?;
        Ok(state.brand_rules.get(&company_id).cloned())
    }
}

#[async_trait]
impl RewardStore for MemoryStore {
    async fn milestones_for(&self, campaign_id: CampaignId) -> StoreResult<Vec<Milestone>> {
        let mut milestones: Vec<Milestone> = self
            .state()
            .milestones
            .iter()
            .filter(|m| m.campaign_id == campaign_id)
            .cloned()
            .collect();
        milestones.sort_by_key(|m| (m.threshold_points, m.id));
        Ok(milestones)
    }

    async fn entitlement_exists(
        &self,
        creator_id: CreatorId,
        milestone_id: i64,
    ) -> StoreResult<bool> {
        Ok(self
            .state()
            .entitlements
            .iter()
            .any(|e| e.creator_id == creator_id && e.milestone_id == milestone_id))
    }

    async fn grant_milestone(
        &self,
        entitlement: &NewEntitlement,
        audit: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> StoreResult<Option<RewardEntitlement>> {
        let mut state = self.state();
        state.check_ledger_write()?;
        if state.entitlements.iter().any(|e| {
            e.creator_id == entitlement.creator_id && e.milestone_id == entitlement.milestone_id
        }) {
            return Ok(None);
        }

        let created = RewardEntitlement {
            id: state.next_id(),
            company_id: entitlement.company_id,
            campaign_id: entitlement.campaign_id,
            creator_id: entitlement.creator_id,
            milestone_id: entitlement.milestone_id,
            points_at_grant: entitlement.points_at_grant,
            status: RewardStatus::Pending,
            created_at: at,
        };
        state.entitlements.push(created.clone());
        state.insert_entry(audit, at);
        Ok(Some(created))
    }

    async fn entitlements_for(
        &self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> StoreResult<Vec<RewardEntitlement>> {
        Ok(self
            .state()
            .entitlements
            .iter()
            .filter(|e| e.campaign_id == campaign_id && e.creator_id == creator_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl CampaignSource for MemoryStore {
    async fn eligible_campaigns(&self) -> StoreResult<Vec<CampaignRef>> {
        Ok(self.state().campaigns.clone())
    }

    async fn eligible_posts(
        &self,
        campaign_id: CampaignId,
        platforms: &[Platform],
        window_days: i64,
        now: NaiveDateTime,
    ) -> StoreResult<Vec<Post>> {
        let earliest = TimeDelta::try_days(window_days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(NaiveDateTime::MIN);
        Ok(self
            .state()
            .posts
            .get(&campaign_id)
            .map(|posts| {
                posts
                    .iter()
                    .filter(|p| platforms.contains(&p.platform) && p.posted_at >= earliest)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn newest_first(entries: &mut Vec<LedgerEntry>, limit: i64) {
    entries.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    entries.truncate(limit.max(0) as usize);
}
