//! Converts a post's cumulative metrics into a bounded, spike-checked point award.
//!
//! Every call compares the post's current counts against what was already converted into
//! points, so re-running a sweep over unchanged metrics writes nothing. The first
//! [`SEEDING_MIN_SAMPLES`] observations of a post only build up the running averages; points start
//! with the observation after that.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::constants::{FRAUD_SPIKE_MULTIPLIER, REF_TYPE_POST, SEEDING_MIN_SAMPLES};
use crate::db::models::ledger::{EventType, NewLedgerEntry};
use crate::db::models::post::Post;
use crate::db::models::rules::{EffectiveRules, ScoringRates};
use crate::db::models::snapshot::{MetricSnapshot, SnapshotKey};
use crate::db::models::{CampaignId, CompanyId, CreatorId};
use crate::engine::caps::{CapUsage, apply_caps};
use crate::engine::{EngineError, EngineResult};
use crate::store::{AwardPlan, PostContext, SnapshotStore};
use crate::util::clock::Clock;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwardResult {
    pub points_awarded: i64,
    pub flagged: bool,
    pub flag_reason: Option<String>,
}

/// Who the award is for and the metrics it is computed from
#[derive(Debug, Clone, Copy)]
pub struct AwardRequest<'a> {
    pub company_id: CompanyId,
    pub campaign_id: CampaignId,
    pub creator_id: CreatorId,
    pub post: &'a Post,
}

impl AwardRequest<'_> {
    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.campaign_id, self.post.post_id.clone(), self.post.platform)
    }
}

#[derive(Debug)]
pub struct DeltaProcessor<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: SnapshotStore + ?Sized> DeltaProcessor<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Awards whatever the post has earned since its last award. Safe to call again with the
    /// same or newer metrics; concurrent calls for one post serialize on the snapshot lock.
    #[instrument(
        skip(self, post, rules),
        fields(campaign = %campaign_id, creator = %creator_id, post = %post.post_id)
    )]
    pub async fn apply(
        &self,
        company_id: CompanyId,
        campaign_id: CampaignId,
        creator_id: CreatorId,
        post: &Post,
        rules: &EffectiveRules,
    ) -> EngineResult<AwardResult> {
        if post.views < 0 || post.likes < 0 || post.comments < 0 {
            return Err(EngineError::InvalidMetrics {
                post_id: post.post_id.to_string(),
            });
        }

        let request = AwardRequest {
            company_id,
            campaign_id,
            creator_id,
            post,
        };

        let now = self.clock.now();
        let today = now.date_naive();
        let at = now.naive_utc();

        let planner = |ctx: PostContext| plan_award(ctx, &request, rules, today, at);
        let applied = self
            .store
            .process_post(&request.key(), today, &planner)
            .await?;

        let Some(applied) = applied else {
            tracing::trace!("metrics unchanged since last award");
            return Ok(AwardResult::default());
        };

        if let Some(reason) = &applied.flag {
            tracing::warn!(reason, points = applied.points, "post flagged for review");
        }

        tracing::debug!(
            points = applied.points,
            update_count = applied.snapshot.update_count,
            entries = applied.entries.len(),
            "post processed"
        );

        Ok(AwardResult {
            points_awarded: applied.points,
            flagged: applied.flag.is_some(),
            flag_reason: applied.flag,
        })
    }
}

/// Works out what a single observation writes, given the state read under the post's lock.
///
/// Returns `None` when no metric moved past its last-awarded value; nothing is written then.
pub fn plan_award(
    ctx: PostContext,
    request: &AwardRequest<'_>,
    rules: &EffectiveRules,
    today: NaiveDate,
    at: NaiveDateTime,
) -> Option<AwardPlan> {
    let post = request.post;
    let mut snapshot = ctx
        .snapshot
        .unwrap_or_else(|| MetricSnapshot::new(&request.key(), request.creator_id, at));

    let views_delta = (post.views - snapshot.last_awarded_views).max(0);
    let likes_delta = (post.likes - snapshot.last_awarded_likes).max(0);
    let comments_delta = (post.comments - snapshot.last_awarded_comments).max(0);

    if views_delta == 0 && likes_delta == 0 && comments_delta == 0 {
        return None;
    }

    // spike averages come from the history before this observation
    let prior_count = snapshot.update_count;
    let prior_views_sum = snapshot.views_delta_sum;
    let prior_likes_sum = snapshot.likes_delta_sum;

    snapshot.update_count += 1;
    snapshot.views_delta_sum += views_delta;
    snapshot.likes_delta_sum += likes_delta;
    snapshot.comments_delta_sum += comments_delta;

    let seeding = prior_count < SEEDING_MIN_SAMPLES;
    let mut flag = None;
    let mut components = [0i64; 3];

    if !seeding {
        let raw = raw_points(&rules.rates, views_delta, likes_delta, comments_delta);

        let reasons: Vec<String> = [
            spike_reason("views", views_delta, prior_views_sum, prior_count),
            spike_reason("likes", likes_delta, prior_likes_sum, prior_count),
        ]
        .into_iter()
        .flatten()
        .collect();

        if !reasons.is_empty() {
            flag = Some(reasons.join("; "));
        }

        let usage = CapUsage {
            post_total: snapshot.total_points_awarded,
            day_total: ctx.campaign_points_today,
            campaign_total: ctx.campaign_points_total,
        };
        components = apply_caps(raw, &rules.caps, &usage);
    }

    let points: i64 = components.iter().sum();

    snapshot.current_views = post.views;
    snapshot.current_likes = post.likes;
    snapshot.current_comments = post.comments;

    // the whole delta is consumed even when caps cut the award, so it is never paid out later
    snapshot.last_awarded_views = snapshot.last_awarded_views.max(post.views);
    snapshot.last_awarded_likes = snapshot.last_awarded_likes.max(post.likes);
    snapshot.last_awarded_comments = snapshot.last_awarded_comments.max(post.comments);

    if !seeding {
        snapshot.points_awarded_today = snapshot.points_on(today) + points;
        snapshot.last_points_date = Some(today);
        snapshot.total_points_awarded += points;
    }

    if let Some(reason) = &flag {
        snapshot.flagged_for_review = true;
        snapshot.flag_reason = Some(reason.clone());
    }
    snapshot.updated_at = at;

    let ref_id = format!("{}#{}", post.post_id, snapshot.update_count);
    let entries = [
        (components[0], EventType::ViewsMilestone, "views", views_delta),
        (components[1], EventType::LikeMilestone, "likes", likes_delta),
        (components[2], EventType::CommentMilestone, "comments", comments_delta),
    ]
    .into_iter()
    .filter(|(points, ..)| *points > 0)
    .map(|(points, event_type, metric, delta)| NewLedgerEntry {
        company_id: request.company_id,
        campaign_id: request.campaign_id,
        creator_id: request.creator_id,
        delta: points,
        event_type,
        ref_type: REF_TYPE_POST.to_string(),
        ref_id: ref_id.clone(),
        note: Some(format!("+{delta} {metric} on {}", post.platform)),
    })
    .collect();

    Some(AwardPlan {
        snapshot,
        entries,
        points,
        flag,
        at,
    })
}

/// Uncapped (views, likes, comments) points for a set of deltas
pub fn raw_points(rates: &ScoringRates, views: i64, likes: i64, comments: i64) -> [i64; 3] {
    [
        (views as f64 / 1000.0 * rates.points_per_1k_views).floor() as i64,
        (likes as f64 * rates.points_per_like).floor() as i64,
        (comments as f64 * rates.points_per_comment).floor() as i64,
    ]
}

fn spike_reason(metric: &str, delta: i64, prior_sum: i64, prior_count: i64) -> Option<String> {
    if prior_count <= 0 {
        return None;
    }

    let average = prior_sum as f64 / prior_count as f64;
    if average > 0.0 && delta as f64 > average * FRAUD_SPIKE_MULTIPLIER {
        Some(format!(
            "{metric} delta {delta} exceeds {FRAUD_SPIKE_MULTIPLIER}x the historical average of {average:.1}"
        ))
    } else {
        None
    }
}

#[cfg(test)]
mod test {
    use chrono::DateTime;

    use super::*;
    use crate::db::models::rules::CapThresholds;
    use crate::db::models::{Platform, PostId};
    use crate::store::LedgerStore;
    use crate::store::memory::MemoryStore;
    use crate::util::clock::ManualClock;

    const CAMPAIGN: CampaignId = CampaignId(1);
    const COMPANY: CompanyId = CompanyId(10);
    const CREATOR: CreatorId = CreatorId(7);

    fn rules(per_post: i64, per_day: i64, per_campaign: i64) -> EffectiveRules {
        EffectiveRules {
            rates: ScoringRates {
                points_per_1k_views: 1.0,
                points_per_like: 1.0,
                points_per_comment: 1.0,
            },
            caps: CapThresholds {
                max_points_per_post: per_post,
                max_points_per_day: per_day,
                max_points_total_campaign: per_campaign,
                counting_window_days: 30,
            },
            allowed_platforms: vec![Platform::Instagram, Platform::Tiktok],
        }
    }

    fn open_rules() -> EffectiveRules {
        rules(1_000_000, 1_000_000, 1_000_000)
    }

    fn post(id: &str, views: i64, likes: i64, comments: i64) -> Post {
        Post {
            post_id: PostId::from(id),
            platform: Platform::Instagram,
            creator_id: CREATOR,
            views,
            likes,
            comments,
            posted_at: DateTime::parse_from_rfc3339("2026-03-01T12:00:00+00:00")
                .unwrap()
                .naive_utc(),
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>, DeltaProcessor<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-03-04T09:00:00+00:00").unwrap(),
        ));
        let processor = DeltaProcessor::new(store.clone(), clock.clone());
        (store, clock, processor)
    }

    async fn award(processor: &DeltaProcessor<MemoryStore>, p: &Post, r: &EffectiveRules) -> AwardResult {
        processor
            .apply(COMPANY, CAMPAIGN, CREATOR, p, r)
            .await
            .unwrap()
    }

    async fn seed(processor: &DeltaProcessor<MemoryStore>, id: &str, r: &EffectiveRules) {
        for views in [100, 200, 300] {
            let result = award(processor, &post(id, views, 0, 0), r).await;
            assert_eq!(result.points_awarded, 0);
        }
    }

    #[tokio::test]
    async fn test_seeding_then_first_award() {
        let (store, _, processor) = setup();
        let r = open_rules();
        let key = SnapshotKey::new(CAMPAIGN, PostId::from("p"), Platform::Instagram);

        for (views, count) in [(500, 1), (1200, 2), (2000, 3)] {
            let result = award(&processor, &post("p", views, 0, 0), &r).await;
            assert_eq!(result.points_awarded, 0);

            let snapshot = store.snapshot(&key).await.unwrap().unwrap();
            assert_eq!(snapshot.update_count, count);
            assert_eq!(snapshot.last_awarded_views, views);
        }

        let result = award(&processor, &post("p", 3000, 0, 0), &r).await;
        assert_eq!(result.points_awarded, 1);

        let snapshot = store.snapshot(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.update_count, 4);
        assert_eq!(snapshot.total_points_awarded, 1);
        assert_eq!(store.sum_for(CREATOR, CAMPAIGN).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_seeding_ignores_huge_first_counts() {
        let (store, _, processor) = setup();
        let r = open_rules();

        let result = award(&processor, &post("viral", 5_000_000, 90_000, 4_000), &r).await;
        assert_eq!(result.points_awarded, 0);
        assert!(!result.flagged);

        let result = award(&processor, &post("viral", 6_000_000, 95_000, 4_100), &r).await;
        assert_eq!(result.points_awarded, 0);
        assert_eq!(store.sum_for(CREATOR, CAMPAIGN).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unchanged_metrics_write_nothing() {
        let (store, _, processor) = setup();
        let r = open_rules();
        seed(&processor, "p", &r).await;

        let first = award(&processor, &post("p", 2300, 5, 2), &r).await;
        assert_eq!(first.points_awarded, 2 + 5 + 2);
        let entries = store.entries_for_campaign(CAMPAIGN, 100).await.unwrap();
        assert_eq!(entries.len(), 3);

        let key = SnapshotKey::new(CAMPAIGN, PostId::from("p"), Platform::Instagram);
        let before = store.snapshot(&key).await.unwrap().unwrap();

        let second = award(&processor, &post("p", 2300, 5, 2), &r).await;
        assert_eq!(second, AwardResult::default());
        assert_eq!(store.entries_for_campaign(CAMPAIGN, 100).await.unwrap().len(), 3);
        assert_eq!(store.snapshot(&key).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn test_decreasing_metrics_never_subtract() {
        let (store, _, processor) = setup();
        let r = open_rules();
        seed(&processor, "p", &r).await;

        award(&processor, &post("p", 5300, 40, 0), &r).await;
        let result = award(&processor, &post("p", 1000, 10, 3), &r).await;
        // only comments moved up
        assert_eq!(result.points_awarded, 3);

        let key = SnapshotKey::new(CAMPAIGN, PostId::from("p"), Platform::Instagram);
        let snapshot = store.snapshot(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.last_awarded_views, 5300);
        assert_eq!(snapshot.last_awarded_likes, 40);
        assert_eq!(snapshot.last_awarded_comments, 3);
        assert_eq!(snapshot.current_views, 1000);

        // recovering to the old high earns nothing new
        let result = award(&processor, &post("p", 5300, 40, 3), &r).await;
        assert_eq!(result.points_awarded, 0);
    }

    #[tokio::test]
    async fn test_spike_is_flagged_but_still_awarded() {
        let (store, _, processor) = setup();
        let r = rules(50, 1_000_000, 1_000_000);
        seed(&processor, "p", &r).await;

        // historical average is 100 views per observation
        let result = award(&processor, &post("p", 300 + 100_000, 0, 0), &r).await;
        assert!(result.flagged);
        assert!(result.flag_reason.as_deref().unwrap().starts_with("views delta"));
        assert_eq!(result.points_awarded, 50);

        let key = SnapshotKey::new(CAMPAIGN, PostId::from("p"), Platform::Instagram);
        let snapshot = store.snapshot(&key).await.unwrap().unwrap();
        assert!(snapshot.flagged_for_review);
        assert_eq!(store.flagged_snapshots(CAMPAIGN).await.unwrap().len(), 1);
    }

    #[test]
    fn test_spike_average_excludes_current_observation() {
        let p = post("p", 1300, 0, 0);
        let request = AwardRequest {
            company_id: COMPANY,
            campaign_id: CAMPAIGN,
            creator_id: CREATOR,
            post: &p,
        };
        let at = DateTime::parse_from_rfc3339("2026-03-04T09:00:00+00:00")
            .unwrap()
            .naive_utc();

        let mut snapshot = MetricSnapshot::new(&request.key(), CREATOR, at);
        snapshot.update_count = 3;
        snapshot.views_delta_sum = 300;
        snapshot.last_awarded_views = 300;

        let ctx = |snapshot: &MetricSnapshot| PostContext {
            snapshot: Some(snapshot.clone()),
            campaign_points_today: 0,
            campaign_points_total: 0,
        };

        // exactly 10x the prior average of 100 is not a spike
        let plan = plan_award(ctx(&snapshot), &request, &open_rules(), at.date(), at).unwrap();
        assert!(plan.flag.is_none());

        // one view more is; averaging in the current delta would have hidden it
        let p = post("p", 1301, 0, 0);
        let request = AwardRequest { post: &p, ..request };
        let plan = plan_award(ctx(&snapshot), &request, &open_rules(), at.date(), at).unwrap();
        assert!(plan.flag.is_some());
        assert_eq!(plan.snapshot.update_count, 4);
        assert_eq!(plan.snapshot.views_delta_sum, 1301);
    }

    #[tokio::test]
    async fn test_huge_rates_stay_within_post_cap() {
        let (store, _, processor) = setup();
        let mut r = rules(500, 2_000, 20_000);
        seed(&processor, "p", &r).await;

        r.rates.points_per_like = 1e17;
        r.rates.points_per_comment = 1e17;
        let result = award(&processor, &post("p", 300, 1_000, 1_000), &r).await;

        assert_eq!(result.points_awarded, 500);
        assert_eq!(store.sum_for(CREATOR, CAMPAIGN).await.unwrap(), 500);
    }

    #[tokio::test]
    async fn test_post_cap_is_cumulative() {
        let (store, _, processor) = setup();
        let r = rules(25, 1_000_000, 1_000_000);
        seed(&processor, "p", &r).await;

        let mut likes = 0;
        for _ in 0..5 {
            likes += 10;
            award(&processor, &post("p", 300, likes, 0), &r).await;
        }

        let post_sum: i64 = store
            .entries_for_campaign(CAMPAIGN, 100)
            .await
            .unwrap()
            .iter()
            .filter(|e| e.ref_id.starts_with("p#"))
            .map(|e| e.delta)
            .sum();
        assert_eq!(post_sum, 25);
    }

    #[tokio::test]
    async fn test_day_cap_spans_campaign_and_resets_next_day() {
        let (store, clock, processor) = setup();
        let r = rules(1_000, 30, 1_000_000);
        seed(&processor, "a", &r).await;
        seed(&processor, "b", &r).await;

        assert_eq!(award(&processor, &post("a", 300, 20, 0), &r).await.points_awarded, 20);
        assert_eq!(award(&processor, &post("b", 300, 20, 0), &r).await.points_awarded, 10);
        assert_eq!(award(&processor, &post("b", 300, 40, 0), &r).await.points_awarded, 0);

        // the capped-out delta is consumed
        let key = SnapshotKey::new(CAMPAIGN, PostId::from("b"), Platform::Instagram);
        let snapshot = store.snapshot(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.last_awarded_likes, 40);
        assert_eq!(snapshot.points_awarded_today, 10);

        clock.advance(chrono::TimeDelta::days(1));
        assert_eq!(award(&processor, &post("b", 300, 45, 0), &r).await.points_awarded, 5);
    }

    #[tokio::test]
    async fn test_campaign_cap_holds_across_posts() {
        let (store, _, processor) = setup();
        let r = rules(1_000, 1_000, 15);
        seed(&processor, "a", &r).await;
        seed(&processor, "b", &r).await;

        award(&processor, &post("a", 300, 10, 0), &r).await;
        award(&processor, &post("b", 300, 10, 0), &r).await;
        award(&processor, &post("a", 300, 20, 0), &r).await;

        assert_eq!(store.sum_for(CREATOR, CAMPAIGN).await.unwrap(), 15);
    }

    #[tokio::test]
    async fn test_one_ledger_entry_per_component() {
        let (store, _, processor) = setup();
        let r = open_rules();
        seed(&processor, "p", &r).await;

        award(&processor, &post("p", 1300, 4, 0), &r).await;
        let entries = store.entries_for_campaign(CAMPAIGN, 100).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.ref_type == "post" && e.ref_id == "p#4"));
        assert!(entries.iter().any(|e| e.event_type == EventType::ViewsMilestone && e.delta == 1));
        assert!(entries.iter().any(|e| e.event_type == EventType::LikeMilestone && e.delta == 4));
        assert_eq!(store.creator_score(CAMPAIGN, CREATOR).await.unwrap(), Some(5));
    }

    #[tokio::test]
    async fn test_negative_metrics_are_rejected() {
        let (_, _, processor) = setup();
        let err = processor
            .apply(COMPANY, CAMPAIGN, CREATOR, &post("p", -1, 0, 0), &open_rules())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidMetrics { .. }));
    }

    #[tokio::test]
    async fn test_concurrent_calls_do_not_double_award() {
        let (store, _, processor) = setup();
        let processor = Arc::new(processor);
        let r = open_rules();
        seed(&processor, "p", &r).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let processor = processor.clone();
            let r = r.clone();
            handles.push(tokio::spawn(async move {
                processor
                    .apply(COMPANY, CAMPAIGN, CREATOR, &post("p", 300, 50, 0), &r)
                    .await
                    .unwrap()
                    .points_awarded
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 50);
        assert_eq!(store.sum_for(CREATOR, CAMPAIGN).await.unwrap(), 50);
    }
}
