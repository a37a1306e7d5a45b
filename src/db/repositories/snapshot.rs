use async_trait::async_trait;
use chrono::NaiveDate;
use tracing::instrument;

use super::{Tx, sql_fragment};
use crate::db::PgStore;
use crate::db::models::CampaignId;
use crate::db::models::snapshot::{MetricSnapshot, SnapshotKey};
use crate::store::{AppliedAward, Planner, PostContext, SnapshotStore, StoreResult};

#[async_trait]
impl SnapshotStore for PgStore {
    #[instrument(skip(self, key, plan), fields(campaign = %key.campaign_id, post = %key.post_id))]
    async fn process_post(
        &self,
        key: &SnapshotKey,
        today: NaiveDate,
        plan: Planner<'_>,
    ) -> StoreResult<Option<AppliedAward>> {
        let mut tx = Tx::begin(self.pool()).await?;

        tx.lock_campaign(key.campaign_id).await?;
        let snapshot = tx.snapshot_for_update(key).await?;
        let (campaign_points_today, campaign_points_total) =
            tx.campaign_points(key.campaign_id, today).await?;

        let ctx = PostContext {
            snapshot,
            campaign_points_today,
            campaign_points_total,
        };

        let Some(plan) = plan(ctx) else {
            tx.rollback().await?;
            return Ok(None);
        };

        let mut entries = Vec::with_capacity(plan.entries.len());
        for entry in &plan.entries {
            if let Some(written) = tx.record_entry(entry, plan.at).await? {
                entries.push(written);
            }
        }
        tx.upsert_snapshot(&plan.snapshot).await?;
        tx.commit().await?;

        let points = entries.iter().map(|e| e.delta).sum();
        Ok(Some(AppliedAward {
            snapshot: plan.snapshot,
            entries,
            points,
            flag: plan.flag,
        }))
    }

    #[instrument(skip(self, key), fields(campaign = %key.campaign_id, post = %key.post_id))]
    async fn snapshot(&self, key: &SnapshotKey) -> StoreResult<Option<MetricSnapshot>> {
        Ok(sqlx::query_as::<_, MetricSnapshot>(&format!(
            r#"
            SELECT {}
            FROM metric_snapshots
            WHERE campaign_id = $1 AND post_id = $2 AND platform = $3
            "#,
            sql_fragment::SNAPSHOT_FIELDS
        ))
        .bind(key.campaign_id)
        .bind(&key.post_id)
        .bind(key.platform)
        .fetch_optional(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn flagged_snapshots(&self, campaign_id: CampaignId) -> StoreResult<Vec<MetricSnapshot>> {
        Ok(sqlx::query_as::<_, MetricSnapshot>(&format!(
            r#"
            SELECT {}
            FROM metric_snapshots
            WHERE campaign_id = $1 AND flagged_for_review
            ORDER BY updated_at DESC
            "#,
            sql_fragment::SNAPSHOT_FIELDS
        ))
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn reset_daily_counters(&self, today: NaiveDate) -> StoreResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE metric_snapshots
            SET points_awarded_today = 0
            WHERE points_awarded_today <> 0
            AND (last_points_date IS NULL OR last_points_date < $1)
            "#,
        )
        .bind(today)
        .execute(self.pool())
        .await?;

        Ok(result.rows_affected())
    }
}
