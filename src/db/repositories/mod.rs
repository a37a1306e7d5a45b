//! Postgres implementations of the storage seams, one file per seam. Multi-statement writes go
//! through [`Tx`].

use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{Pool, Postgres, Result as SqlxResult, Transaction};
use tracing::instrument;

use crate::db::models::ledger::{CreatorScore, LedgerEntry, NewLedgerEntry};
use crate::db::models::reward::{NewEntitlement, RewardEntitlement};
use crate::db::models::snapshot::{MetricSnapshot, SnapshotKey};
use crate::db::models::{CampaignId, CreatorId};

pub mod campaign;
pub mod ledger;
pub mod reward;
pub mod rules;
pub mod snapshot;

pub struct Tx<'a> {
    inner: Option<Transaction<'a, Postgres>>,
}

impl<'a> Tx<'a> {
    #[instrument(skip(pool))]
    pub async fn begin(pool: &'static Pool<Postgres>) -> SqlxResult<Self> {
        let inner = pool.begin().await?;
        Ok(Self { inner: Some(inner) })
    }

    #[instrument(skip(self))]
    pub async fn commit(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.commit().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    #[instrument(skip(self))]
    pub async fn rollback(&mut self) -> SqlxResult<()> {
        if let Some(tx) = self.inner.take() {
            tx.rollback().await
        } else {
            Err(sqlx::Error::Protocol("Transaction already completed".into()))
        }
    }

    fn inner_mut(&mut self) -> SqlxResult<&mut Transaction<'a, Postgres>> {
        self.inner
            .as_mut()
            .ok_or_else(|| sqlx::Error::Protocol("Transaction already completed".into()))
    }

    /// Serializes point writes within one campaign until this transaction ends. Taken before the
    /// snapshot row exists, so two first observations of a post cannot both insert it.
    #[instrument(skip(self))]
    pub async fn lock_campaign(&mut self, campaign_id: CampaignId) -> SqlxResult<()> {
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("points:campaign:{campaign_id}"))
            .execute(&mut **self.inner_mut()?)
            .await?;

        Ok(())
    }

    #[instrument(skip(self, key), fields(campaign = %key.campaign_id, post = %key.post_id))]
    pub async fn snapshot_for_update(
        &mut self,
        key: &SnapshotKey,
    ) -> SqlxResult<Option<MetricSnapshot>> {
        sqlx::query_as::<_, MetricSnapshot>(&format!(
            r#"
            SELECT {}
            FROM metric_snapshots
            WHERE campaign_id = $1 AND post_id = $2 AND platform = $3
            FOR UPDATE
            "#,
            sql_fragment::SNAPSHOT_FIELDS
        ))
        .bind(key.campaign_id)
        .bind(&key.post_id)
        .bind(key.platform)
        .fetch_optional(&mut **self.inner_mut()?)
        .await
    }

    /// (points granted on `today`, points granted overall) across the campaign's snapshots
    #[instrument(skip(self))]
    pub async fn campaign_points(
        &mut self,
        campaign_id: CampaignId,
        today: NaiveDate,
    ) -> SqlxResult<(i64, i64)> {
        sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT
                COALESCE(SUM(points_awarded_today) FILTER (WHERE last_points_date = $2), 0)::BIGINT,
                COALESCE(SUM(total_points_awarded), 0)::BIGINT
            FROM metric_snapshots
            WHERE campaign_id = $1
            "#,
        )
        .bind(campaign_id)
        .bind(today)
        .fetch_one(&mut **self.inner_mut()?)
        .await
    }

    #[instrument(skip(self, snapshot), fields(campaign = %snapshot.campaign_id, post = %snapshot.post_id))]
    pub async fn upsert_snapshot(&mut self, snapshot: &MetricSnapshot) -> SqlxResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO metric_snapshots ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                    $18, $19, $20, $21)
            ON CONFLICT (campaign_id, post_id, platform)
            DO UPDATE SET
                current_views = EXCLUDED.current_views,
                current_likes = EXCLUDED.current_likes,
                current_comments = EXCLUDED.current_comments,
                last_awarded_views = EXCLUDED.last_awarded_views,
                last_awarded_likes = EXCLUDED.last_awarded_likes,
                last_awarded_comments = EXCLUDED.last_awarded_comments,
                update_count = EXCLUDED.update_count,
                views_delta_sum = EXCLUDED.views_delta_sum,
                likes_delta_sum = EXCLUDED.likes_delta_sum,
                comments_delta_sum = EXCLUDED.comments_delta_sum,
                total_points_awarded = EXCLUDED.total_points_awarded,
                points_awarded_today = EXCLUDED.points_awarded_today,
                last_points_date = EXCLUDED.last_points_date,
                flagged_for_review = EXCLUDED.flagged_for_review,
                flag_reason = EXCLUDED.flag_reason,
                updated_at = EXCLUDED.updated_at
            "#,
            sql_fragment::SNAPSHOT_FIELDS
        ))
        .bind(snapshot.campaign_id)
        .bind(&snapshot.post_id)
        .bind(snapshot.platform)
        .bind(snapshot.creator_id)
        .bind(snapshot.current_views)
        .bind(snapshot.current_likes)
        .bind(snapshot.current_comments)
        .bind(snapshot.last_awarded_views)
        .bind(snapshot.last_awarded_likes)
        .bind(snapshot.last_awarded_comments)
        .bind(snapshot.update_count)
        .bind(snapshot.views_delta_sum)
        .bind(snapshot.likes_delta_sum)
        .bind(snapshot.comments_delta_sum)
        .bind(snapshot.total_points_awarded)
        .bind(snapshot.points_awarded_today)
        .bind(snapshot.last_points_date)
        .bind(snapshot.flagged_for_review)
        .bind(&snapshot.flag_reason)
        .bind(snapshot.created_at)
        .bind(snapshot.updated_at)
        .execute(&mut **self.inner_mut()?)
        .await?;

        Ok(())
    }

    /// Returns `None` when the entry's natural key is already taken.
    #[instrument(skip(self, entry), fields(campaign = %entry.campaign_id, creator = %entry.creator_id, ref_id = entry.ref_id))]
    pub async fn insert_ledger_entry(
        &mut self,
        entry: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> SqlxResult<Option<LedgerEntry>> {
        sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            INSERT INTO points_ledger (
                company_id,
                campaign_id,
                creator_id,
                delta,
                event_type,
                ref_type,
                ref_id,
                note,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (campaign_id, creator_id, event_type, ref_type, ref_id)
            DO NOTHING
            RETURNING {}
            "#,
            sql_fragment::LEDGER_FIELDS
        ))
        .bind(entry.company_id)
        .bind(entry.campaign_id)
        .bind(entry.creator_id)
        .bind(entry.delta)
        .bind(entry.event_type)
        .bind(&entry.ref_type)
        .bind(&entry.ref_id)
        .bind(&entry.note)
        .bind(at)
        .fetch_optional(&mut **self.inner_mut()?)
        .await
    }

    #[instrument(skip(self))]
    pub async fn increment_creator_score_by(
        &mut self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
        delta: i64,
    ) -> SqlxResult<CreatorScore> {
        sqlx::query_as::<_, CreatorScore>(
            r#"
            INSERT INTO creator_scores (
                campaign_id,
                creator_id,
                total,
                updated_at
            )
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (campaign_id, creator_id)
            DO UPDATE SET
                total = creator_scores.total + $3,
                updated_at = NOW()
            RETURNING
                campaign_id,
                creator_id,
                total
            "#,
        )
        .bind(campaign_id)
        .bind(creator_id)
        .bind(delta)
        .fetch_one(&mut **self.inner_mut()?)
        .await
    }

    /// Returns `None` when the creator already holds an entitlement for the milestone.
    #[instrument(skip(self, entitlement), fields(creator = %entitlement.creator_id, milestone = entitlement.milestone_id))]
    pub async fn insert_entitlement(
        &mut self,
        entitlement: &NewEntitlement,
        at: NaiveDateTime,
    ) -> SqlxResult<Option<RewardEntitlement>> {
        sqlx::query_as::<_, RewardEntitlement>(&format!(
            r#"
            INSERT INTO reward_entitlements (
                company_id,
                campaign_id,
                creator_id,
                milestone_id,
                points_at_grant,
                status,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, 'pending', $6)
            ON CONFLICT (creator_id, milestone_id)
            DO NOTHING
            RETURNING {}
            "#,
            sql_fragment::ENTITLEMENT_FIELDS
        ))
        .bind(entitlement.company_id)
        .bind(entitlement.campaign_id)
        .bind(entitlement.creator_id)
        .bind(entitlement.milestone_id)
        .bind(entitlement.points_at_grant)
        .bind(at)
        .fetch_optional(&mut **self.inner_mut()?)
        .await
    }

    /// Appends the entry and, if it was new, adds its delta to the creator's cached score.
    pub async fn record_entry(
        &mut self,
        entry: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> SqlxResult<Option<LedgerEntry>> {
        let written = self.insert_ledger_entry(entry, at).await?;
        if let Some(written) = &written
            && written.delta != 0
        {
            self.increment_creator_score_by(written.campaign_id, written.creator_id, written.delta)
                .await?;
        }

        Ok(written)
    }
}

pub mod sql_fragment {
    pub const SNAPSHOT_FIELDS: &str = r#"
        campaign_id,
        post_id,
        platform,
        creator_id,
        current_views,
        current_likes,
        current_comments,
        last_awarded_views,
        last_awarded_likes,
        last_awarded_comments,
        update_count,
        views_delta_sum,
        likes_delta_sum,
        comments_delta_sum,
        total_points_awarded,
        points_awarded_today,
        last_points_date,
        flagged_for_review,
        flag_reason,
        created_at,
        updated_at
    "#;

    pub const LEDGER_FIELDS: &str = r#"
        id,
        company_id,
        campaign_id,
        creator_id,
        delta,
        event_type,
        ref_type,
        ref_id,
        note,
        created_at
    "#;

    pub const RULE_FIELDS: &str = r#"
        points_per_1k_views,
        points_per_like,
        points_per_comment,
        max_points_per_post,
        max_points_per_day,
        max_points_total_campaign,
        counting_window_days,
        allowed_platforms
    "#;

    pub const ENTITLEMENT_FIELDS: &str = r#"
        id,
        company_id,
        campaign_id,
        creator_id,
        milestone_id,
        points_at_grant,
        status,
        created_at
    "#;
}
