use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::instrument;

use super::{Tx, sql_fragment};
use crate::db::PgStore;
use crate::db::models::ledger::{CreatorScore, LedgerEntry, NewLedgerEntry};
use crate::db::models::{CampaignId, CreatorId};
use crate::store::{LedgerStore, StoreResult};

#[async_trait]
impl LedgerStore for PgStore {
    #[instrument(skip(self, entry), fields(campaign = %entry.campaign_id, creator = %entry.creator_id))]
    async fn append(
        &self,
        entry: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> StoreResult<Option<LedgerEntry>> {
        let mut tx = Tx::begin(self.pool()).await?;
        let written = tx.record_entry(entry, at).await?;
        tx.commit().await?;

        Ok(written)
    }

    #[instrument(skip(self))]
    async fn sum_for(&self, creator_id: CreatorId, campaign_id: CampaignId) -> StoreResult<i64> {
        Ok(sqlx::query_scalar::<_, i64>(
            r#"
            SELECT COALESCE(SUM(delta), 0)::BIGINT
            FROM points_ledger
            WHERE creator_id = $1 AND campaign_id = $2
            "#,
        )
        .bind(creator_id)
        .bind(campaign_id)
        .fetch_one(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn history_for(
        &self,
        creator_id: CreatorId,
        campaign_id: Option<CampaignId>,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {}
            FROM points_ledger
            WHERE creator_id = $1
            AND ($2::BIGINT IS NULL OR campaign_id = $2)
            ORDER BY created_at DESC, id DESC
            LIMIT $3
            "#,
            sql_fragment::LEDGER_FIELDS
        ))
        .bind(creator_id)
        .bind(campaign_id)
        .bind(limit.max(0))
        .fetch_all(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn entries_for_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> StoreResult<Vec<LedgerEntry>> {
        Ok(sqlx::query_as::<_, LedgerEntry>(&format!(
            r#"
            SELECT {}
            FROM points_ledger
            WHERE campaign_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
            sql_fragment::LEDGER_FIELDS
        ))
        .bind(campaign_id)
        .bind(limit.max(0))
        .fetch_all(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn creator_totals(&self, campaign_id: CampaignId) -> StoreResult<Vec<CreatorScore>> {
        Ok(sqlx::query_as::<_, CreatorScore>(
            r#"
            SELECT
                campaign_id,
                creator_id,
                COALESCE(SUM(delta), 0)::BIGINT AS total
            FROM points_ledger
            WHERE campaign_id = $1
            GROUP BY campaign_id, creator_id
            ORDER BY total DESC, creator_id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn creator_score(
        &self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> StoreResult<Option<i64>> {
        Ok(sqlx::query_scalar::<_, i64>(
            r#"
            SELECT total
            FROM creator_scores
            WHERE campaign_id = $1 AND creator_id = $2
            "#,
        )
        .bind(campaign_id)
        .bind(creator_id)
        .fetch_optional(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn rebuild_creator_scores(&self, campaign_id: CampaignId) -> StoreResult<u64> {
        let mut tx = Tx::begin(self.pool()).await?;
        tx.lock_campaign(campaign_id).await?;

        sqlx::query("DELETE FROM creator_scores WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&mut **tx.inner_mut()?)
            .await?;

        let rebuilt = sqlx::query(
            r#"
            INSERT INTO creator_scores (
                campaign_id,
                creator_id,
                total,
                updated_at
            )
            SELECT campaign_id, creator_id, SUM(delta)::BIGINT, NOW()
            FROM points_ledger
            WHERE campaign_id = $1
            GROUP BY campaign_id, creator_id
            "#,
        )
        .bind(campaign_id)
        .execute(&mut **tx.inner_mut()?)
        .await?
        .rows_affected();

        tx.commit().await?;
        Ok(rebuilt)
    }
}
