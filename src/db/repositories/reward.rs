use async_trait::async_trait;
use chrono::NaiveDateTime;
use tracing::instrument;

use super::{Tx, sql_fragment};
use crate::db::PgStore;
use crate::db::models::ledger::NewLedgerEntry;
use crate::db::models::reward::{Milestone, NewEntitlement, RewardEntitlement};
use crate::db::models::{CampaignId, CreatorId};
use crate::store::{RewardStore, StoreResult};

#[async_trait]
impl RewardStore for PgStore {
    #[instrument(skip(self))]
    async fn milestones_for(&self, campaign_id: CampaignId) -> StoreResult<Vec<Milestone>> {
        Ok(sqlx::query_as::<_, Milestone>(
            r#"
            SELECT id, campaign_id, threshold_points, label
            FROM campaign_milestones
            WHERE campaign_id = $1
            ORDER BY threshold_points ASC, id ASC
            "#,
        )
        .bind(campaign_id)
        .fetch_all(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn entitlement_exists(
        &self,
        creator_id: CreatorId,
        milestone_id: i64,
    ) -> StoreResult<bool> {
        Ok(sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM reward_entitlements
                WHERE creator_id = $1 AND milestone_id = $2
            )
            "#,
        )
        .bind(creator_id)
        .bind(milestone_id)
        .fetch_one(self.pool())
        .await?)
    }

    #[instrument(skip(self, entitlement, audit), fields(creator = %entitlement.creator_id, milestone = entitlement.milestone_id))]
    async fn grant_milestone(
        &self,
        entitlement: &NewEntitlement,
        audit: &NewLedgerEntry,
        at: NaiveDateTime,
    ) -> StoreResult<Option<RewardEntitlement>> {
        let mut tx = Tx::begin(self.pool()).await?;

        let Some(granted) = tx.insert_entitlement(entitlement, at).await? else {
            tx.rollback().await?;
            return Ok(None);
        };
        tx.record_entry(audit, at).await?;
        tx.commit().await?;

        Ok(Some(granted))
    }

    #[instrument(skip(self))]
    async fn entitlements_for(
        &self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> StoreResult<Vec<RewardEntitlement>> {
        Ok(sqlx::query_as::<_, RewardEntitlement>(&format!(
            r#"
            SELECT {}
            FROM reward_entitlements
            WHERE campaign_id = $1 AND creator_id = $2
            ORDER BY created_at ASC, id ASC
            "#,
            sql_fragment::ENTITLEMENT_FIELDS
        ))
        .bind(campaign_id)
        .bind(creator_id)
        .fetch_all(self.pool())
        .await?)
    }
}
