use async_trait::async_trait;
use tracing::instrument;

use super::sql_fragment;
use crate::db::PgStore;
use crate::db::models::rules::{CampaignRuleRow, RuleRow};
use crate::db::models::{CampaignId, CompanyId};
use crate::store::{RuleStore, StoreResult};

#[async_trait]
impl RuleStore for PgStore {
    #[instrument(skip(self))]
    async fn campaign_rules(
        &self,
        campaign_id: CampaignId,
    ) -> StoreResult<Option<CampaignRuleRow>> {
        Ok(sqlx::query_as::<_, CampaignRuleRow>(&format!(
            "SELECT overrides_brand, {} FROM campaign_point_rules WHERE campaign_id = $1",
            sql_fragment::RULE_FIELDS
        ))
        .bind(campaign_id)
        .fetch_optional(self.pool())
        .await?)
    }

    #[instrument(skip(self))]
    async fn brand_rules(&self, company_id: CompanyId) -> StoreResult<Option<RuleRow>> {
        Ok(sqlx::query_as::<_, RuleRow>(&format!(
            "SELECT {} FROM brand_point_rules WHERE company_id = $1",
            sql_fragment::RULE_FIELDS
        ))
        .bind(company_id)
        .fetch_optional(self.pool())
        .await?)
    }
}
