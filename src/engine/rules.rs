use std::sync::Arc;

use tracing::instrument;

use crate::db::models::rules::EffectiveRules;
use crate::db::models::{CampaignId, CompanyId};
use crate::store::RuleStore;

/// Picks the rule set a campaign is scored with: an overriding campaign row, else the brand's
/// defaults, else the global defaults. Never fails; lookup errors fall through to the next level.
#[derive(Debug)]
pub struct RuleResolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: RuleStore + ?Sized> RuleResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self), fields(campaign = %campaign_id, company = %company_id))]
    pub async fn resolve(&self, campaign_id: CampaignId, company_id: CompanyId) -> EffectiveRules {
        match self.store.campaign_rules(campaign_id).await {
            Ok(Some(row)) if row.overrides_brand => {
                tracing::debug!("using campaign rule override");
                return row.rules.over_defaults();
            }
            Ok(_) => (),
            Err(e) => {
                tracing::warn!(error = ?e, "campaign rule lookup failed, trying brand defaults");
            }
        }

        match self.store.brand_rules(company_id).await {
            Ok(Some(row)) => {
                tracing::debug!("using brand default rules");
                row.over_defaults()
            }
            Ok(None) => {
                tracing::debug!("no rule rows, using global defaults");
                EffectiveRules::default()
            }
            Err(e) => {
                tracing::warn!(error = ?e, "brand rule lookup failed, using global defaults");
                EffectiveRules::default()
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::db::models::rules::{CampaignRuleRow, RuleRow};
    use crate::store::memory::MemoryStore;

    fn row(per_like: f64) -> RuleRow {
        RuleRow {
            points_per_like: Some(per_like),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_global_defaults_without_rows() {
        let store = Arc::new(MemoryStore::new());
        let rules = RuleResolver::new(store)
            .resolve(CampaignId(1), CompanyId(1))
            .await;

        assert_eq!(rules, EffectiveRules::default());
    }

    #[tokio::test]
    async fn test_brand_defaults_apply_without_override_flag() {
        let store = Arc::new(MemoryStore::new());
        store.set_brand_rules(CompanyId(1), row(3.0));
        store.set_campaign_rules(
            CampaignId(1),
            CampaignRuleRow {
                overrides_brand: false,
                rules: row(9.0),
            },
        );

        let rules = RuleResolver::new(store)
            .resolve(CampaignId(1), CompanyId(1))
            .await;
        assert_eq!(rules.rates.points_per_like, 3.0);
    }

    #[tokio::test]
    async fn test_campaign_override_replaces_brand() {
        let store = Arc::new(MemoryStore::new());
        store.set_brand_rules(
            CompanyId(1),
            RuleRow {
                points_per_like: Some(3.0),
                max_points_per_post: Some(7),
                ..Default::default()
            },
        );
        store.set_campaign_rules(
            CampaignId(1),
            CampaignRuleRow {
                overrides_brand: true,
                rules: row(9.0),
            },
        );

        let rules = RuleResolver::new(store)
            .resolve(CampaignId(1), CompanyId(1))
            .await;
        assert_eq!(rules.rates.points_per_like, 9.0);
        // unset override columns come from the global defaults, not the brand row
        assert_eq!(
            rules.caps.max_points_per_post,
            crate::constants::DEFAULT_MAX_POINTS_PER_POST
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_falls_back() {
        let store = Arc::new(MemoryStore::new());
        store.set_brand_rules(CompanyId(1), row(3.0));
        store.fail_rule_lookups(true);

        let rules = RuleResolver::new(store)
            .resolve(CampaignId(1), CompanyId(1))
            .await;
        assert_eq!(rules, EffectiveRules::default());
    }
}
