use std::sync::Arc;

use tracing::instrument;

use crate::constants::REF_TYPE_MILESTONE;
use crate::db::models::ledger::{EventType, NewLedgerEntry};
use crate::db::models::reward::NewEntitlement;
use crate::db::models::{CampaignId, CompanyId, CreatorId};
use crate::engine::EngineResult;
use crate::store::RewardStore;
use crate::util::clock::Clock;

/// Grants one pending reward entitlement per milestone a creator's total has reached.
#[derive(Debug)]
pub struct MilestoneRewardChecker<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: RewardStore + ?Sized> MilestoneRewardChecker<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns how many entitlements were created by this call; re-running with the same total
    /// creates none.
    #[instrument(skip(self), fields(campaign = %campaign_id, creator = %creator_id))]
    pub async fn check_and_grant(
        &self,
        company_id: CompanyId,
        campaign_id: CampaignId,
        creator_id: CreatorId,
        current_total: i64,
    ) -> EngineResult<usize> {
        let milestones = self.store.milestones_for(campaign_id).await?;
        let at = self.clock.now().naive_utc();
        let mut created = 0;

        for milestone in milestones
            .iter()
            .filter(|m| m.threshold_points <= current_total)
        {
            if self
                .store
                .entitlement_exists(creator_id, milestone.id)
                .await?
            {
                continue;
            }

            let entitlement = NewEntitlement {
                company_id,
                campaign_id,
                creator_id,
                milestone_id: milestone.id,
                points_at_grant: current_total,
            };

            let audit = NewLedgerEntry {
                company_id,
                campaign_id,
                creator_id,
                delta: 0,
                event_type: EventType::MilestoneReached,
                ref_type: REF_TYPE_MILESTONE.to_string(),
                ref_id: milestone.id.to_string(),
                note: Some(format!(
                    "{} reached at {} points",
                    milestone.label, current_total
                )),
            };

            let Some(granted) = self
                .store
                .grant_milestone(&entitlement, &audit, at)
                .await?
            else {
                // lost a race with another checker
                continue;
            };

            tracing::info!(
                milestone = milestone.id,
                threshold = milestone.threshold_points,
                entitlement = granted.id,
                "milestone reward granted"
            );
            created += 1;
        }

        Ok(created)
    }
}

#[cfg(test)]
mod test {
    use chrono::DateTime;

    use super::*;
    use crate::db::models::reward::RewardStatus;
    use crate::store::LedgerStore;
    use crate::store::memory::MemoryStore;
    use crate::util::clock::ManualClock;

    fn checker() -> (Arc<MemoryStore>, MilestoneRewardChecker<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-05-01T08:00:00+00:00").unwrap(),
        ));
        store.add_milestone(CampaignId(1), 500, "bronze");
        store.add_milestone(CampaignId(1), 1000, "silver");
        store.add_milestone(CampaignId(1), 5000, "gold");
        (store.clone(), MilestoneRewardChecker::new(store, clock))
    }

    #[tokio::test]
    async fn test_rerun_grants_nothing_new() {
        let (store, checker) = checker();

        let first = checker
            .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), 1000)
            .await
            .unwrap();
        let second = checker
            .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), 1000)
            .await
            .unwrap();

        assert_eq!(first, 2);
        assert_eq!(second, 0);

        let granted = store
            .entitlements_for(CampaignId(1), CreatorId(7))
            .await
            .unwrap();
        assert_eq!(granted.len(), 2);
        assert!(granted.iter().all(|e| e.status == RewardStatus::Pending));
        assert!(granted.iter().all(|e| e.points_at_grant == 1000));
    }

    #[tokio::test]
    async fn test_audit_entries_carry_no_points() {
        let (store, checker) = checker();

        checker
            .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), 700)
            .await
            .unwrap();

        let history = store
            .history_for(CreatorId(7), Some(CampaignId(1)), 10)
            .await
            .unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].event_type, EventType::MilestoneReached);
        assert_eq!(history[0].delta, 0);
        assert_eq!(store.sum_for(CreatorId(7), CampaignId(1)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_later_crossing_grants_only_new_milestone() {
        let (_, checker) = checker();

        let early = checker
            .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), 600)
            .await
            .unwrap();
        let later = checker
            .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), 5200)
            .await
            .unwrap();

        assert_eq!(early, 1);
        assert_eq!(later, 2);
    }

    #[tokio::test]
    async fn test_failed_grant_leaves_nothing_behind() {
        let (store, checker) = checker();

        store.fail_ledger_writes(true);
        let failed = checker
            .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), 600)
            .await;
        assert!(failed.is_err());
        assert!(
            store
                .entitlements_for(CampaignId(1), CreatorId(7))
                .await
                .unwrap()
                .is_empty()
        );

        store.clear_failures();
        let created = checker
            .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), 600)
            .await
            .unwrap();
        assert_eq!(created, 1);

        let audit = store
            .history_for(CreatorId(7), Some(CampaignId(1)), 10)
            .await
            .unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].event_type, EventType::MilestoneReached);
    }

    #[tokio::test]
    async fn test_no_milestones_configured() {
        let (store, checker) = checker();

        let created = checker
            .check_and_grant(CompanyId(1), CampaignId(2), CreatorId(7), 1_000_000)
            .await
            .unwrap();
        assert_eq!(created, 0);
        assert!(
            store
                .entitlements_for(CampaignId(2), CreatorId(7))
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_total_below_every_threshold() {
        let (store, checker) = checker();

        for total in [0, 499] {
            let created = checker
                .check_and_grant(CompanyId(1), CampaignId(1), CreatorId(7), total)
                .await
                .unwrap();
            assert_eq!(created, 0);
        }
        assert_eq!(store.sum_for(CreatorId(7), CampaignId(1)).await.unwrap(), 0);
        assert!(
            store
                .history_for(CreatorId(7), None, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }
}
