use std::sync::Arc;

use tracing::instrument;

use crate::db::models::ledger::{LedgerEntry, NewLedgerEntry};
use crate::db::models::{CampaignId, CreatorId};
use crate::engine::EngineResult;
use crate::store::LedgerStore;
use crate::util::clock::Clock;

/// Append-only points ledger. Appends are idempotent on
/// (campaign, creator, event type, ref type, ref id).
#[derive(Debug)]
pub struct PointsLedger<S: ?Sized> {
    store: Arc<S>,
    clock: Arc<dyn Clock>,
}

impl<S: LedgerStore + ?Sized> PointsLedger<S> {
    pub fn new(store: Arc<S>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns `None` when the entry's key is already present.
    #[instrument(skip(self, entry), fields(campaign = %entry.campaign_id, creator = %entry.creator_id, event = %entry.event_type))]
    pub async fn append(&self, entry: &NewLedgerEntry) -> EngineResult<Option<LedgerEntry>> {
        let written = self
            .store
            .append(entry, self.clock.now().naive_utc())
            .await?;

        if written.is_none() {
            tracing::debug!(ref_id = entry.ref_id, "ledger entry already present");
        }

        Ok(written)
    }

    pub async fn sum_for(&self, creator_id: CreatorId, campaign_id: CampaignId) -> EngineResult<i64> {
        Ok(self.store.sum_for(creator_id, campaign_id).await?)
    }

    pub async fn history_for(
        &self,
        creator_id: CreatorId,
        campaign_id: Option<CampaignId>,
        limit: i64,
    ) -> EngineResult<Vec<LedgerEntry>> {
        Ok(self
            .store
            .history_for(creator_id, campaign_id, limit)
            .await?)
    }

    pub async fn entries_for_campaign(
        &self,
        campaign_id: CampaignId,
        limit: i64,
    ) -> EngineResult<Vec<LedgerEntry>> {
        Ok(self.store.entries_for_campaign(campaign_id, limit).await?)
    }

    /// Cached total, falling back to the ledger sum when no cache row exists
    pub async fn creator_total(
        &self,
        campaign_id: CampaignId,
        creator_id: CreatorId,
    ) -> EngineResult<i64> {
        match self.store.creator_score(campaign_id, creator_id).await? {
            Some(total) => Ok(total),
            None => self.sum_for(creator_id, campaign_id).await,
        }
    }

    #[instrument(skip(self))]
    pub async fn rebuild_creator_scores(&self, campaign_id: CampaignId) -> EngineResult<u64> {
        let rebuilt = self.store.rebuild_creator_scores(campaign_id).await?;
        tracing::info!(rebuilt, "creator score cache rebuilt from ledger");
        Ok(rebuilt)
    }
}

#[cfg(test)]
mod test {
    use chrono::DateTime;

    use super::*;
    use crate::db::models::CompanyId;
    use crate::db::models::ledger::EventType;
    use crate::store::memory::MemoryStore;
    use crate::util::clock::ManualClock;

    fn ledger() -> (Arc<MemoryStore>, Arc<ManualClock>, PointsLedger<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(
            DateTime::parse_from_rfc3339("2026-05-01T08:00:00+00:00").unwrap(),
        ));
        (store.clone(), clock.clone(), PointsLedger::new(store, clock))
    }

    fn entry(campaign: i64, creator: i64, delta: i64, ref_id: &str) -> NewLedgerEntry {
        NewLedgerEntry {
            company_id: CompanyId(1),
            campaign_id: CampaignId(campaign),
            creator_id: CreatorId(creator),
            delta,
            event_type: EventType::DeliveryApproved,
            ref_type: "delivery".to_string(),
            ref_id: ref_id.to_string(),
            note: None,
        }
    }

    #[tokio::test]
    async fn test_duplicate_append_is_noop() {
        let (_, _, ledger) = ledger();

        let first = ledger.append(&entry(1, 7, 40, "d-1")).await.unwrap();
        assert!(first.is_some());

        let again = ledger.append(&entry(1, 7, 999, "d-1")).await.unwrap();
        assert!(again.is_none());

        assert_eq!(ledger.sum_for(CreatorId(7), CampaignId(1)).await.unwrap(), 40);
        assert_eq!(ledger.entries_for_campaign(CampaignId(1), 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_history_is_newest_first_and_filterable() {
        let (_, clock, ledger) = ledger();

        ledger.append(&entry(1, 7, 1, "a")).await.unwrap();
        clock.advance(chrono::TimeDelta::minutes(1));
        ledger.append(&entry(2, 7, 2, "b")).await.unwrap();
        clock.advance(chrono::TimeDelta::minutes(1));
        ledger.append(&entry(1, 7, 3, "c")).await.unwrap();

        let all = ledger.history_for(CreatorId(7), None, 10).await.unwrap();
        let refs: Vec<&str> = all.iter().map(|e| e.ref_id.as_str()).collect();
        assert_eq!(refs, ["c", "b", "a"]);

        let only_first = ledger
            .history_for(CreatorId(7), Some(CampaignId(1)), 10)
            .await
            .unwrap();
        assert_eq!(only_first.len(), 2);

        let limited = ledger.history_for(CreatorId(7), None, 1).await.unwrap();
        assert_eq!(limited[0].ref_id, "c");
    }

    #[tokio::test]
    async fn test_score_cache_rebuilds_from_ledger() {
        let (store, _, ledger) = ledger();

        ledger.append(&entry(1, 7, 10, "a")).await.unwrap();
        ledger.append(&entry(1, 8, 4, "b")).await.unwrap();
        store.wipe_creator_scores();

        assert_eq!(store.creator_score(CampaignId(1), CreatorId(7)).await.unwrap(), None);
        assert_eq!(ledger.creator_total(CampaignId(1), CreatorId(7)).await.unwrap(), 10);

        assert_eq!(ledger.rebuild_creator_scores(CampaignId(1)).await.unwrap(), 2);
        assert_eq!(store.creator_score(CampaignId(1), CreatorId(8)).await.unwrap(), Some(4));
    }
}
