use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::db::models::ledger::CreatorScore;
use crate::db::models::{CampaignId, CreatorId};
use crate::engine::EngineResult;
use crate::store::LedgerStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankEntry {
    pub rank: i64,
    pub creator_id: CreatorId,
    pub total_points: i64,
}

/// Derives campaign rankings from ledger sums. Nothing about a rank is stored, so the list can
/// always be reproduced from the ledger alone.
#[derive(Debug)]
pub struct RankCalculator<S: ?Sized> {
    store: Arc<S>,
}

impl<S: LedgerStore + ?Sized> RankCalculator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    #[instrument(skip(self))]
    pub async fn ranks_for(&self, campaign_id: CampaignId) -> EngineResult<Vec<RankEntry>> {
        let totals = self.store.creator_totals(campaign_id).await?;
        Ok(rank_totals(totals))
    }
}

/// Orders by total descending, then creator id ascending, and numbers from 1.
pub fn rank_totals(mut totals: Vec<CreatorScore>) -> Vec<RankEntry> {
    totals.sort_by(|a, b| {
        b.total
            .cmp(&a.total)
            .then_with(|| a.creator_id.cmp(&b.creator_id))
    });

    totals
        .into_iter()
        .enumerate()
        .map(|(i, score)| RankEntry {
            rank: i as i64 + 1,
            creator_id: score.creator_id,
            total_points: score.total,
        })
        .collect()
}

#[cfg(test)]
mod test {
    use chrono::DateTime;

    use super::*;
    use crate::db::models::CompanyId;
    use crate::db::models::ledger::{EventType, NewLedgerEntry};
    use crate::store::memory::MemoryStore;

    fn score(creator: i64, total: i64) -> CreatorScore {
        CreatorScore {
            campaign_id: CampaignId(1),
            creator_id: CreatorId(creator),
            total,
        }
    }

    #[test]
    fn test_ties_break_on_creator_id() {
        let ranked = rank_totals(vec![score(9, 10), score(3, 25), score(4, 10), score(1, 10)]);
        let order: Vec<i64> = ranked.iter().map(|r| r.creator_id.0).collect();

        assert_eq!(order, [3, 1, 4, 9]);
        assert_eq!(ranked[0].rank, 1);
        assert_eq!(ranked[3].rank, 4);
    }

    #[tokio::test]
    async fn test_ranks_come_from_ledger_not_cache() {
        let store = Arc::new(MemoryStore::new());
        let at = DateTime::parse_from_rfc3339("2026-05-01T08:00:00+00:00")
            .unwrap()
            .naive_utc();

        for (creator, delta, ref_id) in [(7, 5, "a"), (8, 9, "b"), (7, 6, "c"), (8, -2, "d")] {
            let entry = NewLedgerEntry {
                company_id: CompanyId(1),
                campaign_id: CampaignId(1),
                creator_id: CreatorId(creator),
                delta,
                event_type: EventType::ManualAdjustment,
                ref_type: "manual".to_string(),
                ref_id: ref_id.to_string(),
                note: None,
            };
            store.append(&entry, at).await.unwrap();
        }

        let calculator = RankCalculator::new(store.clone());
        let before = calculator.ranks_for(CampaignId(1)).await.unwrap();

        store.wipe_creator_scores();
        let after = calculator.ranks_for(CampaignId(1)).await.unwrap();

        assert_eq!(before, after);
        assert_eq!(
            after,
            vec![
                RankEntry { rank: 1, creator_id: CreatorId(7), total_points: 11 },
                RankEntry { rank: 2, creator_id: CreatorId(8), total_points: 7 },
            ]
        );
    }
}
