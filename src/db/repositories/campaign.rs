use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeDelta};
use tracing::instrument;

use crate::db::PgStore;
use crate::db::models::post::Post;
use crate::db::models::{CampaignId, CampaignRef, Platform};
use crate::store::{CampaignSource, StoreResult};

#[async_trait]
impl CampaignSource for PgStore {
    #[instrument(skip(self))]
    async fn eligible_campaigns(&self) -> StoreResult<Vec<CampaignRef>> {
        Ok(sqlx::query_as::<_, CampaignRef>(
            r#"
            SELECT id AS campaign_id, company_id
            FROM campaigns
            WHERE status = 'active' AND gamification_enabled
            ORDER BY id
            "#,
        )
        .fetch_all(self.pool())
        .await?)
    }

    #[instrument(skip(self, platforms))]
    async fn eligible_posts(
        &self,
        campaign_id: CampaignId,
        platforms: &[Platform],
        window_days: i64,
        now: NaiveDateTime,
    ) -> StoreResult<Vec<Post>> {
        let earliest = TimeDelta::try_days(window_days)
            .and_then(|window| now.checked_sub_signed(window))
            .unwrap_or(NaiveDateTime::MIN);
        let platforms: Vec<&str> = platforms.iter().map(Platform::as_str).collect();

        Ok(sqlx::query_as::<_, Post>(
            r#"
            SELECT
                p.post_id,
                p.platform,
                p.creator_id,
                p.views,
                p.likes,
                p.comments,
                p.posted_at
            FROM creator_posts p
            JOIN campaign_applications a
                ON a.campaign_id = p.campaign_id
                AND a.creator_id = p.creator_id
            WHERE p.campaign_id = $1
            AND a.status = 'accepted'
            AND p.platform = ANY($2)
            AND p.posted_at >= $3
            ORDER BY p.posted_at ASC, p.post_id ASC
            "#,
        )
        .bind(campaign_id)
        .bind(platforms)
        .bind(earliest)
        .fetch_all(self.pool())
        .await?)
    }
}
