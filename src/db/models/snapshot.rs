use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use super::{CampaignId, CreatorId, Platform, PostId};

/// Identifies the single snapshot row kept for a post within a campaign
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotKey {
    pub campaign_id: CampaignId,
    pub post_id: PostId,
    pub platform: Platform,
}

impl SnapshotKey {
    pub fn new(campaign_id: CampaignId, post_id: PostId, platform: Platform) -> Self {
        Self {
            campaign_id,
            post_id,
            platform,
        }
    }
}

/// Per-post record of what has already been converted into points, plus the running statistics
/// the spike check is computed from.
///
/// `last_awarded_*` never decreases and never exceeds the matching `current_*` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct MetricSnapshot {
    pub campaign_id: CampaignId,
    pub post_id: PostId,
    pub platform: Platform,
    pub creator_id: CreatorId,

    pub current_views: i64,
    pub current_likes: i64,
    pub current_comments: i64,

    pub last_awarded_views: i64,
    pub last_awarded_likes: i64,
    pub last_awarded_comments: i64,

    pub update_count: i64,
    pub views_delta_sum: i64,
    pub likes_delta_sum: i64,
    pub comments_delta_sum: i64,

    pub total_points_awarded: i64,
    pub points_awarded_today: i64,
    pub last_points_date: Option<NaiveDate>,

    pub flagged_for_review: bool,
    pub flag_reason: Option<String>,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl MetricSnapshot {
    /// A fresh snapshot for a post seen for the first time
    pub fn new(key: &SnapshotKey, creator_id: CreatorId, at: NaiveDateTime) -> Self {
        Self {
            campaign_id: key.campaign_id,
            post_id: key.post_id.clone(),
            platform: key.platform,
            creator_id,
            current_views: 0,
            current_likes: 0,
            current_comments: 0,
            last_awarded_views: 0,
            last_awarded_likes: 0,
            last_awarded_comments: 0,
            update_count: 0,
            views_delta_sum: 0,
            likes_delta_sum: 0,
            comments_delta_sum: 0,
            total_points_awarded: 0,
            points_awarded_today: 0,
            last_points_date: None,
            flagged_for_review: false,
            flag_reason: None,
            created_at: at,
            updated_at: at,
        }
    }

    pub fn key(&self) -> SnapshotKey {
        SnapshotKey::new(self.campaign_id, self.post_id.clone(), self.platform)
    }

    /// Points already granted on `today`; stale counters from an earlier day read as zero.
    pub fn points_on(&self, today: NaiveDate) -> i64 {
        match self.last_points_date {
            Some(date) if date == today => self.points_awarded_today,
            _ => 0,
        }
    }
}
