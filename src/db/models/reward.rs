use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{CampaignId, CompanyId, CreatorId, text_enum};

/// Cumulative-point threshold configured on a campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Milestone {
    pub id: i64,
    pub campaign_id: CampaignId,
    pub threshold_points: i64,
    pub label: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardStatus {
    Pending,
    Approved,
    Rejected,
    Paid,
    Completed,
}

text_enum!(RewardStatus {
    Pending => "pending",
    Approved => "approved",
    Rejected => "rejected",
    Paid => "paid",
    Completed => "completed",
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntitlement {
    pub company_id: CompanyId,
    pub campaign_id: CampaignId,
    pub creator_id: CreatorId,
    pub milestone_id: i64,
    pub points_at_grant: i64,
}

/// Reward owed to a creator for crossing a milestone; at most one per (creator, milestone).
/// Status changes after creation belong to the approval workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RewardEntitlement {
    pub id: i64,
    pub company_id: CompanyId,
    pub campaign_id: CampaignId,
    pub creator_id: CreatorId,
    pub milestone_id: i64,
    pub points_at_grant: i64,
    pub status: RewardStatus,
    pub created_at: NaiveDateTime,
}
