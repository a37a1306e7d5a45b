use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{CampaignId, CompanyId, CreatorId, text_enum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    ViewsMilestone,
    LikeMilestone,
    CommentMilestone,
    MilestoneReached,
    DeliveryApproved,
    ManualAdjustment,
}

text_enum!(EventType {
    ViewsMilestone => "views-milestone",
    LikeMilestone => "like-milestone",
    CommentMilestone => "comment-milestone",
    MilestoneReached => "milestone-reached",
    DeliveryApproved => "delivery-approved",
    ManualAdjustment => "manual-adjustment",
});

/// Natural key of a ledger row; a second append with the same key is a no-op
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LedgerKey {
    pub campaign_id: CampaignId,
    pub creator_id: CreatorId,
    pub event_type: EventType,
    pub ref_type: String,
    pub ref_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewLedgerEntry {
    pub company_id: CompanyId,
    pub campaign_id: CampaignId,
    pub creator_id: CreatorId,
    pub delta: i64,
    pub event_type: EventType,
    pub ref_type: String,
    pub ref_id: String,
    pub note: Option<String>,
}

impl NewLedgerEntry {
    pub fn key(&self) -> LedgerKey {
        LedgerKey {
            campaign_id: self.campaign_id,
            creator_id: self.creator_id,
            event_type: self.event_type,
            ref_type: self.ref_type.clone(),
            ref_id: self.ref_id.clone(),
        }
    }

    pub fn into_entry(self, id: i64, created_at: NaiveDateTime) -> LedgerEntry {
        LedgerEntry {
            id,
            company_id: self.company_id,
            campaign_id: self.campaign_id,
            creator_id: self.creator_id,
            delta: self.delta,
            event_type: self.event_type,
            ref_type: self.ref_type,
            ref_id: self.ref_id,
            note: self.note,
            created_at,
        }
    }
}

/// Immutable ledger row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct LedgerEntry {
    pub id: i64,
    pub company_id: CompanyId,
    pub campaign_id: CampaignId,
    pub creator_id: CreatorId,
    pub delta: i64,
    pub event_type: EventType,
    pub ref_type: String,
    pub ref_id: String,
    pub note: Option<String>,
    pub created_at: NaiveDateTime,
}

/// Summed points for one creator within one campaign
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CreatorScore {
    pub campaign_id: CampaignId,
    pub creator_id: CreatorId,
    pub total: i64,
}
