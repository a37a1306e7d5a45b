use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::{CreatorId, Platform, PostId};

/// Current cumulative counts for a creator's post, as supplied by the metric collector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub post_id: PostId,
    pub platform: Platform,
    pub creator_id: CreatorId,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub posted_at: NaiveDateTime,
}
