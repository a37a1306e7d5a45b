use crate::db::models::Platform;

/// Observations a post must have been seen for before it can earn points.
pub const SEEDING_MIN_SAMPLES: i64 = 3;

/// A delta larger than this multiple of the historical per-observation average gets flagged.
pub const FRAUD_SPIKE_MULTIPLIER: f64 = 10.0;

pub const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 15 * 60;
pub const DEFAULT_STARTUP_DELAY_SECS: u64 = 10;
pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
pub const DEFAULT_HISTORY_LIMIT: i64 = 100;

pub const ENV_PREFIX: &str = "POINTS_";
pub const SERVICE_NAME: &str = "engagement-points";
pub const TRACER_NAME: &str = "engagement-points-tracer";
pub const DEFAULT_LOG_FILTER: &str = "engagement_points=debug,sqlx=info,info";

// GLOBAL RULE DEFAULTS
//
// Used when neither the campaign nor the brand has a rule row, and to fill unset columns.
pub const DEFAULT_POINTS_PER_1K_VIEWS: f64 = 1.0;
pub const DEFAULT_POINTS_PER_LIKE: f64 = 0.1;
pub const DEFAULT_POINTS_PER_COMMENT: f64 = 0.5;

pub const DEFAULT_MAX_POINTS_PER_POST: i64 = 500;
pub const DEFAULT_MAX_POINTS_PER_DAY: i64 = 2_000;
pub const DEFAULT_MAX_POINTS_TOTAL_CAMPAIGN: i64 = 20_000;
pub const DEFAULT_COUNTING_WINDOW_DAYS: i64 = 30;

pub const DEFAULT_ALLOWED_PLATFORMS: [Platform; 2] = [Platform::Instagram, Platform::Tiktok];

// LEDGER REFERENCE TYPES
pub const REF_TYPE_POST: &str = "post";
pub const REF_TYPE_MILESTONE: &str = "milestone";
