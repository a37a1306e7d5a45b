use serde::{Deserialize, Serialize};

use super::Platform;
use crate::constants::*;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoringRates {
    pub points_per_1k_views: f64,
    pub points_per_like: f64,
    pub points_per_comment: f64,
}

impl ScoringRates {
    pub fn has_nonzero_rate(&self) -> bool {
        self.points_per_1k_views > 0.0 || self.points_per_like > 0.0 || self.points_per_comment > 0.0
    }
}

impl Default for ScoringRates {
    fn default() -> Self {
        Self {
            points_per_1k_views: DEFAULT_POINTS_PER_1K_VIEWS,
            points_per_like: DEFAULT_POINTS_PER_LIKE,
            points_per_comment: DEFAULT_POINTS_PER_COMMENT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapThresholds {
    pub max_points_per_post: i64,
    pub max_points_per_day: i64,
    pub max_points_total_campaign: i64,
    /// How many days back a post may have been published and still count
    pub counting_window_days: i64,
}

impl Default for CapThresholds {
    fn default() -> Self {
        Self {
            max_points_per_post: DEFAULT_MAX_POINTS_PER_POST,
            max_points_per_day: DEFAULT_MAX_POINTS_PER_DAY,
            max_points_total_campaign: DEFAULT_MAX_POINTS_TOTAL_CAMPAIGN,
            counting_window_days: DEFAULT_COUNTING_WINDOW_DAYS,
        }
    }
}

/// Complete rule set a campaign is scored with
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveRules {
    pub rates: ScoringRates,
    pub caps: CapThresholds,
    pub allowed_platforms: Vec<Platform>,
}

impl Default for EffectiveRules {
    fn default() -> Self {
        Self {
            rates: ScoringRates::default(),
            caps: CapThresholds::default(),
            allowed_platforms: DEFAULT_ALLOWED_PLATFORMS.to_vec(),
        }
    }
}

/// Brand-level or campaign-level rule row; any column may be left unset
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct RuleRow {
    pub points_per_1k_views: Option<f64>,
    pub points_per_like: Option<f64>,
    pub points_per_comment: Option<f64>,
    pub max_points_per_post: Option<i64>,
    pub max_points_per_day: Option<i64>,
    pub max_points_total_campaign: Option<i64>,
    pub counting_window_days: Option<i64>,
    pub allowed_platforms: Option<Vec<Platform>>,
}

impl RuleRow {
    /// Fills unset columns from the global defaults. Negative values are clamped to zero.
    pub fn over_defaults(&self) -> EffectiveRules {
        let defaults = EffectiveRules::default();
        let rate = |v: Option<f64>, d: f64| v.unwrap_or(d).max(0.0);
        let cap = |v: Option<i64>, d: i64| v.unwrap_or(d).max(0);

        EffectiveRules {
            rates: ScoringRates {
                points_per_1k_views: rate(
                    self.points_per_1k_views,
                    defaults.rates.points_per_1k_views,
                ),
                points_per_like: rate(self.points_per_like, defaults.rates.points_per_like),
                points_per_comment: rate(
                    self.points_per_comment,
                    defaults.rates.points_per_comment,
                ),
            },
            caps: CapThresholds {
                max_points_per_post: cap(
                    self.max_points_per_post,
                    defaults.caps.max_points_per_post,
                ),
                max_points_per_day: cap(self.max_points_per_day, defaults.caps.max_points_per_day),
                max_points_total_campaign: cap(
                    self.max_points_total_campaign,
                    defaults.caps.max_points_total_campaign,
                ),
                counting_window_days: cap(
                    self.counting_window_days,
                    defaults.caps.counting_window_days,
                ),
            },
            allowed_platforms: match &self.allowed_platforms {
                Some(platforms) if !platforms.is_empty() => platforms.clone(),
                _ => defaults.allowed_platforms,
            },
        }
    }
}

/// Campaign-level rule row; only replaces the brand defaults when `overrides_brand` is set
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct CampaignRuleRow {
    pub overrides_brand: bool,
    #[sqlx(flatten)]
    pub rules: RuleRow,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_partial_row_fills_from_defaults() {
        let row = RuleRow {
            points_per_like: Some(2.0),
            max_points_per_day: Some(-5),
            allowed_platforms: Some(vec![]),
            ..Default::default()
        };

        let rules = row.over_defaults();
        assert_eq!(rules.rates.points_per_like, 2.0);
        assert_eq!(rules.rates.points_per_1k_views, DEFAULT_POINTS_PER_1K_VIEWS);
        assert_eq!(rules.caps.max_points_per_day, 0);
        assert_eq!(rules.caps.max_points_per_post, DEFAULT_MAX_POINTS_PER_POST);
        assert_eq!(rules.allowed_platforms, DEFAULT_ALLOWED_PLATFORMS.to_vec());
    }

    #[test]
    fn test_nonzero_rate_detection() {
        let zero = ScoringRates {
            points_per_1k_views: 0.0,
            points_per_like: 0.0,
            points_per_comment: 0.0,
        };
        assert!(!zero.has_nonzero_rate());
        assert!(ScoringRates::default().has_nonzero_rate());
    }
}
