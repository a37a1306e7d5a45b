//! Proportional cap enforcement.
//!
//! Each stage scales every component by the same ratio so the views/likes/comments split of an
//! award survives capping. Components are floored after scaling, which keeps the scaled sum at or
//! below what the cap leaves room for.

use crate::db::models::rules::CapThresholds;

/// Scales `components` so that `outside + sum(components) <= cap`.
///
/// `outside` is what has already been counted against the cap elsewhere. Returns the components
/// untouched when they fit, and all zeros when the cap is already used up.
pub fn scale_to_cap<const N: usize>(components: [i64; N], outside: i64, cap: i64) -> [i64; N] {
    let components = components.map(|c| c.max(0));
    // saturated raw points can sum past i64::MAX
    let total: i128 = components.iter().map(|&c| i128::from(c)).sum();
    let room = i128::from(cap.saturating_sub(outside).max(0));

    if total <= room {
        return components;
    }

    if room == 0 {
        return [0; N];
    }

    // floor(c * room / total) <= room, which fits back into i64
    components.map(|c| (i128::from(c) * room / total) as i64)
}

/// Running totals the three cap stages are measured against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CapUsage {
    /// Points this post has earned before the current award
    pub post_total: i64,
    /// Points the campaign has granted today
    pub day_total: i64,
    /// Points the campaign has granted overall
    pub campaign_total: i64,
}

/// Applies the per-post, per-day and per-campaign caps in that order.
pub fn apply_caps<const N: usize>(
    components: [i64; N],
    caps: &CapThresholds,
    usage: &CapUsage,
) -> [i64; N] {
    let post = scale_to_cap(components, usage.post_total, caps.max_points_per_post);
    let day = scale_to_cap(post, usage.day_total, caps.max_points_per_day);
    scale_to_cap(day, usage.campaign_total, caps.max_points_total_campaign)
}

#[cfg(test)]
mod test {
    use super::*;

    fn caps(post: i64, day: i64, campaign: i64) -> CapThresholds {
        CapThresholds {
            max_points_per_post: post,
            max_points_per_day: day,
            max_points_total_campaign: campaign,
            counting_window_days: 30,
        }
    }

    #[test]
    fn test_under_cap_is_untouched() {
        assert_eq!(scale_to_cap([10, 5, 1], 0, 100), [10, 5, 1]);
        assert_eq!(scale_to_cap([10, 5, 1], 84, 100), [10, 5, 1]);
    }

    #[test]
    fn test_scaling_preserves_proportions() {
        // 50% of room
        assert_eq!(scale_to_cap([60, 30, 10], 0, 50), [30, 15, 5]);
        // floors never overshoot
        let scaled = scale_to_cap([7, 7, 7], 0, 10);
        assert_eq!(scaled, [3, 3, 3]);
        assert!(scaled.iter().sum::<i64>() <= 10);
    }

    #[test]
    fn test_exhausted_cap_zeroes_everything() {
        assert_eq!(scale_to_cap([4, 4, 4], 100, 100), [0, 0, 0]);
        assert_eq!(scale_to_cap([4, 4, 4], 150, 100), [0, 0, 0]);
    }

    #[test]
    fn test_negative_components_are_clamped() {
        assert_eq!(scale_to_cap([-5, 10], 0, 100), [0, 10]);
    }

    #[test]
    fn test_saturated_components_do_not_overflow() {
        let scaled = scale_to_cap([i64::MAX, i64::MAX, 1], 0, 1_000);
        assert_eq!(scaled, [499, 499, 0]);

        let capped = apply_caps([0, i64::MAX, i64::MAX], &CapThresholds::default(), &CapUsage::default());
        assert!(capped.iter().map(|&c| i128::from(c)).sum::<i128>() <= 1_000);
        assert_eq!(capped[1], capped[2]);
    }

    #[test]
    fn test_cascade_applies_tightest_stage() {
        let caps = caps(100, 60, 1_000);
        let usage = CapUsage {
            post_total: 0,
            day_total: 30,
            campaign_total: 0,
        };

        // post stage: 200 -> 100, day stage leaves 30 of room
        let capped = apply_caps([100, 80, 20], &caps, &usage);
        assert_eq!(capped, [15, 12, 3]);
    }

    #[test]
    fn test_cascade_campaign_stage() {
        let caps = caps(500, 500, 1_000);
        let usage = CapUsage {
            post_total: 0,
            day_total: 0,
            campaign_total: 990,
        };

        let capped = apply_caps([10, 10, 0], &caps, &usage);
        assert_eq!(capped, [5, 5, 0]);
    }
}
