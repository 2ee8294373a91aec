//! Candidate scoring: per-category normalization and ranking.
//!
//! Duration and accumulated DGVI are min-max normalized independently over
//! the surviving candidates of one category (walking vs bus). A degenerate
//! axis (all candidates equal, including a lone survivor) contributes no
//! penalty, so a single candidate always scores 1.

use super::Preferences;
use crate::model::RoutePlan;

pub(super) fn score_category(routes: &mut [RoutePlan], preferences: Preferences) {
    if routes.is_empty() {
        return;
    }

    let mut min_duration = f64::INFINITY;
    let mut max_duration = f64::NEG_INFINITY;
    let mut min_dgvi = f64::INFINITY;
    let mut max_dgvi = f64::NEG_INFINITY;
    for route in routes.iter() {
        min_duration = min_duration.min(route.total_duration_s);
        max_duration = max_duration.max(route.total_duration_s);
        min_dgvi = min_dgvi.min(route.total_acdgvi);
        max_dgvi = max_dgvi.max(route.total_acdgvi);
    }
    let duration_span = max_duration - min_duration;
    let dgvi_span = max_dgvi - min_dgvi;

    for route in routes.iter_mut() {
        let time_norm = if duration_span > 0.0 {
            (route.total_duration_s - min_duration) / duration_span
        } else {
            0.0
        };
        let dgvi_norm = if dgvi_span > 0.0 {
            (route.total_acdgvi - min_dgvi) / dgvi_span
        } else {
            0.0
        };
        // Higher DGVI is better, so the penalty uses the complement; a
        // degenerate DGVI axis cannot discriminate and penalizes nothing.
        let green_penalty = if dgvi_span > 0.0 { 1.0 - dgvi_norm } else { 0.0 };
        let penalty = preferences.time * time_norm + preferences.green * green_penalty;

        route.duration_score = 1.0 - time_norm;
        route.acdgvi_score = dgvi_norm;
        route.total_score = 1.0 - penalty;
    }

    routes.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
}
