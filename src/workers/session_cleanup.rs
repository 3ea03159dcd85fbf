use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::state::AppState;

#[derive(Debug, Default)]
struct CleanupStats {
    assessments: usize,
    syllabus_sessions: usize,
    duration_secs: f64,
}

/// Drops assessment and syllabus sessions idle for longer than `ttl`.
/// Returns how many were evicted.
pub fn evict_idle_sessions(state: &AppState, ttl: Duration) -> usize {
    let start = Instant::now();
    debug!("starting session cleanup cycle");

    let stats = CleanupStats {
        assessments: state.assessment_sessions().evict_idle(ttl),
        syllabus_sessions: state.syllabus_sessions().evict_idle(ttl),
        duration_secs: start.elapsed().as_secs_f64(),
    };

    let total = stats.assessments + stats.syllabus_sessions;
    if total > 0 {
        info!(
            assessments = stats.assessments,
            syllabus_sessions = stats.syllabus_sessions,
            duration_secs = format!("{:.3}", stats.duration_secs),
            "idle sessions evicted"
        );
    }
    total
}
