//! Two-sample swing detector over position-book snapshots.
//!
//! Compares the current up-ratio against the most recent prior snapshot and
//! flags moves at or beyond the threshold. Deliberately not a trend or
//! regression fit — snapshots arrive at user-read cadence, so two samples
//! is all the resolution the data supports.

use serde::Serialize;

use crate::crowd::aggregate::ratio_from_points;
use crate::db::models::SnapshotRow;
use crate::types::Side;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwingAlert {
    pub active: bool,
    pub threshold: i64,
    pub direction: Option<Side>,
    pub delta: i64,
    pub delta_abs: i64,
    pub current_up_ratio: i64,
    pub previous_up_ratio: Option<i64>,
    pub previous_snapshot_at: Option<i64>,
}

impl SwingAlert {
    fn inactive(current: i64, threshold: i64) -> Self {
        Self {
            active: false,
            threshold,
            direction: None,
            delta: 0,
            delta_abs: 0,
            current_up_ratio: current,
            previous_up_ratio: None,
            previous_snapshot_at: None,
        }
    }
}

/// `snapshots` must be ordered newest first. When the newest snapshot's
/// ratio exactly equals the current one it is skipped — it is usually the
/// snapshot just written for the read being served, and comparing against
/// it would blind the detector.
pub fn build_swing_alert(current_up_ratio: i64, snapshots: &[SnapshotRow], threshold: i64) -> SwingAlert {
    let current = current_up_ratio.clamp(0, 100);
    let threshold = threshold.max(1);

    if snapshots.is_empty() {
        return SwingAlert::inactive(current, threshold);
    }

    let mut baseline = &snapshots[0];
    if ratio_from_points(baseline.up_points, baseline.down_points) == current && snapshots.len() > 1 {
        baseline = &snapshots[1];
    }

    let previous = ratio_from_points(baseline.up_points, baseline.down_points);
    let delta = current - previous;
    let delta_abs = delta.abs();

    SwingAlert {
        active: delta_abs >= threshold,
        threshold,
        direction: if delta > 0 {
            Some(Side::Up)
        } else if delta < 0 {
            Some(Side::Down)
        } else {
            None
        },
        delta,
        delta_abs,
        current_up_ratio: current,
        previous_up_ratio: Some(previous),
        previous_snapshot_at: Some(baseline.snapshot_at),
    }
}
