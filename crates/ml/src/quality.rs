use sched_core::DatasetIndex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use types::{Schedule, Slot, Weekday, PERIODS_PER_DAY};

pub const CONFLICT_TEACHER_OVERLAP: &str = "teacher_overlap";
pub const CONFLICT_EXCESSIVE_GAP: &str = "excessive_gap";
pub const CONFLICT_RESTRICTION: &str = "restriction_violated";
pub const CONFLICT_DAILY_OVERLOAD: &str = "daily_overload";

/// Post-hoc diagnostics over a finished schedule: per-teacher lesson
/// loads, idle-gap totals and a classified conflict histogram.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
pub struct QualityMetrics {
    pub teacher_loads: HashMap<String, u32>,
    pub gaps: u32,
    pub conflicts: HashMap<String, u32>,
}

impl QualityMetrics {
    /// Overlaps and restriction hits break the schedule outright; gap and
    /// overload counts only degrade it.
    pub fn hard_conflicts(&self) -> u32 {
        self.conflicts.get(CONFLICT_TEACHER_OVERLAP).copied().unwrap_or(0)
            + self.conflicts.get(CONFLICT_RESTRICTION).copied().unwrap_or(0)
    }

    pub fn top_conflict(&self) -> Option<String> {
        self.conflicts
            .iter()
            .max_by_key(|(_, n)| **n)
            .filter(|(_, n)| **n > 0)
            .map(|(k, _)| k.clone())
    }
}

pub fn measure(idx: &DatasetIndex, schedule: &Schedule) -> QualityMetrics {
    let mut metrics = QualityMetrics::default();

    // (teacher, slot) -> occurrences across classes; more than one is an
    // overlap.
    let mut occupancy: HashMap<(String, usize), u32> = HashMap::new();
    // (teacher, weekday) -> lessons that day.
    let mut per_day: HashMap<(String, usize), u32> = HashMap::new();

    for (_, slot, alloc) in schedule.allocations() {
        *metrics
            .teacher_loads
            .entry(alloc.teacher.0.clone())
            .or_default() += 1;
        *occupancy
            .entry((alloc.teacher.0.clone(), slot.index()))
            .or_default() += 1;
        *per_day
            .entry((alloc.teacher.0.clone(), slot.day.index()))
            .or_default() += 1;

        if let Some(subject) = idx.subject_index(&alloc.subject) {
            if idx.is_restricted(subject, slot) {
                *metrics
                    .conflicts
                    .entry(CONFLICT_RESTRICTION.to_string())
                    .or_default() += 1;
            }
        }
    }

    for ((_, _), n) in occupancy {
        if n > 1 {
            *metrics
                .conflicts
                .entry(CONFLICT_TEACHER_OVERLAP.to_string())
                .or_default() += n - 1;
        }
    }

    for ((teacher, _), n) in per_day {
        let cap = idx
            .teacher_index(&teacher.as_str().into())
            .map(|t| idx.daily_cap(t))
            .unwrap_or(u8::MAX);
        if n > cap as u32 {
            *metrics
                .conflicts
                .entry(CONFLICT_DAILY_OVERLOAD.to_string())
                .or_default() += 1;
        }
    }

    for grid in schedule.classes.values() {
        for day in Weekday::ALL {
            let occupied: Vec<u8> = (1..=PERIODS_PER_DAY)
                .filter(|&p| grid.get(Slot::new(day, p)).is_some())
                .collect();
            if let (Some(&first), Some(&last)) = (occupied.first(), occupied.last()) {
                let gaps = (last - first + 1) as u32 - occupied.len() as u32;
                metrics.gaps += gaps;
                if gaps > 2 {
                    *metrics
                        .conflicts
                        .entry(CONFLICT_EXCESSIVE_GAP.to_string())
                        .or_default() += 1;
                }
            }
        }
    }

    metrics
}

/// Score a finished schedule from observed quality: start at 100, lose 10
/// per hard conflict and 5 per gap, gain 1 per allocated lesson, floor 0.
pub fn realized_score(metrics: &QualityMetrics, allocated: usize) -> f64 {
    let score =
        100.0 - metrics.hard_conflicts() as f64 * 10.0 - metrics.gaps as f64 * 5.0 + allocated as f64;
    score.max(0.0)
}
