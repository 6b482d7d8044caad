use sched_core::DatasetIndex;
use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use types::{ClassGrid, Schedule, Slot, Weekday, PERIODS_PER_DAY};

pub const GLOBAL_FEATURES: usize = 6;
pub const DAY_FEATURES: usize = 9;

/// Deterministic feature vector for a schedule: six global features
/// (lesson total, gap total, unique teachers, unique subjects, and load
/// spread per teacher and per subject), then for each class (id order)
/// five weekdays of nine features each.
pub fn extract(idx: &DatasetIndex, schedule: &Schedule) -> Vec<f64> {
    let mut out = Vec::with_capacity(GLOBAL_FEATURES + schedule.classes.len() * 5 * DAY_FEATURES);

    let total = schedule.total_lessons() as f64;
    let mut teacher_load: HashMap<&str, u32> = HashMap::new();
    let mut subject_load: HashMap<&str, u32> = HashMap::new();
    for (_, _, a) in schedule.allocations() {
        *teacher_load.entry(a.teacher.0.as_str()).or_default() += 1;
        *subject_load.entry(a.subject.0.as_str()).or_default() += 1;
    }
    let gaps: usize = schedule
        .classes
        .values()
        .map(|grid| (0..5).map(|d| day_gaps(grid, d)).sum::<usize>())
        .sum();
    out.push(total);
    out.push(gaps as f64);
    out.push(teacher_load.len() as f64);
    out.push(subject_load.len() as f64);
    out.push(stddev(teacher_load.values()));
    out.push(stddev(subject_load.values()));

    for grid in schedule.classes.values() {
        for day in Weekday::ALL {
            day_features(idx, grid, day, &mut out);
        }
    }
    out
}

fn stddev<'a>(values: impl Iterator<Item = &'a u32>) -> f64 {
    let loads: Vec<f64> = values.map(|&n| n as f64).collect();
    if loads.is_empty() {
        return 0.0;
    }
    let mean = loads.iter().sum::<f64>() / loads.len() as f64;
    let var = loads.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / loads.len() as f64;
    var.sqrt()
}

fn day_cells(grid: &ClassGrid, day: Weekday) -> Vec<Option<&types::Allocation>> {
    (1..=PERIODS_PER_DAY)
        .map(|p| grid.get(Slot::new(day, p)))
        .collect()
}

fn day_gaps(grid: &ClassGrid, day_index: usize) -> usize {
    let day = Weekday::ALL[day_index];
    let cells = day_cells(grid, day);
    let occupied: Vec<usize> = cells
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_some())
        .map(|(i, _)| i)
        .collect();
    match (occupied.first(), occupied.last()) {
        (Some(&first), Some(&last)) => (last - first + 1) - occupied.len(),
        _ => 0,
    }
}

fn day_features(idx: &DatasetIndex, grid: &ClassGrid, day: Weekday, out: &mut Vec<f64>) {
    let cells = day_cells(grid, day);
    let lessons: Vec<&types::Allocation> = cells.iter().flatten().copied().collect();

    let occupied: Vec<usize> = cells
        .iter()
        .enumerate()
        .filter(|(_, c)| c.is_some())
        .map(|(i, _)| i + 1)
        .collect();
    let first = occupied.first().copied().unwrap_or(0);
    let last = occupied.last().copied().unwrap_or(0);
    let gaps = if lessons.is_empty() {
        0
    } else {
        (last - first + 1) - lessons.len()
    };

    let mut per_teacher: Vec<(usize, usize)> = Vec::new();
    for a in &lessons {
        if let Some(t) = idx.teacher_index(&a.teacher) {
            match per_teacher.iter_mut().find(|(id, _)| *id == t) {
                Some((_, n)) => *n += 1,
                None => per_teacher.push((t, 1)),
            }
        }
    }
    let distinct_teachers = per_teacher.len();
    let max_per_teacher = per_teacher.iter().map(|(_, n)| *n).max().unwrap_or(0);
    let mean_per_teacher = if distinct_teachers == 0 {
        0.0
    } else {
        lessons.len() as f64 / distinct_teachers as f64
    };

    let mut longest_run = 0usize;
    let mut run = 0usize;
    let mut prev: Option<&str> = None;
    for cell in &cells {
        let subject = cell.map(|a| a.subject.0.as_str());
        run = match (subject, prev) {
            (Some(s), Some(p)) if s == p => run + 1,
            (Some(_), _) => 1,
            (None, _) => 0,
        };
        longest_run = longest_run.max(run);
        prev = subject;
    }
    let distinct_subjects: HashSet<&str> = lessons.iter().map(|a| a.subject.0.as_str()).collect();

    out.push(lessons.len() as f64);
    out.push(gaps as f64);
    out.push(first as f64);
    out.push(last as f64);
    out.push(distinct_teachers as f64);
    out.push(max_per_teacher as f64);
    out.push(mean_per_teacher);
    out.push(longest_run as f64);
    out.push(distinct_subjects.len() as f64);
}

/// Order-independent fingerprint of the allocation set; used as the
/// prediction cache key. Per-allocation hashes are combined with a
/// commutative sum so iteration order never matters.
pub fn fingerprint(schedule: &Schedule) -> u64 {
    schedule
        .allocations()
        .map(|(class, slot, a)| {
            let mut h = DefaultHasher::new();
            (class, slot.index(), &a.teacher, &a.subject).hash(&mut h);
            h.finish()
        })
        .fold(0u64, u64::wrapping_add)
}
