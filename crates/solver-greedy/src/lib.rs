//! Backtracking greedy allocator: repeated fresh-grid attempts with a
//! bounded snapshot/restore budget per attempt, keeping the attempt with
//! the fewest deficits.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use sched_core::{AllocationGrid, CancelToken, DatasetIndex, ProgressSink, Validator};
use tracing::{debug, info};
use types::{Deficit, Schedule, Slot, SubjectId, Weekday, PERIODS_PER_DAY, SLOTS_PER_WEEK};

fn default_attempts() -> usize {
    50
}

fn default_backtrack_depth() -> usize {
    10
}

fn default_elective_slots() -> Vec<Slot> {
    vec![Slot::new(Weekday::Mon, 4), Slot::new(Weekday::Mon, 5)]
}

/// A subject force-placed into fixed slots after the main pass, where a
/// qualified free teacher happens to exist.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ElectiveConfig {
    pub subject: SubjectId,
    #[serde(default = "default_elective_slots")]
    pub slots: Vec<Slot>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct AllocatorConfig {
    #[serde(default = "default_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_backtrack_depth")]
    pub max_backtrack_depth: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub elective: Option<ElectiveConfig>,
}

impl Default for AllocatorConfig {
    fn default() -> AllocatorConfig {
        AllocatorConfig {
            max_attempts: default_attempts(),
            max_backtrack_depth: default_backtrack_depth(),
            seed: 0,
            elective: None,
        }
    }
}

pub struct GreedyAllocator<'a> {
    idx: &'a DatasetIndex,
    validator: &'a Validator,
    cfg: AllocatorConfig,
}

impl<'a> GreedyAllocator<'a> {
    pub fn new(
        idx: &'a DatasetIndex,
        validator: &'a Validator,
        cfg: AllocatorConfig,
    ) -> GreedyAllocator<'a> {
        GreedyAllocator {
            idx,
            validator,
            cfg,
        }
    }

    /// Run up to `max_attempts` fresh-grid attempts over the given classes
    /// and return the schedule of the attempt with the fewest deficits.
    /// Deficits are recorded, never fatal; cancellation surfaces the best
    /// result found so far.
    pub fn allocate(
        &self,
        classes: &[usize],
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> (Schedule, Vec<Deficit>) {
        let mut best: Option<(usize, AllocationGrid)> = None;

        for attempt in 0..self.cfg.max_attempts.max(1) {
            if cancel.is_cancelled() {
                info!(attempt, "allocation cancelled, keeping best attempt");
                break;
            }

            let grid = self.run_attempt(classes, attempt, progress);
            let deficits = grid.deficit_count();
            debug!(attempt, deficits, "attempt finished");

            let improved = best
                .as_ref()
                .map_or(true, |(best_deficits, _)| deficits < *best_deficits);
            if improved {
                best = Some((deficits, grid));
            }
            progress.emit((attempt + 1) as f64 / self.cfg.max_attempts.max(1) as f64 * 100.0);
            if deficits == 0 {
                break;
            }
        }

        match best {
            Some((deficits, grid)) => {
                info!(deficits, "allocation done");
                (grid.schedule(self.idx), grid.deficits(self.idx))
            }
            None => (Schedule::default(), Vec::new()),
        }
    }

    fn run_attempt(
        &self,
        classes: &[usize],
        attempt: usize,
        progress: &dyn ProgressSink,
    ) -> AllocationGrid {
        let mut grid = AllocationGrid::new(self.idx.teacher_count(), classes);

        // Each attempt visits the classes in a different seeded order so
        // restarts actually explore different placements.
        let mut order: Vec<usize> = classes.to_vec();
        let mut rng = ChaCha8Rng::seed_from_u64(self.cfg.seed.wrapping_add(attempt as u64));
        if attempt > 0 {
            order.shuffle(&mut rng);
        }

        let mut backtracks_left = self.cfg.max_backtrack_depth;
        for (done, &class) in order.iter().enumerate() {
            self.fill_class(&mut grid, class, &mut backtracks_left);
            progress.emit(
                (attempt as f64 + (done + 1) as f64 / order.len() as f64)
                    / self.cfg.max_attempts.max(1) as f64
                    * 100.0,
            );
        }

        if let Some(elective) = &self.cfg.elective {
            self.place_elective(&mut grid, &order, elective);
        }
        grid
    }

    fn fill_class(&self, grid: &mut AllocationGrid, class: usize, backtracks_left: &mut usize) {
        // Heaviest subjects first; they have the least slack.
        let mut loads: Vec<(usize, u32)> = self.idx.required(class).to_vec();
        loads.sort_by(|a, b| b.1.cmp(&a.1));

        for (subject, weekly) in loads {
            let mut retry = 0usize;
            loop {
                let snap = grid.snapshot();
                let achieved = self.place_pass(grid, class, subject, weekly, retry);
                if achieved == weekly {
                    break;
                }
                if *backtracks_left > 0 {
                    *backtracks_left -= 1;
                    retry += 1;
                    grid.restore(snap);
                    continue;
                }
                debug!(
                    class = %self.idx.class_id(class),
                    subject = %self.idx.subject_id(subject),
                    required = weekly,
                    achieved,
                    "deficit recorded"
                );
                grid.record_deficit(class, subject, weekly, achieved);
                break;
            }
        }
    }

    /// One greedy pass for a single (class, subject) load. Slots are walked
    /// weekday-major and period-minor, cyclically rotated by the retry
    /// count so a restored pass starts somewhere else.
    fn place_pass(
        &self,
        grid: &mut AllocationGrid,
        class: usize,
        subject: usize,
        weekly: u32,
        retry: usize,
    ) -> u32 {
        let mut placed = 0u32;
        for k in 0..SLOTS_PER_WEEK {
            if placed == weekly {
                break;
            }
            let i = (k + retry * PERIODS_PER_DAY as usize) % SLOTS_PER_WEEK;
            let slot = match Slot::from_index(i) {
                Some(slot) => slot,
                None => continue,
            };
            if grid.slot_busy_globally(slot) || grid.slot_filled_in_class(class, slot) {
                continue;
            }
            if let Some(teacher) = self.pick_teacher(grid, class, subject, slot) {
                if let Ok(staged) = grid.stage(class, subject, teacher, slot) {
                    grid.commit(staged);
                    placed += 1;
                }
            }
        }
        placed
    }

    /// First teacher in stable qualification order that is structurally
    /// free and passes every validator check.
    fn pick_teacher(
        &self,
        grid: &AllocationGrid,
        class: usize,
        subject: usize,
        slot: Slot,
    ) -> Option<usize> {
        self.idx
            .qualified_teachers(subject, class)
            .iter()
            .copied()
            .find(|&teacher| {
                !grid.teacher_busy_at(teacher, slot)
                    && !grid.teacher_period_clash(teacher, class, slot)
                    && self.validator.validate(teacher, subject, class, slot).valid
            })
    }

    /// Force-place the elective subject into its fixed slots wherever a
    /// qualified free teacher exists. Anything that does not fit is
    /// skipped without complaint.
    fn place_elective(&self, grid: &mut AllocationGrid, classes: &[usize], cfg: &ElectiveConfig) {
        let subject = match self.idx.subject_index(&cfg.subject) {
            Some(subject) => subject,
            None => {
                debug!(subject = %cfg.subject, "elective subject not in dataset, skipping");
                return;
            }
        };
        for &class in classes {
            for &slot in &cfg.slots {
                if grid.slot_busy_globally(slot) || grid.slot_filled_in_class(class, slot) {
                    continue;
                }
                if let Some(teacher) = self.pick_teacher(grid, class, subject, slot) {
                    if let Ok(staged) = grid.stage(class, subject, teacher, slot) {
                        grid.commit(staged);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_core::NullSink;
    use std::sync::Arc;
    use types::{
        Dataset, Qualification, SchoolClass, Shift, Subject, SubjectLoad, Teacher, Verdict,
    };

    fn dataset(available: Vec<Slot>, weekly: u32) -> Dataset {
        Dataset {
            teachers: vec![Teacher {
                id: "braga".into(),
                available,
                qualifications: vec![Qualification {
                    subject: "math".into(),
                    class: "6a".into(),
                }],
                daily_cap: 4,
            }],
            subjects: vec![Subject {
                id: "math".into(),
                restricted: vec![],
            }],
            classes: vec![SchoolClass {
                id: "6a".into(),
                shift: Shift::Afternoon,
                subjects: vec![SubjectLoad {
                    subject: "math".into(),
                    weekly,
                }],
            }],
            exceptions: vec![],
        }
    }

    fn run(dataset: Dataset) -> (Schedule, Vec<Deficit>) {
        let idx = Arc::new(DatasetIndex::new(dataset).unwrap());
        let validator = Validator::new(idx.clone());
        let allocator = GreedyAllocator::new(&idx, &validator, AllocatorConfig::default());
        let classes = idx.classes_in_shift(None);
        allocator.allocate(&classes, &NullSink, &CancelToken::new())
    }

    #[test]
    fn two_available_slots_fill_two_lessons() {
        let (schedule, deficits) = run(dataset(
            vec![Slot::new(Weekday::Mon, 1), Slot::new(Weekday::Tue, 1)],
            2,
        ));
        assert!(deficits.is_empty());
        assert_eq!(schedule.total_lessons(), 2);
    }

    #[test]
    fn one_available_slot_leaves_an_exact_deficit() {
        let (schedule, deficits) = run(dataset(vec![Slot::new(Weekday::Mon, 1)], 2));
        assert_eq!(schedule.total_lessons(), 1);
        assert_eq!(deficits.len(), 1);
        assert_eq!((deficits[0].required, deficits[0].achieved), (2, 1));
    }

    #[test]
    fn contested_teacher_never_double_booked() {
        // One teacher qualified for both classes, one shared available slot.
        let ds = Dataset {
            teachers: vec![Teacher {
                id: "costa".into(),
                available: vec![Slot::new(Weekday::Mon, 1), Slot::new(Weekday::Mon, 2)],
                qualifications: vec![
                    Qualification {
                        subject: "math".into(),
                        class: "6a".into(),
                    },
                    Qualification {
                        subject: "math".into(),
                        class: "6b".into(),
                    },
                ],
                daily_cap: 4,
            }],
            subjects: vec![Subject {
                id: "math".into(),
                restricted: vec![],
            }],
            classes: ["6a", "6b"]
                .iter()
                .map(|id| SchoolClass {
                    id: (*id).into(),
                    shift: Shift::Afternoon,
                    subjects: vec![SubjectLoad {
                        subject: "math".into(),
                        weekly: 1,
                    }],
                })
                .collect(),
            exceptions: vec![],
        };
        let (schedule, _) = run(ds);
        let mut seen = std::collections::HashSet::new();
        for (_, slot, alloc) in schedule.allocations() {
            assert!(seen.insert((alloc.teacher.clone(), slot.index())));
        }
    }

    #[test]
    fn denied_slot_is_never_used() {
        let mut ds = dataset(vec![Slot::new(Weekday::Mon, 1), Slot::new(Weekday::Tue, 1)], 1);
        ds.exceptions.push(types::ExceptionRule {
            teacher: Some("braga".into()),
            subject: None,
            class: None,
            slots: vec![Slot::new(Weekday::Mon, 1)],
            verdict: Verdict::Deny,
            limit_two_lessons: false,
            must_pair: false,
        });
        let (schedule, deficits) = run(ds);
        assert!(deficits.is_empty());
        for (_, slot, _) in schedule.allocations() {
            assert_ne!(slot, Slot::new(Weekday::Mon, 1));
        }
    }

    #[test]
    fn elective_post_pass_fills_fixed_slots() {
        let mut ds = dataset(
            vec![
                Slot::new(Weekday::Mon, 1),
                Slot::new(Weekday::Mon, 4),
                Slot::new(Weekday::Mon, 5),
            ],
            1,
        );
        ds.subjects.push(Subject {
            id: "arts".into(),
            restricted: vec![],
        });
        ds.teachers[0].qualifications.push(Qualification {
            subject: "arts".into(),
            class: "6a".into(),
        });
        let idx = Arc::new(DatasetIndex::new(ds).unwrap());
        let validator = Validator::new(idx.clone());
        let cfg = AllocatorConfig {
            elective: Some(ElectiveConfig {
                subject: "arts".into(),
                slots: default_elective_slots(),
            }),
            ..AllocatorConfig::default()
        };
        let allocator = GreedyAllocator::new(&idx, &validator, cfg);
        let classes = idx.classes_in_shift(None);
        let (schedule, _) = allocator.allocate(&classes, &NullSink, &CancelToken::new());
        let grid = &schedule.classes[&"6a".into()];
        let elective_lessons = [Slot::new(Weekday::Mon, 4), Slot::new(Weekday::Mon, 5)]
            .iter()
            .filter(|&&s| grid.get(s).map_or(false, |a| a.subject == "arts".into()))
            .count();
        assert_eq!(elective_lessons, 2);
    }

    #[test]
    fn cancelled_run_still_returns_a_result() {
        let token = CancelToken::new();
        token.cancel();
        let ds = dataset(vec![Slot::new(Weekday::Mon, 1)], 1);
        let idx = Arc::new(DatasetIndex::new(ds).unwrap());
        let validator = Validator::new(idx.clone());
        let allocator = GreedyAllocator::new(&idx, &validator, AllocatorConfig::default());
        let classes = idx.classes_in_shift(None);
        let (schedule, _) = allocator.allocate(&classes, &NullSink, &token);
        assert_eq!(schedule.total_lessons(), 0);
    }
}
