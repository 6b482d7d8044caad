use crate::index::DatasetIndex;
use std::collections::HashMap;
use thiserror::Error;
use types::{Allocation, ClassGrid, Deficit, Schedule, Slot, SLOTS_PER_WEEK};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Cell {
    pub teacher: usize,
    pub subject: usize,
}

#[derive(Debug, Error, Eq, PartialEq)]
pub enum PlaceConflict {
    #[error("slot {0} already carries a lesson in another class")]
    SlotTakenGlobally(Slot),
    #[error("slot {0} already filled in this class")]
    SlotTakenInClass(Slot),
    #[error("teacher already occupies slot {0}")]
    TeacherBusy(Slot),
    #[error("teacher already teaches this period in another class at {0}")]
    TeacherPeriodClash(Slot),
}

/// A provisional placement. Produced by `stage`, resolved by either
/// `commit` or `unstage`.
#[derive(Debug)]
#[must_use = "staged placements must be committed or unstaged"]
pub struct Staged {
    pub class: usize,
    pub subject: usize,
    pub teacher: usize,
    pub slot: Slot,
}

#[derive(Clone, Debug)]
struct DeficitRec {
    class: usize,
    subject: usize,
    required: u32,
    achieved: u32,
}

/// Deep copy of the whole grid state; `restore` is exact and total.
#[derive(Clone)]
pub struct GridSnapshot {
    global_busy: Vec<bool>,
    per_class: HashMap<usize, Vec<Option<Cell>>>,
    teacher_busy: Vec<u64>,
    deficits: Vec<DeficitRec>,
}

/// Mutable scheduling state of one generation attempt: a global occupancy
/// row, one 35-cell grid per class, a 35-bit occupancy mask per teacher and
/// the deficit ledger.
pub struct AllocationGrid {
    global_busy: Vec<bool>,
    per_class: HashMap<usize, Vec<Option<Cell>>>,
    teacher_busy: Vec<u64>,
    deficits: Vec<DeficitRec>,
}

impl AllocationGrid {
    pub fn new(teacher_count: usize, classes: &[usize]) -> AllocationGrid {
        AllocationGrid {
            global_busy: vec![false; SLOTS_PER_WEEK],
            per_class: classes
                .iter()
                .map(|&c| (c, vec![None; SLOTS_PER_WEEK]))
                .collect(),
            teacher_busy: vec![0u64; teacher_count],
            deficits: Vec::new(),
        }
    }

    pub fn slot_busy_globally(&self, slot: Slot) -> bool {
        self.global_busy[slot.index()]
    }

    pub fn slot_filled_in_class(&self, class: usize, slot: Slot) -> bool {
        self.per_class
            .get(&class)
            .map_or(false, |g| g[slot.index()].is_some())
    }

    pub fn teacher_busy_at(&self, teacher: usize, slot: Slot) -> bool {
        self.teacher_busy[teacher] & (1u64 << slot.index()) != 0
    }

    /// Same weekday, same period, different class. Kept as a structural
    /// check in its own right, independent of slot-level occupancy.
    pub fn teacher_period_clash(&self, teacher: usize, class: usize, slot: Slot) -> bool {
        self.per_class.iter().any(|(&c, grid)| {
            c != class
                && grid[slot.index()]
                    .as_ref()
                    .map_or(false, |cell| cell.teacher == teacher)
        })
    }

    /// Two-phase write, step one: check every structural constraint, then
    /// provisionally occupy the cell. A conflict leaves the grid untouched.
    pub fn stage(
        &mut self,
        class: usize,
        subject: usize,
        teacher: usize,
        slot: Slot,
    ) -> Result<Staged, PlaceConflict> {
        if self.slot_busy_globally(slot) {
            return Err(PlaceConflict::SlotTakenGlobally(slot));
        }
        if self.slot_filled_in_class(class, slot) {
            return Err(PlaceConflict::SlotTakenInClass(slot));
        }
        if self.teacher_busy_at(teacher, slot) {
            return Err(PlaceConflict::TeacherBusy(slot));
        }
        if self.teacher_period_clash(teacher, class, slot) {
            return Err(PlaceConflict::TeacherPeriodClash(slot));
        }

        let i = slot.index();
        self.global_busy[i] = true;
        if let Some(grid) = self.per_class.get_mut(&class) {
            grid[i] = Some(Cell { teacher, subject });
        }
        self.teacher_busy[teacher] |= 1u64 << i;
        Ok(Staged {
            class,
            subject,
            teacher,
            slot,
        })
    }

    /// Two-phase write, step two: the placement becomes permanent.
    pub fn commit(&mut self, _staged: Staged) {}

    /// Revert a staged placement exactly.
    pub fn unstage(&mut self, staged: Staged) {
        let i = staged.slot.index();
        self.global_busy[i] = false;
        if let Some(grid) = self.per_class.get_mut(&staged.class) {
            grid[i] = None;
        }
        self.teacher_busy[staged.teacher] &= !(1u64 << i);
    }

    pub fn snapshot(&self) -> GridSnapshot {
        GridSnapshot {
            global_busy: self.global_busy.clone(),
            per_class: self.per_class.clone(),
            teacher_busy: self.teacher_busy.clone(),
            deficits: self.deficits.clone(),
        }
    }

    pub fn restore(&mut self, snapshot: GridSnapshot) {
        self.global_busy = snapshot.global_busy;
        self.per_class = snapshot.per_class;
        self.teacher_busy = snapshot.teacher_busy;
        self.deficits = snapshot.deficits;
    }

    pub fn achieved(&self, class: usize, subject: usize) -> u32 {
        self.per_class.get(&class).map_or(0, |grid| {
            grid.iter()
                .flatten()
                .filter(|cell| cell.subject == subject)
                .count() as u32
        })
    }

    pub fn record_deficit(&mut self, class: usize, subject: usize, required: u32, achieved: u32) {
        self.deficits.push(DeficitRec {
            class,
            subject,
            required,
            achieved,
        });
    }

    pub fn deficit_count(&self) -> usize {
        self.deficits.len()
    }

    pub fn schedule(&self, idx: &DatasetIndex) -> Schedule {
        let mut schedule = Schedule::default();
        let mut classes: Vec<&usize> = self.per_class.keys().collect();
        classes.sort_unstable();
        for &class in classes {
            let mut grid = ClassGrid::new();
            for (i, cell) in self.per_class[&class].iter().enumerate() {
                if let (Some(slot), Some(cell)) = (Slot::from_index(i), cell) {
                    grid.set(
                        slot,
                        Allocation {
                            teacher: idx.teacher_id(cell.teacher).clone(),
                            subject: idx.subject_id(cell.subject).clone(),
                            class: idx.class_id(class).clone(),
                        },
                    );
                }
            }
            schedule.classes.insert(idx.class_id(class).clone(), grid);
        }
        schedule
    }

    pub fn deficits(&self, idx: &DatasetIndex) -> Vec<Deficit> {
        self.deficits
            .iter()
            .map(|d| Deficit {
                class: idx.class_id(d.class).clone(),
                subject: idx.subject_id(d.subject).clone(),
                required: d.required,
                achieved: d.achieved,
            })
            .collect()
    }
}
