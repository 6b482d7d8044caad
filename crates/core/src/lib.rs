pub mod grid;
pub mod index;
pub mod progress;
pub mod validator;

use std::collections::HashSet;
use thiserror::Error;

pub use grid::{AllocationGrid, GridSnapshot, PlaceConflict, Staged};
pub use index::DatasetIndex;
pub use progress::{CancelToken, ChannelSink, NullSink, ProgressSink};
pub use types::{
    Allocation, ClassGrid, ClassId, Dataset, Deficit, Outcome, Schedule, SchoolClass, Shift, Slot,
    Subject, SubjectId, Teacher, TeacherId, Weekday,
};
pub use validator::{Assessment, Validator, Violation, Warning};

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("invalid dataset: {0}")]
    Msg(String),
}

/// Fail-fast structural validation of a dataset snapshot. Runs before any
/// allocation attempt; all problems are reported in one message.
pub fn validate(dataset: &Dataset) -> Result<(), DatasetError> {
    let mut errors: Vec<String> = Vec::new();

    if dataset.teachers.is_empty() {
        errors.push("teachers is empty".into());
    }
    if dataset.classes.is_empty() {
        errors.push("classes is empty".into());
    }

    fn chk_unique<I: ToString>(name: &str, ids: impl Iterator<Item = I>, errors: &mut Vec<String>) {
        let mut seen = HashSet::new();
        for id in ids {
            let s = id.to_string();
            if !seen.insert(s.clone()) {
                errors.push(format!("duplicate {name} id: {s}"));
            }
        }
    }
    chk_unique(
        "teacher",
        dataset.teachers.iter().map(|t| &t.id.0),
        &mut errors,
    );
    chk_unique(
        "subject",
        dataset.subjects.iter().map(|s| &s.id.0),
        &mut errors,
    );
    chk_unique(
        "class",
        dataset.classes.iter().map(|c| &c.id.0),
        &mut errors,
    );

    let teachers: HashSet<_> = dataset.teachers.iter().map(|t| &t.id.0).collect();
    let subjects: HashSet<_> = dataset.subjects.iter().map(|s| &s.id.0).collect();
    let classes: HashSet<_> = dataset.classes.iter().map(|c| &c.id.0).collect();

    for t in &dataset.teachers {
        for slot in &t.available {
            if !slot.in_range() {
                errors.push(format!(
                    "teacher {} has out-of-range available slot {}",
                    t.id.0, slot
                ));
            }
        }
        for q in &t.qualifications {
            if !subjects.contains(&q.subject.0) {
                errors.push(format!(
                    "teacher {} is qualified for unknown subject {}",
                    t.id.0, q.subject.0
                ));
            }
            if !classes.contains(&q.class.0) {
                errors.push(format!(
                    "teacher {} is qualified for unknown class {}",
                    t.id.0, q.class.0
                ));
            }
        }
    }

    for s in &dataset.subjects {
        for slot in &s.restricted {
            if !slot.in_range() {
                errors.push(format!(
                    "subject {} has out-of-range restricted slot {}",
                    s.id.0, slot
                ));
            }
        }
    }

    for c in &dataset.classes {
        if c.subjects.is_empty() {
            errors.push(format!("class {} has no subjects", c.id.0));
        }
        for load in &c.subjects {
            if !subjects.contains(&load.subject.0) {
                errors.push(format!(
                    "class {} references missing subject {}",
                    c.id.0, load.subject.0
                ));
            }
            if load.weekly == 0 {
                errors.push(format!(
                    "class {} requires 0 weekly lessons of {}",
                    c.id.0, load.subject.0
                ));
            }
        }
    }

    for (i, ex) in dataset.exceptions.iter().enumerate() {
        if let Some(t) = &ex.teacher {
            if !teachers.contains(&t.0) {
                errors.push(format!("exception #{i} references missing teacher {}", t.0));
            }
        }
        if let Some(s) = &ex.subject {
            if !subjects.contains(&s.0) {
                errors.push(format!("exception #{i} references missing subject {}", s.0));
            }
        }
        if let Some(c) = &ex.class {
            if !classes.contains(&c.0) {
                errors.push(format!("exception #{i} references missing class {}", c.0));
            }
        }
        for slot in &ex.slots {
            if !slot.in_range() {
                errors.push(format!("exception #{i} targets out-of-range slot {slot}"));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(DatasetError::Msg(errors.join("; ")))
    }
}
