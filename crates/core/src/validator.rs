use crate::index::DatasetIndex;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use types::{Slot, Verdict, Weekday};

/// A hard reason a placement is invalid. `kind()` names are stable; the
/// conflict histogram is keyed by them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    NotQualified {
        teacher: String,
        subject: String,
        class: String,
    },
    Unavailable {
        teacher: String,
        slot: Slot,
    },
    Restricted {
        subject: String,
        slot: Slot,
    },
    ExceptionDenied {
        slot: Slot,
    },
}

impl Violation {
    pub fn kind(&self) -> &'static str {
        match self {
            Violation::NotQualified { .. } => "not_qualified",
            Violation::Unavailable { .. } => "unavailable",
            Violation::Restricted { .. } => "restricted",
            Violation::ExceptionDenied { .. } => "exception_denied",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Warning {
    DailyLoadExceeded {
        teacher: String,
        day: Weekday,
        count: u8,
        cap: u8,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Assessment {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Warning>,
}

/// Pure predicate layer over the dataset index: can (teacher, subject,
/// class) occupy (day, period)? All checks run on every call so diagnostics
/// carry the complete violation list, never just the first one.
///
/// Assessments are cached by the full argument tuple. The dataset behind the
/// index never mutates, so the cache is valid for the validator's lifetime;
/// a fresh dataset means a fresh validator.
pub struct Validator {
    idx: Arc<DatasetIndex>,
    cache: Mutex<HashMap<(usize, usize, usize, usize), Assessment>>,
}

impl Validator {
    pub fn new(idx: Arc<DatasetIndex>) -> Validator {
        Validator {
            idx,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn validate(&self, teacher: usize, subject: usize, class: usize, slot: Slot) -> Assessment {
        let key = (teacher, subject, class, slot.index());
        if let Some(hit) = self.cache.lock().get(&key) {
            return hit.clone();
        }

        let mut violations = Vec::new();
        let mut warnings = Vec::new();

        if !self.idx.is_qualified(teacher, subject, class) {
            violations.push(Violation::NotQualified {
                teacher: self.idx.teacher_id(teacher).0.clone(),
                subject: self.idx.subject_id(subject).0.clone(),
                class: self.idx.class_id(class).0.clone(),
            });
        }

        if !self.idx.is_available(teacher, slot) {
            violations.push(Violation::Unavailable {
                teacher: self.idx.teacher_id(teacher).0.clone(),
                slot,
            });
        }

        if self.idx.is_restricted(subject, slot) {
            violations.push(Violation::Restricted {
                subject: self.idx.subject_id(subject).0.clone(),
                slot,
            });
        }

        // Deny rules add violations; allow rules override nothing.
        for ex in self.idx.exceptions() {
            if ex.verdict == Verdict::Deny && ex.matches(teacher, subject, class) && ex.targets(slot)
            {
                violations.push(Violation::ExceptionDenied { slot });
            }
        }

        let count = self.idx.available_count_on(teacher, slot.day);
        let cap = self.idx.daily_cap(teacher);
        if count > cap {
            warnings.push(Warning::DailyLoadExceeded {
                teacher: self.idx.teacher_id(teacher).0.clone(),
                day: slot.day,
                count,
                cap,
            });
        }

        let assessment = Assessment {
            valid: violations.is_empty(),
            violations,
            warnings,
        };
        self.cache.lock().insert(key, assessment.clone());
        assessment
    }

    /// Single-check helpers used by the genetic fitness terms.
    pub fn availability_ok(&self, teacher: usize, slot: Slot) -> bool {
        self.idx.is_available(teacher, slot)
    }

    pub fn restriction_ok(&self, subject: usize, slot: Slot) -> bool {
        !self.idx.is_restricted(subject, slot)
    }
}
