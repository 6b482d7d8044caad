use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_string())
            }
        }
    };
}
id_newtype!(TeacherId);
id_newtype!(SubjectId);
id_newtype!(ClassId);

pub const PERIODS_PER_DAY: u8 = 7;
pub const SLOTS_PER_WEEK: usize = 35;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
}

impl Weekday {
    pub const ALL: [Weekday; 5] = [
        Weekday::Mon,
        Weekday::Tue,
        Weekday::Wed,
        Weekday::Thu,
        Weekday::Fri,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(i: usize) -> Option<Weekday> {
        Weekday::ALL.get(i).copied()
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
        };
        s.fmt(f)
    }
}

/// One (weekday, period) cell, the atomic scheduling unit. Periods are
/// 1-based, 1..=7; a week has 35 slots.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Slot {
    pub day: Weekday,
    pub period: u8,
}

impl Slot {
    pub fn new(day: Weekday, period: u8) -> Slot {
        Slot { day, period }
    }

    pub fn in_range(&self) -> bool {
        self.period >= 1 && self.period <= PERIODS_PER_DAY
    }

    /// Flat index into a 35-cell week, weekday-major.
    pub fn index(&self) -> usize {
        self.day.index() * PERIODS_PER_DAY as usize + (self.period as usize - 1)
    }

    pub fn from_index(i: usize) -> Option<Slot> {
        if i >= SLOTS_PER_WEEK {
            return None;
        }
        let day = Weekday::from_index(i / PERIODS_PER_DAY as usize)?;
        Some(Slot {
            day,
            period: (i % PERIODS_PER_DAY as usize) as u8 + 1,
        })
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.day, self.period)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Shift {
    #[serde(alias = "I")]
    Intermediate,
    #[serde(alias = "T")]
    Afternoon,
    #[serde(alias = "N")]
    Evening,
}

impl fmt::Display for Shift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Shift::Intermediate => "intermediate",
            Shift::Afternoon => "afternoon",
            Shift::Evening => "evening",
        };
        s.fmt(f)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq, Hash)]
pub struct Qualification {
    pub subject: SubjectId,
    pub class: ClassId,
}

fn default_daily_cap() -> u8 {
    4
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Teacher {
    pub id: TeacherId,
    #[serde(default)]
    pub available: Vec<Slot>,
    #[serde(default)]
    pub qualifications: Vec<Qualification>,
    /// Soft cap on lessons per day; exceeding it is a warning, not a conflict.
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u8,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Subject {
    pub id: SubjectId,
    /// Slots in which this subject must not be taught.
    #[serde(default)]
    pub restricted: Vec<Slot>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SubjectLoad {
    pub subject: SubjectId,
    /// Required lessons per week.
    pub weekly: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SchoolClass {
    pub id: ClassId,
    pub shift: Shift,
    pub subjects: Vec<SubjectLoad>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Allow,
    Deny,
}

/// An override rule scoped by any combination of teacher / subject / class.
///
/// A rule matches a candidate placement when ANY of its populated scope
/// fields matches (OR-join), not when all of them do. A rule with no scope
/// fields populated matches nothing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExceptionRule {
    #[serde(default)]
    pub teacher: Option<TeacherId>,
    #[serde(default)]
    pub subject: Option<SubjectId>,
    #[serde(default)]
    pub class: Option<ClassId>,
    pub slots: Vec<Slot>,
    pub verdict: Verdict,
    #[serde(default)]
    pub limit_two_lessons: bool,
    #[serde(default)]
    pub must_pair: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Allocation {
    pub teacher: TeacherId,
    pub subject: SubjectId,
    pub class: ClassId,
}

/// Weekly grid of one class: 35 cells, weekday-major.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassGrid {
    slots: Vec<Option<Allocation>>,
}

impl Default for ClassGrid {
    fn default() -> Self {
        ClassGrid {
            slots: vec![None; SLOTS_PER_WEEK],
        }
    }
}

impl ClassGrid {
    pub fn new() -> ClassGrid {
        ClassGrid::default()
    }

    pub fn get(&self, slot: Slot) -> Option<&Allocation> {
        self.slots[slot.index()].as_ref()
    }

    pub fn set(&mut self, slot: Slot, alloc: Allocation) {
        self.slots[slot.index()] = Some(alloc);
    }

    pub fn clear(&mut self, slot: Slot) {
        self.slots[slot.index()] = None;
    }

    pub fn lessons(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Slot, &Allocation)> {
        self.slots.iter().enumerate().filter_map(|(i, cell)| {
            match (Slot::from_index(i), cell) {
                (Some(slot), Some(a)) => Some((slot, a)),
                _ => None,
            }
        })
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Schedule {
    pub classes: BTreeMap<ClassId, ClassGrid>,
}

impl Schedule {
    pub fn allocations(&self) -> impl Iterator<Item = (&ClassId, Slot, &Allocation)> {
        self.classes
            .iter()
            .flat_map(|(id, grid)| grid.iter().map(move |(slot, a)| (id, slot, a)))
    }

    pub fn total_lessons(&self) -> usize {
        self.classes.values().map(ClassGrid::lessons).sum()
    }
}

/// Shortfall between required and achieved lessons for one class/subject.
#[derive(Clone, Debug, Serialize, Deserialize, Eq, PartialEq)]
pub struct Deficit {
    pub class: ClassId,
    pub subject: SubjectId,
    pub required: u32,
    pub achieved: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dataset {
    pub teachers: Vec<Teacher>,
    pub subjects: Vec<Subject>,
    pub classes: Vec<SchoolClass>,
    #[serde(default)]
    pub exceptions: Vec<ExceptionRule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Outcome {
    pub schedule: Schedule,
    pub deficits: Vec<Deficit>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_index_roundtrip() {
        for i in 0..SLOTS_PER_WEEK {
            let slot = Slot::from_index(i).unwrap();
            assert_eq!(slot.index(), i);
            assert!(slot.in_range());
        }
        assert!(Slot::from_index(SLOTS_PER_WEEK).is_none());
    }

    #[test]
    fn slot_order_is_weekday_major() {
        assert_eq!(Slot::new(Weekday::Mon, 1).index(), 0);
        assert_eq!(Slot::new(Weekday::Mon, 7).index(), 6);
        assert_eq!(Slot::new(Weekday::Tue, 1).index(), 7);
        assert_eq!(Slot::new(Weekday::Fri, 7).index(), 34);
    }

    #[test]
    fn shift_accepts_letter_aliases() {
        let s: Shift = serde_json::from_str("\"I\"").unwrap();
        assert_eq!(s, Shift::Intermediate);
        let s: Shift = serde_json::from_str("\"evening\"").unwrap();
        assert_eq!(s, Shift::Evening);
    }

    #[test]
    fn class_grid_tracks_lessons() {
        let mut grid = ClassGrid::new();
        let alloc = Allocation {
            teacher: "t1".into(),
            subject: "math".into(),
            class: "6a".into(),
        };
        grid.set(Slot::new(Weekday::Mon, 1), alloc.clone());
        grid.set(Slot::new(Weekday::Wed, 3), alloc);
        assert_eq!(grid.lessons(), 2);
        let cells: Vec<Slot> = grid.iter().map(|(s, _)| s).collect();
        assert_eq!(
            cells,
            vec![Slot::new(Weekday::Mon, 1), Slot::new(Weekday::Wed, 3)]
        );
    }
}
