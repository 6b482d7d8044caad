use crate::DatasetError;
use std::collections::HashMap;
use types::{ClassId, Dataset, Shift, Slot, SubjectId, TeacherId, Verdict};

/// Exception with scope fields resolved to dataset indices and targets
/// collapsed into a 35-bit slot mask.
#[derive(Clone, Debug)]
pub struct CompiledException {
    pub teacher: Option<usize>,
    pub subject: Option<usize>,
    pub class: Option<usize>,
    pub slot_mask: u64,
    pub verdict: Verdict,
    pub limit_two_lessons: bool,
    pub must_pair: bool,
}

impl CompiledException {
    /// OR-join over populated scope fields; an unscoped rule matches nothing.
    pub fn matches(&self, teacher: usize, subject: usize, class: usize) -> bool {
        self.teacher == Some(teacher) || self.subject == Some(subject) || self.class == Some(class)
    }

    pub fn targets(&self, slot: Slot) -> bool {
        self.slot_mask & (1u64 << slot.index()) != 0
    }
}

fn slot_mask(slots: &[Slot]) -> u64 {
    slots.iter().fold(0u64, |m, s| m | (1u64 << s.index()))
}

/// Index layer built once per dataset load: stable integer ids for teachers,
/// subjects and classes, availability / restriction bitmaps, and a pre-joined
/// qualification table. All engine components work in index space and resolve
/// back to ids only at the edges.
pub struct DatasetIndex {
    dataset: Dataset,
    teacher_idx: HashMap<String, usize>,
    subject_idx: HashMap<String, usize>,
    class_idx: HashMap<String, usize>,
    /// 35-bit availability mask per teacher.
    availability: Vec<u64>,
    /// Available-period count per teacher per weekday (soft workload check).
    available_per_day: Vec<[u8; 5]>,
    /// 35-bit restriction mask per subject.
    restriction: Vec<u64>,
    /// Qualified teachers per (subject, class), in dataset order.
    qualified: HashMap<(usize, usize), Vec<usize>>,
    exceptions: Vec<CompiledException>,
    /// Per class: (subject index, weekly count) in declared order.
    required: Vec<Vec<(usize, u32)>>,
}

impl DatasetIndex {
    pub fn new(dataset: Dataset) -> Result<DatasetIndex, DatasetError> {
        crate::validate(&dataset)?;

        let teacher_idx: HashMap<String, usize> = dataset
            .teachers
            .iter()
            .enumerate()
            .map(|(i, t)| (t.id.0.clone(), i))
            .collect();
        let subject_idx: HashMap<String, usize> = dataset
            .subjects
            .iter()
            .enumerate()
            .map(|(i, s)| (s.id.0.clone(), i))
            .collect();
        let class_idx: HashMap<String, usize> = dataset
            .classes
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.0.clone(), i))
            .collect();

        let availability: Vec<u64> = dataset
            .teachers
            .iter()
            .map(|t| slot_mask(&t.available))
            .collect();
        let available_per_day: Vec<[u8; 5]> = dataset
            .teachers
            .iter()
            .map(|t| {
                let mut per_day = [0u8; 5];
                for s in &t.available {
                    per_day[s.day.index()] += 1;
                }
                per_day
            })
            .collect();
        let restriction: Vec<u64> = dataset
            .subjects
            .iter()
            .map(|s| slot_mask(&s.restricted))
            .collect();

        let mut qualified: HashMap<(usize, usize), Vec<usize>> = HashMap::new();
        for (ti, t) in dataset.teachers.iter().enumerate() {
            for q in &t.qualifications {
                let si = subject_idx[&q.subject.0];
                let ci = class_idx[&q.class.0];
                qualified.entry((si, ci)).or_default().push(ti);
            }
        }

        let exceptions = dataset
            .exceptions
            .iter()
            .map(|ex| CompiledException {
                teacher: ex.teacher.as_ref().map(|t| teacher_idx[&t.0]),
                subject: ex.subject.as_ref().map(|s| subject_idx[&s.0]),
                class: ex.class.as_ref().map(|c| class_idx[&c.0]),
                slot_mask: slot_mask(&ex.slots),
                verdict: ex.verdict,
                limit_two_lessons: ex.limit_two_lessons,
                must_pair: ex.must_pair,
            })
            .collect();

        let required = dataset
            .classes
            .iter()
            .map(|c| {
                c.subjects
                    .iter()
                    .map(|l| (subject_idx[&l.subject.0], l.weekly))
                    .collect()
            })
            .collect();

        Ok(DatasetIndex {
            dataset,
            teacher_idx,
            subject_idx,
            class_idx,
            availability,
            available_per_day,
            restriction,
            qualified,
            exceptions,
            required,
        })
    }

    pub fn teacher_count(&self) -> usize {
        self.dataset.teachers.len()
    }

    pub fn subject_count(&self) -> usize {
        self.dataset.subjects.len()
    }

    pub fn class_count(&self) -> usize {
        self.dataset.classes.len()
    }

    pub fn teacher_id(&self, i: usize) -> &TeacherId {
        &self.dataset.teachers[i].id
    }

    pub fn subject_id(&self, i: usize) -> &SubjectId {
        &self.dataset.subjects[i].id
    }

    pub fn class_id(&self, i: usize) -> &ClassId {
        &self.dataset.classes[i].id
    }

    pub fn teacher_index(&self, id: &TeacherId) -> Option<usize> {
        self.teacher_idx.get(&id.0).copied()
    }

    pub fn subject_index(&self, id: &SubjectId) -> Option<usize> {
        self.subject_idx.get(&id.0).copied()
    }

    pub fn class_index(&self, id: &ClassId) -> Option<usize> {
        self.class_idx.get(&id.0).copied()
    }

    pub fn daily_cap(&self, teacher: usize) -> u8 {
        self.dataset.teachers[teacher].daily_cap
    }

    pub fn is_available(&self, teacher: usize, slot: Slot) -> bool {
        self.availability[teacher] & (1u64 << slot.index()) != 0
    }

    pub fn available_count_on(&self, teacher: usize, day: types::Weekday) -> u8 {
        self.available_per_day[teacher][day.index()]
    }

    pub fn is_restricted(&self, subject: usize, slot: Slot) -> bool {
        self.restriction[subject] & (1u64 << slot.index()) != 0
    }

    /// Qualified teachers for (subject, class), in dataset order. Stable
    /// across calls; candidate selection depends on this order.
    pub fn qualified_teachers(&self, subject: usize, class: usize) -> &[usize] {
        self.qualified
            .get(&(subject, class))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_qualified(&self, teacher: usize, subject: usize, class: usize) -> bool {
        self.qualified_teachers(subject, class).contains(&teacher)
    }

    pub fn exceptions(&self) -> &[CompiledException] {
        &self.exceptions
    }

    /// (subject, weekly) pairs for a class, in declared order.
    pub fn required(&self, class: usize) -> &[(usize, u32)] {
        &self.required[class]
    }

    /// Required lessons of a class expanded into a flat sequence of subject
    /// indices, one entry per lesson. Position i of the sequence maps to
    /// weekday i % 5, period i / 5 + 1.
    pub fn lesson_sequence(&self, class: usize) -> Vec<usize> {
        let mut seq = Vec::new();
        for &(subject, weekly) in &self.required[class] {
            for _ in 0..weekly {
                seq.push(subject);
            }
        }
        seq
    }

    /// Class indices matching a shift filter; no filter selects all classes.
    pub fn classes_in_shift(&self, shift: Option<Shift>) -> Vec<usize> {
        self.dataset
            .classes
            .iter()
            .enumerate()
            .filter(|(_, c)| shift.map_or(true, |s| c.shift == s))
            .map(|(i, _)| i)
            .collect()
    }
}
