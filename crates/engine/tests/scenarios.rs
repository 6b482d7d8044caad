use engine::{EngineConfig, EngineStores, ScheduleEngine};
use std::collections::HashSet;
use types::{
    Dataset, ExceptionRule, Qualification, SchoolClass, Shift, Slot, Subject, SubjectLoad,
    Teacher, Verdict, Weekday,
};

fn single_teacher_dataset(available: Vec<Slot>, weekly: u32) -> Dataset {
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

fn engine(dataset: Dataset) -> ScheduleEngine {
    ScheduleEngine::new(dataset, EngineStores::in_memory(), EngineConfig::default()).unwrap()
}

#[test]
fn enough_availability_fills_the_full_load() {
    let outcome = engine(single_teacher_dataset(
        vec![Slot::new(Weekday::Mon, 1), Slot::new(Weekday::Tue, 1)],
        2,
    ))
    .generate(None);
    assert!(outcome.deficits.is_empty());
    assert_eq!(outcome.schedule.total_lessons(), 2);
}

#[test]
fn short_availability_reports_the_exact_shortfall() {
    let outcome = engine(single_teacher_dataset(vec![Slot::new(Weekday::Mon, 1)], 2)).generate(None);
    assert_eq!(outcome.schedule.total_lessons(), 1);
    assert_eq!(outcome.deficits.len(), 1);
    let d = &outcome.deficits[0];
    assert_eq!((d.required, d.achieved), (2, 1));
    assert_eq!(d.class, "6a".into());
    assert_eq!(d.subject, "math".into());
}

#[test]
fn contested_teacher_is_never_double_booked() {
    // One teacher, available in exactly one slot, wanted by two classes.
    let dataset = Dataset {
        teachers: vec![Teacher {
            id: "costa".into(),
            available: vec![Slot::new(Weekday::Mon, 1)],
            qualifications: ["6a", "6b"]
                .iter()
                .map(|class| Qualification {
                    subject: "math".into(),
                    class: (*class).into(),
                })
                .collect(),
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
    let outcome = engine(dataset).generate(None);
    assert_eq!(outcome.schedule.total_lessons(), 1);
    assert_eq!(outcome.deficits.len(), 1);
    assert_eq!((outcome.deficits[0].required, outcome.deficits[0].achieved), (1, 0));
    let mut seen = HashSet::new();
    for (_, slot, alloc) in outcome.schedule.allocations() {
        assert!(
            seen.insert((alloc.teacher.clone(), slot.index())),
            "teacher booked twice at {slot}"
        );
    }
}

#[test]
fn subject_scoped_denial_blocks_every_class() {
    let mut dataset = Dataset {
        teachers: vec![Teacher {
            id: "dias".into(),
            available: (1..=4).map(|p| Slot::new(Weekday::Mon, p)).collect(),
            qualifications: ["6a", "6b"]
                .iter()
                .map(|class| Qualification {
                    subject: "math".into(),
                    class: (*class).into(),
                })
                .collect(),
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
    dataset.exceptions.push(ExceptionRule {
        teacher: None,
        subject: Some("math".into()),
        class: None,
        slots: vec![Slot::new(Weekday::Mon, 1)],
        verdict: Verdict::Deny,
        limit_two_lessons: false,
        must_pair: false,
    });
    let outcome = engine(dataset).generate(None);
    for (_, slot, alloc) in outcome.schedule.allocations() {
        if alloc.subject == "math".into() {
            assert_ne!(slot, Slot::new(Weekday::Mon, 1));
        }
    }
}

#[test]
fn shift_filter_limits_generation_to_matching_classes() {
    let mut dataset = single_teacher_dataset(
        vec![Slot::new(Weekday::Mon, 1), Slot::new(Weekday::Tue, 1)],
        1,
    );
    dataset.teachers[0].qualifications.push(Qualification {
        subject: "math".into(),
        class: "6n".into(),
    });
    dataset.classes.push(SchoolClass {
        id: "6n".into(),
        shift: Shift::Evening,
        subjects: vec![SubjectLoad {
            subject: "math".into(),
            weekly: 1,
        }],
    });
    let outcome = engine(dataset).generate(Some(Shift::Evening));
    let classes: HashSet<_> = outcome
        .schedule
        .allocations()
        .map(|(class, _, _)| class.clone())
        .collect();
    assert!(classes.contains(&"6n".into()));
    assert!(!classes.contains(&"6a".into()));
}

#[test]
fn invalid_dataset_is_rejected_before_any_allocation() {
    let mut dataset = single_teacher_dataset(vec![Slot::new(Weekday::Mon, 1)], 1);
    dataset.classes[0].subjects[0].weekly = 0;
    let err = ScheduleEngine::new(dataset, EngineStores::in_memory(), EngineConfig::default());
    assert!(err.is_err());
}

#[test]
fn optimize_produces_a_qualified_schedule() {
    let dataset = single_teacher_dataset(
        Weekday::ALL
            .iter()
            .flat_map(|&d| (1..=4).map(move |p| Slot::new(d, p)))
            .collect(),
        5,
    );
    let mut cfg = EngineConfig::default();
    cfg.genetic.population = 20;
    cfg.genetic.generations = 10;
    cfg.genetic.seed = 11;
    let engine = ScheduleEngine::new(dataset, EngineStores::in_memory(), cfg).unwrap();
    let outcome = engine.optimize(None);
    assert!(outcome.schedule.total_lessons() > 0);
    for (_, _, alloc) in outcome.schedule.allocations() {
        assert_eq!(alloc.teacher, "braga".into());
        assert_eq!(alloc.subject, "math".into());
    }
}

#[test]
fn model_and_history_survive_across_engines() {
    let dir = tempfile::tempdir().unwrap();
    let dataset = single_teacher_dataset(
        vec![Slot::new(Weekday::Mon, 1), Slot::new(Weekday::Tue, 1)],
        2,
    );

    let mut cfg = EngineConfig::default();
    cfg.retrain_threshold = 1; // retrain on the very first registration
    let first = ScheduleEngine::new(dataset.clone(), EngineStores::json(dir.path()), cfg).unwrap();
    first.generate(None);
    drop(first);

    assert!(dir.path().join("history.json").exists());
    let again = ScheduleEngine::new(
        dataset,
        EngineStores::json(dir.path()),
        EngineConfig::default(),
    )
    .unwrap();
    let outcome = again.generate(None);
    assert!(outcome.deficits.is_empty());
}

#[test]
fn cancelled_engine_returns_without_allocating() {
    let dataset = single_teacher_dataset(vec![Slot::new(Weekday::Mon, 1)], 1);
    let engine = engine(dataset);
    engine.cancel_token().cancel();
    let outcome = engine.generate(None);
    assert_eq!(outcome.schedule.total_lessons(), 0);
}
