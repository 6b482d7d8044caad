//! Build a small dataset, run the greedy allocator and print the grids.
//!
//! ```sh
//! RUST_LOG=info cargo run -p engine --example generate
//! ```

use engine::{EngineConfig, EngineStores, ScheduleEngine, TraceSink};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use types::{
    Dataset, Qualification, SchoolClass, Shift, Slot, Subject, SubjectLoad, Teacher, Weekday,
    PERIODS_PER_DAY,
};

fn slots(days: &[Weekday]) -> Vec<Slot> {
    days.iter()
        .flat_map(|&d| (1..=PERIODS_PER_DAY).map(move |p| Slot::new(d, p)))
        .collect()
}

fn dataset() -> Dataset {
    let teacher = |id: &str, days: &[Weekday], subject: &str| Teacher {
        id: id.into(),
        available: slots(days),
        qualifications: ["6a", "6b"]
            .iter()
            .map(|class| Qualification {
                subject: subject.into(),
                class: (*class).into(),
            })
            .collect(),
        daily_cap: 4,
    };
    Dataset {
        teachers: vec![
            teacher("amaral", &[Weekday::Mon, Weekday::Tue, Weekday::Wed], "math"),
            teacher("borges", &[Weekday::Tue, Weekday::Wed, Weekday::Thu], "port"),
            teacher("castro", &[Weekday::Thu, Weekday::Fri], "hist"),
        ],
        subjects: ["math", "port", "hist"]
            .iter()
            .map(|id| Subject {
                id: (*id).into(),
                restricted: vec![],
            })
            .collect(),
        classes: ["6a", "6b"]
            .iter()
            .map(|id| SchoolClass {
                id: (*id).into(),
                shift: Shift::Afternoon,
                subjects: vec![
                    SubjectLoad {
                        subject: "math".into(),
                        weekly: 4,
                    },
                    SubjectLoad {
                        subject: "port".into(),
                        weekly: 4,
                    },
                    SubjectLoad {
                        subject: "hist".into(),
                        weekly: 2,
                    },
                ],
            })
            .collect(),
        exceptions: vec![],
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let engine = ScheduleEngine::new(dataset(), EngineStores::in_memory(), EngineConfig::default())?;
    engine.set_progress_sink(Arc::new(TraceSink));
    let outcome = engine.generate(None);

    for (class, grid) in &outcome.schedule.classes {
        println!("== class {class} ==");
        for (slot, alloc) in grid.iter() {
            println!("  {slot}  {} ({})", alloc.subject, alloc.teacher);
        }
    }
    for d in &outcome.deficits {
        println!(
            "deficit: {}/{} got {} of {}",
            d.class, d.subject, d.achieved, d.required
        );
    }
    Ok(())
}
