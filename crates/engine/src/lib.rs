//! Engine facade: one `ScheduleEngine` per dataset snapshot, wiring the
//! validator, the greedy allocator, the genetic optimizer and the
//! learning layer together. Only the regression model and the outcome
//! history survive across engines, through the injected stores.

use parking_lot::RwLock;
use sched_core::{CancelToken, DatasetError, DatasetIndex, NullSink, ProgressSink, Validator};
use sched_ml::{
    measure, realized_score, JsonHistoryStore, JsonModelStore, LearningTracker, MemoryHistoryStore,
    MemoryModelStore, HistoryStore, ModelStore, Predictor, QualityMetrics, TrendReport,
};
use serde::{Deserialize, Serialize};
use solver_genetic::{GeneticConfig, GeneticOptimizer};
use solver_greedy::{AllocatorConfig, GreedyAllocator};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use types::{Dataset, Deficit, Outcome, Schedule, Shift};

fn default_retrain_threshold() -> usize {
    10
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub allocator: AllocatorConfig,
    #[serde(default)]
    pub genetic: GeneticConfig,
    #[serde(default = "default_retrain_threshold")]
    pub retrain_threshold: usize,
}

impl Default for EngineConfig {
    fn default() -> EngineConfig {
        EngineConfig {
            allocator: AllocatorConfig::default(),
            genetic: GeneticConfig::default(),
            retrain_threshold: default_retrain_threshold(),
        }
    }
}

/// The two persistence seams handed to an engine at construction.
pub struct EngineStores {
    pub model: Arc<dyn ModelStore>,
    pub history: Arc<dyn HistoryStore>,
}

impl EngineStores {
    pub fn in_memory() -> EngineStores {
        EngineStores {
            model: Arc::new(MemoryModelStore::default()),
            history: Arc::new(MemoryHistoryStore::default()),
        }
    }

    pub fn json(dir: &Path) -> EngineStores {
        EngineStores {
            model: Arc::new(JsonModelStore::new(dir.join("model.json"))),
            history: Arc::new(JsonHistoryStore::new(dir.join("history.json"))),
        }
    }
}

/// Progress sink that logs percentages; handy for CLI runs.
#[derive(Clone, Copy, Debug, Default)]
pub struct TraceSink;

impl ProgressSink for TraceSink {
    fn emit(&self, percent: f64) {
        debug!(percent = percent.round(), "progress");
    }
}

pub struct ScheduleEngine {
    idx: Arc<DatasetIndex>,
    validator: Validator,
    predictor: Arc<Predictor>,
    tracker: LearningTracker,
    cfg: EngineConfig,
    cancel: CancelToken,
    progress: RwLock<Arc<dyn ProgressSink>>,
}

impl ScheduleEngine {
    /// Fails fast on an inconsistent dataset; nothing is allocated before
    /// the dataset passes validation.
    pub fn new(
        dataset: Dataset,
        stores: EngineStores,
        cfg: EngineConfig,
    ) -> Result<ScheduleEngine, DatasetError> {
        let idx = Arc::new(DatasetIndex::new(dataset)?);
        let validator = Validator::new(idx.clone());
        let predictor = Arc::new(Predictor::new(stores.model));
        let tracker = LearningTracker::new(predictor.clone(), stores.history, cfg.retrain_threshold);
        Ok(ScheduleEngine {
            idx,
            validator,
            predictor,
            tracker,
            cfg,
            cancel: CancelToken::new(),
            progress: RwLock::new(Arc::new(NullSink)),
        })
    }

    pub fn set_progress_sink(&self, sink: Arc<dyn ProgressSink>) {
        *self.progress.write() = sink;
    }

    /// Token shared with long-running calls; cancelling it makes both
    /// `generate` and `optimize` return their best result so far.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Greedy backtracking allocation over the shift's classes (no shift
    /// selects every class). Deficits are reported, never fatal; the
    /// outcome is registered with the learning tracker.
    pub fn generate(&self, shift: Option<Shift>) -> Outcome {
        let classes = self.idx.classes_in_shift(shift);
        let progress = self.progress.read().clone();
        let allocator = GreedyAllocator::new(&self.idx, &self.validator, self.cfg.allocator.clone());
        let (schedule, deficits) = allocator.allocate(&classes, progress.as_ref(), &self.cancel);

        let metrics = self.register(&schedule);
        info!(
            classes = classes.len(),
            lessons = schedule.total_lessons(),
            deficits = deficits.len(),
            gaps = metrics.gaps,
            "generate finished"
        );
        Outcome { schedule, deficits }
    }

    /// Genetic optimization, one evolution per class, fragments merged
    /// into a single schedule.
    pub fn optimize(&self, shift: Option<Shift>) -> Outcome {
        let classes = self.idx.classes_in_shift(shift);
        let progress = self.progress.read().clone();
        let ga = GeneticOptimizer::new(
            &self.idx,
            &self.validator,
            self.predictor.clone(),
            self.cfg.genetic.clone(),
        );

        let mut schedule = Schedule::default();
        let mut deficits = Vec::new();
        for &class in &classes {
            if self.cancel.is_cancelled() {
                break;
            }
            let evolved = ga.optimize_class(class, &self.tracker, progress.as_ref(), &self.cancel);
            let grid = match evolved {
                Some(evolved) => {
                    debug!(
                        class = %self.idx.class_id(class),
                        fitness = evolved.fitness,
                        generations = evolved.generations,
                        "class evolved"
                    );
                    evolved.grid
                }
                None => continue,
            };
            for &(subject, weekly) in self.idx.required(class) {
                let achieved = grid
                    .iter()
                    .filter(|(_, a)| self.idx.subject_index(&a.subject) == Some(subject))
                    .count() as u32;
                if achieved < weekly {
                    deficits.push(Deficit {
                        class: self.idx.class_id(class).clone(),
                        subject: self.idx.subject_id(subject).clone(),
                        required: weekly,
                        achieved,
                    });
                }
            }
            schedule.classes.insert(self.idx.class_id(class).clone(), grid);
        }

        let metrics = self.register(&schedule);
        info!(
            classes = classes.len(),
            lessons = schedule.total_lessons(),
            deficits = deficits.len(),
            gaps = metrics.gaps,
            "optimize finished"
        );
        Outcome { schedule, deficits }
    }

    pub fn trends(&self) -> TrendReport {
        self.tracker.analyze_trends()
    }

    pub fn improvement(&self) -> f64 {
        self.tracker.improvement()
    }

    fn register(&self, schedule: &Schedule) -> QualityMetrics {
        let metrics = measure(&self.idx, schedule);
        let allocated = schedule.total_lessons();
        let score = realized_score(&metrics, allocated);
        self.tracker.register(
            sched_ml::features::extract(&self.idx, schedule),
            &metrics,
            score,
            allocated,
        );
        metrics
    }
}
