use crate::model::{self, TrainedModel};
use crate::store::{ModelStore, StoreError};
use crate::features;
use parking_lot::{Mutex, RwLock};
use sched_core::DatasetIndex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use types::Schedule;

const RIDGE_LAMBDA: f64 = 1.0;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error("not enough samples to fit a model")]
    TooFewSamples,
    #[error("degenerate training matrix")]
    Degenerate,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Schedule quality predictor. Scoring never fails: an untrained model,
/// a degenerate fit or a non-finite prediction all fall back to the
/// completion-ratio heuristic, logged but invisible to the caller.
pub struct Predictor {
    store: Arc<dyn ModelStore>,
    model: RwLock<Option<TrainedModel>>,
    cache: Mutex<HashMap<u64, f64>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl Predictor {
    /// Loads the persisted model if the store has one; a load failure is
    /// logged and the predictor starts untrained.
    pub fn new(store: Arc<dyn ModelStore>) -> Predictor {
        let model = match store.load() {
            Ok(model) => model,
            Err(err) => {
                warn!(%err, "could not load persisted model, starting untrained");
                None
            }
        };
        Predictor {
            store,
            model: RwLock::new(model),
            cache: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn is_trained(&self) -> bool {
        self.model.read().is_some()
    }

    /// Predicted quality of a schedule in roughly [0, 100]. Cached by the
    /// order-independent allocation fingerprint.
    pub fn score(&self, idx: &DatasetIndex, schedule: &Schedule) -> f64 {
        let key = features::fingerprint(schedule);
        if let Some(hit) = self.cache.lock().get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return *hit;
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let score = match self.model.read().as_ref() {
            Some(model) => {
                let predicted = model.predict(&features::extract(idx, schedule));
                if predicted.is_finite() {
                    predicted
                } else {
                    warn!("non-finite prediction, using fallback score");
                    self.fallback_score(idx, schedule)
                }
            }
            None => self.fallback_score(idx, schedule),
        };
        self.cache.lock().insert(key, score);
        score
    }

    /// Completion-ratio heuristic scaled to [0, 100]; the landing spot for
    /// every prediction failure path.
    pub fn fallback_score(&self, idx: &DatasetIndex, schedule: &Schedule) -> f64 {
        let required: u32 = (0..idx.class_count())
            .flat_map(|c| idx.required(c).iter().map(|&(_, weekly)| weekly))
            .sum();
        if required == 0 {
            return 0.0;
        }
        let achieved = schedule.total_lessons() as f64;
        (achieved / required as f64).clamp(0.0, 1.0) * 100.0
    }

    /// Refit from accumulated (features, score) samples and persist. The
    /// write lock makes retraining exclusive with prediction; the score
    /// cache is dropped because the model changed.
    pub fn train(&self, samples: &[(Vec<f64>, f64)]) -> Result<(), TrainError> {
        if samples.is_empty() {
            return Err(TrainError::TooFewSamples);
        }
        let fitted = model::fit(samples, RIDGE_LAMBDA).ok_or(TrainError::Degenerate)?;
        debug!(samples = samples.len(), width = fitted.width, "model refitted");

        let mut guard = self.model.write();
        self.store.save(&fitted)?;
        *guard = Some(fitted);
        self.cache.lock().clear();
        Ok(())
    }

    /// (hits, misses) of the prediction cache.
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}
