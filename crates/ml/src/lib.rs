//! Learning layer: schedule feature extraction, a ridge-regression
//! quality predictor with caching and a named fallback, post-hoc quality
//! metrics, and the continuous learning tracker that feeds outcomes back
//! into the model.

pub mod features;
pub mod model;
pub mod predictor;
pub mod quality;
pub mod store;
pub mod tracker;

pub use model::TrainedModel;
pub use predictor::{Predictor, TrainError};
pub use quality::{measure, realized_score, QualityMetrics};
pub use store::{
    HistoryStore, JsonHistoryStore, JsonModelStore, MemoryHistoryStore, MemoryModelStore,
    ModelStore, StoreError,
};
pub use tracker::{HistoryEntry, LearningTracker, TrendReport, TrendSignal};
