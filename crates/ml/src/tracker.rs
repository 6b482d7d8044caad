use crate::predictor::Predictor;
use crate::quality::QualityMetrics;
use crate::store::HistoryStore;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

const HISTORY_CAP: usize = 100;
const TREND_WINDOW: usize = 10;
const RECENT: usize = 3;
/// A run counts as successful up to this share of gaps per allocated lesson.
const GAP_TOLERANCE: f64 = 0.2;

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub timestamp: u64,
    pub score: f64,
    pub success: bool,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TrendSignal {
    Improving,
    Degrading,
    Stable,
}

#[derive(Clone, Debug)]
pub struct TrendReport {
    pub signal: TrendSignal,
    pub top_conflict: Option<String>,
}

#[derive(Default)]
struct TrackerState {
    history: Vec<HistoryEntry>,
    conflict_counts: HashMap<String, u64>,
    samples: Vec<(Vec<f64>, f64)>,
    registrations: usize,
}

/// Accumulates outcome history across runs, keeps an additive conflict
/// histogram, and retrains the predictor every `retrain_threshold`
/// registrations. Everything here is best-effort: persistence and
/// training failures are logged and swallowed.
pub struct LearningTracker {
    predictor: Arc<Predictor>,
    store: Arc<dyn HistoryStore>,
    retrain_threshold: usize,
    state: Mutex<TrackerState>,
}

impl LearningTracker {
    pub fn new(
        predictor: Arc<Predictor>,
        store: Arc<dyn HistoryStore>,
        retrain_threshold: usize,
    ) -> LearningTracker {
        let history = match store.load() {
            Ok(history) => history,
            Err(err) => {
                warn!(%err, "could not load outcome history, starting empty");
                Vec::new()
            }
        };
        LearningTracker {
            predictor,
            store,
            retrain_threshold: retrain_threshold.max(1),
            state: Mutex::new(TrackerState {
                history,
                ..TrackerState::default()
            }),
        }
    }

    /// Record one finished run: its feature vector, observed quality and
    /// score. Triggers a predictor retrain on every
    /// `retrain_threshold`-th registration.
    pub fn register(
        &self,
        features: Vec<f64>,
        metrics: &QualityMetrics,
        score: f64,
        allocated: usize,
    ) {
        let gap_share = if allocated == 0 {
            0.0
        } else {
            metrics.gaps as f64 / allocated as f64
        };
        let success = metrics.hard_conflicts() == 0 && gap_share <= GAP_TOLERANCE;

        let retrain = {
            let mut state = self.state.lock();
            state.history.push(HistoryEntry {
                timestamp: unix_now(),
                score,
                success,
            });
            if state.history.len() > HISTORY_CAP {
                let excess = state.history.len() - HISTORY_CAP;
                state.history.drain(..excess);
            }
            for (kind, n) in &metrics.conflicts {
                *state.conflict_counts.entry(kind.clone()).or_default() += *n as u64;
            }
            state.samples.push((features, score));
            state.registrations += 1;

            if let Err(err) = self.store.save(&state.history) {
                warn!(%err, "could not persist outcome history");
            }
            if state.registrations % self.retrain_threshold == 0 {
                Some(state.samples.clone())
            } else {
                None
            }
        };

        if let Some(samples) = retrain {
            match self.predictor.train(&samples) {
                Ok(()) => info!(samples = samples.len(), "predictor retrained"),
                Err(err) => warn!(%err, "predictor retrain failed, keeping old model"),
            }
        }
    }

    pub fn history_len(&self) -> usize {
        self.state.lock().history.len()
    }

    /// Percent change from the first to the last score of the latest
    /// ten-entry window; zero while the window is too short.
    pub fn improvement(&self) -> f64 {
        let state = self.state.lock();
        let window = tail(&state.history, TREND_WINDOW);
        match (window.first(), window.last()) {
            (Some(first), Some(last)) if window.len() >= 2 && first.score != 0.0 => {
                (last.score - first.score) / first.score * 100.0
            }
            _ => 0.0,
        }
    }

    /// Compare the mean of the last three scores against the mean of the
    /// rest of the ten-entry window; a ±10% band is called stable. Needs
    /// at least ten recorded runs to say anything but `Stable`.
    pub fn analyze_trends(&self) -> TrendReport {
        let state = self.state.lock();
        let top_conflict = state
            .conflict_counts
            .iter()
            .max_by_key(|(_, n)| **n)
            .filter(|(_, n)| **n > 0)
            .map(|(k, _)| k.clone());

        if state.history.len() < TREND_WINDOW {
            return TrendReport {
                signal: TrendSignal::Stable,
                top_conflict,
            };
        }

        let window = tail(&state.history, TREND_WINDOW);
        let (older, recent) = window.split_at(window.len() - RECENT);
        let recent_mean = mean(recent);
        let older_mean = mean(older);
        let signal = if older_mean == 0.0 {
            TrendSignal::Stable
        } else if recent_mean > older_mean * 1.1 {
            TrendSignal::Improving
        } else if recent_mean < older_mean * 0.9 {
            TrendSignal::Degrading
        } else {
            TrendSignal::Stable
        };
        TrendReport {
            signal,
            top_conflict,
        }
    }
}

fn tail(history: &[HistoryEntry], n: usize) -> &[HistoryEntry] {
    &history[history.len().saturating_sub(n)..]
}

fn mean(entries: &[HistoryEntry]) -> f64 {
    if entries.is_empty() {
        return 0.0;
    }
    entries.iter().map(|e| e.score).sum::<f64>() / entries.len() as f64
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::CONFLICT_TEACHER_OVERLAP;
    use crate::store::{MemoryHistoryStore, MemoryModelStore};

    fn tracker(threshold: usize) -> LearningTracker {
        LearningTracker::new(
            Arc::new(Predictor::new(Arc::new(MemoryModelStore::default()))),
            Arc::new(MemoryHistoryStore::default()),
            threshold,
        )
    }

    fn register_score(t: &LearningTracker, score: f64) {
        t.register(vec![score, 1.0], &QualityMetrics::default(), score, 10);
    }

    #[test]
    fn success_requires_no_hard_conflicts_and_few_gaps() {
        let t = tracker(100);
        let mut conflicted = QualityMetrics::default();
        conflicted
            .conflicts
            .insert(CONFLICT_TEACHER_OVERLAP.into(), 1);
        t.register(vec![1.0], &conflicted, 40.0, 10);

        let mut gappy = QualityMetrics::default();
        gappy.gaps = 5; // 50% of 10 allocated lessons
        t.register(vec![1.0], &gappy, 60.0, 10);

        t.register(vec![1.0], &QualityMetrics::default(), 90.0, 10);

        let history = t.state.lock().history.clone();
        assert_eq!(
            history.iter().map(|e| e.success).collect::<Vec<_>>(),
            vec![false, false, true]
        );
    }

    #[test]
    fn history_is_capped() {
        let t = tracker(1000);
        for i in 0..(HISTORY_CAP + 20) {
            register_score(&t, i as f64);
        }
        assert_eq!(t.history_len(), HISTORY_CAP);
    }

    #[test]
    fn retrains_at_the_threshold() {
        let t = tracker(5);
        for i in 0..4 {
            register_score(&t, 10.0 + i as f64);
        }
        assert!(!t.predictor.is_trained());
        register_score(&t, 14.0);
        assert!(t.predictor.is_trained());
    }

    #[test]
    fn trends_need_ten_entries() {
        let t = tracker(1000);
        for i in 0..9 {
            register_score(&t, i as f64 * 10.0);
        }
        assert_eq!(t.analyze_trends().signal, TrendSignal::Stable);
    }

    #[test]
    fn rising_scores_read_as_improving() {
        let t = tracker(1000);
        for _ in 0..7 {
            register_score(&t, 50.0);
        }
        for _ in 0..3 {
            register_score(&t, 90.0);
        }
        assert_eq!(t.analyze_trends().signal, TrendSignal::Improving);
        assert!(t.improvement() > 0.0);
    }

    #[test]
    fn falling_scores_read_as_degrading_with_top_conflict() {
        let t = tracker(1000);
        let mut conflicted = QualityMetrics::default();
        conflicted
            .conflicts
            .insert(CONFLICT_TEACHER_OVERLAP.into(), 3);
        for _ in 0..7 {
            t.register(vec![1.0], &conflicted, 80.0, 10);
        }
        for _ in 0..3 {
            t.register(vec![1.0], &QualityMetrics::default(), 40.0, 10);
        }
        let report = t.analyze_trends();
        assert_eq!(report.signal, TrendSignal::Degrading);
        assert_eq!(report.top_conflict.as_deref(), Some(CONFLICT_TEACHER_OVERLAP));
    }
}
