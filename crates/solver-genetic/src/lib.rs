//! Per-class genetic optimizer. An individual assigns a teacher (or
//! nobody) to each lesson of the class's expanded subject sequence;
//! fitness blends availability, restriction compliance and the learned
//! quality prediction.

use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use sched_core::{CancelToken, DatasetIndex, ProgressSink, Validator};
use sched_ml::{measure, LearningTracker, Predictor};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use types::{Allocation, ClassGrid, Schedule, Slot, Weekday, SLOTS_PER_WEEK};

fn default_population() -> usize {
    100
}

fn default_generations() -> usize {
    50
}

fn default_tournament() -> usize {
    3
}

fn default_crossover_prob() -> f64 {
    0.8
}

fn default_mutation_prob() -> f64 {
    0.05
}

fn default_init_retries() -> usize {
    15
}

fn default_min_fill() -> f64 {
    0.7
}

fn default_daily_cap() -> u32 {
    4
}

fn default_early_stop() -> f64 {
    95.0
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct GeneticConfig {
    #[serde(default = "default_population")]
    pub population: usize,
    #[serde(default = "default_generations")]
    pub generations: usize,
    #[serde(default = "default_tournament")]
    pub tournament: usize,
    #[serde(default = "default_crossover_prob")]
    pub crossover_prob: f64,
    #[serde(default = "default_mutation_prob")]
    pub mutation_prob: f64,
    #[serde(default = "default_init_retries")]
    pub init_retries: usize,
    #[serde(default = "default_min_fill")]
    pub min_fill: f64,
    #[serde(default = "default_daily_cap")]
    pub daily_cap: u32,
    #[serde(default = "default_early_stop")]
    pub early_stop_fitness: f64,
    #[serde(default)]
    pub seed: u64,
}

impl Default for GeneticConfig {
    fn default() -> GeneticConfig {
        GeneticConfig {
            population: default_population(),
            generations: default_generations(),
            tournament: default_tournament(),
            crossover_prob: default_crossover_prob(),
            mutation_prob: default_mutation_prob(),
            init_retries: default_init_retries(),
            min_fill: default_min_fill(),
            daily_cap: default_daily_cap(),
            early_stop_fitness: default_early_stop(),
            seed: 0,
        }
    }
}

/// Teacher choice per lesson position; position `i` sits on weekday
/// `i % 5`, period `i / 5 + 1`. Positions past the week's 35 cells stay
/// unassigned.
type Individual = Vec<Option<usize>>;

pub struct Evolved {
    pub grid: ClassGrid,
    pub fitness: f64,
    pub generations: usize,
}

pub struct GeneticOptimizer<'a> {
    idx: &'a DatasetIndex,
    validator: &'a Validator,
    predictor: Arc<Predictor>,
    cfg: GeneticConfig,
    cache: Mutex<HashMap<(usize, Individual), f64>>,
}

fn slot_of(position: usize) -> Option<Slot> {
    if position >= SLOTS_PER_WEEK {
        return None;
    }
    Some(Slot::new(Weekday::ALL[position % 5], (position / 5 + 1) as u8))
}

impl<'a> GeneticOptimizer<'a> {
    pub fn new(
        idx: &'a DatasetIndex,
        validator: &'a Validator,
        predictor: Arc<Predictor>,
        cfg: GeneticConfig,
    ) -> GeneticOptimizer<'a> {
        GeneticOptimizer {
            idx,
            validator,
            predictor,
            cfg,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Evolve one class's grid. Returns `None` when the class has nothing
    /// to schedule. Cancellation between generations keeps the best
    /// individual found so far.
    pub fn optimize_class(
        &self,
        class: usize,
        tracker: &LearningTracker,
        progress: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Option<Evolved> {
        let sequence = self.idx.lesson_sequence(class);
        if sequence.is_empty() {
            return None;
        }

        let mut rng = ChaCha8Rng::seed_from_u64(self.cfg.seed.wrapping_add(class as u64));
        let mut population: Vec<Individual> = (0..self.cfg.population.max(2))
            .map(|_| self.seed_individual(class, &sequence, &mut rng))
            .collect();

        let mut best: Option<(Individual, f64)> = None;
        let mut generation = 0;
        while generation < self.cfg.generations {
            let scores: Vec<f64> = population
                .par_iter()
                .map(|ind| self.fitness(class, &sequence, ind))
                .collect();

            let gen_best = scores
                .iter()
                .enumerate()
                .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
                .map(|(i, &f)| (i, f))?;
            if best.as_ref().map_or(true, |(_, f)| gen_best.1 > *f) {
                best = Some((population[gen_best.0].clone(), gen_best.1));
            }
            generation += 1;
            progress.emit(generation as f64 / self.cfg.generations as f64 * 100.0);

            if let Some((individual, fitness)) = &best {
                let grid = self.to_grid(class, &sequence, individual);
                let mut schedule = Schedule::default();
                schedule
                    .classes
                    .insert(self.idx.class_id(class).clone(), grid);
                let metrics = measure(self.idx, &schedule);
                let allocated = schedule.total_lessons();
                tracker.register(
                    sched_ml::features::extract(self.idx, &schedule),
                    &metrics,
                    *fitness,
                    allocated,
                );
            }

            if gen_best.1 >= self.cfg.early_stop_fitness {
                debug!(generation, fitness = gen_best.1, "early stop");
                break;
            }
            if cancel.is_cancelled() {
                info!(generation, "optimization cancelled, keeping best");
                break;
            }
            population = self.breed(class, &sequence, &population, &scores, gen_best.0, &mut rng);
        }

        best.map(|(individual, fitness)| Evolved {
            grid: self.to_grid(class, &sequence, &individual),
            fitness,
            generations: generation,
        })
    }

    /// Greedy-random seeding: a few tries to reach the minimum fill with
    /// availability- and cap-respecting least-loaded picks, then a
    /// fallback that takes any qualified teacher per position.
    fn seed_individual(
        &self,
        class: usize,
        sequence: &[usize],
        rng: &mut ChaCha8Rng,
    ) -> Individual {
        for _ in 0..self.cfg.init_retries.max(1) {
            let candidate = self.greedy_seed(class, sequence, rng);
            let filled = candidate.iter().flatten().count();
            if filled as f64 >= sequence.len() as f64 * self.cfg.min_fill {
                return candidate;
            }
        }
        sequence
            .iter()
            .map(|&subject| {
                let pool = self.idx.qualified_teachers(subject, class);
                pool.choose(rng).copied()
            })
            .collect()
    }

    fn greedy_seed(&self, class: usize, sequence: &[usize], rng: &mut ChaCha8Rng) -> Individual {
        let mut load = vec![0u32; self.idx.teacher_count()];
        let mut day_load = vec![[0u32; 5]; self.idx.teacher_count()];
        sequence
            .iter()
            .enumerate()
            .map(|(position, &subject)| {
                let slot = slot_of(position)?;
                let mut pool: Vec<usize> = self
                    .idx
                    .qualified_teachers(subject, class)
                    .iter()
                    .copied()
                    .filter(|&t| {
                        self.validator.availability_ok(t, slot)
                            && self.validator.restriction_ok(subject, slot)
                            && day_load[t][slot.day.index()] < self.cfg.daily_cap
                    })
                    .collect();
                pool.shuffle(rng);
                let pick = pool.into_iter().min_by_key(|&t| load[t])?;
                load[pick] += 1;
                day_load[pick][slot.day.index()] += 1;
                Some(pick)
            })
            .collect()
    }

    /// `0.4 * availability% + 0.3 * restriction% + 0.3 * predicted`,
    /// memoized per (class, individual).
    fn fitness(&self, class: usize, sequence: &[usize], individual: &Individual) -> f64 {
        let key = (class, individual.clone());
        if let Some(hit) = self.cache.lock().get(&key) {
            return *hit;
        }

        let mut assigned = 0u32;
        let mut available = 0u32;
        let mut unrestricted = 0u32;
        for (position, choice) in individual.iter().enumerate() {
            let (Some(teacher), Some(slot)) = (choice, slot_of(position)) else {
                continue;
            };
            let subject = sequence[position];
            assigned += 1;
            if self.validator.availability_ok(*teacher, slot) {
                available += 1;
            }
            if self.validator.restriction_ok(subject, slot) {
                unrestricted += 1;
            }
        }
        let pct = |n: u32| {
            if assigned == 0 {
                0.0
            } else {
                n as f64 / assigned as f64 * 100.0
            }
        };

        let grid = self.to_grid(class, sequence, individual);
        let mut schedule = Schedule::default();
        schedule
            .classes
            .insert(self.idx.class_id(class).clone(), grid);
        let predicted = self.predictor.score(self.idx, &schedule);

        let fitness = 0.4 * pct(available) + 0.3 * pct(unrestricted) + 0.3 * predicted;
        self.cache.lock().insert(key, fitness);
        fitness
    }

    fn breed(
        &self,
        class: usize,
        sequence: &[usize],
        population: &[Individual],
        scores: &[f64],
        elite: usize,
        rng: &mut ChaCha8Rng,
    ) -> Vec<Individual> {
        let mut next = Vec::with_capacity(population.len());
        next.push(population[elite].clone());
        while next.len() < population.len() {
            let a = self.tournament(population, scores, rng);
            let b = self.tournament(population, scores, rng);
            let mut child = self.crossover(a, b, rng);
            self.mutate(class, sequence, &mut child, rng);
            next.push(child);
        }
        next
    }

    fn tournament<'p>(
        &self,
        population: &'p [Individual],
        scores: &[f64],
        rng: &mut ChaCha8Rng,
    ) -> &'p Individual {
        let mut winner = rng.gen_range(0..population.len());
        for _ in 1..self.cfg.tournament.max(1) {
            let challenger = rng.gen_range(0..population.len());
            if scores[challenger] > scores[winner] {
                winner = challenger;
            }
        }
        &population[winner]
    }

    fn crossover(&self, a: &Individual, b: &Individual, rng: &mut ChaCha8Rng) -> Individual {
        if a.len() < 2 || !rng.gen_bool(self.cfg.crossover_prob.clamp(0.0, 1.0)) {
            return a.clone();
        }
        let mut lo = rng.gen_range(0..a.len());
        let mut hi = rng.gen_range(0..a.len());
        if lo > hi {
            std::mem::swap(&mut lo, &mut hi);
        }
        a.iter()
            .enumerate()
            .map(|(i, &gene)| if i >= lo && i <= hi { b[i] } else { gene })
            .collect()
    }

    fn mutate(
        &self,
        class: usize,
        sequence: &[usize],
        individual: &mut Individual,
        rng: &mut ChaCha8Rng,
    ) {
        let prob = self.cfg.mutation_prob.clamp(0.0, 1.0);
        for (position, gene) in individual.iter_mut().enumerate() {
            if !rng.gen_bool(prob) {
                continue;
            }
            let pool = self.idx.qualified_teachers(sequence[position], class);
            if let Some(&teacher) = pool.choose(rng) {
                *gene = Some(teacher);
            }
        }
    }

    fn to_grid(&self, class: usize, sequence: &[usize], individual: &Individual) -> ClassGrid {
        let mut grid = ClassGrid::new();
        for (position, choice) in individual.iter().enumerate() {
            let (Some(teacher), Some(slot)) = (choice, slot_of(position)) else {
                continue;
            };
            grid.set(
                slot,
                Allocation {
                    teacher: self.idx.teacher_id(*teacher).clone(),
                    subject: self.idx.subject_id(sequence[position]).clone(),
                    class: self.idx.class_id(class).clone(),
                },
            );
        }
        grid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sched_core::NullSink;
    use sched_ml::{MemoryHistoryStore, MemoryModelStore};
    use types::{
        Dataset, Qualification, SchoolClass, Shift, Subject, SubjectLoad, Teacher,
    };

    fn fixture() -> Arc<DatasetIndex> {
        let dataset = Dataset {
            teachers: vec![
                Teacher {
                    id: "nunes".into(),
                    available: Weekday::ALL
                        .iter()
                        .flat_map(|&d| (1..=4).map(move |p| Slot::new(d, p)))
                        .collect(),
                    qualifications: vec![Qualification {
                        subject: "math".into(),
                        class: "7a".into(),
                    }],
                    daily_cap: 4,
                },
                Teacher {
                    id: "prado".into(),
                    available: vec![Slot::new(Weekday::Mon, 1)],
                    qualifications: vec![Qualification {
                        subject: "math".into(),
                        class: "7a".into(),
                    }],
                    daily_cap: 4,
                },
            ],
            subjects: vec![Subject {
                id: "math".into(),
                restricted: vec![],
            }],
            classes: vec![SchoolClass {
                id: "7a".into(),
                shift: Shift::Afternoon,
                subjects: vec![SubjectLoad {
                    subject: "math".into(),
                    weekly: 5,
                }],
            }],
            exceptions: vec![],
        };
        Arc::new(DatasetIndex::new(dataset).unwrap())
    }

    fn optimizer(idx: &Arc<DatasetIndex>, validator: &Validator, cfg: GeneticConfig) -> Evolved {
        let predictor = Arc::new(Predictor::new(Arc::new(MemoryModelStore::default())));
        let tracker = LearningTracker::new(
            predictor.clone(),
            Arc::new(MemoryHistoryStore::default()),
            1000,
        );
        let ga = GeneticOptimizer::new(idx, validator, predictor, cfg);
        ga.optimize_class(0, &tracker, &NullSink, &CancelToken::new())
            .unwrap()
    }

    fn small_cfg() -> GeneticConfig {
        GeneticConfig {
            population: 20,
            generations: 10,
            seed: 7,
            ..GeneticConfig::default()
        }
    }

    #[test]
    fn evolves_a_grid_with_qualified_teachers_only() {
        let idx = fixture();
        let validator = Validator::new(idx.clone());
        let evolved = optimizer(&idx, &validator, small_cfg());
        assert!(evolved.grid.lessons() > 0);
        for (_, a) in evolved.grid.iter() {
            assert!(a.teacher == "nunes".into() || a.teacher == "prado".into());
        }
    }

    #[test]
    fn fitness_prefers_available_teachers() {
        let idx = fixture();
        let validator = Validator::new(idx.clone());
        let predictor = Arc::new(Predictor::new(Arc::new(MemoryModelStore::default())));
        let ga = GeneticOptimizer::new(&idx, &validator, predictor, small_cfg());
        let sequence = idx.lesson_sequence(0);
        // nunes (0) is broadly available; prado (1) only Monday period 1.
        let good: Individual = vec![Some(0); 5];
        let bad: Individual = vec![Some(1); 5];
        assert!(ga.fitness(0, &sequence, &good) > ga.fitness(0, &sequence, &bad));
    }

    #[test]
    fn fitness_is_memoized() {
        let idx = fixture();
        let validator = Validator::new(idx.clone());
        let predictor = Arc::new(Predictor::new(Arc::new(MemoryModelStore::default())));
        let ga = GeneticOptimizer::new(&idx, &validator, predictor.clone(), small_cfg());
        let sequence = idx.lesson_sequence(0);
        let ind: Individual = vec![Some(0); 5];
        let first = ga.fitness(0, &sequence, &ind);
        let second = ga.fitness(0, &sequence, &ind);
        assert_eq!(first, second);
        // The predictor was only consulted once for this individual.
        assert_eq!(predictor.cache_stats().1, 1);
    }

    #[test]
    fn same_seed_same_result() {
        let idx = fixture();
        let validator = Validator::new(idx.clone());
        let a = optimizer(&idx, &validator, small_cfg());
        let b = optimizer(&idx, &validator, small_cfg());
        assert_eq!(a.fitness, b.fitness);
        let cells_a: Vec<_> = a.grid.iter().map(|(s, x)| (s, x.clone())).collect();
        let cells_b: Vec<_> = b.grid.iter().map(|(s, x)| (s, x.clone())).collect();
        assert_eq!(cells_a, cells_b);
    }

    #[test]
    fn zero_generations_yield_nothing() {
        let idx = fixture();
        let validator = Validator::new(idx.clone());
        let predictor = Arc::new(Predictor::new(Arc::new(MemoryModelStore::default())));
        let tracker = LearningTracker::new(
            predictor.clone(),
            Arc::new(MemoryHistoryStore::default()),
            1000,
        );
        let cfg = GeneticConfig {
            generations: 0,
            ..small_cfg()
        };
        let ga = GeneticOptimizer::new(&idx, &validator, predictor, cfg);
        assert!(ga
            .optimize_class(0, &tracker, &NullSink, &CancelToken::new())
            .is_none());
    }
}
