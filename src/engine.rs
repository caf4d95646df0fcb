//! # Backtracking Search Engine
//!
//! The engine drives candidate vectors through the state space in address
//! order, evaluates the consistency predicate with access tracking enabled,
//! and uses the accessed-field set to decide the next vector. Two pruning
//! mechanisms collapse the search space without materializing the skipped
//! regions:
//!
//! - **Don't-care skipping**: an address the predicate never read did not
//!   influence the outcome, so the engine never enumerates its sibling
//!   values while everything else is held fixed. Advancing walks the
//!   accessed list backwards in access order, resetting each exhausted
//!   field to its domain minimum, until it finds a field with an admissible
//!   next value to increment.
//! - **Isomorphism pruning**: for a class pool included in isomorphism
//!   checking, a value denoting pool object `j > 0` is admissible only once
//!   every lower-indexed pool object is already held by a field accessed
//!   earlier in the same evaluation. Candidates differing only by a
//!   permutation of interchangeable pool objects thus collapse into one
//!   canonical representative.
//!
//! The loop is single-threaded and cooperative: one engine exclusively owns
//! one heap and one vector for the run's duration. Parallelism comes from
//! running independent engines over disjoint `[start, end)` segments of the
//! visitation sequence, with boundary vectors taken from a reference run;
//! partitions never communicate. Listener callbacks are synchronous — a slow
//! listener throttles throughput but cannot corrupt state. Cancellation is a
//! flag checked once per step; the engine finishes the current step and
//! reports final totals.
//!
//! Predicate evaluation is assumed pure and total over the current field
//! values. A panicking predicate is a fatal run error, caught via
//! `catch_unwind` and surfaced as [`EngineError::PredicateFailure`].

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::candidate::CandidateHeap;
use crate::domain::{ClassId, FieldDomain, ObjSetEntry};
use crate::finitization::{ConfigError, Finitization};
use crate::space::StateSpace;

/// Fatal run errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("predicate failed on candidate {candidate}: {message}")]
    PredicateFailure { candidate: u64, message: String },
}

/// Knobs for one run. The defaults explore the whole space with no valid
/// cap and no cancellation.
#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Vector to start from (inclusive); all-minimum when absent. Used for
    /// partitioned search.
    pub start: Option<Vec<usize>>,

    /// Vector to stop at (exclusive): the run ends when the candidate
    /// vector equals it. Meaningful boundaries are vectors an unpartitioned
    /// run visits; run to exhaustion when absent.
    pub end: Option<Vec<usize>>,

    /// Stop after reporting this many valid candidates.
    pub max_valid: Option<u64>,

    /// Cooperative cancellation flag, checked once per step.
    pub cancel: Option<Arc<AtomicBool>>,
}

/// Totals reported at the end of a run (and to `on_run_finished`).
#[derive(Clone, Debug, Default)]
pub struct RunStats {
    /// Candidates materialized and evaluated.
    pub explored: u64,
    /// Candidates the predicate accepted.
    pub valid: u64,
    /// Whether the run stopped on the cancellation flag.
    pub cancelled: bool,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// One explored candidate, handed to listeners synchronously.
pub struct Step<'a> {
    /// The materialized object graph.
    pub heap: &'a CandidateHeap,
    /// The candidate vector that produced it.
    pub vector: &'a [usize],
    /// Addresses the predicate read, in first-touch order.
    pub accessed: &'a [usize],
    /// Whether the predicate accepted the candidate.
    pub valid: bool,
    /// Zero-based step ordinal.
    pub index: u64,
}

/// Synchronous observer of explored candidates and run completion.
pub trait SearchListener {
    fn on_candidate(&mut self, step: &Step<'_>);

    fn on_run_finished(&mut self, _stats: &RunStats) {}
}

/// The bounded-exhaustive search engine. Exclusively owns the candidate
/// vector and the one live object graph for the run's duration.
pub struct SearchEngine {
    space: Arc<StateSpace>,
    heap: CandidateHeap,
    vector: Vec<usize>,
    end: Option<Vec<usize>>,
    max_valid: Option<u64>,
    cancel: Option<Arc<AtomicBool>>,
    listeners: Vec<Box<dyn SearchListener>>,
    last_accessed: Vec<usize>,
    stats: RunStats,
    finished: bool,
}

impl SearchEngine {
    /// Builds an engine over the given space. Start/end vectors that do not
    /// match the layout are rejected here, before any search step.
    pub fn new(space: Arc<StateSpace>, config: EngineConfig) -> Result<SearchEngine, ConfigError> {
        if let Some(start) = &config.start {
            space.validate_vector(start)?;
        }
        if let Some(end) = &config.end {
            if end.len() != space.len() {
                return Err(ConfigError::VectorLengthMismatch {
                    expected: space.len(),
                    actual: end.len(),
                });
            }
        }
        let vector = config
            .start
            .clone()
            .unwrap_or_else(|| vec![0; space.len()]);
        let heap = CandidateHeap::new(Arc::clone(&space));
        Ok(SearchEngine {
            space,
            heap,
            vector,
            end: config.end,
            max_valid: config.max_valid,
            cancel: config.cancel,
            listeners: Vec::new(),
            last_accessed: Vec::new(),
            stats: RunStats::default(),
            finished: false,
        })
    }

    pub fn add_listener(&mut self, listener: Box<dyn SearchListener>) {
        self.listeners.push(listener);
    }

    /// The candidate vector as of the most recent step.
    pub fn current_vector(&self) -> &[usize] {
        &self.vector
    }

    /// Addresses the predicate read on the most recent step, in first-touch
    /// order.
    pub fn accessed_fields(&self) -> &[usize] {
        &self.last_accessed
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    pub fn heap(&self) -> &CandidateHeap {
        &self.heap
    }

    /// Explores the space, driving the candidate vector from its start to
    /// exhaustion (or the end vector, the valid cap, or cancellation).
    /// Consumes the engine's search state; a second call is a no-op
    /// returning the totals of the first.
    pub fn run<F>(&mut self, mut predicate: F) -> Result<RunStats, EngineError>
    where
        F: FnMut(&CandidateHeap) -> bool,
    {
        if self.finished {
            return Ok(self.stats.clone());
        }
        let started = Instant::now();
        log::debug!(
            "search started: {} addresses, start={:?}",
            self.space.len(),
            self.vector
        );

        // Every address is "changed" for the first materialization.
        let mut changed: Vec<usize> = (0..self.space.len()).collect();
        loop {
            if let Some(flag) = &self.cancel {
                if flag.load(Ordering::Relaxed) {
                    self.stats.cancelled = true;
                    log::debug!("search cancelled after {} candidates", self.stats.explored);
                    break;
                }
            }
            if let Some(end) = &self.end {
                // Equality, not ordering: the visitation sequence is not
                // monotone in address-lexicographic order, but determinism
                // guarantees a boundary vector from a reference run is hit
                // exactly once.
                if self.vector == *end {
                    break;
                }
            }

            self.heap.materialize(&self.vector, &changed);
            self.heap.clear_access_log();
            let heap = &self.heap;
            let valid = match catch_unwind(AssertUnwindSafe(|| predicate(heap))) {
                Ok(valid) => valid,
                Err(payload) => {
                    return Err(EngineError::PredicateFailure {
                        candidate: self.stats.explored,
                        message: panic_message(payload),
                    });
                }
            };
            self.last_accessed = self.heap.accessed();
            self.stats.explored += 1;
            if valid {
                self.stats.valid += 1;
            }

            let step = Step {
                heap: &self.heap,
                vector: &self.vector,
                accessed: &self.last_accessed,
                valid,
                index: self.stats.explored - 1,
            };
            for listener in &mut self.listeners {
                listener.on_candidate(&step);
            }

            if let Some(cap) = self.max_valid {
                if self.stats.valid >= cap {
                    log::debug!("valid-candidate cap {} reached", cap);
                    break;
                }
            }

            match self.advance() {
                Some(delta) => changed = delta,
                None => break,
            }
        }

        self.stats.elapsed = started.elapsed();
        self.finished = true;
        for listener in &mut self.listeners {
            listener.on_run_finished(&self.stats);
        }
        log::debug!(
            "search finished: {} explored, {} valid in {:?}",
            self.stats.explored,
            self.stats.valid,
            self.stats.elapsed
        );
        Ok(self.stats.clone())
    }

    /// Computes the next candidate vector from the accessed-field set of the
    /// step just evaluated. Returns the changed positions, or `None` when
    /// the space is exhausted.
    ///
    /// Backtracking follows the access sequence, not address order: the
    /// last-accessed field is incremented first, and each exhausted field
    /// resets to its domain minimum as the walk moves towards the
    /// first-accessed field. Unaccessed addresses are never touched — their
    /// values did not affect the outcome.
    fn advance(&mut self) -> Option<Vec<usize>> {
        let mut delta = Vec::new();
        for pos in (0..self.last_accessed.len()).rev() {
            let k = self.last_accessed[pos];
            if let Some(next) = self.next_index(k, pos) {
                log::trace!(
                    "advance: {} {} -> {}",
                    self.space.describe_address(k),
                    self.vector[k],
                    next
                );
                self.vector[k] = next;
                delta.push(k);
                return Some(delta);
            }
            if self.vector[k] != 0 {
                self.vector[k] = 0;
                delta.push(k);
            }
        }
        None
    }

    /// Smallest admissible domain index above the current one at address
    /// `k`, the field at position `pos` of the access sequence; `None` when
    /// `k` is effectively at its maximum. Isomorphism admissibility is
    /// judged against the fields accessed before `pos`.
    fn next_index(&self, k: usize, pos: usize) -> Option<usize> {
        let domain = self.space.domain_of(k);
        let current = self.vector[k];
        let max = domain.max_index();
        let set = match domain {
            FieldDomain::ObjSet(set) => set,
            _ => {
                return if current < max { Some(current + 1) } else { None };
            }
        };

        let fin = self.space.finitization();
        // Highest pool index per class among the earlier-accessed fields,
        // computed lazily: most increments never reach an
        // isomorphism-checked entry.
        let mut max_used: Vec<Option<isize>> = vec![None; fin.class_count()];
        for value in (current + 1)..=max {
            match set.entry_at(value) {
                ObjSetEntry::Null => return Some(value),
                ObjSetEntry::Obj {
                    class, pool_index, ..
                } => {
                    if !fin.class_domain(class).isomorphism_checked() {
                        return Some(value);
                    }
                    let cap = *max_used[class.0]
                        .get_or_insert_with(|| self.max_pool_index_before(pos, class))
                        + 1;
                    if (pool_index as isize) <= cap {
                        return Some(value);
                    }
                    // Objects beyond the cap stay inadmissible until an
                    // earlier-accessed field uses their predecessors; later
                    // entries of the set may belong to another class, so
                    // keep scanning.
                }
            }
        }
        None
    }

    /// Highest pool index of `class` held by any field accessed before
    /// position `pos` of the access sequence; -1 when none is.
    fn max_pool_index_before(&self, pos: usize, class: ClassId) -> isize {
        let mut max_used = -1;
        for &j in &self.last_accessed[..pos] {
            if let FieldDomain::ObjSet(set) = self.space.domain_of(j) {
                if let ObjSetEntry::Obj {
                    class: c,
                    pool_index,
                    ..
                } = set.entry_at(self.vector[j])
                {
                    if c == class {
                        max_used = max_used.max(pool_index as isize);
                    }
                }
            }
        }
        max_used
    }
}

/// The class-under-test convention: a type that knows how to bound its own
/// candidate space and check one candidate for consistency.
pub trait Finitized {
    /// Builds the finite domain model for the given size bound.
    fn finitize(bound: usize) -> Finitization;

    /// The consistency predicate; must be pure and total over the current
    /// field values.
    fn rep_ok(heap: &CandidateHeap) -> bool;
}

/// Convenience entry point: builds the space for `T` at `bound` and runs an
/// exhaustive search under `config`.
pub fn explore<T: Finitized>(bound: usize, config: EngineConfig) -> Result<RunStats, EngineError> {
    let space = StateSpace::build(T::finitize(bound))?;
    let mut engine = SearchEngine::new(space, config)?;
    engine.run(T::rep_ok)
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "predicate panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::space::FieldHandle;
    use std::sync::Mutex;

    fn int_pair_space(hi: i64) -> Arc<StateSpace> {
        let mut f = Finitization::new();
        let pair = f.add_class("Pair", &["a", "b"], 1);
        let d = f.create_int_range(0, hi).unwrap();
        f.set(pair, "a", d).unwrap();
        f.set(pair, "b", d).unwrap();
        StateSpace::build(f).unwrap()
    }

    fn handle(space: &StateSpace, class: usize, field: &str) -> FieldHandle {
        space.field_handle(ClassId(class), field).unwrap()
    }

    /// Records every explored vector through shared state.
    struct Recorder {
        vectors: Arc<Mutex<Vec<Vec<usize>>>>,
        finals: Arc<Mutex<Option<(u64, u64)>>>,
    }

    impl SearchListener for Recorder {
        fn on_candidate(&mut self, step: &Step<'_>) {
            self.vectors.lock().unwrap().push(step.vector.to_vec());
        }

        fn on_run_finished(&mut self, stats: &RunStats) {
            *self.finals.lock().unwrap() = Some((stats.explored, stats.valid));
        }
    }

    fn record(
        engine: &mut SearchEngine,
    ) -> (
        Arc<Mutex<Vec<Vec<usize>>>>,
        Arc<Mutex<Option<(u64, u64)>>>,
    ) {
        let vectors = Arc::new(Mutex::new(Vec::new()));
        let finals = Arc::new(Mutex::new(None));
        engine.add_listener(Box::new(Recorder {
            vectors: Arc::clone(&vectors),
            finals: Arc::clone(&finals),
        }));
        (vectors, finals)
    }

    #[test]
    fn unread_fields_are_never_enumerated() {
        let space = int_pair_space(2);
        let a = handle(&space, 0, "a");
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let stats = engine
            .run(|heap| heap.get_int(heap.root(), a) == 1)
            .unwrap();
        // The predicate ignores `b`, so only `a`'s three values are visited,
        // not the 3x3 cross product.
        assert_eq!(stats.explored, 3);
        assert_eq!(stats.valid, 1);
    }

    #[test]
    fn full_cross_product_when_every_field_is_read() {
        let space = int_pair_space(2);
        let a = handle(&space, 0, "a");
        let b = handle(&space, 0, "b");
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let stats = engine
            .run(|heap| {
                let root = heap.root();
                heap.get_int(root, a) + heap.get_int(root, b) >= 0
            })
            .unwrap();
        assert_eq!(stats.explored, 9);
        assert_eq!(stats.valid, 9);
    }

    #[test]
    fn backtracking_follows_access_order_not_address_order() {
        let space = int_pair_space(1);
        let a = handle(&space, 0, "a");
        let b = handle(&space, 0, "b");
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let (vectors, _) = record(&mut engine);
        let stats = engine
            .run(|heap| {
                let root = heap.root();
                heap.get_int(root, b);
                heap.get_int(root, a);
                true
            })
            .unwrap();
        assert_eq!(stats.explored, 4);
        // `a` sits at the lower address but is read last, so it is the
        // fastest-varying field.
        assert_eq!(
            *vectors.lock().unwrap(),
            vec![vec![0, 0], vec![1, 0], vec![0, 1], vec![1, 1]]
        );
    }

    fn two_node_space(iso: bool) -> Arc<StateSpace> {
        let mut f = Finitization::new();
        let holder = f.add_class("Holder", &["f", "g"], 1);
        let node = f.add_class("Node", &[], 2);
        let nodes = f.create_obj_set(&[node], true).unwrap();
        f.set(holder, "f", nodes).unwrap();
        f.set(holder, "g", nodes).unwrap();
        f.set_isomorphism_check(node, iso);
        StateSpace::build(f).unwrap()
    }

    #[test]
    fn isomorphism_pruning_collapses_pool_permutations() {
        let space = two_node_space(true);
        let fh = handle(&space, 0, "f");
        let gh = handle(&space, 0, "g");
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let (vectors, _) = record(&mut engine);
        let stats = engine
            .run(|heap| {
                let root = heap.root();
                heap.get_ref(root, fh);
                heap.get_ref(root, gh);
                true
            })
            .unwrap();
        // Node[1] may appear only once Node[0] is in use at a lower address,
        // so (null, Node[1]) and (Node[1], *) are never built.
        assert_eq!(stats.explored, 5);
        assert_eq!(
            *vectors.lock().unwrap(),
            vec![
                vec![0, 0],
                vec![0, 1],
                vec![1, 0],
                vec![1, 1],
                vec![1, 2],
            ]
        );
    }

    #[test]
    fn unchecked_pools_enumerate_every_combination() {
        let space = two_node_space(false);
        let fh = handle(&space, 0, "f");
        let gh = handle(&space, 0, "g");
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let stats = engine
            .run(|heap| {
                let root = heap.root();
                heap.get_ref(root, fh);
                heap.get_ref(root, gh);
                true
            })
            .unwrap();
        assert_eq!(stats.explored, 9);
    }

    #[test]
    fn valid_cap_stops_the_run() {
        let space = int_pair_space(4);
        let a = handle(&space, 0, "a");
        let b = handle(&space, 0, "b");
        let config = EngineConfig {
            max_valid: Some(3),
            ..EngineConfig::default()
        };
        let mut engine = SearchEngine::new(space, config).unwrap();
        let stats = engine
            .run(|heap| {
                let root = heap.root();
                heap.get_int(root, a);
                heap.get_int(root, b);
                true
            })
            .unwrap();
        assert_eq!(stats.valid, 3);
        assert_eq!(stats.explored, 3);
    }

    #[test]
    fn cancellation_finishes_the_current_step() {
        struct CancelAfter {
            flag: Arc<AtomicBool>,
            remaining: u64,
        }
        impl SearchListener for CancelAfter {
            fn on_candidate(&mut self, _step: &Step<'_>) {
                self.remaining -= 1;
                if self.remaining == 0 {
                    self.flag.store(true, Ordering::Relaxed);
                }
            }
        }

        let space = int_pair_space(4);
        let a = handle(&space, 0, "a");
        let b = handle(&space, 0, "b");
        let flag = Arc::new(AtomicBool::new(false));
        let config = EngineConfig {
            cancel: Some(Arc::clone(&flag)),
            ..EngineConfig::default()
        };
        let mut engine = SearchEngine::new(space, config).unwrap();
        engine.add_listener(Box::new(CancelAfter { flag, remaining: 2 }));
        let stats = engine
            .run(|heap| {
                let root = heap.root();
                heap.get_int(root, a);
                heap.get_int(root, b);
                true
            })
            .unwrap();
        assert!(stats.cancelled);
        assert_eq!(stats.explored, 2);
    }

    #[test]
    fn listeners_see_finals_exactly_once() {
        let space = int_pair_space(1);
        let a = handle(&space, 0, "a");
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let (vectors, finals) = record(&mut engine);
        let stats = engine
            .run(|heap| heap.get_int(heap.root(), a) == 0)
            .unwrap();
        assert_eq!(vectors.lock().unwrap().len() as u64, stats.explored);
        assert_eq!(
            *finals.lock().unwrap(),
            Some((stats.explored, stats.valid))
        );
    }

    #[test]
    fn mismatched_start_vector_is_a_config_error() {
        let space = int_pair_space(1);
        let config = EngineConfig {
            start: Some(vec![0]),
            ..EngineConfig::default()
        };
        assert!(matches!(
            SearchEngine::new(space, config),
            Err(ConfigError::VectorLengthMismatch { .. })
        ));
    }

    #[test]
    fn predicate_panic_is_a_fatal_run_error() {
        let space = int_pair_space(1);
        let a = handle(&space, 0, "a");
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let err = engine
            .run(|heap| {
                if heap.get_int(heap.root(), a) == 1 {
                    panic!("inconsistent candidate");
                }
                true
            })
            .unwrap_err();
        match err {
            EngineError::PredicateFailure { candidate, message } => {
                assert_eq!(candidate, 1);
                assert!(message.contains("inconsistent candidate"));
            }
            other => panic!("expected PredicateFailure, got {:?}", other),
        }
    }

    #[test]
    fn empty_address_space_explores_one_candidate() {
        let mut f = Finitization::new();
        f.add_class("Unit", &[], 1);
        let space = StateSpace::build(f).unwrap();
        let mut engine = SearchEngine::new(space, EngineConfig::default()).unwrap();
        let stats = engine.run(|_| true).unwrap();
        assert_eq!(stats.explored, 1);
        assert_eq!(stats.valid, 1);
    }
}
