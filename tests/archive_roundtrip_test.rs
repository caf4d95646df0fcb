//! # Archive Round-Trip Suite
//!
//! Writes real runs through the archive layer and reads them back,
//! checking bit-exact reproduction of vectors and predicate-passed flags
//! for both the full and the delta format, plus the warn-and-continue
//! behavior when the archive sink fails mid-run.

use std::collections::HashSet;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

use boundgen::{
    minimal_bits, ArchiveListener, CandidateHeap, DeltaArchiveReader, DeltaArchiveWriter,
    EngineConfig, Finitization, SearchEngine, SearchListener, StateSpace, Step,
    VectorArchiveReader, VectorArchiveWriter,
};

fn tree_space(bound: usize) -> Arc<StateSpace> {
    let mut f = Finitization::new();
    let tree = f.add_class("BinaryTree", &["root"], 1);
    let node = f.add_class("Node", &["left", "right"], bound);
    let nodes = f.create_obj_set(&[node], true).unwrap();
    f.set(tree, "root", nodes).unwrap();
    f.set(node, "left", nodes).unwrap();
    f.set(node, "right", nodes).unwrap();
    StateSpace::build(f).unwrap()
}

fn is_tree_shape(heap: &CandidateHeap) -> bool {
    let space = heap.space();
    let fin = space.finitization();
    let tree = fin.class_named("BinaryTree").unwrap();
    let node = fin.class_named("Node").unwrap();
    let root = space.field_handle(tree, "root").unwrap();
    let left = space.field_handle(node, "left").unwrap();
    let right = space.field_handle(node, "right").unwrap();

    let mut seen = HashSet::new();
    let mut pending = Vec::new();
    if let Some(n) = heap.get_ref(heap.root(), root) {
        seen.insert(n);
        pending.push(n);
    }
    while let Some(n) = pending.pop() {
        for &field in &[left, right] {
            if let Some(child) = heap.get_ref(n, field) {
                if !seen.insert(child) {
                    return false;
                }
                pending.push(child);
            }
        }
    }
    true
}

struct StepLog(Arc<Mutex<Vec<(Vec<usize>, bool)>>>);

impl SearchListener for StepLog {
    fn on_candidate(&mut self, step: &Step<'_>) {
        self.0
            .lock()
            .unwrap()
            .push((step.vector.to_vec(), step.valid));
    }
}

#[test]
fn archive_listener_round_trips_a_real_run() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("candidates.bgv");

    let space = tree_space(3);
    assert_eq!(minimal_bits(&space), 2);

    let steps = Arc::new(Mutex::new(Vec::new()));
    let mut engine = SearchEngine::new(Arc::clone(&space), EngineConfig::default()).unwrap();
    engine.add_listener(Box::new(StepLog(Arc::clone(&steps))));
    engine.add_listener(Box::new(ArchiveListener::create_at(&path, &space).unwrap()));
    let stats = engine.run(is_tree_shape).unwrap();

    let mut reader = VectorArchiveReader::open(BufReader::new(File::open(&path).unwrap())).unwrap();
    assert_eq!(reader.count(), stats.explored);
    assert_eq!(reader.vector_len(), space.len());
    assert_eq!(reader.bits_per_elem(), 2);

    let steps = steps.lock().unwrap();
    let mut index = 0;
    while let Some(record) = reader.read_next().unwrap() {
        assert_eq!(record, steps[index]);
        index += 1;
    }
    assert_eq!(index, steps.len());
}

#[test]
fn delta_archive_round_trips_a_real_run() {
    let dir = tempfile::tempdir().unwrap();
    let primary_path = dir.path().join("candidates.bgv");
    let companion_path = dir.path().join("candidates.bgd");

    let space = tree_space(3);
    let steps = Arc::new(Mutex::new(Vec::new()));
    let mut engine = SearchEngine::new(Arc::clone(&space), EngineConfig::default()).unwrap();
    engine.add_listener(Box::new(StepLog(Arc::clone(&steps))));
    let stats = engine.run(is_tree_shape).unwrap();
    let steps = steps.lock().unwrap();

    // A ratio that does not divide the run length, so the archive ends on a
    // stretch of delta records.
    let ratio = (3u64..).find(|&r| stats.explored % r != 0).unwrap() as u32;

    let mut writer = DeltaArchiveWriter::create(
        BufWriter::new(File::create(&primary_path).unwrap()),
        BufWriter::new(File::create(&companion_path).unwrap()),
        space.len(),
        minimal_bits(&space),
        ratio,
    )
    .unwrap();
    for (vector, passed) in steps.iter() {
        writer.append(vector, *passed).unwrap();
    }
    assert_eq!(writer.count(), stats.explored);
    writer.finish().unwrap();

    let mut reader = DeltaArchiveReader::open(
        BufReader::new(File::open(&primary_path).unwrap()),
        BufReader::new(File::open(&companion_path).unwrap()),
    )
    .unwrap();
    assert_eq!(reader.count(), stats.explored);

    let mut index = 0;
    while let Some(record) = reader.read_next().unwrap() {
        assert_eq!(record, steps[index], "mismatch at record {}", index);
        index += 1;
    }
    assert_eq!(index, steps.len());
}

/// Sink that starts failing after a byte budget, standing in for a full
/// disk.
struct FailingSink {
    budget: usize,
}

impl Write for FailingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.len() > self.budget {
            return Err(io::Error::new(io::ErrorKind::WriteZero, "sink full"));
        }
        self.budget -= buf.len();
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Seek for FailingSink {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Ok(0)
    }
}

#[test]
fn archive_failure_does_not_abort_the_run() {
    let space = tree_space(3);
    // Enough budget for the header and a few records, then the sink fails.
    let writer =
        VectorArchiveWriter::create(FailingSink { budget: 24 }, space.len(), minimal_bits(&space))
            .unwrap();

    let mut engine = SearchEngine::new(Arc::clone(&space), EngineConfig::default()).unwrap();
    engine.add_listener(Box::new(ArchiveListener::new(writer)));
    let stats = engine.run(is_tree_shape).unwrap();

    // The run completes with full totals despite the dead archive.
    assert_eq!(stats.valid, 9);
}
