//! # boundgen
//!
//! Bounded-exhaustive generation of structurally valid test inputs.
//!
//! Given a finite domain model (a [`Finitization`]) and an opaque boolean
//! consistency predicate over an object graph, the engine enumerates every
//! structurally distinct candidate within the bound, using the record of
//! which fields the predicate actually read to prune huge symmetric regions
//! of the space without materializing them.
//!
//! The pipeline, leaves first:
//!
//! 1. [`Finitization`] bounds the space: per-field value domains and
//!    fixed-size object pools.
//! 2. [`StateSpace`] flattens the model into the candidate-vector address
//!    scheme with O(1) resolution in both directions.
//! 3. [`CandidateHeap`] holds the one live object graph, mutated in place by
//!    the materializer and read through access-recording accessors.
//! 4. [`SearchEngine`] drives candidate vectors by backtracking over each
//!    evaluation's access sequence, skipping don't-care addresses and
//!    collapsing isomorphic candidates, fanning each explored candidate out
//!    to [`SearchListener`]s.
//! 5. The [`archive`] module persists explored vectors bit-exactly, in a
//!    full and a delta format.
//!
//! ```ignore
//! struct BinaryTree;
//!
//! impl Finitized for BinaryTree {
//!     fn finitize(bound: usize) -> Finitization { /* declare classes */ }
//!     fn rep_ok(heap: &CandidateHeap) -> bool { /* traverse the graph */ }
//! }
//!
//! let stats = explore::<BinaryTree>(4, EngineConfig::default())?;
//! ```

pub mod archive;
pub mod candidate;
pub mod domain;
pub mod engine;
pub mod finitization;
pub mod space;

pub use archive::{
    minimal_bits, ArchiveError, ArchiveListener, DeltaArchiveReader, DeltaArchiveWriter,
    VectorArchiveReader, VectorArchiveWriter,
};
pub use candidate::CandidateHeap;
pub use domain::{ClassDomain, ClassId, DomainId, FieldDomain, ObjId, ObjSetEntry, Value};
pub use engine::{
    explore, EngineConfig, EngineError, Finitized, RunStats, SearchEngine, SearchListener, Step,
};
pub use finitization::{ConfigError, Finitization};
pub use space::{Address, FieldHandle, StateSpace};
