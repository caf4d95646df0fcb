//! # Finite Value Domains
//!
//! Every mutable field slot in a candidate object graph draws its value from
//! a finite, densely indexed domain. This module defines those domains and
//! the identifiers that tie the rest of the crate together:
//!
//! - [`ClassId`], [`DomainId`], [`ObjId`]: dense handles into the
//!   finitization's class table, domain table and the candidate heap's
//!   object arena.
//! - [`Value`]: the resolved content of one field slot.
//! - [`ClassDomain`]: a fixed-size, index-addressable pool of objects of one
//!   class, allocated once and reused for the whole run.
//! - [`FieldDomain`]: the legal value set for one field slot, exposed as a
//!   dense `0..len` index space regardless of representation.
//!
//! Domains are descriptions, not storage: they map indices to values. The
//! candidate heap owns the storage and the search engine owns the indices.

use std::fmt;

/// Handle for a class declared on a [`Finitization`](crate::Finitization).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ClassId(pub(crate) usize);

impl ClassId {
    /// Position of this class in declaration order.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle for a field domain created on a [`Finitization`](crate::Finitization).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DomainId(pub(crate) usize);

/// Handle for one object slot in the candidate heap's arena.
///
/// Candidate graphs are genuinely cyclic and aliased, so fields hold
/// `ObjId`s rather than native references; identity comparison is index
/// comparison. The handle stays valid (and keeps denoting the same pool
/// slot) for the whole run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ObjId(pub(crate) usize);

impl ObjId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The resolved content of one field slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Value {
    /// Absent object reference.
    Null,
    /// Primitive integer (also backs array lengths).
    Int(i64),
    /// Reference to an arena object.
    Obj(ObjId),
}

/// Fixed-size, ordered pool of candidate objects of one class.
///
/// Objects are allocated once when the finitization is initialized and
/// mutated in place thereafter; the pool ordering is what isomorphism
/// pruning canonicalizes against.
#[derive(Clone, Debug)]
pub struct ClassDomain {
    pub(crate) class: ClassId,
    pub(crate) objects: Vec<ObjId>,
    pub(crate) isomorphism_checked: bool,
}

impl ClassDomain {
    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Pool objects in index order.
    pub fn objects(&self) -> &[ObjId] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Whether candidates differing only by a permutation of this pool are
    /// collapsed into one representative during search.
    pub fn isomorphism_checked(&self) -> bool {
        self.isomorphism_checked
    }
}

/// Contiguous primitive range `lo..=hi`; index `i` denotes `lo + i`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IntRange {
    pub lo: i64,
    pub hi: i64,
}

impl IntRange {
    pub fn len(&self) -> usize {
        (self.hi - self.lo + 1) as usize
    }

    pub fn value_at(&self, index: usize) -> i64 {
        debug_assert!(index < self.len(), "int range index out of bounds");
        self.lo + index as i64
    }
}

/// One entry of an object-reference set, in dense index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObjSetEntry {
    Null,
    Obj {
        class: ClassId,
        /// Position within the owning class pool.
        pool_index: usize,
        obj: ObjId,
    },
}

/// Ordered concatenation of class pools, optionally null-prefixed.
///
/// The dense index space is `[null?] ++ pool(classes[0]) ++ pool(classes[1])
/// ++ ..`; `entries` is resolved when the finitization is initialized and is
/// empty before that.
#[derive(Clone, Debug)]
pub struct ObjSet {
    pub(crate) nullable: bool,
    pub(crate) classes: Vec<ClassId>,
    pub(crate) entries: Vec<ObjSetEntry>,
}

impl ObjSet {
    pub fn nullable(&self) -> bool {
        self.nullable
    }

    /// Classes contributing pools, in concatenation order.
    pub fn classes(&self) -> &[ClassId] {
        &self.classes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entry_at(&self, index: usize) -> ObjSetEntry {
        self.entries[index]
    }
}

/// Array-shape domain: a length domain crossed with a component domain.
///
/// A field bound to an array shape is backed by a fixed-capacity array
/// object whose length and element slots are themselves addressable fields;
/// the field's reference to its backing object never changes. The shape
/// itself is therefore never the domain of an address — the length address
/// binds `length` and each element address binds `elem`.
#[derive(Clone, Copy, Debug)]
pub struct ArrayShape {
    pub(crate) length: DomainId,
    pub(crate) elem: DomainId,
    /// Fixed element capacity, the maximum of the length domain.
    pub(crate) capacity: usize,
}

impl ArrayShape {
    pub fn length_domain(&self) -> DomainId {
        self.length
    }

    pub fn elem_domain(&self) -> DomainId {
        self.elem
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// The legal value set for one field slot.
#[derive(Clone, Debug)]
pub enum FieldDomain {
    IntRange(IntRange),
    ObjSet(ObjSet),
    Array(ArrayShape),
}

impl FieldDomain {
    /// Number of values in the dense index space.
    ///
    /// Only the search core calls this, on domains bound to an address;
    /// array shapes never are (they expand into length and element
    /// addresses), so the arm is genuinely unreachable.
    pub(crate) fn len(&self) -> usize {
        match self {
            FieldDomain::IntRange(r) => r.len(),
            FieldDomain::ObjSet(s) => s.len(),
            FieldDomain::Array(_) => unreachable!("array shape has no direct index space"),
        }
    }

    /// Largest valid index, `len() - 1`.
    pub(crate) fn max_index(&self) -> usize {
        self.len() - 1
    }

    /// Resolves a dense index to the value it denotes.
    pub(crate) fn value_at(&self, index: usize) -> Value {
        match self {
            FieldDomain::IntRange(r) => Value::Int(r.value_at(index)),
            FieldDomain::ObjSet(s) => match s.entry_at(index) {
                ObjSetEntry::Null => Value::Null,
                ObjSetEntry::Obj { obj, .. } => Value::Obj(obj),
            },
            FieldDomain::Array(_) => unreachable!("array shape has no direct index space"),
        }
    }

    pub fn as_int_range(&self) -> Option<&IntRange> {
        match self {
            FieldDomain::IntRange(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_obj_set(&self) -> Option<&ObjSet> {
        match self {
            FieldDomain::ObjSet(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayShape> {
        match self {
            FieldDomain::Array(a) => Some(a),
            _ => None,
        }
    }
}
