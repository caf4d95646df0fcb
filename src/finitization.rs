//! # Finitization: the Finite Domain Model
//!
//! A `Finitization` declares, per field of each participating class, the
//! finite set of legal values — primitive ranges, object-reference sets,
//! array shapes — and allocates fixed-size pools of candidate objects. It is
//! the single source of truth the rest of the crate derives from: the same
//! model always yields the same candidate-vector layout.
//!
//! ## Building a model
//!
//! ```ignore
//! let mut f = Finitization::new();
//! let tree = f.add_class("BinaryTree", &["root"], 1);
//! let node = f.add_class("Node", &["left", "right"], 3);
//! let nodes = f.create_obj_set(&[node], true)?;
//! f.set(tree, "root", nodes)?;
//! f.set(node, "left", nodes)?;
//! f.set(node, "right", nodes)?;
//! f.initialize()?;
//! ```
//!
//! `initialize` resolves every domain into a concrete index space and
//! assigns arena slots to pool objects. It is idempotent; after it succeeds
//! the model is frozen and the address layout deterministic.
//!
//! ## Error model
//!
//! Misconfiguration (unknown field, double binding, unbound field, empty
//! domains, array misuse) surfaces as [`ConfigError`] before any search step
//! runs. Out-of-range indices reached through a correctly built model are
//! internal defects and panic instead.

use std::collections::HashMap;

use crate::domain::{
    ArrayShape, ClassDomain, ClassId, DomainId, FieldDomain, IntRange, ObjId, ObjSet, ObjSetEntry,
};

/// Errors detectable before the first search step.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("class {class} has no field named `{field}`")]
    UnknownField { class: String, field: String },

    #[error("field {class}.{field} is already bound to a domain")]
    FieldAlreadyBound { class: String, field: String },

    #[error("field {class}.{field} has no bound domain")]
    UnboundField { class: String, field: String },

    #[error("class {class} declares field `{field}` more than once")]
    DuplicateField { class: String, field: String },

    #[error("int range {lo}..={hi} is empty")]
    EmptyIntRange { lo: i64, hi: i64 },

    #[error("object set has no entries (no null, and no pool objects)")]
    EmptyObjSet,

    #[error("array length must be a non-negative int range")]
    InvalidArrayLength,

    #[error("array element domain may not itself be an array")]
    NestedArray,

    #[error("finitization declares no classes")]
    NoClasses,

    #[error("root class {class} has an empty object pool")]
    EmptyRootPool { class: String },

    #[error("candidate vector length mismatch: expected {expected}, got {actual}")]
    VectorLengthMismatch { expected: usize, actual: usize },

    #[error("vector position {position} holds {value}, but its domain has only {len} values")]
    VectorValueOutOfRange {
        position: usize,
        value: usize,
        len: usize,
    },
}

/// Per-class metadata: the field capability table and the object pool.
#[derive(Clone, Debug)]
pub(crate) struct ClassInfo {
    pub(crate) name: String,
    pub(crate) fields: Vec<String>,
    pub(crate) field_slots: HashMap<String, usize>,
    pub(crate) domain: ClassDomain,
}

impl ClassInfo {
    pub(crate) fn field_slot(&self, field: &str) -> Option<usize> {
        self.field_slots.get(field).copied()
    }
}

/// The finite domain model bounding one search.
#[derive(Clone, Debug)]
pub struct Finitization {
    classes: Vec<ClassInfo>,
    pool_sizes: Vec<usize>,
    domains: Vec<FieldDomain>,
    bindings: HashMap<(ClassId, usize), DomainId>,
    root: Option<ClassId>,
    object_count: usize,
    initialized: bool,
}

impl Finitization {
    pub fn new() -> Self {
        Finitization {
            classes: Vec::new(),
            pool_sizes: Vec::new(),
            domains: Vec::new(),
            bindings: HashMap::new(),
            root: None,
            object_count: 0,
            initialized: false,
        }
    }

    /// Declares a class with its mutable fields and a fixed pool size.
    ///
    /// Field declaration order is significant: it fixes the address layout.
    /// The first declared class is the root class unless
    /// [`set_root_class`](Self::set_root_class) overrides it.
    pub fn add_class(&mut self, name: &str, fields: &[&str], pool_size: usize) -> ClassId {
        let id = ClassId(self.classes.len());
        let mut field_slots = HashMap::new();
        for (slot, field) in fields.iter().enumerate() {
            // First declaration wins; duplicates are rejected at initialize.
            field_slots.entry(field.to_string()).or_insert(slot);
        }
        self.classes.push(ClassInfo {
            name: name.to_string(),
            fields: fields.iter().map(|f| f.to_string()).collect(),
            field_slots,
            domain: ClassDomain {
                class: id,
                objects: Vec::new(),
                isomorphism_checked: true,
            },
        });
        self.pool_sizes.push(pool_size);
        id
    }

    /// Creates a primitive range domain `lo..=hi`.
    pub fn create_int_range(&mut self, lo: i64, hi: i64) -> Result<DomainId, ConfigError> {
        if lo > hi {
            return Err(ConfigError::EmptyIntRange { lo, hi });
        }
        Ok(self.push_domain(FieldDomain::IntRange(IntRange { lo, hi })))
    }

    /// Creates an object-reference set over the given class pools, in order,
    /// optionally prefixed with null.
    pub fn create_obj_set(
        &mut self,
        classes: &[ClassId],
        nullable: bool,
    ) -> Result<DomainId, ConfigError> {
        if classes.is_empty() && !nullable {
            return Err(ConfigError::EmptyObjSet);
        }
        Ok(self.push_domain(FieldDomain::ObjSet(ObjSet {
            nullable,
            classes: classes.to_vec(),
            entries: Vec::new(),
        })))
    }

    /// Creates an array-shape domain crossing a length domain with a
    /// component domain. Fields bound to it are backed by fixed-capacity
    /// array objects whose length and element slots become addresses of
    /// their own.
    pub fn create_array_set(
        &mut self,
        length: DomainId,
        elem: DomainId,
    ) -> Result<DomainId, ConfigError> {
        let capacity = match &self.domains[length.0] {
            FieldDomain::IntRange(r) if r.lo >= 0 => r.hi as usize,
            _ => return Err(ConfigError::InvalidArrayLength),
        };
        if matches!(&self.domains[elem.0], FieldDomain::Array(_)) {
            return Err(ConfigError::NestedArray);
        }
        Ok(self.push_domain(FieldDomain::Array(ArrayShape {
            length,
            elem,
            capacity,
        })))
    }

    /// Binds a field to a domain. Exactly one binding per field; unknown
    /// fields and double bindings are configuration errors.
    pub fn set(&mut self, class: ClassId, field: &str, domain: DomainId) -> Result<(), ConfigError> {
        let info = &self.classes[class.0];
        let slot = info
            .field_slot(field)
            .ok_or_else(|| ConfigError::UnknownField {
                class: info.name.clone(),
                field: field.to_string(),
            })?;
        if self.bindings.contains_key(&(class, slot)) {
            return Err(ConfigError::FieldAlreadyBound {
                class: self.classes[class.0].name.clone(),
                field: field.to_string(),
            });
        }
        self.bindings.insert((class, slot), domain);
        Ok(())
    }

    /// Includes or excludes a class pool from isomorphism pruning.
    /// Pools are included by default.
    pub fn set_isomorphism_check(&mut self, class: ClassId, checked: bool) {
        self.classes[class.0].domain.isomorphism_checked = checked;
    }

    /// Overrides the root class (defaults to the first declared class).
    pub fn set_root_class(&mut self, class: ClassId) {
        self.root = Some(class);
    }

    /// Resolves every domain into a concrete index space and assigns arena
    /// slots to pool objects. Idempotent; the model is frozen afterwards.
    pub fn initialize(&mut self) -> Result<(), ConfigError> {
        if self.initialized {
            return Ok(());
        }
        if self.classes.is_empty() {
            return Err(ConfigError::NoClasses);
        }
        for info in &self.classes {
            let mut seen = HashMap::new();
            for field in &info.fields {
                if seen.insert(field.clone(), ()).is_some() {
                    return Err(ConfigError::DuplicateField {
                        class: info.name.clone(),
                        field: field.clone(),
                    });
                }
            }
        }
        for (id, info) in self.classes.iter().enumerate() {
            for (slot, field) in info.fields.iter().enumerate() {
                if !self.bindings.contains_key(&(ClassId(id), slot)) {
                    return Err(ConfigError::UnboundField {
                        class: info.name.clone(),
                        field: field.clone(),
                    });
                }
            }
        }

        // Assign arena slots: classes in declaration order, pool objects in
        // index order. This ordering is what makes the layout deterministic.
        let mut next = 0;
        for (id, info) in self.classes.iter_mut().enumerate() {
            let pool = self.pool_sizes[id];
            info.domain.objects = (next..next + pool).map(ObjId).collect();
            next += pool;
        }
        self.object_count = next;

        // Resolve object sets against the now-allocated pools.
        let classes = &self.classes;
        for domain in &mut self.domains {
            if let FieldDomain::ObjSet(set) = domain {
                let mut entries = Vec::new();
                if set.nullable {
                    entries.push(ObjSetEntry::Null);
                }
                for &class in &set.classes {
                    let pool = &classes[class.0].domain;
                    for (pool_index, &obj) in pool.objects.iter().enumerate() {
                        entries.push(ObjSetEntry::Obj {
                            class,
                            pool_index,
                            obj,
                        });
                    }
                }
                if entries.is_empty() {
                    return Err(ConfigError::EmptyObjSet);
                }
                set.entries = entries;
            }
        }

        self.initialized = true;
        log::debug!(
            "finitization initialized: {} classes, {} pool objects, {} domains",
            self.classes.len(),
            self.object_count,
            self.domains.len()
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// The root class whose first pool object anchors the candidate graph.
    pub fn root_class(&self) -> Option<ClassId> {
        self.root.or_else(|| {
            if self.classes.is_empty() {
                None
            } else {
                Some(ClassId(0))
            }
        })
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class_name(&self, class: ClassId) -> &str {
        &self.classes[class.0].name
    }

    /// Looks a class up by its declared name.
    pub fn class_named(&self, name: &str) -> Option<ClassId> {
        self.classes
            .iter()
            .position(|info| info.name == name)
            .map(ClassId)
    }

    /// The object pool backing one class.
    pub fn class_domain(&self, class: ClassId) -> &ClassDomain {
        &self.classes[class.0].domain
    }

    pub fn domain(&self, id: DomainId) -> &FieldDomain {
        &self.domains[id.0]
    }

    /// Total pool objects across all classes (excludes array backing objects,
    /// which the state space allocates on top).
    pub fn object_count(&self) -> usize {
        self.object_count
    }

    pub(crate) fn class_info(&self, class: ClassId) -> &ClassInfo {
        &self.classes[class.0]
    }

    pub(crate) fn binding(&self, class: ClassId, slot: usize) -> DomainId {
        self.bindings[&(class, slot)]
    }

    fn push_domain(&mut self, domain: FieldDomain) -> DomainId {
        let id = DomainId(self.domains.len());
        self.domains.push(domain);
        id
    }
}

impl Default for Finitization {
    fn default() -> Self {
        Finitization::new()
    }
}
