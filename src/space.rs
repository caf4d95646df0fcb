//! # StateSpace: the Candidate-Vector Address Scheme
//!
//! The state space flattens an initialized [`Finitization`] into one stably
//! ordered list of `(object, field, domain)` triples — the addresses of the
//! candidate vector. Address `i` names exactly one mutable field slot, and
//! `vector[i]` indexes into the field domain bound at that address.
//!
//! Emission order is fixed: classes in declaration order, pool objects in
//! index order, fields in declaration order. A field bound to an array shape
//! contributes no address of its own (its reference to the backing array
//! object never changes); instead it expands into the backing object's
//! length address followed by one address per element slot.
//!
//! Resolution is O(1) in both directions: `address(i)` by dense indexing,
//! `index_of(obj, slot)` through a prebuilt map. Field names resolve once
//! into [`FieldHandle`]s via the per-class capability tables, so predicates
//! pay no string hashing on the hot path. The ordering is immutable after
//! build — vector comparison and partitioned search depend on it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::{ClassId, DomainId, FieldDomain, ObjId};
use crate::finitization::{ConfigError, Finitization};

/// One position of the candidate vector: a mutable field slot, the object
/// that owns it, and the domain its values are drawn from.
#[derive(Clone, Copy, Debug)]
pub struct Address {
    pub obj: ObjId,
    pub slot: usize,
    pub domain: DomainId,
}

/// Pre-resolved `(class, field)` pair for O(1) heap access.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FieldHandle {
    pub(crate) class: ClassId,
    pub(crate) slot: usize,
}

/// What one arena slot holds: a class pool object, or the backing array
/// object of some array-bound field.
#[derive(Clone, Copy, Debug)]
pub(crate) enum ObjectKind {
    Class(ClassId),
    Array {
        owner: ObjId,
        owner_slot: usize,
        capacity: usize,
    },
}

/// The flattened, immutable addressing scheme for one run.
#[derive(Debug)]
pub struct StateSpace {
    fin: Finitization,
    addresses: Vec<Address>,
    index_of: HashMap<(ObjId, usize), usize>,
    by_object: Vec<Vec<usize>>,
    object_kinds: Vec<ObjectKind>,
    object_names: Vec<String>,
    root: ObjId,
    max_domain_index: usize,
}

impl StateSpace {
    /// Flattens the model into the address list, allocating backing array
    /// objects on top of the class pools. Initializes the finitization if
    /// the caller has not.
    pub fn build(mut fin: Finitization) -> Result<Arc<StateSpace>, ConfigError> {
        fin.initialize()?;
        let root_class = fin.root_class().ok_or(ConfigError::NoClasses)?;
        let root_pool = fin.class_domain(root_class);
        if root_pool.is_empty() {
            return Err(ConfigError::EmptyRootPool {
                class: fin.class_name(root_class).to_string(),
            });
        }
        let root = root_pool.objects()[0];

        let mut object_kinds = Vec::new();
        let mut object_names = Vec::new();
        for c in 0..fin.class_count() {
            let class = ClassId(c);
            for pool_index in 0..fin.class_domain(class).len() {
                object_kinds.push(ObjectKind::Class(class));
                object_names.push(format!("{}[{}]", fin.class_name(class), pool_index));
            }
        }

        let mut addresses = Vec::new();
        for c in 0..fin.class_count() {
            let class = ClassId(c);
            for &obj in fin.class_domain(class).objects() {
                let field_count = fin.class_info(class).fields.len();
                for slot in 0..field_count {
                    let domain = fin.binding(class, slot);
                    match fin.domain(domain) {
                        FieldDomain::Array(shape) => {
                            let backing = ObjId(object_kinds.len());
                            object_kinds.push(ObjectKind::Array {
                                owner: obj,
                                owner_slot: slot,
                                capacity: shape.capacity(),
                            });
                            object_names.push(format!(
                                "{}.{}",
                                object_names[obj.0],
                                fin.class_info(class).fields[slot]
                            ));
                            addresses.push(Address {
                                obj: backing,
                                slot: 0,
                                domain: shape.length_domain(),
                            });
                            for e in 0..shape.capacity() {
                                addresses.push(Address {
                                    obj: backing,
                                    slot: 1 + e,
                                    domain: shape.elem_domain(),
                                });
                            }
                        }
                        _ => addresses.push(Address { obj, slot, domain }),
                    }
                }
            }
        }

        let mut index_of = HashMap::with_capacity(addresses.len());
        let mut by_object = vec![Vec::new(); object_kinds.len()];
        let mut max_domain_index = 0;
        for (i, addr) in addresses.iter().enumerate() {
            index_of.insert((addr.obj, addr.slot), i);
            by_object[addr.obj.0].push(i);
            max_domain_index = max_domain_index.max(fin.domain(addr.domain).max_index());
        }

        log::debug!(
            "state space built: {} addresses over {} objects (root {})",
            addresses.len(),
            object_kinds.len(),
            object_names[root.0]
        );

        Ok(Arc::new(StateSpace {
            fin,
            addresses,
            index_of,
            by_object,
            object_kinds,
            object_names,
            root,
            max_domain_index,
        }))
    }

    /// Number of addresses, i.e. the candidate-vector length.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn address(&self, index: usize) -> &Address {
        &self.addresses[index]
    }

    pub fn addresses(&self) -> &[Address] {
        &self.addresses
    }

    /// Reverse resolution: which vector position does this field slot hold?
    /// `None` for slots without an address (array-bound field references).
    pub fn index_of(&self, obj: ObjId, slot: usize) -> Option<usize> {
        self.index_of.get(&(obj, slot)).copied()
    }

    /// Addresses owned by one object, in address order.
    pub fn addresses_of(&self, obj: ObjId) -> &[usize] {
        &self.by_object[obj.0]
    }

    pub fn domain_of(&self, index: usize) -> &FieldDomain {
        self.fin.domain(self.addresses[index].domain)
    }

    /// Resolves a field name into a handle usable for O(1) heap access.
    pub fn field_handle(&self, class: ClassId, field: &str) -> Result<FieldHandle, ConfigError> {
        let info = self.fin.class_info(class);
        let slot = info
            .field_slot(field)
            .ok_or_else(|| ConfigError::UnknownField {
                class: info.name.clone(),
                field: field.to_string(),
            })?;
        Ok(FieldHandle { class, slot })
    }

    /// First pool object of the root class; the anchor the predicate starts
    /// its traversal from.
    pub fn root_object(&self) -> ObjId {
        self.root
    }

    pub fn finitization(&self) -> &Finitization {
        &self.fin
    }

    /// Largest domain index across all addresses; determines the minimal
    /// bits-per-element width of archived vectors.
    pub fn max_domain_index(&self) -> usize {
        self.max_domain_index
    }

    /// Checks a caller-supplied vector against the layout: exact length and
    /// every position within its domain.
    pub fn validate_vector(&self, vector: &[usize]) -> Result<(), ConfigError> {
        if vector.len() != self.addresses.len() {
            return Err(ConfigError::VectorLengthMismatch {
                expected: self.addresses.len(),
                actual: vector.len(),
            });
        }
        for (position, (&value, addr)) in vector.iter().zip(&self.addresses).enumerate() {
            let len = self.fin.domain(addr.domain).len();
            if value >= len {
                return Err(ConfigError::VectorValueOutOfRange {
                    position,
                    value,
                    len,
                });
            }
        }
        Ok(())
    }

    /// Human-readable address name, e.g. `Node[1].left` or `Seq[0].elems[2]`.
    pub fn describe_address(&self, index: usize) -> String {
        let addr = &self.addresses[index];
        match self.object_kinds[addr.obj.0] {
            ObjectKind::Class(class) => format!(
                "{}.{}",
                self.object_names[addr.obj.0],
                self.fin.class_info(class).fields[addr.slot]
            ),
            ObjectKind::Array { .. } => {
                if addr.slot == 0 {
                    format!("{}.length", self.object_names[addr.obj.0])
                } else {
                    format!("{}[{}]", self.object_names[addr.obj.0], addr.slot - 1)
                }
            }
        }
    }

    /// The class of a pool object; `None` for backing array objects.
    pub fn class_of(&self, obj: ObjId) -> Option<ClassId> {
        match self.object_kinds[obj.0] {
            ObjectKind::Class(class) => Some(class),
            ObjectKind::Array { .. } => None,
        }
    }

    pub(crate) fn object_count(&self) -> usize {
        self.object_kinds.len()
    }

    pub(crate) fn object_kind(&self, obj: ObjId) -> ObjectKind {
        self.object_kinds[obj.0]
    }

    pub(crate) fn field_count(&self, obj: ObjId) -> usize {
        match self.object_kinds[obj.0] {
            ObjectKind::Class(class) => self.fin.class_info(class).fields.len(),
            ObjectKind::Array { capacity, .. } => 1 + capacity,
        }
    }

    /// `(owner, owner_slot, backing)` triples for every array-bound field.
    pub(crate) fn array_bindings(&self) -> Vec<(ObjId, usize, ObjId)> {
        self.object_kinds
            .iter()
            .enumerate()
            .filter_map(|(i, kind)| match *kind {
                ObjectKind::Array {
                    owner, owner_slot, ..
                } => Some((owner, owner_slot, ObjId(i))),
                ObjectKind::Class(_) => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_space() -> Arc<StateSpace> {
        let mut f = Finitization::new();
        let tree = f.add_class("BinaryTree", &["root"], 1);
        let node = f.add_class("Node", &["left", "right"], 2);
        let nodes = f.create_obj_set(&[node], true).unwrap();
        f.set(tree, "root", nodes).unwrap();
        f.set(node, "left", nodes).unwrap();
        f.set(node, "right", nodes).unwrap();
        StateSpace::build(f).unwrap()
    }

    #[test]
    fn address_order_follows_declaration_order() {
        let space = tree_space();
        assert_eq!(space.len(), 5);
        assert_eq!(space.describe_address(0), "BinaryTree[0].root");
        assert_eq!(space.describe_address(1), "Node[0].left");
        assert_eq!(space.describe_address(2), "Node[0].right");
        assert_eq!(space.describe_address(3), "Node[1].left");
        assert_eq!(space.describe_address(4), "Node[1].right");
    }

    #[test]
    fn index_resolution_is_a_bijection() {
        let space = tree_space();
        for i in 0..space.len() {
            let addr = *space.address(i);
            assert_eq!(space.index_of(addr.obj, addr.slot), Some(i));
        }
    }

    #[test]
    fn addresses_group_by_owning_object() {
        let space = tree_space();
        let node0 = ObjId(1);
        assert_eq!(space.addresses_of(node0), &[1, 2]);
    }

    #[test]
    fn array_fields_expand_into_length_and_elements() {
        let mut f = Finitization::new();
        let seq = f.add_class("Seq", &["elems"], 1);
        let len = f.create_int_range(0, 3).unwrap();
        let elem = f.create_int_range(0, 1).unwrap();
        let arr = f.create_array_set(len, elem).unwrap();
        f.set(seq, "elems", arr).unwrap();
        let space = StateSpace::build(f).unwrap();

        // One length address plus capacity element addresses.
        assert_eq!(space.len(), 4);
        assert_eq!(space.describe_address(0), "Seq[0].elems.length");
        assert_eq!(space.describe_address(1), "Seq[0].elems[0]");
        assert_eq!(space.describe_address(3), "Seq[0].elems[2]");
        // The owning field slot itself has no address.
        assert_eq!(space.index_of(ObjId(0), 0), None);
    }

    #[test]
    fn vector_validation_checks_length_and_range() {
        let space = tree_space();
        assert!(matches!(
            space.validate_vector(&[0, 0]),
            Err(ConfigError::VectorLengthMismatch { expected: 5, actual: 2 })
        ));
        assert!(matches!(
            space.validate_vector(&[0, 0, 9, 0, 0]),
            Err(ConfigError::VectorValueOutOfRange { position: 2, .. })
        ));
        assert!(space.validate_vector(&[0, 1, 2, 0, 0]).is_ok());
    }

    #[test]
    fn empty_root_pool_is_rejected() {
        let mut f = Finitization::new();
        let c = f.add_class("Empty", &[], 0);
        let _ = c;
        assert!(matches!(
            StateSpace::build(f),
            Err(ConfigError::EmptyRootPool { .. })
        ));
    }
}
