//! # CandidateHeap: the One Live Object Graph
//!
//! The heap is an arena of pre-allocated object slots — one per pool object,
//! plus one per backing array object — holding the single candidate graph
//! the whole run mutates in place. No object is ever allocated after
//! construction; identity (the [`ObjId`]) persists while field values churn.
//!
//! Two concerns live here:
//!
//! - **Recording accessors**: `get_ref`, `get_int`, `array_len` and friends
//!   are the access-tracking capability the search engine relies on. Each
//!   read records its address into the per-evaluation access log (first
//!   touch only, in touch order). An address absent from the log did not
//!   influence the predicate's result.
//! - **The materializer**: [`materialize`](CandidateHeap::materialize)
//!   applies a candidate vector to the graph, mutating exactly the changed
//!   addresses. Cost is proportional to the change set, not graph size,
//!   which is what keeps per-step mutation cheap inside the search loop.
//!
//! Using a handle of the wrong class, reading a reference as an int, or
//! indexing past an array's capacity is a predicate defect: the accessor
//! panics and the engine surfaces it as a fatal run error.

use std::cell::RefCell;
use std::sync::Arc;

use crate::domain::{ObjId, Value};
use crate::space::{FieldHandle, ObjectKind, StateSpace};

/// Per-evaluation record of which addresses the predicate read.
#[derive(Debug)]
struct AccessLog {
    touched: Vec<bool>,
    order: Vec<usize>,
}

impl AccessLog {
    fn new(len: usize) -> Self {
        AccessLog {
            touched: vec![false; len],
            order: Vec::new(),
        }
    }

    fn record(&mut self, addr: usize) {
        if !self.touched[addr] {
            self.touched[addr] = true;
            self.order.push(addr);
        }
    }

    fn clear(&mut self) {
        for &addr in &self.order {
            self.touched[addr] = false;
        }
        self.order.clear();
    }
}

/// The arena holding the one live candidate graph.
#[derive(Debug)]
pub struct CandidateHeap {
    space: Arc<StateSpace>,
    objects: Vec<Vec<Value>>,
    log: RefCell<AccessLog>,
}

impl CandidateHeap {
    /// Allocates every object slot once. Addressable slots start at their
    /// domain minimum; array-bound fields permanently reference their
    /// backing objects.
    pub fn new(space: Arc<StateSpace>) -> CandidateHeap {
        let mut objects: Vec<Vec<Value>> = (0..space.object_count())
            .map(|o| vec![Value::Null; space.field_count(ObjId(o))])
            .collect();
        for (owner, slot, backing) in space.array_bindings() {
            objects[owner.0][slot] = Value::Obj(backing);
        }
        for i in 0..space.len() {
            let addr = *space.address(i);
            objects[addr.obj.0][addr.slot] = space.domain_of(i).value_at(0);
        }
        let log = RefCell::new(AccessLog::new(space.len()));
        CandidateHeap {
            space,
            objects,
            log,
        }
    }

    pub fn space(&self) -> &Arc<StateSpace> {
        &self.space
    }

    /// The root object the predicate starts its traversal from. Not a field
    /// read, so nothing is recorded.
    pub fn root(&self) -> ObjId {
        self.space.root_object()
    }

    /// Reads an object-reference field, recording the access.
    pub fn get_ref(&self, obj: ObjId, field: FieldHandle) -> Option<ObjId> {
        self.check_class(obj, field);
        self.record(obj, field.slot);
        match self.objects[obj.0][field.slot] {
            Value::Null => None,
            Value::Obj(o) => Some(o),
            Value::Int(_) => panic!(
                "predicate read {} as a reference, but it holds an int",
                self.slot_name(obj, field.slot)
            ),
        }
    }

    /// Reads a primitive field, recording the access.
    pub fn get_int(&self, obj: ObjId, field: FieldHandle) -> i64 {
        self.check_class(obj, field);
        self.record(obj, field.slot);
        match self.objects[obj.0][field.slot] {
            Value::Int(n) => n,
            _ => panic!(
                "predicate read {} as an int, but it holds a reference",
                self.slot_name(obj, field.slot)
            ),
        }
    }

    /// Reads the current length of an array-bound field, recording the
    /// length address.
    pub fn array_len(&self, obj: ObjId, field: FieldHandle) -> usize {
        let backing = self.backing_array(obj, field);
        self.record(backing, 0);
        match self.objects[backing.0][0] {
            Value::Int(n) => n as usize,
            _ => unreachable!("array length slot holds a non-int"),
        }
    }

    /// Reads one primitive element of an array-bound field.
    pub fn array_get_int(&self, obj: ObjId, field: FieldHandle, index: usize) -> i64 {
        let slot = self.element_slot(obj, field, index);
        let backing = self.backing_array(obj, field);
        self.record(backing, slot);
        match self.objects[backing.0][slot] {
            Value::Int(n) => n,
            _ => panic!(
                "predicate read {}[{}] as an int, but it holds a reference",
                self.slot_name(obj, field.slot),
                index
            ),
        }
    }

    /// Reads one reference element of an array-bound field.
    pub fn array_get_ref(&self, obj: ObjId, field: FieldHandle, index: usize) -> Option<ObjId> {
        let slot = self.element_slot(obj, field, index);
        let backing = self.backing_array(obj, field);
        self.record(backing, slot);
        match self.objects[backing.0][slot] {
            Value::Null => None,
            Value::Obj(o) => Some(o),
            Value::Int(_) => panic!(
                "predicate read {}[{}] as a reference, but it holds an int",
                self.slot_name(obj, field.slot),
                index
            ),
        }
    }

    /// Forgets the previous evaluation's access record.
    pub fn clear_access_log(&self) {
        self.log.borrow_mut().clear();
    }

    /// Addresses read since the last clear, in first-touch order.
    pub fn accessed(&self) -> Vec<usize> {
        self.log.borrow().order.clone()
    }

    pub fn was_accessed(&self, addr: usize) -> bool {
        self.log.borrow().touched[addr]
    }

    /// Applies the candidate vector to the graph, mutating exactly the
    /// changed addresses in place. The engine passes every address on the
    /// first step and the delta thereafter.
    pub fn materialize(&mut self, vector: &[usize], changed: &[usize]) {
        debug_assert_eq!(vector.len(), self.space.len());
        for &i in changed {
            let addr = *self.space.address(i);
            let value = self.space.domain_of(i).value_at(vector[i]);
            self.objects[addr.obj.0][addr.slot] = value;
        }
    }

    fn record(&self, obj: ObjId, slot: usize) {
        if let Some(addr) = self.space.index_of(obj, slot) {
            self.log.borrow_mut().record(addr);
        }
    }

    fn check_class(&self, obj: ObjId, field: FieldHandle) {
        match self.space.object_kind(obj) {
            ObjectKind::Class(class) if class == field.class => {}
            _ => panic!(
                "field handle for class {} used on object {}",
                self.space.finitization().class_name(field.class),
                obj
            ),
        }
    }

    fn backing_array(&self, obj: ObjId, field: FieldHandle) -> ObjId {
        self.check_class(obj, field);
        match self.objects[obj.0][field.slot] {
            Value::Obj(backing)
                if matches!(self.space.object_kind(backing), ObjectKind::Array { .. }) =>
            {
                backing
            }
            _ => panic!(
                "{} is not bound to an array shape",
                self.slot_name(obj, field.slot)
            ),
        }
    }

    fn element_slot(&self, obj: ObjId, field: FieldHandle, index: usize) -> usize {
        let backing = self.backing_array(obj, field);
        match self.space.object_kind(backing) {
            ObjectKind::Array { capacity, .. } => {
                if index >= capacity {
                    panic!(
                        "predicate indexed {}[{}] past capacity {}",
                        self.slot_name(obj, field.slot),
                        index,
                        capacity
                    );
                }
                1 + index
            }
            ObjectKind::Class(_) => unreachable!("backing object is not an array"),
        }
    }

    fn slot_name(&self, obj: ObjId, slot: usize) -> String {
        match self.space.index_of(obj, slot) {
            Some(addr) => self.space.describe_address(addr),
            None => format!("{}.slot{}", obj, slot),
        }
    }
}
