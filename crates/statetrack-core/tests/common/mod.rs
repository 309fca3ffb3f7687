#![allow(dead_code)]

use parking_lot::RwLock;
use statetrack_core::{
    Change, MemberInfo, MemberKind, Notifier, ObjRef, Object, ShapeKind, TypeShape, Value,
    ValueType,
};
use std::sync::{Arc, Weak};

const fn property(declaring_type: &'static str, name: &'static str) -> MemberInfo {
    MemberInfo {
        name,
        declaring_type,
        kind: MemberKind::Property,
        value_type: ValueType::Scalar,
    }
}

const fn reference(
    declaring_type: &'static str,
    name: &'static str,
    shape: fn() -> &'static TypeShape,
) -> MemberInfo {
    MemberInfo {
        name,
        declaring_type,
        kind: MemberKind::Property,
        value_type: ValueType::Object(shape),
    }
}

const fn object_shape(name: &'static str, members: &'static [MemberInfo]) -> TypeShape {
    TypeShape {
        name,
        kind: ShapeKind::Object,
        immutable: false,
        notifies: true,
        members,
        items: ValueType::Dynamic,
    }
}

static SIMPLE_MEMBERS: [MemberInfo; 4] = [
    property("WithSimpleProperties", "IntValue"),
    property("WithSimpleProperties", "NullableIntValue"),
    property("WithSimpleProperties", "StringValue"),
    MemberInfo {
        name: "string_field",
        declaring_type: "WithSimpleProperties",
        kind: MemberKind::Field,
        value_type: ValueType::Scalar,
    },
];
pub static WITH_SIMPLE_PROPERTIES: TypeShape = object_shape("WithSimpleProperties", &SIMPLE_MEMBERS);

static COMPLEX_TYPE_MEMBERS: [MemberInfo; 2] = [
    property("ComplexType", "Name"),
    property("ComplexType", "Value"),
];
pub static COMPLEX_TYPE: TypeShape = object_shape("ComplexType", &COMPLEX_TYPE_MEMBERS);

pub fn complex_type() -> &'static TypeShape {
    &COMPLEX_TYPE
}

static WITH_COMPLEX_MEMBERS: [MemberInfo; 3] = [
    property("WithComplexProperty", "Name"),
    property("WithComplexProperty", "Value"),
    reference("WithComplexProperty", "ComplexType", complex_type),
];
pub static WITH_COMPLEX_PROPERTY: TypeShape = object_shape("WithComplexProperty", &WITH_COMPLEX_MEMBERS);

static PARENT_MEMBERS: [MemberInfo; 2] = [
    reference("Parent", "Child", child),
    property("Parent", "Name"),
];
pub static PARENT: TypeShape = object_shape("Parent", &PARENT_MEMBERS);

pub fn parent() -> &'static TypeShape {
    &PARENT
}

static CHILD_MEMBERS: [MemberInfo; 2] = [
    property("Child", "Name"),
    reference("Child", "Parent", parent),
];
pub static CHILD: TypeShape = object_shape("Child", &CHILD_MEMBERS);

pub fn child() -> &'static TypeShape {
    &CHILD
}

static IMMUTABLE_MEMBERS: [MemberInfo; 1] = [property("Immutable", "Value")];
pub static IMMUTABLE: TypeShape = TypeShape {
    name: "Immutable",
    kind: ShapeKind::Object,
    immutable: true,
    notifies: false,
    members: &IMMUTABLE_MEMBERS,
    items: ValueType::Dynamic,
};

pub fn immutable() -> &'static TypeShape {
    &IMMUTABLE
}

static WITH_IMMUTABLE_MEMBERS: [MemberInfo; 2] = [
    property("WithImmutableProperty", "Name"),
    reference("WithImmutableProperty", "Immutable", immutable),
];
pub static WITH_IMMUTABLE_PROPERTY: TypeShape =
    object_shape("WithImmutableProperty", &WITH_IMMUTABLE_MEMBERS);

static WITH_INDEXER_MEMBERS: [MemberInfo; 2] = [
    property("WithIndexer", "Name"),
    MemberInfo {
        name: "Item",
        declaring_type: "WithIndexer",
        kind: MemberKind::Indexer,
        value_type: ValueType::Scalar,
    },
];
pub static WITH_INDEXER: TypeShape = object_shape("WithIndexer", &WITH_INDEXER_MEMBERS);

static NOT_NOTIFYING_MEMBERS: [MemberInfo; 1] = [property("NotNotifying", "Value")];
pub static NOT_NOTIFYING: TypeShape = TypeShape {
    name: "NotNotifying",
    kind: ShapeKind::Object,
    immutable: false,
    notifies: false,
    members: &NOT_NOTIFYING_MEMBERS,
    items: ValueType::Dynamic,
};

pub fn not_notifying() -> &'static TypeShape {
    &NOT_NOTIFYING
}

static HOLDS_NOT_NOTIFYING_MEMBERS: [MemberInfo; 2] = [
    property("HoldsNotNotifying", "Name"),
    reference("HoldsNotNotifying", "Inner", not_notifying),
];
pub static HOLDS_NOT_NOTIFYING: TypeShape =
    object_shape("HoldsNotNotifying", &HOLDS_NOT_NOTIFYING_MEMBERS);

static WITH_CALCULATED_MEMBERS: [MemberInfo; 2] = [
    property("WithCalculatedProperty", "Value"),
    MemberInfo {
        name: "Sum",
        declaring_type: "WithCalculatedProperty",
        kind: MemberKind::Calculated,
        value_type: ValueType::Scalar,
    },
];
pub static WITH_CALCULATED_PROPERTY: TypeShape =
    object_shape("WithCalculatedProperty", &WITH_CALCULATED_MEMBERS);

enum Stored {
    Value(Value),
    /// Back references are held weakly so fixture graphs with loops free
    Weak(Weak<Record>),
}

/// A notifying test object whose members are described by a static shape
pub struct Record {
    shape: &'static TypeShape,
    slots: RwLock<Vec<Stored>>,
    /// Added to `Value` to produce `Sum` on `WithCalculatedProperty`
    offset: i64,
    notifier: Option<Notifier>,
}

impl Record {
    pub fn new(shape: &'static TypeShape) -> Arc<Record> {
        Self::with_offset(shape, 0)
    }

    pub fn with_offset(shape: &'static TypeShape, offset: i64) -> Arc<Record> {
        Arc::new(Record {
            shape,
            slots: RwLock::new(shape.members.iter().map(|_| Stored::Value(Value::Null)).collect()),
            offset,
            notifier: shape.notifies.then(Notifier::new),
        })
    }

    fn position(&self, name: &str) -> usize {
        self.shape
            .members
            .iter()
            .position(|m| m.name == name)
            .unwrap_or_else(|| panic!("{} has no member {}", self.shape.name, name))
    }

    /// Set without raising a notification
    pub fn init(self: &Arc<Self>, name: &str, value: impl Into<Value>) -> Arc<Self> {
        let index = self.position(name);
        self.slots.write()[index] = Stored::Value(value.into());
        self.clone()
    }

    pub fn set(&self, name: &'static str, value: impl Into<Value>) {
        let index = self.position(name);
        self.slots.write()[index] = Stored::Value(value.into());
        self.raise(Change::Member(Some(name)));
    }

    /// Point `name` at `target` without keeping it alive
    pub fn set_weak(&self, name: &'static str, target: &Arc<Record>) {
        let index = self.position(name);
        self.slots.write()[index] = Stored::Weak(Arc::downgrade(target));
        self.raise(Change::Member(Some(name)));
    }

    pub fn raise(&self, change: Change) {
        if let Some(notifier) = &self.notifier {
            notifier.notify(&change);
        }
    }

    pub fn obj(self: &Arc<Self>) -> ObjRef {
        ObjRef::from(self.clone())
    }
}

impl Object for Record {
    fn shape(&self) -> &'static TypeShape {
        self.shape
    }

    fn get(&self, member: &MemberInfo) -> Value {
        if member.kind == MemberKind::Calculated {
            let value = self.get(&self.shape.members[self.position("Value")]);
            return match value {
                Value::Int(v) => Value::Int(v + self.offset),
                other => other,
            };
        }
        let Some(index) = self.shape.members.iter().position(|m| m.name == member.name) else {
            return Value::Missing;
        };
        match &self.slots.read()[index] {
            Stored::Value(value) => value.clone(),
            Stored::Weak(weak) => weak.upgrade().map_or(Value::Null, Value::from),
        }
    }

    fn notifier(&self) -> Option<&Notifier> {
        self.notifier.as_ref()
    }

    fn equals(&self, other: &dyn Object) -> bool {
        std::ptr::eq(self.shape, other.shape())
            && self.shape.members.iter().all(|m| {
                let (a, b) = (self.get(m), other.get(m));
                a.to_string() == b.to_string()
            })
    }

    fn describe(&self) -> String {
        self.shape.name.to_string()
    }
}

/// `Parent { Child, Name }` whose child points back at it
pub fn parent_with_child(parent_name: &str, child_name: &str) -> (Arc<Record>, Arc<Record>) {
    let parent = Record::new(&PARENT).init("Name", parent_name);
    let child = Record::new(&CHILD).init("Name", child_name);
    parent.init("Child", child.clone());
    {
        let index = child.position("Parent");
        child.slots.write()[index] = Stored::Weak(Arc::downgrade(&parent));
    }
    (parent, child)
}

pub fn simple(int_value: i64, string_value: &str) -> Arc<Record> {
    Record::new(&WITH_SIMPLE_PROPERTIES)
        .init("IntValue", int_value)
        .init("StringValue", string_value)
}
