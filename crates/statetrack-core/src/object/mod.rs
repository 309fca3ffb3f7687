//! Object capability layer.
//!
//! The engine never inspects concrete Rust types. Anything it compares or
//! tracks implements [`Object`] and describes itself with a static
//! [`TypeShape`]: one table per type, built once, never re-inspected.
//!
//! ## Values
//!
//! Member and element values cross the boundary as [`Value`]. Scalars are
//! compared by value. Nested objects travel as [`ObjRef`], a shared handle
//! whose equality is instance identity.

pub mod list;
pub mod observe;

pub use list::ObservableList;
pub use observe::{Change, Notifier, Observers, Subscription};

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Whether a type exposes named members or indexed elements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Object,
    Collection,
}

/// How a member is declared on its type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// Plain stored field
    Field,
    /// Settable property
    Property,
    /// Read-only property derived from other state
    Calculated,
    /// Parameterized property; never enumerable
    Indexer,
}

/// Declared type of a member or of a collection's elements
#[derive(Clone, Copy)]
pub enum ValueType {
    /// Int, float, bool or string
    Scalar,
    /// Reference to another described type
    Object(fn() -> &'static TypeShape),
    /// Only known per value
    Dynamic,
}

impl fmt::Debug for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Scalar => f.write_str("Scalar"),
            ValueType::Object(shape) => write!(f, "Object({})", shape().name),
            ValueType::Dynamic => f.write_str("Dynamic"),
        }
    }
}

/// Static description of a single member
#[derive(Debug)]
pub struct MemberInfo {
    pub name: &'static str,
    pub declaring_type: &'static str,
    pub kind: MemberKind,
    pub value_type: ValueType,
}

impl MemberInfo {
    /// `Type.Member`, the form used in error messages and logs
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.declaring_type, self.name)
    }
}

/// Static description of a type
#[derive(Debug)]
pub struct TypeShape {
    pub name: &'static str,
    pub kind: ShapeKind,
    /// Intrinsically immutable: compared with [`Object::equals`], never recursed into
    pub immutable: bool,
    /// Instances hand out a [`Notifier`]
    pub notifies: bool,
    pub members: &'static [MemberInfo],
    /// Element type for collections
    pub items: ValueType,
}

impl TypeShape {
    pub fn member(&self, name: &str) -> Option<&'static MemberInfo> {
        let members: &'static [MemberInfo] = self.members;
        members.iter().find(|m| m.name == name)
    }

    pub fn is_collection(&self) -> bool {
        self.kind == ShapeKind::Collection
    }
}

/// The capability surface the engine needs from a compared instance
pub trait Object: Send + Sync + 'static {
    fn shape(&self) -> &'static TypeShape;

    /// Current value of `member`; [`Value::Missing`] when the type does not have it
    fn get(&self, member: &MemberInfo) -> Value;

    /// Element count for collections, `None` otherwise
    fn item_count(&self) -> Option<usize> {
        None
    }

    /// Element at `index`; [`Value::Missing`] past the end
    fn item(&self, _index: usize) -> Value {
        Value::Missing
    }

    /// Change notifications. `None` means the instance can be diffed but not tracked.
    fn notifier(&self) -> Option<&Notifier> {
        None
    }

    /// Equality used for immutable types. Defaults to identity.
    fn equals(&self, other: &dyn Object) -> bool {
        std::ptr::eq(
            self as *const Self as *const (),
            other as *const dyn Object as *const (),
        )
    }

    /// Label used when rendering a diff
    fn describe(&self) -> String {
        self.shape().name.to_string()
    }
}

/// Shared handle to an [`Object`] with identity semantics
#[derive(Clone)]
pub struct ObjRef(Arc<dyn Object>);

impl ObjRef {
    pub fn new<T: Object>(object: Arc<T>) -> Self {
        ObjRef(object)
    }

    /// Address of the referenced instance; stable while any handle lives
    pub fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &ObjRef) -> bool {
        self.addr() == other.addr()
    }

    pub fn shape(&self) -> &'static TypeShape {
        self.0.shape()
    }
}

impl std::ops::Deref for ObjRef {
    type Target = dyn Object;

    fn deref(&self) -> &Self::Target {
        &*self.0
    }
}

impl<T: Object> From<Arc<T>> for ObjRef {
    fn from(object: Arc<T>) -> Self {
        ObjRef(object)
    }
}

impl PartialEq for ObjRef {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for ObjRef {}

impl Hash for ObjRef {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state);
    }
}

impl fmt::Debug for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{:#x}", self.shape().name, self.addr())
    }
}

impl fmt::Display for ObjRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A member or element value
#[derive(Clone, Debug)]
pub enum Value {
    Null,
    /// Index present on one side only
    Missing,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Arc<str>),
    Object(ObjRef),
}

impl Value {
    pub fn object<T: Object>(object: &Arc<T>) -> Self {
        Value::Object(ObjRef(object.clone()))
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Null | Value::Missing)
    }

    pub fn as_object(&self) -> Option<&ObjRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Name of the value's type for messages and rendering
    pub fn type_name(&self) -> String {
        match self {
            Value::Null => "null".to_string(),
            Value::Missing => "missing".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Int(_) => "int".to_string(),
            Value::Float(_) => "float".to_string(),
            Value::Str(_) => "string".to_string(),
            Value::Object(o) => o.describe(),
        }
    }

    /// Value equality for scalars; `None` when either side is an object
    pub(crate) fn scalar_eq(&self, other: &Value) -> Option<bool> {
        match (self, other) {
            (Value::Object(_), _) | (_, Value::Object(_)) => None,
            (Value::Bool(a), Value::Bool(b)) => Some(a == b),
            (Value::Int(a), Value::Int(b)) => Some(a == b),
            (Value::Float(a), Value::Float(b)) => Some(a == b || (a.is_nan() && b.is_nan())),
            (Value::Str(a), Value::Str(b)) => Some(a == b),
            (Value::Null, Value::Null) | (Value::Missing, Value::Missing) => Some(true),
            _ => Some(false),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Missing => f.write_str("missing item"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{}", x),
            Value::Str(s) => f.write_str(s),
            Value::Object(o) => f.write_str(&o.describe()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(Arc::from(v))
    }
}

impl From<ObjRef> for Value {
    fn from(v: ObjRef) -> Self {
        Value::Object(v)
    }
}

impl<T: Object> From<Arc<T>> for Value {
    fn from(v: Arc<T>) -> Self {
        Value::Object(ObjRef(v))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}
