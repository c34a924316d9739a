//! Field values and declared value types
//!
//! `Value` is the dynamic representation of every entity field. It is totally
//! ordered and hashable so values can live in sets, map keys and indexes.
//! There are no floating point values; the model holds configuration, not
//! measurements.
//!
//! `ValueType` is the declared type tree of a field. Walking it (rather than
//! the value alone) is how soft links and urls nested in collections, maps,
//! optionals and sealed hierarchies are discovered.

use crate::identity::PersistentId;
use crate::url::VirtualFileUrl;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of a class: fully qualified name plus owning plugin
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeName {
    /// Fully qualified name
    pub fqn: String,
    /// Owning plugin, `None` for core classes
    pub plugin_id: Option<String>,
}

impl TypeName {
    /// Class owned by the core
    pub fn new(fqn: impl Into<String>) -> Self {
        TypeName {
            fqn: fqn.into(),
            plugin_id: None,
        }
    }

    /// Class contributed by a plugin
    pub fn with_plugin(fqn: impl Into<String>, plugin_id: impl Into<String>) -> Self {
        TypeName {
            fqn: fqn.into(),
            plugin_id: Some(plugin_id.into()),
        }
    }

    /// Last dotted component of the name
    pub fn simple_name(&self) -> &str {
        self.fqn.rsplit('.').next().unwrap_or(&self.fqn)
    }
}

impl fmt::Display for TypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.fqn)
    }
}

/// Dynamic field value
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Value {
    /// Absent optional value
    Null,
    /// Boolean
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// UTF-8 string
    String(String),
    /// Virtual file url
    Url(VirtualFileUrl),
    /// By-value reference to another entity
    PersistentId(PersistentId),
    /// Ordered collection
    List(Vec<Value>),
    /// Unordered collection
    Set(BTreeSet<Value>),
    /// Map
    Map(BTreeMap<Value, Value>),
    /// Instance of a registered struct class, fields in declaration order
    Struct {
        /// Struct class
        class: TypeName,
        /// Field values
        fields: Vec<Value>,
    },
    /// Singleton instance of a registered object class
    Object(TypeName),
    /// Variant of a registered enum class
    Enum {
        /// Enum class
        class: TypeName,
        /// Variant name
        variant: String,
    },
}

impl Value {
    /// Shorthand for a string value
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// True for `Value::Null`
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Borrow as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Borrow as integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Borrow as url
    pub fn as_url(&self) -> Option<&VirtualFileUrl> {
        match self {
            Value::Url(u) => Some(u),
            _ => None,
        }
    }

    /// Class named by this value, if it carries one
    pub fn class(&self) -> Option<&TypeName> {
        match self {
            Value::Struct { class, .. } | Value::Object(class) | Value::Enum { class, .. } => {
                Some(class)
            }
            Value::PersistentId(pid) => Some(&pid.class),
            _ => None,
        }
    }

    /// Visit every class name reachable from this value
    pub fn for_each_class(&self, visit: &mut dyn FnMut(&TypeName)) {
        match self {
            Value::Null | Value::Bool(_) | Value::Int(_) | Value::String(_) | Value::Url(_) => {}
            Value::PersistentId(pid) => {
                visit(&pid.class);
                for part in &pid.parts {
                    part.for_each_class(visit);
                }
            }
            Value::List(items) => items.iter().for_each(|v| v.for_each_class(visit)),
            Value::Set(items) => items.iter().for_each(|v| v.for_each_class(visit)),
            Value::Map(entries) => {
                for (k, v) in entries {
                    k.for_each_class(visit);
                    v.for_each_class(visit);
                }
            }
            Value::Struct { class, fields } => {
                visit(class);
                fields.iter().for_each(|v| v.for_each_class(visit));
            }
            Value::Object(class) | Value::Enum { class, .. } => visit(class),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<VirtualFileUrl> for Value {
    fn from(url: VirtualFileUrl) -> Self {
        Value::Url(url)
    }
}

impl From<PersistentId> for Value {
    fn from(pid: PersistentId) -> Self {
        Value::PersistentId(pid)
    }
}

/// Declared type of a field or struct member
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Boolean
    Bool,
    /// Integer
    Int,
    /// String
    String,
    /// Virtual file url
    Url,
    /// Persistent id of another entity (a soft link)
    PersistentId,
    /// Ordered collection
    List(Box<ValueType>),
    /// Unordered collection
    Set(Box<ValueType>),
    /// Map
    Map(Box<ValueType>, Box<ValueType>),
    /// Nullable wrapper
    Optional(Box<ValueType>),
    /// Registered struct class
    Struct(TypeName),
    /// Registered sealed class, value is one of its variants
    Sealed(TypeName),
    /// Registered object class
    Object(TypeName),
    /// Registered enum class
    Enum(TypeName),
}

impl ValueType {
    /// `List<inner>`
    pub fn list(inner: ValueType) -> Self {
        ValueType::List(Box::new(inner))
    }

    /// `Set<inner>`
    pub fn set(inner: ValueType) -> Self {
        ValueType::Set(Box::new(inner))
    }

    /// `Map<key, value>`
    pub fn map(key: ValueType, value: ValueType) -> Self {
        ValueType::Map(Box::new(key), Box::new(value))
    }

    /// `inner?`
    pub fn optional(inner: ValueType) -> Self {
        ValueType::Optional(Box::new(inner))
    }

    /// True when the field may hold `Value::Null`
    pub fn is_optional(&self) -> bool {
        matches!(self, ValueType::Optional(_))
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Bool => f.write_str("Bool"),
            ValueType::Int => f.write_str("Int"),
            ValueType::String => f.write_str("String"),
            ValueType::Url => f.write_str("Url"),
            ValueType::PersistentId => f.write_str("PersistentId"),
            ValueType::List(inner) => write!(f, "List<{}>", inner),
            ValueType::Set(inner) => write!(f, "Set<{}>", inner),
            ValueType::Map(k, v) => write!(f, "Map<{}, {}>", k, v),
            ValueType::Optional(inner) => write!(f, "{}?", inner),
            ValueType::Struct(name)
            | ValueType::Sealed(name)
            | ValueType::Object(name)
            | ValueType::Enum(name) => write!(f, "{}", name),
        }
    }
}
