//! The [`Tree`] value: ayu's immutable, refcounted, self-describing data
//! model. This is the "Tree value" leaf component from the
//! system overview table.
//!
//! A `Tree` is cheap to clone (an `Rc` bump for anything but the smallest
//! forms) and, once built, never mutates except for its rendering-hint
//! flags. Two non-`Error` trees compare equal by structure, not by
//! representation: `Tree::from(3i64) == Tree::from(3.0f64)` and object
//! attribute order never affects equality.

mod parse;
mod print;

pub use parse::tree_from_string;
pub use print::tree_to_string;

use crate::error::{AyuError, ErrorKind, Result};
use bitflags::bitflags;
use indexmap::IndexMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::rc::Rc;

bitflags! {
    /// Rendering hints. These never affect equality and never affect the
    /// semantics of an operation; they only tell [`tree_to_string`] how to
    /// lay a subtree out.
    #[derive(Default)]
    pub struct TreeFlags: u8 {
        /// For `Number`: print as hexadecimal.
        const PREFER_HEX = 0x1;
        /// For `Array`/`Object`/`String`: prefer a single compact line.
        const PREFER_COMPACT = 0x2;
        /// For `Array`/`Object`/`String`: prefer one element per line.
        const PREFER_EXPANDED = 0x4;
    }
}

/// The tag of a [`Tree`]'s variant. Named distinctly from "type" because
/// `Type` (§3.2) is a different concept: a tree's form is about the shape of
/// serialized data, not a registered program type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Form {
    Undefined,
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
    Error,
}

impl Display for Form {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let s = match self {
            Form::Undefined => "undefined",
            Form::Null => "null",
            Form::Bool => "bool",
            Form::Number => "number",
            Form::String => "string",
            Form::Array => "array",
            Form::Object => "object",
            Form::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// The numeric payload of a `Number` tree. Kept as a tagged union (rather
/// than always widening to `f64`) so that round-tripping an integer through
/// `to_string`/`from_string` doesn't quietly turn it into a float: it keeps
/// an internal bit distinguishing integer-origin numbers from float-origin
/// ones.
#[derive(Copy, Clone, Debug)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// NaN equals NaN, -0.0 equals +0.0, and an integer-origin number
    /// equals a float-origin number with the same mathematical value.
    fn tree_eq(self, other: Number) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (Number::Float(a), Number::Float(b)) => {
                (a.is_nan() && b.is_nan()) || a == b
            }
            (Number::Int(a), Number::Float(b)) | (Number::Float(b), Number::Int(a)) => {
                !b.is_nan() && (a as f64) == b
            }
        }
    }
}

#[derive(Clone, Debug)]
enum Data {
    Undefined,
    Null,
    Bool(bool),
    Number(Number),
    String(Rc<str>),
    Array(Rc<[Tree]>),
    /// Ordered, key-unique. Order is preserved for serialization but not
    /// significant for equality.
    Object(Rc<IndexMap<Rc<str>, Tree>>),
    /// An opaque stored exception. Any operation other than checking
    /// `is_defined`/`form` or explicitly unwrapping it rethrows.
    Error(Rc<AyuError>),
}

/// An immutable, refcounted, self-describing value.
#[derive(Clone, Debug)]
pub struct Tree {
    data: Data,
    flags: TreeFlags,
}

impl Tree {
    pub fn undefined() -> Self {
        Tree { data: Data::Undefined, flags: TreeFlags::empty() }
    }

    pub fn null() -> Self {
        Tree { data: Data::Null, flags: TreeFlags::empty() }
    }

    pub fn bool(v: bool) -> Self {
        Tree { data: Data::Bool(v), flags: TreeFlags::empty() }
    }

    pub fn int(v: i64) -> Self {
        Tree { data: Data::Number(Number::Int(v)), flags: TreeFlags::empty() }
    }

    pub fn float(v: f64) -> Self {
        Tree { data: Data::Number(Number::Float(v)), flags: TreeFlags::empty() }
    }

    pub fn string(v: impl Into<Rc<str>>) -> Self {
        Tree { data: Data::String(v.into()), flags: TreeFlags::empty() }
    }

    pub fn array(v: impl Into<Rc<[Tree]>>) -> Self {
        Tree { data: Data::Array(v.into()), flags: TreeFlags::empty() }
    }

    /// Build an object from an iterator of pairs. Returns `Err` if a key
    /// appears more than once: key uniqueness is required on construction.
    pub fn object(
        pairs: impl IntoIterator<Item = (impl Into<Rc<str>>, Tree)>,
    ) -> Result<Self> {
        let mut map = IndexMap::new();
        for (k, v) in pairs {
            let k = k.into();
            if map.insert(k.clone(), v).is_some() {
                return Err(AyuError::new(
                    ErrorKind::General,
                    format!("duplicate object key `{}`", k),
                ));
            }
        }
        Ok(Tree { data: Data::Object(Rc::new(map)), flags: TreeFlags::empty() })
    }

    pub fn error(err: AyuError) -> Self {
        Tree { data: Data::Error(Rc::new(err)), flags: TreeFlags::empty() }
    }

    pub fn form(&self) -> Form {
        match &self.data {
            Data::Undefined => Form::Undefined,
            Data::Null => Form::Null,
            Data::Bool(_) => Form::Bool,
            Data::Number(_) => Form::Number,
            Data::String(_) => Form::String,
            Data::Array(_) => Form::Array,
            Data::Object(_) => Form::Object,
            Data::Error(_) => Form::Error,
        }
    }

    pub fn is_defined(&self) -> bool {
        !matches!(self.data, Data::Undefined)
    }

    pub fn flags(&self) -> TreeFlags {
        self.flags
    }

    pub fn with_flags(mut self, flags: TreeFlags) -> Self {
        self.flags |= flags;
        self
    }

    /// If this is an `Error` tree, clone and return the stored error.
    /// Otherwise `None`. Used by code that wants to inspect (rather than
    /// propagate) a stored error, e.g. `ToTreeOptions::EMBED_ERRORS` readers.
    pub fn as_error(&self) -> Option<AyuError> {
        match &self.data {
            Data::Error(e) => Some((**e).clone()),
            _ => None,
        }
    }

    /// If this tree is in `Error` form, return that error. Every
    /// non-discard operation rethrows a stored error this way.
    fn check_error(&self) -> Result<()> {
        match &self.data {
            Data::Error(e) => Err((**e).clone()),
            _ => Ok(()),
        }
    }

    fn wrong_form(&self, expected: &str) -> AyuError {
        AyuError::new(
            ErrorKind::TreeWrongForm,
            format!("expected {}, got {}", expected, self.form()),
        )
    }

    pub fn as_bool(&self) -> Result<bool> {
        self.check_error()?;
        match &self.data {
            Data::Bool(b) => Ok(*b),
            _ => Err(self.wrong_form("bool")),
        }
    }

    /// Converting `Null` to `f64` yields `+NaN`, for JSON compatibility
    ///.
    pub fn as_f64(&self) -> Result<f64> {
        self.check_error()?;
        match &self.data {
            Data::Number(n) => Ok(n.as_f64()),
            Data::Null => Ok(f64::NAN),
            _ => Err(self.wrong_form("number")),
        }
    }

    /// Succeeds only if the stored number is exactly representable as
    /// `i64`: conversion to any integer or float type succeeds only if the
    /// value is exactly representable in the target.
    pub fn as_i64(&self) -> Result<i64> {
        self.check_error()?;
        match &self.data {
            Data::Number(Number::Int(i)) => Ok(*i),
            Data::Number(Number::Float(f)) => {
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64 {
                    Ok(*f as i64)
                } else {
                    Err(AyuError::new(
                        ErrorKind::TreeCantRepresent,
                        format!("{} cannot be represented as i64", f),
                    ))
                }
            }
            _ => Err(self.wrong_form("number")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        self.check_error()?;
        match &self.data {
            Data::String(s) => Ok(s),
            _ => Err(self.wrong_form("string")),
        }
    }

    pub fn as_array(&self) -> Result<&[Tree]> {
        self.check_error()?;
        match &self.data {
            Data::Array(a) => Ok(a),
            _ => Err(self.wrong_form("array")),
        }
    }

    pub fn as_object(&self) -> Result<&IndexMap<Rc<str>, Tree>> {
        self.check_error()?;
        match &self.data {
            Data::Object(o) => Ok(o),
            _ => Err(self.wrong_form("object")),
        }
    }

    /// `None` if this isn't an object or has no such attribute. Does not
    /// propagate a stored `Error`; use `as_object` first if you want that to
    /// surface.
    pub fn attr(&self, key: &str) -> Option<&Tree> {
        match &self.data {
            Data::Object(o) => o.get(key),
            _ => None,
        }
    }

    /// `None` if this isn't an array or the index is out of bounds.
    pub fn elem(&self, index: usize) -> Option<&Tree> {
        match &self.data {
            Data::Array(a) => a.get(index),
            _ => None,
        }
    }

    fn number_origin_is_int(&self) -> Option<bool> {
        match &self.data {
            Data::Number(Number::Int(_)) => Some(true),
            Data::Number(Number::Float(_)) => Some(false),
            _ => None,
        }
    }
}

macro_rules! impl_from_int {
    ($($t:ty),*) => {
        $(impl From<$t> for Tree {
            fn from(v: $t) -> Self {
                Tree::int(v as i64)
            }
        })*
    };
}
impl_from_int!(i8, i16, i32, i64, u8, u16, u32, isize);

impl From<bool> for Tree {
    fn from(v: bool) -> Self {
        Tree::bool(v)
    }
}

impl From<f32> for Tree {
    fn from(v: f32) -> Self {
        Tree::float(v as f64)
    }
}

impl From<f64> for Tree {
    fn from(v: f64) -> Self {
        Tree::float(v)
    }
}

impl From<&str> for Tree {
    fn from(v: &str) -> Self {
        Tree::string(v)
    }
}

impl From<String> for Tree {
    fn from(v: String) -> Self {
        Tree::string(v)
    }
}

impl<T: Into<Tree>> From<Vec<T>> for Tree {
    fn from(v: Vec<T>) -> Self {
        Tree::array(v.into_iter().map(Into::into).collect::<Vec<_>>())
    }
}

/// Structural equality. Forms must match (an `Error` tree is never equal to anything, including
/// another `Error`, since exceptions aren't comparable); objects compare by
/// attribute set, not order; numbers compare by mathematical value with
/// NaN == NaN and -0.0 == 0.0.
impl PartialEq for Tree {
    fn eq(&self, other: &Self) -> bool {
        match (&self.data, &other.data) {
            (Data::Undefined, Data::Undefined) => true,
            (Data::Null, Data::Null) => true,
            (Data::Bool(a), Data::Bool(b)) => a == b,
            (Data::Number(a), Data::Number(b)) => a.tree_eq(*b),
            (Data::String(a), Data::String(b)) => a == b,
            (Data::Array(a), Data::Array(b)) => a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x == y),
            (Data::Object(a), Data::Object(b)) => {
                a.len() == b.len()
                    && a.iter().all(|(k, v)| b.get(k.as_ref()).map_or(false, |v2| v == v2))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbers_compare_by_value_across_origin() {
        assert_eq!(Tree::int(3), Tree::float(3.0));
        assert_eq!(Tree::float(f64::NAN), Tree::float(f64::NAN));
        assert_eq!(Tree::float(0.0), Tree::float(-0.0));
    }

    #[test]
    fn objects_ignore_order() {
        let a = Tree::object(vec![("a", Tree::int(1)), ("b", Tree::int(2))]).unwrap();
        let b = Tree::object(vec![("b", Tree::int(2)), ("a", Tree::int(1))]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn duplicate_object_key_rejected() {
        let result = Tree::object(vec![("a", Tree::int(1)), ("a", Tree::int(2))]);
        assert!(result.is_err());
    }

    #[test]
    fn null_as_f64_is_nan() {
        assert!(Tree::null().as_f64().unwrap().is_nan());
    }

    #[test]
    fn int_exactness_is_enforced() {
        assert_eq!(Tree::float(3.0).as_i64().unwrap(), 3);
        assert!(Tree::float(3.5).as_i64().is_err());
    }

    #[test]
    fn error_tree_rethrows_on_any_access() {
        let err = AyuError::new(ErrorKind::General, "boom");
        let t = Tree::error(err);
        assert!(t.as_bool().is_err());
        assert_eq!(t.form(), Form::Error);
    }
}
