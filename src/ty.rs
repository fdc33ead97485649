//! The [`Type`] handle: an opaque, copyable handle to a registered
//! [`Description`](crate::describe::Description), with pointer identity and
//! a readonly bit folded in. The source this was ported from packs the
//! readonly bit into the low bit of the pointer; here it's just a plain
//! field, since Rust gives no constexpr reason to bit-pack it.

use crate::describe::Description;
use crate::error::{AyuError, ErrorKind, Result};
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};

/// Implemented for every type that has a `describe!` block. `describe()` is
/// called at most once per process per `T` (the result is cached in a
/// function-local `static`, so every call for the same `T` yields the same
/// `&'static Description` — this is what gives [`Type`] its pointer-equality
/// identity: the same Rust type always yields the same handle value.
pub trait Describe: 'static {
    fn describe() -> &'static Description;
}

/// An opaque handle to a registered type. Cheap to copy, comparable by
/// pointer identity, and carries whether the value behind it should be
/// treated as read-only.
#[derive(Copy, Clone)]
pub struct Type {
    desc: Option<&'static Description>,
    readonly: bool,
}

impl Type {
    /// The empty `Type`: every operation on it other than boolification and
    /// equality is a logic error.
    pub const EMPTY: Type = Type { desc: None, readonly: false };

    /// Look up (building on first use) the `Type` for `T`.
    pub fn of<T: Describe>() -> Type {
        Type { desc: Some(T::describe()), readonly: false }
    }

    pub(crate) fn from_description(desc: &'static Description) -> Type {
        Type { desc: Some(desc), readonly: false }
    }

    pub fn is_empty(&self) -> bool {
        self.desc.is_none()
    }

    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Same type, but marked read-only.
    pub fn as_readonly(mut self) -> Type {
        self.readonly = true;
        self
    }

    pub(crate) fn description(&self) -> Option<&'static Description> {
        self.desc
    }

    fn require_desc(&self) -> Result<&'static Description> {
        self.desc
            .ok_or_else(|| AyuError::new(ErrorKind::General, "operation on empty Type"))
    }

    pub fn name(&self) -> &'static str {
        match self.desc {
            Some(d) => d.name(),
            None => "",
        }
    }

    pub fn cpp_size(&self) -> usize {
        self.desc.map_or(0, |d| d.size)
    }

    pub fn cpp_align(&self) -> usize {
        self.desc.map_or(1, |d| d.align)
    }

    /// Construct an instance of this type in-place at `target`, which must
    /// point at storage with at least `cpp_size()`/`cpp_align()`.
    ///
    /// # Safety
    /// `target` must be valid for writes of `cpp_size()` bytes and aligned
    /// to `cpp_align()`.
    pub unsafe fn default_construct(&self, target: *mut u8) -> Result<()> {
        let desc = self.require_desc()?;
        match desc.construct {
            Some(f) => {
                f(target);
                Ok(())
            }
            None => Err(AyuError::new(
                ErrorKind::TypeCantDefaultConstruct,
                format!("{} has no default constructor", desc.name()),
            )),
        }
    }

    /// Destroy (but do not deallocate) the instance at `target`.
    ///
    /// # Safety
    /// `target` must point at a live, initialized instance of this type.
    pub unsafe fn destroy(&self, target: *mut u8) -> Result<()> {
        let desc = self.require_desc()?;
        (desc.destroy)(target);
        Ok(())
    }

    fn layout(&self) -> Result<std::alloc::Layout> {
        let desc = self.require_desc()?;
        std::alloc::Layout::from_size_align(desc.size, desc.align.max(1))
            .map_err(|e| AyuError::new(ErrorKind::General, e.to_string()))
    }

    /// Allocate (but do not construct) a buffer sized/aligned for this type.
    pub fn allocate(&self) -> Result<*mut u8> {
        let layout = self.layout()?;
        if layout.size() == 0 {
            return Ok(std::ptr::NonNull::dangling().as_ptr());
        }
        let ptr = unsafe { std::alloc::alloc(layout) };
        if ptr.is_null() {
            std::alloc::handle_alloc_error(layout);
        }
        Ok(ptr)
    }

    /// Deallocate a buffer previously returned by [`Type::allocate`].
    ///
    /// # Safety
    /// `ptr` must have come from `self.allocate()` and not already have
    /// been deallocated.
    pub unsafe fn deallocate(&self, ptr: *mut u8) {
        if let Ok(layout) = self.layout() {
            if layout.size() != 0 {
                std::alloc::dealloc(ptr, layout);
            }
        }
    }

    /// Depth-first search through `delegate`/`attrs[..].castable`/
    /// `elems[..].castable` for a path from `self` to `target`, returning
    /// the adjusted address if found.
    pub fn try_upcast_to(&self, target: Type, ptr: *mut u8) -> Option<*mut u8> {
        if *self == target {
            return Some(ptr);
        }
        let desc = self.desc?;
        desc.find_castable_path(target, ptr)
    }

    pub fn upcast_to(&self, target: Type, ptr: *mut u8) -> Result<*mut u8> {
        self.try_upcast_to(target, ptr).ok_or_else(|| {
            AyuError::new(
                ErrorKind::TypeCantCast,
                format!("cannot cast {} to {}", self.name(), target.name()),
            )
        })
    }
}

impl PartialEq for Type {
    /// Pointer equality; ignores the readonly bit.
    fn eq(&self, other: &Self) -> bool {
        match (self.desc, other.desc) {
            (Some(a), Some(b)) => std::ptr::eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }
}
impl Eq for Type {}

impl Hash for Type {
    fn hash<H: Hasher>(&self, state: &mut H) {
        match self.desc {
            Some(d) => (d as *const Description as usize).hash(state),
            None => 0usize.hash(state),
        }
    }
}

impl Debug for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Type({})", self.name())
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
