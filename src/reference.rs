//! Type-erased references: [`AnyPtr`] (an address plus a
//! [`Type`]), [`AnyRef`] (an `AnyPtr` plus an optional [`Accessor`] chain
//! remembering how to re-derive it), and [`AnyVal`] (an owned value of a
//! type known only at runtime).
//!
//! The source implementation keeps `AnyPtr`'s address and type packed into
//! two words and treats it as trivially copyable; that translates directly.
//! `AnyRef` additionally owns a reference-counted accessor instead of a raw
//! non-owning pointer into a slab allocator, since ayu has no slab here.

use crate::accessor::{Accessor, Mode};
use crate::error::{AyuError, ErrorKind, Result};
use crate::ty::{Describe, Type};
use std::fmt::{self, Debug, Formatter};

/// A raw, unowned, type-tagged address. Never dereferenced without going
/// through [`Type`]'s construct/destroy or through an [`Accessor`]; `ayu`
/// itself never reads through an `AnyPtr` except by handing it to one.
#[derive(Copy, Clone)]
pub struct AnyPtr {
    ty: Type,
    addr: *mut u8,
}

impl AnyPtr {
    pub fn new(ty: Type, addr: *mut u8) -> AnyPtr {
        AnyPtr { ty, addr }
    }

    pub const EMPTY: AnyPtr = AnyPtr { ty: Type::EMPTY, addr: std::ptr::null_mut() };

    /// Build an `AnyPtr` pointing at `value` with `T`'s registered type.
    /// Does not take ownership; `value` must outlive the returned pointer.
    pub fn of<T: Describe>(value: &mut T) -> AnyPtr {
        AnyPtr { ty: Type::of::<T>(), addr: value as *mut T as *mut u8 }
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    pub fn is_empty(&self) -> bool {
        self.ty.is_empty() || self.addr.is_null()
    }

    /// Cast to `target`, upcasting through `delegate`/castable chains if
    /// needed.
    pub fn upcast_to(&self, target: Type) -> Result<AnyPtr> {
        let addr = self.ty.upcast_to(target, self.addr)?;
        Ok(AnyPtr { ty: target, addr })
    }

    /// Reinterpret the pointee as `&T`.
    ///
    /// # Safety
    /// The pointee must actually be a live `T` and must outlive the
    /// returned reference.
    pub unsafe fn downcast_ref<T: Describe>(&self) -> Result<&T> {
        if self.ty != Type::of::<T>() {
            return Err(AyuError::new(
                ErrorKind::TypeCantCast,
                format!("AnyPtr holds {}, not {}", self.ty.name(), Type::of::<T>().name()),
            ));
        }
        Ok(&*(self.addr as *const T))
    }

    /// Reinterpret the pointee as `&mut T`.
    ///
    /// # Safety
    /// Same as [`AnyPtr::downcast_ref`], plus exclusive access.
    pub unsafe fn downcast_mut<T: Describe>(&self) -> Result<&mut T> {
        if self.ty != Type::of::<T>() {
            return Err(AyuError::new(
                ErrorKind::TypeCantCast,
                format!("AnyPtr holds {}, not {}", self.ty.name(), Type::of::<T>().name()),
            ));
        }
        Ok(&mut *(self.addr as *mut T))
    }
}

impl PartialEq for AnyPtr {
    fn eq(&self, other: &Self) -> bool {
        self.ty == other.ty && self.addr == other.addr
    }
}
impl Eq for AnyPtr {}

impl Debug for AnyPtr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AnyPtr({}@{:p})", self.ty.name(), self.addr)
    }
}

/// An `AnyPtr` plus, optionally, the [`Accessor`] that was used to reach it
/// from some host object. References built by the traversal engine always
/// carry the accessor, so the underlying address can be re-derived later
/// even if the host has moved (lazy reference materialization).
#[derive(Clone)]
pub struct AnyRef {
    host: AnyPtr,
    acr: Option<Accessor>,
}

impl AnyRef {
    /// A reference with no accessor: the pointee's address is assumed
    /// stable for as long as the reference is used.
    pub fn bare(ptr: AnyPtr) -> AnyRef {
        AnyRef { host: ptr, acr: None }
    }

    /// A reference reached from `host` via `acr`.
    pub fn chained(host: AnyPtr, acr: Accessor) -> AnyRef {
        AnyRef { host, acr: Some(acr) }
    }

    pub fn is_empty(&self) -> bool {
        self.acr.is_none() && self.host.is_empty()
    }

    pub(crate) fn host(&self) -> AnyPtr {
        self.host
    }

    pub(crate) fn accessor(&self) -> Option<&Accessor> {
        self.acr.as_ref()
    }

    /// The static type of the referenced value, if known without calling
    /// the accessor (empty for dynamically-typed `AnyRefFunc` chains).
    pub fn ty(&self) -> Type {
        match &self.acr {
            Some(acr) if !acr.child_type().is_empty() => acr.child_type(),
            Some(_) => Type::EMPTY,
            None => self.host.ty(),
        }
    }

    /// Resolve this reference to a concrete [`AnyPtr`], running through its
    /// accessor chain if it has one.
    ///
    /// # Safety
    /// The host object (and anything it was reached through) must still be
    /// alive.
    pub unsafe fn resolve(&self) -> Result<AnyPtr> {
        match &self.acr {
            None => Ok(self.host),
            Some(acr) => acr.address(self.host.addr()),
        }
    }

    /// Run `cb` against the referenced value under `mode`, going through the
    /// accessor chain if present.
    ///
    /// # Safety
    /// Same as [`AnyRef::resolve`].
    pub unsafe fn access(
        &self,
        mode: Mode,
        cb: &mut dyn FnMut(*mut u8, Type) -> Result<()>,
    ) -> Result<()> {
        match &self.acr {
            None => cb(self.host.addr(), self.host.ty()),
            Some(acr) => acr.access(mode, self.host.addr(), cb),
        }
    }

    /// Read the referenced value via `cb`; any mutation `cb` makes is
    /// discarded (spec §4.3's `read`).
    ///
    /// # Safety
    /// Same as [`AnyRef::resolve`].
    pub unsafe fn read(&self, cb: &mut dyn FnMut(*mut u8, Type) -> Result<()>) -> Result<()> {
        self.access(Mode::Read, cb)
    }

    /// Write the referenced value via `cb`; `cb` may see default-ish
    /// storage rather than the prior value (spec §4.3's `write`).
    ///
    /// # Safety
    /// Same as [`AnyRef::resolve`].
    pub unsafe fn write(&self, cb: &mut dyn FnMut(*mut u8, Type) -> Result<()>) -> Result<()> {
        self.access(Mode::Write, cb)
    }

    /// Read-modify-write the referenced value via `cb` (spec §4.3's
    /// `modify`).
    ///
    /// # Safety
    /// Same as [`AnyRef::resolve`].
    pub unsafe fn modify(&self, cb: &mut dyn FnMut(*mut u8, Type) -> Result<()>) -> Result<()> {
        self.access(Mode::Modify, cb)
    }

    /// This reference's address, if it's addressable (a bare pointer, or an
    /// accessor chain carrying [`crate::accessor::Caps::ADDRESS`]); `None`
    /// otherwise, rather than [`AyuError::new`]'s
    /// [`ErrorKind::AddressUnaddressable`], since callers of this one
    /// typically want to branch on addressability rather than propagate a
    /// failure.
    pub fn address(&self) -> Option<AnyPtr> {
        match &self.acr {
            None => Some(self.host),
            Some(acr) if acr.caps().contains(crate::accessor::Caps::ADDRESS) => {
                unsafe { acr.address(self.host.addr()) }.ok()
            }
            Some(_) => None,
        }
    }

    /// Copy the referenced value out by value (spec §4.3's typed `get`).
    ///
    /// # Safety
    /// Same as [`AnyRef::resolve`].
    pub unsafe fn get<T: Describe + Clone>(&self) -> Result<T> {
        let mut out = None;
        self.read(&mut |addr, ty| {
            out = Some(AnyPtr::new(ty, addr).downcast_ref::<T>()?.clone());
            Ok(())
        })?;
        Ok(out.expect("access callback must be invoked"))
    }

    /// Write `value` through the reference by value (spec §4.3's typed
    /// `set`).
    ///
    /// # Safety
    /// Same as [`AnyRef::resolve`].
    pub unsafe fn set<T: Describe>(&self, value: T) -> Result<()> {
        let mut value = Some(value);
        self.write(&mut |addr, ty| {
            *AnyPtr::new(ty, addr).downcast_mut::<T>()? = value.take().expect("callback invoked once");
            Ok(())
        })
    }

    /// The attr named `key` (spec §4.3's `[key]` subscript), via
    /// [`crate::compound::item_attr`].
    pub fn attr(&self, key: &str) -> Result<AnyRef> {
        crate::compound::item_attr(self, key)
    }

    /// The elem at `index` (spec §4.3's `[index]` subscript), via
    /// [`crate::compound::item_elem`].
    pub fn elem(&self, index: u32) -> Result<AnyRef> {
        crate::compound::item_elem(self, index)
    }
}

impl PartialEq for AnyRef {
    /// Ignores whether two references happen to share the same accessor
    /// chain, and ignores readonly; only the resolved address and type
    /// matter.
    fn eq(&self, other: &Self) -> bool {
        match unsafe { (self.resolve(), other.resolve()) } {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl Debug for AnyRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AnyRef(host={:?}, chained={})", self.host, self.acr.is_some())
    }
}

/// An owned value of a type known only at runtime: allocates storage sized
/// for its `Type`, default-constructs or accepts an already-constructed
/// pointer, and destroys+deallocates on drop. Serializes as `[type-name,
/// value]`, or `[]` when holding nothing.
pub struct AnyVal {
    ty: Type,
    addr: *mut u8,
}

impl AnyVal {
    /// Default-construct a new value of `ty`.
    pub fn new(ty: Type) -> Result<AnyVal> {
        let addr = ty.allocate()?;
        unsafe {
            if let Err(e) = ty.default_construct(addr) {
                ty.deallocate(addr);
                return Err(e);
            }
        }
        Ok(AnyVal { ty, addr })
    }

    /// An `AnyVal` holding nothing (the `[]` serialization).
    pub fn empty() -> AnyVal {
        AnyVal { ty: Type::EMPTY, addr: std::ptr::null_mut() }
    }

    pub fn is_empty(&self) -> bool {
        self.ty.is_empty()
    }

    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn as_any_ptr(&self) -> AnyPtr {
        AnyPtr::new(self.ty, self.addr)
    }

    /// Move `value` into a freshly-allocated `AnyVal`.
    pub fn from_value<T: Describe>(value: T) -> AnyVal {
        let ty = Type::of::<T>();
        let boxed = Box::into_raw(Box::new(value)) as *mut u8;
        AnyVal { ty, addr: boxed }
    }

    /// Take the value back out as a concrete `T`, consuming this `AnyVal`.
    pub fn into_value<T: Describe>(self) -> Result<T> {
        if self.ty != Type::of::<T>() {
            return Err(AyuError::new(
                ErrorKind::TypeCantCast,
                format!("AnyVal holds {}, not {}", self.ty.name(), Type::of::<T>().name()),
            ));
        }
        let addr = self.addr;
        std::mem::forget(self);
        Ok(*unsafe { Box::from_raw(addr as *mut T) })
    }
}

impl Drop for AnyVal {
    fn drop(&mut self) {
        if self.ty.is_empty() {
            return;
        }
        unsafe {
            let _ = self.ty.destroy(self.addr);
            self.ty.deallocate(self.addr);
        }
    }
}

impl Debug for AnyVal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "AnyVal({})", self.ty.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::attr as mk_attr;
    use crate::accessor::Accessor;
    use crate::describe::AttrFlags;

    #[derive(Default)]
    struct Pair {
        a: i32,
        b: i32,
    }

    crate::describe!(Pair, "reference::Pair", |b| b.default_constructible().attrs(vec![
        mk_attr("a", Accessor::member::<Pair, i32>(Type::of::<i32>(), |p| &mut p.a), AttrFlags::empty(), None),
        mk_attr("b", Accessor::member::<Pair, i32>(Type::of::<i32>(), |p| &mut p.b), AttrFlags::empty(), None),
    ]));

    #[test]
    fn get_and_set_round_trip_through_bare_ref() {
        let mut x: i32 = 7;
        let r = AnyRef::bare(AnyPtr::of(&mut x));
        assert_eq!(unsafe { r.get::<i32>() }.unwrap(), 7);
        unsafe { r.set(42i32) }.unwrap();
        assert_eq!(x, 42);
    }

    #[test]
    fn address_is_some_for_bare_ref_and_addressable_chain() {
        let mut p = Pair { a: 1, b: 2 };
        let r = AnyRef::bare(AnyPtr::of(&mut p));
        assert_eq!(r.address(), Some(AnyPtr::of(&mut p)));

        let a_ref = r.attr("a").unwrap();
        assert!(a_ref.address().is_some());
    }

    #[test]
    fn attr_subscript_reaches_children_and_rejects_unknown_keys() {
        let mut p = Pair { a: 10, b: 20 };
        let r = AnyRef::bare(AnyPtr::of(&mut p));

        let a_ref = r.attr("a").unwrap();
        assert_eq!(unsafe { a_ref.get::<i32>() }.unwrap(), 10);
        unsafe { a_ref.set(11i32) }.unwrap();
        assert_eq!(p.a, 11);

        let missing = r.attr("c").unwrap_err();
        assert_eq!(missing.kind(), ErrorKind::AttrNotFound);
    }

    #[test]
    fn elem_subscript_reaches_children_and_rejects_out_of_bounds() {
        let mut v: Vec<i32> = vec![1, 2, 3];
        let r = AnyRef::bare(AnyPtr::of(&mut v));

        let e_ref = r.elem(1).unwrap();
        assert_eq!(unsafe { e_ref.get::<i32>() }.unwrap(), 2);
        unsafe { e_ref.set(22i32) }.unwrap();
        assert_eq!(v[1], 22);

        let out_of_bounds = r.elem(5).unwrap_err();
        assert_eq!(out_of_bounds.kind(), ErrorKind::ElemNotFound);
    }

    #[test]
    fn modify_sees_prior_value() {
        let mut x: i32 = 5;
        let r = AnyRef::bare(AnyPtr::of(&mut x));
        unsafe {
            r.modify(&mut |addr, ty| {
                let v = AnyPtr::new(ty, addr).downcast_mut::<i32>()?;
                *v += 1;
                Ok(())
            })
        }
        .unwrap();
        assert_eq!(x, 6);
    }
}
