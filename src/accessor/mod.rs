//! The Accessor algebra: a small closed set of ways to get from
//! a parent value to one of its children, plus the capability and mode
//! bookkeeping that governs what each form allows.
//!
//! The source implementation allocates each accessor form as a fixed-layout
//! struct in a bump slab and dispatches on a form tag stored in its header
//! (`access.internal2.h`'s `MemberAcr`, `RefFuncAcr`, etc., all sharing an
//! `Accessor` base). Rust has no portable pointer-to-member and no reason to
//! hand-roll a slab allocator, so each form here is built from a small
//! generic closure over `From`/`To` captured at construction time (where
//! `From`/`To` are known statically) and erased behind one `Rc<dyn Fn>` per
//! accessor; the form tag is kept anyway (`Kind`) since introspection and
//! equality still need to distinguish forms that happen to share an erased
//! representation.

mod chain;

pub use chain::{computed_attr_accessor, computed_elem_accessor, contiguous_elem_accessor};

use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::AnyPtr;
use crate::ty::Type;
use bitflags::bitflags;
use std::cell::RefCell;
use std::fmt::{self, Debug, Formatter};
use std::rc::Rc;

bitflags! {
    /// What an accessor supports doing with its child.
    pub struct Caps: u8 {
        const READ             = 0b0001;
        const WRITE            = 0b0010;
        const ADDRESS          = 0b0100;
        /// This accessor's own result may not itself be a stable address,
        /// but anything reached *through* it (a further `Member`/`RefFunc`/…
        /// chained on top) still resolves to a real, independently valid
        /// address rather than one backed by a per-call temporary. Checked
        /// by `Accessor::chain`/`combined_caps`'s composition exception
        /// (spec.md §3.4: "`AddressChildren` on an outer permits children
        /// to be addressable even if the outer itself is not") and by
        /// `scan::scan_pointers`, which stops descending once it's unset.
        const ADDRESS_CHILDREN = 0b1000;
    }
}

impl Caps {
    pub const READWRITE: Caps = Caps::from_bits_truncate(Caps::READ.bits | Caps::WRITE.bits);
    pub const ALL: Caps = Caps::from_bits_truncate(
        Caps::READ.bits | Caps::WRITE.bits | Caps::ADDRESS.bits | Caps::ADDRESS_CHILDREN.bits,
    );
}

/// Compose two adjacent legs' caps the way both `Accessor::chain` and the
/// traversal engine's per-step capability bookkeeping do: a plain
/// intersection, except that `outer`'s `ADDRESS_CHILDREN` lets `inner`'s
/// `ADDRESS`/`ADDRESS_CHILDREN` pass through even where `outer` itself lacks
/// `ADDRESS` (spec.md §3.4/§4.5).
pub(crate) fn compose_caps(outer: Caps, inner: Caps) -> Caps {
    let mut caps = outer & inner;
    if outer.contains(Caps::ADDRESS_CHILDREN) {
        caps.set(Caps::ADDRESS, inner.contains(Caps::ADDRESS));
        caps.set(Caps::ADDRESS_CHILDREN, inner.contains(Caps::ADDRESS_CHILDREN));
    }
    caps
}

/// What the caller intends to do during one `access()` call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Read the child's current value; any mutation the callback makes is
    /// discarded.
    Read,
    /// Ignore the child's current value, hand the callback default-ish
    /// storage to fill in, then commit whatever it wrote.
    Write,
    /// Hand the callback the live child and commit whatever mutation it
    /// makes (read-modify-write in one step).
    Modify,
}

/// Which of the closed set of accessor forms this is.
/// Kept purely for introspection/equality; behavior lives in the erased
/// closure.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Kind {
    Identity,
    Reinterpret,
    Member,
    RefFunc,
    ConstRefFunc,
    RefFuncs,
    ValueFunc,
    ValueFuncs,
    MixedFuncs,
    Assignable,
    Variable,
    Constant,
    ConstantPtr,
    AnyRefFunc,
    AnyPtrFunc,
    Chain,
}

type AccessFn = Rc<dyn Fn(Mode, *mut u8, &mut dyn FnMut(*mut u8, Type) -> Result<()>) -> Result<()>>;

struct Inner {
    kind: Kind,
    caps: Caps,
    to_type: Type,
    access: AccessFn,
    /// Only set for [`Kind::Chain`]; lets chain-of-chain flattening and
    /// equality walk the tree without downcasting the erased closure.
    chain_parts: Option<(Accessor, Accessor)>,
}

/// A way to get from a parent value to one of its children. Cheap to clone
/// (reference-counted); immutable once built.
#[derive(Clone)]
pub struct Accessor(Rc<Inner>);

impl Debug for Accessor {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Accessor({:?}, caps={:?})", self.0.kind, self.0.caps)
    }
}

impl PartialEq for Accessor {
    /// Two accessors are equal if they're the same allocation, or (for
    /// `Chain`) if their parts are equal: equality is structural for
    /// `Chain`, identity otherwise.
    fn eq(&self, other: &Self) -> bool {
        if Rc::ptr_eq(&self.0, &other.0) {
            return true;
        }
        match (&self.0.chain_parts, &other.0.chain_parts) {
            (Some((a1, a2)), Some((b1, b2))) => a1 == b1 && a2 == b2,
            _ => false,
        }
    }
}

impl Accessor {
    pub fn kind(&self) -> Kind {
        self.0.kind
    }

    pub fn caps(&self) -> Caps {
        self.0.caps
    }

    /// The static type of the child this accessor exposes, or
    /// [`Type::EMPTY`] for dynamically-typed forms (`AnyRefFunc`/`AnyPtrFunc`
    /// /`Chain` over one of those).
    pub fn child_type(&self) -> Type {
        self.0.to_type
    }

    fn check_mode(&self, mode: Mode) -> Result<()> {
        let needed = match mode {
            Mode::Read => Caps::READ,
            Mode::Write | Mode::Modify => Caps::WRITE,
        };
        if !self.0.caps.contains(needed) {
            return Err(AyuError::new(
                ErrorKind::WriteReadonly,
                format!("accessor does not support {:?}", mode),
            ));
        }
        Ok(())
    }

    /// Run `cb` against the child reached from `from` under `mode`.
    ///
    /// # Safety
    /// `from` must point at a live, initialized instance of this accessor's
    /// parent type.
    pub unsafe fn access(
        &self,
        mode: Mode,
        from: *mut u8,
        cb: &mut dyn FnMut(*mut u8, Type) -> Result<()>,
    ) -> Result<()> {
        self.check_mode(mode)?;
        (self.0.access)(mode, from, cb)
    }

    /// Get the child's address without running a callback, for accessors
    /// with [`Caps::ADDRESS`]. Used by the traversal engine to build
    /// `AnyPtr`s for recursion without a full read/write round trip.
    ///
    /// # Safety
    /// Same as [`Accessor::access`].
    pub unsafe fn address(&self, from: *mut u8) -> Result<AnyPtr> {
        if !self.0.caps.contains(Caps::ADDRESS) {
            return Err(AyuError::new(
                ErrorKind::AddressUnaddressable,
                "accessor is not addressable",
            ));
        }
        let mut out = None;
        self.access(Mode::Modify, from, &mut |ptr, ty| {
            out = Some(AnyPtr::new(ty, ptr));
            Ok(())
        })?;
        Ok(out.expect("addressable accessor must invoke its callback"))
    }

    fn new(kind: Kind, caps: Caps, to_type: Type, access: AccessFn) -> Accessor {
        Accessor(Rc::new(Inner { kind, caps, to_type, access, chain_parts: None }))
    }

    /// Low-level constructor for accessors whose parent type is only known
    /// dynamically (via a [`Type`], not a Rust generic) — used by the
    /// traversal engine to wrap `computed_attrs`/`computed_elems`/
    /// `contiguous_elems` facets, which already operate entirely in terms
    /// of [`AnyPtr`] and so need no static `From` at all.
    pub(crate) fn erased(
        kind: Kind,
        caps: Caps,
        to_type: Type,
        access: impl Fn(Mode, *mut u8, &mut dyn FnMut(*mut u8, Type) -> Result<()>) -> Result<()> + 'static,
    ) -> Accessor {
        Self::new(kind, caps, to_type, Rc::new(access))
    }

    /// The no-op accessor: child == parent.
    pub fn identity<T: 'static>(ty: Type) -> Accessor {
        Self::new(
            Kind::Identity,
            Caps::ALL,
            ty,
            Rc::new(move |_mode, from, cb| cb(from, ty)),
        )
    }

    /// Same address, different static type, no runtime check. Used for
    /// newtype-style delegation where the wrapper and the wrapped type are
    /// guaranteed layout-compatible.
    ///
    /// # Safety
    /// `From` and `To` must have compatible layout at the address this
    /// accessor is ultimately applied to.
    pub unsafe fn reinterpret<To: 'static>(ty: Type) -> Accessor {
        Self::new(
            Kind::Reinterpret,
            Caps::ALL,
            ty,
            Rc::new(move |_mode, from, cb| cb(from, ty)),
        )
    }

    /// A plain struct field, reached the same way in every mode.
    pub fn member<From: 'static, To: 'static>(
        to_ty: Type,
        get_mut: fn(&mut From) -> &mut To,
    ) -> Accessor {
        Self::new(
            Kind::Member,
            Caps::ALL,
            to_ty,
            Rc::new(move |_mode, from, cb| {
                let from = unsafe { &mut *(from as *mut From) };
                let to = get_mut(from);
                cb(to as *mut To as *mut u8, to_ty)
            }),
        )
    }

    /// A function returning `&mut To` from `&mut From`; addressable but not
    /// guaranteed stable across calls the way `Member` is.
    pub fn ref_func<From: 'static, To: 'static>(
        to_ty: Type,
        f: fn(&mut From) -> &mut To,
    ) -> Accessor {
        Self::new(
            Kind::RefFunc,
            Caps::ALL,
            to_ty,
            Rc::new(move |_mode, from, cb| {
                let from = unsafe { &mut *(from as *mut From) };
                let to = f(from);
                cb(to as *mut To as *mut u8, to_ty)
            }),
        )
    }

    /// Read-only function accessor; not addressable.
    pub fn const_ref_func<From: 'static, To: 'static>(
        to_ty: Type,
        f: fn(&From) -> &To,
    ) -> Accessor {
        Self::new(
            Kind::ConstRefFunc,
            Caps::READ,
            to_ty,
            Rc::new(move |_mode, from, cb| {
                let from = unsafe { &*(from as *const From) };
                let to = f(from);
                cb(to as *const To as *mut u8, to_ty)
            }),
        )
    }

    /// Getter/setter pair exchanging `To` by value; not addressable (despite
    /// the name — no reference ever escapes).
    pub fn ref_funcs<From: 'static, To: Clone + Default + 'static>(
        to_ty: Type,
        get: fn(&From) -> &To,
        set: fn(&mut From, To),
    ) -> Accessor {
        Self::new(
            Kind::RefFuncs,
            Caps::READWRITE,
            to_ty,
            Rc::new(move |mode, from, cb| {
                let from_mut = unsafe { &mut *(from as *mut From) };
                let mut scratch: To = match mode {
                    Mode::Read | Mode::Modify => get(from_mut).clone(),
                    Mode::Write => To::default(),
                };
                let result = cb(&mut scratch as *mut To as *mut u8, to_ty);
                if matches!(mode, Mode::Write | Mode::Modify) && result.is_ok() {
                    set(from_mut, scratch);
                }
                result
            }),
        )
    }

    /// By-value getter only; not addressable.
    pub fn value_func<From: 'static, To: 'static>(
        to_ty: Type,
        get: fn(&From) -> To,
    ) -> Accessor {
        Self::new(
            Kind::ValueFunc,
            Caps::READ,
            to_ty,
            Rc::new(move |_mode, from, cb| {
                let from = unsafe { &*(from as *const From) };
                let mut value = get(from);
                cb(&mut value as *mut To as *mut u8, to_ty)
            }),
        )
    }

    /// By-value getter and setter; not addressable.
    pub fn value_funcs<From: 'static, To: Default + 'static>(
        to_ty: Type,
        get: fn(&From) -> To,
        set: fn(&mut From, To),
    ) -> Accessor {
        Self::new(
            Kind::ValueFuncs,
            Caps::READWRITE,
            to_ty,
            Rc::new(move |mode, from, cb| {
                let from_mut = unsafe { &mut *(from as *mut From) };
                let mut scratch: To = match mode {
                    Mode::Read | Mode::Modify => get(from_mut),
                    Mode::Write => To::default(),
                };
                let result = cb(&mut scratch as *mut To as *mut u8, to_ty);
                if matches!(mode, Mode::Write | Mode::Modify) && result.is_ok() {
                    set(from_mut, scratch);
                }
                result
            }),
        )
    }

    /// By-value getter, by-reference setter; not addressable.
    pub fn mixed_funcs<From: 'static, To: Default + 'static>(
        to_ty: Type,
        get: fn(&From) -> To,
        set: fn(&mut From, &To),
    ) -> Accessor {
        Self::new(
            Kind::MixedFuncs,
            Caps::READWRITE,
            to_ty,
            Rc::new(move |mode, from, cb| {
                let from_mut = unsafe { &mut *(from as *mut From) };
                let mut scratch: To = match mode {
                    Mode::Read | Mode::Modify => get(from_mut),
                    Mode::Write => To::default(),
                };
                let result = cb(&mut scratch as *mut To as *mut u8, to_ty);
                if matches!(mode, Mode::Write | Mode::Modify) && result.is_ok() {
                    set(from_mut, &scratch);
                }
                result
            }),
        )
    }

    /// Child and parent are conversions of one another (used e.g. for
    /// newtype coercions); not addressable since the child has no stable
    /// storage of its own.
    pub fn assignable<From: Clone + 'static, To: Default + 'static>(
        to_ty: Type,
        to_child: fn(&From) -> To,
        from_child: fn(To) -> From,
    ) -> Accessor {
        Self::new(
            Kind::Assignable,
            Caps::READWRITE,
            to_ty,
            Rc::new(move |mode, from, cb| {
                let from_mut = unsafe { &mut *(from as *mut From) };
                let mut scratch: To = match mode {
                    Mode::Read | Mode::Modify => to_child(from_mut),
                    Mode::Write => To::default(),
                };
                let result = cb(&mut scratch as *mut To as *mut u8, to_ty);
                if matches!(mode, Mode::Write | Mode::Modify) && result.is_ok() {
                    *from_mut = from_child(scratch);
                }
                result
            }),
        )
    }

    /// An owned value moved into the accessor itself rather than read from
    /// the parent at all; read/write but never addressable.
    pub fn variable<To: 'static>(to_ty: Type, value: To) -> Accessor {
        let cell = Rc::new(RefCell::new(value));
        Self::new(
            Kind::Variable,
            Caps::READWRITE,
            to_ty,
            Rc::new(move |_mode, _from, cb| {
                let mut guard = cell.borrow_mut();
                cb(&mut *guard as *mut To as *mut u8, to_ty)
            }),
        )
    }

    /// An inline constant, readable only, never addressable.
    pub fn constant<To: Clone + 'static>(to_ty: Type, value: To) -> Accessor {
        Self::new(
            Kind::Constant,
            Caps::READ,
            to_ty,
            Rc::new(move |_mode, _from, cb| {
                let mut scratch = value.clone();
                cb(&mut scratch as *mut To as *mut u8, to_ty)
            }),
        )
    }

    /// A pointer to an externally-owned constant, readable and addressable.
    ///
    /// # Safety
    /// `ptr` must stay valid for as long as this accessor is used.
    pub unsafe fn constant_ptr<To: 'static>(to_ty: Type, ptr: *const To) -> Accessor {
        Self::new(
            Kind::ConstantPtr,
            Caps::READ | Caps::ADDRESS | Caps::ADDRESS_CHILDREN,
            to_ty,
            Rc::new(move |_mode, _from, cb| cb(ptr as *mut u8, to_ty)),
        )
    }

    /// Child type is determined dynamically per-call; addressable. Takes a
    /// closure rather than a bare `fn`
    /// so callers (e.g. the lazy reference-chain builders in
    /// [`super::chain`]) can capture per-instance state like a key string.
    pub fn any_ptr_func<From: 'static>(f: impl Fn(&mut From) -> AnyPtr + 'static) -> Accessor {
        Self::new(
            Kind::AnyPtrFunc,
            Caps::READ | Caps::WRITE | Caps::ADDRESS | Caps::ADDRESS_CHILDREN,
            Type::EMPTY,
            Rc::new(move |_mode, from, cb| {
                let from = unsafe { &mut *(from as *mut From) };
                let any = f(from);
                cb(any.addr(), any.ty())
            }),
        )
    }

    /// Like [`Accessor::any_ptr_func`] but not addressable, for cases where
    /// the dynamic child doesn't have stable storage.
    pub fn any_ref_func<From: 'static>(f: impl Fn(&mut From) -> AnyPtr + 'static) -> Accessor {
        Self::new(
            Kind::AnyRefFunc,
            Caps::READ | Caps::WRITE,
            Type::EMPTY,
            Rc::new(move |_mode, from, cb| {
                let from = unsafe { &mut *(from as *mut From) };
                let any = f(from);
                cb(any.addr(), any.ty())
            }),
        )
    }

    /// Compose `outer` then `inner`: reach `outer`'s child from the parent,
    /// then reach `inner`'s child from there. Caps are the intersection of
    /// both sides' caps — a chain can never be more permissive than its
    /// weakest link — except that `outer`'s `Caps::ADDRESS_CHILDREN` lets
    /// `inner`'s own addressability through even where `outer` itself isn't
    /// addressable (spec.md §3.4).
    pub fn chain(outer: Accessor, inner: Accessor) -> Accessor {
        let caps = compose_caps(outer.caps(), inner.caps());
        let to_type = inner.child_type();
        let o = outer.clone();
        let i = inner.clone();
        let access: AccessFn = Rc::new(move |mode, from, cb| {
            let i2 = i.clone();
            // The outer leg is widened to `Modify` for any write: a `Write`
            // into `outer` would hand `inner` blank/default storage for the
            // *whole* outer child, discarding any sibling state under it
            // that `inner` doesn't touch.
            let outer_mode = if mode == Mode::Read { Mode::Read } else { Mode::Modify };
            unsafe {
                o.access(outer_mode, from, &mut |mid, _mid_ty| i2.access(mode, mid, cb))
            }
        });
        Accessor(Rc::new(Inner {
            kind: Kind::Chain,
            caps,
            to_type,
            access,
            chain_parts: Some((outer, inner)),
        }))
    }
}
