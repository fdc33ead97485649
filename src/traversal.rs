//! The Traversal Engine: a stack-linked, CPS-style walk over a
//! value through its descriptor tree, with no heap allocation for the
//! traversal nodes themselves (each [`Traversal`] borrows its parent, so the
//! whole chain lives in the call stack of whatever recursive operation is
//! driving it — [`crate::to_tree`], [`crate::from_tree`], [`crate::scan`],
//! the compound ops in [`crate::compound`]).
//!
//! Every recursive step has the same shape: call the accessor (or computed
//! lookup) in the requested [`Mode`], and inside its callback build a child
//! [`Traversal`] node and hand it to the caller's `visit` closure. This is
//! a continuation-passing style: there is no materialized tree of
//! `Traversal` nodes, only a chain of borrowed stack frames live for the
//! duration of one top-level call.

use crate::accessor::{compose_caps, Accessor, Caps, Mode};
use crate::error::Result;
use crate::reference::{AnyPtr, AnyRef};
use crate::route::Route;
use crate::ty::Type;
use std::rc::Rc;

/// What kind of step led from the parent traversal node to this one. Keeps
/// enough information (a key or index, where relevant) to both rebuild an
/// [`Accessor`] on demand ([`Traversal::to_reference`]) and report a
/// [`Route`] for error messages ([`Traversal::route`]) without needing a
/// full graph scan the way the source implementation's generic `Acr` step
/// does (see `DESIGN.md` for this deviation).
enum Step<'a> {
    Start(AnyRef),
    Attr(Rc<str>, &'a Accessor),
    Elem(u32, &'a Accessor),
    ComputedAttr(Rc<str>, ComputedAttrFn),
    ComputedElem(u32, ComputedElemFn),
    ContiguousElem(u32, ContiguousElemFn),
    Delegate(&'a Accessor),
}

pub(crate) type ComputedAttrFn = Rc<dyn Fn(AnyPtr, &str) -> Option<AnyPtr>>;
pub(crate) type ComputedElemFn = Rc<dyn Fn(AnyPtr, u32) -> Option<AnyPtr>>;
pub(crate) type ContiguousElemFn = Rc<dyn Fn(AnyPtr) -> Result<AnyPtr>>;

/// One node in the traversal stack. Never owned outside of a
/// `visit` callback's dynamic extent.
pub struct Traversal<'a> {
    parent: Option<&'a Traversal<'a>>,
    ty: Type,
    addr: *mut u8,
    /// Cumulative capability bits: the intersection of every accessor's
    /// caps from the root down to this node. When [`Caps::ADDRESS`] is set
    /// here, the *entire* chain is addressable and [`Traversal::to_reference`]
    /// can shortcut straight to a bare [`AnyPtr`].
    caps: Caps,
    step: Step<'a>,
}

impl<'a> Traversal<'a> {
    pub fn ty(&self) -> Type {
        self.ty
    }

    pub fn addr(&self) -> *mut u8 {
        self.addr
    }

    pub fn caps(&self) -> Caps {
        self.caps
    }

    pub fn any_ptr(&self) -> AnyPtr {
        AnyPtr::new(self.ty, self.addr)
    }

    fn step_accessor(&self) -> Accessor {
        match &self.step {
            Step::Start(_) => unreachable!("Start node has no step accessor"),
            Step::Attr(_, acr) | Step::Elem(_, acr) | Step::Delegate(acr) => (*acr).clone(),
            Step::ComputedAttr(key, f) => {
                let parent_ty = self.parent.map(|p| p.ty).unwrap_or(Type::EMPTY);
                crate::accessor::computed_attr_accessor(parent_ty, key.clone(), f.clone())
            }
            Step::ComputedElem(idx, f) => {
                let parent_ty = self.parent.map(|p| p.ty).unwrap_or(Type::EMPTY);
                crate::accessor::computed_elem_accessor(parent_ty, *idx, f.clone())
            }
            Step::ContiguousElem(idx, f) => {
                let parent_ty = self.parent.map(|p| p.ty).unwrap_or(Type::EMPTY);
                crate::accessor::contiguous_elem_accessor(parent_ty, *idx, f.clone())
            }
        }
    }

    /// Lazily materialize an [`AnyRef`] pointing at this node's value (spec
    /// §4.5, "Lazy AnyRef materialization"). Cheap when the whole chain is
    /// addressable (the common case); otherwise builds a `Chain` accessor
    /// back to the nearest addressable ancestor, or all the way to the
    /// traversal's root [`AnyRef`] if nothing in between is addressable.
    pub fn to_reference(&self) -> AnyRef {
        if self.caps.contains(Caps::ADDRESS) {
            return AnyRef::bare(AnyPtr::new(self.ty, self.addr));
        }
        if let Step::Start(r) = &self.step {
            return r.clone();
        }
        let parent = self.parent.expect("non-Start node always has a parent");
        let step_acr = self.step_accessor();
        if parent.caps.contains(Caps::ADDRESS) {
            return AnyRef::chained(AnyPtr::new(parent.ty, parent.addr), step_acr);
        }
        let parent_ref = parent.to_reference();
        match parent_ref.accessor() {
            None => AnyRef::chained(parent_ref.host(), step_acr),
            Some(outer) => {
                AnyRef::chained(parent_ref.host(), Accessor::chain(outer.clone(), step_acr))
            }
        }
    }

    /// Reconstruct the symbolic [`Route`] to this node, given `base` (the
    /// route of the traversal's root item — normally
    /// [`crate::route::current_base_iri`]'s underlying [`Route`], pushed by
    /// the top-level `item_to_tree`/`item_from_tree` call).
    /// Walk up to this traversal's root and return the [`AnyRef`] it
    /// started from (the `Start` node). Used as a fallback base for
    /// route reconstruction when no [`crate::route::BaseRouteGuard`] scope
    /// is active.
    pub fn root_any_ref(&self) -> AnyRef {
        match &self.step {
            Step::Start(r) => r.clone(),
            _ => self.parent.expect("non-Start node always has a parent").root_any_ref(),
        }
    }

    pub fn route(&self, base: &Route) -> Route {
        match &self.step {
            Step::Start(_) => base.clone(),
            Step::Delegate(_) => self.parent.map(|p| p.route(base)).unwrap_or_else(|| base.clone()),
            Step::Attr(key, _) | Step::ComputedAttr(key, _) => {
                let parent_route = self.parent.map(|p| p.route(base)).unwrap_or_else(|| base.clone());
                parent_route.key(key.clone())
            }
            Step::Elem(idx, _) | Step::ComputedElem(idx, _) | Step::ContiguousElem(idx, _) => {
                let parent_route = self.parent.map(|p| p.route(base)).unwrap_or_else(|| base.clone());
                parent_route.index(*idx)
            }
        }
    }
}

/// Capabilities of a traversal step: the same composition rule
/// `Accessor::chain` uses (a plain intersection of the parent's cumulative
/// caps and this step's own accessor caps, except that the parent's
/// `Caps::ADDRESS_CHILDREN` lets this step's own addressability through even
/// where the parent itself isn't addressable — spec.md §3.4/§4.5).
fn combined_caps(parent: Caps, acr: Caps) -> Caps {
    compose_caps(parent, acr)
}

/// Entry point: dissolve `r` into host + accessor, run it in `mode`, and
/// call `visit` with the resulting root [`Traversal`] node.
pub fn trav_start<R>(r: &AnyRef, mode: Mode, visit: impl FnOnce(&Traversal) -> Result<R>) -> Result<R> {
    let mut visit = Some(visit);
    let mut out = None;
    let caps = match r.accessor() {
        Some(acr) => acr.caps(),
        None => Caps::ALL,
    };
    unsafe {
        r.access(mode, &mut |addr, ty| {
            let trav = Traversal {
                parent: None,
                ty,
                addr,
                caps,
                step: Step::Start(r.clone()),
            };
            let v = visit.take().expect("access callback invoked more than once");
            out = Some(v(&trav)?);
            Ok(())
        })?;
    }
    Ok(out.expect("access callback never invoked"))
}

/// Recurse into a declared `attrs` entry.
pub fn trav_attr<'p, R>(
    parent: &'p Traversal<'p>,
    key: Rc<str>,
    acr: &'p Accessor,
    mode: Mode,
    visit: impl FnOnce(&Traversal) -> Result<R>,
) -> Result<R> {
    trav_step(parent, Step::Attr(key, acr), acr, mode, visit)
}

/// Recurse into a declared `elems` entry.
pub fn trav_elem<'p, R>(
    parent: &'p Traversal<'p>,
    index: u32,
    acr: &'p Accessor,
    mode: Mode,
    visit: impl FnOnce(&Traversal) -> Result<R>,
) -> Result<R> {
    trav_step(parent, Step::Elem(index, acr), acr, mode, visit)
}

/// Recurse through a `delegate` facet.
pub fn trav_delegate<'p, R>(
    parent: &'p Traversal<'p>,
    acr: &'p Accessor,
    mode: Mode,
    visit: impl FnOnce(&Traversal) -> Result<R>,
) -> Result<R> {
    trav_step(parent, Step::Delegate(acr), acr, mode, visit)
}

fn trav_step<'p, R>(
    parent: &'p Traversal<'p>,
    step: Step<'p>,
    acr: &'p Accessor,
    mode: Mode,
    visit: impl FnOnce(&Traversal) -> Result<R>,
) -> Result<R> {
    let mut visit = Some(visit);
    let mut out = None;
    let caps = combined_caps(parent.caps, acr.caps());
    unsafe {
        acr.access(mode, parent.addr, &mut |addr, ty| {
            let trav = Traversal { parent: Some(parent), ty, addr, caps, step: step_clone_for_reentry(&step) };
            let v = visit.take().expect("access callback invoked more than once");
            out = Some(v(&trav)?);
            Ok(())
        })?;
    }
    Ok(out.expect("access callback never invoked"))
}

/// `Step` isn't `Clone` (it borrows `acr`/closures by reference or `Rc`),
/// but the closure above needs to move it into the inner callback, which
/// Rust's closure-capture analysis can't see is only ever called once. This
/// performs the equivalent of a move through a `&mut Option<Step>` shim.
fn step_clone_for_reentry<'p>(step: &Step<'p>) -> Step<'p> {
    match step {
        Step::Start(r) => Step::Start(r.clone()),
        Step::Attr(k, a) => Step::Attr(k.clone(), a),
        Step::Elem(i, a) => Step::Elem(*i, a),
        Step::ComputedAttr(k, f) => Step::ComputedAttr(k.clone(), f.clone()),
        Step::ComputedElem(i, f) => Step::ComputedElem(*i, f.clone()),
        Step::ContiguousElem(i, f) => Step::ContiguousElem(*i, f.clone()),
        Step::Delegate(a) => Step::Delegate(a),
    }
}

/// Recurse into a `computed_attrs` lookup for `key`.
pub fn trav_computed_attr<'p, R>(
    parent: &'p Traversal<'p>,
    key: Rc<str>,
    computed_attrs: ComputedAttrFn,
    mode: Mode,
    visit: impl FnOnce(&Traversal) -> Result<R>,
) -> Result<R> {
    let acr = crate::accessor::computed_attr_accessor(parent.ty, key.clone(), computed_attrs.clone());
    let mut visit = Some(visit);
    let mut out = None;
    let caps = combined_caps(parent.caps, acr.caps());
    unsafe {
        acr.access(mode, parent.addr, &mut |addr, ty| {
            let trav = Traversal {
                parent: Some(parent),
                ty,
                addr,
                caps,
                step: Step::ComputedAttr(key.clone(), computed_attrs.clone()),
            };
            let v = visit.take().expect("access callback invoked more than once");
            out = Some(v(&trav)?);
            Ok(())
        })?;
    }
    Ok(out.expect("access callback never invoked"))
}

/// Recurse into a `computed_elems` lookup for `index`.
pub fn trav_computed_elem<'p, R>(
    parent: &'p Traversal<'p>,
    index: u32,
    computed_elems: ComputedElemFn,
    mode: Mode,
    visit: impl FnOnce(&Traversal) -> Result<R>,
) -> Result<R> {
    let acr = crate::accessor::computed_elem_accessor(parent.ty, index, computed_elems.clone());
    let mut visit = Some(visit);
    let mut out = None;
    let caps = combined_caps(parent.caps, acr.caps());
    unsafe {
        acr.access(mode, parent.addr, &mut |addr, ty| {
            let trav = Traversal {
                parent: Some(parent),
                ty,
                addr,
                caps,
                step: Step::ComputedElem(index, computed_elems.clone()),
            };
            let v = visit.take().expect("access callback invoked more than once");
            out = Some(v(&trav)?);
            Ok(())
        })?;
    }
    Ok(out.expect("access callback never invoked"))
}

/// Recurse into a `contiguous_elems` base + stride lookup for `index` (spec
/// §4.5, `trav_contiguous_elem`).
pub fn trav_contiguous_elem<'p, R>(
    parent: &'p Traversal<'p>,
    index: u32,
    contiguous_elems: ContiguousElemFn,
    mode: Mode,
    visit: impl FnOnce(&Traversal) -> Result<R>,
) -> Result<R> {
    let acr = crate::accessor::contiguous_elem_accessor(parent.ty, index, contiguous_elems.clone());
    let mut visit = Some(visit);
    let mut out = None;
    let caps = combined_caps(parent.caps, acr.caps());
    unsafe {
        acr.access(mode, parent.addr, &mut |addr, ty| {
            let trav = Traversal {
                parent: Some(parent),
                ty,
                addr,
                caps,
                step: Step::ContiguousElem(index, contiguous_elems.clone()),
            };
            let v = visit.take().expect("access callback invoked more than once");
            out = Some(v(&trav)?);
            Ok(())
        })?;
    }
    Ok(out.expect("access callback never invoked"))
}
