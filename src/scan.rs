//! Graph scanning: `scan_pointers`/`scan_references` walk a
//! single root's reachable sub-items depth-first. `scan_pointers` honors
//! `Description::has_refs_to_children` pruning (the `NoRefsToChildren`
//! flag) and additionally skips unaddressable nodes and the descendants of
//! nodes lacking `Caps::ADDRESS_CHILDREN`; `scan_references` does neither —
//! it visits every sub-item regardless of addressability (spec.md §4.11).
//! `find_pointer`/`find_reference` are a
//! short-circuiting specialization searching every registered root.
//! [`KeepRouteCache`] memoizes per-address route reconstruction across one
//! scan so revisiting the same sub-item through multiple paths (aliasing)
//! doesn't redo the walk back to the root each time.
//!
//! This port has no `Universe`/`Document`/`Resource` registry (see
//! `DESIGN.md`): [`register_scan_root`] is a minimal stand-in letting a
//! caller name the roots `scan_universe_*`/`find_*` should sweep, in place
//! of the original's "every loaded resource" iteration.

use crate::accessor::{Caps, Mode};
use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::{AnyPtr, AnyRef};
use crate::route::Route;
use crate::traversal::{
    trav_attr, trav_computed_attr, trav_computed_elem, trav_contiguous_elem, trav_delegate, trav_elem, trav_start,
    Traversal,
};
use crate::ty::Type;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Whether a scan callback wants to keep walking or stop at the current
/// node — scan functions may terminate the walk early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanFlow {
    Continue,
    Stop,
}

thread_local! {
    static SCANNING: Cell<bool> = Cell::new(false);
    static ROUTE_CACHE_STACK: RefCell<Vec<HashMap<(Type, *mut u8), Route>>> = RefCell::new(Vec::new());
    static SCAN_ROOTS: RefCell<Vec<(Route, AnyRef)>> = RefCell::new(Vec::new());
}

struct ScanGuard;
impl Drop for ScanGuard {
    fn drop(&mut self) {
        SCANNING.with(|s| s.set(false));
    }
}

/// Reject a scan invoked from inside another scan's callback on this thread
/// (the `ScanWhileScanning` reentrancy guard).
fn enter_scan() -> Result<ScanGuard> {
    SCANNING.with(|s| {
        if s.get() {
            return Err(AyuError::new(ErrorKind::ScanWhileScanning, "a scan is already in progress on this thread"));
        }
        s.set(true);
        Ok(ScanGuard)
    })
}

/// RAII scope that memoizes route reconstruction by resolved
/// `(Type, address)` identity for as long as it's alive.
/// Nestable; only the innermost active scope is consulted/populated.
pub struct KeepRouteCache {
    _private: (),
}

impl KeepRouteCache {
    pub fn push() -> KeepRouteCache {
        ROUTE_CACHE_STACK.with(|s| s.borrow_mut().push(HashMap::new()));
        KeepRouteCache { _private: () }
    }
}

impl Drop for KeepRouteCache {
    fn drop(&mut self) {
        ROUTE_CACHE_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

fn cached_route(ty: Type, addr: *mut u8, compute: impl FnOnce() -> Route) -> Route {
    ROUTE_CACHE_STACK.with(|s| {
        let mut stack = s.borrow_mut();
        match stack.last_mut() {
            Some(top) => top.entry((ty, addr)).or_insert_with(compute).clone(),
            None => compute(),
        }
    })
}

/// Register `r`, rooted at `route`, as a sweep target for
/// `scan_universe_*`/`find_*` (a universe sweep, minus an actual
/// `Universe` collaborator — see module docs).
pub fn register_scan_root(route: Route, r: AnyRef) {
    SCAN_ROOTS.with(|s| s.borrow_mut().push((route, r)));
}

pub fn unregister_scan_root(route: &Route) {
    SCAN_ROOTS.with(|s| s.borrow_mut().retain(|(existing, _)| existing != route));
}

fn base_route_for(trav: &Traversal) -> Route {
    crate::route::current_base_route().unwrap_or_else(|| Route::reference(trav.root_any_ref()))
}

/// Depth-first walk of `r`'s reachable sub-items, invoking `visit` with
/// each node's [`AnyPtr`] and reconstructed [`Route`]. Does not push its
/// own [`KeepRouteCache`] scope; wrap a
/// multi-root sweep in one explicitly to share the memoization.
pub fn scan_pointers(r: &AnyRef, visit: impl FnMut(AnyPtr, &Route) -> Result<ScanFlow>) -> Result<()> {
    let _guard = enter_scan()?;
    let mut visit = visit;
    trav_start(r, Mode::Read, |trav| {
        scan_node(trav, ScanKind::Pointers, &mut |t| {
            let route = cached_route(t.ty(), t.addr(), || t.route(&base_route_for(t)));
            visit(t.any_ptr(), &route)
        })
    })
    .map(|_| ())
}

/// Like [`scan_pointers`] but yields a lazily-materialized [`AnyRef`]
/// instead of requiring the node be addressable: every pointer is also a
/// reference, so this visits a
/// superset that also includes non-addressable chain legs.
pub fn scan_references(r: &AnyRef, visit: impl FnMut(&AnyRef, &Route) -> Result<ScanFlow>) -> Result<()> {
    let _guard = enter_scan()?;
    let mut visit = visit;
    trav_start(r, Mode::Read, |trav| {
        scan_node(trav, ScanKind::References, &mut |t| {
            let route = cached_route(t.ty(), t.addr(), || t.route(&base_route_for(t)));
            visit(&t.to_reference(), &route)
        })
    })
    .map(|_| ())
}

/// One resource's scan, with its own [`KeepRouteCache`] scope (spec
/// §4.11's `scan_resource_pointers`).
pub fn scan_resource_pointers(r: &AnyRef, visit: impl FnMut(AnyPtr, &Route) -> Result<ScanFlow>) -> Result<()> {
    let _cache = KeepRouteCache::push();
    scan_pointers(r, visit)
}

pub fn scan_resource_references(r: &AnyRef, visit: impl FnMut(&AnyRef, &Route) -> Result<ScanFlow>) -> Result<()> {
    let _cache = KeepRouteCache::push();
    scan_references(r, visit)
}

/// Sweep every root registered with [`register_scan_root`], sharing one
/// [`KeepRouteCache`] scope across the whole sweep.
pub fn scan_universe_pointers(mut visit: impl FnMut(AnyPtr, &Route) -> Result<ScanFlow>) -> Result<()> {
    let _cache = KeepRouteCache::push();
    let roots = SCAN_ROOTS.with(|s| s.borrow().clone());
    for (_, root) in roots {
        let flow = run_until_stop(|v| scan_pointers(&root, v), &mut visit)?;
        if flow == ScanFlow::Stop {
            break;
        }
    }
    Ok(())
}

pub fn scan_universe_references(mut visit: impl FnMut(&AnyRef, &Route) -> Result<ScanFlow>) -> Result<()> {
    let _cache = KeepRouteCache::push();
    let roots = SCAN_ROOTS.with(|s| s.borrow().clone());
    for (_, root) in roots {
        let flow = run_until_stop_ref(|v| scan_references(&root, v), &mut visit)?;
        if flow == ScanFlow::Stop {
            break;
        }
    }
    Ok(())
}

/// Search every registered root for the first pointer matching `pred`

pub fn find_pointer(mut pred: impl FnMut(AnyPtr, &Route) -> bool) -> Result<Option<(AnyPtr, Route)>> {
    let found: RefCell<Option<(AnyPtr, Route)>> = RefCell::new(None);
    scan_universe_pointers(|ptr, route| {
        if pred(ptr, route) {
            *found.borrow_mut() = Some((ptr, route.clone()));
            Ok(ScanFlow::Stop)
        } else {
            Ok(ScanFlow::Continue)
        }
    })?;
    Ok(found.into_inner())
}

pub fn find_reference(mut pred: impl FnMut(&AnyRef, &Route) -> bool) -> Result<Option<(AnyRef, Route)>> {
    let found: RefCell<Option<(AnyRef, Route)>> = RefCell::new(None);
    scan_universe_references(|r, route| {
        if pred(r, route) {
            *found.borrow_mut() = Some((r.clone(), route.clone()));
            Ok(ScanFlow::Stop)
        } else {
            Ok(ScanFlow::Continue)
        }
    })?;
    Ok(found.into_inner())
}

/// Adapter tracking whether a nested `scan_pointers`/`scan_references` call
/// was asked to stop, since those return `Result<()>` rather than
/// `Result<ScanFlow>` at their public boundary.
fn run_until_stop(
    runner: impl FnOnce(&mut dyn FnMut(AnyPtr, &Route) -> Result<ScanFlow>) -> Result<()>,
    visit: &mut dyn FnMut(AnyPtr, &Route) -> Result<ScanFlow>,
) -> Result<ScanFlow> {
    let stopped = Cell::new(false);
    runner(&mut |ptr, route| {
        let flow = visit(ptr, route)?;
        if flow == ScanFlow::Stop {
            stopped.set(true);
        }
        Ok(flow)
    })?;
    Ok(if stopped.get() { ScanFlow::Stop } else { ScanFlow::Continue })
}

fn run_until_stop_ref(
    runner: impl FnOnce(&mut dyn FnMut(&AnyRef, &Route) -> Result<ScanFlow>) -> Result<()>,
    visit: &mut dyn FnMut(&AnyRef, &Route) -> Result<ScanFlow>,
) -> Result<ScanFlow> {
    let stopped = Cell::new(false);
    runner(&mut |r, route| {
        let flow = visit(r, route)?;
        if flow == ScanFlow::Stop {
            stopped.set(true);
        }
        Ok(flow)
    })?;
    Ok(if stopped.get() { ScanFlow::Stop } else { ScanFlow::Continue })
}

/// Which public entry point is driving [`scan_node`]: pointer scans and
/// reference scans share the same walk but differ in exactly the two ways
/// spec.md §4.11 calls out — whether unaddressable nodes/subtrees are
/// skipped, and whether `NoRefsToChildren` prunes descent at all (reference
/// scans never prune on it; only pointer scans do).
#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanKind {
    Pointers,
    References,
}

fn scan_node(trav: &Traversal, kind: ScanKind, visit: &mut dyn FnMut(&Traversal) -> Result<ScanFlow>) -> Result<ScanFlow> {
    let visitable = match kind {
        // "skip unaddressable items" (spec.md §4.11).
        ScanKind::Pointers => trav.caps().contains(Caps::ADDRESS),
        ScanKind::References => true,
    };
    if visitable && visit(trav)? == ScanFlow::Stop {
        return Ok(ScanFlow::Stop);
    }
    let desc = match trav.ty().description() {
        Some(d) => d,
        None => return Ok(ScanFlow::Continue),
    };
    if kind == ScanKind::Pointers {
        // `NoRefsToChildren` only prunes pointer scans (spec.md §1/§4.11);
        // reference scans walk every sub-item regardless.
        if !desc.has_refs_to_children() {
            return Ok(ScanFlow::Continue);
        }
        // "...and the descendants of items lacking `AddressChildren`"
        // (spec.md §4.11) — once a pointer scan can no longer trust that
        // deeper addresses are real/stable, stop descending.
        if !trav.caps().contains(Caps::ADDRESS_CHILDREN) {
            return Ok(ScanFlow::Continue);
        }
    }

    if let Some(attrs) = desc.attrs() {
        for attr in attrs {
            let flow =
                trav_attr(trav, attr.key.clone(), &attr.accessor, Mode::Read, |child| scan_node(child, kind, visit))?;
            if flow == ScanFlow::Stop {
                return Ok(ScanFlow::Stop);
            }
        }
    } else if let Some(kc) = desc.keys_computed() {
        let keys = trav_attr(trav, Rc::from("keys"), &kc.keys, Mode::Read, |child| {
            Ok(unsafe { child.any_ptr().downcast_ref::<Vec<String>>()?.clone() })
        })?;
        for key in &keys {
            let flow = trav_computed_attr(trav, Rc::from(key.as_str()), kc.computed_attrs.clone(), Mode::Read, |child| {
                scan_node(child, kind, visit)
            })?;
            if flow == ScanFlow::Stop {
                return Ok(ScanFlow::Stop);
            }
        }
    }

    if let Some(elems) = desc.elems() {
        for (i, elem) in elems.iter().enumerate() {
            let flow = trav_elem(trav, i as u32, &elem.accessor, Mode::Read, |child| scan_node(child, kind, visit))?;
            if flow == ScanFlow::Stop {
                return Ok(ScanFlow::Stop);
            }
        }
    } else if let Some(lc) = desc.length_computed() {
        let len = trav_attr(trav, Rc::from("length"), &lc.length, Mode::Read, |child| {
            Ok(unsafe { *child.any_ptr().downcast_ref::<u32>()? })
        })?;
        for i in 0..len {
            let flow = trav_computed_elem(trav, i, lc.computed_elems.clone(), Mode::Read, |child| {
                scan_node(child, kind, visit)
            })?;
            if flow == ScanFlow::Stop {
                return Ok(ScanFlow::Stop);
            }
        }
    } else if let Some(lc) = desc.length_contiguous() {
        let len = trav_attr(trav, Rc::from("length"), &lc.length, Mode::Read, |child| {
            Ok(unsafe { *child.any_ptr().downcast_ref::<u32>()? })
        })?;
        for i in 0..len {
            let flow = trav_contiguous_elem(trav, i, lc.contiguous_elems.clone(), Mode::Read, |child| {
                scan_node(child, kind, visit)
            })?;
            if flow == ScanFlow::Stop {
                return Ok(ScanFlow::Stop);
            }
        }
    }

    if let Some(del) = desc.delegate() {
        let flow = trav_delegate(trav, del, Mode::Read, |child| scan_node(child, kind, visit))?;
        if flow == ScanFlow::Stop {
            return Ok(ScanFlow::Stop);
        }
    }

    Ok(ScanFlow::Continue)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{attr as mk_attr, AttrFlags};
    use crate::accessor::Accessor;
    use crate::reference::AnyPtr as APtr;
    use crate::ty::{Describe, Type};

    #[derive(Default)]
    struct Leaf {
        tag: i32,
    }
    crate::describe!(Leaf, "scan::Leaf", |b| b.default_constructible().attrs(vec![mk_attr(
        "tag",
        Accessor::member::<Leaf, i32>(Type::of::<i32>(), |l| &mut l.tag),
        AttrFlags::empty(),
        None
    )]));

    #[derive(Default)]
    struct Branch {
        left: Leaf,
        right: Leaf,
    }
    crate::describe!(Branch, "scan::Branch", |b| b.default_constructible().attrs(vec![
        mk_attr("left", Accessor::member::<Branch, Leaf>(Type::of::<Leaf>(), |x| &mut x.left), AttrFlags::empty(), None),
        mk_attr("right", Accessor::member::<Branch, Leaf>(Type::of::<Leaf>(), |x| &mut x.right), AttrFlags::empty(), None),
    ]));

    #[test]
    fn scan_pointers_visits_every_node_once() {
        let mut b = Branch { left: Leaf { tag: 1 }, right: Leaf { tag: 2 } };
        let r = AnyRef::bare(APtr::of(&mut b));
        let mut tags = Vec::new();
        scan_pointers(&r, |ptr, _route| {
            if ptr.ty() == Type::of::<i32>() {
                tags.push(unsafe { *ptr.downcast_ref::<i32>().unwrap() });
            }
            Ok(ScanFlow::Continue)
        })
        .unwrap();
        assert_eq!(tags, vec![1, 2]);
    }

    #[test]
    fn nested_scan_raises_scan_while_scanning() {
        let mut b = Branch { left: Leaf { tag: 1 }, right: Leaf { tag: 2 } };
        let r = AnyRef::bare(APtr::of(&mut b));
        let err = scan_pointers(&r, |_ptr, _route| {
            let inner = scan_pointers(&r, |_, _| Ok(ScanFlow::Continue));
            assert!(inner.is_err());
            assert_eq!(inner.unwrap_err().kind(), ErrorKind::ScanWhileScanning);
            Ok(ScanFlow::Stop)
        });
        assert!(err.is_ok());
    }
}
