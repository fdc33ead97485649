//! Deserialization: `item_from_tree`, plus the swizzle/init
//! scheduling context and the claim-list algorithm for `attrs`
//! with `Include`.
//!
//! The swizzle/init context is a thread-local stack rather than a value
//! threaded through every call, mirroring how [`crate::route`]'s
//! `current_base_route` is modeled: both are "per-top-level-call state"
//! that every nested `from_tree_node` call needs to reach without a
//! parameter on every recursive signature — a stack-discipline slot, used
//! here for a queue instead of a single value.

use crate::accessor::Mode;
use crate::describe::{AttrDesc, AttrFlags, ElemDesc, KeysComputedAttrs, LengthComputedElems, LengthContiguousElems};
use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::AnyRef;
use crate::route::Route;
use crate::traversal::{
    trav_attr, trav_computed_attr, trav_computed_elem, trav_contiguous_elem, trav_delegate, trav_elem,
    trav_start, Traversal,
};
use crate::tree::{Form, Tree};
use bitflags::bitflags;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

bitflags! {
    /// Per-call options for [`item_from_tree_opts`].
    pub struct FromTreeOptions: u8 {
        /// Defer this call's swizzle/init ops to the enclosing
        /// [`item_from_tree`] call's context instead of starting (and
        /// draining) a fresh one.
        const DELAY_SWIZZLE = 0b01;
    }
}

struct QueuedSwizzle {
    f: Rc<dyn Fn(*mut u8, &Tree) -> Result<()>>,
    addr: *mut u8,
    tree: Tree,
    route: Route,
}

struct QueuedInit {
    priority: i32,
    f: Rc<dyn Fn(*mut u8) -> Result<()>>,
    addr: *mut u8,
    route: Route,
}

#[derive(Default)]
struct FromTreeContext {
    swizzle_ops: VecDeque<QueuedSwizzle>,
    init_ops: Vec<QueuedInit>,
}

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<FromTreeContext>> = RefCell::new(Vec::new());
}

fn base_route_for(trav: &Traversal) -> Route {
    crate::route::current_base_route().unwrap_or_else(|| Route::reference(trav.root_any_ref()))
}

fn enqueue_swizzle(trav: &Traversal, f: Rc<dyn Fn(*mut u8, &Tree) -> Result<()>>, tree: Tree) {
    let route = trav.route(&base_route_for(trav));
    CONTEXT_STACK.with(|s| {
        if let Some(ctx) = s.borrow_mut().last_mut() {
            ctx.swizzle_ops.push_back(QueuedSwizzle { f, addr: trav.addr(), tree, route });
        }
    });
}

fn enqueue_init(trav: &Traversal, priority: i32, f: Rc<dyn Fn(*mut u8) -> Result<()>>) {
    let route = trav.route(&base_route_for(trav));
    CONTEXT_STACK.with(|s| {
        if let Some(ctx) = s.borrow_mut().last_mut() {
            ctx.init_ops.push(QueuedInit { priority, f, addr: trav.addr(), route });
        }
    });
}

/// Fully drain both queues, including ops added while draining (spec
/// §4.8): all pending `swizzle_ops` run FIFO, then the single
/// highest-priority pending `init_ops` entry runs (ties broken by
/// insertion order), repeating until both queues are empty.
fn drain_context() -> Result<()> {
    loop {
        loop {
            let next = CONTEXT_STACK.with(|s| s.borrow_mut().last_mut().and_then(|c| c.swizzle_ops.pop_front()));
            match next {
                Some(op) => (op.f)(op.addr, &op.tree).map_err(|e| e.with_route_if_missing(|| op.route.clone()))?,
                None => break,
            }
        }
        let next_init = CONTEXT_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            let ctx = stack.last_mut()?;
            if ctx.init_ops.is_empty() {
                return None;
            }
            let mut best = 0usize;
            for i in 1..ctx.init_ops.len() {
                if ctx.init_ops[i].priority > ctx.init_ops[best].priority {
                    best = i;
                }
            }
            Some(ctx.init_ops.remove(best))
        });
        match next_init {
            Some(op) => (op.f)(op.addr).map_err(|e| e.with_route_if_missing(|| op.route.clone()))?,
            None => break,
        }
    }
    Ok(())
}

/// Deserialize `tree` into `r`. Equivalent to
/// `item_from_tree_opts(r, tree, FromTreeOptions::empty())`.
pub fn item_from_tree(r: &AnyRef, tree: &Tree) -> Result<()> {
    item_from_tree_opts(r, tree, FromTreeOptions::empty())
}

pub fn item_from_tree_opts(r: &AnyRef, tree: &Tree, opts: FromTreeOptions) -> Result<()> {
    let has_parent_context = CONTEXT_STACK.with(|s| !s.borrow().is_empty());
    if opts.contains(FromTreeOptions::DELAY_SWIZZLE) && has_parent_context {
        return trav_start(r, Mode::Write, |trav| from_tree_node(trav, tree));
    }
    CONTEXT_STACK.with(|s| s.borrow_mut().push(FromTreeContext::default()));
    let result = trav_start(r, Mode::Write, |trav| from_tree_node(trav, tree)).and_then(|_| drain_context());
    CONTEXT_STACK.with(|s| {
        s.borrow_mut().pop();
    });
    result
}

fn from_tree_node(trav: &Traversal, tree: &Tree) -> Result<()> {
    if tree.form() == Form::Undefined {
        return Err(AyuError::new(ErrorKind::FromTreeFormRejected, "cannot deserialize an Undefined tree"));
    }
    let desc = trav
        .ty()
        .description()
        .ok_or_else(|| AyuError::new(ErrorKind::General, "item has no static type description"))?;

    if let Some(f) = &desc.before_from_tree {
        f(trav.addr())?;
    }

    if let Some(f) = &desc.from_tree {
        f(trav.addr(), tree)?;
    } else if let Some(entry) = desc.values().iter().find(|e| &e.tree == tree) {
        (entry.assign)(trav.addr());
    } else {
        match tree.form() {
            Form::Object => {
                if let Some(kc) = desc.keys_computed() {
                    from_tree_keys_computed(trav, kc, tree)?;
                } else if let Some(attrs) = desc.attrs() {
                    from_tree_attrs_root(trav, attrs, tree)?;
                } else if let Some(del) = desc.delegate() {
                    trav_delegate(trav, del, Mode::Write, |child| from_tree_node(child, tree))?;
                } else {
                    return Err(AyuError::new(
                        ErrorKind::FromTreeNotSupported,
                        format!("{} has no attrs/keys facet for an object tree", desc.name()),
                    ));
                }
            }
            Form::Array => {
                if let Some(elems) = desc.elems() {
                    from_tree_elems(trav, elems, tree)?;
                } else if let Some(lc) = desc.length_computed() {
                    from_tree_length_computed(trav, lc, tree)?;
                } else if let Some(lc) = desc.length_contiguous() {
                    from_tree_length_contiguous(trav, lc, tree)?;
                } else if let Some(del) = desc.delegate() {
                    trav_delegate(trav, del, Mode::Write, |child| from_tree_node(child, tree))?;
                } else {
                    return Err(AyuError::new(
                        ErrorKind::FromTreeNotSupported,
                        format!("{} has no elems/length facet for an array tree", desc.name()),
                    ));
                }
            }
            _ => {
                if let Some(del) = desc.delegate() {
                    trav_delegate(trav, del, Mode::Write, |child| from_tree_node(child, tree))?;
                } else if desc.swizzle.is_none() && desc.init.is_none() {
                    return Err(AyuError::new(
                        ErrorKind::FromTreeNotSupported,
                        format!("{} cannot deserialize a {} tree", desc.name(), tree.form()),
                    ));
                }
            }
        }
    }

    if let Some(f) = &desc.swizzle {
        enqueue_swizzle(trav, f.clone(), tree.clone());
    }
    if let Some((priority, f)) = &desc.init {
        enqueue_init(trav, *priority, f.clone());
    }
    Ok(())
}

fn from_tree_keys_computed(trav: &Traversal, kc: &KeysComputedAttrs, tree: &Tree) -> Result<()> {
    let obj = tree.as_object()?;
    let keys: Vec<String> = obj.keys().map(|k| k.to_string()).collect();
    trav_attr(trav, Rc::from("keys"), &kc.keys, Mode::Write, |child| {
        unsafe {
            *child.any_ptr().downcast_mut::<Vec<String>>()? = keys.clone();
        }
        Ok(())
    })?;
    for (k, v) in obj.iter() {
        trav_computed_attr(trav, Rc::from(k.as_ref()), kc.computed_attrs.clone(), Mode::Write, |child| {
            from_tree_node(child, v)
        })?;
    }
    Ok(())
}

/// Entry point for the claim-list algorithm: build the shared
/// claimed-index table once, walk the declared attrs, then reject any
/// entry nobody claimed.
fn from_tree_attrs_root(trav: &Traversal, attrs: &[AttrDesc], tree: &Tree) -> Result<()> {
    let obj = tree.as_object()?;
    let mut claimed = vec![false; obj.len()];
    claim_attrs(trav, attrs, obj, &mut claimed)?;
    if let Some((k, _)) = obj.iter().enumerate().find(|(i, _)| !claimed[*i]).map(|(_, kv)| kv) {
        return Err(AyuError::new(ErrorKind::AttrRejected, format!("unexpected key {:?}", k)));
    }
    Ok(())
}

fn claim_attrs(
    trav: &Traversal,
    attrs: &[AttrDesc],
    obj: &IndexMap<Rc<str>, Tree>,
    claimed: &mut [bool],
) -> Result<()> {
    for attr in attrs {
        if attr.flags.contains(AttrFlags::IGNORED) {
            continue;
        }
        let found = obj
            .iter()
            .enumerate()
            .position(|(i, (k, _))| !claimed[i] && k.as_ref() == attr.key.as_ref());
        if let Some(i) = found {
            claimed[i] = true;
            let (_, value) = obj.get_index(i).expect("index just located by position()");
            let value_to_use = if attr.flags.contains(AttrFlags::COLLAPSE_OPTIONAL) {
                Tree::array(vec![value.clone()])
            } else {
                value.clone()
            };
            trav_attr(trav, attr.key.clone(), &attr.accessor, Mode::Write, |child| {
                from_tree_node(child, &value_to_use)
            })?;
        } else if attr.flags.contains(AttrFlags::INCLUDE) {
            trav_attr(trav, attr.key.clone(), &attr.accessor, Mode::Write, |child| {
                claim_include(child, obj, claimed)
            })?;
        } else if attr.flags.contains(AttrFlags::OPTIONAL) {
            if let Some(default) = &attr.default {
                trav_attr(trav, attr.key.clone(), &attr.accessor, Mode::Write, |child| {
                    from_tree_node(child, default)
                })?;
            }
        } else if let Some(default) = &attr.default {
            trav_attr(trav, attr.key.clone(), &attr.accessor, Mode::Write, |child| from_tree_node(child, default))?;
        } else {
            return Err(AyuError::new(ErrorKind::AttrMissing, format!("missing required attr {:?}", attr.key)));
        }
    }
    Ok(())
}

/// The child side of an `Include` attr: the child must itself be
/// `attrs`-shaped, and claims a subset of the *same* object's remaining
/// entries by recursing into the child item with the same tree object.
fn claim_include(child: &Traversal, obj: &IndexMap<Rc<str>, Tree>, claimed: &mut [bool]) -> Result<()> {
    let desc = child
        .ty()
        .description()
        .ok_or_else(|| AyuError::new(ErrorKind::General, "Include attr child has no static type"))?;
    if let Some(f) = &desc.before_from_tree {
        f(child.addr())?;
    }
    let attrs = desc
        .attrs()
        .ok_or_else(|| AyuError::new(ErrorKind::AttrsNotSupported, format!("{} is not attrs-shaped for Include", desc.name())))?;
    claim_attrs(child, attrs, obj, claimed)?;
    if let Some(f) = &desc.swizzle {
        let whole = Tree::object(obj.iter().map(|(k, v)| (k.clone(), v.clone()))).unwrap_or_else(|_| Tree::undefined());
        enqueue_swizzle(child, f.clone(), whole);
    }
    if let Some((priority, f)) = &desc.init {
        enqueue_init(child, *priority, f.clone());
    }
    Ok(())
}

fn from_tree_elems(trav: &Traversal, elems: &[ElemDesc], tree: &Tree) -> Result<()> {
    let arr = tree.as_array()?;
    let required = elems
        .iter()
        .take_while(|e| !e.flags.intersects(AttrFlags::OPTIONAL | AttrFlags::INVISIBLE | AttrFlags::IGNORED))
        .count();
    if arr.len() < required || arr.len() > elems.len() {
        return Err(AyuError::new(
            ErrorKind::LengthRejected,
            format!("expected between {} and {} elements, got {}", required, elems.len(), arr.len()),
        ));
    }
    for (i, elem) in elems.iter().enumerate() {
        if let Some(value) = arr.get(i) {
            trav_elem(trav, i as u32, &elem.accessor, Mode::Write, |child| from_tree_node(child, value))?;
        }
    }
    Ok(())
}

fn from_tree_length_computed(trav: &Traversal, lc: &LengthComputedElems, tree: &Tree) -> Result<()> {
    let arr = tree.as_array()?;
    let n = arr.len() as u32;
    trav_attr(trav, Rc::from("length"), &lc.length, Mode::Write, |child| {
        unsafe {
            *child.any_ptr().downcast_mut::<u32>()? = n;
        }
        Ok(())
    })?;
    for (i, value) in arr.iter().enumerate() {
        trav_computed_elem(trav, i as u32, lc.computed_elems.clone(), Mode::Write, |child| {
            from_tree_node(child, value)
        })?;
    }
    Ok(())
}

fn from_tree_length_contiguous(trav: &Traversal, lc: &LengthContiguousElems, tree: &Tree) -> Result<()> {
    let arr = tree.as_array()?;
    let n = arr.len() as u32;
    trav_attr(trav, Rc::from("length"), &lc.length, Mode::Write, |child| {
        unsafe {
            *child.any_ptr().downcast_mut::<u32>()? = n;
        }
        Ok(())
    })?;
    for (i, value) in arr.iter().enumerate() {
        trav_contiguous_elem(trav, i as u32, lc.contiguous_elems.clone(), Mode::Write, |child| {
            from_tree_node(child, value)
        })?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use crate::describe::{attr as mk_attr, elem as mk_elem};
    use crate::reference::AnyPtr;
    use crate::ty::{Describe, Type};

    #[derive(Default)]
    struct MemberTest {
        a: i32,
        b: i32,
    }

    crate::describe!(MemberTest, "from_tree::MemberTest", |b| b.default_constructible().attrs(vec![
        mk_attr("a", Accessor::member::<MemberTest, i32>(Type::of::<i32>(), |p| &mut p.a), AttrFlags::empty(), None),
        mk_attr("b", Accessor::member::<MemberTest, i32>(Type::of::<i32>(), |p| &mut p.b), AttrFlags::empty(), None),
    ]));

    #[test]
    fn out_of_order_keys_accepted() {
        let tree = crate::tree::tree_from_string("{b:92 a:47}").unwrap();
        let mut m = MemberTest::default();
        let r = AnyRef::bare(AnyPtr::of(&mut m));
        item_from_tree(&r, &tree).unwrap();
        assert_eq!(m.a, 47);
        assert_eq!(m.b, 92);
    }

    #[test]
    fn missing_required_attr_raises_attr_missing() {
        let tree = crate::tree::tree_from_string("{a:16}").unwrap();
        let mut m = MemberTest::default();
        let r = AnyRef::bare(AnyPtr::of(&mut m));
        let e = item_from_tree(&r, &tree).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::AttrMissing);
    }

    #[test]
    fn extra_attr_raises_attr_rejected() {
        let tree = crate::tree::tree_from_string("{a:0 b:1 c:60}").unwrap();
        let mut m = MemberTest::default();
        let r = AnyRef::bare(AnyPtr::of(&mut m));
        let e = item_from_tree(&r, &tree).unwrap_err();
        assert_eq!(e.kind(), ErrorKind::AttrRejected);
    }

    #[derive(Default)]
    struct ElemTest(f64, f64, f64);

    crate::describe!(ElemTest, "from_tree::ElemTest", |b| b.default_constructible().elems(vec![
        mk_elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.0), AttrFlags::empty()),
        mk_elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.1), AttrFlags::empty()),
        mk_elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.2), AttrFlags::empty()),
    ]));

    #[test]
    fn too_few_elems_raises_length_rejected() {
        let tree = crate::tree::tree_from_string("[6.5 7.5]").unwrap();
        let mut e = ElemTest::default();
        let r = AnyRef::bare(AnyPtr::of(&mut e));
        let err = item_from_tree(&r, &tree).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LengthRejected);
    }

    struct SwizzleTest {
        swizzled: bool,
    }
    impl Default for SwizzleTest {
        fn default() -> Self {
            SwizzleTest { swizzled: false }
        }
    }

    crate::describe!(SwizzleTest, "from_tree::SwizzleTest", |b| b
        .default_constructible()
        .attrs(vec![])
        .swizzle(|s: &mut SwizzleTest, _tree| {
            s.swizzled = true;
            Ok(())
        }));

    #[test]
    fn swizzle_runs_after_construction() {
        let mut items: Vec<SwizzleTest> =
            (0..6).map(|_| SwizzleTest::default()).collect();
        let tree = crate::tree::tree_from_string("[{} {} {} {} {} {}]").unwrap();
        let arr = tree.as_array().unwrap();
        for (item, value) in items.iter_mut().zip(arr.iter()) {
            let r = AnyRef::bare(AnyPtr::of(item));
            item_from_tree(&r, value).unwrap();
        }
        assert!(items.iter().all(|i| i.swizzled));
    }
}
