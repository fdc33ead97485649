//! Serialization: `item_to_tree`, the algorithm that drives the
//! Traversal Engine to turn a live value into a [`Tree`].
//!
//! Strategy selection is first-match-wins:
//! `to_tree` callback, `values` table, then whichever of the object-like or
//! array-like facets the descriptor declares, then `delegate`, then failure.

use crate::accessor::Mode;
use crate::describe::{AttrFlags, Description};
use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::AnyRef;
use crate::route::Route;
use crate::traversal::{
    trav_attr, trav_computed_attr, trav_computed_elem, trav_contiguous_elem, trav_delegate, trav_elem,
    trav_start, Traversal,
};
use crate::tree::Tree;
use bitflags::bitflags;
use std::rc::Rc;

bitflags! {
    /// Per-call options for [`item_to_tree_opts`]; these plus
    /// [`crate::from_tree::FromTreeOptions`] are the core's only
    /// configuration surface.
    pub struct ToTreeOptions: u8 {
        /// Replace a failing subtree with a `Form::Error` tree instead of
        /// aborting the whole call (used by diagnostic `show()`).
        const EMBED_ERRORS = 0b01;
    }
}

/// Serialize `r` to a [`Tree`]. Equivalent to
/// `item_to_tree_opts(r, ToTreeOptions::empty())`.
pub fn item_to_tree(r: &AnyRef) -> Result<Tree> {
    item_to_tree_opts(r, ToTreeOptions::empty())
}

pub fn item_to_tree_opts(r: &AnyRef, opts: ToTreeOptions) -> Result<Tree> {
    trav_start(r, Mode::Read, |trav| to_tree_node(trav, opts))
}

fn base_route_for(trav: &Traversal) -> Route {
    crate::route::current_base_route().unwrap_or_else(|| Route::reference(trav.root_any_ref()))
}

/// Recurse into a child, honoring [`ToTreeOptions::EMBED_ERRORS`] and
/// tagging any escaping error with a route if it doesn't have one yet
/// (the `wrap_exception` route-tagging behavior, interacting with `EmbedErrors`).
fn to_tree_value(child: &Traversal, opts: ToTreeOptions) -> Result<Tree> {
    match to_tree_node(child, opts) {
        Ok(t) => Ok(t),
        Err(e) => {
            let tagged = e.with_route_if_missing(|| child.route(&base_route_for(child)));
            if opts.contains(ToTreeOptions::EMBED_ERRORS) {
                Ok(Tree::error(tagged))
            } else {
                Err(tagged)
            }
        }
    }
}

fn to_tree_node(trav: &Traversal, opts: ToTreeOptions) -> Result<Tree> {
    let desc = match trav.ty().description() {
        Some(d) => d,
        None => {
            return Err(AyuError::new(
                ErrorKind::ToTreeNotSupported,
                "item has no static type description",
            ))
        }
    };

    if let Some(f) = &desc.to_tree {
        return f(trav.addr());
    }

    for entry in desc.values() {
        if (entry.equals_current)(trav.addr()) {
            return Ok(entry.tree.clone());
        }
    }

    if let Some(attrs) = desc.attrs() {
        return to_tree_attrs(trav, attrs, opts);
    }
    if let Some(kc) = desc.keys_computed() {
        return to_tree_keys_computed(trav, kc, opts);
    }
    if let Some(elems) = desc.elems() {
        return to_tree_elems(trav, elems, opts);
    }
    if let Some(lc) = desc.length_computed() {
        return to_tree_length_computed(trav, lc, opts);
    }
    if let Some(lc) = desc.length_contiguous() {
        return to_tree_length_contiguous(trav, lc, opts);
    }
    if let Some(del) = desc.delegate() {
        return trav_delegate(trav, del, Mode::Read, |child| to_tree_value(child, opts));
    }

    Err(AyuError::new(
        ErrorKind::ToTreeNotSupported,
        format!("{} has no to_tree/values/attrs/elems/delegate facet", desc.name()),
    ))
}

fn to_tree_attrs(
    trav: &Traversal,
    attrs: &[crate::describe::AttrDesc],
    opts: ToTreeOptions,
) -> Result<Tree> {
    let mut raw: Vec<(Rc<str>, Tree, AttrFlags)> = Vec::with_capacity(attrs.len());
    for attr in attrs {
        if attr.flags.contains(AttrFlags::INVISIBLE) {
            continue;
        }
        let value = trav_attr(trav, attr.key.clone(), &attr.accessor, Mode::Read, |child| {
            to_tree_value(child, opts)
        })?;
        raw.push((attr.key.clone(), value, attr.flags));
    }

    // Second pass: apply Include/HasDefault/CollapseOptional rewrites
    //.
    let mut out: Vec<(Rc<str>, Tree)> = Vec::with_capacity(raw.len());
    for (key, mut value, flags) in raw {
        let attr = attrs.iter().find(|a| a.key == key).expect("looked up from the same list");
        if flags.contains(AttrFlags::HAS_DEFAULT) {
            if let Some(default) = &attr.default {
                if &value == default {
                    continue;
                }
            }
        }
        if flags.contains(AttrFlags::COLLAPSE_OPTIONAL) {
            let arr = value.as_array()?;
            match arr.len() {
                0 => continue,
                1 => value = arr[0].clone(),
                n => {
                    return Err(AyuError::new(
                        ErrorKind::TreeCantRepresent,
                        format!("CollapseOptional attr {:?} has {} values, expected 0 or 1", key, n),
                    ))
                }
            }
        }
        if flags.contains(AttrFlags::INCLUDE) {
            let obj = value.as_object()?;
            for (k, v) in obj.iter() {
                out.push((k.clone(), v.clone()));
            }
            continue;
        }
        out.push((key, value));
    }
    Tree::object(out)
}

fn to_tree_keys_computed(
    trav: &Traversal,
    kc: &crate::describe::KeysComputedAttrs,
    opts: ToTreeOptions,
) -> Result<Tree> {
    let keys = trav_attr(trav, Rc::from("keys"), &kc.keys, Mode::Read, |child| {
        Ok(unsafe { child.any_ptr().downcast_ref::<Vec<String>>()?.clone() })
    })?;
    let mut out = Vec::with_capacity(keys.len());
    for key in &keys {
        let value = trav_computed_attr(trav, Rc::from(key.as_str()), kc.computed_attrs.clone(), Mode::Read, |child| {
            to_tree_value(child, opts)
        })?;
        out.push((Rc::from(key.as_str()), value));
    }
    Tree::object(out)
}

fn to_tree_elems(
    trav: &Traversal,
    elems: &[crate::describe::ElemDesc],
    opts: ToTreeOptions,
) -> Result<Tree> {
    let mut effective_len = elems.len();
    while effective_len > 0 && elems[effective_len - 1].flags.contains(AttrFlags::INVISIBLE) {
        effective_len -= 1;
    }
    let mut out = Vec::with_capacity(effective_len);
    for (i, elem) in elems[..effective_len].iter().enumerate() {
        let value = trav_elem(trav, i as u32, &elem.accessor, Mode::Read, |child| to_tree_value(child, opts))?;
        // A non-trailing elem flagged INCLUDE splices its (array-valued)
        // children into the parent array (elem "Collapse").
        if elem.flags.contains(AttrFlags::INCLUDE) {
            out.extend(value.as_array()?.iter().cloned());
        } else {
            out.push(value);
        }
    }
    Ok(Tree::array(out))
}

fn to_tree_length_computed(
    trav: &Traversal,
    lc: &crate::describe::LengthComputedElems,
    opts: ToTreeOptions,
) -> Result<Tree> {
    let len = trav_attr(trav, Rc::from("length"), &lc.length, Mode::Read, |child| {
        Ok(unsafe { *child.any_ptr().downcast_ref::<u32>()? })
    })?;
    let mut out = Vec::with_capacity(len as usize);
    for i in 0..len {
        let value = trav_computed_elem(trav, i, lc.computed_elems.clone(), Mode::Read, |child| {
            to_tree_value(child, opts)
        })?;
        out.push(value);
    }
    Ok(Tree::array(out))
}

fn to_tree_length_contiguous(
    trav: &Traversal,
    lc: &crate::describe::LengthContiguousElems,
    opts: ToTreeOptions,
) -> Result<Tree> {
    let len = trav_attr(trav, Rc::from("length"), &lc.length, Mode::Read, |child| {
        Ok(unsafe { *child.any_ptr().downcast_ref::<u32>()? })
    })?;
    let mut out = Vec::with_capacity(len as usize);
    for i in 0..len {
        let value = trav_contiguous_elem(trav, i, lc.contiguous_elems.clone(), Mode::Read, |child| {
            to_tree_value(child, opts)
        })?;
        out.push(value);
    }
    Ok(Tree::array(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accessor::Accessor;
    use crate::describe::{attr as mk_attr, elem as mk_elem, AttrFlags};
    use crate::reference::AnyPtr;
    use crate::ty::{Describe, Type};

    #[derive(Default)]
    struct MemberTest {
        a: i32,
        b: i32,
    }

    crate::describe!(MemberTest, "to_tree::MemberTest", |b| b.default_constructible().attrs(vec![
        mk_attr("a", Accessor::member::<MemberTest, i32>(Type::of::<i32>(), |p| &mut p.a), AttrFlags::empty(), None),
        mk_attr("b", Accessor::member::<MemberTest, i32>(Type::of::<i32>(), |p| &mut p.b), AttrFlags::empty(), None),
    ]));

    #[test]
    fn member_test_serializes_in_declared_order() {
        let mut m = MemberTest { a: 3, b: 4 };
        let r = AnyRef::bare(AnyPtr::of(&mut m));
        let tree = item_to_tree(&r).unwrap();
        assert_eq!(crate::tree::tree_to_string(&tree), "{a:3 b:4}");
    }

    #[derive(Default)]
    struct ElemTest(f64, f64, f64);

    crate::describe!(ElemTest, "to_tree::ElemTest", |b| b.default_constructible().elems(vec![
        mk_elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.0), AttrFlags::empty()),
        mk_elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.1), AttrFlags::empty()),
        mk_elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.2), AttrFlags::empty()),
    ]));

    #[test]
    fn elem_test_serializes_in_index_order() {
        let mut e = ElemTest(0.5, 1.5, 2.5);
        let r = AnyRef::bare(AnyPtr::of(&mut e));
        let tree = item_to_tree(&r).unwrap();
        assert_eq!(crate::tree::tree_to_string(&tree), "[0.5 1.5 2.5]");
    }
}
