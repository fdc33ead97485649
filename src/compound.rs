//! Compound operations: `item_get_keys`/`set_keys`/`attr`/
//! `maybe_attr`, `item_get_length`/`set_length`/`elem`/`maybe_elem`. Each is
//! a small, self-contained traversal rooted at one [`AnyRef`], dispatching
//! on whichever facet the item's [`Description`] declares.
//!
//! Convention: a `keys` accessor (for `keys_computed` descriptors) always
//! projects to a concrete `Vec<String>` — ayu has no C++-style templates to
//! let it be generic over the caller's preferred string-collection type, so
//! this crate picks one concrete representation and documents it rather
//! than being generic over "anything iterable of strings" (see
//! `DESIGN.md`).

use crate::accessor::Mode;
use crate::describe::{AttrFlags, Description};
use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::AnyRef;
use crate::traversal::{trav_attr, trav_computed_attr, trav_computed_elem, trav_contiguous_elem, trav_elem, trav_start};
use crate::ty::Type;
use std::rc::Rc;

const MAX_LENGTH: u32 = 0x7fff_ffff;

fn require_desc(r: &AnyRef) -> Result<&'static Description> {
    let ty = r.ty();
    ty.description()
        .ok_or_else(|| AyuError::new(ErrorKind::General, "reference has no static type"))
}

/// The declared key list for an `attrs`-based item, in declared order,
/// omitting `Invisible`/`Ignored` attrs: the sequence is the static
/// declared key list filtered by visibility, independent of the item's
/// current value.
/// For `keys_computed` items, delegates to the `keys` accessor.
pub fn item_get_keys(r: &AnyRef) -> Result<Vec<Rc<str>>> {
    let desc = require_desc(r)?;
    if let Some(attrs) = desc.attrs() {
        return Ok(attrs
            .iter()
            .filter(|a| !a.flags.contains(AttrFlags::INVISIBLE) && !a.flags.contains(AttrFlags::IGNORED))
            .map(|a| a.key.clone())
            .collect());
    }
    if let Some(kc) = desc.keys_computed() {
        return trav_start(r, Mode::Read, |trav| {
            trav_attr(trav, Rc::from("keys"), &kc.keys, Mode::Read, |keys_trav| {
                let mut out = Vec::new();
                unsafe {
                    keys_trav.any_ptr().downcast_ref::<Vec<String>>()?.iter().for_each(|k| {
                        out.push(Rc::from(k.as_str()));
                    });
                }
                Ok(out)
            })
        });
    }
    Err(AyuError::new(ErrorKind::AttrsNotSupported, format!("{} has no attrs/keys", desc.name())))
}

/// Replace the key set of a `keys_computed` item. If the `keys` accessor is
/// read-only, this instead *validates* `keys` against the current required
/// set and raises [`ErrorKind::AttrMissing`]/[`ErrorKind::AttrRejected`]
/// rather than writing.
pub fn item_set_keys(r: &AnyRef, keys: &[String]) -> Result<()> {
    let desc = require_desc(r)?;
    let kc = desc
        .keys_computed()
        .ok_or_else(|| AyuError::new(ErrorKind::AttrsNotSupported, format!("{} has no keys_computed", desc.name())))?;
    if kc.keys.caps().contains(crate::accessor::Caps::WRITE) {
        return trav_start(r, Mode::Write, |trav| {
            trav_attr(trav, Rc::from("keys"), &kc.keys, Mode::Write, |keys_trav| {
                unsafe {
                    *keys_trav.any_ptr().downcast_mut::<Vec<String>>()? = keys.to_vec();
                }
                Ok(())
            })
        });
    }
    let required = item_get_keys(r)?;
    let provided: std::collections::HashSet<&str> = keys.iter().map(|s| s.as_str()).collect();
    for req in &required {
        if !provided.contains(req.as_ref()) {
            return Err(AyuError::new(ErrorKind::AttrMissing, format!("missing required key {:?}", req)));
        }
    }
    let required_set: std::collections::HashSet<&str> = required.iter().map(|s| s.as_ref()).collect();
    for given in keys {
        if !required_set.contains(given.as_str()) {
            return Err(AyuError::new(ErrorKind::AttrRejected, format!("unexpected key {:?}", given)));
        }
    }
    Ok(())
}

/// `None` on miss instead of raising [`ErrorKind::AttrNotFound`] (spec
/// §4.9).
pub fn item_maybe_attr(r: &AnyRef, key: &str) -> Result<Option<AnyRef>> {
    let desc = require_desc(r)?;
    if let Some(attrs) = desc.attrs() {
        for attr in attrs {
            if &*attr.key == key {
                return trav_start(r, Mode::Read, |trav| {
                    trav_attr(trav, attr.key.clone(), &attr.accessor, Mode::Read, |child| Ok(Some(child.to_reference())))
                });
            }
        }
        return Ok(None);
    }
    if let Some(kc) = desc.keys_computed() {
        let result = trav_start(r, Mode::Read, |trav| {
            trav_computed_attr(trav, Rc::from(key), kc.computed_attrs.clone(), Mode::Read, |child| Ok(child.to_reference()))
        });
        return match result {
            Ok(r) => Ok(Some(r)),
            Err(e) if e.kind() == ErrorKind::AttrNotFound => Ok(None),
            Err(e) => Err(e),
        };
    }
    Err(AyuError::new(ErrorKind::AttrsNotSupported, format!("{} has no attrs/keys", desc.name())))
}

pub fn item_attr(r: &AnyRef, key: &str) -> Result<AnyRef> {
    item_maybe_attr(r, key)?.ok_or_else(|| AyuError::new(ErrorKind::AttrNotFound, format!("no attr named {:?}", key)))
}

/// The dynamic length of an `elems`/`length_computed`/`length_contiguous`
/// item.
pub fn item_get_length(r: &AnyRef) -> Result<u32> {
    let desc = require_desc(r)?;
    if let Some(elems) = desc.elems() {
        return Ok(elems.len() as u32);
    }
    if let Some(lc) = desc.length_computed() {
        return read_length(r, &lc.length);
    }
    if let Some(lc) = desc.length_contiguous() {
        return read_length(r, &lc.length);
    }
    Err(AyuError::new(ErrorKind::ElemsNotSupported, format!("{} has no elems/length", desc.name())))
}

fn read_length(r: &AnyRef, length_acr: &crate::accessor::Accessor) -> Result<u32> {
    trav_start(r, Mode::Read, |trav| {
        trav_attr(trav, Rc::from("length"), length_acr, Mode::Read, |child| {
            let n = unsafe { *child.any_ptr().downcast_ref::<u32>()? };
            Ok(n)
        })
    })
}

/// Rejects lengths above `0x7fff_ffff` without mutating.
pub fn item_set_length(r: &AnyRef, n: u32) -> Result<()> {
    if n > MAX_LENGTH {
        return Err(AyuError::new(ErrorKind::LengthOverflow, format!("length {} exceeds {}", n, MAX_LENGTH)));
    }
    let desc = require_desc(r)?;
    let length_acr = if let Some(lc) = desc.length_computed() {
        &lc.length
    } else if let Some(lc) = desc.length_contiguous() {
        &lc.length
    } else {
        return Err(AyuError::new(ErrorKind::LengthRejected, format!("{} has no settable length", desc.name())));
    };
    trav_start(r, Mode::Write, |trav| {
        trav_attr(trav, Rc::from("length"), length_acr, Mode::Write, |child| {
            unsafe {
                *child.any_ptr().downcast_mut::<u32>()? = n;
            }
            Ok(())
        })
    })
}

pub fn item_maybe_elem(r: &AnyRef, index: u32) -> Result<Option<AnyRef>> {
    let desc = require_desc(r)?;
    if let Some(elems) = desc.elems() {
        return match elems.get(index as usize) {
            Some(e) => trav_start(r, Mode::Read, |trav| {
                trav_elem(trav, index, &e.accessor, Mode::Read, |child| Ok(Some(child.to_reference())))
            }),
            None => Ok(None),
        };
    }
    if let Some(lc) = desc.length_computed() {
        let len = item_get_length(r)?;
        if index >= len {
            return Ok(None);
        }
        let result = trav_start(r, Mode::Read, |trav| {
            trav_computed_elem(trav, index, lc.computed_elems.clone(), Mode::Read, |child| Ok(child.to_reference()))
        });
        return match result {
            Ok(r) => Ok(Some(r)),
            Err(e) if e.kind() == ErrorKind::ElemNotFound => Ok(None),
            Err(e) => Err(e),
        };
    }
    if let Some(lc) = desc.length_contiguous() {
        let len = item_get_length(r)?;
        if index >= len {
            return Ok(None);
        }
        return trav_start(r, Mode::Read, |trav| {
            trav_contiguous_elem(trav, index, lc.contiguous_elems.clone(), Mode::Read, |child| {
                Ok(Some(child.to_reference()))
            })
        });
    }
    Err(AyuError::new(ErrorKind::ElemsNotSupported, format!("{} has no elems/length", desc.name())))
}

pub fn item_elem(r: &AnyRef, index: u32) -> Result<AnyRef> {
    item_maybe_elem(r, index)?.ok_or_else(|| AyuError::new(ErrorKind::ElemNotFound, format!("no elem at index {}", index)))
}

/// Resolve a route IRI's key/index steps against `root` (the reverse of
/// walking a live reference down to a [`crate::route::Route`]): parse the
/// fragment with [`crate::route::route_from_iri`], then step `item_attr`/
/// `item_elem` down from `root` one segment at a time. This crate has no
/// `Resource`/`Document` registry to resolve an IRI's base against (spec's
/// Non-goals), so callers supply the already-resolved root reference rather
/// than a bare IRI string for the whole thing.
pub fn reference_from_route(root: &AnyRef, iri: &str) -> Result<AnyRef> {
    let (_base, steps) = crate::route::route_from_iri(iri)?;
    let mut current = root.clone();
    for step in steps {
        current = match step {
            crate::route::RouteStep::Key(k) => item_attr(&current, &k)?,
            crate::route::RouteStep::Index(i) => item_elem(&current, i)?,
        };
    }
    Ok(current)
}

#[cfg(test)]
mod reference_from_route_tests {
    use super::*;
    use crate::accessor::Accessor;

    #[derive(Default)]
    struct Inner {
        value: i32,
    }

    crate::describe!(Inner, "compound::rfr::Inner", |b| b.default_constructible().attrs(vec![
        crate::describe::attr(
            "value",
            Accessor::member::<Inner, i32>(Type::of::<i32>(), |p| &mut p.value),
            AttrFlags::empty(),
            None,
        ),
    ]));

    #[derive(Default)]
    struct Outer {
        items: Vec<Inner>,
    }

    crate::describe!(Outer, "compound::rfr::Outer", |b| b.default_constructible().attrs(vec![
        crate::describe::attr(
            "items",
            Accessor::member::<Outer, Vec<Inner>>(Type::of::<Vec<Inner>>(), |p| &mut p.items),
            AttrFlags::empty(),
            None,
        ),
    ]));

    #[test]
    fn walks_key_then_index() {
        let mut o = Outer { items: vec![Inner { value: 1 }, Inner { value: 42 }] };
        let root = AnyRef::bare(crate::reference::AnyPtr::of(&mut o));
        let found = reference_from_route(&root, "ayu-test:/#/items+1").unwrap();
        let value_ref = item_attr(&found, "value").unwrap();
        unsafe {
            assert_eq!(*value_ref.resolve().unwrap().downcast_ref::<i32>().unwrap(), 42);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::describe::{attr as mk_attr, elem as mk_elem};
    use crate::accessor::Accessor;
    use crate::ty::Describe;

    #[derive(Default)]
    struct Pair {
        a: i32,
        b: i32,
    }

    crate::describe!(Pair, "compound::Pair", |b| b.default_constructible().attrs(vec![
        mk_attr("a", Accessor::member::<Pair, i32>(Type::of::<i32>(), |p| &mut p.a), AttrFlags::empty(), None),
        mk_attr("b", Accessor::member::<Pair, i32>(Type::of::<i32>(), |p| &mut p.b), AttrFlags::empty(), None),
    ]));

    #[test]
    fn get_keys_returns_declared_order() {
        let mut p = Pair { a: 1, b: 2 };
        let r = AnyRef::bare(crate::reference::AnyPtr::of(&mut p));
        let keys = item_get_keys(&r).unwrap();
        assert_eq!(keys.iter().map(|k| k.as_ref()).collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn item_attr_missing_raises_attr_not_found() {
        let mut p = Pair { a: 1, b: 2 };
        let r = AnyRef::bare(crate::reference::AnyPtr::of(&mut p));
        let e = item_attr(&r, "c").unwrap_err();
        assert_eq!(e.kind(), ErrorKind::AttrNotFound);
    }

    #[derive(Default)]
    struct Triple(f64, f64, f64);

    crate::describe!(Triple, "compound::Triple", |b| b.default_constructible().elems(vec![
        mk_elem(Accessor::member::<Triple, f64>(Type::of::<f64>(), |t| &mut t.0), AttrFlags::empty()),
        mk_elem(Accessor::member::<Triple, f64>(Type::of::<f64>(), |t| &mut t.1), AttrFlags::empty()),
        mk_elem(Accessor::member::<Triple, f64>(Type::of::<f64>(), |t| &mut t.2), AttrFlags::empty()),
    ]));

    #[test]
    fn elems_length_matches_declared_count() {
        let mut t = Triple(0.5, 1.5, 2.5);
        let r = AnyRef::bare(crate::reference::AnyPtr::of(&mut t));
        assert_eq!(item_get_length(&r).unwrap(), 3);
        assert!(item_maybe_elem(&r, 5).unwrap().is_none());
    }
}
