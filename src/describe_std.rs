//! `Describe` impls for the handful of standard-library types every caller
//! needs before they've written a single `describe!` block of their own:
//! the primitives, `String`, and the handful of generic containers without
//! which nothing composes. These are all
//! hand-written directly against [`DescriptionBuilder`] rather than through
//! the `describe!` macro, since the macro expands to a non-generic `impl
//! $ty` and every container here is generic over its element type.
//!
//! The containers (`Option`/`Vec`/`BTreeMap`) go through `length_computed`/
//! `length_contiguous`/`keys_computed` rather than a one-shot `to_tree`/
//! `from_tree` closure, even though the latter would be less code: going
//! through the same facets a hand-written `describe!` block would use is
//! what lets [`crate::scan`] recurse into a `Vec<T>`'s elements looking for
//! references, and [`crate::compound::reference_from_route`] address into
//! one by index, the same as any other collection-shaped type.
//!
//! None of these register with [`inventory`] the way `describe!` does: the
//! global-by-name registry exists for looking up a type by
//! its ayu name from outside the program (e.g. a `Document` resolving a
//! `#type` IRI), which isn't a meaningful operation for `Vec<T>` without
//! knowing which `T` — there's no single "the registered `Vec`" to look up.
//! Each monomorphization still gets its own stable `Type` handle from the
//! `OnceLock` inside `describe()`, same as any other type; it's just never
//! reachable by name.

use crate::accessor::Accessor;
use crate::describe::{elem as mk_elem, AttrFlags, Description, DescriptionBuilder};
use crate::error::{AyuError, ErrorKind};
use crate::reference::AnyPtr;
use crate::ty::{Describe, Type};
use crate::tree::Tree;
use std::collections::BTreeMap;
use std::sync::OnceLock;

macro_rules! describe_int {
    ($($t:ty => $name:literal),* $(,)?) => {
        $(
            impl Describe for $t {
                fn describe() -> &'static Description {
                    static CELL: OnceLock<&'static Description> = OnceLock::new();
                    *CELL.get_or_init(|| {
                        DescriptionBuilder::<$t>::new($name)
                            .default_constructible()
                            .to_tree(|v| Ok(Tree::int(*v as i64)))
                            .from_tree(|v, tree| {
                                let i = tree.as_i64()?;
                                *v = <$t>::try_from(i).map_err(|_| {
                                    AyuError::new(
                                        ErrorKind::TreeCantRepresent,
                                        format!("{} does not fit in {}", i, $name),
                                    )
                                })?;
                                Ok(())
                            })
                            .build()
                    })
                }
            }
        )*
    };
}

describe_int!(
    i8 => "i8", i16 => "i16", i32 => "i32", i64 => "i64",
    u8 => "u8", u16 => "u16", u32 => "u32", u64 => "u64",
    isize => "isize", usize => "usize",
);

impl Describe for bool {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            DescriptionBuilder::<bool>::new("bool")
                .default_constructible()
                .to_tree(|v| Ok(Tree::bool(*v)))
                .from_tree(|v, tree| {
                    *v = tree.as_bool()?;
                    Ok(())
                })
                .build()
        })
    }
}

impl Describe for f32 {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            DescriptionBuilder::<f32>::new("f32")
                .default_constructible()
                .to_tree(|v| Ok(Tree::float(*v as f64)))
                .from_tree(|v, tree| {
                    *v = tree.as_f64()? as f32;
                    Ok(())
                })
                .build()
        })
    }
}

impl Describe for f64 {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            DescriptionBuilder::<f64>::new("f64")
                .default_constructible()
                .to_tree(|v| Ok(Tree::float(*v)))
                .from_tree(|v, tree| {
                    *v = tree.as_f64()?;
                    Ok(())
                })
                .build()
        })
    }
}

impl Describe for String {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            DescriptionBuilder::<String>::new("alloc::string::String")
                .default_constructible()
                .to_tree(|v| Ok(Tree::string(v.clone())))
                .from_tree(|v, tree| {
                    *v = tree.as_str()?.to_string();
                    Ok(())
                })
                .build()
        })
    }
}

/// Serializes as `[]`/`[value]` via a synthetic length of 0 or 1, the
/// same `Optional`-shaped container convention used elsewhere, rather than a one-off
/// `to_tree`/`from_tree` pair, so the one `Some` slot is still addressable
/// and scannable like any other child.
impl<T: Describe + Default> Describe for Option<T> {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            let length_acr = Accessor::value_funcs::<Option<T>, u32>(
                Type::of::<u32>(),
                |v| if v.is_some() { 1 } else { 0 },
                |v, n| *v = if n == 0 { None } else { Some(T::default()) },
            );
            DescriptionBuilder::<Option<T>>::new(format!("core::option::Option<{}>", Type::of::<T>().name()))
                .default_constructible()
                .length_computed(length_acr, |ptr: AnyPtr, index: u32| {
                    if index != 0 {
                        return None;
                    }
                    let v = unsafe { ptr.downcast_mut::<Option<T>>() }.ok()?;
                    v.as_mut().map(AnyPtr::of)
                })
                .build()
        })
    }
}

/// Serializes as a plain array. `contiguous_elems` hands the
/// traversal engine the buffer's base address once; every element address
/// after that is `base + index * size_of::<T>()`, the same contract
/// [`crate::accessor::chain::contiguous_elem_accessor`] documents.
impl<T: Describe + Default> Describe for Vec<T> {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            let length_acr = Accessor::value_funcs::<Vec<T>, u32>(
                Type::of::<u32>(),
                |v| v.len() as u32,
                |v, n| v.resize_with(n as usize, T::default),
            );
            DescriptionBuilder::<Vec<T>>::new(format!("alloc::vec::Vec<{}>", Type::of::<T>().name()))
                .default_constructible()
                .length_contiguous(length_acr, |ptr: AnyPtr| {
                    let v = unsafe { ptr.downcast_mut::<Vec<T>>() }?;
                    Ok(AnyPtr::new(Type::of::<T>(), v.as_mut_ptr() as *mut u8))
                })
                .build()
        })
    }
}

/// Delegates entirely to the boxed value: no separate `to_tree`/`from_tree`
/// needed since a `Box<T>` is never itself absent — a smart pointer with
/// guaranteed contents delegates rather than wraps.
impl<T: Describe> Describe for Box<T> {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            let acr = Accessor::ref_func::<Box<T>, T>(Type::of::<T>(), |b| &mut **b);
            DescriptionBuilder::<Box<T>>::new(format!("alloc::boxed::Box<{}>", Type::of::<T>().name()))
                .delegate(acr)
                .build()
        })
    }
}

impl<A: Describe + Default, B: Describe + Default> Describe for (A, B) {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            DescriptionBuilder::<(A, B)>::new(format!("({}, {})", Type::of::<A>().name(), Type::of::<B>().name()))
                .default_constructible()
                .elems(vec![
                    mk_elem(Accessor::member::<(A, B), A>(Type::of::<A>(), |t| &mut t.0), AttrFlags::empty()),
                    mk_elem(Accessor::member::<(A, B), B>(Type::of::<B>(), |t| &mut t.1), AttrFlags::empty()),
                ])
                .build()
        })
    }
}

/// Serializes as a plain object, `{key: value, ...}`. Rebuilding
/// the whole map on a `keys` write is simpler than trying to preserve
/// entries across a rename and matches what the source implementation's
/// `AYU_DESCRIBE` does for its own associative-container macro: a `from_tree`
/// always starts from a clean slate.
impl<V: Describe + Default> Describe for BTreeMap<String, V> {
    fn describe() -> &'static Description {
        static CELL: OnceLock<&'static Description> = OnceLock::new();
        *CELL.get_or_init(|| {
            let keys_acr = Accessor::value_funcs::<BTreeMap<String, V>, Vec<String>>(
                Type::of::<Vec<String>>(),
                |m| m.keys().cloned().collect(),
                |m, keys| {
                    let mut fresh = BTreeMap::new();
                    for k in keys {
                        fresh.insert(k, V::default());
                    }
                    *m = fresh;
                },
            );
            DescriptionBuilder::<BTreeMap<String, V>>::new(format!(
                "alloc::collections::btree::map::BTreeMap<String, {}>",
                Type::of::<V>().name()
            ))
            .default_constructible()
            .keys_computed(keys_acr, |ptr: AnyPtr, key: &str| {
                let map = unsafe { ptr.downcast_mut::<BTreeMap<String, V>>() }.ok()?;
                map.get_mut(key).map(AnyPtr::of)
            })
            .build()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::from_tree::item_from_tree;
    use crate::reference::AnyRef;
    use crate::to_tree::item_to_tree;

    #[test]
    fn primitive_round_trips() {
        let mut n = 0i32;
        let r = AnyRef::bare(AnyPtr::of(&mut n));
        item_from_tree(&r, &Tree::int(42)).unwrap();
        assert_eq!(n, 42);
        assert_eq!(item_to_tree(&r).unwrap(), Tree::int(42));
    }

    #[test]
    fn option_serializes_as_zero_or_one_array() {
        let mut none: Option<i32> = None;
        let r = AnyRef::bare(AnyPtr::of(&mut none));
        assert_eq!(item_to_tree(&r).unwrap(), Tree::array(Vec::<Tree>::new()));

        let mut some: Option<i32> = None;
        let r = AnyRef::bare(AnyPtr::of(&mut some));
        item_from_tree(&r, &Tree::array(vec![Tree::int(7)])).unwrap();
        assert_eq!(some, Some(7));
        let r = AnyRef::bare(AnyPtr::of(&mut some));
        assert_eq!(item_to_tree(&r).unwrap(), Tree::array(vec![Tree::int(7)]));
    }

    #[test]
    fn vec_round_trips_and_resizes() {
        let mut v: Vec<i32> = Vec::new();
        let r = AnyRef::bare(AnyPtr::of(&mut v));
        item_from_tree(&r, &Tree::array(vec![Tree::int(1), Tree::int(2), Tree::int(3)])).unwrap();
        assert_eq!(v, vec![1, 2, 3]);
        let r = AnyRef::bare(AnyPtr::of(&mut v));
        assert_eq!(
            item_to_tree(&r).unwrap(),
            Tree::array(vec![Tree::int(1), Tree::int(2), Tree::int(3)])
        );
    }

    #[test]
    fn vec_element_is_addressable_via_item_elem() {
        let mut v: Vec<i32> = vec![10, 20, 30];
        let r = AnyRef::bare(AnyPtr::of(&mut v));
        let elem = crate::compound::item_elem(&r, 1).unwrap();
        unsafe {
            assert_eq!(*elem.resolve().unwrap().downcast_ref::<i32>().unwrap(), 20);
        }
    }

    #[test]
    fn string_round_trips() {
        let mut s = String::new();
        let r = AnyRef::bare(AnyPtr::of(&mut s));
        item_from_tree(&r, &Tree::string("hello")).unwrap();
        assert_eq!(s, "hello");
        let r = AnyRef::bare(AnyPtr::of(&mut s));
        assert_eq!(item_to_tree(&r).unwrap(), Tree::string("hello"));
    }

    #[test]
    fn btreemap_round_trips_via_keys_computed() {
        let mut m: BTreeMap<String, i32> = BTreeMap::new();
        let tree = Tree::object(vec![("a", Tree::int(1)), ("b", Tree::int(2))]).unwrap();
        let r = AnyRef::bare(AnyPtr::of(&mut m));
        item_from_tree(&r, &tree).unwrap();
        assert_eq!(m.get("a"), Some(&1));
        assert_eq!(m.get("b"), Some(&2));
        let r = AnyRef::bare(AnyPtr::of(&mut m));
        assert_eq!(item_to_tree(&r).unwrap(), tree);
    }

    #[test]
    fn tuple_serializes_as_two_elem_array() {
        let mut t: (i32, String) = (0, String::new());
        let r = AnyRef::bare(AnyPtr::of(&mut t));
        item_from_tree(&r, &Tree::array(vec![Tree::int(5), Tree::string("hi")])).unwrap();
        assert_eq!(t, (5, "hi".to_string()));
    }
}
