//! Accessor wrappers for the three "dynamic" facets a `Description` can
//! have instead of a plain `attrs`/`elems` list: `computed_attrs`,
//! `computed_elems`, and `contiguous_elems`. Each already
//! operates purely in terms of [`AnyPtr`], so turning one into an
//! [`Accessor`] the traversal engine can chain onto a parent path needs no
//! static Rust type for the parent at all — these correspond to the source
//! implementation's `ChainAttrFunc`/`ChainElemFunc`/`ChainDataFunc` acr
//! forms, which exist purely to adapt a one-off lookup into the regular
//! accessor shape.

use super::{Accessor, Caps, Kind};
use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::AnyPtr;
use crate::ty::Type;
use std::rc::Rc;

/// Wrap a `computed_attrs` lookup for one specific `key` into an `Accessor`
/// reaching that attribute from the parent.
pub fn computed_attr_accessor(
    parent_ty: Type,
    key: Rc<str>,
    computed_attrs: Rc<dyn Fn(AnyPtr, &str) -> Option<AnyPtr>>,
) -> Accessor {
    Accessor::erased(
        Kind::AnyPtrFunc,
        Caps::READ | Caps::WRITE | Caps::ADDRESS | Caps::ADDRESS_CHILDREN,
        Type::EMPTY,
        move |_mode, from, cb| match computed_attrs(AnyPtr::new(parent_ty, from), &key) {
            Some(child) => cb(child.addr(), child.ty()),
            None => Err(AyuError::new(ErrorKind::AttrNotFound, format!("attr {:?} not found", key))),
        },
    )
}

/// Wrap a `computed_elems` lookup for one specific `index`.
pub fn computed_elem_accessor(
    parent_ty: Type,
    index: u32,
    computed_elems: Rc<dyn Fn(AnyPtr, u32) -> Option<AnyPtr>>,
) -> Accessor {
    Accessor::erased(
        Kind::AnyPtrFunc,
        Caps::READ | Caps::WRITE | Caps::ADDRESS | Caps::ADDRESS_CHILDREN,
        Type::EMPTY,
        move |_mode, from, cb| match computed_elems(AnyPtr::new(parent_ty, from), index) {
            Some(child) => cb(child.addr(), child.ty()),
            None => Err(AyuError::new(ErrorKind::ElemNotFound, format!("elem {} not found", index))),
        },
    )
}

/// Wrap a `contiguous_elems` base-pointer lookup for one specific `index`,
/// computing `base + index * elem_type.cpp_size()`. The element type isn't
/// passed in separately: `contiguous_elems` already returns an [`AnyPtr`]
/// (element 0's address plus its `Type`), so that one call tells us both
/// the stride and the type to report for every other index.
pub fn contiguous_elem_accessor(
    parent_ty: Type,
    index: u32,
    contiguous_elems: Rc<dyn Fn(AnyPtr) -> Result<AnyPtr>>,
) -> Accessor {
    Accessor::erased(Kind::AnyPtrFunc, Caps::ALL, Type::EMPTY, move |_mode, from, cb| {
        let base = contiguous_elems(AnyPtr::new(parent_ty, from))?;
        let elem_ty = base.ty();
        let offset = index as usize * elem_ty.cpp_size();
        let addr = unsafe { base.addr().add(offset) };
        cb(addr, elem_ty)
    })
}
