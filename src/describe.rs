//! The `Description` record and the builder used to construct
//! one per type, plus the `describe!` macro that gives call sites the same
//! declarative shape the source implementation's `AYU_DESCRIBE` macro does.
//!
//! A `Description` is built once per `T` (memoized in a `OnceLock` inside
//! the generated `Describe::describe()`) and then lives forever as
//! `&'static`; nothing in ayu ever mutates one after it's built.

use crate::accessor::Accessor;
use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::AnyPtr;
use crate::ty::Type;
use crate::tree::Tree;
use bitflags::bitflags;
use std::rc::Rc;

bitflags! {
    /// Per-attr/per-elem flags.
    pub struct AttrFlags: u16 {
        /// Missing in the input tree is not an error; skip writing it too
        /// if the attr's value matches `default` (paired with `HAS_DEFAULT`).
        const OPTIONAL          = 0b0000_0001;
        /// This attr's own `attrs` are spliced into the parent's attr list
        /// at `to_tree`/`from_tree` time instead of nesting one level.
        const INCLUDE           = 0b0000_0010;
        /// Participates in `Type::try_upcast_to`'s search.
        const CASTABLE          = 0b0000_0100;
        /// Never appears in `to_tree` output, but still settable.
        const INVISIBLE         = 0b0000_1000;
        /// Never read or written at all; present in the descriptor purely
        /// for documentation/introspection.
        const IGNORED           = 0b0001_0000;
        /// Has a `default` `Tree` to compare/fall back to.
        const HAS_DEFAULT       = 0b0010_0000;
        /// An `Option<T>`-shaped attr collapses to its inner form instead of
        /// `[]`/`[x]` when both `OPTIONAL` and `HAS_DEFAULT` are set.
        const COLLAPSE_OPTIONAL = 0b0100_0000;
    }
}

pub struct AttrDesc {
    pub key: Rc<str>,
    pub accessor: Accessor,
    pub flags: AttrFlags,
    pub default: Option<Tree>,
}

pub struct ElemDesc {
    pub accessor: Accessor,
    pub flags: AttrFlags,
}

pub struct KeysComputedAttrs {
    pub keys: Accessor,
    pub computed_attrs: Rc<dyn Fn(AnyPtr, &str) -> Option<AnyPtr>>,
}

pub struct LengthComputedElems {
    pub length: Accessor,
    pub computed_elems: Rc<dyn Fn(AnyPtr, u32) -> Option<AnyPtr>>,
}

pub struct LengthContiguousElems {
    pub length: Accessor,
    /// Returns a pointer to element 0; the traversal engine computes each
    /// element's address as `base + index * elem_type.cpp_size()`.
    pub contiguous_elems: Rc<dyn Fn(AnyPtr) -> Result<AnyPtr>>,
}

pub struct ValueEntry {
    pub tree: Tree,
    pub equals_current: Rc<dyn Fn(*const u8) -> bool>,
    pub assign: Rc<dyn Fn(*mut u8)>,
}

bitflags! {
    struct DescFlags: u8 {
        /// This type's children can never themselves contain references or
        /// pointers, so `scan_*` can skip recursing into it entirely (spec
        /// §5.3's `NoRefsToChildren`).
        const NO_REFS_TO_CHILDREN = 0b0000_0001;
    }
}

/// Static, immutable metadata for one registered type. Always accessed
/// through `&'static Description`, obtained from [`Type`] or
/// [`crate::registry`].
pub struct Description {
    name: &'static str,
    pub(crate) size: usize,
    pub(crate) align: usize,
    pub(crate) construct: Option<unsafe fn(*mut u8)>,
    pub(crate) destroy: unsafe fn(*mut u8),
    flags: DescFlags,

    pub(crate) to_tree: Option<Rc<dyn Fn(*const u8) -> Result<Tree>>>,
    pub(crate) from_tree: Option<Rc<dyn Fn(*mut u8, &Tree) -> Result<()>>>,
    pub(crate) before_from_tree: Option<Rc<dyn Fn(*mut u8) -> Result<()>>>,
    pub(crate) swizzle: Option<Rc<dyn Fn(*mut u8, &Tree) -> Result<()>>>,
    pub(crate) init: Option<(i32, Rc<dyn Fn(*mut u8) -> Result<()>>)>,

    pub(crate) values: Vec<ValueEntry>,
    pub(crate) attrs: Option<Vec<AttrDesc>>,
    pub(crate) keys_computed: Option<KeysComputedAttrs>,
    pub(crate) elems: Option<Vec<ElemDesc>>,
    pub(crate) length_computed: Option<LengthComputedElems>,
    pub(crate) length_contiguous: Option<LengthContiguousElems>,
    pub(crate) delegate: Option<Accessor>,
}

impl Description {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn has_refs_to_children(&self) -> bool {
        !self.flags.contains(DescFlags::NO_REFS_TO_CHILDREN)
    }

    pub fn attrs(&self) -> Option<&[AttrDesc]> {
        self.attrs.as_deref()
    }

    pub fn elems(&self) -> Option<&[ElemDesc]> {
        self.elems.as_deref()
    }

    pub fn keys_computed(&self) -> Option<&KeysComputedAttrs> {
        self.keys_computed.as_ref()
    }

    pub fn length_computed(&self) -> Option<&LengthComputedElems> {
        self.length_computed.as_ref()
    }

    pub fn length_contiguous(&self) -> Option<&LengthContiguousElems> {
        self.length_contiguous.as_ref()
    }

    pub fn delegate(&self) -> Option<&Accessor> {
        self.delegate.as_ref()
    }

    pub fn values(&self) -> &[ValueEntry] {
        &self.values
    }

    /// Search `delegate` and `CASTABLE` attrs/elems for a path to `target`,
    /// adjusting `ptr` at each step.
    pub(crate) fn find_castable_path(&self, target: Type, ptr: *mut u8) -> Option<*mut u8> {
        if let Some(delegate) = &self.delegate {
            if delegate.child_type() == target {
                return unsafe { delegate.address(ptr) }.ok().map(|p| p.addr());
            }
            if let Ok(child) = unsafe { delegate.address(ptr) } {
                if let Some(desc) = child.ty().description() {
                    if let Some(found) = desc.find_castable_path(target, child.addr()) {
                        return Some(found);
                    }
                }
            }
        }
        if let Some(attrs) = &self.attrs {
            for attr in attrs {
                if !attr.flags.contains(AttrFlags::CASTABLE) {
                    continue;
                }
                if attr.accessor.child_type() == target {
                    return unsafe { attr.accessor.address(ptr) }.ok().map(|p| p.addr());
                }
            }
        }
        if let Some(elems) = &self.elems {
            for elem in elems {
                if !elem.flags.contains(AttrFlags::CASTABLE) {
                    continue;
                }
                if elem.accessor.child_type() == target {
                    return unsafe { elem.accessor.address(ptr) }.ok().map(|p| p.addr());
                }
            }
        }
        None
    }

    /// Run the once-per-description legality checks the source
    /// implementation's `descriptors.internal.h` performs while building a
    /// `Description` (e.g. `ERROR_TWO_KEYS_DESCRIPTION`,
    /// `ERROR_TWO_LENGTH_DESCRIPTION`, `ERROR_ELEMS_OPTIONAL_NOT_TRAILING`,
    /// `ERROR_NO_NAME`): at most one of {`attrs`, `keys_computed`} and at
    /// most one of {`elems`, `length_computed`, `length_contiguous`} may be
    /// set; a descriptor must have a name; and `elems` entries flagged
    /// `OPTIONAL`/`INVISIBLE`/`IGNORED` must each occupy a contiguous
    /// trailing suffix (spec.md §3.5). `length` can't appear without one of
    /// `computed_elems`/`contiguous_elems` (or vice versa) by construction —
    /// `DescriptionBuilder::length_computed`/`length_contiguous` only ever
    /// take both together, so there's no reachable state to check for it.
    /// Ayu has no compile-time reflection to run these at build time, so
    /// they run once at first construction and panic like an assertion
    /// failure would in the original, rather than returning a `Result`
    /// nobody at a `describe!` call site could sensibly handle.
    fn validate(&self) {
        assert!(!self.name.is_empty(), "a descriptor must specify a name");
        let attr_like = self.attrs.is_some() as u8 + self.keys_computed.is_some() as u8;
        assert!(attr_like <= 1, "{}: attrs and keys+computed_attrs are mutually exclusive", self.name());
        let elem_like = self.elems.is_some() as u8
            + self.length_computed.is_some() as u8
            + self.length_contiguous.is_some() as u8;
        assert!(
            elem_like <= 1,
            "{}: elems, length+computed_elems, and length+contiguous_elems are mutually exclusive",
            self.name()
        );
        if let Some(elems) = &self.elems {
            for flag in [AttrFlags::OPTIONAL, AttrFlags::INVISIBLE, AttrFlags::IGNORED] {
                assert!(
                    is_trailing_suffix(elems, flag),
                    "{}: elems flagged {:?} must occupy a contiguous trailing suffix",
                    self.name(),
                    flag
                );
            }
        }
    }
}

/// True iff every `elems` entry carrying `flag` comes after every entry
/// that doesn't — i.e. the flagged entries form one contiguous run at the
/// end of the list (spec.md §3.5's elem-flag trailing-suffix rule).
fn is_trailing_suffix(elems: &[ElemDesc], flag: AttrFlags) -> bool {
    let mut seen_flagged = false;
    for e in elems {
        if e.flags.contains(flag) {
            seen_flagged = true;
        } else if seen_flagged {
            return false;
        }
    }
    true
}

/// Builds one [`Description`]. Obtained via [`DescriptionBuilder::new`],
/// normally from inside the `describe!` macro rather than by hand.
pub struct DescriptionBuilder<T> {
    name: &'static str,
    construct: Option<unsafe fn(*mut u8)>,
    destroy: unsafe fn(*mut u8),
    no_refs_to_children: bool,
    to_tree: Option<Rc<dyn Fn(*const u8) -> Result<Tree>>>,
    from_tree: Option<Rc<dyn Fn(*mut u8, &Tree) -> Result<()>>>,
    before_from_tree: Option<Rc<dyn Fn(*mut u8) -> Result<()>>>,
    swizzle: Option<Rc<dyn Fn(*mut u8, &Tree) -> Result<()>>>,
    init: Option<(i32, Rc<dyn Fn(*mut u8) -> Result<()>>)>,
    values: Vec<ValueEntry>,
    attrs: Option<Vec<AttrDesc>>,
    keys_computed: Option<KeysComputedAttrs>,
    elems: Option<Vec<ElemDesc>>,
    length_computed: Option<LengthComputedElems>,
    length_contiguous: Option<LengthContiguousElems>,
    delegate: Option<Accessor>,
    _marker: std::marker::PhantomData<fn() -> T>,
}

unsafe fn destroy_in_place<T>(ptr: *mut u8) {
    std::ptr::drop_in_place(ptr as *mut T);
}

unsafe fn construct_default<T: Default>(ptr: *mut u8) {
    std::ptr::write(ptr as *mut T, T::default());
}

impl<T: 'static> DescriptionBuilder<T> {
    pub fn new(name: impl Into<String>) -> Self {
        DescriptionBuilder {
            name: Box::leak(name.into().into_boxed_str()),
            construct: None,
            destroy: destroy_in_place::<T>,
            no_refs_to_children: false,
            to_tree: None,
            from_tree: None,
            before_from_tree: None,
            swizzle: None,
            init: None,
            values: Vec::new(),
            attrs: None,
            keys_computed: None,
            elems: None,
            length_computed: None,
            length_contiguous: None,
            delegate: None,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn default_constructible(mut self) -> Self
    where
        T: Default,
    {
        self.construct = Some(construct_default::<T>);
        self
    }

    pub fn no_refs_to_children(mut self) -> Self {
        self.no_refs_to_children = true;
        self
    }

    pub fn to_tree(mut self, f: impl Fn(&T) -> Result<Tree> + 'static) -> Self {
        self.to_tree = Some(Rc::new(move |ptr: *const u8| f(unsafe { &*(ptr as *const T) })));
        self
    }

    pub fn from_tree(mut self, f: impl Fn(&mut T, &Tree) -> Result<()> + 'static) -> Self {
        self.from_tree = Some(Rc::new(move |ptr: *mut u8, tree: &Tree| {
            f(unsafe { &mut *(ptr as *mut T) }, tree)
        }));
        self
    }

    pub fn before_from_tree(mut self, f: impl Fn(&mut T) -> Result<()> + 'static) -> Self {
        self.before_from_tree = Some(Rc::new(move |ptr: *mut u8| {
            f(unsafe { &mut *(ptr as *mut T) })
        }));
        self
    }

    pub fn swizzle(mut self, f: impl Fn(&mut T, &Tree) -> Result<()> + 'static) -> Self {
        self.swizzle = Some(Rc::new(move |ptr: *mut u8, tree: &Tree| {
            f(unsafe { &mut *(ptr as *mut T) }, tree)
        }));
        self
    }

    pub fn init(mut self, priority: i32, f: impl Fn(&mut T) -> Result<()> + 'static) -> Self {
        self.init = Some((priority, Rc::new(move |ptr: *mut u8| {
            f(unsafe { &mut *(ptr as *mut T) })
        })));
        self
    }

    pub fn value<V: PartialEq + Clone + 'static>(mut self, tree: Tree, v: V, get: fn(&T) -> &V, set: fn(&mut T, V)) -> Self {
        let v_eq = v.clone();
        let v_set = v;
        self.values.push(ValueEntry {
            tree,
            equals_current: Rc::new(move |ptr| get(unsafe { &*(ptr as *const T) }) == &v_eq),
            assign: Rc::new(move |ptr| set(unsafe { &mut *(ptr as *mut T) }, v_set.clone())),
        });
        self
    }

    pub fn attrs(mut self, attrs: Vec<AttrDesc>) -> Self {
        self.attrs = Some(attrs);
        self
    }

    pub fn keys_computed(mut self, keys: Accessor, computed_attrs: impl Fn(AnyPtr, &str) -> Option<AnyPtr> + 'static) -> Self {
        self.keys_computed = Some(KeysComputedAttrs { keys, computed_attrs: Rc::new(computed_attrs) });
        self
    }

    pub fn elems(mut self, elems: Vec<ElemDesc>) -> Self {
        self.elems = Some(elems);
        self
    }

    pub fn length_computed(mut self, length: Accessor, computed_elems: impl Fn(AnyPtr, u32) -> Option<AnyPtr> + 'static) -> Self {
        self.length_computed = Some(LengthComputedElems { length, computed_elems: Rc::new(computed_elems) });
        self
    }

    pub fn length_contiguous(mut self, length: Accessor, contiguous_elems: impl Fn(AnyPtr) -> Result<AnyPtr> + 'static) -> Self {
        self.length_contiguous = Some(LengthContiguousElems { length, contiguous_elems: Rc::new(contiguous_elems) });
        self
    }

    pub fn delegate(mut self, acr: Accessor) -> Self {
        self.delegate = Some(acr);
        self
    }

    /// Finish building. Leaks the result to get a genuine `&'static
    /// Description`, the same tradeoff the source implementation makes by
    /// never freeing a `Description` once registered.
    pub fn build(self) -> &'static Description {
        let desc = Description {
            name: self.name,
            size: std::mem::size_of::<T>(),
            align: std::mem::align_of::<T>(),
            construct: self.construct,
            destroy: self.destroy,
            flags: if self.no_refs_to_children {
                DescFlags::NO_REFS_TO_CHILDREN
            } else {
                DescFlags::empty()
            },
            to_tree: self.to_tree,
            from_tree: self.from_tree,
            before_from_tree: self.before_from_tree,
            swizzle: self.swizzle,
            init: self.init,
            values: self.values,
            attrs: self.attrs,
            keys_computed: self.keys_computed,
            elems: self.elems,
            length_computed: self.length_computed,
            length_contiguous: self.length_contiguous,
            delegate: self.delegate,
        };
        desc.validate();
        Box::leak(Box::new(desc))
    }
}

/// Declares `impl Describe for $ty` using a `DescriptionBuilder`, and
/// registers the result with the global registry via `inventory`. Usage
/// mirrors the source implementation's `AYU_DESCRIBE(Type, ...)` macro:
///
/// ```ignore
/// describe!(Point, |b| b
///     .attrs(vec![
///         attr("x", Accessor::member(Type::of::<f64>(), |p: &mut Point| &mut p.x), AttrFlags::empty(), None),
///         attr("y", Accessor::member(Type::of::<f64>(), |p: &mut Point| &mut p.y), AttrFlags::empty(), None),
///     ]));
/// ```
#[macro_export]
macro_rules! describe {
    ($ty:ty, $name:expr, |$b:ident| $body:expr) => {
        impl $crate::ty::Describe for $ty {
            fn describe() -> &'static $crate::describe::Description {
                static CELL: ::std::sync::OnceLock<&'static $crate::describe::Description> =
                    ::std::sync::OnceLock::new();
                CELL.get_or_init(|| {
                    let $b = $crate::describe::DescriptionBuilder::<$ty>::new($name);
                    $body.build()
                })
            }
        }

        ::inventory::submit! {
            $crate::registry::Registration(<$ty as $crate::ty::Describe>::describe)
        }
    };
}

/// Convenience constructor for one [`AttrDesc`], for use inside a
/// `describe!` block's `attrs(vec![...])`.
pub fn attr(key: &str, accessor: Accessor, flags: AttrFlags, default: Option<Tree>) -> AttrDesc {
    AttrDesc { key: Rc::from(key), accessor, flags, default }
}

/// Convenience constructor for one [`ElemDesc`].
pub fn elem(accessor: Accessor, flags: AttrFlags) -> ElemDesc {
    ElemDesc { accessor, flags }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m() -> Accessor {
        Accessor::member(Type::of::<i32>(), |x: &mut i32| x)
    }

    #[test]
    #[should_panic(expected = "must specify a name")]
    fn empty_name_panics() {
        DescriptionBuilder::<i32>::new("").build();
    }

    #[test]
    #[should_panic(expected = "mutually exclusive")]
    fn attrs_and_keys_computed_together_panics() {
        DescriptionBuilder::<i32>::new("Both")
            .attrs(vec![attr("x", m(), AttrFlags::empty(), None)])
            .keys_computed(m(), |_, _| None)
            .build();
    }

    #[test]
    #[should_panic(expected = "mutually exclusive")]
    fn elems_and_length_computed_together_panics() {
        DescriptionBuilder::<i32>::new("Both")
            .elems(vec![elem(m(), AttrFlags::empty())])
            .length_computed(m(), |_, _| None)
            .build();
    }

    #[test]
    #[should_panic(expected = "contiguous trailing suffix")]
    fn non_trailing_optional_elem_panics() {
        DescriptionBuilder::<i32>::new("Gappy")
            .elems(vec![
                elem(m(), AttrFlags::OPTIONAL),
                elem(m(), AttrFlags::empty()),
            ])
            .build();
    }

    #[test]
    fn trailing_optional_elems_are_fine() {
        DescriptionBuilder::<i32>::new("Trailing")
            .elems(vec![
                elem(m(), AttrFlags::empty()),
                elem(m(), AttrFlags::OPTIONAL),
                elem(m(), AttrFlags::OPTIONAL),
            ])
            .build();
    }
}
