//! ayu: runtime reflection, serialization, and reference tracking for Rust
//! values, in the same spirit as the source implementation's C++ `ayu`
//! library. A type opts in with [`describe!`], once, declaring how its
//! children (`attrs`/`elems`/computed variants) map to and from a [`Tree`]
//! — ayu's own self-describing value representation — and everything else
//! (serialization, deserialization, symbolic [`Route`]s, reference
//! scanning) falls out of that one declaration.
//!
//! ```
//! use ayu::prelude::*;
//!
//! #[derive(Default)]
//! struct Point {
//!     x: i32,
//!     y: i32,
//! }
//!
//! ayu::describe!(Point, "my_crate::Point", |b| b.default_constructible().attrs(vec![
//!     ayu::describe::attr("x", Accessor::member::<Point, i32>(Type::of::<i32>(), |p| &mut p.x), AttrFlags::empty(), None),
//!     ayu::describe::attr("y", Accessor::member::<Point, i32>(Type::of::<i32>(), |p| &mut p.y), AttrFlags::empty(), None),
//! ]));
//!
//! let mut p = Point { x: 3, y: 4 };
//! let r = AnyRef::bare(AnyPtr::of(&mut p));
//! let tree = item_to_tree(&r).unwrap();
//! assert_eq!(tree::tree_to_string(&tree), "{x:3 y:4}");
//! ```

pub mod accessor;
pub mod compound;
pub mod describe;
pub mod error;
pub mod from_tree;
pub mod reference;
pub mod registry;
pub mod route;
pub mod scan;
pub mod to_tree;
pub mod traversal;
pub mod tree;
pub mod ty;

mod describe_std;

pub use compound::{
    item_attr, item_elem, item_get_keys, item_get_length, item_maybe_attr, item_maybe_elem, item_set_keys,
    item_set_length, reference_from_route,
};
pub use error::{AyuError, ErrorKind, Result};
pub use from_tree::{item_from_tree, item_from_tree_opts, FromTreeOptions};
pub use reference::{AnyPtr, AnyRef, AnyVal};
pub use route::{route_from_iri, route_to_iri, BaseRouteGuard, Route, RouteStep};
pub use scan::{
    find_pointer, find_reference, register_scan_root, scan_pointers, scan_references, scan_resource_pointers,
    scan_resource_references, scan_universe_pointers, scan_universe_references, unregister_scan_root, KeepRouteCache,
    ScanFlow,
};
pub use to_tree::{item_to_tree, item_to_tree_opts, ToTreeOptions};
pub use tree::{tree_from_string, tree_to_string, Form, Tree, TreeFlags};
pub use ty::{Describe, Type};

/// Re-exports enough of the crate to write one `describe!` block without
/// hunting through modules, instead of reaching into each submodule by
/// hand.
pub mod prelude {
    pub use crate::accessor::{Accessor, Caps, Mode};
    pub use crate::describe::{attr, elem, AttrFlags, DescriptionBuilder};
    pub use crate::error::{AyuError, ErrorKind, Result};
    pub use crate::reference::{AnyPtr, AnyRef, AnyVal};
    pub use crate::ty::{Describe, Type};
    pub use crate::{item_from_tree, item_to_tree, tree, Tree};
}

/// Executes `$arg` only when compiled with debug assertions and the
/// `AYU_DEBUG` environment variable is set to `true`. The core has no
/// suspension points and does no logging on the hot path, so this is an
/// opt-in, compiles-to-nothing-in-release lever rather than a logging
/// facade.
#[macro_export]
macro_rules! ayu_debug {
    ($arg:expr) => {
        #[cfg(debug_assertions)]
        {
            if let Ok(v) = std::env::var("AYU_DEBUG") {
                if v.to_lowercase() == "true" {
                    $arg;
                }
            }
        }
    };
}
