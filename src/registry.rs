//! The Description Registry: a process-wide, append-only, name-indexed
//! table of every [`Description`] that exists.
//!
//! The source implementation this was ported from relies on static
//! initializers running before `main` to populate a global vector, then
//! sorts it once on first lookup. [`inventory`] gives the equivalent
//! contract in Rust: every `inventory::submit!` in the program is collected
//! by the linker into one list that's fully populated before any consumer
//! can observe it, which is exactly the "every Description exists before
//! any name-based lookup runs" guarantee this registry depends on.

use crate::describe::Description;
use crate::error::{AyuError, ErrorKind, Result};
use std::sync::OnceLock;

/// One linker-collected registration. Built by the `describe!` macro; not
/// meant to be constructed directly.
pub struct Registration(pub fn() -> &'static Description);

inventory::collect!(Registration);

fn sorted_registry() -> &'static Vec<&'static Description> {
    static REGISTRY: OnceLock<Vec<&'static Description>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut all: Vec<&'static Description> =
            inventory::iter::<Registration>.into_iter().map(|r| (r.0)()).collect();
        all.sort_unstable_by_key(|d| d.name());
        all
    })
}

/// Look up a registered [`Description`] by name, e.g. `"ayu::tree::Tree"` or
/// whatever name the owning `describe!` block gave it.
pub fn find(name: &str) -> Option<&'static Description> {
    let registry = sorted_registry();
    registry
        .binary_search_by_key(&name, |d| d.name())
        .ok()
        .map(|i| registry[i])
}

/// Like [`find`], but returns an [`AyuError`] with [`ErrorKind::TypeNameNotFound`]
/// instead of `None`.
pub fn require(name: &str) -> Result<&'static Description> {
    find(name).ok_or_else(|| {
        AyuError::new(
            ErrorKind::TypeNameNotFound,
            format!("no type named {:?} is registered", name),
        )
    })
}

/// All currently-registered descriptions, sorted by name. Used by
/// [`crate::scan::scan_universe_pointers`] and friends, which need to walk
/// every known type's statics.
pub fn all() -> &'static [&'static Description] {
    sorted_registry()
}
