//! Routes: an immutable, refcounted linked list describing a
//! symbolic path from some root down through a sequence of keys/indices to
//! a sub-item, plus conversion to/from its IRI grammar.
//!
//! Like [`crate::accessor::Accessor`], a `Route` is built bottom-up (each
//! step wraps its parent in an `Rc`) but walked top-down when printed —
//! the same shape a source-location chain uses to carry "where did this
//! come from" data without copying the whole path at every node.

use crate::error::{AyuError, ErrorKind, Result};
use crate::reference::AnyRef;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::cell::RefCell;
use std::fmt::{self, Display, Formatter};
use std::rc::Rc;

/// Characters that must be percent-encoded in a route key: the grammar's own
/// delimiters (`/`, `+`, `#`) plus the usual URI-unsafe set.
const ROUTE_KEY_ENCODE: &AsciiSet = &CONTROLS
    .add(b'/')
    .add(b'+')
    .add(b'#')
    .add(b'%')
    .add(b' ')
    .add(b'?')
    .add(b'"')
    .add(b'<')
    .add(b'>')
    .add(b'`');

#[derive(Debug)]
enum Step {
    /// Anchored at a named resource; `iri` is that resource's own IRI.
    Resource(Rc<str>),
    /// Anchored at an anonymous reference; serializes as `ayu-anonymous:`.
    Reference(AnyRef),
    Key(Rc<RouteInner>, Rc<str>),
    Index(Rc<RouteInner>, u32),
}

#[derive(Debug)]
struct RouteInner(Step);

/// A symbolic path. Cheap to clone; each step shares its parent
/// via `Rc` rather than copying the whole chain.
#[derive(Clone, Debug)]
pub struct Route(Rc<RouteInner>);

impl Route {
    pub fn resource(iri: impl Into<Rc<str>>) -> Route {
        Route(Rc::new(RouteInner(Step::Resource(iri.into()))))
    }

    pub fn reference(r: AnyRef) -> Route {
        Route(Rc::new(RouteInner(Step::Reference(r))))
    }

    pub fn key(&self, key: impl Into<Rc<str>>) -> Route {
        Route(Rc::new(RouteInner(Step::Key(self.0.clone(), key.into()))))
    }

    pub fn index(&self, index: u32) -> Route {
        Route(Rc::new(RouteInner(Step::Index(self.0.clone(), index))))
    }

    /// Walk from this route up to its root, yielding `(key_or_index)` steps
    /// in root-to-leaf order (reversed from the natural parent-link walk).
    fn segments(&self) -> (String, Vec<Segment>) {
        let mut segs = Vec::new();
        let mut cur = &self.0;
        let base = loop {
            match &cur.0 {
                Step::Resource(iri) => break iri.to_string(),
                Step::Reference(_) => break "ayu-anonymous:".to_string(),
                Step::Key(parent, k) => {
                    segs.push(Segment::Key(k.clone()));
                    cur = parent;
                }
                Step::Index(parent, i) => {
                    segs.push(Segment::Index(*i));
                    cur = parent;
                }
            }
        };
        segs.reverse();
        (base, segs)
    }
}

enum Segment {
    Key(Rc<str>),
    Index(u32),
}

impl Display for Route {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", route_to_iri(self))
    }
}

impl PartialEq for Route {
    fn eq(&self, other: &Self) -> bool {
        route_to_iri(self) == route_to_iri(other)
    }
}

thread_local! {
    /// `PushBaseRoute`'s RAII stack: a stack-discipline slot for the
    /// "current base" route used during to-tree/from-tree.
    static BASE_ROUTE_STACK: RefCell<Vec<Route>> = RefCell::new(Vec::new());
}

/// RAII guard that pushes `route` as the "current base" for relative IRI
/// encoding while it's alive, popping on drop. Nestable.
pub struct BaseRouteGuard {
    _private: (),
}

impl BaseRouteGuard {
    pub fn push(route: Route) -> BaseRouteGuard {
        BASE_ROUTE_STACK.with(|s| s.borrow_mut().push(route));
        BaseRouteGuard { _private: () }
    }
}

impl Drop for BaseRouteGuard {
    fn drop(&mut self) {
        BASE_ROUTE_STACK.with(|s| {
            s.borrow_mut().pop();
        });
    }
}

/// The base IRI currently in scope for relative encoding, if any.
pub fn current_base_iri() -> Option<String> {
    BASE_ROUTE_STACK.with(|s| s.borrow().last().map(route_to_iri_base_only))
}

/// The base [`Route`] currently in scope,
/// used by [`crate::to_tree`]/[`crate::from_tree`] to reconstruct routes
/// for error messages without a full graph scan.
pub fn current_base_route() -> Option<Route> {
    BASE_ROUTE_STACK.with(|s| s.borrow().last().cloned())
}

fn route_to_iri_base_only(route: &Route) -> String {
    route.segments().0
}

/// Serialize a route as its IRI string. Encodes the shortcut
/// form (`#name` for the very common "first `Key` step, then `Index(1)`"
/// shape) when it applies.
pub fn route_to_iri(route: &Route) -> String {
    let (base, segs) = route.segments();
    let mut frag = String::new();
    let mut i = 0;
    if segs.len() >= 2 {
        if let (Segment::Key(k), Segment::Index(1)) = (&segs[0], &segs[1]) {
            frag.push_str(&encode_key(k));
            i = 2;
        }
    }
    while i < segs.len() {
        match &segs[i] {
            Segment::Key(k) => {
                frag.push('/');
                frag.push_str(&encode_key(k));
            }
            Segment::Index(idx) => {
                frag.push('+');
                frag.push_str(&idx.to_string());
            }
        }
        i += 1;
    }
    format!("{}#{}", base, frag)
}

fn encode_key(k: &str) -> String {
    utf8_percent_encode(k, ROUTE_KEY_ENCODE).to_string()
}

/// Parse an IRI into a root (resource IRI or `ayu-anonymous:`) plus the
/// ordered list of `Key`/`Index` steps, without yet resolving it to a live
/// reference (that's [`crate::compound::reference_from_route`]'s job, once
/// it has a `Resource` collaborator or anonymous root `AnyRef` to start
/// from). Returns `(root_iri, steps)`.
pub fn route_from_iri(iri: &str) -> Result<(String, Vec<RouteStep>)> {
    let (base, frag) = match iri.split_once('#') {
        Some((b, f)) => (b, f),
        None => (iri, ""),
    };
    let mut steps = Vec::new();
    let mut rest = frag;

    // Shortcut: a bare leading key with no `/` or `+` prefix means
    // `/key+1`.
    if !rest.is_empty() && !rest.starts_with('/') && !rest.starts_with('+') {
        let (key, tail) = split_at_next_delim(rest);
        steps.push(RouteStep::Key(decode_key(key)?));
        steps.push(RouteStep::Index(1));
        rest = tail;
    }

    while !rest.is_empty() {
        let delim = rest.as_bytes()[0];
        rest = &rest[1..];
        match delim {
            b'/' => {
                let (key, tail) = split_at_next_delim(rest);
                steps.push(RouteStep::Key(decode_key(key)?));
                rest = tail;
            }
            b'+' => {
                let (digits, tail) = split_at_next_delim(rest);
                let idx: u32 = digits.parse().map_err(|_| {
                    AyuError::new(
                        ErrorKind::RouteIRIInvalid,
                        format!("invalid index segment {:?} in {:?}", digits, iri),
                    )
                })?;
                steps.push(RouteStep::Index(idx));
                rest = tail;
            }
            _ => {
                return Err(AyuError::new(
                    ErrorKind::RouteIRIInvalid,
                    format!("malformed route fragment in {:?}", iri),
                ))
            }
        }
    }

    Ok((base.to_string(), steps))
}

/// Split `s` right before its next unescaped `/` or `+`, whichever comes
/// first. (Percent-encoding means a literal `/`/`+` inside a key is never
/// unescaped in the raw text, so this is a plain byte scan.)
fn split_at_next_delim(s: &str) -> (&str, &str) {
    match s.find(|c| c == '/' || c == '+') {
        Some(i) => (&s[..i], &s[i..]),
        None => (s, ""),
    }
}

fn decode_key(s: &str) -> Result<String> {
    percent_decode_str(s)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .map_err(|e| AyuError::new(ErrorKind::RouteIRIInvalid, format!("invalid percent-encoding: {}", e)))
}

/// One decoded step from [`route_from_iri`], before it's been resolved
/// against a live root.
#[derive(Debug, Clone)]
pub enum RouteStep {
    Key(String),
    Index(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shortcut_expands_to_key_then_index_one() {
        let r = Route::resource("ayu-test:/").key("bar").index(1);
        assert_eq!(route_to_iri(&r), "ayu-test:/#bar");
    }

    #[test]
    fn iri_walk_matches_spec_example() {
        // #/bar+1/bu%2Fp/+33+0/3//%2B/
        let (base, steps) =
            route_from_iri("ayu-test:/#/bar+1/bu%2Fp/+33+0/3//%2B/").unwrap();
        assert_eq!(base, "ayu-test:/");
        use RouteStep::*;
        assert_eq!(
            format!("{:?}", steps),
            format!(
                "{:?}",
                vec![
                    Key("bar".into()),
                    Index(1),
                    Key("bu/p".into()),
                    Key("".into()),
                    Index(33),
                    Index(0),
                    Key("3".into()),
                    Key("".into()),
                    Key("+".into()),
                    Key("".into()),
                ]
            )
        );
    }

    #[test]
    fn keys_with_delimiters_round_trip() {
        let r = Route::resource("ayu-test:/").key("a/b+c");
        let iri = route_to_iri(&r);
        let (base, steps) = route_from_iri(&iri).unwrap();
        assert_eq!(base, "ayu-test:/");
        match &steps[0] {
            RouteStep::Key(k) => assert_eq!(k, "a/b+c"),
            _ => panic!("expected key"),
        }
    }
}
