//! End-to-end scenarios covering to-tree/from-tree round trips, claim-list
//! rejection, IRI walking, and the cyclic-swizzle property (every sibling
//! already constructed by the time any swizzle callback runs).

use ayu::prelude::*;
use ayu::tree;
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Default)]
struct MemberTest {
    a: i32,
    b: i32,
}

ayu::describe!(MemberTest, "scenarios::MemberTest", |b| b.default_constructible().attrs(vec![
    ayu::describe::attr("a", Accessor::member::<MemberTest, i32>(Type::of::<i32>(), |p| &mut p.a), AttrFlags::empty(), None),
    ayu::describe::attr("b", Accessor::member::<MemberTest, i32>(Type::of::<i32>(), |p| &mut p.b), AttrFlags::empty(), None),
]));

#[test]
fn member_test_to_string_round_trips() {
    let mut m = MemberTest { a: 3, b: 4 };
    let r = AnyRef::bare(AnyPtr::of(&mut m));
    let tree = item_to_tree(&r).unwrap();
    assert_eq!(tree::tree_to_string(&tree), "{a:3 b:4}");

    let mut m2 = MemberTest::default();
    let r2 = AnyRef::bare(AnyPtr::of(&mut m2));
    item_from_tree(&r2, &tree::tree_from_string("{b:92 a:47}").unwrap()).unwrap();
    assert_eq!(m2.a, 47);
    assert_eq!(m2.b, 92);

    let mut m3 = MemberTest::default();
    let r3 = AnyRef::bare(AnyPtr::of(&mut m3));
    let missing = item_from_tree(&r3, &tree::tree_from_string("{a:16}").unwrap()).unwrap_err();
    assert_eq!(missing.kind(), ErrorKind::AttrMissing);

    let mut m4 = MemberTest::default();
    let r4 = AnyRef::bare(AnyPtr::of(&mut m4));
    let rejected =
        item_from_tree(&r4, &tree::tree_from_string("{a:0 b:1 c:60}").unwrap()).unwrap_err();
    assert_eq!(rejected.kind(), ErrorKind::AttrRejected);
}

#[derive(Default)]
struct ElemTest(f64, f64, f64);

ayu::describe!(ElemTest, "scenarios::ElemTest", |b| b.default_constructible().elems(vec![
    ayu::describe::elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.0), AttrFlags::empty()),
    ayu::describe::elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.1), AttrFlags::empty()),
    ayu::describe::elem(Accessor::member::<ElemTest, f64>(Type::of::<f64>(), |p| &mut p.2), AttrFlags::empty()),
]));

#[test]
fn elem_test_to_string_and_length_rejected() {
    let mut e = ElemTest(0.5, 1.5, 2.5);
    let r = AnyRef::bare(AnyPtr::of(&mut e));
    assert_eq!(tree::tree_to_string(&item_to_tree(&r).unwrap()), "[0.5 1.5 2.5]");

    let mut short = ElemTest::default();
    let r2 = AnyRef::bare(AnyPtr::of(&mut short));
    let err = item_from_tree(&r2, &tree::tree_from_string("[6.5 7.5]").unwrap()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LengthRejected);
}

#[test]
fn route_iri_walk_matches_documented_example() {
    let (base, steps) =
        ayu::route::route_from_iri("ayu-test:/#/bar+1/bu%2Fp/+33+0/3//%2B/").unwrap();
    assert_eq!(base, "ayu-test:/");
    use ayu::route::RouteStep::*;
    let expected = vec![
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
    ];
    assert_eq!(format!("{:?}", steps), format!("{:?}", expected));
}

// Two nodes whose `friend_name` fields name each other; `swizzle` resolves
// the friend by looking it up in a registry populated while the sibling
// array is still being constructed, then asserts the friend is already
// fully initialized — the "cyclic reference within one resource" scenario.

thread_local! {
    static NODE_REGISTRY: RefCell<HashMap<String, *mut Node>> = RefCell::new(HashMap::new());
}

struct Node {
    name: String,
    friend_name: String,
    friend_seen_initialized: bool,
}

impl Default for Node {
    fn default() -> Self {
        Node { name: String::new(), friend_name: String::new(), friend_seen_initialized: false }
    }
}

fn node_get_name(n: &Node) -> String {
    n.name.clone()
}

fn node_set_name(n: &mut Node, name: String) {
    let ptr = n as *mut Node;
    n.name = name.clone();
    NODE_REGISTRY.with(|r| {
        r.borrow_mut().insert(name, ptr);
    });
}

ayu::describe!(Node, "scenarios::Node", |b| b
    .default_constructible()
    .attrs(vec![
        ayu::describe::attr(
            "name",
            Accessor::value_funcs::<Node, String>(Type::of::<String>(), node_get_name, node_set_name),
            AttrFlags::empty(),
            None,
        ),
        ayu::describe::attr(
            "friend_name",
            Accessor::member::<Node, String>(Type::of::<String>(), |n| &mut n.friend_name),
            AttrFlags::empty(),
            None,
        ),
    ])
    .swizzle(|n: &mut Node, _tree| {
        let friend_ok = NODE_REGISTRY.with(|r| {
            r.borrow().get(&n.friend_name).map_or(false, |&ptr| {
                let friend = unsafe { &*ptr };
                !friend.name.is_empty()
            })
        });
        n.friend_seen_initialized = friend_ok;
        Ok(())
    }));

#[derive(Default)]
struct Graph {
    nodes: Vec<Node>,
}

ayu::describe!(Graph, "scenarios::Graph", |b| b.default_constructible().attrs(vec![
    ayu::describe::attr(
        "nodes",
        Accessor::member::<Graph, Vec<Node>>(Type::of::<Vec<Node>>(), |g| &mut g.nodes),
        AttrFlags::empty(),
        None,
    ),
]));

#[test]
fn cyclic_references_resolve_after_both_constructed() {
    NODE_REGISTRY.with(|r| r.borrow_mut().clear());

    let tree =
        tree::tree_from_string(r#"{nodes:[{name:a friend_name:b}{name:b friend_name:a}]}"#).unwrap();
    let mut g = Graph::default();
    let r = AnyRef::bare(AnyPtr::of(&mut g));
    item_from_tree(&r, &tree).unwrap();

    assert_eq!(g.nodes.len(), 2);
    assert!(g.nodes.iter().all(|n| n.friend_seen_initialized));
}
