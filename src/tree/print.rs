//! Printer for the ayu Tree textual syntax, the write-side
//! counterpart to [`super::parse`]. Honors the `PreferHex`/`PreferCompact`/
//! `PreferExpanded` rendering hints on each node; none of these affect
//! equality or round-trip value.

use crate::tree::{Form, Tree, TreeFlags};
use std::fmt::Write;

/// Render `tree` as ayu Tree text. Lossless for every non-`Error` form
/// modulo the integer/float origin bit.
pub fn tree_to_string(tree: &Tree) -> String {
    let mut out = String::new();
    write_tree(&mut out, tree, 0);
    out
}

fn indent(out: &mut String, depth: usize) {
    for _ in 0..depth {
        out.push_str("  ");
    }
}

fn write_tree(out: &mut String, tree: &Tree, depth: usize) {
    match tree.form() {
        Form::Undefined => out.push_str("undefined"),
        Form::Null => out.push_str("null"),
        Form::Bool => {
            out.push_str(if tree.as_bool().unwrap() { "true" } else { "false" });
        }
        Form::Number => write_number(out, tree),
        Form::String => write_string(out, tree.as_str().unwrap()),
        Form::Array => write_array(out, tree, depth),
        Form::Object => write_object(out, tree, depth),
        Form::Error => {
            let err = tree.as_error().unwrap();
            write!(out, "<error: {}>", err).ok();
        }
    }
}

fn write_number(out: &mut String, tree: &Tree) {
    if tree.flags().contains(TreeFlags::PREFER_HEX) {
        if let Ok(i) = tree.as_i64() {
            if i < 0 {
                write!(out, "-0x{:x}", -i).ok();
            } else {
                write!(out, "0x{:x}", i).ok();
            }
            return;
        }
    }
    match &tree_number_repr(tree) {
        NumberRepr::Int(i) => {
            write!(out, "{}", i).ok();
        }
        NumberRepr::Float(f) => {
            if f.is_nan() {
                out.push_str("+nan");
            } else if f.is_infinite() {
                out.push_str(if *f > 0.0 { "+inf" } else { "-inf" });
            } else {
                write!(out, "{}", f).ok();
            }
        }
    }
}

enum NumberRepr {
    Int(i64),
    Float(f64),
}

/// Recover whether this `Number` tree originated as an integer or a float,
/// so printing doesn't silently turn `3.0` into `3`.
fn tree_number_repr(tree: &Tree) -> NumberRepr {
    match tree.number_origin_is_int() {
        Some(true) => NumberRepr::Int(tree.as_i64().unwrap()),
        Some(false) => NumberRepr::Float(tree.as_f64().unwrap()),
        None => NumberRepr::Float(tree.as_f64().unwrap()),
    }
}

fn write_string(out: &mut String, s: &str) {
    if is_bare_word(s) {
        out.push_str(s);
        return;
    }
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn is_bare_word(s: &str) -> bool {
    !s.is_empty()
        && s != "null"
        && s != "true"
        && s != "false"
        && s.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-')
        && !s.chars().next().unwrap().is_ascii_digit()
}

fn write_array(out: &mut String, tree: &Tree, depth: usize) {
    let items = tree.as_array().unwrap();
    if items.is_empty() {
        out.push_str("[]");
        return;
    }
    let expanded = tree.flags().contains(TreeFlags::PREFER_EXPANDED)
        && !tree.flags().contains(TreeFlags::PREFER_COMPACT);
    out.push('[');
    for (i, item) in items.iter().enumerate() {
        if expanded {
            out.push('\n');
            indent(out, depth + 1);
        } else if i > 0 {
            out.push(' ');
        }
        write_tree(out, item, depth + 1);
    }
    if expanded {
        out.push('\n');
        indent(out, depth);
    }
    out.push(']');
}

fn write_object(out: &mut String, tree: &Tree, depth: usize) {
    let attrs = tree.as_object().unwrap();
    if attrs.is_empty() {
        out.push_str("{}");
        return;
    }
    let expanded = tree.flags().contains(TreeFlags::PREFER_EXPANDED)
        && !tree.flags().contains(TreeFlags::PREFER_COMPACT);
    out.push('{');
    for (i, (k, v)) in attrs.iter().enumerate() {
        if expanded {
            out.push('\n');
            indent(out, depth + 1);
        } else if i > 0 {
            out.push(' ');
        }
        write_string(out, k);
        out.push(':');
        write_tree(out, v, depth + 1);
    }
    if expanded {
        out.push('\n');
        indent(out, depth);
    }
    out.push('}');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::parse::tree_from_string;

    #[test]
    fn prints_member_test_shape() {
        let t = Tree::object(vec![("a", Tree::int(3)), ("b", Tree::int(4))]).unwrap();
        assert_eq!(tree_to_string(&t), "{a:3 b:4}");
    }

    #[test]
    fn prints_elem_test_shape() {
        let t = Tree::array(vec![Tree::float(0.5), Tree::float(1.5), Tree::float(2.5)]);
        assert_eq!(tree_to_string(&t), "[0.5 1.5 2.5]");
    }

    #[test]
    fn round_trips_through_parser() {
        let t = Tree::object(vec![
            ("name", Tree::string("hi there")),
            ("count", Tree::int(-7)),
        ])
        .unwrap();
        let printed = tree_to_string(&t);
        let reparsed = tree_from_string(&printed).unwrap();
        assert_eq!(t, reparsed);
    }
}
