//! Parser for the ayu Tree textual syntax: a superset of JSON
//! that additionally allows unquoted identifier-like object keys, hex
//! integer literals, `+nan`/`+inf`/`-inf`, and whitespace in place of commas.
//! This and [`super::print`] together are ayu's own lexer/printer for its
//! self-describing text representation, kept minimal but real so that
//! parsing and printing a tree round-trips.
//!
//! Structured as a recursive-descent parser: a `Parse` trait per syntactic
//! category, built out of `nom` combinators over a [`nom_locate`] span so
//! error messages can eventually point at a line/column.

use crate::error::{AyuError, ErrorKind, Result};
use crate::tree::Tree;
use nom::branch::alt;
use nom::bytes::complete::{escaped_transform, is_not, tag, take_while, take_while1};
use nom::character::complete::{char, digit1, multispace0, none_of, one_of};
use nom::combinator::{all_consuming, cut, map, map_res, opt, recognize, value};
use nom::error::{VerboseError, VerboseErrorKind};
use nom::multi::{many0, separated_list0};
use nom::sequence::{delimited, pair, preceded, tuple};
use nom::IResult;
use nom_locate::LocatedSpan;

pub(crate) type RawSpan<'a> = LocatedSpan<&'a str>;
type ParseResult<'a, T> = IResult<RawSpan<'a>, T, VerboseError<RawSpan<'a>>>;

trait Parse<'a>: Sized {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self>;
}

/// Skip whitespace and `#`-prefixed line comments. Used between every token;
/// nothing below this calls it on its own input,
/// only on the input *between* sibling tokens.
fn ws(input: RawSpan<'_>) -> ParseResult<'_, ()> {
    value(
        (),
        many0(alt((
            value((), take_while1(|c: char| c.is_whitespace())),
            value((), pair(char('#'), is_not("\n\r"))),
        ))),
    )(input)
}

fn token<'a, O>(
    mut inner: impl FnMut(RawSpan<'a>) -> ParseResult<'a, O>,
) -> impl FnMut(RawSpan<'a>) -> ParseResult<'a, O> {
    move |input| {
        let (input, _) = ws(input)?;
        inner(input)
    }
}

impl<'a> Parse<'a> for Tree {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        token(alt((
            map(tag("null"), |_| Tree::null()),
            map(tag("true"), |_| Tree::bool(true)),
            map(tag("false"), |_| Tree::bool(false)),
            NumberLit::parse,
            map(QuotedString::parse, |s| Tree::string(s.0)),
            map(ArrayLit::parse, |a| a.0),
            map(ObjectLit::parse, |o| o.0),
        )))(input)
    }
}

struct NumberLit;
impl NumberLit {
    fn parse(input: RawSpan<'_>) -> ParseResult<'_, Tree> {
        token(alt((
            map(tag("+nan"), |_| Tree::float(f64::NAN)),
            map(tag("-nan"), |_| Tree::float(f64::NAN)),
            map(tag("+inf"), |_| Tree::float(f64::INFINITY)),
            map(tag("-inf"), |_| Tree::float(f64::NEG_INFINITY)),
            Self::hex,
            Self::decimal,
        )))(input)
    }

    fn hex(input: RawSpan<'_>) -> ParseResult<'_, Tree> {
        map_res(
            recognize(tuple((
                opt(alt((char('+'), char('-')))),
                alt((tag("0x"), tag("0X"))),
                take_while1(|c: char| c.is_ascii_hexdigit()),
            ))),
            |s: RawSpan| {
                let frag = s.fragment();
                let (sign, rest) = if let Some(r) = frag.strip_prefix('-') {
                    (-1i64, r)
                } else if let Some(r) = frag.strip_prefix('+') {
                    (1i64, r)
                } else {
                    (1i64, *frag)
                };
                let digits = &rest[2..];
                i64::from_str_radix(digits, 16)
                    .map(|v| Tree::int(sign * v))
                    .map_err(|_| ())
            },
        )(input)
    }

    fn decimal(input: RawSpan<'_>) -> ParseResult<'_, Tree> {
        map_res(
            recognize(tuple((
                opt(alt((char('+'), char('-')))),
                digit1,
                opt(pair(char('.'), digit1)),
                opt(tuple((
                    alt((char('e'), char('E'))),
                    opt(alt((char('+'), char('-')))),
                    digit1,
                ))),
            ))),
            |s: RawSpan| {
                let frag = *s.fragment();
                if frag.contains('.') || frag.contains('e') || frag.contains('E') {
                    frag.parse::<f64>().map(Tree::float).map_err(|_| ())
                } else {
                    frag.parse::<i64>().map(Tree::int).map_err(|_| ())
                }
            },
        )(input)
    }
}

struct QuotedString(String);
impl<'a> Parse<'a> for QuotedString {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        token(alt((Self::quoted, Self::bare)))(input)
    }
}
impl QuotedString {
    fn quoted(input: RawSpan<'_>) -> ParseResult<'_, Self> {
        map(
            delimited(
                char('"'),
                opt(escaped_transform(
                    none_of("\\\""),
                    '\\',
                    alt((
                        value('\\', char('\\')),
                        value('"', char('"')),
                        value('\n', char('n')),
                        value('\t', char('t')),
                        value('\r', char('r')),
                    )),
                )),
                cut(char('"')),
            ),
            |s: Option<String>| QuotedString(s.unwrap_or_default()),
        )(input)
    }

    /// An unquoted identifier-like bare word, allowed for object keys and as
    /// a convenience string value.
    fn bare(input: RawSpan<'_>) -> ParseResult<'_, Self> {
        map(
            take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
            |s: RawSpan| QuotedString(s.fragment().to_string()),
        )(input)
    }
}

struct ArrayLit(Tree);
impl<'a> Parse<'a> for ArrayLit {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        map(
            delimited(
                token(char('[')),
                separated_list0(ws, Tree::parse),
                cut(token(char(']'))),
            ),
            |items| ArrayLit(Tree::array(items)),
        )(input)
    }
}

struct ObjectLit(Tree);
impl<'a> Parse<'a> for ObjectLit {
    fn parse(input: RawSpan<'a>) -> ParseResult<'a, Self> {
        let (input, pairs) = delimited(
            token(char('{')),
            separated_list0(ws, Self::pair),
            cut(token(char('}'))),
        )(input)?;
        match Tree::object(pairs) {
            Ok(tree) => Ok((input, ObjectLit(tree))),
            Err(_) => Err(nom::Err::Failure(VerboseError {
                errors: vec![(input, VerboseErrorKind::Context("duplicate key"))],
            })),
        }
    }
}
impl ObjectLit {
    fn pair(input: RawSpan<'_>) -> ParseResult<'_, (String, Tree)> {
        map(
            tuple((QuotedString::parse, token(char(':')), Tree::parse)),
            |(k, _, v)| (k.0, v),
        )(input)
    }
}

/// Parse a complete Tree textual document. `item_from_tree` callers
/// are expected to call this first and then hand the resulting [`Tree`] to
/// [`crate::traversal::from_tree::item_from_tree`].
pub fn tree_from_string(source: &str) -> Result<Tree> {
    let span = RawSpan::new(source);
    match all_consuming(delimited(ws, Tree::parse, ws))(span) {
        Ok((_, tree)) => Ok(tree),
        Err(e) => Err(AyuError::new(
            ErrorKind::ParseFailed,
            format!("{:?}", e),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_member_test_literal() {
        let t = tree_from_string("{a:3 b:4}").unwrap();
        assert_eq!(t.attr("a").unwrap().as_i64().unwrap(), 3);
        assert_eq!(t.attr("b").unwrap().as_i64().unwrap(), 4);
    }

    #[test]
    fn parses_out_of_order_keys() {
        let t = tree_from_string("{b:92 a:47}").unwrap();
        assert_eq!(t.attr("a").unwrap().as_i64().unwrap(), 47);
        assert_eq!(t.attr("b").unwrap().as_i64().unwrap(), 92);
    }

    #[test]
    fn parses_elem_test_literal() {
        let t = tree_from_string("[0.5 1.5 2.5]").unwrap();
        let arr = t.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0].as_f64().unwrap(), 0.5);
    }

    #[test]
    fn parses_hex_and_specials() {
        assert_eq!(tree_from_string("0x1F").unwrap().as_i64().unwrap(), 31);
        assert!(tree_from_string("+nan").unwrap().as_f64().unwrap().is_nan());
        assert_eq!(tree_from_string("-inf").unwrap().as_f64().unwrap(), f64::NEG_INFINITY);
    }

    #[test]
    fn rejects_duplicate_keys() {
        assert!(tree_from_string("{a:1 a:2}").is_err());
    }

    #[test]
    fn comments_are_skipped() {
        let t = tree_from_string("# leading comment\n{a:1} # trailing").unwrap();
        assert_eq!(t.attr("a").unwrap().as_i64().unwrap(), 1);
    }
}
