use crate::engine::Score;
use nom::{
    branch::alt,
    bytes::complete::{is_not, tag},
    character::complete::{char, digit1, space0, space1},
    combinator::{map, map_res, opt, recognize},
    multi::many0,
    sequence::{delimited, pair, preceded},
    IResult, Parser,
};

/// A tag recognised inside a PGN comment.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedTag {
    /// `[%eval 0.17]`, in pawns from White's perspective.
    Eval(f64),
    /// `[%eval #-3]`
    Mate(i32),
    /// `[%clk 0:03:00]`
    ClkTime { hours: u32, minutes: u32, seconds: f64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommentContent {
    Tag(ParsedTag),
    Text(String),
}

/// Split a comment body into tags and free text.
pub fn parse_comments(input: &str) -> IResult<&str, Vec<CommentContent>> {
    many0(alt((
        map(tag_parser, CommentContent::Tag),
        map(text, |s: &str| CommentContent::Text(s.to_string())),
        // A bracket that does not open a known tag is kept as text.
        map(char('['), |_| CommentContent::Text("[".to_string())),
    )))
    .parse(input)
}

/// Centipawn value of the last eval tag in a parsed comment.
pub fn eval_centipawns(contents: &[CommentContent]) -> Option<i32> {
    contents.iter().rev().find_map(|content| match content {
        CommentContent::Tag(ParsedTag::Eval(pawns)) => Some((pawns * 100.0).round() as i32),
        CommentContent::Tag(ParsedTag::Mate(n)) => Some(Score::Mate(*n).centipawns()),
        _ => None,
    })
}

/// Clock value in seconds of the last clock tag in a parsed comment.
pub fn clock_seconds(contents: &[CommentContent]) -> Option<f32> {
    contents.iter().rev().find_map(|content| match content {
        CommentContent::Tag(ParsedTag::ClkTime {
            hours,
            minutes,
            seconds,
        }) => Some((*hours as f64 * 3600.0 + *minutes as f64 * 60.0 + seconds) as f32),
        _ => None,
    })
}

fn tag_parser(input: &str) -> IResult<&str, ParsedTag> {
    delimited(
        (char('['), char('%')),
        alt((
            map(
                (tag("eval"), space1, char('#'), signed_integer),
                |(_, _, _, n)| ParsedTag::Mate(n),
            ),
            map((tag("eval"), space1, signed_number), |(_, _, value)| {
                ParsedTag::Eval(value)
            }),
            map((tag("clk"), space1, time_value), |(_, _, (h, m, s))| {
                ParsedTag::ClkTime {
                    hours: h,
                    minutes: m,
                    seconds: s,
                }
            }),
        )),
        preceded(space0, char(']')),
    )
    .parse(input)
}

fn signed_integer(input: &str) -> IResult<&str, i32> {
    map_res(
        recognize(pair(opt(alt((char('+'), char('-')))), digit1)),
        |s: &str| s.trim_start_matches('+').parse::<i32>(),
    )
    .parse(input)
}

fn signed_number(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize((
            opt(alt((char('+'), char('-')))),
            digit1,
            opt(preceded(char('.'), digit1)),
        )),
        |s: &str| s.parse::<f64>(),
    )
    .parse(input)
}

fn unsigned(input: &str) -> IResult<&str, u32> {
    map_res(digit1, |s: &str| s.parse::<u32>()).parse(input)
}

fn seconds(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(pair(digit1, opt(preceded(char('.'), digit1)))),
        |s: &str| s.parse::<f64>(),
    )
    .parse(input)
}

fn time_value(input: &str) -> IResult<&str, (u32, u32, f64)> {
    map(
        (unsigned, char(':'), unsigned, char(':'), seconds),
        |(h, _, m, _, s)| (h, m, s),
    )
    .parse(input)
}

/// Text up to the next bracket.
fn text(input: &str) -> IResult<&str, &str> {
    is_not("[").parse(input)
}
