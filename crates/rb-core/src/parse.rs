//! # Comment Parser
//!
//! Splits a comment into line segments and classifies each line:
//! `>>123` is a numbered quote (`noQuote`), `>text` is a text quote
//! (`quote`), anything else is plain. Numbered quotes also yield a
//! [`ThreadTransform`] so the board store can record the backlink on the
//! quoted post once it knows which thread is being mutated.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::{Format, Segment};

// `>>` then ASCII digits, optional trailing blanks. Anything after is ignored.
static NUMBERED_QUOTE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^>>([0-9]+)[ \t]*").expect("numbered quote pattern"));

// Exactly one leading `>` and at least one more character.
static TEXT_QUOTE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^>[^>]").expect("text quote pattern"));

/// A deferred change to the thread that owns the parsed post.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadTransform {
    /// Append `source` to the `quoted_by` list of post `target`.
    QuoteBacklink { target: u64, source: u64 },
}

/// Parses `comment`, written by post `author_no`.
///
/// Always returns one segment per `\n`-separated line, so an empty comment
/// gives a single empty segment.
pub fn parse_comment(comment: &str, author_no: u64) -> (Vec<Segment>, Vec<ThreadTransform>) {
    let mut segments = Vec::new();
    let mut transforms = Vec::new();

    for line in comment.split('\n') {
        let (segment, transform) = classify(line, author_no);
        segments.push(segment);
        transforms.extend(transform);
    }

    (segments, transforms)
}

fn classify(line: &str, author_no: u64) -> (Segment, Option<ThreadTransform>) {
    if let Some(caps) = NUMBERED_QUOTE.captures(line) {
        // Numbers past u64::MAX can't name a post; keep the format, drop the link.
        let transform = caps[1]
            .parse::<u64>()
            .ok()
            .map(|target| ThreadTransform::QuoteBacklink {
                target,
                source: author_no,
            });
        return (Segment::formatted(Format::NoQuote, line), transform);
    }

    if TEXT_QUOTE.is_match(line) {
        return (Segment::formatted(Format::Quote, line), None);
    }

    (Segment::plain(line), None)
}
