//! # Domain Models
//!
//! These structs represent the core entities of Rusty-Board: posts and the
//! threads that own them. Both are plain values; every update consumes the
//! old value and returns a rebuilt one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{AppError, Result};
use crate::parse::{parse_comment, ThreadTransform};

/// Name given to posts submitted without one.
pub const DEFAULT_NAME: &str = "Anonymous";

/// Email values that are really posting options and get moved into `meta`.
pub const META_MARKERS: [&str; 3] = ["sage", "noko", "nokosage"];

/// Attachment extensions accepted by [`Post::validate`]. Compared case-sensitively.
pub const ALLOWED_EXTENSIONS: [&str; 5] = [".png", ".jpeg", ".jpg", ".gif", ".webm"];

/// Classifier attached to a comment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Format {
    /// `>text`
    #[serde(rename = "quote")]
    Quote,
    /// `>>123`, a reference to another post by number
    #[serde(rename = "noQuote")]
    NoQuote,
}

/// One line of a comment with zero or one format classifiers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub format: Vec<Format>,
    pub segment: String,
}

impl Segment {
    pub fn plain(text: &str) -> Self {
        Self {
            format: Vec::new(),
            segment: text.to_string(),
        }
    }

    pub fn formatted(format: Format, text: &str) -> Self {
        Self {
            format: vec![format],
            segment: text.to_string(),
        }
    }
}

/// The fundamental unit of conversation.
///
/// A post starts life as a draft (built from request data) and is finalized
/// exactly once by the board store, which assigns `no` and `timestamp`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub no: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub comment: String,
    #[serde(default)]
    pub comment_segments: Vec<Segment>,
    /// URI returned by the media store
    #[serde(default)]
    pub image: String,
    /// Original name of the uploaded file
    #[serde(default)]
    pub filename: String,
    /// `sage`, `noko` or `nokosage` when the author asked for one
    #[serde(default)]
    pub meta: String,
    /// Numbers of the posts that quoted this one, in quoting order
    #[serde(default)]
    pub quoted_by: Vec<u64>,
}

impl Post {
    /// Builds a draft post. Number and timestamp are assigned on finalization.
    pub fn new(name: &str, email: &str, comment: &str) -> Self {
        Self {
            name: name.to_string(),
            email: email.to_string(),
            comment: comment.to_string(),
            ..Self::default()
        }
    }

    /// Attaches a stored image and the name the file was uploaded under.
    pub fn with_image(mut self, image: &str, filename: &str) -> Self {
        self.image = image.to_string();
        self.filename = filename.to_string();
        self
    }

    /// Store key of the post, its decimal number.
    pub fn key(&self) -> String {
        self.no.to_string()
    }

    /// Applies the finalization rules and parses the comment.
    ///
    /// Returns the finalized post and the cross-reference transforms its
    /// comment produced, to be applied to the thread being replied to.
    pub fn finalize(mut self, no: u64, now: DateTime<Utc>) -> (Post, Vec<ThreadTransform>) {
        self.no = no;

        if self.name.is_empty() {
            self.name = DEFAULT_NAME.to_string();
        }

        if META_MARKERS.contains(&self.email.as_str()) {
            self.meta = std::mem::take(&mut self.email);
        }

        self.timestamp = now;

        let (segments, transforms) = parse_comment(&self.comment, no);
        self.comment_segments = segments;
        (self, transforms)
    }

    /// Records that post `quoting_no` quoted this one.
    pub fn quoted_by(mut self, quoting_no: u64) -> Post {
        self.quoted_by.push(quoting_no);
        self
    }

    /// True when the author asked not to bump the thread.
    pub fn is_sage(&self) -> bool {
        self.meta == "sage" || self.meta == "nokosage"
    }

    /// A post needs a comment or an image, and an image must come from a
    /// file with an allowed extension.
    pub fn validate(&self) -> Result<()> {
        if self.comment.is_empty() && self.image.is_empty() {
            return Err(AppError::validation("post needs a comment or an image"));
        }

        if !self.image.is_empty() {
            let ext = extension(&self.filename);
            if !ALLOWED_EXTENSIONS.contains(&ext) {
                return Err(AppError::validation(format!(
                    "file type '{}' is not allowed",
                    self.filename
                )));
            }
        }

        Ok(())
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_ok()
    }
}

/// Returns the last extension of `path`, dot included, or "" when there is none.
/// Only the final path component is considered, so `a.b/file` has no extension.
pub fn extension(path: &str) -> &str {
    let name_start = path.rfind('/').map_or(0, |i| i + 1);
    match path[name_start..].rfind('.') {
        Some(dot) => &path[name_start + dot..],
        None => "",
    }
}

/// A Thread is its opening post plus the replies made to it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub post: Post,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub replies: Vec<Post>,
}

impl Thread {
    pub fn new(post: Post, subject: &str) -> Self {
        Self {
            post,
            subject: subject.to_string(),
            replies: Vec::new(),
        }
    }

    /// Thread identity is the number of its opening post.
    pub fn no(&self) -> u64 {
        self.post.no
    }

    pub fn key(&self) -> String {
        self.post.key()
    }

    pub fn with_reply(mut self, reply: Post) -> Thread {
        self.replies.push(reply);
        self
    }

    fn post_mut(&mut self, no: u64) -> Option<&mut Post> {
        std::iter::once(&mut self.post)
            .chain(self.replies.iter_mut())
            .find(|p| p.no == no)
    }

    /// Applies a cross-reference transform. Targets outside this thread are ignored.
    pub fn apply(mut self, transform: &ThreadTransform) -> Thread {
        match *transform {
            ThreadTransform::QuoteBacklink { target, source } => {
                let thread = self.post.no;
                match self.post_mut(target) {
                    Some(quoted) => *quoted = std::mem::take(quoted).quoted_by(source),
                    None => debug!(thread, target, source, "quote target not in thread"),
                }
            }
        }
        self
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(doc: &str) -> Result<Thread> {
        Ok(serde_json::from_str(doc)?)
    }
}
