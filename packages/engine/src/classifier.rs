//! Feed Classifier
//!
//! Turns decoded transactions into feed items. Only content-producing methods become
//! items; housekeeping calls (metadata, follows) classify to `None` so the walker can
//! hop over them. Each item carries a `Summary` built from the rendered body, computed
//! once per transaction hash.

use std::collections::HashMap;
use std::sync::{Arc, LazyLock, RwLock};

use alloy::primitives::{Address, TxHash};
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decoder::{DecodeError, DecodedTransaction, Value};
use crate::schema::{ContentMethod, MESSAGE_PARAM, ORIGIN_AUTHOR_PARAM, ORIGIN_PARAM, PARENT_PARAM};

/// Default summary budget in characters
pub const DEFAULT_SUMMARY_LENGTH: usize = 256;

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("valid tag regex"));

static IMAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#).expect("valid image regex")
});

static VIDEO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<(?:video|iframe|source)\b[^>]*?\bsrc\s*=\s*["']([^"']+)["']"#)
        .expect("valid video regex")
});

static IMAGE_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^!\[([^\]]*)\]\(([^)\s]+)\)$").expect("valid image line regex"));

static VIDEO_LINE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@\[video\]\(([^)\s]+)\)$").expect("valid video line regex"));

/// Body after markup rendering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedBody {
    pub title: Option<String>,
    pub html: String,
}

/// Markup renderer for item bodies
pub trait BodyRenderer: Send + Sync {
    fn render_body(&self, raw: &str) -> RenderedBody;
}

/// Fallback renderer used when no markdown renderer is plugged in.
///
/// A leading `# ` line becomes the title, blank-line separated blocks become
/// paragraphs, and `![alt](url)` / `@[video](url)` lines become media elements.
#[derive(Debug, Default, Clone, Copy)]
pub struct PlainTextRenderer;

impl BodyRenderer for PlainTextRenderer {
    fn render_body(&self, raw: &str) -> RenderedBody {
        let mut text = raw.trim();
        let mut title = None;
        if let Some(rest) = text.strip_prefix("# ") {
            let (heading, body) = rest.split_once('\n').unwrap_or((rest, ""));
            title = Some(heading.trim().to_string());
            text = body.trim();
        }

        let mut html = String::new();
        for block in text.split("\n\n").map(str::trim).filter(|b| !b.is_empty()) {
            if let Some(caps) = IMAGE_LINE_RE.captures(block) {
                html.push_str(&format!(
                    "<img src=\"{}\" alt=\"{}\">",
                    escape_html(&caps[2]),
                    escape_html(&caps[1])
                ));
            } else if let Some(caps) = VIDEO_LINE_RE.captures(block) {
                html.push_str(&format!("<iframe src=\"{}\"></iframe>", escape_html(&caps[1])));
            } else {
                let lines: Vec<String> = block.lines().map(|l| escape_html(l.trim())).collect();
                html.push_str(&format!("<p>{}</p>", lines.join("<br>")));
            }
        }

        RenderedBody { title, html }
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn unescape_html(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

/// Cover media chosen for an item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cover<'a> {
    Video(&'a str),
    Image(&'a str),
}

/// Presentation data derived from an item body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub title: Option<String>,
    /// Plain text, truncated to the summary budget
    pub summary: String,
    pub html: String,
    pub images: Vec<String>,
    pub video: Option<String>,
    pub has_more_content: bool,
}

impl Summary {
    pub fn from_rendered(body: RenderedBody, budget: usize) -> Self {
        let stripped = unescape_html(&TAG_RE.replace_all(&body.html, " "));
        let plain = stripped.split_whitespace().collect::<Vec<_>>().join(" ");

        let has_more_content = plain.chars().count() > budget;
        let summary = if has_more_content {
            plain.chars().take(budget).collect::<String>().trim_end().to_string()
        } else {
            plain
        };

        let images = IMAGE_RE
            .captures_iter(&body.html)
            .map(|caps| caps[1].to_string())
            .collect();
        let video = VIDEO_RE.captures(&body.html).map(|caps| caps[1].to_string());

        Summary {
            title: body.title,
            summary,
            html: body.html,
            images,
            video,
            has_more_content,
        }
    }

    /// Video wins over images; otherwise the first image
    pub fn cover(&self) -> Option<Cover<'_>> {
        if let Some(video) = &self.video {
            return Some(Cover::Video(video));
        }
        self.images.first().map(|image| Cover::Image(image))
    }
}

/// Item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FeedKind {
    Post,
    Reply,
    Repost,
}

impl From<ContentMethod> for FeedKind {
    fn from(method: ContentMethod) -> Self {
        match method {
            ContentMethod::Post => FeedKind::Post,
            ContentMethod::Reply => FeedKind::Reply,
            ContentMethod::Repost => FeedKind::Repost,
        }
    }
}

/// A classified feed entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub transaction: DecodedTransaction,
    pub summary: Arc<Summary>,
    pub author: Address,
    pub kind: FeedKind,
    /// Replied-to transaction for replies, origin transaction for reposts
    pub parent_ref: Option<TxHash>,
    /// Author of the amplified item, for reposts
    pub repost_author: Option<Address>,
}

impl FeedItem {
    pub fn hash(&self) -> TxHash {
        self.transaction.hash
    }

    pub fn block_number(&self) -> u64 {
        self.transaction.block_number
    }
}

/// Classifier with a per-hash summary memo
pub struct FeedClassifier {
    renderer: Arc<dyn BodyRenderer>,
    summary_length: usize,
    summaries: RwLock<HashMap<TxHash, Arc<Summary>>>,
}

impl Default for FeedClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_SUMMARY_LENGTH)
    }
}

impl FeedClassifier {
    pub fn new(summary_length: usize) -> Self {
        Self::with_renderer(Arc::new(PlainTextRenderer), summary_length)
    }

    pub fn with_renderer(renderer: Arc<dyn BodyRenderer>, summary_length: usize) -> Self {
        Self {
            renderer,
            summary_length,
            summaries: RwLock::new(HashMap::new()),
        }
    }

    pub fn summary_length(&self) -> usize {
        self.summary_length
    }

    /// Classify a decoded transaction
    ///
    /// # Returns
    /// `Ok(None)` for methods that do not produce content, or an error when a content
    /// method lacks one of its required parameters.
    pub fn classify(&self, decoded: DecodedTransaction) -> Result<Option<FeedItem>, DecodeError> {
        let Some(method) = ContentMethod::from_name(&decoded.method_name) else {
            debug!(hash = %decoded.hash, method = %decoded.method_name, "Skipping non-content transaction");
            return Ok(None);
        };

        let message = required(&decoded, MESSAGE_PARAM)?
            .as_str()
            .ok_or_else(|| mismatch(MESSAGE_PARAM, "string"))?;

        let (parent_ref, repost_author) = match method {
            ContentMethod::Post => (None, None),
            ContentMethod::Reply => {
                let parent = required(&decoded, PARENT_PARAM)?
                    .as_b256()
                    .ok_or_else(|| mismatch(PARENT_PARAM, "bytes32"))?;
                (Some(parent), None)
            }
            ContentMethod::Repost => (
                decoded.param(ORIGIN_PARAM).and_then(Value::as_b256),
                decoded.param(ORIGIN_AUTHOR_PARAM).and_then(Value::as_address),
            ),
        };

        let summary = self.summary_for(decoded.hash, message);

        Ok(Some(FeedItem {
            author: decoded.from,
            kind: method.into(),
            parent_ref,
            repost_author,
            summary,
            transaction: decoded,
        }))
    }

    fn summary_for(&self, hash: TxHash, message: &str) -> Arc<Summary> {
        if let Some(summary) = self
            .summaries
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&hash)
        {
            return summary.clone();
        }

        let summary = Arc::new(Summary::from_rendered(
            self.renderer.render_body(message),
            self.summary_length,
        ));
        self.summaries
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(hash)
            .or_insert(summary)
            .clone()
    }
}

fn required<'a>(decoded: &'a DecodedTransaction, name: &str) -> Result<&'a Value, DecodeError> {
    decoded
        .param(name)
        .ok_or_else(|| DecodeError::MissingField(name.to_string()))
}

fn mismatch(field: &str, expected: &'static str) -> DecodeError {
    DecodeError::TypeMismatch {
        field: field.to_string(),
        expected,
    }
}
