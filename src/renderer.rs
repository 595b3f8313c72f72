use crate::export::{Conversation, Message, is_falsy};
use crate::sanitize::{escape_code_fence, escape_tag_marker};
use crate::utils::RenderSettings;
use chrono::{DateTime, Local, TimeZone};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde_json::Value;

/// Characters left as-is when embedding a value in a callback URL:
/// ASCII alphanumerics plus `_ . - ~ /`.
const QUOTE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'_')
    .remove(b'.')
    .remove(b'-')
    .remove(b'~')
    .remove(b'/');

const FENCE: &str = "```";

/// A conversation turned into a Bear note. Regenerated on every run, never stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedNote {
    pub title: String,
    pub body: String,
    pub tag: String,
    /// `bear://x-callback-url/create?…` request handed to the creation channel.
    pub destination_url: String,
    /// Messages that produced at least one fragment.
    pub message_count: usize,
}

pub fn quote(value: &str) -> String {
    utf8_percent_encode(value, QUOTE).to_string()
}

fn role_marker(role: &str) -> &str {
    match role {
        "user" => "👤",
        "assistant" => "🤖",
        other => other,
    }
}

/// `YYYY-MM` in local time. Falls back to `now` when the timestamp is absent
/// or out of range.
pub fn year_month(create_time: Option<f64>, now: DateTime<Local>) -> String {
    let when = create_time
        .and_then(|ts| {
            let secs = ts.floor() as i64;
            let nanos = ((ts - ts.floor()) * 1e9) as u32;
            Local.timestamp_opt(secs, nanos).single()
        })
        .unwrap_or(now);
    when.format("%Y-%m").to_string()
}

fn string_fragments(parts: &[Value]) -> impl Iterator<Item = &str> {
    parts
        .iter()
        .filter_map(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}

/// Lines a message contributes to the body, without the role marker.
/// `None` when the message renders to nothing.
fn message_lines(msg: &Message) -> Option<Vec<String>> {
    let parts = msg.content.parts.as_deref()?;
    if parts.first().is_none_or(is_falsy) {
        return None;
    }

    if msg.author.role == "user" {
        let mut fragments: Vec<String> = string_fragments(parts)
            .map(|t| escape_code_fence(&escape_tag_marker(t)))
            .collect();
        if fragments.is_empty() {
            return None;
        }
        if let Some(first) = fragments.first_mut() {
            *first = first.trim_start().to_string();
        }
        if let Some(last) = fragments.last_mut() {
            *last = last.trim_end().to_string();
        }
        let mut lines = Vec::with_capacity(fragments.len() + 2);
        lines.push(FENCE.to_string());
        lines.extend(fragments);
        lines.push(FENCE.to_string());
        Some(lines)
    } else {
        let fragments: Vec<String> = string_fragments(parts).map(escape_tag_marker).collect();
        if fragments.is_empty() {
            None
        } else {
            Some(fragments)
        }
    }
}

/// Render a conversation into the note Bear should create.
///
/// `now` is only used when the conversation has no creation timestamp.
pub fn render(
    conversation: &Conversation,
    settings: &RenderSettings,
    now: DateTime<Local>,
) -> RenderedNote {
    let id = conversation.key();
    let title = conversation
        .title
        .clone()
        .unwrap_or_else(|| "Untitled".to_string());

    let mut body = format!("[ChatGPT Link]({}{})\n\n", settings.origin_url, id);
    let mut message_count = 0;
    for msg in conversation.messages() {
        let Some(lines) = message_lines(&msg) else {
            continue;
        };
        message_count += 1;
        body.push_str(role_marker(&msg.author.role));
        body.push('\n');
        body.push_str(&lines.join("\n"));
        body.push_str("\n\n");
    }

    let tag = format!(
        "{}/{}",
        settings.tag_prefix,
        year_month(conversation.create_time, now)
    );

    let mut success = settings
        .listener_url
        .join("success")
        .unwrap_or_else(|_| settings.listener_url.clone());
    success
        .query_pairs_mut()
        .append_pair("conversation_id", id)
        .append_pair("characters", &body.chars().count().to_string());

    let destination_url = format!(
        "bear://x-callback-url/create?title={}&text={}&tags={}&x-success={}",
        quote(&title),
        quote(&body),
        tag,
        quote(success.as_str()),
    );

    RenderedNote {
        title,
        body,
        tag,
        destination_url,
        message_count,
    }
}

/// Build the `open-note` request used to ask Bear whether `note_id` still exists.
///
/// Bear answers on `x-success` when the note opens and on `x-error` otherwise;
/// the error URL carries both ids so the listener can record the miss.
pub fn exists_check_url(settings: &RenderSettings, conversation_id: &str, note_id: &str) -> String {
    let listener = &settings.listener_url;
    let exists = listener
        .join("bear-exists")
        .unwrap_or_else(|_| listener.clone());
    let mut missing = listener
        .join("bear-missing")
        .unwrap_or_else(|_| listener.clone());
    missing
        .query_pairs_mut()
        .append_pair("conversation_id", conversation_id)
        .append_pair("identifier", note_id);

    format!(
        "bear://x-callback-url/open-note?id={}&x-success={}&show_window=no&x-error={}",
        quote(note_id),
        exists,
        quote(missing.as_str()),
    )
}
