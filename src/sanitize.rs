//! Escaping for characters Bear's markup treats specially.
//!
//! Bear turns `#word` into a tag and ```` ``` ```` into a code block. Text copied
//! out of a conversation must keep both literal. Each function runs once per
//! field per render; the renderer always starts from unescaped export text.

const TAG: char = '#';
const ESCAPE: char = '\\';
const FENCE: &str = "```";

/// Escape every `#` that would start a Bear tag.
///
/// A `#` is left alone when it is followed by a space (a heading marker), when
/// it is followed by another `#` (only the marker touching the word starts the
/// tag), or when it is already escaped.
pub fn escape_tag_marker(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut prev: Option<char> = None;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c == TAG {
            let next = chars.peek().copied();
            let escaped = prev == Some(ESCAPE);
            if !escaped && next != Some(' ') && next != Some(TAG) {
                out.push(ESCAPE);
            }
        }
        out.push(c);
        prev = Some(c);
    }
    out
}

/// Escape a ```` ``` ```` run so it does not open or close a code block.
///
/// The fence is matched left to right without overlap. A fence directly after
/// another backtick or after an escape character is left alone.
pub fn escape_code_fence(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 4);
    let mut prev: Option<char> = None;
    let mut rest = text;

    while let Some(c) = rest.chars().next() {
        if rest.starts_with(FENCE) && prev != Some('`') && prev != Some(ESCAPE) {
            out.push(ESCAPE);
            out.push_str(FENCE);
            rest = &rest[FENCE.len()..];
            prev = Some('`');
            continue;
        }
        out.push(c);
        rest = &rest[c.len_utf8()..];
        prev = Some(c);
    }
    out
}
