//! Markdown-safe rendering of partially generated text.
//!
//! The display surface rejects unbalanced markup and unescaped punctuation, so
//! every edit is rendered from the complete accumulated text: reserved
//! characters are escaped, code fences keep only backslashes and backticks
//! escaped, and an unterminated code block or inline code run gets a synthetic
//! closer that exists only in the displayed text.

use memchr::{memchr_iter, memmem};

pub const CODE_FENCE: &str = "```";
const INLINE_CODE: u8 = b'`';

/// Characters escaped with a backslash outside code blocks.
pub const RESERVED_CHARS: &[char] = &[
    '_', '*', '~', '#', '+', '-', '=', '{', '}', '!', '.', '|', '(', ')', '<', '>', '[', ']',
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenConstruct {
    None,
    CodeBlock,
    InlineCode,
}

impl OpenConstruct {
    pub fn closer(self) -> &'static str {
        match self {
            OpenConstruct::None => "",
            OpenConstruct::CodeBlock => CODE_FENCE,
            OpenConstruct::InlineCode => "`",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFragment {
    pub escaped_text: String,
    pub pending: OpenConstruct,
}

impl RenderedFragment {
    /// The escaped text with the closer for any open construct appended.
    pub fn display_text(&self) -> String {
        let closer = self.pending.closer();
        let mut text = String::with_capacity(self.escaped_text.len() + closer.len());
        text.push_str(&self.escaped_text);
        text.push_str(closer);
        text
    }
}

fn fence_positions(text: &str) -> Vec<usize> {
    memmem::find_iter(text.as_bytes(), CODE_FENCE).collect()
}

pub fn has_open_code_block(text: &str) -> bool {
    memmem::find_iter(text.as_bytes(), CODE_FENCE).count() % 2 == 1
}

/// Parity of isolated backticks; runs of two or more never count.
///
/// Backticks inside closed fences count as well, so a lone backtick in a
/// finished code block leaves a stray closer on the displayed text.
pub fn has_open_inline_code(text: &str) -> bool {
    let bytes = text.as_bytes();
    let isolated = memchr_iter(INLINE_CODE, bytes)
        .filter(|&index| {
            let before = index.checked_sub(1).map(|i| bytes[i]);
            let after = bytes.get(index + 1).copied();
            before != Some(INLINE_CODE) && after != Some(INLINE_CODE)
        })
        .count();
    isolated % 2 == 1
}

fn escape_code(segment: &str, out: &mut String) {
    for ch in segment.chars() {
        if ch == '\\' || ch == '`' {
            out.push('\\');
        }
        out.push(ch);
    }
}

// A reserved character that already follows a backslash is left alone, which
// keeps escaping stable when applied to its own output.
fn escape_prose(segment: &str, out: &mut String) {
    let mut previous = None;
    for ch in segment.chars() {
        if RESERVED_CHARS.contains(&ch) && previous != Some('\\') {
            out.push('\\');
        }
        out.push(ch);
        previous = Some(ch);
    }
}

fn escape_segments(text: &str, close_open_block: bool) -> String {
    let mut out = String::with_capacity(text.len() + text.len() / 4);
    let mut cursor = 0;

    for pair in fence_positions(text).chunks(2) {
        match *pair {
            [open, close] => {
                escape_prose(&text[cursor..open], &mut out);
                out.push_str(CODE_FENCE);
                escape_code(&text[open + CODE_FENCE.len()..close], &mut out);
                out.push_str(CODE_FENCE);
                cursor = close + CODE_FENCE.len();
            }
            [open] if close_open_block => {
                escape_prose(&text[cursor..open], &mut out);
                out.push_str(CODE_FENCE);
                escape_code(&text[open + CODE_FENCE.len()..], &mut out);
                cursor = text.len();
            }
            _ => {}
        }
    }
    escape_prose(&text[cursor..], &mut out);
    out
}

/// Escape backslashes and backticks inside each matched fence pair, leaving
/// everything else untouched.
pub fn escape_code_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for pair in fence_positions(text).chunks_exact(2) {
        let (open, close) = (pair[0], pair[1]);
        let content_start = open + CODE_FENCE.len();
        out.push_str(&text[cursor..content_start]);
        escape_code(&text[content_start..close], &mut out);
        out.push_str(CODE_FENCE);
        cursor = close + CODE_FENCE.len();
    }
    out.push_str(&text[cursor..]);
    out
}

/// Full escaping: code-block contents first, then reserved characters everywhere else.
pub fn escape(text: &str) -> String {
    escape_segments(text, false)
}

/// Render accumulated text for display. The contents of an unterminated code
/// block are escaped as code, since the appended closer terminates it.
pub fn render(accumulated: &str) -> RenderedFragment {
    let pending = if has_open_code_block(accumulated) {
        OpenConstruct::CodeBlock
    } else if has_open_inline_code(accumulated) {
        OpenConstruct::InlineCode
    } else {
        OpenConstruct::None
    };

    let mut escaped_text = escape_segments(accumulated, pending == OpenConstruct::CodeBlock);
    // A dangling backslash would escape the synthetic closer.
    if pending != OpenConstruct::None && trailing_backslashes(&escaped_text) % 2 == 1 {
        escaped_text.push('\\');
    }

    RenderedFragment {
        escaped_text,
        pending,
    }
}

fn trailing_backslashes(text: &str) -> usize {
    text.bytes().rev().take_while(|&b| b == b'\\').count()
}
