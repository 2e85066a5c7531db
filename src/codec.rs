use std::fmt::Write as _;

use thiserror::Error;

use crate::frame::{Command, Frame};
use crate::parser::parse_frame_slice;

/// Errors raised while decoding a transport message into frames.
#[derive(Error, Debug)]
pub enum CodecError {
    /// The message does not carry the array envelope marker.
    #[error("message is not an envelope")]
    NotAnEnvelope,
    /// The envelope array never closed.
    #[error("unterminated envelope array")]
    UnterminatedArray,
    /// Unexpected character outside a string element.
    #[error("malformed envelope near {0:?}")]
    MalformedEnvelope(char),
    /// A backslash escape the unescaper does not recognize.
    #[error("invalid escape sequence {0}")]
    InvalidEscape(String),
    /// The command line is not one of the known STOMP commands.
    #[error("unknown command {0:?}")]
    UnknownCommand(String),
    /// The frame grammar inside a payload is broken.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),
}

/// True when a transport message carries the frame envelope rather than a
/// transport control payload (`o` open probe, `h` heartbeat, `c[...]`
/// close). Inbound envelopes arrive with the `a` array marker; our own
/// outbound envelopes are a bare array.
pub fn is_envelope(msg: &str) -> bool {
    msg.starts_with('[') || msg.starts_with("a[")
}

/// Encode a frame as one outbound transport message:
/// `["COMMAND\nkey:value\n\n<body>\\u0000"]` with the frame text escaped
/// for the quoted string.
///
/// Deterministic and reversible: `decode_message(&encode_frame(&f))`
/// yields `[f]` for any frame whose headers are free of LF/NUL and whose
/// body is UTF-8 text (the envelope is a text format; non-UTF-8 bodies
/// cannot be carried).
pub fn encode_frame(frame: &Frame) -> String {
    let mut payload = String::new();
    payload.push_str(frame.command.as_str());
    payload.push('\n');
    for (k, v) in &frame.headers {
        payload.push_str(k);
        payload.push(':');
        payload.push_str(v);
        payload.push('\n');
    }
    payload.push('\n');
    payload.push_str(&String::from_utf8_lossy(&frame.body));
    payload.push('\0');

    let mut out = String::with_capacity(payload.len() + 16);
    out.push_str("[\"");
    escape_into(&payload, &mut out);
    out.push_str("\"]");
    out
}

/// Decode one transport message into the frames it batches.
///
/// Accepts both the server form (`a["..."]`) and the client form
/// (`["..."]`). Each array element is unescaped, then split on NUL
/// terminators; every piece must parse as a complete frame. An empty
/// array decodes to zero frames.
pub fn decode_message(msg: &str) -> Result<Vec<Frame>, CodecError> {
    let body = msg.strip_prefix('a').unwrap_or(msg);
    if !body.starts_with('[') {
        return Err(CodecError::NotAnEnvelope);
    }

    let mut frames = Vec::new();
    for payload in parse_string_array(body)? {
        let bytes = payload.as_bytes();
        let mut pos = 0usize;
        while pos < bytes.len() {
            match parse_frame_slice(&bytes[pos..]) {
                Ok(Some((cmd, headers, body, consumed))) => {
                    let command =
                        Command::parse(&cmd).ok_or(CodecError::UnknownCommand(cmd))?;
                    frames.push(Frame {
                        command,
                        headers,
                        body,
                    });
                    pos += consumed;
                }
                Ok(None) => break,
                Err(e) => return Err(CodecError::MalformedFrame(e)),
            }
        }
    }
    Ok(frames)
}

/// Escape `input` into `out` as the contents of a quoted envelope string.
///
/// `\n`, `\r`, `\t`, `\"` and `\\` get their two-character forms; NUL and
/// the remaining C0 controls become `\uXXXX`. Everything else passes
/// through untouched.
fn escape_into(input: &str, out: &mut String) {
    for ch in input.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
}

enum ArrayState {
    BeforeItem,
    InString,
    AfterItem,
    Done,
}

/// Parse `["...", "..."]` into unescaped strings with a two-state
/// (literal/escape) scan per element.
fn parse_string_array(input: &str) -> Result<Vec<String>, CodecError> {
    let mut chars = input.chars();
    if chars.next() != Some('[') {
        return Err(CodecError::NotAnEnvelope);
    }

    let mut items: Vec<String> = Vec::new();
    let mut cur = String::new();
    let mut state = ArrayState::BeforeItem;

    while let Some(c) = chars.next() {
        match state {
            ArrayState::BeforeItem => match c {
                '"' => state = ArrayState::InString,
                ']' if items.is_empty() => state = ArrayState::Done,
                c if c.is_whitespace() => {}
                c => return Err(CodecError::MalformedEnvelope(c)),
            },
            ArrayState::InString => match c {
                '"' => {
                    items.push(std::mem::take(&mut cur));
                    state = ArrayState::AfterItem;
                }
                '\\' => cur.push(unescape_one(&mut chars)?),
                c => cur.push(c),
            },
            ArrayState::AfterItem => match c {
                ',' => state = ArrayState::BeforeItem,
                ']' => state = ArrayState::Done,
                c if c.is_whitespace() => {}
                c => return Err(CodecError::MalformedEnvelope(c)),
            },
            ArrayState::Done => {
                if !c.is_whitespace() {
                    return Err(CodecError::MalformedEnvelope(c));
                }
            }
        }
    }

    match state {
        ArrayState::Done => Ok(items),
        _ => Err(CodecError::UnterminatedArray),
    }
}

/// Resolve the character following a backslash inside a quoted string.
fn unescape_one(chars: &mut std::str::Chars<'_>) -> Result<char, CodecError> {
    match chars.next() {
        Some('n') => Ok('\n'),
        Some('r') => Ok('\r'),
        Some('t') => Ok('\t'),
        Some('b') => Ok('\u{0008}'),
        Some('f') => Ok('\u{000c}'),
        Some('"') => Ok('"'),
        Some('\\') => Ok('\\'),
        Some('/') => Ok('/'),
        Some('u') => {
            let mut code = 0u32;
            for _ in 0..4 {
                let digit = chars
                    .next()
                    .and_then(|h| h.to_digit(16))
                    .ok_or_else(|| CodecError::InvalidEscape("\\u".to_string()))?;
                code = code * 16 + digit;
            }
            char::from_u32(code)
                .ok_or_else(|| CodecError::InvalidEscape(format!("\\u{:04x}", code)))
        }
        Some(c) => Err(CodecError::InvalidEscape(format!("\\{}", c))),
        None => Err(CodecError::UnterminatedArray),
    }
}
