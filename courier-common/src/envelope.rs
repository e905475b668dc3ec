//! Carrying the SMTP envelope inside a queued message.
//!
//! A queued message has to be resendable after a crash without any state
//! other than its own file, so the sender and recipients are written into
//! two synthetic header fields when the message is queued and removed again
//! before the message is handed to a transport.

use std::fmt::Write;

use crate::{
    error::MessageParseError,
    message::{Headers, Message, line_ending},
};

pub const ACTUALLY_FROM: &str = "X-Actually-From";
pub const ACTUALLY_TO: &str = "X-Actually-To";

/// Longest encoded word we emit, well under the 75 character limit
const MAX_ENCODED_WORD: usize = 60;

/// Sender and recipients recovered from a queued message
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Envelope {
    pub sender: String,
    pub recipients: Vec<String>,
}

impl Envelope {
    /// True when neither a sender nor any recipient is known
    pub fn is_empty(&self) -> bool {
        self.sender.is_empty() && self.recipients.is_empty()
    }
}

/// Prefix the message with the envelope headers.
pub fn embed(message: &Message) -> Vec<u8> {
    let data = message.data();
    let eol = line_ending(data);

    let mut headers = String::new();
    let _ = write!(
        headers,
        "{ACTUALLY_FROM}: {}{eol}",
        encode_value(message.sender(), eol)
    );
    let _ = write!(
        headers,
        "{ACTUALLY_TO}: {}{eol}",
        encode_value(&message.recipients().join(","), eol)
    );

    let mut out = Vec::with_capacity(headers.len() + data.len());
    out.extend_from_slice(headers.as_bytes());
    out.extend_from_slice(data);
    out
}

/// Recover the envelope and strip the envelope headers from the message.
///
/// A missing sender header yields an empty sender and a missing recipient
/// header an empty recipient list. Every occurrence of either header is
/// removed; the first one wins.
///
/// # Errors
/// If one of the envelope headers cannot be parsed
pub fn extract(data: &[u8]) -> Result<(Envelope, Vec<u8>), MessageParseError> {
    let mut envelope = Envelope::default();
    let mut seen_from = false;
    let mut seen_to = false;
    let mut stripped = Vec::with_capacity(data.len());
    let mut copied_up_to = 0;

    for field in Headers::new(data) {
        let is_from = field.is(ACTUALLY_FROM);
        let is_to = field.is(ACTUALLY_TO);
        if !is_from && !is_to {
            continue;
        }

        if is_from && !seen_from {
            envelope.sender = field.value(data)?;
            seen_from = true;
        } else if is_to && !seen_to {
            envelope.recipients = field
                .value(data)?
                .split(',')
                .map(str::trim)
                .filter(|addr| !addr.is_empty())
                .map(ToString::to_string)
                .collect();
            seen_to = true;
        }

        stripped.extend_from_slice(&data[copied_up_to..field.span.start]);
        copied_up_to = field.span.end;
    }

    stripped.extend_from_slice(&data[copied_up_to..]);

    Ok((envelope, stripped))
}

/// Encode a header value as RFC 2047 `Q` encoded words when it is not
/// plain printable ASCII.
fn encode_value(value: &str, eol: &str) -> String {
    if value.bytes().all(|b| (b' '..=b'~').contains(&b)) {
        return value.to_string();
    }

    let mut words = Vec::new();
    let mut word = String::new();

    for ch in value.chars() {
        let mut piece = String::new();
        if ch == ' ' {
            piece.push('_');
        } else if ch.is_ascii_alphanumeric() || matches!(ch, '!' | '*' | '+' | '-' | '/') {
            piece.push(ch);
        } else {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).bytes() {
                let _ = write!(piece, "={byte:02X}");
            }
        }

        if !word.is_empty() && word.len() + piece.len() > MAX_ENCODED_WORD {
            words.push(std::mem::take(&mut word));
        }
        word.push_str(&piece);
    }

    if !word.is_empty() {
        words.push(word);
    }

    words
        .iter()
        .map(|word| format!("=?utf-8?q?{word}?="))
        .collect::<Vec<_>>()
        .join(&format!("{eol} "))
}
