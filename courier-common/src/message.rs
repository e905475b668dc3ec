use std::{ops::Range, sync::Arc};

use crate::{error::MessageParseError, host};

/// An outbound message: the SMTP envelope plus the already encoded wire bytes.
///
/// The bytes are opaque to the queue except for the header section, which is
/// scanned to stamp `Message-Id`/`Date` and to carry the envelope through the
/// queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    sender: String,
    recipients: Vec<String>,
    data: Arc<[u8]>,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        recipients: impl IntoIterator<Item = impl Into<String>>,
        data: impl Into<Arc<[u8]>>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipients: recipients.into_iter().map(Into::into).collect(),
            data: data.into(),
        }
    }

    #[inline]
    pub fn sender(&self) -> &str {
        &self.sender
    }

    #[inline]
    pub fn recipients(&self) -> &[String] {
        &self.recipients
    }

    /// The wire format bytes of this message
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Replace the wire bytes, keeping the envelope
    #[must_use]
    pub fn with_data(self, data: impl Into<Arc<[u8]>>) -> Self {
        Self {
            data: data.into(),
            ..self
        }
    }
}

/// A header field located inside a raw message.
///
/// `span` covers the whole field: the name, the value, any folded
/// continuation lines and the trailing line terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField<'buf> {
    pub name: &'buf [u8],
    pub span: Range<usize>,
}

impl HeaderField<'_> {
    /// Compare the field name, ignoring ASCII case
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name.as_bytes())
    }

    /// The unfolded value with RFC 2047 encoded words decoded
    ///
    /// # Errors
    /// If the field cannot be parsed as a header
    pub fn value(&self, buf: &[u8]) -> Result<String, MessageParseError> {
        let (header, _) = mailparse::parse_header(&buf[self.span.clone()])?;
        Ok(header.get_value().trim().to_string())
    }
}

/// Iterator over the fields in the header section of a message.
///
/// Stops at the blank line separating headers from the body, or at the
/// first line that is not a header field.
pub struct Headers<'buf> {
    buf: &'buf [u8],
    cursor: usize,
    done: bool,
}

impl<'buf> Headers<'buf> {
    #[inline]
    pub const fn new(buf: &'buf [u8]) -> Self {
        Self {
            buf,
            cursor: 0,
            done: false,
        }
    }

    fn line_end(&self, from: usize) -> usize {
        self.buf[from..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(self.buf.len(), |pos| from + pos + 1)
    }
}

impl<'buf> Iterator for Headers<'buf> {
    type Item = HeaderField<'buf>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done || self.cursor >= self.buf.len() {
            return None;
        }

        let start = self.cursor;
        let end = self.line_end(start);
        let line = &self.buf[start..end];

        let name = line
            .iter()
            .position(|b| *b == b':')
            .map(|colon| line[..colon].trim_ascii_end())
            .filter(|name| {
                !name.is_empty() && !name.iter().any(u8::is_ascii_whitespace)
            });

        let Some(name) = name else {
            self.done = true;
            return None;
        };

        let mut cursor = end;
        while cursor < self.buf.len() && matches!(self.buf[cursor], b' ' | b'\t') {
            cursor = self.line_end(cursor);
        }
        self.cursor = cursor;

        Some(HeaderField {
            name,
            span: start..cursor,
        })
    }
}

/// Find the first header field called `name`
pub fn find_header<'buf>(buf: &'buf [u8], name: &str) -> Option<HeaderField<'buf>> {
    Headers::new(buf).find(|field| field.is(name))
}

/// The line terminator this message uses, judged by its first line
pub fn line_ending(buf: &[u8]) -> &'static str {
    match buf.iter().position(|b| *b == b'\n') {
        Some(pos) if pos > 0 && buf[pos - 1] == b'\r' => "\r\n",
        Some(_) => "\n",
        None => "\r\n",
    }
}

/// Stamp the headers every outgoing message must carry.
///
/// A missing `Message-Id` is generated and a missing `Date` is set to the
/// current time; both are prepended to the header section. Existing values
/// are left untouched.
///
/// Returns the message id together with the stamped message.
///
/// # Errors
/// If an existing `Message-Id` header cannot be parsed
pub fn prepare_envelope(message: Message) -> Result<(String, Message), MessageParseError> {
    let data = message.data();
    let eol = line_ending(data);

    let existing = find_header(data, "Message-Id")
        .map(|field| field.value(data))
        .transpose()?
        .filter(|id| !id.is_empty());

    let mut stamped = Vec::with_capacity(data.len() + 128);

    let message_id = match existing {
        Some(id) => id,
        None => {
            let id = format!("<{}.courier@{}>", ulid::Ulid::new(), host::hostname());
            stamped.extend_from_slice(format!("Message-Id: {id}{eol}").as_bytes());
            id
        }
    };

    if find_header(data, "Date").is_none() {
        let date = chrono::Utc::now().to_rfc2822();
        stamped.extend_from_slice(format!("Date: {date}{eol}").as_bytes());
    }

    if stamped.is_empty() {
        return Ok((message_id, message));
    }

    stamped.extend_from_slice(data);
    Ok((message_id, message.with_data(stamped)))
}
