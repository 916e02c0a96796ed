//! Header-delimited framing of message bodies.
//!
//! ```text
//! Content-Length: <n>\r\n
//! [Content-Type: application/json; charset=<cs>\r\n]
//! \r\n
//! <n bytes of JSON text>
//! ```
//!
//! [`FrameCodec`] plugs into `tokio_util::codec::{FramedRead, FramedWrite}`.
//! Decoding is incremental over a `BytesMut`, so it yields the same frames no
//! matter how the input is chunked. A bad frame surfaces as an `Err` item and
//! decoding carries on with the next header block.

use std::borrow::Cow;
use std::fmt;
use std::io;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::config::EndpointConfig;
use crate::error::FramingError;

pub const CONTENT_LENGTH: &str = "Content-Length";
pub const CONTENT_TYPE: &str = "Content-Type";
pub const JSON_MIME_TYPE: &str = "application/json";

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
/// A header block longer than this without a terminator is dropped.
const MAX_HEADER_LEN: usize = 8 * 1024;

/// Character sets understood for message bodies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Charset {
    #[default]
    #[serde(rename = "utf-8", alias = "utf8", alias = "UTF-8")]
    Utf8,
    #[serde(rename = "us-ascii", alias = "ascii", alias = "US-ASCII")]
    UsAscii,
    #[serde(rename = "iso-8859-1", alias = "latin1", alias = "ISO-8859-1")]
    Latin1,
}

impl Charset {
    /// Parse a `charset=` parameter (case-insensitive, quotes allowed).
    pub fn from_label(label: &str) -> Result<Self, FramingError> {
        let label = label.trim().trim_matches('"');
        match label.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "us-ascii" | "ascii" => Ok(Charset::UsAscii),
            "iso-8859-1" | "iso8859-1" | "latin1" => Ok(Charset::Latin1),
            _ => Err(FramingError::UnsupportedCharset(label.to_string())),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Charset::Utf8 => "utf-8",
            Charset::UsAscii => "us-ascii",
            Charset::Latin1 => "iso-8859-1",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String, FramingError> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|_| {
                FramingError::InvalidBody {
                    charset: self.label(),
                }
            }),
            Charset::UsAscii => {
                if bytes.is_ascii() {
                    Ok(bytes.iter().map(|&b| b as char).collect())
                } else {
                    Err(FramingError::InvalidBody {
                        charset: self.label(),
                    })
                }
            }
            Charset::Latin1 => Ok(bytes.iter().map(|&b| b as char).collect()),
        }
    }

    /// Encode JSON text for the wire.
    ///
    /// Characters the charset cannot represent are written as `\uXXXX`
    /// escapes. Outside of strings JSON text is pure ASCII, so the result is
    /// still the same JSON value.
    pub fn encode<'a>(&self, text: &'a str) -> Cow<'a, [u8]> {
        let limit = match self {
            Charset::Utf8 => return Cow::Borrowed(text.as_bytes()),
            Charset::UsAscii => 0x7f,
            Charset::Latin1 => 0xff,
        };
        if text.chars().all(|c| (c as u32) <= limit) {
            if *self == Charset::UsAscii {
                return Cow::Borrowed(text.as_bytes());
            }
            return Cow::Owned(text.chars().map(|c| c as u8).collect());
        }

        let mut out = Vec::with_capacity(text.len() + 16);
        for c in text.chars() {
            if (c as u32) <= limit {
                out.push(c as u8);
            } else {
                let mut units = [0u16; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.extend_from_slice(format!("\\u{:04x}", unit).as_bytes());
                }
            }
        }
        Cow::Owned(out)
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One decoded frame: the raw body plus the charset it declared.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub body: Bytes,
    pub charset: Charset,
}

impl Frame {
    pub fn into_text(self) -> Result<String, FramingError> {
        self.charset.decode(&self.body)
    }
}

#[derive(Debug)]
enum DecodeState {
    Head,
    Body { length: usize, charset: Charset },
    Discard { remaining: usize },
}

/// Encoder/decoder for `Content-Length` framed messages.
#[derive(Debug)]
pub struct FrameCodec {
    state: DecodeState,
    max_content_length: usize,
    charset: Charset,
    emit_content_type: bool,
}

impl FrameCodec {
    pub fn new() -> Self {
        Self::from_config(&EndpointConfig::default())
    }

    pub fn from_config(config: &EndpointConfig) -> Self {
        Self {
            state: DecodeState::Head,
            max_content_length: config.max_content_length,
            charset: config.charset,
            emit_content_type: config.emit_content_type,
        }
    }

    pub fn with_max_content_length(mut self, max: usize) -> Self {
        self.max_content_length = max;
        self
    }

    /// Charset used for outgoing bodies
    pub fn with_charset(mut self, charset: Charset) -> Self {
        self.charset = charset;
        self
    }

    pub fn with_content_type(mut self, emit: bool) -> Self {
        self.emit_content_type = emit;
        self
    }

    /// Parse a complete header block (without the terminating blank line).
    ///
    /// The outer error means the body length is unknown. A charset problem is
    /// reported separately so the body can still be skipped.
    fn parse_headers(
        &self,
        block: &[u8],
    ) -> Result<(usize, Result<Charset, FramingError>), FramingError> {
        let block = std::str::from_utf8(block)
            .ok()
            .filter(|text| text.is_ascii())
            .ok_or_else(|| {
                FramingError::MalformedHeader(String::from_utf8_lossy(block).into_owned())
            })?;

        let mut length = None;
        let mut charset = Ok(Charset::Utf8);

        for line in block.split("\r\n") {
            let Some((name, value)) = line.split_once(':') else {
                debug!(line, "Ignoring header line without a separator");
                continue;
            };
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case(CONTENT_LENGTH) {
                length = Some(
                    value
                        .parse::<usize>()
                        .map_err(|_| FramingError::InvalidContentLength(value.to_string()))?,
                );
            } else if name.eq_ignore_ascii_case(CONTENT_TYPE) {
                let declared = value
                    .split(';')
                    .skip(1)
                    .filter_map(|param| param.trim().split_once('='))
                    .find(|(key, _)| key.trim().eq_ignore_ascii_case("charset"));
                if let Some((_, label)) = declared {
                    charset = Charset::from_label(label);
                }
            }
        }

        let length = length.ok_or(FramingError::MissingContentLength)?;
        Ok((length, charset))
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = Result<Frame, FramingError>;
    type Error = io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match self.state {
                DecodeState::Head => {
                    let Some(end) = src
                        .windows(HEADER_TERMINATOR.len())
                        .position(|window| window == HEADER_TERMINATOR)
                    else {
                        if src.len() > MAX_HEADER_LEN {
                            src.clear();
                            return Ok(Some(Err(FramingError::MalformedHeader(format!(
                                "header block exceeds {} bytes",
                                MAX_HEADER_LEN
                            )))));
                        }
                        return Ok(None);
                    };

                    let block = src.split_to(end);
                    src.advance(HEADER_TERMINATOR.len());

                    match self.parse_headers(&block) {
                        Err(error) => return Ok(Some(Err(error))),
                        Ok((length, _)) if length > self.max_content_length => {
                            self.state = DecodeState::Discard { remaining: length };
                            return Ok(Some(Err(FramingError::BodyTooLarge {
                                length,
                                max: self.max_content_length,
                            })));
                        }
                        Ok((length, Err(error))) => {
                            self.state = DecodeState::Discard { remaining: length };
                            return Ok(Some(Err(error)));
                        }
                        Ok((length, Ok(charset))) => {
                            self.state = DecodeState::Body { length, charset };
                        }
                    }
                }
                DecodeState::Body { length, charset } => {
                    if src.len() < length {
                        src.reserve(length - src.len());
                        return Ok(None);
                    }
                    let body = src.split_to(length).freeze();
                    self.state = DecodeState::Head;
                    return Ok(Some(Ok(Frame { body, charset })));
                }
                DecodeState::Discard { remaining } => {
                    let skip = remaining.min(src.len());
                    src.advance(skip);
                    if skip < remaining {
                        self.state = DecodeState::Discard {
                            remaining: remaining - skip,
                        };
                        return Ok(None);
                    }
                    self.state = DecodeState::Head;
                }
            }
        }
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if !src.is_empty() {
            // Truncated stream: treat as the peer going away
            debug!(
                remaining = src.len(),
                "Stream ended inside a frame, stopping"
            );
            src.clear();
        }
        Ok(None)
    }
}

impl Encoder<String> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, text: String, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let body = self.charset.encode(&text);
        let mut header = format!("{}: {}\r\n", CONTENT_LENGTH, body.len());
        if self.emit_content_type {
            header.push_str(&format!(
                "{}: {}; charset={}\r\n",
                CONTENT_TYPE,
                JSON_MIME_TYPE,
                self.charset.label()
            ));
        }
        header.push_str("\r\n");

        dst.reserve(header.len() + body.len());
        dst.put_slice(header.as_bytes());
        dst.put_slice(&body);
        Ok(())
    }
}
