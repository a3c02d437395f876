//! Upgrade response parser
//!
//! Incremental parser for a single HTTP (or ICY) response: status line,
//! headers, optional body. Used once per connection to validate the
//! WebSocket upgrade.
//!
//! The parser consumes whole lines only. [`HandshakeParser::parse`] returns
//! how many bytes it took; the caller drops them and calls again with the
//! remainder plus any newly received bytes. Parsing resumes exactly where it
//! stopped, so the response may arrive in arbitrarily small pieces.

use bytes::Bytes;
use regex_lite::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::{Error, Result};

/// Parser position within the response
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Waiting for a response preface
    Interleaved,
    StatusLine,
    HeaderLine,
    Body,
}

fn status_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:HTTP/1\.\d|ICY)\s+(\d{3})(?:\s+(.*))?$").expect("static regex")
    })
}

fn header_line_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^\s:]+):\s*(.*)$").expect("static regex"))
}

/// HTTP response parser for the upgrade handshake
#[derive(Debug)]
pub struct HandshakeParser {
    state: ParserState,
    status_code: Option<u16>,
    status_text: String,
    headers: HashMap<String, String>,
    content_length: usize,
    content_type: Option<String>,
    metadata_interval: Option<u32>,
    body: Bytes,
    complete: bool,
    foreign: bool,
}

impl Default for HandshakeParser {
    fn default() -> Self {
        Self::new()
    }
}

impl HandshakeParser {
    pub fn new() -> Self {
        Self {
            state: ParserState::Interleaved,
            status_code: None,
            status_text: String::new(),
            headers: HashMap::new(),
            content_length: 0,
            content_type: None,
            metadata_interval: None,
            body: Bytes::new(),
            complete: false,
            foreign: false,
        }
    }

    /// Forget everything parsed so far
    pub fn reset(&mut self) {
        *self = Self::new();
    }

    fn begin_message(&mut self) {
        self.status_code = None;
        self.status_text.clear();
        self.headers.clear();
        self.content_length = 0;
        self.content_type = None;
        self.metadata_interval = None;
        self.body = Bytes::new();
        self.complete = false;
        self.foreign = false;
    }

    /// Feed bytes; returns the number consumed
    ///
    /// `Ok(0)` means nothing could be consumed yet (or, with
    /// [`is_foreign`](Self::is_foreign), that the bytes are not an HTTP
    /// response at all). Any error means the connection must be closed.
    pub fn parse(&mut self, buf: &[u8]) -> Result<usize> {
        let mut offset = 0;

        loop {
            let rest = &buf[offset..];

            match self.state {
                ParserState::Interleaved => {
                    self.begin_message();

                    if rest.len() < 4 {
                        return Ok(offset);
                    }
                    if rest.starts_with(b"HTTP") || rest.starts_with(b"ICY") {
                        self.state = ParserState::StatusLine;
                    } else {
                        self.foreign = true;
                        return Ok(offset);
                    }
                }

                ParserState::StatusLine => {
                    let Some((line, used)) = next_line(rest) else {
                        return Ok(offset);
                    };
                    offset += used;

                    if let Err(e) = self.parse_status_line(&line) {
                        self.state = ParserState::Interleaved;
                        return Err(e);
                    }
                    self.state = ParserState::HeaderLine;
                }

                ParserState::HeaderLine => {
                    let Some((line, used)) = next_line(rest) else {
                        return Ok(offset);
                    };
                    offset += used;

                    if !line.is_empty() {
                        if let Err(e) = self.parse_header_line(&line) {
                            self.state = ParserState::Interleaved;
                            return Err(e);
                        }
                    } else if self.content_length > 0 {
                        self.state = ParserState::Body;
                    } else {
                        self.complete = true;
                        self.state = ParserState::Interleaved;
                        return Ok(offset);
                    }
                }

                ParserState::Body => {
                    if rest.len() < self.content_length {
                        return Ok(offset);
                    }
                    self.body = Bytes::copy_from_slice(&rest[..self.content_length]);
                    offset += self.content_length;
                    self.complete = true;
                    self.state = ParserState::Interleaved;
                    return Ok(offset);
                }
            }
        }
    }

    fn parse_status_line(&mut self, line: &str) -> Result<()> {
        let caps = status_line_re()
            .captures(line)
            .ok_or_else(|| Error::MalformedStatusLine(line.to_string()))?;

        let code = caps[1]
            .parse::<u16>()
            .map_err(|_| Error::MalformedStatusLine(line.to_string()))?;
        self.status_code = Some(code);
        self.status_text = caps
            .get(2)
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        Ok(())
    }

    fn parse_header_line(&mut self, line: &str) -> Result<()> {
        let caps = header_line_re()
            .captures(line)
            .ok_or_else(|| Error::MalformedHeader(line.to_string()))?;

        let name = caps[1].trim().to_string();
        let value = caps[2].trim().to_string();

        if name.eq_ignore_ascii_case("Content-Length") {
            self.content_length = value
                .parse()
                .map_err(|_| Error::MalformedHeader(line.to_string()))?;
        } else if name.eq_ignore_ascii_case("WWW-Authenticate") {
            // <scheme> <key>="<value>",<key>="<value>",...
            if let Some((scheme, params)) = value.split_once(' ') {
                if scheme.eq_ignore_ascii_case("Digest") {
                    self.parse_auth("WWW-Authenticate-Digest", params.trim());
                } else if scheme.eq_ignore_ascii_case("Basic") {
                    self.parse_auth("WWW-Authenticate-Basic", params.trim());
                }
            }
        } else if name.eq_ignore_ascii_case("Content-Type") {
            self.content_type = Some(value.clone());
        } else if name.eq_ignore_ascii_case("icy-metaint") {
            self.metadata_interval = Some(
                value
                    .parse()
                    .map_err(|_| Error::MalformedHeader(line.to_string()))?,
            );
        }

        self.headers.insert(name.to_ascii_uppercase(), value);
        Ok(())
    }

    fn parse_auth(&mut self, prefix: &str, params: &str) {
        for param in params.split(',') {
            let Some((key, value)) = param.split_once('=') else {
                continue;
            };
            let key = key.trim();
            if key.is_empty() {
                continue;
            }
            let name = format!("{prefix}-{key}").to_ascii_uppercase();
            self.headers
                .insert(name, value.replace('"', "").trim().to_string());
        }
    }

    pub fn state(&self) -> ParserState {
        self.state
    }

    /// A full response (including any body) has been parsed
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The input did not start with a recognized response preface
    pub fn is_foreign(&self) -> bool {
        self.foreign
    }

    pub fn status_code(&self) -> Option<u16> {
        self.status_code
    }

    pub fn status_text(&self) -> &str {
        &self.status_text
    }

    /// Case-insensitive header lookup
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_uppercase())
            .map(String::as_str)
    }

    /// A `WWW-Authenticate` parameter, e.g. `auth_param("Digest", "realm")`
    pub fn auth_param(&self, scheme: &str, param: &str) -> Option<&str> {
        self.header(&format!("WWW-Authenticate-{scheme}-{param}"))
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    /// `icy-metaint` value
    pub fn metadata_interval(&self) -> Option<u32> {
        self.metadata_interval
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }
}

/// Next CRLF-terminated line and the bytes it occupies including the CRLF.
fn next_line(buf: &[u8]) -> Option<(String, usize)> {
    let pos = buf.windows(2).position(|w| w == b"\r\n")?;
    let line = buf[..pos].iter().map(|&b| b as char).collect();
    Some((line, pos + 2))
}
