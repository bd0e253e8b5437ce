//! STOMP 1.2 frame codec.
//!
//! Frames are text: a command line, `name:value` header lines, a blank line,
//! the body and a terminating NUL octet. A bare end-of-line between frames is
//! a heartbeat. Header values are escaped in every frame except `CONNECT` and
//! `CONNECTED`.

use std::fmt;

use hd_core::error::{HdError, HdResult};

/// STOMP commands used by the client and the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Ack,
    Nack,
    Begin,
    Commit,
    Abort,
    Disconnect,
    Message,
    Receipt,
    Error,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Ack => "ACK",
            Self::Nack => "NACK",
            Self::Begin => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Abort => "ABORT",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "CONNECT" => Self::Connect,
            "STOMP" => Self::Stomp,
            "CONNECTED" => Self::Connected,
            "SEND" => Self::Send,
            "SUBSCRIBE" => Self::Subscribe,
            "UNSUBSCRIBE" => Self::Unsubscribe,
            "ACK" => Self::Ack,
            "NACK" => Self::Nack,
            "BEGIN" => Self::Begin,
            "COMMIT" => Self::Commit,
            "ABORT" => Self::Abort,
            "DISCONNECT" => Self::Disconnect,
            "MESSAGE" => Self::Message,
            "RECEIPT" => Self::Receipt,
            "ERROR" => Self::Error,
            _ => return None,
        })
    }

    /// Whether header values of this command are sent verbatim.
    fn raw_headers(&self) -> bool {
        matches!(self, Self::Connect | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single STOMP frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    /// Headers in wire order. Repeated names are kept; the first one wins.
    pub headers: Vec<(String, String)>,
    pub body: String,
}

impl Frame {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            headers: Vec::new(),
            body: String::new(),
        }
    }

    pub fn header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_string(), value.into()));
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Look up the first value of a header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// `CONNECT` frame carrying the bearer credential and heartbeat offer.
    pub fn connect(host: &str, bearer: &str, heartbeat: (u64, u64)) -> Self {
        Self::new(Command::Connect)
            .header("accept-version", hd_core::constants::STOMP_VERSION)
            .header("host", host)
            .header("heart-beat", format!("{},{}", heartbeat.0, heartbeat.1))
            .header("Authorization", bearer)
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Self::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Self::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send(destination: &str, json: impl Into<String>) -> Self {
        Self::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(json)
    }

    pub fn disconnect() -> Self {
        Self::new(Command::Disconnect)
    }

    /// Serialize to wire text, adding `content-length` for non-empty bodies.
    pub fn encode(&self) -> String {
        let raw = self.command.raw_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in &self.headers {
            if raw {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            } else {
                out.push_str(&escape(name));
                out.push(':');
                out.push_str(&escape(value));
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }
}

/// Heartbeat payload: a single end-of-line.
pub const HEARTBEAT: &str = "\n";

/// Something read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Heartbeat,
    Frame(Frame),
}

/// Incremental decoder. Transport messages may carry several frames, a
/// partial frame, or only heartbeats.
#[derive(Debug)]
pub struct FrameDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Feed a chunk and return everything that is now complete.
    pub fn push(&mut self, chunk: &str) -> HdResult<Vec<Inbound>> {
        self.buf.extend_from_slice(chunk.as_bytes());
        let mut out = Vec::new();
        loop {
            // Leading EOLs are heartbeats.
            let mut skipped = 0;
            while skipped < self.buf.len() {
                match self.buf[skipped] {
                    b'\n' => {
                        out.push(Inbound::Heartbeat);
                        skipped += 1;
                    }
                    b'\r' if self.buf.get(skipped + 1) == Some(&b'\n') => {
                        out.push(Inbound::Heartbeat);
                        skipped += 2;
                    }
                    _ => break,
                }
            }
            self.buf.drain(..skipped);

            if self.buf.is_empty() {
                return Ok(out);
            }
            match self.try_frame()? {
                Some(frame) => out.push(Inbound::Frame(frame)),
                None => {
                    if self.buf.len() > self.max_frame_bytes {
                        self.buf.clear();
                        return Err(HdError::Frame(format!(
                            "frame exceeds {} bytes",
                            self.max_frame_bytes
                        )));
                    }
                    return Ok(out);
                }
            }
        }
    }

    fn try_frame(&mut self) -> HdResult<Option<Frame>> {
        let Some(head_end) = find_head_end(&self.buf) else {
            return Ok(None);
        };
        let head = std::str::from_utf8(&self.buf[..head_end.start])
            .map_err(|e| HdError::Frame(format!("invalid utf-8 in frame head: {e}")))?;

        let mut lines = head.split('\n').map(|l| l.strip_suffix('\r').unwrap_or(l));
        let command_line = lines.next().unwrap_or_default();
        let command = Command::parse(command_line)
            .ok_or_else(|| HdError::Frame(format!("unknown command: {command_line:?}")))?;

        let mut headers = Vec::new();
        for line in lines.filter(|l| !l.is_empty()) {
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| HdError::Frame(format!("malformed header line: {line:?}")))?;
            if command.raw_headers() {
                headers.push((name.to_string(), value.to_string()));
            } else {
                headers.push((unescape(name)?, unescape(value)?));
            }
        }

        let body_start = head_end.end;
        let content_length = headers
            .iter()
            .find(|(k, _)| k == "content-length")
            .map(|(_, v)| {
                v.trim()
                    .parse::<usize>()
                    .map_err(|_| HdError::Frame(format!("bad content-length: {v}")))
            })
            .transpose()?;

        let body_end = match content_length {
            Some(len) => {
                let end = body_start
                    .checked_add(len)
                    .filter(|end| *end < self.max_frame_bytes)
                    .ok_or_else(|| {
                        self.buf.clear();
                        HdError::Frame(format!(
                            "content-length {len} exceeds {} bytes",
                            self.max_frame_bytes
                        ))
                    })?;
                if self.buf.len() <= end {
                    return Ok(None);
                }
                if self.buf[end] != 0 {
                    return Err(HdError::Frame("body not NUL-terminated".into()));
                }
                end
            }
            None => match self.buf[body_start..].iter().position(|b| *b == 0) {
                Some(pos) => body_start + pos,
                None => return Ok(None),
            },
        };

        let body = String::from_utf8(self.buf[body_start..body_end].to_vec())
            .map_err(|e| HdError::Frame(format!("invalid utf-8 in body: {e}")))?;
        self.buf.drain(..=body_end);

        Ok(Some(Frame {
            command,
            headers,
            body,
        }))
    }
}

/// Span of the blank line ending the frame head.
fn find_head_end(buf: &[u8]) -> Option<std::ops::Range<usize>> {
    let mut i = 0;
    while i < buf.len() {
        if buf[i] == b'\n' {
            match buf.get(i + 1) {
                Some(b'\n') => return Some(i..i + 2),
                Some(b'\r') if buf.get(i + 2) == Some(&b'\n') => return Some(i..i + 3),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
    out
}

fn unescape(s: &str) -> HdResult<String> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('c') => out.push(':'),
            other => {
                return Err(HdError::Frame(format!(
                    "undefined header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )))
            }
        }
    }
    Ok(out)
}
