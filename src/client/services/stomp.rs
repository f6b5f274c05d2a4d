//! Minimal STOMP 1.2 framing, enough to talk to a Spring message broker
//! through its SockJS raw WebSocket transport.

use std::fmt;

pub const USER_QUEUE: &str = "/user/queue/messages";
pub const CHAT_DESTINATION: &str = "/app/chat";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameError(pub String);

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed STOMP frame: {}", self.0)
    }
}

impl std::error::Error for FrameError {}

impl Frame {
    pub fn new(command: &str) -> Self {
        Self { command: command.to_string(), headers: Vec::new(), body: String::new() }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn body(mut self, body: String) -> Self {
        self.body = body;
        self
    }

    pub fn connect(host: &str, bearer_token: &str) -> Self {
        Frame::new("CONNECT")
            .header("accept-version", "1.2")
            .header("host", host)
            .header("heart-beat", "0,0")
            .header("Authorization", &format!("Bearer {}", bearer_token))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new("SUBSCRIBE").header("id", id).header("destination", destination).header("ack", "auto")
    }

    pub fn send_json(destination: &str, json: String) -> Self {
        Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "application/json")
            .body(json)
    }

    pub fn disconnect() -> Self {
        Frame::new("DISCONNECT")
    }

    /// First value for `name`; repeated headers keep the first occurrence.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k == name).map(|(_, v)| v.as_str())
    }

    pub fn encode(&self) -> String {
        // CONNECT headers are never escaped
        let escape = self.command != "CONNECT" && self.command != "CONNECTED";
        let mut out = String::with_capacity(self.body.len() + 64);
        out.push_str(&self.command);
        out.push('\n');
        for (name, value) in &self.headers {
            if escape {
                out.push_str(&escape_header(name));
                out.push(':');
                out.push_str(&escape_header(value));
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
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

/// Parse every frame contained in one WebSocket text message.
///
/// Heart-beats (bare EOLs) produce no frame.
pub fn parse_frames(text: &str) -> Result<Vec<Frame>, FrameError> {
    let mut frames = Vec::new();
    let mut rest = text;
    loop {
        rest = rest.trim_start_matches(['\n', '\r']);
        if rest.is_empty() {
            break;
        }
        let (frame, consumed) = parse_one(rest)?;
        frames.push(frame);
        rest = &rest[consumed..];
    }
    Ok(frames)
}

fn parse_one(input: &str) -> Result<(Frame, usize), FrameError> {
    // whichever blank line comes first ends the headers
    let lf = input.find("\n\n").map(|i| (i, 2));
    let crlf = input.find("\r\n\r\n").map(|i| (i, 4));
    let head_end = match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
    .ok_or_else(|| FrameError("missing header terminator".to_string()))?;
    let head = &input[..head_end.0];
    let body_start = head_end.0 + head_end.1;

    let mut lines = head.lines();
    let command = lines
        .next()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .ok_or_else(|| FrameError("missing command".to_string()))?
        .to_string();
    let unescape = command != "CONNECT" && command != "CONNECTED";

    let mut headers = Vec::new();
    for line in lines {
        let line = line.trim_end_matches('\r');
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FrameError(format!("bad header line '{}'", line)))?;
        if unescape {
            headers.push((unescape_header(name)?, unescape_header(value)?));
        } else {
            headers.push((name.to_string(), value.to_string()));
        }
    }

    let content_length = headers
        .iter()
        .find(|(k, _)| k == "content-length")
        .and_then(|(_, v)| v.trim().parse::<usize>().ok());
    let remaining = &input[body_start..];
    let (body, consumed) = match content_length {
        Some(len) if len <= remaining.len() && remaining.is_char_boundary(len) => {
            let after = remaining[len..].strip_prefix('\0').map(|_| 1).unwrap_or(0);
            (remaining[..len].to_string(), body_start + len + after)
        }
        _ => match remaining.find('\0') {
            Some(nul) => (remaining[..nul].to_string(), body_start + nul + 1),
            None => (remaining.to_string(), input.len()),
        },
    };

    Ok((Frame { command, headers, body }, consumed))
}

fn escape_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

fn unescape_header(raw: &str) -> Result<String, FrameError> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
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
            other => return Err(FrameError(format!("undefined escape \\{}", other.map(String::from).unwrap_or_default()))),
        }
    }
    Ok(out)
}
