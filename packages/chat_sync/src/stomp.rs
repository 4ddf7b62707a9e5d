//! STOMP 1.2 frame codec.
//!
//! Wire format, one frame per WebSocket text message:
//!
//! ```text
//! COMMAND\n
//! name:value\n
//! ...\n
//! \n
//! body^@
//! ```
//!
//! A message consisting only of EOLs is a heartbeat. Header values are
//! escaped (`\\`, `\n`, `\r`, `\c`) in every frame except CONNECT and
//! CONNECTED.

use std::fmt;
use std::time::Duration;

use crate::error::FrameError;

/// Destination private messages are published to.
pub const PUBLISH_DESTINATION: &str = "/app/private-message";

const NUL: char = '\0';

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Connect,
    Stomp,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Connect => "CONNECT",
            Command::Stomp => "STOMP",
            Command::Connected => "CONNECTED",
            Command::Send => "SEND",
            Command::Subscribe => "SUBSCRIBE",
            Command::Unsubscribe => "UNSUBSCRIBE",
            Command::Message => "MESSAGE",
            Command::Receipt => "RECEIPT",
            Command::Error => "ERROR",
            Command::Disconnect => "DISCONNECT",
        }
    }

    fn parse(s: &str) -> Result<Self, FrameError> {
        Ok(match s {
            "CONNECT" => Command::Connect,
            "STOMP" => Command::Stomp,
            "CONNECTED" => Command::Connected,
            "SEND" => Command::Send,
            "SUBSCRIBE" => Command::Subscribe,
            "UNSUBSCRIBE" => Command::Unsubscribe,
            "MESSAGE" => Command::Message,
            "RECEIPT" => Command::Receipt,
            "ERROR" => Command::Error,
            "DISCONNECT" => Command::Disconnect,
            other => return Err(FrameError::UnknownCommand(other.to_string())),
        })
    }

    /// CONNECT and CONNECTED headers are sent verbatim.
    fn escapes_headers(&self) -> bool {
        !matches!(self, Command::Connect | Command::Stomp | Command::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Heartbeat intervals as advertised in the `heart-beat` header.
/// Zero means "not supported" for that direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartBeat {
    pub outgoing_ms: u64,
    pub incoming_ms: u64,
}

impl HeartBeat {
    pub const DISABLED: HeartBeat = HeartBeat {
        outgoing_ms: 0,
        incoming_ms: 0,
    };

    fn parse(value: &str) -> Option<Self> {
        let (out, inc) = value.split_once(',')?;
        Some(Self {
            outgoing_ms: out.trim().parse().ok()?,
            incoming_ms: inc.trim().parse().ok()?,
        })
    }

    /// Resolve the effective intervals given our advertisement (`self`) and
    /// the broker's. Returns `(send_every, expect_within)`.
    pub fn negotiate(&self, server: &HeartBeat) -> (Option<Duration>, Option<Duration>) {
        let pick = |ours: u64, theirs: u64| {
            if ours == 0 || theirs == 0 {
                None
            } else {
                Some(Duration::from_millis(ours.max(theirs)))
            }
        };
        (
            pick(self.outgoing_ms, server.incoming_ms),
            pick(self.incoming_ms, server.outgoing_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub command: Command,
    headers: Vec<(String, String)>,
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

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value for `name`; later repeats are ignored as STOMP requires.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn headers(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // -- constructors for the frames the client sends --

    pub fn connect(host: &str, bearer: &str, heart_beat: HeartBeat) -> Self {
        Frame::new(Command::Connect)
            .header("accept-version", "1.2")
            .header("host", host)
            .header(
                "heart-beat",
                format!("{},{}", heart_beat.outgoing_ms, heart_beat.incoming_ms),
            )
            .header("Authorization", format!("Bearer {bearer}"))
    }

    pub fn subscribe(id: &str, destination: &str) -> Self {
        Frame::new(Command::Subscribe)
            .header("id", id)
            .header("destination", destination)
            .header("ack", "auto")
    }

    pub fn unsubscribe(id: &str) -> Self {
        Frame::new(Command::Unsubscribe).header("id", id)
    }

    pub fn send_json(destination: &str, json: String) -> Self {
        Frame::new(Command::Send)
            .header("destination", destination)
            .header("content-type", "application/json")
            .with_body(json)
    }

    pub fn disconnect() -> Self {
        Frame::new(Command::Disconnect)
    }

    /// The `heart-beat` header, if present and well-formed.
    pub fn heart_beat(&self) -> Option<HeartBeat> {
        self.get("heart-beat").and_then(HeartBeat::parse)
    }

    /// Human-readable reason carried by an ERROR frame.
    pub fn error_message(&self) -> String {
        match self.get("message") {
            Some(m) if !m.is_empty() => m.to_string(),
            _ if !self.body.is_empty() => self.body.trim().to_string(),
            _ => "unspecified broker error".to_string(),
        }
    }

    // -- codec --

    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(64 + self.body.len());
        out.push_str(self.command.as_str());
        out.push('\n');
        for (k, v) in &self.headers {
            if escape {
                out.push_str(&escape_header(k));
                out.push(':');
                out.push_str(&escape_header(v));
            } else {
                out.push_str(k);
                out.push(':');
                out.push_str(v);
            }
            out.push('\n');
        }
        if !self.body.is_empty() && self.get("content-length").is_none() {
            out.push_str(&format!("content-length:{}\n", self.body.len()));
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push(NUL);
        out
    }

    /// Decode one frame. Returns `Ok(None)` for a heartbeat.
    pub fn decode(input: &str) -> Result<Option<Self>, FrameError> {
        let input = input.trim_start_matches(['\r', '\n']);
        if input.is_empty() {
            return Ok(None);
        }

        let (command_line, mut rest) = split_line(input)
            .ok_or_else(|| FrameError::Stomp("missing command line".to_string()))?;
        let command = Command::parse(command_line)?;
        let unescape = command.escapes_headers();

        let mut headers = Vec::new();
        loop {
            let (line, next) = split_line(rest)
                .ok_or_else(|| FrameError::Stomp("unterminated header block".to_string()))?;
            rest = next;
            if line.is_empty() {
                break;
            }
            let (k, v) = line
                .split_once(':')
                .ok_or_else(|| FrameError::Stomp(format!("header without colon: {line}")))?;
            if unescape {
                headers.push((unescape_header(k)?, unescape_header(v)?));
            } else {
                headers.push((k.to_string(), v.to_string()));
            }
        }

        let frame = Frame {
            command,
            headers,
            body: String::new(),
        };

        let body = match frame.get("content-length") {
            Some(len) => {
                let len: usize = len
                    .trim()
                    .parse()
                    .map_err(|_| FrameError::Stomp(format!("bad content-length: {len}")))?;
                let body = rest
                    .get(..len)
                    .ok_or_else(|| FrameError::Stomp("body shorter than content-length".into()))?;
                if !rest[len..].starts_with(NUL) {
                    return Err(FrameError::Stomp("missing NUL terminator".to_string()));
                }
                body
            }
            None => {
                let end = rest
                    .find(NUL)
                    .ok_or_else(|| FrameError::Stomp("missing NUL terminator".to_string()))?;
                &rest[..end]
            }
        };

        Ok(Some(Frame {
            body: body.to_string(),
            ..frame
        }))
    }
}

/// Split off one line, accepting both `\n` and `\r\n`.
fn split_line(s: &str) -> Option<(&str, &str)> {
    let idx = s.find('\n')?;
    let line = s[..idx].strip_suffix('\r').unwrap_or(&s[..idx]);
    Some((line, &s[idx + 1..]))
}

fn escape_header(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            ':' => out.push_str("\\c"),
            c => out.push(c),
        }
    }
    out
}

fn unescape_header(s: &str) -> Result<String, FrameError> {
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
                return Err(FrameError::Stomp(format!(
                    "invalid header escape: \\{}",
                    other.map(String::from).unwrap_or_default()
                )));
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_only_is_none() {
        assert_eq!(Frame::decode("\n").unwrap(), None);
        assert_eq!(Frame::decode("\r\n\r\n").unwrap(), None);
    }

    #[test]
    fn decodes_message_frame() {
        let raw = "MESSAGE\ndestination:/user/u1/private\nsubscription:sub-0\nmessage-id:7\n\n{\"a\":1}\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Message);
        assert_eq!(frame.get("subscription"), Some("sub-0"));
        assert_eq!(frame.body, "{\"a\":1}");
    }

    #[test]
    fn decodes_crlf_and_leading_heartbeats() {
        let raw = "\n\nCONNECTED\r\nversion:1.2\r\nheart-beat:0,10000\r\n\r\n\0\n";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.command, Command::Connected);
        assert_eq!(
            frame.heart_beat(),
            Some(HeartBeat {
                outgoing_ms: 0,
                incoming_ms: 10000
            })
        );
    }

    #[test]
    fn content_length_allows_nul_in_body() {
        let raw = "MESSAGE\ncontent-length:3\n\na\0b\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.body, "a\0b");
    }

    #[test]
    fn first_header_wins() {
        let raw = "MESSAGE\nfoo:first\nfoo:second\n\n\0";
        let frame = Frame::decode(raw).unwrap().unwrap();
        assert_eq!(frame.get("foo"), Some("first"));
    }

    #[test]
    fn header_escapes_are_applied_outside_connect() {
        let frame = Frame::new(Command::Send).header("note", "a:b\nc");
        let encoded = frame.encode();
        assert!(encoded.contains("note:a\\cb\\nc\n"));
        let decoded = Frame::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.get("note"), Some("a:b\nc"));
    }

    #[test]
    fn connect_headers_are_verbatim() {
        let frame = Frame::connect("broker", "tok:en", HeartBeat::DISABLED);
        let encoded = frame.encode();
        assert!(encoded.starts_with("CONNECT\n"));
        assert!(encoded.contains("Authorization:Bearer tok:en\n"));
        assert!(encoded.contains("heart-beat:0,0\n"));
    }

    #[test]
    fn send_frame_carries_length_and_type() {
        let frame = Frame::send_json(PUBLISH_DESTINATION, "{\"x\":\"é\"}".to_string());
        let encoded = frame.encode();
        assert!(encoded.contains("content-type:application/json\n"));
        assert!(encoded.contains(&format!("content-length:{}\n", frame.body.len())));
        let decoded = Frame::decode(&encoded).unwrap().unwrap();
        assert_eq!(decoded.body, frame.body);
        assert_eq!(decoded.get("destination"), Some(PUBLISH_DESTINATION));
    }

    #[test]
    fn rejects_unknown_command() {
        assert!(matches!(
            Frame::decode("HELLO\n\n\0"),
            Err(FrameError::UnknownCommand(_))
        ));
    }

    #[test]
    fn rejects_missing_terminator() {
        assert!(Frame::decode("MESSAGE\n\nbody").is_err());
        assert!(Frame::decode("MESSAGE\ncontent-length:10\n\nshort\0").is_err());
    }

    #[test]
    fn rejects_bad_escape() {
        assert!(Frame::decode("MESSAGE\nx:a\\tb\n\n\0").is_err());
    }

    #[test]
    fn error_message_prefers_header() {
        let frame = Frame::new(Command::Error)
            .header("message", "bad token")
            .with_body("details");
        assert_eq!(frame.error_message(), "bad token");
        let frame = Frame::new(Command::Error).with_body("only body\n");
        assert_eq!(frame.error_message(), "only body");
    }

    #[test]
    fn heartbeat_negotiation() {
        let ours = HeartBeat {
            outgoing_ms: 4000,
            incoming_ms: 4000,
        };
        let theirs = HeartBeat {
            outgoing_ms: 10000,
            incoming_ms: 0,
        };
        let (send, expect) = ours.negotiate(&theirs);
        assert_eq!(send, None);
        assert_eq!(expect, Some(Duration::from_millis(10000)));
    }
}
