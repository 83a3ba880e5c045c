//! Wire protocol format, one frame per line:
//!
//!   TAG PAYLOAD \n        (no separator between tag and payload)
//!
//! Tags:
//!   t<text>               a chat line, already prefixed with "name: "
//!   n<name> <name> ...    the current roster, names separated by one space
//!   c                     explicit disconnect notice
//!
//! The name handshake that precedes tagged traffic is untagged: the client
//! sends the bare name, the server answers with a [`HandshakeReply`].

use std::borrow::Cow;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

use crate::error::ChatError;

pub const TEXT_TAG: char = 't';
pub const ROSTER_TAG: char = 'n';
pub const DISCONNECT_TAG: char = 'c';

/// A decoded frame. Borrows from the line it was parsed from and owns data
/// only when built locally for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame<'a> {
    Text { body: Cow<'a, str> },
    Roster { names: Vec<Cow<'a, str>> },
    Disconnect,
}

impl Frame<'static> {
    pub fn text(body: impl Into<String>) -> Self {
        Frame::Text {
            body: Cow::Owned(body.into()),
        }
    }

    pub fn roster<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Frame::Roster {
            names: names.into_iter().map(|n| Cow::Owned(n.into())).collect(),
        }
    }
}

impl Frame<'_> {
    /// Render the frame as a complete wire line, including the trailing `\n`.
    ///
    /// Line breaks inside a text body would split the frame in two, so they
    /// are flattened to spaces.
    pub fn encode(&self) -> String {
        match self {
            Frame::Text { body } => {
                let mut line = String::with_capacity(body.len() + 2);
                line.push(TEXT_TAG);
                line.extend(body.chars().map(|c| match c {
                    '\r' | '\n' => ' ',
                    other => other,
                }));
                line.push('\n');
                line
            }
            Frame::Roster { names } => {
                let joined = names
                    .iter()
                    .map(|n| n.as_ref())
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{ROSTER_TAG}{joined}\n")
            }
            Frame::Disconnect => format!("{DISCONNECT_TAG}\n"),
        }
    }
}

/// Parse one line into a frame.
///
/// `Ok(None)` means the line was empty; callers skip it.
pub fn parse_frame(line: &str) -> Result<Option<Frame<'_>>, ChatError> {
    let line = strip_line_ending(line);

    let mut chars = line.chars();
    let Some(tag) = chars.next() else {
        return Ok(None);
    };
    let payload = chars.as_str();

    match tag {
        TEXT_TAG => Ok(Some(Frame::Text {
            body: Cow::Borrowed(payload),
        })),
        ROSTER_TAG => Ok(Some(Frame::Roster {
            names: payload
                .split(' ')
                .filter(|n| !n.is_empty())
                .map(Cow::Borrowed)
                .collect(),
        })),
        DISCONNECT_TAG => Ok(Some(Frame::Disconnect)),
        other => Err(ChatError::UnknownFrameTag(other)),
    }
}

/// The server's answer to one name attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeReply {
    Accepted,
    NameTaken,
    InvalidName,
}

impl HandshakeReply {
    pub fn encode(self) -> &'static str {
        match self {
            HandshakeReply::Accepted => "ok\n",
            HandshakeReply::NameTaken => "taken\n",
            HandshakeReply::InvalidName => "invalid\n",
        }
    }

    pub fn parse(line: &str) -> Result<Self, ChatError> {
        match strip_line_ending(line) {
            "ok" => Ok(HandshakeReply::Accepted),
            "taken" => Ok(HandshakeReply::NameTaken),
            "invalid" => Ok(HandshakeReply::InvalidName),
            other => Err(ChatError::Parse(format!("unexpected handshake reply: {other}"))),
        }
    }
}

/// Names travel space-separated inside roster frames, so they may not
/// contain whitespace or control characters.
pub fn validate_name(name: &str, max_len: usize) -> Result<(), ChatError> {
    let valid = !name.is_empty()
        && name.chars().count() <= max_len
        && !name.chars().any(|c| c.is_whitespace() || c.is_control());

    if valid {
        Ok(())
    } else {
        Err(ChatError::InvalidName(name.to_string()))
    }
}

pub fn strip_line_ending(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Read one line of at most `max_len` bytes (terminator excluded).
///
/// Returns `Ok(None)` on a clean EOF. A final line without a terminator is
/// still returned, since the peer may close right after writing it.
pub async fn read_line_bounded<R>(
    reader: &mut R,
    buf: &mut String,
    max_len: usize,
) -> Result<Option<()>, ChatError>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    // Room for the payload plus "\r\n".
    let limit = max_len as u64 + 2;
    let bytes = (&mut *reader).take(limit).read_line(buf).await?;
    if bytes == 0 {
        return Ok(None);
    }
    if strip_line_ending(buf).len() > max_len {
        return Err(ChatError::FrameTooLong(max_len));
    }
    Ok(Some(()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_frame_keeps_payload_verbatim() {
        let frame = parse_frame("tAnn: hi there\n").unwrap().unwrap();
        assert_eq!(frame, Frame::text("Ann: hi there"));
    }

    #[test]
    fn roster_frame_splits_on_spaces() {
        let frame = parse_frame("nAnn Ben\r\n").unwrap().unwrap();
        assert_eq!(frame, Frame::roster(["Ann", "Ben"]));
    }

    #[test]
    fn empty_roster_has_no_names() {
        let frame = parse_frame("n\n").unwrap().unwrap();
        assert_eq!(frame, Frame::Roster { names: Vec::new() });
    }

    #[test]
    fn disconnect_ignores_payload() {
        assert_eq!(parse_frame("c").unwrap(), Some(Frame::Disconnect));
        assert_eq!(parse_frame("cbye\n").unwrap(), Some(Frame::Disconnect));
    }

    #[test]
    fn empty_line_is_a_no_op() {
        assert_eq!(parse_frame("").unwrap(), None);
        assert_eq!(parse_frame("\n").unwrap(), None);
        assert_eq!(parse_frame("\r\n").unwrap(), None);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        match parse_frame("xwhatever\n") {
            Err(ChatError::UnknownFrameTag('x')) => {}
            other => panic!("expected unknown tag error, got {other:?}"),
        }
    }

    #[test]
    fn text_encoding_flattens_line_breaks() {
        let line = Frame::text("one\ntwo\r\nthree").encode();
        assert_eq!(line, "tone two  three\n");
        assert_eq!(line.matches('\n').count(), 1);
    }

    #[test]
    fn roster_and_disconnect_encoding() {
        assert_eq!(Frame::roster(["Ann", "Ben"]).encode(), "nAnn Ben\n");
        assert_eq!(Frame::roster(Vec::<String>::new()).encode(), "n\n");
        assert_eq!(Frame::Disconnect.encode(), "c\n");
    }

    #[test]
    fn handshake_replies() {
        for reply in [
            HandshakeReply::Accepted,
            HandshakeReply::NameTaken,
            HandshakeReply::InvalidName,
        ] {
            assert_eq!(HandshakeReply::parse(reply.encode()).unwrap(), reply);
        }
        assert!(HandshakeReply::parse("maybe\n").is_err());
    }

    #[test]
    fn name_validation() {
        assert!(validate_name("Ann", 32).is_ok());
        assert!(validate_name("", 32).is_err());
        assert!(validate_name("Ann Lee", 32).is_err());
        assert!(validate_name("tab\there", 32).is_err());
        assert!(validate_name("abcd", 3).is_err());
        assert!(validate_name("äöü", 3).is_ok());
    }

    #[tokio::test]
    async fn bounded_read_rejects_long_lines() {
        let data: &[u8] = b"short\nthis line is far too long\n";
        let mut reader = tokio::io::BufReader::new(data);
        let mut buf = String::new();

        assert!(read_line_bounded(&mut reader, &mut buf, 8).await.unwrap().is_some());
        assert_eq!(buf, "short\n");

        match read_line_bounded(&mut reader, &mut buf, 8).await {
            Err(ChatError::FrameTooLong(8)) => {}
            other => panic!("expected FrameTooLong, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn bounded_read_reports_eof() {
        let data: &[u8] = b"last";
        let mut reader = tokio::io::BufReader::new(data);
        let mut buf = String::new();

        assert!(read_line_bounded(&mut reader, &mut buf, 16).await.unwrap().is_some());
        assert_eq!(buf, "last");
        assert!(read_line_bounded(&mut reader, &mut buf, 16).await.unwrap().is_none());
    }
}
