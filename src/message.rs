use std::fmt;

use crate::protocol::Frame;

/// A chat line as every participant sees it.
///
/// Display format: `sender: body`. The sender prefix is part of the text
/// handed to the UI, so clients never reassemble it themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatLine {
    pub sender: String,
    pub body: String,
}

impl ChatLine {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            body: body.into(),
        }
    }
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.sender, self.body)
    }
}

impl From<ChatLine> for Frame<'static> {
    fn from(line: ChatLine) -> Self {
        Frame::text(line.to_string())
    }
}
