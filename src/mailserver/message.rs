// Stored messages and their on-disk text layout

use std::fmt;

/// Extension of every stored message file
pub const MESSAGE_EXTENSION: &str = "txt";

/// Identifier of a message within one mailbox
///
/// IDs are positive and allocated as `max + 1` under the mailbox's exclusive
/// lock, so a deleted ID is never handed out again while higher IDs exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MessageId(u64);

impl MessageId {
    /// The first ID of an empty mailbox
    pub const FIRST: MessageId = MessageId(1);

    /// Create an ID, rejecting zero
    pub fn new(raw: u64) -> Option<Self> {
        (raw > 0).then_some(Self(raw))
    }

    /// Parse a client-supplied ID argument
    ///
    /// Only plain ASCII digits are accepted; signs, whitespace and trailing
    /// garbage are rejected rather than partially parsed.
    pub fn parse(arg: &str) -> Option<Self> {
        if arg.is_empty() || !arg.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        arg.parse::<u64>().ok().and_then(Self::new)
    }

    /// Recover the ID from a file name like `12.txt`
    ///
    /// The stem is everything before the first dot and must be numeric.
    pub fn from_file_name(name: &str) -> Option<Self> {
        let stem = name.split('.').next().unwrap_or(name);
        Self::parse(stem)
    }

    /// The ID that follows this one, `None` once `u64` is exhausted
    pub fn next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }

    /// File name of the message with this ID
    pub fn file_name(self) -> String {
        format!("{}.{}", self.0, MESSAGE_EXTENSION)
    }

    /// Raw numeric value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as submitted by SEND
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Authenticated sender
    pub from: String,
    /// Owner of the destination mailbox
    pub to: String,
    pub subject: String,
    /// Body text, possibly empty
    pub body: String,
}

impl Message {
    /// Build a message from the body lines of a SEND request
    ///
    /// Body lines are rejoined with `\n` and terminated by a final newline.
    /// No body lines at all yield an empty body.
    pub fn from_body_lines<S: AsRef<str>>(
        from: impl Into<String>,
        to: impl Into<String>,
        subject: impl Into<String>,
        body_lines: &[S],
    ) -> Self {
        let mut body = String::new();
        if !body_lines.is_empty() {
            let joined: Vec<&str> = body_lines.iter().map(AsRef::as_ref).collect();
            body = joined.join("\n");
            body.push('\n');
        }

        Self {
            from: from.into(),
            to: to.into(),
            subject: subject.into(),
            body,
        }
    }

    /// Serialize to the stored layout: three header lines, a blank line, the body
    pub fn render(&self) -> String {
        format!(
            "{}\n{}\n{}\n\n{}",
            self.from, self.to, self.subject, self.body
        )
    }
}

/// Subject line of stored message text, empty if the file is truncated
pub fn subject_of(text: &str) -> &str {
    text.split('\n').nth(2).unwrap_or("")
}

/// One entry of a mailbox listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSummary {
    pub id: MessageId,
    pub subject: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_id_parsing() {
        assert_eq!(MessageId::parse("7"), MessageId::new(7));
        assert_eq!(MessageId::parse("0"), None);
        assert_eq!(MessageId::parse("-3"), None);
        assert_eq!(MessageId::parse("12abc"), None);
        assert_eq!(MessageId::parse(" 4"), None);
        assert_eq!(MessageId::parse(""), None);
        assert_eq!(MessageId::parse("99999999999999999999999"), None);
    }

    #[test]
    fn test_message_id_from_file_name() {
        assert_eq!(MessageId::from_file_name("12.txt"), MessageId::new(12));
        assert_eq!(MessageId::from_file_name("3"), MessageId::new(3));
        assert_eq!(MessageId::from_file_name(".4.tmp"), None);
        assert_eq!(MessageId::from_file_name("notes.txt"), None);
        assert_eq!(MessageId::FIRST.next().unwrap().file_name(), "2.txt");
        assert_eq!(MessageId::new(u64::MAX).unwrap().next(), None);
    }

    #[test]
    fn test_render_matches_stored_layout() {
        let msg = Message::from_body_lines("alice", "bob", "subj", &["hello"]);
        assert_eq!(msg.render(), "alice\nbob\nsubj\n\nhello\n");

        let no_lines: [&str; 0] = [];
        let empty = Message::from_body_lines("alice", "bob", "subj", &no_lines);
        assert_eq!(empty.render(), "alice\nbob\nsubj\n\n");
    }

    #[test]
    fn test_multiline_body_keeps_blank_lines() {
        let msg = Message::from_body_lines("a", "b", "s", &["one", "", "three"]);
        assert_eq!(msg.body, "one\n\nthree\n");
        assert_eq!(subject_of(&msg.render()), "s");
    }

    #[test]
    fn test_subject_of() {
        assert_eq!(subject_of("a\nb\nhi there\n\nbody"), "hi there");
        assert_eq!(subject_of("a\nb"), "");
    }
}
