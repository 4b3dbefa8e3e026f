//! Message kind definitions
//!
//! Maps the request kinds understood by the server to their wire ids.

use std::fmt;

use super::CodecError;

/// Request kinds carried in the frame's message type field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
#[repr(u16)]
pub enum MessageKind {
    /// Ask the server to create a meeting
    CreateMeeting = 1,
}

impl MessageKind {
    /// All known kinds, in wire id order
    pub const ALL: [MessageKind; 1] = [MessageKind::CreateMeeting];

    /// Wire id of this kind
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Resolve a wire id to a known kind
    pub fn from_id(id: u16) -> Result<Self, CodecError> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.id() == id)
            .ok_or(CodecError::InvalidMessageKind(id))
    }

    /// Protocol name of this kind
    pub fn name(self) -> &'static str {
        match self {
            MessageKind::CreateMeeting => "CREATE_MEETING",
        }
    }
}

impl TryFrom<u16> for MessageKind {
    type Error = CodecError;

    fn try_from(id: u16) -> Result<Self, Self::Error> {
        Self::from_id(id)
    }
}

impl From<MessageKind> for u16 {
    fn from(kind: MessageKind) -> Self {
        kind.id()
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
