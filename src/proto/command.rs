/// The header possibilities for one wire message.
///
/// Wire names are the exact uppercase tokens (`SAMPLING_DONE` etc.) and are
/// matched case-sensitively; anything else parses as `Unknown`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CommandHeader {
    #[default]
    Unknown,
    Start,
    Ack,
    SamplingDone,
    Nack,
    Finish,
    Stop,
    Flush,
    Error,
}

impl CommandHeader {
    pub fn as_wire(self) -> &'static str {
        match self {
            CommandHeader::Unknown => "UNKNOWN",
            CommandHeader::Start => "START",
            CommandHeader::Ack => "ACK",
            CommandHeader::SamplingDone => "SAMPLING_DONE",
            CommandHeader::Nack => "NACK",
            CommandHeader::Finish => "FINISH",
            CommandHeader::Stop => "STOP",
            CommandHeader::Flush => "FLUSH",
            CommandHeader::Error => "ERROR",
        }
    }

    /// Exact-match lookup of a wire token; unmatched tokens are `Unknown`,
    /// not an error (callers that require validity must check).
    pub fn from_wire(token: &str) -> Self {
        match token {
            "START" => CommandHeader::Start,
            "ACK" => CommandHeader::Ack,
            "SAMPLING_DONE" => CommandHeader::SamplingDone,
            "NACK" => CommandHeader::Nack,
            "FINISH" => CommandHeader::Finish,
            "STOP" => CommandHeader::Stop,
            "FLUSH" => CommandHeader::Flush,
            "ERROR" => CommandHeader::Error,
            _ => CommandHeader::Unknown,
        }
    }
}

/// One parsed protocol message. Immutable value data, built per message and
/// discarded after use; an empty string field means "absent".
///
/// `ack_of` is only meaningful when `command == Ack` and names which command
/// is being acknowledged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Packet {
    pub command: CommandHeader,
    pub sample_id: String,
    pub recipe_name: String,
    pub operator: String,
    pub comment: String,
    pub error_message: String,
    pub ack_of: CommandHeader,
}

impl Packet {
    pub fn bare(command: CommandHeader) -> Self {
        Packet {
            command,
            ..Packet::default()
        }
    }

    pub fn nack(error_message: impl Into<String>) -> Self {
        Packet {
            command: CommandHeader::Nack,
            error_message: error_message.into(),
            ..Packet::default()
        }
    }
}
