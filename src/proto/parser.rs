use thiserror::Error;

use super::command::{CommandHeader, Packet};

/// Internal parse faults. These never escape `parse_packet`; they fold into
/// a `NACK` packet carrying the rendered message, so a malformed command can
/// never take down the message loop.
#[derive(Debug, Error)]
enum PacketError {
    #[error("Field {0} was out of range - Most likely some parameter is missing from the message.")]
    FieldOutOfRange(usize),
    #[error("Unable to interpret acknowledge, unknown command acknowledged")]
    UnknownAcknowledged,
}

/// Parse one raw wire message.
///
/// Trailing NUL padding (socket buffers) is stripped first. An empty message
/// or an unrecognized bare header yields `Unknown`; a recognized header with
/// missing or malformed fields yields `Nack` with a human-readable reason.
pub fn parse_packet(raw: &str) -> Packet {
    let message = raw.trim_end_matches('\0');
    if message.is_empty() {
        return Packet::default();
    }

    let tokens: Vec<&str> = message.split('|').collect();
    let command = CommandHeader::from_wire(tokens[0]);
    match parse_fields(command, &tokens[1..]) {
        Ok(packet) => packet,
        Err(err) => Packet::nack(err.to_string()),
    }
}

fn parse_fields(command: CommandHeader, mut fields: &[&str]) -> Result<Packet, PacketError> {
    let mut packet = Packet::bare(command);

    // An acknowledge names the command it acknowledges as its first field;
    // once resolved, the remaining fields line up with that command's own
    // layout, so shift left by one and process as usual.
    let mut layout = command;
    if command == CommandHeader::Ack {
        let inner = CommandHeader::from_wire(required(fields, 1)?);
        if inner == CommandHeader::Unknown {
            return Err(PacketError::UnknownAcknowledged);
        }
        packet.ack_of = inner;
        layout = inner;
        fields = &fields[1..];
    }

    match layout {
        CommandHeader::Start => {
            //  START |  SampleID  |  RECIPE_NAME   | OPERATOR |           COMMENT
            //  START |       1299 | example_recipe |   300310 | Here are comments
            packet.sample_id = required(fields, 1)?.to_string();
            packet.recipe_name = required(fields, 2)?.to_string();
            packet.operator = required(fields, 3)?.to_string();
            packet.comment = required(fields, 4)?.to_string();
        }
        CommandHeader::Nack => {
            packet.error_message = required(fields, 1)?.to_string();
            packet.sample_id.clear();
        }
        _ => {
            packet.sample_id = fields.first().copied().unwrap_or("").to_string();
        }
    }
    Ok(packet)
}

/// Fetch the field at 1-based `position`, or report it missing.
fn required<'a>(fields: &[&'a str], position: usize) -> Result<&'a str, PacketError> {
    fields
        .get(position - 1)
        .copied()
        .ok_or(PacketError::FieldOutOfRange(position))
}

/// Serialize a packet to its wire form.
///
/// A top-level `SAMPLING_DONE` goes out bare, while the Ack-wrapped form
/// falls through to the default layout and appends the sample id. Observed
/// device behavior; kept as-is rather than unified.
pub fn format_packet(packet: &Packet) -> String {
    match packet.command {
        CommandHeader::Ack => format!("ACK|{}", format_body(packet, packet.ack_of)),
        CommandHeader::SamplingDone => "SAMPLING_DONE".to_string(),
        command => format_body(packet, command),
    }
}

fn format_body(packet: &Packet, layout: CommandHeader) -> String {
    match layout {
        CommandHeader::Start => format!(
            "START|{}|{}|{}|{}",
            packet.sample_id, packet.recipe_name, packet.operator, packet.comment
        ),
        CommandHeader::Nack => format!("NACK|{}", packet.error_message),
        // Fallback: header plus sample id, separator always emitted.
        other => format!("{}|{}", other.as_wire(), packet.sample_id),
    }
}

/// The verbatim-echo acknowledge: the original inbound text prefixed with
/// `ACK|`. This is the form broadcast in reply to an accepted command.
pub fn ack_wire(original: &str) -> String {
    format!("ACK|{original}")
}

/* ---------- tests ---------- */

#[cfg(test)]
mod tests {
    use super::*;

    fn start_packet() -> Packet {
        Packet {
            command: CommandHeader::Start,
            sample_id: "lot543887".into(),
            recipe_name: "Corn_2022_v2".into(),
            operator: "CHG".into(),
            comment: "A test measurement".into(),
            ..Packet::default()
        }
    }

    #[test]
    fn roundtrip_start() {
        let packet = start_packet();
        let wire = format_packet(&packet);
        assert_eq!(wire, "START|lot543887|Corn_2022_v2|CHG|A test measurement");
        assert_eq!(parse_packet(&wire), packet);
    }

    #[test]
    fn roundtrip_ack_of_start() {
        let packet = Packet {
            command: CommandHeader::Ack,
            ack_of: CommandHeader::Start,
            ..start_packet()
        };
        let wire = format_packet(&packet);
        assert_eq!(
            wire,
            "ACK|START|lot543887|Corn_2022_v2|CHG|A test measurement"
        );
        assert_eq!(parse_packet(&wire), packet);
    }

    #[test]
    fn sampling_done_serializes_bare() {
        let packet = Packet::bare(CommandHeader::SamplingDone);
        let wire = format_packet(&packet);
        assert_eq!(wire, "SAMPLING_DONE");
        assert_eq!(parse_packet(&wire), packet);
    }

    #[test]
    fn acked_sampling_done_appends_sample_id() {
        let packet = Packet {
            command: CommandHeader::Ack,
            ack_of: CommandHeader::SamplingDone,
            sample_id: "lot543887".into(),
            ..Packet::default()
        };
        let wire = format_packet(&packet);
        assert_eq!(wire, "ACK|SAMPLING_DONE|lot543887");
        assert_eq!(parse_packet(&wire), packet);
    }

    #[test]
    fn roundtrip_plain_commands() {
        for command in [
            CommandHeader::Finish,
            CommandHeader::Stop,
            CommandHeader::Flush,
        ] {
            let packet = Packet {
                sample_id: "lot543887".into(),
                ..Packet::bare(command)
            };
            let wire = format_packet(&packet);
            assert_eq!(wire, format!("{}|lot543887", command.as_wire()));
            assert_eq!(parse_packet(&wire), packet);

            let acked = Packet {
                command: CommandHeader::Ack,
                ack_of: command,
                sample_id: "lot543887".into(),
                ..Packet::default()
            };
            let wire = format_packet(&acked);
            assert_eq!(wire, format!("ACK|{}|lot543887", command.as_wire()));
            assert_eq!(parse_packet(&wire), acked);
        }
    }

    #[test]
    fn absent_sample_id_still_emits_separator() {
        let packet = Packet::bare(CommandHeader::Finish);
        let wire = format_packet(&packet);
        assert_eq!(wire, "FINISH|");
        assert_eq!(parse_packet(&wire), packet);
        // The separator-less form parses to the same packet.
        assert_eq!(parse_packet("FINISH"), packet);
    }

    #[test]
    fn roundtrip_nack() {
        let packet = Packet::nack("Recipe failed to load");
        let wire = format_packet(&packet);
        assert_eq!(wire, "NACK|Recipe failed to load");
        assert_eq!(parse_packet(&wire), packet);
    }

    #[test]
    fn unrecognized_bare_header_is_unknown() {
        assert_eq!(parse_packet("hello").command, CommandHeader::Unknown);
        assert_eq!(parse_packet("start").command, CommandHeader::Unknown);
    }

    #[test]
    fn empty_and_nul_padded_input_is_unknown() {
        assert_eq!(parse_packet("").command, CommandHeader::Unknown);
        assert_eq!(parse_packet("\0\0\0").command, CommandHeader::Unknown);
    }

    #[test]
    fn nul_padding_is_stripped_before_parsing() {
        let packet = parse_packet("STOP|lot543887\0\0");
        assert_eq!(packet.command, CommandHeader::Stop);
        assert_eq!(packet.sample_id, "lot543887");
    }

    #[test]
    fn start_with_missing_fields_is_nack_with_hint() {
        let packet = parse_packet("START|...");
        assert_eq!(packet.command, CommandHeader::Nack);
        assert!(packet.error_message.contains("parameter is missing"));
    }

    #[test]
    fn ack_of_unknown_command_is_nack() {
        let packet = parse_packet("ACK|BOGUS|lot543887");
        assert_eq!(packet.command, CommandHeader::Nack);
        assert_eq!(
            packet.error_message,
            "Unable to interpret acknowledge, unknown command acknowledged"
        );
    }

    #[test]
    fn bare_ack_is_nack_with_hint() {
        let packet = parse_packet("ACK");
        assert_eq!(packet.command, CommandHeader::Nack);
        assert!(packet.error_message.contains("parameter is missing"));
    }

    #[test]
    fn nack_parse_clears_sample_id() {
        let packet = parse_packet("NACK|device on fire");
        assert_eq!(packet.command, CommandHeader::Nack);
        assert_eq!(packet.error_message, "device on fire");
        assert_eq!(packet.sample_id, "");
    }

    #[test]
    fn ack_echo_is_verbatim() {
        assert_eq!(ack_wire("STOP"), "ACK|STOP");
        assert_eq!(
            ack_wire("START|lot543887|Corn_2022_v2|CHG|A test measurement"),
            "ACK|START|lot543887|Corn_2022_v2|CHG|A test measurement"
        );
    }
}
