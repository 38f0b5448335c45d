//! Echo protocol parser.

/// Prefix marking a control command.
const CONTROL_PREFIX: u8 = b'#';

/// Prefix of the broadcast command, including the separating space.
const SAY_PREFIX: &[u8] = b"#say ";

/// Parsed echo command, borrowing from the received chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command<'a> {
    /// Plain text to write back to the sender.
    Echo(&'a [u8]),
    /// Close the sender's connection without a reply.
    Quit,
    /// Send the payload to every connected client, sender included.
    Say(&'a [u8]),
    /// Any other `#`-prefixed input.
    Unknown,
}

/// Classify one received chunk.
///
/// The quit command must match the whole chunk exactly. The broadcast
/// payload is everything after the `#say ` prefix, line ending included.
pub fn parse(input: &[u8]) -> Command<'_> {
    if input.first() != Some(&CONTROL_PREFIX) {
        return Command::Echo(input);
    }

    if input == b"#quit\n" || input == b"#quit\r\n" {
        return Command::Quit;
    }

    if let Some(payload) = input.strip_prefix(SAY_PREFIX) {
        return Command::Say(payload);
    }

    Command::Unknown
}
