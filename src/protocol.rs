//! I-7000 ASCII frame codec
//!
//! Every I-7000 command is a single line of ASCII text:
//!
//! ```text
//! $ 01 M [payload] [CS] \r
//! ^ ^  ^            ^    ^
//! | |  |            |    terminator
//! | |  |            optional checksum (two hex digits)
//! | |  command letter(s)
//! | module address, two uppercase hex digits
//! lead character ($, #, %, ~, @ ...)
//! ```
//!
//! The checksum is the low byte of the sum of all preceding characters,
//! rendered as two uppercase hex digits. Modules answer with `!` (ok),
//! `?` (invalid command) or `>` (data), using the same framing.

/// Line terminator for commands and responses
pub const TERMINATOR: char = '\r';

/// Lead character of configuration/status commands
pub const COMMAND_LEAD: char = '$';

/// Lead character of data commands (analog read/write)
pub const DATA_LEAD: char = '#';

/// Lead character of host/module management commands
pub const HOST_LEAD: char = '~';

/// Command letter asking a module for its name
pub const POLL_COMMAND: &str = "M";

/// Command letter setting a module's name
pub const RENAME_COMMAND: &str = "O";

/// Lead character of a positive acknowledgement
pub const ACK_LEAD: char = '!';

/// Lead character of an analog data response
pub const DATA_RESPONSE_LEAD: char = '>';

/// Number of addresses on one bus, and so the most modules it can hold
pub const MAX_MODULES: u16 = 256;

/// Compute the checksum of a frame body
///
/// The result is the low byte of the sum of all character codes, as two
/// uppercase hex digits.
pub fn checksum(body: &str) -> String {
    let sum = body.chars().fold(0u32, |acc, c| acc.wrapping_add(c as u32));
    format!("{:02X}", sum & 0xFF)
}

/// Check a body against a received checksum (hex digits, any case)
pub fn verify(body: &str, received: &str) -> bool {
    checksum(body).eq_ignore_ascii_case(received.trim())
}

/// Render a module address as exactly two uppercase hex digits
pub fn format_address(address: u8) -> String {
    format!("{:02X}", address)
}

/// Parse a two-hex-digit address as written in frames
pub fn parse_address(text: &str) -> Option<u8> {
    if text.len() != 2 {
        return None;
    }
    u8::from_str_radix(text, 16).ok()
}

/// Encoder for outgoing frames
///
/// Whether checksums are appended is a bus-wide setting chosen by the user;
/// the codec itself is a cheap value snapshot of that setting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameCodec {
    checksum_enabled: bool,
}

impl FrameCodec {
    /// Create a codec with the given checksum setting
    pub fn new(checksum_enabled: bool) -> Self {
        Self { checksum_enabled }
    }

    /// Whether frames carry a checksum suffix
    pub fn checksum_enabled(&self) -> bool {
        self.checksum_enabled
    }

    /// Build a `$`-led frame for a module address
    pub fn encode(&self, address: u8, command: &str, payload: &str) -> String {
        let body = format!(
            "{}{}{}{}",
            COMMAND_LEAD,
            format_address(address),
            command,
            payload
        );
        self.seal(body)
    }

    /// Frame a user-typed command
    ///
    /// Trailing whitespace and terminators are dropped, then the checksum
    /// (if enabled) and the terminator are appended.
    pub fn filter(&self, command: &str) -> String {
        let body = command.trim_end_matches(|c: char| c == TERMINATOR || c.is_whitespace());
        self.seal(body.to_string())
    }

    /// `$AAM`: read module name
    pub fn poll_frame(&self, address: u8) -> String {
        self.encode(address, POLL_COMMAND, "")
    }

    /// `~AAO(name)`: set module name
    pub fn rename_frame(&self, address: &str, name: &str) -> String {
        self.seal(format!("{}{}{}{}", HOST_LEAD, address, RENAME_COMMAND, name))
    }

    /// `#AA`: read analog input
    pub fn read_frame(&self, address: u8) -> String {
        self.seal(format!("{}{}", DATA_LEAD, format_address(address)))
    }

    /// `#AA(data)`: write analog output in engineering units
    pub fn analog_out_frame(&self, address: u8, value: f32) -> String {
        self.seal(format!(
            "{}{}{}",
            DATA_LEAD,
            format_address(address),
            format_engineering(value)
        ))
    }

    /// Remove the terminator and, if enabled, a valid checksum suffix
    ///
    /// Returns `None` when checksums are enabled and the suffix does not
    /// match the body.
    pub fn strip_checksum<'a>(&self, response: &'a str) -> Option<&'a str> {
        let response = response.trim_end_matches(TERMINATOR);
        if !self.checksum_enabled {
            return Some(response);
        }
        if response.len() < 2 || !response.is_char_boundary(response.len() - 2) {
            return None;
        }
        let (body, received) = response.split_at(response.len() - 2);
        verify(body, received).then_some(body)
    }

    fn seal(&self, mut body: String) -> String {
        if self.checksum_enabled {
            let cs = checksum(&body);
            body.push_str(&cs);
        }
        body.push(TERMINATOR);
        body
    }
}

/// Engineering-unit format used by analog output commands: `+05.000`
pub fn format_engineering(value: f32) -> String {
    let sign = if value < 0.0 { '-' } else { '+' };
    format!("{}{:06.3}", sign, value.abs())
}

/// Extract the first reading from an analog data response body
///
/// `>+01.234` → `+01.234`; multi-channel bodies such as
/// `>+01.234-00.500` yield only the first channel.
pub fn parse_analog_reading(body: &str) -> Option<&str> {
    let data = body.strip_prefix(DATA_RESPONSE_LEAD)?;
    if data.is_empty() {
        return None;
    }
    let end = data
        .char_indices()
        .skip(1)
        .find(|(_, c)| *c == '+' || *c == '-')
        .map(|(i, _)| i)
        .unwrap_or(data.len());
    Some(&data[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_known_value() {
        // '$' 0x24 + '0' 0x30 + '1' 0x31 + 'M' 0x4D = 0xD2
        assert_eq!(checksum("$01M"), "D2");
    }

    #[test]
    fn test_checksum_wraps_to_low_byte() {
        let body = "~".repeat(10); // 10 * 0x7E = 0x4EC
        assert_eq!(checksum(&body), "EC");
    }

    #[test]
    fn test_encode_without_checksum() {
        let codec = FrameCodec::new(false);
        assert_eq!(codec.poll_frame(0x01), "$01M\r");
        assert_eq!(codec.encode(0xAB, "2", ""), "$AB2\r");
    }

    #[test]
    fn test_encode_with_checksum() {
        let codec = FrameCodec::new(true);
        assert_eq!(codec.poll_frame(0x01), "$01MD2\r");
    }

    #[test]
    fn test_address_is_two_uppercase_digits() {
        assert_eq!(format_address(0), "00");
        assert_eq!(format_address(10), "0A");
        assert_eq!(format_address(255), "FF");
        assert_eq!(parse_address("0a"), Some(10));
        assert_eq!(parse_address("1"), None);
        assert_eq!(parse_address("XYZ"), None);
    }

    #[test]
    fn test_filter_user_command() {
        let codec = FrameCodec::new(false);
        assert_eq!(codec.filter("#01 \r"), "#01\r");
        let codec = FrameCodec::new(true);
        assert_eq!(codec.filter("$01M"), "$01MD2\r");
    }

    #[test]
    fn test_rename_and_data_frames() {
        let codec = FrameCodec::new(false);
        assert_eq!(codec.rename_frame("02", "7017"), "~02O7017\r");
        assert_eq!(codec.read_frame(0x03), "#03\r");
        assert_eq!(codec.analog_out_frame(0x04, 5.0), "#04+05.000\r");
        assert_eq!(codec.analog_out_frame(0x04, -1.25), "#04-01.250\r");
    }

    #[test]
    fn test_strip_checksum() {
        let codec = FrameCodec::new(true);
        assert_eq!(codec.strip_checksum("$01MD2\r"), Some("$01M"));
        assert_eq!(codec.strip_checksum("$01MD3\r"), None);
        assert_eq!(codec.strip_checksum("!"), None);

        let plain = FrameCodec::new(false);
        assert_eq!(plain.strip_checksum("!01\r"), Some("!01"));
    }

    #[test]
    fn test_parse_analog_reading() {
        assert_eq!(parse_analog_reading(">+01.234"), Some("+01.234"));
        assert_eq!(parse_analog_reading(">-00.500+01.000"), Some("-00.500"));
        assert_eq!(parse_analog_reading(">"), None);
        assert_eq!(parse_analog_reading("!01"), None);
    }

    // Property-based tests using proptest
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn test_checksum_round_trip(body in "[ -~]{1,64}") {
            let cs = checksum(&body);
            prop_assert_eq!(cs.len(), 2);
            prop_assert!(verify(&body, &cs));
        }

        #[test]
        fn test_single_char_mutation_invalidates(
            body in "[ -~]{1,64}",
            index in any::<prop::sample::Index>(),
            replacement in 0x20u8..0x7F,
        ) {
            let mut bytes = body.clone().into_bytes();
            let i = index.index(bytes.len());
            prop_assume!(bytes[i] != replacement);
            bytes[i] = replacement;
            let mutated = String::from_utf8(bytes).unwrap();
            prop_assert!(!verify(&mutated, &checksum(&body)));
        }
    }
}
