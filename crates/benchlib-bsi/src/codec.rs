//! BSI text-protocol encoder/decoder.
//!
//! The BSI protocol is line-oriented ASCII over TCP. Every exchange is one
//! command line answered by one reply line.
//!
//! # Command format
//!
//! ```text
//! NAME,SSS[,p1,p2,...,pN]\n
//! ```
//!
//! - `NAME`: the command name, e.g. `SYS_IDN` or `MEAS_V_MIO01_MIO02`.
//! - `SSS`: a 3-digit zero-padded sequence number cycling 1..999.
//! - Parameters are comma-separated; per-card parameters always occupy
//!   exactly 16 slots (one per physical card position), with a filler in
//!   the slots of unselected cards.
//!
//! # Reply format
//!
//! A reply is comma-separated text terminated by `\n`. The leading fields
//! are echo/status metadata; callers state how many to discard (commonly
//! two) before the payload begins. A reply whose first character is `E` is
//! an instrument-reported error.
//!
//! # Value encodings
//!
//! Payload fields are decimal integers, floats, lowercase even-nibble hex
//! (optionally grouped into fixed-width chunks representing a byte list),
//! or the boolean letter code (`O` = true, anything else = false). The
//! aggregate "and-bool" form reduces per-card booleans by logical AND over
//! the discovered card count.

use benchlib_core::error::{Error, Result};
use benchlib_core::types::{CardSelect, MAX_CARDS};

/// Reply terminator byte.
pub const TERMINATOR: u8 = b'\n';

/// First byte of an instrument-reported error reply.
pub const ERROR_PREFIX: char = 'E';

/// Wire encoding of boolean true.
pub const TRUE_CODE: &str = "O";

/// Frame a command line: name, 3-digit sequence, optional parameters,
/// trailing newline.
pub fn frame_command(name: &str, seq: u16, params: &str) -> String {
    let mut line = format!("{},{:03}", name, seq);
    if !params.is_empty() {
        line.push(',');
        line.push_str(params);
    }
    line.push('\n');
    line
}

/// Format an integer as lowercase hex without prefix, zero-padded to an
/// even nibble count (`15` -> `"0f"`, `1023` -> `"03ff"`).
pub fn hex_even(value: u64) -> String {
    let s = format!("{:x}", value);
    if s.len() % 2 == 1 {
        format!("0{}", s)
    } else {
        s
    }
}

/// Format a byte slice as a contiguous lowercase hex string, two nibbles
/// per byte.
pub fn bytes_to_hex(data: &[u8]) -> String {
    let mut s = String::with_capacity(data.len() * 2);
    for b in data {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

/// Build the 16-slot per-card parameter string.
///
/// The selected card's slot (or every slot, under broadcast) carries
/// `value`; all other slots carry `default`. The result always has exactly
/// 16 comma-separated slots regardless of the selection.
pub fn per_card_list(value: &str, default: &str, card: CardSelect) -> String {
    let mut slots = Vec::with_capacity(MAX_CARDS);
    for i in 0..MAX_CARDS {
        match card.slot() {
            None => slots.push(value),
            Some(s) if s == i => slots.push(value),
            _ => slots.push(default),
        }
    }
    slots.join(",")
}

/// Build the 16-slot per-card parameter string with the value encoded as
/// even-nibble hex. Unselected slots are left empty, matching the
/// instrument's convention for hex parameter lists.
pub fn per_card_hex_list(value: u64, card: CardSelect) -> String {
    per_card_list(&hex_even(value), "", card)
}

/// How to decode one payload field.
///
/// A closed enumeration; the decode dispatch is total over these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// Decimal integer.
    Int,
    /// Decimal float.
    Float,
    /// Lowercase hex. `group_nibbles` is the chunk width: a field exactly
    /// that long decodes to one integer, a longer field splits into
    /// fixed-width chunks (big-endian per chunk) and decodes to a list.
    /// `group_nibbles == 0` decodes the whole field as one integer.
    Hex { group_nibbles: usize },
    /// Boolean letter code: `O` is true, anything else false.
    Bool,
    /// Boolean letter code, reduced by logical AND across all existing
    /// cards when decoded under broadcast.
    AndBool,
}

/// One decoded payload field.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    /// The field was empty (unpopulated card slot, or no acknowledge).
    Empty,
    Int(i64),
    Float(f64),
    Hex(u64),
    HexList(Vec<u64>),
    Bool(bool),
}

impl Field {
    /// Truthiness used for acknowledge checks: only `Bool(true)` counts.
    pub fn as_bool(&self) -> bool {
        matches!(self, Field::Bool(true))
    }

    /// Interpret a hex field as a byte sequence.
    ///
    /// `Hex` yields its low byte(s) per the original nibble grouping of 2;
    /// `HexList` yields one byte per chunk. `None` for an empty field.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self {
            Field::Empty => None,
            Field::Hex(v) => Some(vec![v as u8]),
            Field::HexList(list) => Some(list.into_iter().map(|v| v as u8).collect()),
            _ => None,
        }
    }
}

/// Decode a single payload field according to `kind`.
///
/// An empty field decodes to [`Field::Empty`]; the caller decides what an
/// absent value means (default, no-acknowledge, nonexistent card).
pub fn decode_field(text: &str, kind: FieldKind) -> Result<Field> {
    if text.is_empty() {
        return Ok(Field::Empty);
    }
    match kind {
        FieldKind::Int => text
            .parse::<i64>()
            .map(Field::Int)
            .map_err(|_| Error::Protocol(format!("not an integer field: {:?}", text))),
        FieldKind::Float => text
            .parse::<f64>()
            .map(Field::Float)
            .map_err(|_| Error::Protocol(format!("not a float field: {:?}", text))),
        FieldKind::Hex { group_nibbles: 0 } => u64::from_str_radix(text, 16)
            .map(Field::Hex)
            .map_err(|_| Error::Protocol(format!("not a hex field: {:?}", text))),
        FieldKind::Hex { group_nibbles } => {
            if text.len() == group_nibbles {
                u64::from_str_radix(text, 16)
                    .map(Field::Hex)
                    .map_err(|_| Error::Protocol(format!("not a hex field: {:?}", text)))
            } else if text.len() % group_nibbles == 0 {
                let mut list = Vec::with_capacity(text.len() / group_nibbles);
                for chunk in text.as_bytes().chunks(group_nibbles) {
                    let chunk = std::str::from_utf8(chunk)
                        .map_err(|_| Error::Protocol("non-ASCII hex field".into()))?;
                    let v = u64::from_str_radix(chunk, 16).map_err(|_| {
                        Error::Protocol(format!("not a hex chunk: {:?}", chunk))
                    })?;
                    list.push(v);
                }
                Ok(Field::HexList(list))
            } else {
                Err(Error::Protocol(format!(
                    "hex field length {} is not a multiple of {}",
                    text.len(),
                    group_nibbles
                )))
            }
        }
        FieldKind::Bool | FieldKind::AndBool => Ok(Field::Bool(text == TRUE_CODE)),
    }
}

/// A decoded reply, shaped by the card selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// One field, from a single-card selection.
    Single(Field),
    /// One field per existing card, from a broadcast selection.
    PerCard(Vec<Field>),
    /// The AND reduction of per-card booleans under broadcast.
    Bool(bool),
}

/// Strip the terminator, split on commas, and drop the leading
/// echo/sequence metadata fields.
pub fn split_reply(raw: &str, skip_fields: usize) -> Vec<&str> {
    let trimmed = raw.trim_end_matches('\n').trim_end_matches('\r');
    let fields: Vec<&str> = trimmed.split(',').collect();
    if fields.len() > skip_fields {
        fields[skip_fields..].to_vec()
    } else {
        Vec::new()
    }
}

/// Decode a full reply.
///
/// `card_count` is the discovered number of cards in the chassis and is
/// the sole authority for how many broadcast slots carry real values;
/// slots beyond it belong to unpopulated positions and are ignored. The
/// and-bool reduction over zero cards is `false` -- no card ever
/// acknowledged anything.
pub fn decode_reply(
    raw: &str,
    skip_fields: usize,
    kind: FieldKind,
    card: CardSelect,
    card_count: usize,
) -> Result<Decoded> {
    let fields = split_reply(raw, skip_fields);
    match card.slot() {
        Some(slot) => {
            let text = fields.get(slot).copied().unwrap_or("");
            Ok(Decoded::Single(decode_field(text, kind)?))
        }
        None => {
            let mut decoded = Vec::with_capacity(card_count);
            for i in 0..card_count {
                let text = fields.get(i).copied().unwrap_or("");
                decoded.push(decode_field(text, kind)?);
            }
            if kind == FieldKind::AndBool {
                let all = card_count > 0 && decoded.iter().all(Field::as_bool);
                Ok(Decoded::Bool(all))
            } else {
                Ok(Decoded::PerCard(decoded))
            }
        }
    }
}

/// Whether a reply line is an instrument-reported error.
pub fn is_error_reply(raw: &str) -> bool {
    raw.starts_with(ERROR_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_without_params() {
        assert_eq!(frame_command("SYS_IDN", 1, ""), "SYS_IDN,001\n");
    }

    #[test]
    fn frame_with_params() {
        assert_eq!(
            frame_command("MEAS_CFG_SetRange", 42, "1"),
            "MEAS_CFG_SetRange,042,1\n"
        );
    }

    #[test]
    fn frame_pads_sequence_to_three_digits() {
        assert_eq!(frame_command("X", 7, ""), "X,007\n");
        assert_eq!(frame_command("X", 999, ""), "X,999\n");
    }

    #[test]
    fn hex_even_pads_odd_nibbles() {
        assert_eq!(hex_even(0xf), "0f");
        assert_eq!(hex_even(0x3ff), "03ff");
        assert_eq!(hex_even(0xff), "ff");
        assert_eq!(hex_even(0), "00");
    }

    #[test]
    fn bytes_to_hex_two_nibbles_per_byte() {
        assert_eq!(bytes_to_hex(&[0x01, 0xab, 0x00]), "01ab00");
        assert_eq!(bytes_to_hex(&[]), "");
    }

    #[test]
    fn per_card_list_always_sixteen_slots() {
        for selector in 0..=16u8 {
            let card = CardSelect::new(selector).unwrap();
            let list = per_card_list("1", "0", card);
            assert_eq!(list.split(',').count(), 16, "selector {}", selector);
        }
    }

    #[test]
    fn per_card_list_broadcast_fills_every_slot() {
        let list = per_card_list("1", "0", CardSelect::All);
        assert_eq!(list, "1,1,1,1,1,1,1,1,1,1,1,1,1,1,1,1");
    }

    #[test]
    fn per_card_list_single_card_slot_position() {
        let list = per_card_list("1", "0", CardSelect::Card(3));
        assert_eq!(list, "0,0,1,0,0,0,0,0,0,0,0,0,0,0,0,0");
        let list = per_card_list("1", "0", CardSelect::Card(16));
        assert!(list.ends_with(",1"));
    }

    #[test]
    fn per_card_hex_list_pads_and_leaves_others_empty() {
        let list = per_card_hex_list(0x3ff, CardSelect::Card(2));
        assert_eq!(list, ",03ff,,,,,,,,,,,,,,");
    }

    #[test]
    fn injected_value_recoverable_at_every_slot() {
        // Encoding at slot k and decoding the same slot recovers the value.
        for k in 1..=16u8 {
            let card = CardSelect::Card(k);
            let list = per_card_list("7", "0", card);
            let reply = format!("A,001,{}\n", list);
            let decoded = decode_reply(&reply, 2, FieldKind::Int, card, 16).unwrap();
            assert_eq!(decoded, Decoded::Single(Field::Int(7)), "slot {}", k);
        }
    }

    #[test]
    fn decode_field_empty_is_empty() {
        assert_eq!(decode_field("", FieldKind::Int).unwrap(), Field::Empty);
        assert_eq!(decode_field("", FieldKind::Bool).unwrap(), Field::Empty);
    }

    #[test]
    fn decode_field_int_and_float() {
        assert_eq!(decode_field("42", FieldKind::Int).unwrap(), Field::Int(42));
        assert_eq!(
            decode_field("-3", FieldKind::Int).unwrap(),
            Field::Int(-3)
        );
        assert_eq!(
            decode_field("8.25", FieldKind::Float).unwrap(),
            Field::Float(8.25)
        );
        assert!(decode_field("abc", FieldKind::Int).is_err());
    }

    #[test]
    fn decode_field_hex_single_group() {
        assert_eq!(
            decode_field("ff", FieldKind::Hex { group_nibbles: 2 }).unwrap(),
            Field::Hex(0xff)
        );
        assert_eq!(
            decode_field("03ff", FieldKind::Hex { group_nibbles: 4 }).unwrap(),
            Field::Hex(0x3ff)
        );
    }

    #[test]
    fn decode_field_hex_splits_into_groups() {
        assert_eq!(
            decode_field("01ab00", FieldKind::Hex { group_nibbles: 2 }).unwrap(),
            Field::HexList(vec![0x01, 0xab, 0x00])
        );
        assert_eq!(
            decode_field("00010002", FieldKind::Hex { group_nibbles: 4 }).unwrap(),
            Field::HexList(vec![1, 2])
        );
    }

    #[test]
    fn decode_field_hex_round_trip() {
        // Even-nibble encode then decode with a matching group size
        // returns the original integer.
        for v in [0u64, 0xf, 0xff, 0x3ff, 0xdead] {
            let text = hex_even(v);
            let kind = FieldKind::Hex {
                group_nibbles: text.len(),
            };
            assert_eq!(decode_field(&text, kind).unwrap(), Field::Hex(v));
        }
    }

    #[test]
    fn decode_field_hex_whole_field_when_group_zero() {
        assert_eq!(
            decode_field("0000007f", FieldKind::Hex { group_nibbles: 0 }).unwrap(),
            Field::Hex(0x7f)
        );
    }

    #[test]
    fn decode_field_hex_rejects_ragged_length() {
        assert!(decode_field("abc", FieldKind::Hex { group_nibbles: 2 }).is_err());
    }

    #[test]
    fn decode_field_bool_letter_code() {
        assert_eq!(decode_field("O", FieldKind::Bool).unwrap(), Field::Bool(true));
        assert_eq!(decode_field("E", FieldKind::Bool).unwrap(), Field::Bool(false));
        assert_eq!(decode_field("X", FieldKind::Bool).unwrap(), Field::Bool(false));
        assert_eq!(decode_field("o", FieldKind::Bool).unwrap(), Field::Bool(false));
    }

    #[test]
    fn decode_reply_strips_metadata_and_selects_slot() {
        let reply = "MEAS,001,1.5,2.5,3.5\n";
        let decoded =
            decode_reply(reply, 2, FieldKind::Float, CardSelect::Card(2), 3).unwrap();
        assert_eq!(decoded, Decoded::Single(Field::Float(2.5)));
    }

    #[test]
    fn decode_reply_broadcast_takes_card_count_slots() {
        let reply = "MEAS,001,1.0,2.0,,,\n";
        let decoded = decode_reply(reply, 2, FieldKind::Float, CardSelect::All, 2).unwrap();
        assert_eq!(
            decoded,
            Decoded::PerCard(vec![Field::Float(1.0), Field::Float(2.0)])
        );
    }

    #[test]
    fn andbool_true_only_when_all_cards_true() {
        let decode = |payload: &str, count: usize| {
            decode_reply(
                &format!("A,001,{}\n", payload),
                2,
                FieldKind::AndBool,
                CardSelect::All,
                count,
            )
            .unwrap()
        };
        assert_eq!(decode("O,O,O", 3), Decoded::Bool(true));
        assert_eq!(decode("O,E,O", 3), Decoded::Bool(false));
        // Slots beyond the card count are ignored, even when non-true.
        assert_eq!(decode("O,O,E", 2), Decoded::Bool(true));
        // Zero cards: nothing acknowledged, so the reduction is false.
        assert_eq!(decode("O,O,O", 0), Decoded::Bool(false));
    }

    #[test]
    fn andbool_single_card_is_that_cards_flag() {
        let reply = "A,001,E,O,E\n";
        let decoded =
            decode_reply(reply, 2, FieldKind::AndBool, CardSelect::Card(2), 3).unwrap();
        assert_eq!(decoded, Decoded::Single(Field::Bool(true)));
    }

    #[test]
    fn error_reply_detection() {
        assert!(is_error_reply("E,001,Invalid Parameter\n"));
        assert!(!is_error_reply("A,001,O\n"));
    }

    #[test]
    fn field_into_bytes() {
        assert_eq!(Field::Hex(0xab).into_bytes(), Some(vec![0xab]));
        assert_eq!(
            Field::HexList(vec![1, 2, 3]).into_bytes(),
            Some(vec![1, 2, 3])
        );
        assert_eq!(Field::Empty.into_bytes(), None);
    }
}
