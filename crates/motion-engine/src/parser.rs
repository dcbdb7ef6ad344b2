//! Status-reply decoding.
//!
//! Each poll query's reply is decoded against its dialect
//! [`ReplyLayout`] and merged into a [`ParsedStatus`] accumulator for
//! the addressed axis. Aggregate replies are indexed by axis *position*
//! (field offset or list index), never by value matching. Parsing is
//! pure: the same bytes always decode to the same result.

use motion_core::dialect::ReplyLayout;
use motion_core::error::ParseError;

/// Decoded per-axis fields accumulated across one poll sweep's replies.
///
/// `None` means "this dialect's replies do not carry that field";
/// the axis-state merge treats missing booleans as inactive.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedStatus {
    pub moving: Option<bool>,
    pub direction_positive: Option<bool>,
    pub plus_limit: Option<bool>,
    pub minus_limit: Option<bool>,
    pub home: Option<bool>,
    /// Motor power / closed-loop hold is off.
    pub power_off: Option<bool>,
    /// Firmware fault register value, when the dialect reports one.
    pub fault: Option<u32>,
    /// A nonzero fault disables the whole controller instance.
    pub fatal_fault: bool,
    /// Position in controller units (pre-resolution-scaling).
    pub raw_position: Option<f64>,
}

impl ParsedStatus {
    /// Check that the sweep produced the fields every dialect must
    /// deliver.
    pub fn finish(self) -> Result<ParsedStatus, ParseError> {
        if self.moving.is_none() {
            return Err(ParseError::MissingField { field: "moving" });
        }
        if self.raw_position.is_none() {
            return Err(ParseError::MissingField { field: "position" });
        }
        Ok(self)
    }
}

/// Leading numeric text of a field, `atof`-style: optional sign, then
/// digits/decimal point/exponent. Controllers pad replies with units or
/// trailing garbage that must not break the parse.
fn leading_number(text: &str) -> &str {
    let text = text.trim_start();
    let mut end = 0;
    for (i, c) in text.char_indices() {
        let ok = c.is_ascii_digit()
            || c == '.'
            || ((c == '+' || c == '-') && i == 0)
            || ((c == 'e' || c == 'E') && i > 0);
        if ok {
            end = i + c.len_utf8();
        } else {
            break;
        }
    }
    &text[..end]
}

pub(crate) fn float_field(reply: &str, prefix: usize) -> Result<f64, ParseError> {
    if reply.len() < prefix {
        return Err(ParseError::ShortReply {
            need: prefix,
            got: reply.len(),
        });
    }
    let text = leading_number(&reply[prefix..]);
    text.parse::<f64>().map_err(|_| ParseError::BadNumber {
        text: reply[prefix..].to_string(),
    })
}

pub(crate) fn int_field(reply: &str, prefix: usize) -> Result<u32, ParseError> {
    if reply.len() < prefix {
        return Err(ParseError::ShortReply {
            need: prefix,
            got: reply.len(),
        });
    }
    let text = leading_number(&reply[prefix..]);
    text.parse::<u32>().map_err(|_| ParseError::BadNumber {
        text: reply[prefix..].to_string(),
    })
}

/// Decode one reply for one axis and merge it into the accumulator.
pub fn apply_reply(
    acc: &mut ParsedStatus,
    layout: &ReplyLayout,
    axis: usize,
    reply: &str,
) -> Result<(), ParseError> {
    match layout {
        ReplyLayout::StatusByteList {
            offset,
            stride,
            bits,
        } => {
            let at = offset + axis * stride;
            let byte = *reply.as_bytes().get(at).ok_or(ParseError::ShortReply {
                need: at + 1,
                got: reply.len(),
            })?;
            acc.moving = Some(byte & bits.moving != 0);
            if bits.direction != 0 {
                acc.direction_positive = Some(byte & bits.direction != 0);
            }
            if bits.plus_limit != 0 {
                acc.plus_limit = Some(byte & bits.plus_limit != 0);
            }
            if bits.minus_limit != 0 {
                acc.minus_limit = Some(byte & bits.minus_limit != 0);
            }
            if bits.home != 0 {
                acc.home = Some(byte & bits.home != 0);
            }
            if bits.power_off != 0 {
                acc.power_off = Some(byte & bits.power_off != 0);
            }
        }

        ReplyLayout::PositionList { separator, prefix } => {
            let token = reply
                .split(*separator)
                .nth(axis)
                .ok_or(ParseError::MissingAxisField { axis })?;
            acc.raw_position = Some(float_field(token, *prefix)?);
        }

        ReplyLayout::CodeCharsWithPosition {
            status_at,
            direction_at,
            busy,
            fault,
            limit,
            position_at,
        } => {
            let bytes = reply.as_bytes();
            let need = status_at.max(direction_at) + 1;
            if bytes.len() < need {
                return Err(ParseError::ShortReply {
                    need,
                    got: bytes.len(),
                });
            }
            let code = bytes[*status_at];
            let dir_positive = bytes[*direction_at] == b'+';

            acc.moving = Some(code == *busy);
            acc.direction_positive = Some(dir_positive);
            acc.fault = Some(u32::from(code == *fault));
            if code == *limit {
                acc.plus_limit = Some(dir_positive);
                acc.minus_limit = Some(!dir_positive);
            } else {
                acc.plus_limit = Some(false);
                acc.minus_limit = Some(false);
            }
            acc.raw_position = Some(float_field(reply, *position_at)?);
        }

        ReplyLayout::CharFlags {
            direction_at,
            done_at,
            overtravel_at,
            home_at,
        } => {
            let bytes = reply.as_bytes();
            let need = *direction_at.max(done_at).max(overtravel_at).max(home_at) + 1;
            if bytes.len() < need {
                return Err(ParseError::ShortReply {
                    need,
                    got: bytes.len(),
                });
            }
            let dir_positive = bytes[*direction_at] == b'P';
            acc.direction_positive = Some(dir_positive);
            acc.moving = Some(bytes[*done_at] != b'D');
            // Overtravel means the limit in the current travel direction.
            let overtravel = bytes[*overtravel_at] == b'L';
            acc.plus_limit = Some(overtravel && dir_positive);
            acc.minus_limit = Some(overtravel && !dir_positive);
            acc.home = Some(bytes[*home_at] == b'H');
        }

        ReplyLayout::MovingFlag { prefix } => {
            acc.moving = Some(int_field(reply, *prefix)? != 0);
        }

        ReplyLayout::Position { prefix } => {
            acc.raw_position = Some(float_field(reply, *prefix)?);
        }

        ReplyLayout::LimitWord {
            prefix,
            plus_mask,
            minus_mask,
        } => {
            let word = int_field(reply, *prefix)?;
            acc.plus_limit = Some(word & plus_mask != 0);
            acc.minus_limit = Some(word & minus_mask != 0);
        }

        ReplyLayout::FaultWord { prefix, fatal } => {
            let word = int_field(reply, *prefix)?;
            acc.fault = Some(word);
            if word != 0 && *fatal {
                acc.fatal_fault = true;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use motion_core::dialect::StatusBits;

    const MM_BITS: StatusBits = StatusBits {
        moving: 0x01,
        direction: 0x04,
        plus_limit: 0x08,
        minus_limit: 0x10,
        home: 0x20,
        power_off: 0x02,
    };

    fn status_byte_list() -> ReplyLayout {
        // "1MSx,2MSy,..." — byte at 3 + axis*5.
        ReplyLayout::StatusByteList {
            offset: 3,
            stride: 5,
            bits: MM_BITS,
        }
    }

    #[test]
    fn aggregate_status_byte_selects_axis_by_offset() {
        // Axis 0 moving plus-direction, axis 1 idle on minus limit.
        let reply = format!("1MS{},2MS{}", (0x01 | 0x04) as u8 as char, 0x10 as u8 as char);

        let mut a0 = ParsedStatus::default();
        apply_reply(&mut a0, &status_byte_list(), 0, &reply).unwrap();
        assert_eq!(a0.moving, Some(true));
        assert_eq!(a0.direction_positive, Some(true));
        assert_eq!(a0.minus_limit, Some(false));

        let mut a1 = ParsedStatus::default();
        apply_reply(&mut a1, &status_byte_list(), 1, &reply).unwrap();
        assert_eq!(a1.moving, Some(false));
        assert_eq!(a1.minus_limit, Some(true));
    }

    #[test]
    fn aggregate_short_reply_is_explicit_error() {
        let mut acc = ParsedStatus::default();
        let err = apply_reply(&mut acc, &status_byte_list(), 2, "1MSx").unwrap_err();
        assert_eq!(err, ParseError::ShortReply { need: 14, got: 4 });
    }

    #[test]
    fn position_list_indexes_by_field_position() {
        let layout = ReplyLayout::PositionList {
            separator: ',',
            prefix: 3,
        };
        let reply = "1TP5.012,2TP1.123,3TP-100.567";

        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &layout, 2, reply).unwrap();
        assert_eq!(acc.raw_position, Some(-100.567));

        let mut acc = ParsedStatus::default();
        let err = apply_reply(&mut acc, &layout, 3, reply).unwrap_err();
        assert_eq!(err, ParseError::MissingAxisField { axis: 3 });
    }

    #[test]
    fn code_chars_reply_decodes_busy_fault_and_limit() {
        let layout = ReplyLayout::CodeCharsWithPosition {
            status_at: 1,
            direction_at: 2,
            busy: b'B',
            fault: b'E',
            limit: b'L',
            position_at: 2,
        };

        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &layout, 0, "XB+12.5").unwrap();
        assert_eq!(acc.moving, Some(true));
        assert_eq!(acc.direction_positive, Some(true));
        assert_eq!(acc.fault, Some(0));
        assert_eq!(acc.raw_position, Some(12.5));

        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &layout, 0, "XL-3.0").unwrap();
        assert_eq!(acc.moving, Some(false));
        assert_eq!(acc.minus_limit, Some(true));
        assert_eq!(acc.plus_limit, Some(false));

        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &layout, 0, "XE+0.0").unwrap();
        assert_eq!(acc.fault, Some(1));
    }

    #[test]
    fn numeric_flag_replies_accumulate() {
        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &ReplyLayout::MovingFlag { prefix: 4 }, 0, "X ^ 1").unwrap();
        apply_reply(&mut acc, &ReplyLayout::Position { prefix: 5 }, 0, "X Z 0 2047.0")
            .unwrap();
        apply_reply(
            &mut acc,
            &ReplyLayout::LimitWord {
                prefix: 5,
                plus_mask: 1,
                minus_mask: 2,
            },
            0,
            "X ] 0 2",
        )
        .unwrap();

        let parsed = acc.finish().unwrap();
        assert_eq!(parsed.moving, Some(true));
        assert_eq!(parsed.raw_position, Some(2047.0));
        assert_eq!(parsed.plus_limit, Some(false));
        assert_eq!(parsed.minus_limit, Some(true));
    }

    #[test]
    fn char_flags_reply_decodes_direction_done_overtravel_home() {
        let layout = ReplyLayout::CharFlags {
            direction_at: 0,
            done_at: 1,
            overtravel_at: 2,
            home_at: 3,
        };

        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &layout, 0, "PNNN").unwrap();
        assert_eq!(acc.direction_positive, Some(true));
        assert_eq!(acc.moving, Some(true));
        assert_eq!(acc.plus_limit, Some(false));

        // Overtravel while moving minus lands on the minus limit.
        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &layout, 0, "MDLH").unwrap();
        assert_eq!(acc.moving, Some(false));
        assert_eq!(acc.minus_limit, Some(true));
        assert_eq!(acc.plus_limit, Some(false));
        assert_eq!(acc.home, Some(true));

        let mut acc = ParsedStatus::default();
        let err = apply_reply(&mut acc, &layout, 0, "PD").unwrap_err();
        assert_eq!(err, ParseError::ShortReply { need: 4, got: 2 });
    }

    #[test]
    fn fault_word_marks_fatal_only_when_nonzero() {
        let layout = ReplyLayout::FaultWord {
            prefix: 0,
            fatal: true,
        };

        let mut acc = ParsedStatus::default();
        apply_reply(&mut acc, &layout, 0, "0").unwrap();
        assert_eq!(acc.fault, Some(0));
        assert!(!acc.fatal_fault);

        apply_reply(&mut acc, &layout, 0, "3").unwrap();
        assert_eq!(acc.fault, Some(3));
        assert!(acc.fatal_fault);
    }

    #[test]
    fn parsing_is_idempotent() {
        let layout = ReplyLayout::CodeCharsWithPosition {
            status_at: 1,
            direction_at: 2,
            busy: b'B',
            fault: b'E',
            limit: b'L',
            position_at: 2,
        };
        let mut first = ParsedStatus::default();
        apply_reply(&mut first, &layout, 0, "XB-42.25").unwrap();
        let mut second = ParsedStatus::default();
        apply_reply(&mut second, &layout, 0, "XB-42.25").unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn finish_requires_moving_and_position() {
        let err = ParsedStatus::default().finish().unwrap_err();
        assert_eq!(err, ParseError::MissingField { field: "moving" });

        let acc = ParsedStatus {
            moving: Some(false),
            ..ParsedStatus::default()
        };
        let err = acc.finish().unwrap_err();
        assert_eq!(err, ParseError::MissingField { field: "position" });
    }
}
