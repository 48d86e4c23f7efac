//! Wire format of the streaming protocol.
//!
//! Outbound commands are `KeyOperator[Value]`, inbound status lines are
//! `Key=Value`, and both are terminated by a newline.

use crate::commands::{Command, Grammar, ValueType};
use crate::error::ProtocolError;
use crate::types::{Operator, Value};
use bytes::{Buf, BufMut, BytesMut};
use std::io;
use tokio_util::codec::{Decoder, Encoder};

/// Line terminator appended to every outbound command
pub const LINE_TERMINATOR: u8 = b'\n';

/// Longest inbound line accepted before the stream is considered broken
pub const MAX_LINE_LENGTH: usize = 4096;

/// Raw `key=value` pair from an inbound line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusLine<'a> {
    pub key: &'a str,
    pub raw_value: &'a str,
}

/// Render a validated command as a wire line, without terminator
pub fn encode(command: &Command) -> String {
    command.to_string()
}

/// Split an inbound line on its first `=`
pub fn split_line(line: &str) -> Result<StatusLine<'_>, ProtocolError> {
    let line = line.trim();
    let (key, raw_value) = line
        .split_once(Operator::Assign.as_char())
        .ok_or_else(|| ProtocolError::MalformedLine(line.to_string()))?;
    if key.is_empty() {
        return Err(ProtocolError::MalformedLine(line.to_string()));
    }
    Ok(StatusLine { key, raw_value })
}

/// Decode an inbound line into its command key and typed value
pub fn decode(line: &str, grammar: &Grammar) -> Result<(&'static str, Value), ProtocolError> {
    let StatusLine { key, raw_value } = split_line(line)?;
    let spec = grammar
        .get(key)
        .ok_or_else(|| ProtocolError::UnknownCommand(key.to_string()))?;

    let coercion_failed = || ProtocolError::TypeCoercionFailed {
        key: spec.key.to_string(),
        value: raw_value.to_string(),
    };

    let value = match spec.value_type {
        Some(ValueType::Bool) => {
            let index = spec
                .choices()
                .and_then(|c| c.iter().position(|v| *v == raw_value))
                .ok_or_else(coercion_failed)?;
            Value::Bool(index == 1)
        }
        Some(ValueType::Int) => Value::Int(raw_value.parse().map_err(|_| coercion_failed())?),
        Some(ValueType::Float) => Value::Float(raw_value.parse().map_err(|_| coercion_failed())?),
        Some(ValueType::Enum) | None => Value::Text(raw_value.to_string()),
    };

    Ok((spec.key, value))
}

/// Newline framing for the session's read and write halves.
///
/// Only complete lines are yielded; blank lines are skipped and a fragment
/// left over when the stream ends is dropped.
#[derive(Debug, Default)]
pub struct LineCodec {
    // bytes of the buffer already scanned for a terminator
    scanned: usize,
}

impl LineCodec {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Decoder for LineCodec {
    type Item = String;
    type Error = io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        loop {
            let Some(offset) = buf[self.scanned..].iter().position(|b| *b == LINE_TERMINATOR) else {
                self.scanned = buf.len();
                if buf.len() > MAX_LINE_LENGTH {
                    return Err(line_too_long());
                }
                return Ok(None);
            };

            let length = self.scanned + offset;
            if length > MAX_LINE_LENGTH {
                return Err(line_too_long());
            }

            let line = buf.split_to(length + 1);
            self.scanned = 0;

            let text = String::from_utf8_lossy(&line[..length]);
            let text = text.trim();
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<String>, io::Error> {
        let line = self.decode(buf)?;
        if line.is_none() && !buf.is_empty() {
            tracing::debug!(bytes = buf.len(), "Dropping partial line at end of stream");
            buf.advance(buf.len());
            self.scanned = 0;
        }
        Ok(line)
    }
}

fn line_too_long() -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("line exceeds {} bytes", MAX_LINE_LENGTH),
    )
}

impl Encoder<String> for LineCodec {
    type Error = io::Error;

    fn encode(&mut self, line: String, dst: &mut BytesMut) -> Result<(), io::Error> {
        dst.reserve(line.len() + 1);
        dst.put_slice(line.as_bytes());
        dst.put_u8(LINE_TERMINATOR);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::{
        CMD_ANALOG_GAIN, CMD_MAIN, CMD_MUTE, CMD_POWER, CMD_SOURCE, CMD_VERSION, CMD_VOLUME,
    };

    fn grammar() -> &'static Grammar {
        Grammar::c338()
    }

    #[test]
    fn encode_volume_assignment() {
        let cmd = grammar()
            .validate(CMD_VOLUME, Operator::Assign, Some(Value::Int(-12)))
            .unwrap();
        assert_eq!(encode(&cmd), "Main.Volume=-12");
    }

    #[test]
    fn encode_query_and_steps() {
        let query = grammar().validate(CMD_MAIN, Operator::Query, None).unwrap();
        assert_eq!(encode(&query), "Main?");

        let up = grammar().validate(CMD_VOLUME, Operator::Increment, None).unwrap();
        assert_eq!(encode(&up), "Main.Volume+");
    }

    #[test]
    fn decode_volume_as_float() {
        assert_eq!(
            decode("Main.Volume=-12", grammar()),
            Ok((CMD_VOLUME, Value::Float(-12.0)))
        );
    }

    #[test]
    fn decode_power_on_as_true() {
        assert_eq!(decode("Main.Power=On", grammar()), Ok((CMD_POWER, Value::Bool(true))));
        assert_eq!(decode("Main.Mute=Off\r", grammar()), Ok((CMD_MUTE, Value::Bool(false))));
    }

    #[test]
    fn decode_keeps_enum_values_as_text() {
        assert_eq!(
            decode("Main.Source=Coax2", grammar()),
            Ok((CMD_SOURCE, Value::Text("Coax2".into())))
        );
    }

    #[test]
    fn decode_splits_on_first_equals_only() {
        let line = split_line("Main.Model=A=B").unwrap();
        assert_eq!(line.key, "Main.Model");
        assert_eq!(line.raw_value, "A=B");
    }

    #[test]
    fn decode_rejects_bad_lines() {
        assert_eq!(
            decode("Main.Volume", grammar()),
            Err(ProtocolError::MalformedLine("Main.Volume".into()))
        );
        assert_eq!(
            decode("=On", grammar()),
            Err(ProtocolError::MalformedLine("=On".into()))
        );
        assert_eq!(
            decode("Zone2.Power=On", grammar()),
            Err(ProtocolError::UnknownCommand("Zone2.Power".into()))
        );
        assert_eq!(
            decode("Main.Version=V1.61", grammar()),
            Err(ProtocolError::TypeCoercionFailed {
                key: CMD_VERSION.into(),
                value: "V1.61".into()
            })
        );
        assert!(matches!(
            decode("Main.Power=Standby", grammar()),
            Err(ProtocolError::TypeCoercionFailed { .. })
        ));
    }

    #[test]
    fn assignments_survive_the_wire() {
        let cases = [
            (CMD_VOLUME, Value::Float(-35.5)),
            (CMD_VOLUME, Value::Float(-80.0)),
            (CMD_MUTE, Value::Bool(true)),
            (CMD_SOURCE, Value::Text("Wireless".into())),
            (CMD_ANALOG_GAIN, Value::Int(9_007_199_254_740_993)),
        ];

        for (key, value) in cases {
            let cmd = grammar()
                .validate(key, Operator::Assign, Some(value.clone()))
                .unwrap();
            assert_eq!(decode(&encode(&cmd), grammar()), Ok((key, value)));
        }
    }

    #[test]
    fn codec_yields_complete_lines_only() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"Main.Power=On\n\r\nMain.Vol"[..]);

        assert_eq!(codec.decode(&mut buf).unwrap(), Some("Main.Power=On".to_string()));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);

        buf.extend_from_slice(b"ume=-20\r\n");
        assert_eq!(codec.decode(&mut buf).unwrap(), Some("Main.Volume=-20".to_string()));
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_drops_fragment_at_eof() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&b"Main.Mute=On\nMain.Pow"[..]);

        assert_eq!(codec.decode_eof(&mut buf).unwrap(), Some("Main.Mute=On".to_string()));
        assert_eq!(codec.decode_eof(&mut buf).unwrap(), None);
        assert!(buf.is_empty());
    }

    #[test]
    fn codec_rejects_runaway_lines() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::from(&vec![b'x'; MAX_LINE_LENGTH + 1][..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn codec_rejects_long_lines_even_when_terminated() {
        let mut codec = LineCodec::new();
        let mut long = vec![b'x'; MAX_LINE_LENGTH * 2];
        long.push(b'\n');
        let mut buf = BytesMut::from(&long[..]);
        let err = codec.decode(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        // right at the limit is still a line
        let mut codec = LineCodec::new();
        let mut line = vec![b'x'; MAX_LINE_LENGTH];
        line.push(b'\n');
        let mut buf = BytesMut::from(&line[..]);
        assert_eq!(codec.decode(&mut buf).unwrap().map(|l| l.len()), Some(MAX_LINE_LENGTH));
    }

    #[test]
    fn codec_appends_terminator() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        codec.encode("Main?".to_string(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"Main?\n");
    }
}
