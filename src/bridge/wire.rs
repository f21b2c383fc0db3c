//! Binary wire codec for the client-facing protocol
//!
//! # Inbound frames (client -> gateway)
//!
//! Byte 0 selects the request; all integers are little-endian.
//!
//! ```text
//! Resync     [0x00]                                        trailing bytes ignored
//! Command    [0x01][u32 topic_len][topic utf8][payload...]  payload is an opaque
//!                                                           host-encoded blob
//! Configure  [0x02][u32 declared_len][address utf8...]      address runs to the
//!                                                           end of the frame
//! other      ignored, no action
//! ```
//!
//! The Configure length field is historical: deployed clients write it, but
//! the address has always been sliced to the end of the frame regardless of
//! the declared value. The decoder keeps that behavior and logs a warning
//! when the two disagree.
//!
//! # Outbound frames (gateway -> client)
//!
//! A frame is zero or more records back to back:
//!
//! ```text
//! ┌──────────────┬─────────────┬────────┬──────────────────┬─────────────┐
//! │ u32 id_len   │ id utf8     │ 1 byte │ u32 payload_len  │ payload     │
//! │              │             │ kind   │ (0 when absent)  │             │
//! └──────────────┴─────────────┴────────┴──────────────────┴─────────────┘
//! ```
//!
//! Encoding goes through [`FrameEncoder`], a growable bounds-checked buffer:
//! a record that would push the frame past the configured cap is refused
//! with [`Error::EncodingOverflow`] instead of being written.
//!
//! Malformed inbound frames (unknown discriminator, length fields reaching
//! past the end, non-UTF-8 strings) are reported to the caller and dropped
//! there; they never produce a reply and never read out of bounds.

use crate::error::{Error, Result};
use crate::host::{UpdateKind, UpdateRecord};
use log::warn;

/// Inbound discriminator: full-state request
pub const DISC_RESYNC: u8 = 0;
/// Inbound discriminator: command publish request
pub const DISC_COMMAND: u8 = 1;
/// Inbound discriminator: broker reconfiguration request
pub const DISC_CONFIGURE: u8 = 2;

/// Default cap on one encoded outbound frame (1 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// A classified inbound frame, body bytes owned
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundRequest {
    Resync,
    Command { body: Vec<u8> },
    Configure { body: Vec<u8> },
}

/// Classify one raw client frame by its discriminator byte
///
/// Returns `None` for an empty frame or an unrecognized discriminator; the
/// frame is silently ignored in that case.
pub fn classify(frame: &[u8]) -> Option<InboundRequest> {
    let (&disc, body) = frame.split_first()?;
    match disc {
        DISC_RESYNC => Some(InboundRequest::Resync),
        DISC_COMMAND => Some(InboundRequest::Command {
            body: body.to_vec(),
        }),
        DISC_CONFIGURE => Some(InboundRequest::Configure {
            body: body.to_vec(),
        }),
        _ => None,
    }
}

/// Parse a command body into its topic and opaque payload bytes
///
/// The declared topic length is checked against the remaining bytes before
/// any slice is taken.
pub fn parse_command(body: &[u8]) -> Result<(String, &[u8])> {
    if body.len() < 4 {
        return Err(Error::MalformedFrame("command body shorter than its topic length field"));
    }
    let topic_len = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    let rest = &body[4..];
    if topic_len > rest.len() {
        return Err(Error::MalformedFrame("declared topic length reaches past the frame end"));
    }
    let topic = std::str::from_utf8(&rest[..topic_len])
        .map_err(|_| Error::MalformedFrame("topic is not valid UTF-8"))?
        .to_string();
    Ok((topic, &rest[topic_len..]))
}

/// Parse a configure body into the broker address
///
/// The address is everything after the 4-byte declared length field, which
/// is validated for consistency but does not bound the slice (see the
/// module docs).
pub fn parse_configure(body: &[u8]) -> Result<String> {
    if body.len() < 4 {
        return Err(Error::MalformedFrame("configure body shorter than its length field"));
    }
    let declared = u32::from_le_bytes([body[0], body[1], body[2], body[3]]) as usize;
    let rest = &body[4..];
    if declared != rest.len() {
        warn!(
            "Configure frame declares {} address bytes but carries {}; using the full remainder",
            declared,
            rest.len()
        );
    }
    let address = std::str::from_utf8(rest)
        .map_err(|_| Error::MalformedFrame("broker address is not valid UTF-8"))?
        .to_string();
    Ok(address)
}

/// Growable, bounds-checked builder for outbound frames
pub struct FrameEncoder {
    buf: Vec<u8>,
    limit: usize,
    records: usize,
}

impl FrameEncoder {
    /// Create an encoder capped at `limit` total frame bytes
    pub fn new(limit: usize) -> Self {
        Self {
            buf: Vec::new(),
            limit,
            records: 0,
        }
    }

    /// Append one record, refusing growth past the limit
    pub fn append(&mut self, record: &UpdateRecord) -> Result<()> {
        let payload_len = record.payload.as_ref().map_or(0, Vec::len);
        let needed = 4 + record.id.len() + 1 + 4 + payload_len;
        let attempted = self.buf.len() + needed;
        if attempted > self.limit {
            return Err(Error::EncodingOverflow {
                attempted,
                limit: self.limit,
            });
        }

        self.buf.extend_from_slice(&(record.id.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(record.id.as_bytes());
        self.buf.push(record.kind.as_u8());
        self.buf.extend_from_slice(&(payload_len as u32).to_le_bytes());
        if let Some(payload) = &record.payload {
            self.buf.extend_from_slice(payload);
        }
        self.records += 1;
        Ok(())
    }

    /// Number of records appended so far
    pub fn records(&self) -> usize {
        self.records
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Take the finished frame
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Encode a batch of records into one frame, failing on overflow
pub fn encode_records(records: &[UpdateRecord], limit: usize) -> Result<Vec<u8>> {
    let mut encoder = FrameEncoder::new(limit);
    for record in records {
        encoder.append(record)?;
    }
    Ok(encoder.finish())
}

/// Decode an outbound frame back into records (the client side of the codec)
///
/// Every length field is checked against the remaining bytes; the decoder
/// never reads past the frame end.
pub fn decode_records(frame: &[u8]) -> Result<Vec<UpdateRecord>> {
    let mut records = Vec::new();
    let mut rest = frame;

    while !rest.is_empty() {
        let id_len = read_u32(&mut rest)? as usize;
        let id_bytes = read_bytes(&mut rest, id_len)?;
        let id = std::str::from_utf8(id_bytes)
            .map_err(|_| Error::MalformedFrame("record id is not valid UTF-8"))?
            .to_string();

        let kind = match read_bytes(&mut rest, 1)?[0] {
            0 => UpdateKind::Publish,
            1 => UpdateKind::Death,
            2 => UpdateKind::Birth,
            _ => return Err(Error::MalformedFrame("unknown record kind")),
        };

        let payload_len = read_u32(&mut rest)? as usize;
        let payload = if payload_len == 0 {
            None
        } else {
            Some(read_bytes(&mut rest, payload_len)?.to_vec())
        };

        records.push(UpdateRecord { id, kind, payload });
    }

    Ok(records)
}

fn read_u32(rest: &mut &[u8]) -> Result<u32> {
    let bytes = read_bytes(rest, 4)?;
    Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn read_bytes<'a>(rest: &mut &'a [u8], len: usize) -> Result<&'a [u8]> {
    if rest.len() < len {
        return Err(Error::MalformedFrame("record field reaches past the frame end"));
    }
    let (taken, remaining) = rest.split_at(len);
    *rest = remaining;
    Ok(taken)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command_frame(topic: &str, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![DISC_COMMAND];
        frame.extend_from_slice(&(topic.len() as u32).to_le_bytes());
        frame.extend_from_slice(topic.as_bytes());
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&[0x00]), Some(InboundRequest::Resync));
        assert_eq!(
            classify(&[0x00, 0xFF, 0xFF]),
            Some(InboundRequest::Resync),
            "resync trailing bytes are ignored"
        );
        assert_eq!(
            classify(&[0x01, 0x01, 0x02]),
            Some(InboundRequest::Command {
                body: vec![0x01, 0x02]
            })
        );
        assert_eq!(
            classify(&[0x02, 0x09]),
            Some(InboundRequest::Configure { body: vec![0x09] })
        );
        assert_eq!(classify(&[0x07]), None);
        assert_eq!(classify(&[]), None);
    }

    #[test]
    fn test_command_round_trip() {
        let payload = [0xAA, 0xBB, 0xCC];
        let frame = command_frame("metrics/a", &payload);
        let Some(InboundRequest::Command { body }) = classify(&frame) else {
            panic!("expected command");
        };

        let (topic, parsed_payload) = parse_command(&body).unwrap();
        assert_eq!(topic, "metrics/a");
        assert_eq!(parsed_payload, payload);
    }

    #[test]
    fn test_command_boundary_rejection() {
        // Declares a 100-byte topic but carries only one byte after the field
        let mut body = 100u32.to_le_bytes().to_vec();
        body.push(b'a');
        assert!(matches!(
            parse_command(&body),
            Err(Error::MalformedFrame(_))
        ));

        // Body shorter than the length field itself
        assert!(parse_command(&[0x01, 0x00]).is_err());
    }

    #[test]
    fn test_configure_address_runs_to_frame_end() {
        let address = "tcp://broker.local:1883";
        let mut body = (address.len() as u32).to_le_bytes().to_vec();
        body.extend_from_slice(address.as_bytes());
        assert_eq!(parse_configure(&body).unwrap(), address);

        // A wrong declared length still yields the full remainder
        let mut skewed = 5u32.to_le_bytes().to_vec();
        skewed.extend_from_slice(address.as_bytes());
        assert_eq!(parse_configure(&skewed).unwrap(), address);
    }

    #[test]
    fn test_encode_known_vector() {
        let record = UpdateRecord {
            id: "a".to_string(),
            kind: UpdateKind::Publish,
            payload: None,
        };
        let frame = encode_records(std::slice::from_ref(&record), DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(
            frame,
            [0x01, 0x00, 0x00, 0x00, 0x61, 0x00, 0x00, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn test_encode_overflow_is_refused() {
        let record = UpdateRecord {
            id: "abcdef".to_string(),
            kind: UpdateKind::Birth,
            payload: Some(vec![0u8; 32]),
        };
        let err = encode_records(std::slice::from_ref(&record), 16).unwrap_err();
        assert!(matches!(
            err,
            Error::EncodingOverflow {
                attempted: 47,
                limit: 16
            }
        ));
    }

    #[test]
    fn test_record_round_trip() {
        let records = vec![
            UpdateRecord {
                id: "home/garage/temperature".to_string(),
                kind: UpdateKind::Birth,
                payload: Some(vec![1, 2, 3, 4]),
            },
            UpdateRecord {
                id: "home/garage/door".to_string(),
                kind: UpdateKind::Death,
                payload: None,
            },
        ];
        let frame = encode_records(&records, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(decode_records(&frame).unwrap(), records);
    }

    #[test]
    fn test_decode_rejects_truncated_frame() {
        let records = vec![UpdateRecord {
            id: "a".to_string(),
            kind: UpdateKind::Publish,
            payload: Some(vec![9, 9, 9]),
        }];
        let frame = encode_records(&records, DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert!(decode_records(&frame[..frame.len() - 1]).is_err());
    }
}
