// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Wire format for Gearman packets.
//!
//! Each packet on the wire has the following layout:
//! - 4 bytes: magic (`\0REQ` or `\0RES`)
//! - 4 bytes: packet type (big-endian)
//! - 4 bytes: payload length (big-endian)
//! - N bytes: NUL-separated arguments

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::packet::{Magic, Packet, PacketType};

/// Maximum payload size (64 MB)
pub const MAX_PACKET_SIZE: usize = 64 * 1024 * 1024;

/// Header size (4 bytes magic + 4 bytes type + 4 bytes length)
pub const HEADER_SIZE: usize = 12;

/// Errors that can occur during packet encoding/decoding
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("packet too large: {0} bytes (max: {MAX_PACKET_SIZE})")]
    PacketTooLarge(usize),

    #[error("invalid magic: {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("invalid packet type: {0}")]
    InvalidPacketType(u32),

    #[error("malformed arguments for {kind:?}: expected {expected}, found {found}")]
    MalformedArguments {
        kind: PacketType,
        expected: usize,
        found: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

/// Encode a packet to bytes for wire transmission.
pub fn encode(packet: &Packet) -> Result<Bytes, FrameError> {
    let mut buf = BytesMut::new();
    encode_into(packet, &mut buf)?;
    Ok(buf.freeze())
}

/// Append the wire form of a packet to an output buffer.
pub fn encode_into(packet: &Packet, buf: &mut BytesMut) -> Result<(), FrameError> {
    let expected = packet.kind.arg_count();
    if packet.args.len() != expected {
        return Err(FrameError::MalformedArguments {
            kind: packet.kind,
            expected,
            found: packet.args.len(),
        });
    }

    let separators = expected.saturating_sub(1);
    let length = packet.args.iter().map(Bytes::len).sum::<usize>() + separators;
    if length > MAX_PACKET_SIZE {
        return Err(FrameError::PacketTooLarge(length));
    }

    buf.reserve(HEADER_SIZE + length);
    buf.put_slice(&packet.magic.as_bytes());
    buf.put_u32(packet.kind as u32);
    buf.put_u32(length as u32);
    for (i, arg) in packet.args.iter().enumerate() {
        if i > 0 {
            buf.put_u8(0);
        }
        buf.put_slice(arg);
    }
    Ok(())
}

/// Try to decode one packet from the front of `buf`.
///
/// Returns `Ok(None)` when the buffer does not yet hold a complete packet;
/// the buffer is left untouched in that case.
pub fn decode(buf: &mut BytesMut) -> Result<Option<Packet>, FrameError> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    let magic = Magic::try_from([buf[0], buf[1], buf[2], buf[3]])?;
    let code = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
    let length = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]) as usize;

    if length > MAX_PACKET_SIZE {
        return Err(FrameError::PacketTooLarge(length));
    }
    let kind = PacketType::try_from(code)?;

    if buf.len() < HEADER_SIZE + length {
        buf.reserve(HEADER_SIZE + length - buf.len());
        return Ok(None);
    }

    buf.advance(HEADER_SIZE);
    let payload = buf.split_to(length).freeze();
    let args = split_args(kind, payload)?;
    Ok(Some(Packet::new(magic, kind, args)))
}

/// Decode a single complete packet from a byte slice.
pub fn decode_from_bytes(bytes: &[u8]) -> Result<Packet, FrameError> {
    let mut buf = BytesMut::from(bytes);
    decode(&mut buf)?.ok_or_else(|| {
        FrameError::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "incomplete packet",
        ))
    })
}

fn split_args(kind: PacketType, mut payload: Bytes) -> Result<Vec<Bytes>, FrameError> {
    let expected = kind.arg_count();
    if expected == 0 {
        if !payload.is_empty() {
            return Err(FrameError::MalformedArguments {
                kind,
                expected: 0,
                found: 1,
            });
        }
        return Ok(Vec::new());
    }

    let mut args = Vec::with_capacity(expected);
    while args.len() + 1 < expected {
        match payload.iter().position(|b| *b == 0) {
            Some(pos) => {
                args.push(payload.split_to(pos));
                payload.advance(1);
            }
            None => {
                return Err(FrameError::MalformedArguments {
                    kind,
                    expected,
                    found: args.len() + 1,
                });
            }
        }
    }
    args.push(payload);
    Ok(args)
}

/// Write a packet to an async writer
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
) -> Result<(), FrameError> {
    let encoded = encode(packet)?;
    writer.write_all(&encoded).await?;
    Ok(())
}

/// Read a packet from an async reader
pub async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Packet, FrameError> {
    let mut header = [0u8; HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let magic = Magic::try_from([header[0], header[1], header[2], header[3]])?;
    let code = u32::from_be_bytes([header[4], header[5], header[6], header[7]]);
    let length = u32::from_be_bytes([header[8], header[9], header[10], header[11]]) as usize;

    if length > MAX_PACKET_SIZE {
        return Err(FrameError::PacketTooLarge(length));
    }
    let kind = PacketType::try_from(code)?;

    let mut payload = vec![0u8; length];
    reader.read_exact(&mut payload).await?;

    let args = split_args(kind, Bytes::from(payload))?;
    Ok(Packet::new(magic, kind, args))
}
