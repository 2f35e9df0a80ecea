// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! CAN wire format for the Intel HEX firmware transfer.
//!
//! Two 8-byte frame kinds travel from the transmitter to the updater: an
//! *init* frame announcing the file (line count and file CRC32) and a
//! *segment* frame carrying a 5-byte slice of one HEX line. The updater
//! answers with single-byte-coded response frames.
//!
//! Every frame is a little-endian bit-packed 64-bit word. The word is always
//! assembled explicitly from the 8 bytes and fields are masked out of it;
//! nothing here depends on host endianness or struct layout.

#![no_std]

#[cfg(test)]
extern crate std;

use consts::{HEX_SEGMENT_SIZE, RESPONSE_COMMAND_ID, TRANSMITTER_DEVICE_ID};
use crc::{Crc, CRC_32_ISO_HDLC};

/// Every transfer frame is a full classic CAN payload.
pub const FRAME_LEN: usize = 8;

/// Ethernet CRC32 (poly 0x04C11DB7 reflected, init/xorout all-ones). The
/// same engine computes the init-frame checksum, the whole-file checksum
/// and the response trailer byte, so transmitter and updater only have to
/// agree on this one algorithm.
pub static CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Announces a transfer: total number of HEX lines and the CRC32 the
/// transmitter computed over the ASCII bytes of all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransferInit {
    /// Total number of lines in the HEX file (15 bits on the wire).
    pub line_count: u16,
    /// CRC32 over the ASCII bytes of every line, pad excluded.
    pub file_crc32: u32,
    /// Checksum guarding this frame: the low 16 bits of a CRC32 over the
    /// first 6 packed bytes (the message body). The truncation is part of
    /// the wire format and must not be "fixed".
    pub init_crc16: u16,
}

/// One 5-byte slice of a HEX line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransferSegment {
    /// 0-based line number this slice belongs to (15 bits on the wire).
    pub line_num: u16,
    /// Slot of this slice within the line (4 bits).
    pub segment_index: u8,
    /// Number of slices the line was split into (4 bits).
    pub segment_total: u8,
    /// ASCII payload; unused tail bytes carry the pad value.
    pub payload: [u8; HEX_SEGMENT_SIZE],
}

/// An incoming transfer frame, classified by bit 0 of the packed word.
///
/// `Init` carries the checksum the decoder computed over the received body
/// alongside the parsed message, so callers can compare it against
/// [`TransferInit::init_crc16`] without re-packing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Frame {
    Init(TransferInit, u16),
    Segment(TransferSegment),
}

impl Frame {
    /// Classify and unpack a raw 8-byte frame. All bit patterns are legal
    /// representations; semantic validation is left to the processors.
    pub fn parse(buf: &[u8; FRAME_LEN]) -> Self {
        if buf[0] & 0x01 == 0 {
            let (msg, calculated) = TransferInit::unpack(buf);
            Frame::Init(msg, calculated)
        } else {
            Frame::Segment(TransferSegment::unpack(buf))
        }
    }
}

impl TransferInit {
    /// Build an init message with a correctly computed body checksum.
    pub fn new(line_count: u16, file_crc32: u32) -> Self {
        let mut msg = Self {
            line_count,
            file_crc32,
            init_crc16: 0,
        };
        msg.init_crc16 = init_body_crc16(&msg.pack());
        msg
    }

    /// Pack into the wire layout: bit 0 = 0, bits 1..16 line count,
    /// bits 16..48 file CRC32, bits 48..64 init checksum.
    pub fn pack(&self) -> [u8; FRAME_LEN] {
        let mut word = 0u64;
        word |= ((self.line_count & 0x7FFF) as u64) << 1;
        word |= (self.file_crc32 as u64) << 16;
        word |= (self.init_crc16 as u64) << 48;
        word_to_bytes(word)
    }

    /// Unpack, returning the message and the checksum computed over the
    /// received body for comparison with the carried `init_crc16`.
    pub fn unpack(buf: &[u8; FRAME_LEN]) -> (Self, u16) {
        let word = word_from_bytes(buf);
        let msg = Self {
            line_count: ((word >> 1) & 0x7FFF) as u16,
            file_crc32: ((word >> 16) & 0xFFFF_FFFF) as u32,
            init_crc16: ((word >> 48) & 0xFFFF) as u16,
        };
        (msg, init_body_crc16(buf))
    }
}

impl TransferSegment {
    /// Pack into the wire layout: bit 0 = 1, bits 1..16 line number,
    /// bits 16..20 segment index, bits 20..24 segment total, bits 24..64
    /// payload.
    pub fn pack(&self) -> [u8; FRAME_LEN] {
        let mut word = 0x1u64;
        word |= ((self.line_num & 0x7FFF) as u64) << 1;
        word |= ((self.segment_index & 0x0F) as u64) << 16;
        word |= ((self.segment_total & 0x0F) as u64) << 20;
        for (i, &b) in self.payload.iter().enumerate() {
            word |= (b as u64) << (24 + 8 * i);
        }
        word_to_bytes(word)
    }

    pub fn unpack(buf: &[u8; FRAME_LEN]) -> Self {
        let word = word_from_bytes(buf);
        let mut payload = [0u8; HEX_SEGMENT_SIZE];
        for (i, b) in payload.iter_mut().enumerate() {
            *b = ((word >> (24 + 8 * i)) & 0xFF) as u8;
        }
        Self {
            line_num: ((word >> 1) & 0x7FFF) as u16,
            segment_index: ((word >> 16) & 0x0F) as u8,
            segment_total: ((word >> 20) & 0x0F) as u8,
            payload,
        }
    }
}

// Renders the payload the way the bus monitor does: printable ASCII as-is,
// pad bytes as dots.
#[cfg(feature = "defmt")]
impl defmt::Format for TransferSegment {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(
            f,
            "segment line={} {}/{} [",
            self.line_num,
            self.segment_index,
            self.segment_total
        );
        for &b in &self.payload {
            if b == consts::PAD {
                defmt::write!(f, ".");
            } else {
                defmt::write!(f, "{}", b as char);
            }
        }
        defmt::write!(f, "]");
    }
}

/// Checksum guarding the init frame: CRC32 over the first 6 packed bytes,
/// truncated to its low 16 bits.
pub fn init_body_crc16(buf: &[u8; FRAME_LEN]) -> u16 {
    (CRC32.checksum(&buf[..6]) & 0xFFFF) as u16
}

/// Updater-to-transmitter response codes, carried in byte 0 of a response
/// frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum ResponseCode {
    None = 0,
    /// The transmitter should send (or resend) the line named in the
    /// response payload.
    SendLine = 1,
    TransferComplete = 2,
    Error = 3,
}

impl ResponseCode {
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(ResponseCode::None),
            1 => Some(ResponseCode::SendLine),
            2 => Some(ResponseCode::TransferComplete),
            3 => Some(ResponseCode::Error),
            _ => None,
        }
    }
}

/// Snapshot of the transfer accompanying a response code. `line_index` is
/// the line the updater wants next (or was working on when the error
/// surfaced), mirroring the per-block index the transmitter needs for
/// retransmission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResponseContext {
    pub line_index: u16,
    pub line_count: u16,
}

/// Encode a response frame. Layout: byte 0 code, bytes 1..3 line index LE,
/// bytes 3..5 line count LE, bytes 5..7 reserved, byte 7 the low byte of a
/// CRC32 over bytes 0..7, computed at send time.
pub fn encode_response(code: ResponseCode, ctx: ResponseContext) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = code as u8;
    frame[1..3].copy_from_slice(&ctx.line_index.to_le_bytes());
    frame[3..5].copy_from_slice(&ctx.line_count.to_le_bytes());
    frame[7] = (CRC32.checksum(&frame[..7]) & 0xFF) as u8;
    frame
}

/// An outbound CAN message. The extended identifier packs the device id in
/// its low byte and the command id in the next one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CanFrame {
    pub device_id: u8,
    pub command_id: u8,
    pub data: [u8; FRAME_LEN],
}

impl CanFrame {
    /// Frame addressed to the transmitter on the response command id.
    pub fn response(data: [u8; FRAME_LEN]) -> Self {
        Self {
            device_id: TRANSMITTER_DEVICE_ID,
            command_id: RESPONSE_COMMAND_ID,
            data,
        }
    }

    pub fn id(&self) -> u32 {
        join_id(self.device_id, self.command_id)
    }
}

/// Split a CAN identifier into `(device_id, command_id)`.
pub fn split_id(id: u32) -> (u8, u8) {
    ((id & 0xFF) as u8, ((id >> 8) & 0xFF) as u8)
}

/// Join a device id and command id into a CAN identifier.
pub fn join_id(device_id: u8, command_id: u8) -> u32 {
    device_id as u32 | (command_id as u32) << 8
}

fn word_from_bytes(buf: &[u8; FRAME_LEN]) -> u64 {
    let mut word = 0u64;
    for (i, &b) in buf.iter().enumerate() {
        word |= (b as u64) << (8 * i);
    }
    word
}

fn word_to_bytes(word: u64) -> [u8; FRAME_LEN] {
    let mut buf = [0u8; FRAME_LEN];
    for (i, b) in buf.iter_mut().enumerate() {
        *b = ((word >> (8 * i)) & 0xFF) as u8;
    }
    buf
}
