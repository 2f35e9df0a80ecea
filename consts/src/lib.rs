#![no_std]

/// Size of the reassembly buffer for a single Intel HEX line, in ASCII bytes.
/// A worst-case data record is 11 framing characters plus 16 data bytes at
/// two hex characters each: 11 + 32 = 43, rounded up to a whole number of
/// segment payloads.
pub const MAX_HEX_LINE_SIZE: usize = 45;

/// Payload bytes carried by one segment frame. A CAN frame is 8 bytes and
/// the segment header (kind bit, line number, index, total) occupies the
/// first 24 bits, leaving 5 bytes of line data.
pub const HEX_SEGMENT_SIZE: usize = 5;

/// Upper bound on segments per line: `MAX_HEX_LINE_SIZE / HEX_SEGMENT_SIZE`.
pub const MAX_SEGMENTS_PER_LINE: usize = MAX_HEX_LINE_SIZE / HEX_SEGMENT_SIZE;

/// Fill byte for unused tail bytes of the line buffer. Doubles as the
/// end-of-content sentinel when computing the effective line length, so it
/// must be a value that can never appear in ASCII hex text.
pub const PAD: u8 = 0xFF;

/// CAN device id the updater listens on. Frames addressed to any other
/// device are ignored by the transfer inbox.
pub const UPDATER_DEVICE_ID: u8 = 0x00;

/// CAN device id response frames are addressed to.
pub const TRANSMITTER_DEVICE_ID: u8 = 0x00;

/// CAN command id used for transfer response frames.
pub const RESPONSE_COMMAND_ID: u8 = 0x00;

/// Milliseconds of bus silence before the current line is re-requested
/// from the transmitter.
pub const SEGMENT_TIMEOUT_MS: u32 = 5_000;

/// Milliseconds of bus silence before an in-progress transfer is aborted.
pub const TRANSFER_TIMEOUT_MS: u32 = 15_000;

/// First address of on-chip flash on the target.
pub const FLASH_BASE_ADDR: u32 = 0x0000_0000;

/// Base of the staging window the incoming image is committed into. The
/// running image below this address stays intact until the host explicitly
/// switches over.
pub const STAGING_BASE_ADDR: u32 = 0x0004_0000;

/// Size of the staging window.
pub const STAGING_SIZE: u32 = 0x0002_0000;

/// Flash page size of the target, used by hosts when erasing the staging
/// window ahead of a transfer.
pub const FLASH_PAGE: u32 = 4096;
