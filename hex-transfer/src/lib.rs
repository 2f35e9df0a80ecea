// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Receive side of the CAN Intel HEX firmware transfer.
//!
//! A transmitter splits each line of a HEX file into 5-byte segments and
//! ships them in 8-byte CAN frames. This crate reassembles the segments,
//! validates each line (Intel HEX grammar and line checksum), interprets
//! the records, commits data records into a flash staging window and keeps
//! a running CRC32 over the whole file that must match the value announced
//! in the init frame.
//!
//! The core is driven entirely by the host's main loop: `handle_frame` for
//! every inbox frame and a cyclic `tick` that finalises lines, enforces
//! timeouts and emits at most one response frame per call. Neither entry
//! point blocks and nothing here allocates.
//!
//! Hardware is reached through three narrow traits ([`Clock`], [`CanTx`]
//! and [`Staging`]), so the state machine runs unmodified on targets and
//! in host tests.

#![no_std]

#[cfg(test)]
extern crate std;

mod line;
mod nor;
mod parse;
mod records;
mod transfer;

pub use nor::NorStaging;
pub use parse::{parse_line, ParseError, ParsedLine};
pub use transfer::HexTransfer;

use can_protocol::CanFrame;

/// Monotonic millisecond source. Wrapping is tolerated; all comparisons in
/// the core use wrapping arithmetic.
pub trait Clock {
    fn now_ms(&self) -> u32;
}

/// Outbound CAN path for response frames.
pub trait CanTx {
    fn send(&mut self, frame: &CanFrame);
}

/// Flash programming failed. The current line is rejected and requested
/// again; the transfer itself keeps going.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlashError;

/// The staging region data records are committed into.
///
/// Data may land in memory-mapped flash (requiring the programming
/// primitive) or in plain RAM; `in_flash` selects the path per write. The
/// region is owned exclusively by the transfer while one is in progress
/// and the writer is never reentered.
pub trait Staging {
    /// Whether `addr` falls inside memory that needs flash programming.
    fn in_flash(&self, addr: u32) -> bool;

    /// Atomic block write through the flash programming primitive.
    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError>;

    /// Plain byte copy for RAM-backed staging.
    fn copy(&mut self, addr: u32, data: &[u8]);
}
