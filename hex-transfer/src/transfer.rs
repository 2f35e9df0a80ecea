// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The transfer state machine tying reassembly, parsing, record dispatch
//! and the response path together.

use can_protocol::{
    encode_response, CanFrame, Frame, ResponseCode, ResponseContext, TransferInit,
    TransferSegment, CRC32, FRAME_LEN,
};
use consts::{SEGMENT_TIMEOUT_MS, TRANSFER_TIMEOUT_MS, UPDATER_DEVICE_ID};
use crc::Digest;

use crate::line::LineAssembler;
use crate::parse::{effective_len, parse_line};
use crate::records::FileInfo;
use crate::{CanTx, Clock, Staging};

/// Receive side of one firmware transfer. There is exactly one active
/// transfer per device; the host owns a single instance and drives it from
/// its main loop.
///
/// `handle_frame` ingests inbox frames and never blocks; all line
/// finalisation, flash programming, timeout handling and response
/// transmission happen inside `tick`, which emits at most one response
/// frame per call.
pub struct HexTransfer<C: Clock, T: CanTx, F: Staging> {
    clock: C,
    bus: T,
    staging: F,

    file: FileInfo,
    line: LineAssembler,
    /// Running CRC32 over the raw ASCII bytes of every accepted line.
    digest: Digest<'static, u32>,

    expected_lines: u16,
    expected_file_crc32: u32,
    current_line: u16,

    in_progress: bool,
    complete: bool,
    /// One-shot: a new init frame arrived and the next tick must answer it.
    new_init_pending: bool,
    /// One-shot: the pending init failed its checksum.
    init_error: bool,

    /// Timestamp of the last successfully validated frame.
    last_frame_ms: u32,
    /// Timestamp the 5 s retransmit request is measured against. Re-armed
    /// when the request fires so a silent transmitter is asked once per
    /// window, not once per tick.
    retry_ms: u32,
}

impl<C: Clock, T: CanTx, F: Staging> HexTransfer<C, T, F> {
    pub fn new(clock: C, bus: T, staging: F) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            bus,
            staging,
            file: FileInfo::new(),
            line: LineAssembler::new(),
            digest: CRC32.digest(),
            expected_lines: 0,
            expected_file_crc32: 0,
            current_line: 0,
            in_progress: false,
            complete: false,
            new_init_pending: false,
            init_error: false,
            last_frame_ms: now,
            retry_ms: now,
        }
    }

    /// Clear all transfer state back to idle.
    pub fn init(&mut self) {
        self.abort();
    }

    /// Whether a transfer is currently receiving lines.
    pub fn is_transfer_in_progress(&self) -> bool {
        self.in_progress
    }

    /// Whether the last transfer ran to completion with a matching file
    /// CRC. Cleared by the next init or abort.
    pub fn is_file_transfer_complete(&self) -> bool {
        self.complete
    }

    /// Absolute address range `(min, max)` touched by data records so far,
    /// or `None` before the first data record lands. The upper layer uses
    /// this to know how much of the staging window to verify and copy.
    pub fn image_bounds(&self) -> Option<(u32, u32)> {
        (self.file.min_address <= self.file.max_address)
            .then_some((self.file.min_address, self.file.max_address))
    }

    /// Entry point for a raw inbox message. Frames addressed to other
    /// devices (heartbeats, telemetry) are not for the updater and are
    /// skipped.
    pub fn handle_can_message(&mut self, id: u32, buf: &[u8; FRAME_LEN]) {
        let (device_id, _command_id) = can_protocol::split_id(id);
        if device_id != UPDATER_DEVICE_ID {
            return;
        }
        self.handle_frame(buf);
    }

    /// Ingest one 8-byte transfer frame. State is updated but nothing is
    /// written to flash and nothing is transmitted; both wait for the next
    /// `tick`.
    pub fn handle_frame(&mut self, buf: &[u8; FRAME_LEN]) {
        match Frame::parse(buf) {
            Frame::Init(msg, calculated) => self.process_init(msg, calculated),
            Frame::Segment(msg) => self.process_segment(msg),
        }
    }

    fn process_init(&mut self, msg: TransferInit, calculated: u16) {
        if msg.init_crc16 != calculated {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "init rejected: checksum {=u16:#x} != {=u16:#x}",
                msg.init_crc16,
                calculated
            );
            self.new_init_pending = true;
            self.init_error = true;
            return;
        }

        // A valid init always restarts from scratch, even mid-transfer.
        self.abort();
        self.in_progress = true;
        self.expected_lines = msg.line_count;
        self.expected_file_crc32 = msg.file_crc32;
        self.new_init_pending = true;

        #[cfg(feature = "defmt")]
        defmt::info!(
            "transfer started: {=u16} lines, file crc {=u32:#x}",
            msg.line_count,
            msg.file_crc32
        );
    }

    fn process_segment(&mut self, msg: TransferSegment) {
        if !self.in_progress || self.file.eof {
            #[cfg(feature = "defmt")]
            defmt::trace!("segment ignored, no line expected: {}", msg);
            return;
        }

        match self.line.accept(self.current_line, &msg) {
            Ok(()) => {
                let now = self.clock.now_ms();
                self.last_frame_ms = now;
                self.retry_ms = now;
            }
            // Dropped silently; the segment timeout re-requests the line.
            Err(_reason) => {
                #[cfg(feature = "defmt")]
                defmt::trace!("segment dropped ({}): {}", _reason, msg);
            }
        }
    }

    /// Cyclic driver. Priority order, first applicable wins:
    /// inactivity abort, per-line retransmit request, pending init answer,
    /// completed-line finalisation, end-of-file checksum gate.
    pub fn tick(&mut self) {
        // A rejected init must surface its ERROR even though no transfer
        // ever started, so the one-shot flags are consumed ahead of the
        // idle gate.
        if !self.in_progress {
            if self.new_init_pending {
                self.answer_init();
            }
            return;
        }

        let now = self.clock.now_ms();

        if now.wrapping_sub(self.last_frame_ms) >= TRANSFER_TIMEOUT_MS {
            #[cfg(feature = "defmt")]
            defmt::warn!("transfer timed out at line {=u16}", self.current_line);
            self.abort();
            self.send_response(ResponseCode::Error);
            return;
        }

        if now.wrapping_sub(self.retry_ms) >= SEGMENT_TIMEOUT_MS {
            self.retry_ms = now;
            #[cfg(feature = "defmt")]
            defmt::debug!("re-requesting line {=u16}", self.current_line);
            self.send_response(ResponseCode::SendLine);
            return;
        }

        if self.new_init_pending {
            self.answer_init();
            return;
        }

        if self.line.is_ready() {
            self.finalize_line();
            // Sent regardless of outcome: on failure the index did not
            // advance, so this asks for the same line again.
            self.send_response(ResponseCode::SendLine);
            return;
        }

        if self.file.eof {
            self.finish();
        }
    }

    /// Full reset to idle. Called on inactivity timeout, on a new valid
    /// init and on fatal record errors; also the body of `init()`.
    pub fn abort(&mut self) {
        let now = self.clock.now_ms();
        self.file = FileInfo::new();
        self.line.reset();
        self.digest = CRC32.digest();
        self.expected_lines = 0;
        self.expected_file_crc32 = 0;
        self.current_line = 0;
        self.in_progress = false;
        self.complete = false;
        self.new_init_pending = false;
        self.init_error = false;
        self.last_frame_ms = now;
        self.retry_ms = now;
    }

    fn answer_init(&mut self) {
        self.new_init_pending = false;
        if self.init_error {
            self.init_error = false;
            self.send_response(ResponseCode::Error);
        } else {
            self.send_response(ResponseCode::SendLine);
        }
    }

    /// Parse the reassembled buffer and dispatch its record. On success
    /// the line's ASCII bytes are folded into the file CRC and the index
    /// advances; on any failure the buffer is cleared and the index stays,
    /// so the retransmission rebuilds the line from scratch.
    fn finalize_line(&mut self) {
        let buf = *self.line.bytes();
        let accepted = match parse_line(&buf) {
            Ok(parsed) => {
                let is_last = self.current_line + 1 == self.expected_lines;
                match self.file.apply(&parsed, is_last, &mut self.staging) {
                    Ok(()) => true,
                    Err(_reason) => {
                        #[cfg(feature = "defmt")]
                        defmt::warn!(
                            "line {=u16} rejected: {}",
                            self.current_line,
                            _reason
                        );
                        false
                    }
                }
            }
            Err(_reason) => {
                #[cfg(feature = "defmt")]
                defmt::warn!(
                    "line {=u16} failed to parse: {}",
                    self.current_line,
                    _reason
                );
                false
            }
        };

        if accepted {
            self.digest.update(&buf[..effective_len(&buf)]);
            self.current_line += 1;
        }
        self.line.reset();
    }

    /// End-of-file checksum gate: the running CRC over all accepted lines
    /// must match the value announced in the init frame.
    fn finish(&mut self) {
        let computed = core::mem::replace(&mut self.digest, CRC32.digest()).finalize();
        if computed == self.expected_file_crc32 {
            #[cfg(feature = "defmt")]
            defmt::info!("transfer complete, file crc {=u32:#x}", computed);
            self.in_progress = false;
            self.complete = true;
            self.send_response(ResponseCode::TransferComplete);
        } else {
            #[cfg(feature = "defmt")]
            defmt::warn!(
                "file crc mismatch: computed {=u32:#x}, expected {=u32:#x}",
                computed,
                self.expected_file_crc32
            );
            self.abort();
            self.send_response(ResponseCode::Error);
        }
    }

    fn send_response(&mut self, code: ResponseCode) {
        let snapshot = ResponseContext {
            line_index: self.current_line,
            line_count: self.expected_lines,
        };
        let frame = CanFrame::response(encode_response(code, snapshot));
        self.bus.send(&frame);
    }
}
