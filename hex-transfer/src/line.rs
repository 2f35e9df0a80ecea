// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Reassembly of one HEX line from 5-byte segments.

use can_protocol::TransferSegment;
use consts::{HEX_SEGMENT_SIZE, MAX_HEX_LINE_SIZE, MAX_SEGMENTS_PER_LINE, PAD};

/// Why an incoming segment was dropped. All of these are silent on the
/// wire; the transmitter recovers through the segment timeout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum SegmentError {
    /// The frame belongs to a line other than the one being assembled.
    StaleLine,
    /// The advertised segment total is 0 or larger than a line can hold.
    TotalOutOfRange,
    /// The frame disagrees with the total adopted from earlier segments.
    TotalMismatch,
    /// Segment index at or beyond the advertised total.
    IndexOutOfRange,
}

/// Line buffer plus segment bookkeeping. The buffer is pad-initialised so
/// the effective line length can be found by scanning for the first pad
/// byte; the bitmap has one bit per segment slot.
pub(crate) struct LineAssembler {
    buf: [u8; MAX_HEX_LINE_SIZE],
    received: u16,
    total: Option<u8>,
}

impl LineAssembler {
    pub(crate) const fn new() -> Self {
        Self {
            buf: [PAD; MAX_HEX_LINE_SIZE],
            received: 0,
            total: None,
        }
    }

    /// Clear all per-line state for the next line (or after a failed
    /// parse, so a retransmission starts from an empty buffer).
    pub(crate) fn reset(&mut self) {
        self.buf = [PAD; MAX_HEX_LINE_SIZE];
        self.received = 0;
        self.total = None;
    }

    /// Apply one segment frame for the line at `current_line`.
    ///
    /// The first accepted segment fixes the segment total for the line;
    /// later frames must agree with it. Duplicates overwrite their slot
    /// idempotently. A correct transmitter repeats identical bytes; if it
    /// does not, the file CRC catches the corruption at the end.
    pub(crate) fn accept(
        &mut self,
        current_line: u16,
        msg: &TransferSegment,
    ) -> Result<(), SegmentError> {
        if msg.line_num != current_line {
            return Err(SegmentError::StaleLine);
        }

        match self.total {
            None => {
                if msg.segment_total == 0 || msg.segment_total as usize > MAX_SEGMENTS_PER_LINE {
                    return Err(SegmentError::TotalOutOfRange);
                }
                self.total = Some(msg.segment_total);
            }
            Some(total) => {
                if msg.segment_total != total {
                    return Err(SegmentError::TotalMismatch);
                }
            }
        }

        if msg.segment_index >= msg.segment_total {
            return Err(SegmentError::IndexOutOfRange);
        }

        let offset = msg.segment_index as usize * HEX_SEGMENT_SIZE;
        self.buf[offset..offset + HEX_SEGMENT_SIZE].copy_from_slice(&msg.payload);
        self.received |= 1 << msg.segment_index;
        Ok(())
    }

    /// Whether every segment slot `[0, total)` has been filled. Computed
    /// on demand from the bitmap.
    pub(crate) fn is_ready(&self) -> bool {
        match self.total {
            Some(total) => {
                let wanted = (1u16 << total) - 1;
                self.received & wanted == wanted
            }
            None => false,
        }
    }

    pub(crate) fn bytes(&self) -> &[u8; MAX_HEX_LINE_SIZE] {
        &self.buf
    }
}
