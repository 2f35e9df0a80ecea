// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Interpretation of parsed HEX records and the bridge to the staging
//! region.

use consts::{FLASH_BASE_ADDR, STAGING_BASE_ADDR, STAGING_SIZE};

use crate::parse::ParsedLine;
use crate::{FlashError, Staging};

pub(crate) const RECORD_DATA: u8 = 0x00;
pub(crate) const RECORD_EOF: u8 = 0x01;
pub(crate) const RECORD_EXT_SEGMENT_ADDR: u8 = 0x02;
pub(crate) const RECORD_START_SEGMENT_ADDR: u8 = 0x03;
pub(crate) const RECORD_EXT_LINEAR_ADDR: u8 = 0x04;
pub(crate) const RECORD_START_LINEAR_ADDR: u8 = 0x05;

/// Why a structurally valid line was still rejected. The line is requested
/// again; none of these end the transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub(crate) enum RecordError {
    /// A data record would run past the end of the staging window.
    AddressOutOfRange,
    /// The flash programming primitive reported a failure.
    Flash(FlashError),
    /// An EOF record arrived before the final line.
    EarlyEof,
    /// An extended-address record carried fewer than 2 data bytes.
    ShortExtendedAddress,
}

/// Running knowledge about the file being received: the base address
/// contributed by 02h/04h records, the touched address range and whether
/// the EOF record has been seen.
pub(crate) struct FileInfo {
    pub(crate) base_address: u32,
    pub(crate) min_address: u32,
    pub(crate) max_address: u32,
    pub(crate) eof: bool,
}

impl FileInfo {
    pub(crate) const fn new() -> Self {
        Self {
            base_address: 0,
            min_address: u32::MAX,
            max_address: 0,
            eof: false,
        }
    }

    /// Dispatch one record. `is_last_line` tells the EOF handler whether
    /// the record sits on the final announced line.
    pub(crate) fn apply<F: Staging>(
        &mut self,
        line: &ParsedLine,
        is_last_line: bool,
        staging: &mut F,
    ) -> Result<(), RecordError> {
        match line.record_type {
            RECORD_DATA => self.write_data(line, staging),
            RECORD_EOF => {
                if !is_last_line {
                    return Err(RecordError::EarlyEof);
                }
                self.eof = true;
                Ok(())
            }
            RECORD_EXT_SEGMENT_ADDR => {
                self.base_address = extended_address(line)? << 4;
                Ok(())
            }
            RECORD_EXT_LINEAR_ADDR => {
                self.base_address = extended_address(line)? << 16;
                Ok(())
            }
            // Start-address records describe where the host jumps after a
            // full image load; this target derives its entry point from
            // the vector table, so they are accepted and skipped.
            RECORD_START_SEGMENT_ADDR | RECORD_START_LINEAR_ADDR => {
                #[cfg(feature = "defmt")]
                defmt::warn!("ignoring start address record type {}", line.record_type);
                Ok(())
            }
            // The parser caps record types at 05h.
            _ => unreachable!(),
        }
    }

    fn write_data<F: Staging>(
        &mut self,
        line: &ParsedLine,
        staging: &mut F,
    ) -> Result<(), RecordError> {
        let address = self.base_address + line.address as u32;
        let end = address + line.byte_count as u32;

        self.min_address = self.min_address.min(address);
        self.max_address = self.max_address.max(end);

        if end > STAGING_BASE_ADDR + STAGING_SIZE {
            return Err(RecordError::AddressOutOfRange);
        }

        let dst = STAGING_BASE_ADDR + address - FLASH_BASE_ADDR;

        #[cfg(not(feature = "dry-run"))]
        {
            if staging.in_flash(dst) {
                staging.write_block(dst, &line.data).map_err(RecordError::Flash)?;
            } else {
                staging.copy(dst, &line.data);
            }
        }
        #[cfg(feature = "dry-run")]
        {
            let _ = (dst, staging);
        }

        Ok(())
    }
}

fn extended_address(line: &ParsedLine) -> Result<u32, RecordError> {
    if line.data.len() < 2 {
        return Err(RecordError::ShortExtendedAddress);
    }
    Ok((line.data[0] as u32) << 8 | line.data[1] as u32)
}
