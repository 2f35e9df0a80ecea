// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Adapter mapping the staging seam onto an `embedded-storage` NOR flash
//! driver, so hosts wire their flash peripheral in the same way they would
//! for any other storage consumer.

use embedded_storage::nor_flash::NorFlash;

use crate::{FlashError, Staging};

/// A staging region backed entirely by a [`NorFlash`] driver mapped at
/// `base`. The whole region is flash, so the RAM copy path is never taken.
///
/// The host must erase the staging pages before starting a transfer and
/// pick a driver whose write granularity accepts record-sized writes.
pub struct NorStaging<F> {
    flash: F,
    base: u32,
}

impl<F: NorFlash> NorStaging<F> {
    /// `base` is the absolute address the driver's offset 0 corresponds to.
    pub fn new(flash: F, base: u32) -> Self {
        Self { flash, base }
    }

    /// Hand the driver back, e.g. to verify or boot the staged image.
    pub fn release(self) -> F {
        self.flash
    }
}

impl<F: NorFlash> Staging for NorStaging<F> {
    fn in_flash(&self, addr: u32) -> bool {
        addr >= self.base && ((addr - self.base) as usize) < self.flash.capacity()
    }

    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        self.flash
            .write(addr - self.base, data)
            .map_err(|_| FlashError)
    }

    fn copy(&mut self, _addr: u32, _data: &[u8]) {
        // The region is flash end to end; there is no RAM to copy into.
    }
}
