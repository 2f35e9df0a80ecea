// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! End-to-end transfer scenarios driven through the public API, with the
//! platform seams replaced by in-memory fakes.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use can_protocol::{
    CanFrame, ResponseCode, TransferInit, TransferSegment, CRC32, FRAME_LEN,
};
use consts::{
    HEX_SEGMENT_SIZE, PAD, SEGMENT_TIMEOUT_MS, STAGING_SIZE, TRANSFER_TIMEOUT_MS,
};
use hex_transfer::{CanTx, Clock, FlashError, HexTransfer, Staging};

#[derive(Clone, Default)]
struct TestClock(Rc<Cell<u32>>);

impl TestClock {
    fn advance(&self, ms: u32) {
        self.0.set(self.0.get() + ms);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u32 {
        self.0.get()
    }
}

#[derive(Clone, Default)]
struct BusLog(Rc<RefCell<Vec<CanFrame>>>);

impl BusLog {
    fn codes(&self) -> Vec<ResponseCode> {
        self.0
            .borrow()
            .iter()
            .map(|f| ResponseCode::from_byte(f.data[0]).unwrap())
            .collect()
    }

    fn last_code(&self) -> ResponseCode {
        *self.codes().last().expect("no response emitted")
    }

    /// Line indices carried by every SEND_LINE response, in order.
    fn requested_lines(&self) -> Vec<u16> {
        self.0
            .borrow()
            .iter()
            .filter(|f| f.data[0] == ResponseCode::SendLine as u8)
            .map(|f| u16::from_le_bytes([f.data[1], f.data[2]]))
            .collect()
    }
}

impl CanTx for BusLog {
    fn send(&mut self, frame: &CanFrame) {
        self.0.borrow_mut().push(*frame);
    }
}

/// Flash-backed staging window covering the configured region, observable
/// from the outside through the shared memory image.
#[derive(Clone)]
struct FakeFlash(Rc<RefCell<Vec<u8>>>);

impl Default for FakeFlash {
    fn default() -> Self {
        Self(Rc::new(RefCell::new(vec![PAD; STAGING_SIZE as usize])))
    }
}

impl Staging for FakeFlash {
    fn in_flash(&self, _addr: u32) -> bool {
        true
    }

    fn write_block(&mut self, addr: u32, data: &[u8]) -> Result<(), FlashError> {
        let offset = (addr - consts::STAGING_BASE_ADDR) as usize;
        let mut mem = self.0.borrow_mut();
        if offset + data.len() > mem.len() {
            return Err(FlashError);
        }
        mem[offset..offset + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn copy(&mut self, addr: u32, data: &[u8]) {
        self.write_block(addr, data).unwrap();
    }
}

struct Harness {
    clock: TestClock,
    bus: BusLog,
    flash: FakeFlash,
    updater: HexTransfer<TestClock, BusLog, FakeFlash>,
}

impl Harness {
    fn new() -> Self {
        let clock = TestClock::default();
        let bus = BusLog::default();
        let flash = FakeFlash::default();
        let updater = HexTransfer::new(clock.clone(), bus.clone(), flash.clone());
        Self {
            clock,
            bus,
            flash,
            updater,
        }
    }

    fn start(&mut self, line_count: u16, file_crc32: u32) {
        self.updater
            .handle_frame(&TransferInit::new(line_count, file_crc32).pack());
        self.updater.tick();
        assert_eq!(self.bus.last_code(), ResponseCode::SendLine);
    }

    /// Deliver all segments of one line, then tick once to finalise it.
    fn send_line(&mut self, line_num: u16, ascii: &[u8]) {
        for frame in segment_frames(line_num, ascii) {
            self.updater.handle_frame(&frame);
        }
        self.updater.tick();
    }

    fn staged(&self, offset: usize, len: usize) -> Vec<u8> {
        self.flash.0.borrow()[offset..offset + len].to_vec()
    }
}

/// Split a line into the 8-byte segment frames a transmitter would send.
fn segment_frames(line_num: u16, ascii: &[u8]) -> Vec<[u8; FRAME_LEN]> {
    let total = ascii.len().div_ceil(HEX_SEGMENT_SIZE) as u8;
    ascii
        .chunks(HEX_SEGMENT_SIZE)
        .enumerate()
        .map(|(i, chunk)| {
            let mut payload = [PAD; HEX_SEGMENT_SIZE];
            payload[..chunk.len()].copy_from_slice(chunk);
            TransferSegment {
                line_num,
                segment_index: i as u8,
                segment_total: total,
                payload,
            }
            .pack()
        })
        .collect()
}

/// The CRC32 the transmitter announces: all lines' ASCII bytes, in order.
fn file_crc(lines: &[&[u8]]) -> u32 {
    let mut digest = CRC32.digest();
    for line in lines {
        digest.update(line);
    }
    digest.finalize()
}

const DATA_LINE_1: &[u8] = b":10010000214601360121470136007EFE09D2190140";
const DATA_LINE_2: &[u8] = b":100110002146017E17C20001FF5F16002148011928";
const EOF_LINE: &[u8] = b":00000001FF";

#[test]
fn minimal_transfer_completes() {
    let mut h = Harness::new();
    h.start(1, file_crc(&[EOF_LINE]));
    h.send_line(0, EOF_LINE);
    assert_eq!(h.bus.last_code(), ResponseCode::SendLine);

    h.updater.tick();
    assert_eq!(h.bus.last_code(), ResponseCode::TransferComplete);
    assert!(h.updater.is_file_transfer_complete());
    assert!(!h.updater.is_transfer_in_progress());
}

#[test]
fn future_line_segment_is_dropped_and_retried() {
    let mut h = Harness::new();
    h.start(1, file_crc(&[EOF_LINE]));

    // Segment for line 1 while line 0 is expected: dropped on the floor.
    h.updater.handle_frame(&segment_frames(1, EOF_LINE)[0]);
    h.updater.tick();
    assert_eq!(h.bus.codes(), [ResponseCode::SendLine]);

    // Five seconds of silence later the current line is re-requested.
    h.clock.advance(SEGMENT_TIMEOUT_MS);
    h.updater.tick();
    assert_eq!(
        h.bus.codes(),
        [ResponseCode::SendLine, ResponseCode::SendLine]
    );
    assert_eq!(h.bus.requested_lines(), [0, 0]);
}

#[test]
fn data_record_is_staged_at_its_absolute_address() {
    let mut h = Harness::new();
    h.start(2, file_crc(&[DATA_LINE_1, EOF_LINE]));
    h.send_line(0, DATA_LINE_1);

    assert_eq!(h.bus.requested_lines(), [0, 1]);
    assert_eq!(
        h.staged(0x0100, 16),
        [
            0x21, 0x46, 0x01, 0x36, 0x01, 0x21, 0x47, 0x01, 0x36, 0x00, 0x7E, 0xFE,
            0x09, 0xD2, 0x19, 0x01
        ]
    );
    assert_eq!(h.updater.image_bounds(), Some((0x0100, 0x0110)));
}

#[test]
fn extended_segment_address_offsets_following_data() {
    let mut h = Harness::new();
    let lines: [&[u8]; 3] = [b":020000021200EA", DATA_LINE_1, EOF_LINE];
    h.start(3, file_crc(&lines));
    h.send_line(0, lines[0]);
    h.send_line(1, lines[1]);

    // Base 0x1200 << 4 plus the record's own 0x0100.
    assert_eq!(h.staged(0x12100, 2), [0x21, 0x46]);

    h.send_line(2, lines[2]);
    h.updater.tick();
    assert_eq!(h.bus.last_code(), ResponseCode::TransferComplete);
}

#[test]
fn second_init_restarts_from_line_zero() {
    let mut h = Harness::new();
    h.start(2, file_crc(&[DATA_LINE_1, EOF_LINE]));
    h.send_line(0, DATA_LINE_1);
    assert_eq!(h.bus.requested_lines(), [0, 1]);

    // A fresh init throws the first transfer away mid-flight.
    h.start(1, file_crc(&[EOF_LINE]));
    assert_eq!(h.bus.requested_lines(), [0, 1, 0]);

    h.send_line(0, EOF_LINE);
    h.updater.tick();
    assert_eq!(h.bus.last_code(), ResponseCode::TransferComplete);
}

#[test]
fn fifteen_seconds_of_silence_aborts() {
    let mut h = Harness::new();
    h.start(2, 0);
    h.clock.advance(TRANSFER_TIMEOUT_MS + 1);
    h.updater.tick();
    assert_eq!(h.bus.last_code(), ResponseCode::Error);
    assert!(!h.updater.is_transfer_in_progress());
    assert!(!h.updater.is_file_transfer_complete());

    // Back to idle: further ticks stay silent.
    let sent = h.bus.0.borrow().len();
    h.updater.tick();
    assert_eq!(h.bus.0.borrow().len(), sent);
}

#[test]
fn eof_before_the_final_line_is_rejected() {
    let mut h = Harness::new();
    h.start(2, file_crc(&[DATA_LINE_1, EOF_LINE]));
    h.send_line(0, EOF_LINE);

    // The line did not advance and the transfer is still alive.
    assert_eq!(h.bus.requested_lines(), [0, 0]);
    assert!(h.updater.is_transfer_in_progress());

    // The transmitter corrects itself and the transfer still completes.
    h.send_line(0, DATA_LINE_1);
    h.send_line(1, EOF_LINE);
    h.updater.tick();
    assert_eq!(h.bus.last_code(), ResponseCode::TransferComplete);
}

#[test]
fn file_crc_mismatch_ends_in_error() {
    let mut h = Harness::new();
    h.start(1, 0xDEAD_BEEF);
    h.send_line(0, EOF_LINE);
    assert_eq!(h.bus.last_code(), ResponseCode::SendLine);

    h.updater.tick();
    assert_eq!(h.bus.last_code(), ResponseCode::Error);
    assert!(!h.updater.is_file_transfer_complete());
    assert!(!h.updater.is_transfer_in_progress());
}

#[test]
fn out_of_order_duplicated_segments_still_reconstruct_the_image() {
    let mut h = Harness::new();
    let lines: [&[u8]; 3] = [DATA_LINE_1, DATA_LINE_2, EOF_LINE];
    h.start(3, file_crc(&lines));

    for (line_num, ascii) in lines.iter().enumerate() {
        let frames = segment_frames(line_num as u16, ascii);
        // Deliver backwards, then replay the whole line once more.
        for frame in frames.iter().rev().chain(frames.iter()) {
            h.updater.handle_frame(frame);
        }
        h.updater.tick();
    }
    h.updater.tick();

    assert_eq!(h.bus.last_code(), ResponseCode::TransferComplete);
    assert!(h.updater.is_file_transfer_complete());

    // 32 contiguous bytes from the two data records.
    let image = h.staged(0x0100, 32);
    assert_eq!(image[0], 0x21);
    assert_eq!(image[16], 0x21);
    assert_eq!(image[17], 0x46);
    assert_eq!(image[31], 0x19);
}

#[test]
fn requested_line_indices_never_decrease_within_a_transfer() {
    let mut h = Harness::new();
    let lines: [&[u8]; 3] = [DATA_LINE_1, DATA_LINE_2, EOF_LINE];
    h.start(3, file_crc(&lines));
    for (line_num, ascii) in lines.iter().enumerate() {
        h.send_line(line_num as u16, ascii);
    }
    h.updater.tick();

    let requested = h.bus.requested_lines();
    assert!(requested.windows(2).all(|w| w[0] <= w[1]), "{requested:?}");
}

#[test]
fn abort_resets_to_idle() {
    let mut h = Harness::new();
    h.start(2, 0);
    h.updater.abort();
    assert!(!h.updater.is_transfer_in_progress());

    let sent = h.bus.0.borrow().len();
    h.updater.tick();
    assert_eq!(h.bus.0.borrow().len(), sent);
}
