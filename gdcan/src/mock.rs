//! Scriptable peripheral used by the unit tests.

use std::collections::VecDeque;

use fugit::HertzU32;
use gdcan_core::{
    BitTiming, ErrorStatus, FilterBank, Frame, IrqKind, Peripheral, Pin, PinMode, PinRemap,
    WorkingMode,
};

pub struct MockPeripheral {
    pub clock_hz: u32,
    pub clock_on: bool,
    pub mailboxes_free: usize,
    pub sent: Vec<Frame>,
    pub rx_fifo: VecDeque<Frame>,
    pub irq_rx: bool,
    pub irq_tx: bool,
    /// Every enable/disable call in order, for asserting masking sequences.
    pub irq_log: Vec<(IrqKind, bool)>,
    pub vector_rx: Option<u8>,
    pub vector_tx: Option<u8>,
    pub filter_log: Vec<FilterBank>,
    pub active_banks: u32,
    pub split_bank: Option<u8>,
    pub mode: WorkingMode,
    pub refuse_init: bool,
    pub refuse_mode: bool,
    pub init_count: usize,
    pub deinit_count: usize,
    pub timing: Option<BitTiming>,
    pub pin_modes: Vec<(Pin, PinMode)>,
    pub pin_levels: Vec<(Pin, bool)>,
    pub remap_log: Vec<(PinRemap, bool)>,
    pub error: ErrorStatus,
}

impl MockPeripheral {
    pub fn new(clock_hz: u32) -> Self {
        Self {
            clock_hz,
            clock_on: false,
            mailboxes_free: 3,
            sent: Vec::new(),
            rx_fifo: VecDeque::new(),
            irq_rx: false,
            irq_tx: false,
            irq_log: Vec::new(),
            vector_rx: None,
            vector_tx: None,
            filter_log: Vec::new(),
            active_banks: 0,
            split_bank: None,
            mode: WorkingMode::Sleep,
            refuse_init: false,
            refuse_mode: false,
            init_count: 0,
            deinit_count: 0,
            timing: None,
            pin_modes: Vec::new(),
            pin_levels: Vec::new(),
            remap_log: Vec::new(),
            error: ErrorStatus::default(),
        }
    }

    /// Last state a bank was programmed with, if any.
    pub fn programmed(&self, bank: u8) -> Option<&FilterBank> {
        self.filter_log.iter().rev().find(|f| f.bank == bank)
    }

    pub fn bank_active(&self, bank: u8) -> bool {
        self.active_banks & (1 << bank) != 0
    }
}

unsafe impl Peripheral for MockPeripheral {
    fn clock(&self) -> HertzU32 {
        HertzU32::from_raw(self.clock_hz)
    }

    fn enable_clock(&mut self) {
        self.clock_on = true;
    }

    fn disable_clock(&mut self) {
        self.clock_on = false;
    }

    fn init(&mut self, timing: &BitTiming, _auto_retransmit: bool) -> bool {
        self.init_count += 1;
        if self.refuse_init {
            return false;
        }
        self.timing = Some(*timing);
        self.mode = WorkingMode::Normal;
        true
    }

    fn deinit(&mut self) {
        self.deinit_count += 1;
        self.timing = None;
        self.mode = WorkingMode::Sleep;
    }

    fn set_mode(&mut self, mode: WorkingMode) -> bool {
        if self.refuse_mode {
            return false;
        }
        self.mode = mode;
        true
    }

    fn set_timing(&mut self, timing: &BitTiming) {
        self.timing = Some(*timing);
    }

    fn transmit(&mut self, frame: &Frame) -> nb::Result<(), core::convert::Infallible> {
        if self.mailboxes_free == 0 {
            return Err(nb::Error::WouldBlock);
        }
        self.mailboxes_free -= 1;
        self.sent.push(*frame);
        Ok(())
    }

    fn receive(&mut self) -> Option<Frame> {
        self.rx_fifo.pop_front()
    }

    fn rx_pending(&self) -> usize {
        self.rx_fifo.len()
    }

    fn free_mailboxes(&self) -> usize {
        self.mailboxes_free
    }

    fn enable_interrupt(&mut self, irq: IrqKind) {
        self.irq_log.push((irq, true));
        match irq {
            IrqKind::RxFifoNotEmpty => self.irq_rx = true,
            IrqKind::TxMailboxEmpty => self.irq_tx = true,
        }
    }

    fn disable_interrupt(&mut self, irq: IrqKind) {
        self.irq_log.push((irq, false));
        match irq {
            IrqKind::RxFifoNotEmpty => self.irq_rx = false,
            IrqKind::TxMailboxEmpty => self.irq_tx = false,
        }
    }

    fn enable_vector(&mut self, irq: IrqKind, priority: u8) {
        match irq {
            IrqKind::RxFifoNotEmpty => self.vector_rx = Some(priority),
            IrqKind::TxMailboxEmpty => self.vector_tx = Some(priority),
        }
    }

    fn disable_vector(&mut self, irq: IrqKind) {
        match irq {
            IrqKind::RxFifoNotEmpty => self.vector_rx = None,
            IrqKind::TxMailboxEmpty => self.vector_tx = None,
        }
    }

    fn apply_filter(&mut self, bank: &FilterBank) {
        if bank.enabled {
            self.active_banks |= 1 << bank.bank;
        } else {
            self.active_banks &= !(1 << bank.bank);
        }
        self.filter_log.push(*bank);
    }

    fn set_filter_enabled(&mut self, bank: u8, enabled: bool) {
        if enabled {
            self.active_banks |= 1 << bank;
        } else {
            self.active_banks &= !(1 << bank);
        }
    }

    fn set_split_bank(&mut self, bank: u8) {
        self.split_bank = Some(bank);
    }

    fn error_status(&self) -> ErrorStatus {
        self.error
    }

    fn pin_configure(&mut self, pin: Pin, mode: PinMode) {
        self.pin_modes.push((pin, mode));
    }

    fn pin_write(&mut self, pin: Pin, high: bool) {
        self.pin_levels.push((pin, high));
    }

    fn apply_pin_remap(&mut self, remap: PinRemap, enable: bool) {
        self.remap_log.push((remap, enable));
    }
}
