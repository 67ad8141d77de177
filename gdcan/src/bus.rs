//! Controller instance.
//!
//! [`Can`] owns one physical CAN block: its queues, its share of the filter
//! array and the public transmit/receive API. Creating one claims the block
//! in the [`Registry`] and splits the caller provided [`CanMemory`] into the
//! thread side (kept here) and the interrupt side (returned as an
//! [`IrqBridge`] to be invoked from the two interrupt vectors).
//!
//! ```ignore
//! static REGISTRY: Registry = Registry::new();
//! static mut MEMORY: CanMemory<64, 16> = CanMemory::new();
//!
//! let (mut can, bridge) = Can::new(
//!     DeviceId::Can0,
//!     &REGISTRY,
//!     hw,
//!     isr_hw,
//!     unsafe { &mut MEMORY },
//! )?;
//! can.begin(bit_rate::K500)?;
//! can.allow_receive_all(IdMatch::Any)?;
//! ```

use core::sync::atomic::{AtomicBool, Ordering};

use bitfield::bitfield;
use fugit::HertzU32;
use gdcan_core::{
    ErrorStatus, FilterBank, Frame, IrqKind, Peripheral, Pin, PinMode, PinRemap, WorkingMode,
};

use crate::config::{self, BitTimingError, SolvedTiming};
use crate::device::{
    Block, Descriptor, DeviceId, CAN2_MAX_BANK, DEFAULT_SPLIT_BANK, SHARED_MAX_BANK,
};
use crate::filter::{
    self, EncodedFilter, ExtendedFilter, FilterError, IdMatch, StandardFilter,
};
use crate::interrupt::IrqBridge;
use crate::registry::{Claim, Registry};
use crate::ring::{Consumer, Producer, QueueStorage};

/// Errors from [`Can::new`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OpenError {
    /// Another instance already owns this block
    AlreadyClaimed,
    /// Receive queue capacity is not zero or a power of two in `4..=512`
    InvalidRxCapacity,
    /// Transmit queue capacity is not zero or a power of two in `4..=512`
    InvalidTxCapacity,
}

/// Errors from configuration calls.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The controller has not been started yet
    NotRunning,
    /// Bit timing could not be solved
    BitTiming(BitTimingError),
    /// The controller did not acknowledge initialization
    ControllerInit,
    /// A working mode transition timed out
    ModeTransition,
    /// No transceiver standby pin has been attached
    NoTransceiverPin,
}

impl From<BitTimingError> for ConfigError {
    fn from(err: BitTimingError) -> Self {
        ConfigError::BitTiming(err)
    }
}

/// Errors from [`Can::write`].
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxError {
    /// The controller has not been started yet
    NotRunning,
    /// All mailboxes are busy and the transmit queue is full (or absent)
    QueueFull,
}

/// Bit-level protocol errors reported by the controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Bit stuffing violation
    Stuff,
    /// Form error in a fixed format field
    Format,
    /// Missing acknowledgement
    Ack,
    /// Recessive bit could not be sent
    BitRecessive,
    /// Dominant bit could not be sent
    BitDominant,
    /// CRC mismatch
    Crc,
    /// Error set by software
    Software,
}

/// Bus health degradation levels, worst wins.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusHealth {
    /// An error counter passed the warning threshold
    Warning,
    /// The controller is error passive
    Passive,
    /// The controller went bus-off
    BusOff,
}

bitfield! {
    /// Compact error report from [`Can::error_flags`].
    ///
    /// Bits 0..=2 carry the last protocol error code, bits 3..=4 the bus
    /// health tier. All zero means no error condition is present.
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct ErrorFlags(u8);
    impl Debug;
    /// Raw protocol error code
    pub u8, protocol_code, set_protocol_code: 2, 0;
    /// Raw health tier, 1 warning, 2 passive, 3 bus-off
    pub u8, health_code, set_health_code: 4, 3;
}

impl ErrorFlags {
    /// True when no error is flagged.
    pub fn is_clear(&self) -> bool {
        self.0 == 0
    }

    /// Decoded protocol error, if one was recorded.
    pub fn protocol_error(&self) -> Option<ProtocolError> {
        match self.protocol_code() {
            1 => Some(ProtocolError::Stuff),
            2 => Some(ProtocolError::Format),
            3 => Some(ProtocolError::Ack),
            4 => Some(ProtocolError::BitRecessive),
            5 => Some(ProtocolError::BitDominant),
            6 => Some(ProtocolError::Crc),
            7 => Some(ProtocolError::Software),
            _ => None,
        }
    }

    /// Decoded health tier, if the bus is degraded.
    pub fn health(&self) -> Option<BusHealth> {
        match self.health_code() {
            1 => Some(BusHealth::Warning),
            2 => Some(BusHealth::Passive),
            3 => Some(BusHealth::BusOff),
            _ => None,
        }
    }

    fn from_status(status: ErrorStatus) -> Self {
        let mut flags = ErrorFlags(0);
        if status.is_clear() {
            return flags;
        }
        flags.set_protocol_code(status.protocol_code & 0x7);
        let health = if status.bus_off {
            3
        } else if status.passive {
            2
        } else {
            1
        };
        flags.set_health_code(health);
        flags
    }
}

/// Statically allocatable backing store for one controller.
///
/// Holds the receive and transmit queues plus the flag mirroring the
/// receive interrupt mask, which both sides of the driver consult.
pub struct CanMemory<const RX: usize, const TX: usize> {
    rx: QueueStorage<RX>,
    tx: QueueStorage<TX>,
    rx_irq_enabled: AtomicBool,
}

impl<const RX: usize, const TX: usize> CanMemory<RX, TX> {
    /// Creates empty storage.
    pub const fn new() -> Self {
        Self {
            rx: QueueStorage::new(),
            tx: QueueStorage::new(),
            rx_irq_enabled: AtomicBool::new(false),
        }
    }
}

impl<const RX: usize, const TX: usize> Default for CanMemory<RX, TX> {
    fn default() -> Self {
        Self::new()
    }
}

/// A started or startable CAN controller.
pub struct Can<'a, P: Peripheral> {
    hw: P,
    device: DeviceId,
    desc: Descriptor,
    claim: Claim<'a>,
    tx: Producer<'a>,
    rx: Consumer<'a>,
    rx_irq_enabled: &'a AtomicBool,
    configured_banks: u32,
    first_bank: u8,
    transceiver_pin: Option<Pin>,
    running: bool,
}

impl<'a, P: Peripheral> Can<'a, P> {
    /// Claims `device` and splits `memory` between this handle and the
    /// returned interrupt bridge.
    ///
    /// `hw` is the thread side peripheral token, `isr_hw` the interrupt
    /// side token for the same block; the bridge keeps the latter. The
    /// controller is not touched yet; call [`Can::begin`] to start it.
    pub fn new<const RX: usize, const TX: usize>(
        device: DeviceId,
        registry: &'a Registry,
        hw: P,
        isr_hw: P,
        memory: &'a mut CanMemory<RX, TX>,
    ) -> Result<(Self, IrqBridge<'a, P>), OpenError> {
        if !QueueStorage::<RX>::valid_capacity() {
            return Err(OpenError::InvalidRxCapacity);
        }
        if !QueueStorage::<TX>::valid_capacity() {
            return Err(OpenError::InvalidTxCapacity);
        }
        let desc = device.descriptor();
        let mut claim = registry
            .claim(desc.block)
            .ok_or(OpenError::AlreadyClaimed)?;
        let first_bank = if desc.block == Block::Can1 {
            claim.take_split(DEFAULT_SPLIT_BANK);
            DEFAULT_SPLIT_BANK
        } else {
            0
        };
        let (rx_producer, rx_consumer) = memory.rx.split();
        let (tx_producer, tx_consumer) = memory.tx.split();
        let rx_irq_enabled = &memory.rx_irq_enabled;
        rx_irq_enabled.store(false, Ordering::Release);
        let can = Can {
            hw,
            device,
            desc,
            claim,
            tx: tx_producer,
            rx: rx_consumer,
            rx_irq_enabled,
            configured_banks: 0,
            first_bank,
            transceiver_pin: None,
            running: false,
        };
        let bridge = IrqBridge::new(isr_hw, rx_producer, tx_consumer, rx_irq_enabled);
        Ok((can, bridge))
    }

    /// The device identity this instance was created with.
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// Whether [`Can::begin`] has completed successfully.
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Brings the controller onto the bus at `bit_rate`.
    ///
    /// Configures pins and interrupt vectors, solves and applies bit
    /// timing, arms the receive interrupt and resets all owned filter
    /// banks to accept nothing. On any failure the instance stays stopped
    /// and can be retried.
    pub fn begin(&mut self, bit_rate: HertzU32) -> Result<SolvedTiming, ConfigError> {
        let desc = self.desc;
        self.hw.enable_clock();
        self.hw.pin_configure(desc.rx, PinMode::InputPullUp);
        self.hw.pin_configure(desc.tx, PinMode::AltPushPull);
        if desc.remap != PinRemap::None {
            self.hw.apply_pin_remap(desc.remap, true);
        }
        self.hw
            .enable_vector(IrqKind::RxFifoNotEmpty, desc.irq_priority);
        self.hw
            .enable_vector(IrqKind::TxMailboxEmpty, desc.irq_priority);

        let solved = config::solve(bit_rate, self.hw.clock())?;
        self.hw.deinit();
        if !self.hw.init(&solved.timing, true) {
            return Err(ConfigError::ControllerInit);
        }
        // The transmit interrupt stays off until a frame is queued; arming
        // it with an empty queue retriggers the handler endlessly.
        self.set_irq(IrqKind::RxFifoNotEmpty, true);
        if desc.block == Block::Can1 {
            self.hw.set_split_bank(self.first_bank);
        }
        self.running = true;
        self.reset_filters();
        #[cfg(feature = "defmt")]
        defmt::debug!(
            "can started at {} bit/s, sample point {}/1000",
            solved.bit_rate.to_Hz(),
            solved.sample_point_permille
        );
        Ok(solved)
    }

    /// Reprograms the bit rate on a running controller.
    ///
    /// The controller passes through initialization mode; if either mode
    /// transition fails the timing registers must be assumed stale and the
    /// call should be retried.
    pub fn set_bit_rate(&mut self, bit_rate: HertzU32) -> Result<SolvedTiming, ConfigError> {
        if !self.running {
            return Err(ConfigError::NotRunning);
        }
        let mut outcome = if self.hw.set_mode(WorkingMode::Initialize) {
            match config::solve(bit_rate, self.hw.clock()) {
                Ok(solved) => {
                    self.hw.set_timing(&solved.timing);
                    Ok(solved)
                }
                Err(err) => Err(ConfigError::BitTiming(err)),
            }
        } else {
            Err(ConfigError::ModeTransition)
        };
        if !self.hw.set_mode(WorkingMode::Normal) {
            outcome = Err(ConfigError::ModeTransition);
        }
        outcome
    }

    /// Requests a working mode transition.
    pub fn set_working_mode(&mut self, mode: WorkingMode) -> Result<(), ConfigError> {
        if !self.running {
            return Err(ConfigError::NotRunning);
        }
        if self.hw.set_mode(mode) {
            Ok(())
        } else {
            Err(ConfigError::ModeTransition)
        }
    }

    /// Sends a frame, or queues it when no mailbox is free.
    ///
    /// With an empty transmit queue the frame goes straight to a mailbox
    /// and the transmit interrupt stays off. Otherwise the frame is queued
    /// behind its predecessors and the interrupt is armed to drain the
    /// queue as mailboxes free up.
    pub fn write(&mut self, frame: &Frame) -> Result<(), TxError> {
        if !self.running {
            return Err(TxError::NotRunning);
        }
        if self.tx.is_empty() && self.hw.transmit(frame).is_ok() {
            return Ok(());
        }
        if self.tx.push(*frame) {
            self.set_irq(IrqKind::TxMailboxEmpty, true);
            Ok(())
        } else {
            Err(TxError::QueueFull)
        }
    }

    /// Free transmit capacity: queue slots plus free mailboxes.
    pub fn available_for_write(&self) -> usize {
        self.tx.free() + self.hw.free_mailboxes()
    }

    /// Frames ready to read: queued plus still sitting in the hardware FIFO.
    pub fn available(&self) -> usize {
        self.rx.count() + self.hw.rx_pending()
    }

    /// Removes and returns the oldest received frame.
    ///
    /// Always leaves the receive interrupt enabled, re-arming it after a
    /// handler had parked it on a full queue.
    pub fn read(&mut self) -> Option<Frame> {
        if !self.running {
            return None;
        }
        self.set_irq(IrqKind::RxFifoNotEmpty, false);
        let frame = self.rx.read();
        self.set_irq(IrqKind::RxFifoNotEmpty, true);
        frame
    }

    /// Copies the oldest received frame without removing it.
    ///
    /// Unlike [`Can::read`] this restores the previous interrupt state, so
    /// a parked receive interrupt stays parked.
    pub fn peek(&mut self) -> Option<Frame> {
        if !self.running {
            return None;
        }
        let was_enabled = self.rx_irq_enabled.load(Ordering::Acquire);
        if was_enabled {
            self.set_irq(IrqKind::RxFifoNotEmpty, false);
        }
        let frame = self.rx.peek();
        if was_enabled {
            self.set_irq(IrqKind::RxFifoNotEmpty, true);
        }
        frame
    }

    /// Reads the controller error state.
    pub fn error_flags(&self) -> ErrorFlags {
        if !self.running {
            return ErrorFlags(0);
        }
        ErrorFlags::from_status(self.hw.error_status())
    }

    /// Resets every owned filter bank to accept nothing.
    pub fn clear_all_filters(&mut self) -> Result<(), FilterError> {
        if !self.running {
            return Err(FilterError::NotRunning);
        }
        self.reset_filters();
        Ok(())
    }

    /// Programs a standard identifier filter into `bank` and activates it.
    pub fn set_standard_filter(
        &mut self,
        bank: u8,
        filter: StandardFilter,
    ) -> Result<(), FilterError> {
        if !self.running {
            return Err(FilterError::NotRunning);
        }
        let encoded = filter.encode()?;
        self.program_bank(bank, encoded, true)
    }

    /// Programs an extended identifier filter into `bank` and activates it.
    pub fn set_extended_filter(
        &mut self,
        bank: u8,
        filter: ExtendedFilter,
    ) -> Result<(), FilterError> {
        if !self.running {
            return Err(FilterError::NotRunning);
        }
        let encoded = filter.encode()?;
        self.program_bank(bank, encoded, true)
    }

    /// Opens the first owned bank wide for the requested identifier type.
    pub fn allow_receive_all(&mut self, id_match: IdMatch) -> Result<(), FilterError> {
        if !self.running {
            return Err(FilterError::NotRunning);
        }
        let bank = self.first_bank;
        self.program_bank(bank, filter::accept_all(id_match), true)
    }

    /// Reactivates a previously programmed bank without resending its
    /// pattern and mask.
    pub fn enable_filter(&mut self, bank: u8) -> Result<(), FilterError> {
        if !self.running {
            return Err(FilterError::NotRunning);
        }
        self.bank_in_range(bank)?;
        if self.configured_banks & (1 << bank) == 0 {
            return Err(FilterError::BankNotConfigured { bank });
        }
        self.hw.set_filter_enabled(bank, true);
        Ok(())
    }

    /// Takes a bank out of filtering, keeping its configuration.
    pub fn disable_filter(&mut self, bank: u8) -> Result<(), FilterError> {
        if !self.running {
            return Err(FilterError::NotRunning);
        }
        self.bank_in_range(bank)?;
        self.hw.set_filter_enabled(bank, false);
        Ok(())
    }

    /// Moves the split point of the shared filter array.
    ///
    /// Only the CAN1 instance may do this; banks below `bank` fall to CAN0,
    /// `bank` and above belong to CAN1.
    pub fn set_split_bank(&mut self, bank: u8) -> Result<(), FilterError> {
        if self.desc.block != Block::Can1 {
            return Err(FilterError::NotSplitOwner);
        }
        if bank > SHARED_MAX_BANK {
            return Err(FilterError::BankOutOfRange { bank });
        }
        self.hw.set_split_bank(bank);
        self.claim.take_split(bank);
        self.first_bank = bank;
        Ok(())
    }

    /// First filter bank owned by this instance.
    pub fn first_bank(&self) -> u8 {
        self.first_bank
    }

    /// Last filter bank owned by this instance.
    pub fn max_bank(&self) -> u8 {
        match self.desc.block {
            Block::Can0 => self
                .claim
                .registry()
                .split_bank()
                .map(|split| split - 1)
                .unwrap_or(SHARED_MAX_BANK),
            Block::Can1 => SHARED_MAX_BANK,
            Block::Can2 => CAN2_MAX_BANK,
        }
    }

    /// Registers an output pin driving the transceiver standby input.
    ///
    /// The pin is driven high (standby) immediately.
    pub fn attach_transceiver_standby_pin(&mut self, pin: Pin) {
        self.hw.pin_write(pin, true);
        self.hw.pin_configure(pin, PinMode::OutputPushPull);
        self.transceiver_pin = Some(pin);
    }

    /// Wakes or parks the transceiver through the attached standby pin.
    pub fn set_transceiver_active(&mut self, active: bool) -> Result<(), ConfigError> {
        if !self.running {
            return Err(ConfigError::NotRunning);
        }
        let pin = self.transceiver_pin.ok_or(ConfigError::NoTransceiverPin)?;
        self.hw.pin_write(pin, !active);
        Ok(())
    }

    /// Stops the controller, returns the hardware to reset state and
    /// releases the claim on the block.
    pub fn release(mut self) -> P {
        if let Some(pin) = self.transceiver_pin {
            self.hw.pin_write(pin, true);
            self.hw.pin_configure(pin, PinMode::InputFloating);
        }
        self.hw.disable_interrupt(IrqKind::RxFifoNotEmpty);
        self.rx_irq_enabled.store(false, Ordering::Release);
        self.hw.disable_interrupt(IrqKind::TxMailboxEmpty);
        self.hw.disable_vector(IrqKind::RxFifoNotEmpty);
        self.hw.disable_vector(IrqKind::TxMailboxEmpty);
        self.hw.deinit();
        if self.desc.remap != PinRemap::None {
            self.hw.apply_pin_remap(self.desc.remap, false);
        }
        self.hw.pin_configure(self.desc.rx, PinMode::InputFloating);
        self.hw.pin_configure(self.desc.tx, PinMode::InputFloating);
        self.hw.disable_clock();
        let Can { hw, claim, .. } = self;
        drop(claim);
        hw
    }

    fn set_irq(&mut self, irq: IrqKind, enabled: bool) {
        if enabled {
            self.hw.enable_interrupt(irq);
        } else {
            self.hw.disable_interrupt(irq);
        }
        if irq == IrqKind::RxFifoNotEmpty {
            self.rx_irq_enabled.store(enabled, Ordering::Release);
        }
    }

    fn bank_in_range(&self, bank: u8) -> Result<(), FilterError> {
        if bank >= self.first_bank && bank <= self.max_bank() {
            Ok(())
        } else {
            Err(FilterError::BankOutOfRange { bank })
        }
    }

    fn program_bank(
        &mut self,
        bank: u8,
        encoded: EncodedFilter,
        enabled: bool,
    ) -> Result<(), FilterError> {
        self.bank_in_range(bank)?;
        self.configured_banks |= 1 << bank;
        self.hw.apply_filter(&FilterBank {
            bank,
            mode: encoded.mode,
            scale: encoded.scale,
            id: encoded.id,
            mask: encoded.mask,
            enabled,
        });
        Ok(())
    }

    fn reset_filters(&mut self) {
        for bank in self.first_bank..=self.max_bank() {
            // Cannot fail, the loop stays inside the owned range.
            let _ = self.program_bank(bank, filter::accept_none(), false);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::bit_rate;
    use crate::filter::FrameFilter;
    use crate::mock::MockPeripheral;
    use embedded_can::StandardId;
    use gdcan_core::{BitTiming, Port};
    use fugit::RateExtU32;

    fn frame(tag: u8) -> Frame {
        Frame::new_data(StandardId::new(tag as u16).unwrap(), &[tag]).unwrap()
    }

    fn started<'a, const RX: usize, const TX: usize>(
        device: DeviceId,
        registry: &'a Registry,
        memory: &'a mut CanMemory<RX, TX>,
    ) -> (Can<'a, MockPeripheral>, IrqBridge<'a, MockPeripheral>) {
        let hw = MockPeripheral::new(72_000_000);
        let isr_hw = MockPeripheral::new(72_000_000);
        let (mut can, bridge) = Can::new(device, registry, hw, isr_hw, memory).unwrap();
        can.begin(bit_rate::K500).unwrap();
        (can, bridge)
    }

    #[test]
    fn claiming_a_block_twice_fails() {
        let registry = Registry::new();
        let mut first_memory = CanMemory::<8, 0>::new();
        let mut second_memory = CanMemory::<8, 0>::new();
        let (_can, _bridge) = Can::new(
            DeviceId::Can0,
            &registry,
            MockPeripheral::new(72_000_000),
            MockPeripheral::new(72_000_000),
            &mut first_memory,
        )
        .unwrap();
        let result = Can::new(
            DeviceId::Can0Remap1,
            &registry,
            MockPeripheral::new(72_000_000),
            MockPeripheral::new(72_000_000),
            &mut second_memory,
        );
        assert!(matches!(result, Err(OpenError::AlreadyClaimed)));
    }

    #[test]
    fn begin_configures_the_block() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        assert!(can.is_running());
        assert!(can.hw.clock_on);
        assert_eq!(can.hw.deinit_count, 1);
        assert_eq!(
            can.hw.timing,
            Some(BitTiming {
                prescaler: 9,
                seg1: 13,
                seg2: 2,
                sjw: 1,
            })
        );
        assert_eq!(can.hw.vector_rx, Some(0));
        assert_eq!(can.hw.vector_tx, Some(0));
        // Receive interrupt armed, transmit interrupt held back until a
        // frame is queued.
        assert!(can.hw.irq_rx);
        assert!(!can.hw.irq_tx);
        // Every owned bank was reset to an inactive accept-nothing state.
        assert_eq!(can.hw.filter_log.len(), 28);
        assert_eq!(can.hw.active_banks, 0);
    }

    #[test]
    fn begin_failure_leaves_the_instance_stopped() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let mut hw = MockPeripheral::new(72_000_000);
        hw.refuse_init = true;
        let isr_hw = MockPeripheral::new(72_000_000);
        let (mut can, _bridge) =
            Can::new(DeviceId::Can0, &registry, hw, isr_hw, &mut memory).unwrap();
        assert_eq!(can.begin(bit_rate::K500), Err(ConfigError::ControllerInit));
        assert!(!can.is_running());
        assert_eq!(can.write(&frame(1)), Err(TxError::NotRunning));
        assert!(can.read().is_none());
    }

    #[test]
    fn write_goes_straight_to_a_mailbox_when_queue_is_empty() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.write(&frame(1)).unwrap();
        assert_eq!(can.hw.sent.len(), 1);
        assert!(!can.hw.irq_tx);
        // No transmit queue, so capacity is just the remaining mailboxes.
        assert_eq!(can.available_for_write(), 2);
    }

    #[test]
    fn write_queues_and_arms_the_interrupt_when_mailboxes_are_busy() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 8>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.hw.mailboxes_free = 0;
        can.write(&frame(1)).unwrap();
        assert!(can.hw.sent.is_empty());
        assert!(can.hw.irq_tx);
        assert_eq!(can.available_for_write(), 6);
    }

    #[test]
    fn write_fails_once_queue_and_mailboxes_are_exhausted() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 4>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.hw.mailboxes_free = 0;
        for tag in 0..3 {
            can.write(&frame(tag)).unwrap();
        }
        assert_eq!(can.write(&frame(3)), Err(TxError::QueueFull));
    }

    #[test]
    fn read_reenables_a_parked_receive_interrupt() {
        let registry = Registry::new();
        let mut memory = CanMemory::<4, 0>::new();
        let (mut can, mut bridge) = started(DeviceId::Can0, &registry, &mut memory);
        bridge.hw.irq_rx = true;
        for tag in 1..=4 {
            bridge.hw.rx_fifo.push_back(frame(tag));
        }
        for _ in 0..4 {
            bridge.rx_fifo_not_empty();
        }
        // Queue full after three frames, the fourth invocation parked the
        // interrupt.
        assert!(!bridge.hw.irq_rx);
        assert_eq!(can.available(), 3);

        assert_eq!(can.read().unwrap().data(), &[1]);
        assert!(can.hw.irq_rx);
        assert!(can.rx_irq_enabled.load(Ordering::Acquire));
    }

    #[test]
    fn read_masks_the_interrupt_before_touching_the_queue() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, mut bridge) = started(DeviceId::Can0, &registry, &mut memory);
        bridge.hw.rx_fifo.push_back(frame(9));
        bridge.rx_fifo_not_empty();

        can.hw.irq_log.clear();
        assert_eq!(can.read().unwrap().data(), &[9]);
        // The producer is masked out for the whole pop and unmasked after.
        assert_eq!(
            can.hw.irq_log,
            [
                (IrqKind::RxFifoNotEmpty, false),
                (IrqKind::RxFifoNotEmpty, true),
            ]
        );
    }

    #[test]
    fn peek_leaves_a_parked_interrupt_parked() {
        let registry = Registry::new();
        let mut memory = CanMemory::<4, 0>::new();
        let (mut can, mut bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.hw.irq_rx = false;
        can.rx_irq_enabled.store(false, Ordering::Release);
        bridge.hw.rx_fifo.push_back(frame(7));
        bridge.rx_fifo_not_empty();

        assert_eq!(can.peek().unwrap().data(), &[7]);
        assert!(!can.hw.irq_rx);
        assert!(!can.rx_irq_enabled.load(Ordering::Acquire));
        // The frame is still there.
        assert_eq!(can.available(), 1);
    }

    #[test]
    fn available_counts_queue_and_hardware_fifo() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, mut bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.hw.rx_fifo.push_back(frame(1));
        can.hw.rx_fifo.push_back(frame(2));
        bridge.hw.rx_fifo.push_back(frame(3));
        bridge.rx_fifo_not_empty();
        assert_eq!(can.available(), 3);
    }

    #[test]
    fn filter_programming_round_trips_through_the_hardware() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.set_standard_filter(
            2,
            StandardFilter::Classic {
                id: StandardId::new(0x123).unwrap(),
                mask: 0x7FF,
                frames: FrameFilter::Any,
            },
        )
        .unwrap();
        let bank = can.hw.programmed(2).unwrap();
        assert_eq!(bank.id, 0x2460_2460);
        assert_eq!(bank.mask, 0xFFE8_FFE8);
        assert!(bank.enabled);
        assert!(can.hw.bank_active(2));
    }

    #[test]
    fn filter_banks_outside_the_owned_range_are_rejected() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        let filter = StandardFilter::Exact {
            id: StandardId::ZERO,
            frames: FrameFilter::Any,
        };
        assert_eq!(
            can.set_standard_filter(28, filter),
            Err(FilterError::BankOutOfRange { bank: 28 })
        );
    }

    #[test]
    fn enable_and_disable_toggle_without_reprogramming() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.allow_receive_all(IdMatch::Any).unwrap();
        assert!(can.hw.bank_active(0));
        let programmed = can.hw.filter_log.len();
        can.disable_filter(0).unwrap();
        assert!(!can.hw.bank_active(0));
        can.enable_filter(0).unwrap();
        assert!(can.hw.bank_active(0));
        assert_eq!(can.hw.filter_log.len(), programmed);
    }

    #[test]
    fn shared_filter_array_split_is_honored_by_both_sides() {
        let registry = Registry::new();
        let mut can0_memory = CanMemory::<8, 0>::new();
        let mut can1_memory = CanMemory::<8, 0>::new();
        let (mut can0, _bridge0) = started(DeviceId::Can0, &registry, &mut can0_memory);
        let (mut can1, _bridge1) = started(DeviceId::Can1, &registry, &mut can1_memory);

        assert_eq!(can1.first_bank(), DEFAULT_SPLIT_BANK);
        assert_eq!(can1.hw.split_bank, Some(DEFAULT_SPLIT_BANK));
        assert_eq!(can0.max_bank(), DEFAULT_SPLIT_BANK - 1);

        let filter = StandardFilter::Exact {
            id: StandardId::ZERO,
            frames: FrameFilter::Any,
        };
        assert_eq!(
            can0.set_standard_filter(14, filter),
            Err(FilterError::BankOutOfRange { bank: 14 })
        );
        assert_eq!(
            can1.set_standard_filter(13, filter),
            Err(FilterError::BankOutOfRange { bank: 13 })
        );

        can1.set_split_bank(20).unwrap();
        assert_eq!(can1.hw.split_bank, Some(20));
        assert_eq!(registry.split_bank(), Some(20));
        assert_eq!(can0.max_bank(), 19);
        can0.set_standard_filter(19, filter).unwrap();

        assert_eq!(can0.set_split_bank(5), Err(FilterError::NotSplitOwner));
    }

    #[test]
    fn error_flags_encode_protocol_and_health() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        assert!(can.error_flags().is_clear());

        can.hw.error = ErrorStatus {
            protocol_code: 3,
            warning: true,
            passive: false,
            bus_off: false,
        };
        let flags = can.error_flags();
        assert_eq!(flags.protocol_error(), Some(ProtocolError::Ack));
        assert_eq!(flags.health(), Some(BusHealth::Warning));

        can.hw.error.bus_off = true;
        assert_eq!(can.error_flags().health(), Some(BusHealth::BusOff));

        // A lone protocol error still reports degraded health.
        can.hw.error = ErrorStatus {
            protocol_code: 6,
            warning: false,
            passive: false,
            bus_off: false,
        };
        let flags = can.error_flags();
        assert_eq!(flags.protocol_error(), Some(ProtocolError::Crc));
        assert_eq!(flags.health(), Some(BusHealth::Warning));
    }

    #[test]
    fn set_bit_rate_restores_normal_mode_on_failure() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        let before = can.hw.timing;

        let result = can.set_bit_rate(2u32.MHz());
        assert!(matches!(result, Err(ConfigError::BitTiming(_))));
        assert_eq!(can.hw.timing, before);
        assert_eq!(can.hw.mode, WorkingMode::Normal);

        let solved = can.set_bit_rate(bit_rate::K250).unwrap();
        assert_eq!(can.hw.timing, Some(solved.timing));
        assert_eq!(solved.timing.prescaler, 18);
        assert_eq!(can.hw.mode, WorkingMode::Normal);
    }

    #[test]
    fn set_bit_rate_propagates_mode_failures() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        can.hw.refuse_mode = true;
        assert_eq!(
            can.set_bit_rate(bit_rate::K250),
            Err(ConfigError::ModeTransition)
        );
    }

    #[test]
    fn transceiver_pin_follows_the_activity_state() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (mut can, _bridge) = started(DeviceId::Can0, &registry, &mut memory);
        let standby = Pin::new(Port::B, 0);

        assert_eq!(
            can.set_transceiver_active(true),
            Err(ConfigError::NoTransceiverPin)
        );
        can.attach_transceiver_standby_pin(standby);
        assert_eq!(can.hw.pin_levels.last(), Some(&(standby, true)));
        can.set_transceiver_active(true).unwrap();
        assert_eq!(can.hw.pin_levels.last(), Some(&(standby, false)));
        can.set_transceiver_active(false).unwrap();
        assert_eq!(can.hw.pin_levels.last(), Some(&(standby, true)));
    }

    #[test]
    fn release_returns_the_hardware_to_reset_state() {
        let registry = Registry::new();
        let mut memory = CanMemory::<8, 0>::new();
        let (can, _bridge) = started(DeviceId::Can0Remap1, &registry, &mut memory);
        let hw = can.release();
        assert!(!hw.clock_on);
        assert_eq!(hw.vector_rx, None);
        assert_eq!(hw.vector_tx, None);
        assert!(!hw.irq_rx && !hw.irq_tx);
        assert_eq!(hw.deinit_count, 2);
        assert_eq!(hw.remap_log.last(), Some(&(PinRemap::Can0Partial, false)));
        assert!(!registry.is_claimed(Block::Can0));
    }
}
