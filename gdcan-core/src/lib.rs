//! # Platform integration layer for `gdcan`
//!
//! `gdcan` itself is hardware agnostic. It contains the bit timing solver,
//! the software transmit/receive queues, the acceptance filter encoder and
//! the interrupt plumbing, but it never touches registers directly. Every
//! register access goes through the [`Peripheral`] trait defined here, which
//! a HAL (or a board support crate) implements for each physical CAN block.
//!
//! The shared vocabulary types ([`Frame`], [`BitTiming`], [`FilterBank`],
//! [`ErrorStatus`], ...) also live in this crate so that HALs do not need to
//! depend on the full driver just to describe their hardware.
//!
//! HAL implementers are expected to
//! - create a zero or near-zero sized peripheral token per CAN block,
//! - implement [`Peripheral`] for it, upholding its safety contract,
//! - hand the token to `gdcan` and re-export the driver types.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub use fugit;

use embedded_can::{Id, StandardId};
use fugit::HertzU32;

/// Largest payload a classic CAN data frame can carry.
pub const MAX_DATA_LEN: usize = 8;

/// Distinguishes data frames from remote transmission requests.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FrameKind {
    /// Frame carrying up to [`MAX_DATA_LEN`] bytes of payload
    Data,
    /// Remote transmission request; the DLC is transferred but no payload
    Remote,
}

/// A classic CAN frame.
///
/// Payload length is capped at [`MAX_DATA_LEN`]; remote frames carry a DLC
/// but no payload bytes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Frame {
    id: Id,
    kind: FrameKind,
    dlc: u8,
    data: [u8; MAX_DATA_LEN],
}

impl Frame {
    const EMPTY: Frame = Frame {
        id: Id::Standard(StandardId::ZERO),
        kind: FrameKind::Data,
        dlc: 0,
        data: [0; MAX_DATA_LEN],
    };

    /// Placeholder frame used to initialize queue storage.
    pub const fn empty() -> Self {
        Self::EMPTY
    }

    /// Creates a data frame. Fails if `data` exceeds [`MAX_DATA_LEN`] bytes.
    pub fn new_data(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        if data.len() > MAX_DATA_LEN {
            return None;
        }
        let mut frame = Frame {
            id: id.into(),
            kind: FrameKind::Data,
            dlc: data.len() as u8,
            data: [0; MAX_DATA_LEN],
        };
        frame.data[..data.len()].copy_from_slice(data);
        Some(frame)
    }

    /// Creates a remote transmission request with the given DLC.
    pub fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        if dlc > MAX_DATA_LEN {
            return None;
        }
        Some(Frame {
            id: id.into(),
            kind: FrameKind::Remote,
            dlc: dlc as u8,
            data: [0; MAX_DATA_LEN],
        })
    }

    /// Arbitration identifier.
    pub fn id(&self) -> Id {
        self.id
    }

    /// Frame kind (data or remote).
    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Data length code.
    pub fn dlc(&self) -> usize {
        self.dlc as usize
    }

    /// Payload bytes. Empty for remote frames.
    pub fn data(&self) -> &[u8] {
        match self.kind {
            FrameKind::Data => &self.data[..self.dlc as usize],
            FrameKind::Remote => &[],
        }
    }

    /// Whether the frame uses a 29-bit identifier.
    pub fn is_extended(&self) -> bool {
        matches!(self.id, Id::Extended(_))
    }
}

impl embedded_can::Frame for Frame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        Self::new_data(id, data)
    }

    fn new_remote(id: impl Into<Id>, dlc: usize) -> Option<Self> {
        Self::new_remote(id, dlc)
    }

    fn is_extended(&self) -> bool {
        Frame::is_extended(self)
    }

    fn is_remote_frame(&self) -> bool {
        self.kind == FrameKind::Remote
    }

    fn id(&self) -> Id {
        self.id
    }

    fn dlc(&self) -> usize {
        self.dlc as usize
    }

    fn data(&self) -> &[u8] {
        Frame::data(self)
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for Frame {
    fn format(&self, fmt: defmt::Formatter) {
        match self.id {
            Id::Standard(id) => defmt::write!(
                fmt,
                "Frame {{ id: {=u16:#x}, kind: {}, data: {=[u8]:#x} }}",
                id.as_raw(),
                self.kind,
                self.data()
            ),
            Id::Extended(id) => defmt::write!(
                fmt,
                "Frame {{ id: {=u32:#x} (ext), kind: {}, data: {=[u8]:#x} }}",
                id.as_raw(),
                self.kind,
                self.data()
            ),
        }
    }
}

/// Nominal bit timing parameters in *real* units.
///
/// `seg1` and `seg2` are quanta counts excluding the sync quantum; the
/// implementer subtracts one where the register encodes `value - 1`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BitTiming {
    /// Baud rate prescaler dividing the peripheral clock into time quanta
    pub prescaler: u16,
    /// Quanta before the sample point, sync quantum excluded
    pub seg1: u8,
    /// Quanta after the sample point
    pub seg2: u8,
    /// Resynchronization jump width in quanta
    pub sjw: u8,
}

impl BitTiming {
    /// Total quanta per bit, sync quantum included.
    pub fn quanta(&self) -> u32 {
        1 + u32::from(self.seg1) + u32::from(self.seg2)
    }
}

/// Controller operating modes.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WorkingMode {
    /// Configuration mode; the controller is disconnected from the bus
    Initialize,
    /// Regular bus participation
    Normal,
    /// No frames are received or sent, bus traffic can be observed
    Sleep,
}

/// Interrupt sources the driver manages.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum IrqKind {
    /// Receive FIFO holds at least one frame
    RxFifoNotEmpty,
    /// A transmit mailbox has become free
    TxMailboxEmpty,
}

/// GPIO ports used by the CAN pin mappings.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[allow(missing_docs)]
pub enum Port {
    A,
    B,
    D,
    E,
}

/// A single GPIO pin.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Pin {
    /// Port the pin belongs to
    pub port: Port,
    /// Pin index within the port
    pub index: u8,
}

impl Pin {
    /// Shorthand constructor.
    pub const fn new(port: Port, index: u8) -> Self {
        Self { port, index }
    }
}

/// Pin configurations requested by the driver.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinMode {
    /// Floating input, the reset state
    InputFloating,
    /// Input with the internal pull-up enabled
    InputPullUp,
    /// Alternate function push-pull output (CAN TX)
    AltPushPull,
    /// General purpose push-pull output
    OutputPushPull,
}

/// Alternate function remap groups for the CAN pin sets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinRemap {
    /// Default mapping, no remap register write needed
    None,
    /// CAN0 on PB8/PB9
    Can0Partial,
    /// CAN0 on PD0/PD1
    Can0Full,
    /// CAN1 on PB5/PB6
    Can1,
    /// CAN2 on PB9/PB10
    Can2Partial,
    /// CAN2 on PE0/PE1
    Can2Full,
}

/// Acceptance filter matching mode.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterMode {
    /// Identifier plus mask; mask bits set to one must match
    Mask,
    /// Exact identifier list
    List,
}

/// Acceptance filter bank width.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FilterScale {
    /// Two 16-bit sub-filters per register word
    Bits16,
    /// One 32-bit filter spanning both register words
    Bits32,
}

/// Fully encoded state of one acceptance filter bank.
///
/// `id` and `mask` are the raw register words; in list mode `mask` holds the
/// second identifier. The driver computes these, the implementer only copies
/// them into the bank registers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FilterBank {
    /// Bank number within the filter array
    pub bank: u8,
    /// Matching mode
    pub mode: FilterMode,
    /// Bank width
    pub scale: FilterScale,
    /// First filter register word
    pub id: u32,
    /// Second filter register word
    pub mask: u32,
    /// Whether the bank takes part in filtering after programming
    pub enabled: bool,
}

/// Raw error state read from the controller.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ErrorStatus {
    /// Last protocol error code, zero when none was recorded
    pub protocol_code: u8,
    /// Error counter passed the warning threshold
    pub warning: bool,
    /// Controller is error passive
    pub passive: bool,
    /// Controller went bus-off
    pub bus_off: bool,
}

impl ErrorStatus {
    /// True when no error condition is flagged.
    pub fn is_clear(&self) -> bool {
        self.protocol_code == 0 && !self.warning && !self.passive && !self.bus_off
    }
}

/// Low level access to one CAN block and the pins and vectors serving it.
///
/// Types implementing this trait are handed to `gdcan` and represent
/// exclusive ownership of the hardware behind them.
///
/// # Safety
///
/// Implementers must guarantee that
/// - every method touches only the CAN block (and associated pins, clock
///   gates and interrupt controller entries) this value stands for,
/// - at most one thread side value granting access to a given CAN block
///   exists at any time; one further value may exist for the same block,
///   dedicated to its interrupt handlers, on which only
///   [`Peripheral::receive`], [`Peripheral::transmit`],
///   [`Peripheral::enable_interrupt`] and [`Peripheral::disable_interrupt`]
///   are called,
/// - [`Peripheral::clock`] reports the frequency actually feeding the bit
///   timing logic of the block,
/// - methods called from the driver's interrupt entry points
///   ([`Peripheral::receive`], [`Peripheral::transmit`],
///   [`Peripheral::enable_interrupt`], [`Peripheral::disable_interrupt`])
///   are safe to execute in interrupt context.
pub unsafe trait Peripheral {
    /// Frequency of the clock feeding this CAN block.
    fn clock(&self) -> HertzU32;

    /// Enables the peripheral clock gate.
    fn enable_clock(&mut self);

    /// Disables the peripheral clock gate.
    fn disable_clock(&mut self);

    /// Leaves initialization mode with the given timing applied.
    ///
    /// Returns `false` when the controller did not acknowledge the mode
    /// transition in time.
    fn init(&mut self, timing: &BitTiming, auto_retransmit: bool) -> bool;

    /// Resets the controller to its after-power-up state.
    fn deinit(&mut self);

    /// Requests a working mode transition; `false` on timeout.
    fn set_mode(&mut self, mode: WorkingMode) -> bool;

    /// Rewrites the bit timing register. Only valid in initialization mode.
    fn set_timing(&mut self, timing: &BitTiming);

    /// Hands a frame to a free transmit mailbox.
    ///
    /// Returns [`nb::Error::WouldBlock`] when all mailboxes are occupied.
    fn transmit(&mut self, frame: &Frame) -> nb::Result<(), core::convert::Infallible>;

    /// Pops the oldest frame from the receive FIFO, if any.
    fn receive(&mut self) -> Option<Frame>;

    /// Number of frames currently waiting in the receive FIFO.
    fn rx_pending(&self) -> usize;

    /// Number of free transmit mailboxes.
    fn free_mailboxes(&self) -> usize;

    /// Unmasks an interrupt source at the peripheral.
    fn enable_interrupt(&mut self, irq: IrqKind);

    /// Masks an interrupt source at the peripheral.
    fn disable_interrupt(&mut self, irq: IrqKind);

    /// Enables the NVIC vector for an interrupt source.
    fn enable_vector(&mut self, irq: IrqKind, priority: u8);

    /// Disables the NVIC vector for an interrupt source.
    fn disable_vector(&mut self, irq: IrqKind);

    /// Copies an encoded filter bank into the filter registers.
    ///
    /// The unlock/program/lock sequence on the filter write protection bit
    /// must not be interleaved with another bank update to the same
    /// physical filter array, including one issued by the controller
    /// sharing that array.
    fn apply_filter(&mut self, bank: &FilterBank);

    /// Activates or deactivates an already programmed bank.
    ///
    /// Subject to the same write protection critical section as
    /// [`Peripheral::apply_filter`].
    fn set_filter_enabled(&mut self, bank: u8, enabled: bool);

    /// Moves the boundary splitting the shared filter array between the
    /// primary and secondary controller.
    fn set_split_bank(&mut self, bank: u8);

    /// Reads and clears the error state registers.
    fn error_status(&self) -> ErrorStatus;

    /// Configures a GPIO pin.
    fn pin_configure(&mut self, pin: Pin, mode: PinMode);

    /// Drives a GPIO output.
    fn pin_write(&mut self, pin: Pin, high: bool);

    /// Applies or reverts an alternate function remap.
    fn apply_pin_remap(&mut self, remap: PinRemap, enable: bool);
}

/// Convenience re-export of the identifier types used by [`Frame`].
pub mod id {
    pub use embedded_can::{ExtendedId, Id, StandardId};
}
