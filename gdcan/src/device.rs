//! Device descriptors.
//!
//! Each supported combination of CAN block and pin remap is one
//! [`DeviceId`]. The associated [`Descriptor`] carries everything the
//! driver needs to know about the variant as plain data, so the rest of
//! the crate stays free of per-chip branching.

use gdcan_core::{Pin, PinRemap, Port};

/// Highest bank index in the filter array shared by CAN0 and CAN1.
pub(crate) const SHARED_MAX_BANK: u8 = 27;
/// Highest bank index of the private CAN2 filter array.
pub(crate) const CAN2_MAX_BANK: u8 = 14;
/// Bank where the CAN1 half of the shared array starts by default.
pub(crate) const DEFAULT_SPLIT_BANK: u8 = 14;

/// Which physical CAN block a device identity refers to.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Block {
    /// First controller, primary owner of the shared filter array
    Can0,
    /// Second controller, borrows the upper part of CAN0's filter array
    Can1,
    /// Third controller with its own filter array
    Can2,
}

impl Block {
    /// Bit in the process wide claim mask.
    pub(crate) fn claim_bit(self) -> u8 {
        match self {
            Block::Can0 => 1 << 0,
            Block::Can1 => 1 << 1,
            Block::Can2 => 1 << 2,
        }
    }
}

/// A physical CAN block together with its pin mapping.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum DeviceId {
    /// CAN0 on PA11/PA12
    Can0,
    /// CAN0 remapped to PB8/PB9
    Can0Remap1,
    /// CAN0 remapped to PD0/PD1
    Can0Remap2,
    /// CAN1 on PB12/PB13
    Can1,
    /// CAN1 remapped to PB5/PB6
    Can1Remap1,
    /// CAN2 on PB10/PB11
    Can2,
    /// CAN2 remapped to PB9/PB10
    Can2Remap1,
    /// CAN2 remapped to PE0/PE1
    Can2Remap2,
}

/// Static description of one device variant.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Descriptor {
    /// The physical block behind this identity
    pub block: Block,
    /// Receive pin
    pub rx: Pin,
    /// Transmit pin
    pub tx: Pin,
    /// Alternate function remap to apply, if any
    pub remap: PinRemap,
    /// Interrupt priority used for both vectors of this block
    pub irq_priority: u8,
}

impl DeviceId {
    /// The physical block behind this identity.
    pub fn block(self) -> Block {
        self.descriptor().block
    }

    /// Looks up the variant description.
    pub fn descriptor(self) -> Descriptor {
        match self {
            DeviceId::Can0 => Descriptor {
                block: Block::Can0,
                rx: Pin::new(Port::A, 11),
                tx: Pin::new(Port::A, 12),
                remap: PinRemap::None,
                irq_priority: 0,
            },
            DeviceId::Can0Remap1 => Descriptor {
                block: Block::Can0,
                rx: Pin::new(Port::B, 8),
                tx: Pin::new(Port::B, 9),
                remap: PinRemap::Can0Partial,
                irq_priority: 0,
            },
            DeviceId::Can0Remap2 => Descriptor {
                block: Block::Can0,
                rx: Pin::new(Port::D, 0),
                tx: Pin::new(Port::D, 1),
                remap: PinRemap::Can0Full,
                irq_priority: 0,
            },
            DeviceId::Can1 => Descriptor {
                block: Block::Can1,
                rx: Pin::new(Port::B, 12),
                tx: Pin::new(Port::B, 13),
                remap: PinRemap::None,
                irq_priority: 1,
            },
            DeviceId::Can1Remap1 => Descriptor {
                block: Block::Can1,
                rx: Pin::new(Port::B, 5),
                tx: Pin::new(Port::B, 6),
                remap: PinRemap::Can1,
                irq_priority: 1,
            },
            DeviceId::Can2 => Descriptor {
                block: Block::Can2,
                rx: Pin::new(Port::B, 10),
                tx: Pin::new(Port::B, 11),
                remap: PinRemap::None,
                irq_priority: 2,
            },
            DeviceId::Can2Remap1 => Descriptor {
                block: Block::Can2,
                rx: Pin::new(Port::B, 9),
                tx: Pin::new(Port::B, 10),
                remap: PinRemap::Can2Partial,
                irq_priority: 2,
            },
            DeviceId::Can2Remap2 => Descriptor {
                block: Block::Can2,
                rx: Pin::new(Port::E, 0),
                tx: Pin::new(Port::E, 1),
                remap: PinRemap::Can2Full,
                irq_priority: 2,
            },
        }
    }
}
