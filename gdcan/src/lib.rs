//! # Classic CAN driver with queued IO
//!
//! Driver for the bxCAN style controllers found in GD32 class
//! microcontrollers: up to three CAN blocks, three transmit mailboxes and a
//! receive FIFO each, and an acceptance filter array that CAN0 and CAN1
//! share. The crate is hardware agnostic; all register access goes through
//! the [`Peripheral`] trait from [`gdcan_core`], which a HAL implements per
//! block.
//!
//! The driver adds what the silicon lacks:
//! - software transmit and receive queues serviced from the two interrupt
//!   vectors ([`ring`], [`interrupt`]),
//! - a bit timing solver for arbitrary bit rates ([`config`]),
//! - typed acceptance filter encoding and bank management ([`filter`]),
//! - instance arbitration and the shared filter array split point
//!   ([`registry`], [`device`]).
//!
//! [`bus::Can`] ties these together. Creating one claims a block and splits
//! the caller allocated [`bus::CanMemory`] into a thread side handle and an
//! [`interrupt::IrqBridge`] for the interrupt handlers; see the
//! [`bus`] module documentation for the setup sequence.
//!
//! [`Peripheral`]: gdcan_core::Peripheral

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub use embedded_can;
pub use fugit;
pub use gdcan_core as core;
pub use nb;

pub mod bus;
pub mod config;
pub mod device;
pub mod filter;
pub mod interrupt;
pub mod registry;
pub mod ring;

#[cfg(test)]
pub(crate) mod mock;

pub use bus::{Can, CanMemory};
pub use device::DeviceId;
pub use interrupt::IrqBridge;
pub use registry::Registry;
