//! Instance arbitration.
//!
//! Only one driver instance may own a physical CAN block at a time. The
//! registry tracks which blocks are claimed and carries the split point of
//! the filter array shared between CAN0 and CAN1, so that both controllers
//! agree on who owns which banks. The application creates one registry and
//! passes it to every [`Can::new`] call.
//!
//! [`Can::new`]: crate::bus::Can::new

use core::cell::Cell;

use crate::device::Block;

/// Process wide claim state for the CAN blocks.
pub struct Registry {
    claimed: Cell<u8>,
    split_bank: Cell<Option<u8>>,
}

// Claims happen from thread context only; on the single core targets this
// driver serves, construction and teardown are not re-entered. Multi-core
// users must wrap the registry in a lock.
unsafe impl Sync for Registry {}

impl Registry {
    /// Creates a registry with no blocks claimed.
    pub const fn new() -> Self {
        Self {
            claimed: Cell::new(0),
            split_bank: Cell::new(None),
        }
    }

    /// Whether a block is currently claimed.
    pub fn is_claimed(&self, block: Block) -> bool {
        self.claimed.get() & block.claim_bit() != 0
    }

    /// First bank owned by CAN1 in the shared filter array, if a CAN1
    /// instance is active.
    pub fn split_bank(&self) -> Option<u8> {
        self.split_bank.get()
    }

    pub(crate) fn claim(&self, block: Block) -> Option<Claim<'_>> {
        let bit = block.claim_bit();
        if self.claimed.get() & bit != 0 {
            return None;
        }
        self.claimed.set(self.claimed.get() | bit);
        Some(Claim {
            registry: self,
            bit,
            owns_split: false,
        })
    }

    pub(crate) fn set_split_bank(&self, bank: u8) {
        self.split_bank.set(Some(bank));
    }

    fn release(&self, claim_bit: u8) {
        self.claimed.set(self.claimed.get() & !claim_bit);
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive hold on one block, released on drop.
pub(crate) struct Claim<'a> {
    registry: &'a Registry,
    bit: u8,
    owns_split: bool,
}

impl<'a> Claim<'a> {
    /// Marks this claim as the CAN1 instance defining the split point.
    pub(crate) fn take_split(&mut self, bank: u8) {
        self.owns_split = true;
        self.registry.set_split_bank(bank);
    }

    pub(crate) fn registry(&self) -> &'a Registry {
        self.registry
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if self.owns_split {
            self.registry.split_bank.set(None);
        }
        self.registry.release(self.bit);
    }
}
