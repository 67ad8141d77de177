//! Interrupt side of the driver.
//!
//! [`IrqBridge`] holds everything that belongs in interrupt context: the
//! interrupt side ends of the two queues and the dedicated interrupt side
//! peripheral token for the block (see the [`Peripheral`] safety contract).
//! The application moves it into its interrupt handlers and calls the
//! matching method from each vector.

use core::sync::atomic::{AtomicBool, Ordering};

use gdcan_core::{IrqKind, Peripheral};

use crate::ring::{Consumer, Producer};

/// Queue ends and peripheral token serviced from interrupt context.
pub struct IrqBridge<'a, P: Peripheral> {
    pub(crate) hw: P,
    rx: Producer<'a>,
    tx: Consumer<'a>,
    rx_irq_enabled: &'a AtomicBool,
}

impl<'a, P: Peripheral> IrqBridge<'a, P> {
    pub(crate) fn new(
        hw: P,
        rx: Producer<'a>,
        tx: Consumer<'a>,
        rx_irq_enabled: &'a AtomicBool,
    ) -> Self {
        Self {
            hw,
            rx,
            tx,
            rx_irq_enabled,
        }
    }

    /// Services the receive FIFO not empty interrupt.
    ///
    /// Moves one frame from the hardware FIFO into the receive queue. When
    /// the queue is full the frame stays in the FIFO and the interrupt is
    /// masked instead; [`Can::read`] re-arms it once space exists.
    ///
    /// [`Can::read`]: crate::bus::Can::read
    pub fn rx_fifo_not_empty(&mut self) {
        if self.rx.is_full() {
            self.hw.disable_interrupt(IrqKind::RxFifoNotEmpty);
            self.rx_irq_enabled.store(false, Ordering::Release);
            return;
        }
        if let Some(frame) = self.hw.receive() {
            // Cannot fail, fullness was checked above and this is the only
            // producer.
            let _ = self.rx.push(frame);
        }
    }

    /// Services the transmit mailbox empty interrupt.
    ///
    /// Feeds queued frames into mailboxes until either runs out. Once the
    /// queue drains the interrupt masks itself; the next [`Can::write`]
    /// that queues a frame re-arms it.
    ///
    /// [`Can::write`]: crate::bus::Can::write
    pub fn tx_mailbox_empty(&mut self) {
        while let Some(frame) = self.tx.peek() {
            match self.hw.transmit(&frame) {
                Ok(()) => self.tx.pop(),
                Err(nb::Error::WouldBlock) => break,
                Err(nb::Error::Other(infallible)) => match infallible {},
            }
        }
        if self.tx.is_empty() {
            self.hw.disable_interrupt(IrqKind::TxMailboxEmpty);
        }
    }
}
