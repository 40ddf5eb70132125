//! Quick SPI transmission of phase-stepping coil currents and MSCNT
//! read/resync for enable/disable transitions.
//!
//! This is a separate physical bus from the UART configuration path in
//! [`crate::tmc2209`]: one dedicated SPI peripheral per axis writes the
//! driver's `XDIRECT` current register at the phase-stepping tick rate,
//! while a shared TMC UART bus (used for configuration) is guarded by the
//! cooperative lock modeled here.

use core::sync::atomic::{AtomicBool, Ordering};

use embedded_hal::spi::SpiBus;

use crate::Error;

/// `XDIRECT` register address, written with direct coil currents while the
/// driver is in direct-current mode.
const XDIRECT_REG: u8 = 0x2D;

/// A cooperative, non-blocking lock against the shared TMC serial bus.
/// Phase stepping attempts to acquire it every tick and simply skips the
/// tick on failure -- no steps are lost, since the next tick recomputes
/// position from absolute time.
pub struct SharedBusLock {
    held: AtomicBool,
}

impl SharedBusLock {
    pub const fn new() -> Self {
        Self { held: AtomicBool::new(false) }
    }

    /// Non-blocking acquire. Returns a guard on success.
    pub fn try_acquire(&self) -> Option<BusGuard<'_>> {
        if self.held.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(BusGuard { lock: self })
        }
    }
}

impl Default for SharedBusLock {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BusGuard<'a> {
    lock: &'a SharedBusLock,
}

impl Drop for BusGuard<'_> {
    fn drop(&mut self) {
        self.lock.held.store(false, Ordering::Release);
    }
}

/// Builds the 5-byte `XDIRECT` write buffer: register address followed by
/// 4 bytes of big-endian coil currents with the coils swapped to match the
/// driver's wiring quirk.
pub fn build_xdirect_frame(coil_a: i16, coil_b: i16) -> [u8; 5] {
    let mut buf = [0u8; 5];
    buf[0] = 0x80 | XDIRECT_REG;
    // Swapped: B goes in the high halfword, A in the low halfword.
    buf[1..3].copy_from_slice(&coil_b.to_be_bytes());
    buf[3..5].copy_from_slice(&coil_a.to_be_bytes());
    buf
}

/// Drives the reserved SPI+DMA channel for one axis's coil-current commits.
/// CS is dropped by a hardware output-compare event on the phase-stepping
/// timer in the real firmware (constant transfer-to-latch phase regardless
/// of CPU load); this type only prepares and arms the transfer.
pub struct PhaseSteppingSpi<SPI> {
    spi: SPI,
    pub missed_tx_count: u32,
}

impl<SPI, E> PhaseSteppingSpi<SPI>
where
    SPI: SpiBus<u8, Error = E>,
{
    pub fn new(spi: SPI) -> Self {
        Self { spi, missed_tx_count: 0 }
    }

    /// Attempts to commit coil currents for this tick. Acquires `bus_lock`
    /// non-blockingly; on failure the tick is skipped (not an error) and the
    /// miss counter is left untouched, since no steps are lost. A genuine
    /// SPI write failure increments `missed_tx_count`; the caller declares
    /// a fatal fault once this exceeds its threshold (5000 consecutive
    /// failures).
    pub fn try_commit(&mut self, bus_lock: &SharedBusLock, coil_a: i16, coil_b: i16) -> Result<bool, Error<E>> {
        let Some(_guard) = bus_lock.try_acquire() else {
            return Ok(false);
        };
        let frame = build_xdirect_frame(coil_a, coil_b);
        match self.spi.write(&frame) {
            Ok(()) => {
                self.missed_tx_count = 0;
                Ok(true)
            }
            Err(e) => {
                self.missed_tx_count += 1;
                Err(Error::Serial(e))
            }
        }
    }
}

/// `MSCNT` register address: the driver's internal microstep counter,
/// 0..`MOTOR_PERIOD` (1024 on a 2-phase/256-microstep part).
pub const MSCNT_REGISTER: u8 = 0x6A;

pub const MOTOR_PERIOD: u16 = 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdirect_frame_swaps_coils() {
        let frame = build_xdirect_frame(100, -200);
        assert_eq!(frame[0], 0x80 | XDIRECT_REG);
        assert_eq!(i16::from_be_bytes([frame[1], frame[2]]), -200); // B
        assert_eq!(i16::from_be_bytes([frame[3], frame[4]]), 100); // A
    }

    #[test]
    fn lock_is_non_reentrant_until_dropped() {
        let lock = SharedBusLock::new();
        let g1 = lock.try_acquire();
        assert!(g1.is_some());
        assert!(lock.try_acquire().is_none());
        drop(g1);
        assert!(lock.try_acquire().is_some());
    }
}
