//! Error types for the motion planning crate.

/// Represents errors that can occur during motion planning.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PlannerError {
    /// The motion planning queue is full and cannot accept new moves.
    QueueFull,
    /// The requested move is impossible (e.g., zero distance).
    InvalidMove,
    /// Failed to enqueue a beginning/ending empty move. Fatal: the pipeline
    /// cannot safely continue without this sentinel segment.
    EmptyMoveEnqueueFailed,
}

/// Back-pressure outcome of a non-blocking queue operation. Not an error:
/// callers are expected to retry. Mirrors the classic/input-shaper
/// generators' "would block" vs "no valid step" outcomes.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum WouldBlock {
    /// The queue has no free slots right now.
    Full,
    /// The queue has nothing left to read right now.
    Empty,
}

/// Fatal motion-core faults, surfaced from ISR context via an atomic flag and
/// converted to this type only at a caller-thread synchronize point. ISRs
/// never construct this type directly.
///
/// `thiserror` requires `std::error::Error`, so it backs this type only on
/// the host (`std` feature); the MCU (`no_std`) build keeps the plain
/// `Debug` derive and relies on `defmt` logging at the call site instead.
#[cfg_attr(feature = "std", derive(thiserror::Error))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionFault {
    /// A phase-stepping axis needed to look back further than the first
    /// empty move provides. Indicates a mis-configured maximum lookback
    /// time; cannot be recovered from at runtime.
    #[cfg_attr(feature = "std", error("phase-stepping lookback exceeded the first empty move"))]
    LookbackExceeded,
    /// The phase-stepping SPI path has failed to commit currents for
    /// `consecutive_failures` ticks in a row, past the fatal threshold.
    #[cfg_attr(feature = "std", error("phase-stepping SPI write failed {consecutive_failures} times in a row"))]
    PhaseSteppingSpiFault { consecutive_failures: u32 },
}

/// Non-fatal diagnostic counters. These never become `Result`s; they are
/// incremented from ISR context and drained by a lower-priority poller that
/// logs deltas.
#[derive(Debug, Default, Clone, Copy)]
pub struct Diagnostics {
    /// Move queue underflowed with no ending-empty move present.
    pub move_queue_stall: u32,
    /// Step ISR missed its compare-match deadline.
    pub step_dl_miss: u32,
    /// Step ISR found the queue empty with no `end_of_motion` seen.
    pub step_ev_miss: u32,
    /// Consecutive phase-stepping SPI write failures, per axis.
    pub phase_spi_miss: [u32; 2],
}
