//! Step events: the per-axis generator output, and the wire format the step
//! ISR ultimately consumes.

/// Control bits carried alongside the per-axis STEP/DIR/ACTIVE nibbles.
pub mod control {
    pub const BEGINNING_OF_MOVE: u8 = 1 << 0;
    pub const FIRST_STEP: u8 = 1 << 1;
    pub const END_OF_MOTION: u8 = 1 << 2;
    pub const KEEP_ALIVE: u8 = 1 << 3;
}

/// A generator's internal (pre-merge) description of one step event. Time is
/// absolute seconds since motion start; the merger/splitter converts this to
/// the queue's relative-tick wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StepEventInfo {
    pub time: f32,
    /// Bit `i` set => axis `i` should pulse its step pin this event.
    pub step_bits: u8,
    /// Bit `i` set => axis `i`'s commanded direction this event (only
    /// meaningful together with a change; the consumer XORs against the
    /// axis invert mask and only writes the GPIO on an actual flip).
    pub direction_bits: u8,
    pub active_bits: u8,
    pub control_bits: u8,
}

impl StepEventInfo {
    pub fn is_beginning_of_move(&self) -> bool {
        self.control_bits & control::BEGINNING_OF_MOVE != 0
    }
    pub fn is_end_of_motion(&self) -> bool {
        self.control_bits & control::END_OF_MOTION != 0
    }
}

/// Result of asking a generator to advance to its next step event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GeneratorOutcome {
    /// A step event is ready.
    Event(StepEventInfo),
    /// This axis produces no step within the remainder of its current
    /// segment; the merger should insert a keep-alive if nothing else fires.
    NoValidStep,
    /// The generator is waiting on a move segment that hasn't been enqueued
    /// yet.
    WouldBlock,
    /// The ending-empty move has been fully processed by this generator.
    EndOfMotion,
}

/// Pre-merge wire representation with a 32-bit delta so gaps wider than
/// `STEP_TIMER_MAX_TICKS` can be split into placeholder events before they
/// are narrowed to the 16-bit wire format.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WideStepEvent {
    pub time_ticks: u32,
    pub step_bits: u8,
    pub direction_bits: u8,
    pub active_bits: u8,
    pub control_bits: u8,
}

/// The 16-bit wire step event consumed by the step ISR: a tick delta from
/// the previous event plus a flags word. `STEP_TIMER_MAX_TICKS` (65535) is
/// the largest representable delta -- see [`crate::merger`] for the
/// splitter that enforces this.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WireStepEvent {
    pub time_ticks: u16,
    pub step_bits: u8,
    pub direction_bits: u8,
    pub active_bits: u8,
    pub control_bits: u8,
}

pub const STEP_TIMER_MAX_TICKS: u32 = u16::MAX as u32;
