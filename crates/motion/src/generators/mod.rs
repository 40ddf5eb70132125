//! Step generators: the three axis-local strategies that turn move segments
//! into step events, resolved through a tagged-variant dispatch
//! (`GeneratorKind`) rather than a function pointer, so each physical axis
//! just holds one.

pub mod classic;
pub mod pressure_advance;
pub mod shaper;

use crate::queue::MoveQueue;
use crate::step_event::GeneratorOutcome;
use classic::ClassicGenerator;
use pressure_advance::PressureAdvanceGenerator;
use shaper::ShaperGenerator;

/// One physical axis's active step-generation strategy. Phase-stepping axes
/// are driven by the phase-stepping engine instead and never hold a
/// `GeneratorKind`; they are only ever `Classic` here when phase stepping is
/// disabled for that axis.
pub enum GeneratorKind {
    Classic(ClassicGenerator),
    Shaped(ShaperGenerator),
    PressureAdvance(PressureAdvanceGenerator),
}

impl GeneratorKind {
    pub fn advance<const N: usize>(&mut self, queue: &mut MoveQueue<N>) -> GeneratorOutcome {
        match self {
            GeneratorKind::Classic(g) => g.advance(queue),
            GeneratorKind::Shaped(g) => g.advance(queue),
            GeneratorKind::PressureAdvance(g) => g.advance(queue),
        }
    }
}
