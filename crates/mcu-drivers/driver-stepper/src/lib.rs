#![deny(clippy::all)]
#![no_std]

//! # Step ISR Scheduler
//!
//! Bound to a hardware compare match on a dedicated timer. Consumes
//! `motion::WireStepEvent`s from the merger's step queue, writes STEP/DIR
//! GPIOs, and reprograms the next compare deadline.
//!
//! ## Pipelined Architecture
//!
//! The timer ISR executes a `next_event` fetched ahead of time, then
//! dequeues and prepares the following one so queue operations are off the
//! immediate critical path.

use core::cell::RefCell;
use core::sync::atomic::{AtomicU32, Ordering};

use critical_section::Mutex;
use heapless::spsc::Consumer;
use motion::step_event::{control, STEP_TIMER_MAX_TICKS};
use motion::WireStepEvent;

/// Minimum reserve, in timer ticks, used when a deadline has already passed
/// by the time it's reprogrammed. At the ~100 MHz step-timer clock assumed
/// elsewhere in this workspace this is about 5 microseconds.
pub const MIN_RESERVE_TICKS: u16 = 500;

/// A hardware GPIO port supporting atomic set/clear, as for the BSRR
/// register on STM32 parts.
pub trait AtomicGpioPort {
    fn set_and_clear_atomic(&mut self, set_mask: u8, clear_mask: u8);
    fn write(&mut self, mask: u8);
}

/// The step timer: schedules the next compare match, or reads the free-running
/// counter to detect an already-passed deadline.
pub trait StepTimer {
    fn schedule_next(&mut self, ticks: u16);
    fn trigger_now(&mut self);
    fn stop(&mut self);
    /// Current free-running counter value, sampled with interrupts disabled.
    fn now(&self) -> u16;
}

/// Diagnostic counters owned by the scheduler; polled (not logged directly)
/// from a lower-priority context.
#[derive(Default)]
pub struct StepIsrDiagnostics {
    pub step_dl_miss: AtomicU32,
    pub step_ev_miss: AtomicU32,
}

pub struct StepIsrScheduler<const N: usize> {
    event_consumer: Consumer<'static, WireStepEvent, 256>,
    positions: [i32; N],
    current_directions: u8,
    next_event: Option<WireStepEvent>,
    /// Axes currently driven by the phase-stepping engine instead of this
    /// scheduler: their DIR bit is never written here.
    phase_stepping_mask: u8,
    /// Accumulated shortfall (in ticks) carried forward after a
    /// deadline-miss correction.
    carried_shortfall: u16,
    end_of_motion_seen: bool,
    pub diagnostics: StepIsrDiagnostics,
}

impl<const N: usize> StepIsrScheduler<N> {
    pub fn new(event_consumer: Consumer<'static, WireStepEvent, 256>) -> Self {
        assert!(N <= 8, "this scheduler supports a maximum of 8 axes");
        Self {
            event_consumer,
            positions: [0; N],
            current_directions: 0,
            next_event: None,
            phase_stepping_mask: 0,
            carried_shortfall: 0,
            end_of_motion_seen: false,
            diagnostics: StepIsrDiagnostics::default(),
        }
    }

    /// Marks `axis` as owned by the phase-stepping engine; its DIR bit is
    /// left alone by this scheduler until cleared again on disable.
    pub fn set_phase_stepping(&mut self, axis: usize, active: bool) {
        if active {
            self.phase_stepping_mask |= 1 << axis;
        } else {
            self.phase_stepping_mask &= !(1 << axis);
        }
    }

    pub fn get_position(&self, axis: usize) -> Option<i32> {
        self.positions.get(axis).copied()
    }

    /// Primes the pipeline with the first event and arms the timer. Call
    /// once after enqueuing the first batch of events.
    pub fn start<DIR_PORT, TIMER>(&mut self, dir_port: &Mutex<RefCell<DIR_PORT>>, timer: &Mutex<RefCell<TIMER>>)
    where
        DIR_PORT: AtomicGpioPort,
        TIMER: StepTimer,
    {
        critical_section::with(|cs| {
            self.prepare_next_event(dir_port, cs);
            if let Some(event) = self.next_event {
                let timer = &mut *timer.borrow(cs).borrow_mut();
                timer.schedule_next(event.time_ticks.max(MIN_RESERVE_TICKS));
            }
        });
    }

    /// The compare-match interrupt handler. Must be called from the step
    /// timer's hardware interrupt.
    #[inline(always)]
    pub fn on_timer_interrupt<STEP_PORT, DIR_PORT, TIMER>(
        &mut self,
        step_port: &Mutex<RefCell<STEP_PORT>>,
        dir_port: &Mutex<RefCell<DIR_PORT>>,
        timer: &Mutex<RefCell<TIMER>>,
    ) where
        STEP_PORT: AtomicGpioPort,
        DIR_PORT: AtomicGpioPort,
        TIMER: StepTimer,
    {
        critical_section::with(|cs| {
            let Some(event) = self.next_event.take() else {
                // Queue drained without an end-of-motion sentinel: pipeline
                // stall (§7 "Step-event deadline miss / event miss").
                if !self.end_of_motion_seen {
                    self.diagnostics.step_ev_miss.fetch_add(1, Ordering::Relaxed);
                }
                let timer = &mut *timer.borrow(cs).borrow_mut();
                timer.stop();
                return;
            };

            if event.control_bits & control::END_OF_MOTION != 0 {
                self.end_of_motion_seen = true;
                let timer = &mut *timer.borrow(cs).borrow_mut();
                timer.stop();
                return;
            }

            // --- CRITICAL PATH START ---
            {
                let step_port = &mut *step_port.borrow(cs).borrow_mut();
                if event.step_bits != 0 {
                    step_port.set_and_clear_atomic(event.step_bits, event.step_bits);
                }
            }

            let deadline = (event.time_ticks as u32 + self.carried_shortfall as u32)
                .min(STEP_TIMER_MAX_TICKS) as u16;
            self.carried_shortfall = 0;
            {
                let timer = &mut *timer.borrow(cs).borrow_mut();
                let now = timer.now();
                // §4.7 step 4: protect against scheduling into the past.
                if deadline != 0 && deadline < now {
                    self.carried_shortfall = now.saturating_sub(deadline);
                    timer.schedule_next(MIN_RESERVE_TICKS);
                    self.diagnostics.step_dl_miss.fetch_add(1, Ordering::Relaxed);
                } else if deadline > 0 {
                    timer.schedule_next(deadline);
                } else {
                    timer.trigger_now();
                }
            }
            // --- CRITICAL PATH END ---

            self.update_positions(event.step_bits, event.direction_bits);
            self.prepare_next_event(dir_port, cs);

            if self.next_event.is_none() && !self.end_of_motion_seen {
                let timer = &mut *timer.borrow(cs).borrow_mut();
                timer.stop();
            }
        });
    }

    fn prepare_next_event<'cs, DIR_PORT>(
        &mut self,
        dir_port: &Mutex<RefCell<DIR_PORT>>,
        cs: critical_section::CriticalSection<'cs>,
    ) where
        DIR_PORT: AtomicGpioPort,
    {
        if let Some(event) = self.event_consumer.dequeue() {
            // §4.7 step 1: only write DIR for axes whose bit changed and
            // that aren't currently owned by phase stepping.
            let changed = self.current_directions ^ event.direction_bits;
            let writable = changed & event.active_bits & !self.phase_stepping_mask;
            if writable != 0 {
                let dir_port = &mut *dir_port.borrow(cs).borrow_mut();
                let new_directions = (self.current_directions & !writable) | (event.direction_bits & writable);
                dir_port.write(new_directions);
                self.current_directions = new_directions;
            }
            self.next_event = Some(event);
        } else {
            self.next_event = None;
        }
    }

    #[inline]
    fn update_positions(&mut self, step_bits: u8, direction_bits: u8) {
        for axis in 0..N {
            if (step_bits >> axis) & 1 != 0 {
                if (direction_bits >> axis) & 1 != 0 {
                    self.positions[axis] = self.positions[axis].wrapping_add(1);
                } else {
                    self.positions[axis] = self.positions[axis].wrapping_sub(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use heapless::spsc::Queue;

    #[derive(Debug, Default)]
    struct MockGpioPort {
        state: u8,
        set_clear_calls: u32,
    }

    impl AtomicGpioPort for MockGpioPort {
        fn set_and_clear_atomic(&mut self, set_mask: u8, clear_mask: u8) {
            self.state |= set_mask;
            self.state &= !clear_mask;
            self.set_clear_calls += 1;
        }
        fn write(&mut self, mask: u8) {
            self.state = mask;
        }
    }

    #[derive(Debug, Default)]
    struct MockTimer {
        scheduled_ticks: u16,
        counter: u16,
        stopped: bool,
    }

    impl StepTimer for MockTimer {
        fn schedule_next(&mut self, ticks: u16) {
            self.scheduled_ticks = ticks;
            self.stopped = false;
        }
        fn trigger_now(&mut self) {
            self.stopped = false;
        }
        fn stop(&mut self) {
            self.stopped = true;
        }
        fn now(&self) -> u16 {
            self.counter
        }
    }

    fn event(time_ticks: u16, step_bits: u8, direction_bits: u8) -> WireStepEvent {
        WireStepEvent { time_ticks, step_bits, direction_bits, active_bits: step_bits | direction_bits, control_bits: 0 }
    }

    static mut TEST_QUEUE: Queue<WireStepEvent, 256> = Queue::new();

    #[test]
    fn pipelined_events_step_and_reschedule() {
        let (mut producer, consumer) = unsafe {
            #[allow(static_mut_refs)]
            {
                TEST_QUEUE.clear();
                TEST_QUEUE.split()
            }
        };
        let mut sched = StepIsrScheduler::<4>::new(consumer);

        let step_port = Mutex::new(RefCell::new(MockGpioPort::default()));
        let dir_port = Mutex::new(RefCell::new(MockGpioPort::default()));
        let timer = Mutex::new(RefCell::new(MockTimer::default()));

        producer.enqueue(event(1000, 0b0001, 0b0001)).unwrap();
        producer.enqueue(event(500, 0b0010, 0b0000)).unwrap();

        sched.start(&dir_port, &timer);
        assert_eq!(sched.next_event, Some(event(1000, 0b0001, 0b0001)));

        sched.on_timer_interrupt(&step_port, &dir_port, &timer);
        assert_eq!(sched.get_position(0), Some(1));
        critical_section::with(|cs| {
            assert_eq!(step_port.borrow(cs).borrow().set_clear_calls, 1);
        });
        assert_eq!(sched.next_event, Some(event(500, 0b0010, 0b0000)));

        sched.on_timer_interrupt(&step_port, &dir_port, &timer);
        assert_eq!(sched.get_position(1), Some(-1));
        assert!(sched.next_event.is_none());
        critical_section::with(|cs| {
            assert!(timer.borrow(cs).borrow().stopped);
        });
    }

    #[test]
    fn phase_stepping_axis_direction_bit_is_left_alone() {
        let (mut producer, consumer) = unsafe {
            #[allow(static_mut_refs)]
            {
                TEST_QUEUE.clear();
                TEST_QUEUE.split()
            }
        };
        let mut sched = StepIsrScheduler::<4>::new(consumer);
        sched.set_phase_stepping(0, true);

        let dir_port = Mutex::new(RefCell::new(MockGpioPort::default()));
        producer.enqueue(event(1000, 0b0001, 0b0001)).unwrap();
        critical_section::with(|cs| sched.prepare_next_event(&dir_port, cs));

        critical_section::with(|cs| {
            // Axis 0 is phase-stepping owned: DIR port must not be touched.
            assert_eq!(dir_port.borrow(cs).borrow().state, 0);
        });
    }

    #[test]
    fn end_of_motion_stops_timer_without_deadline_miss() {
        let (mut producer, consumer) = unsafe {
            #[allow(static_mut_refs)]
            {
                TEST_QUEUE.clear();
                TEST_QUEUE.split()
            }
        };
        let mut sched = StepIsrScheduler::<4>::new(consumer);
        let step_port = Mutex::new(RefCell::new(MockGpioPort::default()));
        let dir_port = Mutex::new(RefCell::new(MockGpioPort::default()));
        let timer = Mutex::new(RefCell::new(MockTimer::default()));

        producer
            .enqueue(WireStepEvent { time_ticks: 0, step_bits: 0, direction_bits: 0, active_bits: 0, control_bits: control::END_OF_MOTION })
            .unwrap();
        sched.start(&dir_port, &timer);
        sched.on_timer_interrupt(&step_port, &dir_port, &timer);

        assert_eq!(sched.diagnostics.step_ev_miss.load(Ordering::Relaxed), 0);
        critical_section::with(|cs| assert!(timer.borrow(cs).borrow().stopped));
    }
}
