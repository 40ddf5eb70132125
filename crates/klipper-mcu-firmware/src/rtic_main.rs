// File path: crates/klipper-mcu-firmware/src/rtic_main.rs
// AI-generated comment:
// This file was modified by an AI assistant to implement a first-class RTIC application structure.
// Source files for context: crates/klipper-mcu-firmware/src/rtic_main.rs, crates/mcu-drivers/stepper.rs

//! # RTIC-based Firmware Entry Point
//!
//! This module provides a complete firmware implementation using the RTIC (Real-Time
//! Interrupt-driven Concurrency) framework as an alternative to the default Embassy-based
//! async executor. It demonstrates a hardware-task-driven architecture where peripherals
//! and interrupts directly trigger firmware logic.
//!
//! Three periodic contexts run at descending priority: the step ISR (compare-match on
//! TIM2, highest), the phase-stepping ISR (compare-match on TIM3, round-robins whichever
//! axes are in sinusoidal-current mode), and the move ISR (a software task woken on a
//! fixed period, lowest of the three).

#![allow(unused_imports)]

#[rtic::app(device = stm32f4xx_hal::pac, dispatchers = [EXTI0, EXTI1, EXTI2, EXTI3])]
mod app {
    use stm32f4xx_hal::{
        gpio::{gpiod, Output, PushPull, Speed},
        pac::{TIM2, TIM3, USART1},
        prelude::*,
        serial::{Config as SerialConfig, Event as SerialEvent, Rx, Serial, Tx},
        timer::{CounterUs, Event as TimerEvent},
    };
    use rtic_monotonics::{systick::*, Monotonic};
    use heapless::spsc::{Consumer, Producer, Queue};
    use core::cell::RefCell;
    use core::sync::atomic::AtomicBool;
    use critical_section::Mutex;

    // Workspace crates
    use crate::burst_stepper::{BurstDmaPort, BurstStepper};
    use crate::heater::{HeaterSharedState, PidController};
    use crate::move_isr::{BlockSource, MoveIsrScheduler};
    use crate::phase_stepping::AxisState;
    use driver_stepper::{AtomicGpioPort, StepIsrScheduler, StepTimer};
    use driver_tmc::phase_stepping::{PhaseSteppingSpi, SharedBusLock};
    use motion::segment::AXIS_COUNT;
    use motion::step_event::WireStepEvent;
    use motion::STEP_QUEUE_CAPACITY;

    type LedPin = gpiod::PD12<Output<PushPull>>;

    // Queue feeding the step ISR from the move ISR's generator pass.
    static mut STEP_QUEUE: Queue<WireStepEvent, STEP_QUEUE_CAPACITY> = Queue::new();

    // Proxy structs bridging this crate's `critical_section::Mutex<RefCell<...>>`
    // peripheral ownership style onto RTIC's context-local resources, so
    // `driver-stepper`'s scheduler doesn't need to know it's running under RTIC.

    struct StepperTimerProxy<'a> {
        tim: &'a mut CounterUs<TIM2>,
        now: u16,
    }
    impl StepTimer for StepperTimerProxy<'_> {
        fn schedule_next(&mut self, ticks: u16) {
            self.tim.start(ticks.micros()).unwrap();
        }
        fn trigger_now(&mut self) {
            self.tim.start(1.micros()).unwrap();
        }
        fn stop(&mut self) {
            self.tim.cancel().unwrap();
        }
        fn now(&self) -> u16 {
            self.now
        }
    }

    // Placeholder: a real build wires these to the STM32 GPIO port's BSRR
    // register directly rather than through the HAL's per-pin abstraction.
    struct GpioProxy;
    impl AtomicGpioPort for GpioProxy {
        fn set_and_clear_atomic(&mut self, _set_mask: u8, _clear_mask: u8) { /* no-op */ }
        fn write(&mut self, _mask: u8) { /* no-op */ }
    }

    // Placeholder: a real build wires this to the second DMA stream that
    // replays `BurstStepper`'s BSRR buffer against the shared step port,
    // armed off the same burst-update timer named in the burst-stepping
    // design. Until that stream is brought up, bursts are computed but
    // never actually played.
    struct NullBurstDma;
    impl BurstDmaPort for NullBurstDma {
        fn busy(&self) -> bool {
            false
        }
        fn play(&mut self, _events: &[u32]) { /* no-op */ }
    }

    // Placeholder SPI bus for the phase-stepping coil-current writes until a
    // dedicated SPI+DMA peripheral per axis is brought up.
    struct NullSpi;
    impl embedded_hal::spi::ErrorType for NullSpi {
        type Error = core::convert::Infallible;
    }
    impl embedded_hal::spi::SpiBus<u8> for NullSpi {
        fn read(&mut self, _words: &mut [u8]) -> Result<(), Self::Error> {
            Ok(())
        }
        fn write(&mut self, _words: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }
        fn transfer(&mut self, _read: &mut [u8], _write: &[u8]) -> Result<(), Self::Error> {
            Ok(())
        }
        fn transfer_in_place(&mut self, _words: &mut [u8]) -> Result<(), Self::Error> {
            Ok(())
        }
        fn flush(&mut self) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    struct NoPlannerBlocks;
    impl BlockSource for NoPlannerBlocks {
        fn next_block(&mut self) -> Option<motion::builder::PlannerBlock> {
            // Real firmware drains this from the G-code/lookahead channel fed
            // by `usart_task`; nothing is queued until that wiring lands.
            None
        }
    }

    #[shared]
    struct Shared {
        usart_tx: Tx<USART1>,
    }

    #[local]
    struct Local {
        led: LedPin,
        step_scheduler: StepIsrScheduler<AXIS_COUNT>,
        stepper_timer: CounterUs<TIM2>,
        phase_timer: CounterUs<TIM3>,
        phase_axis_a: AxisState,
        phase_axis_b: AxisState,
        phase_spi: PhaseSteppingSpi<NullSpi>,
        phase_bus_lock: SharedBusLock,
        move_scheduler: MoveIsrScheduler<AXIS_COUNT, 32>,
        usart_rx: Rx<USART1>,
        burst_stepper: BurstStepper<2>,
        burst_dma: NullBurstDma,
        burst_dir_port: GpioProxy,
    }

    #[init]
    fn init(cx: init::Context) -> (Shared, Local) {
        defmt::info!("RTIC Init");
        let dp = cx.device;

        // Setup clocks
        let rcc = dp.RCC.constrain();
        let clocks = rcc.cfgr.use_hse(8.MHz()).sysclk(168.MHz()).freeze();

        // Setup systick monotonic timer
        let systick_mono_token = rtic_monotonics::create_systick_token!();
        Systick::start(cx.core.SYST, clocks.hclk().0, systick_mono_token);

        // Setup LED
        let gpiod = dp.GPIOD.split();
        let mut led = gpiod.pd12.into_push_pull_output();
        led.set_high();

        // Setup USART for communication
        let gpioa = dp.GPIOA.split();
        let tx_pin = gpioa.pa9.into_alternate();
        let rx_pin = gpioa.pa10.into_alternate();
        let serial_config = SerialConfig::default().baudrate(250_000.bps());
        let (usart_tx, mut usart_rx) = Serial::new(dp.USART1, (tx_pin, rx_pin), serial_config, &clocks)
            .unwrap()
            .split();
        usart_rx.listen(SerialEvent::Rxne);

        // Step ISR timer (TIM2): compare-match driven, highest priority.
        let mut stepper_timer = dp.TIM2.counter_us(&clocks);
        stepper_timer.listen(TimerEvent::Update);

        // Phase-stepping ISR timer (TIM3): free-running round-robin tick.
        let mut phase_timer = dp.TIM3.counter_us(&clocks);
        phase_timer.listen(TimerEvent::Update);
        phase_timer.start(11.micros()).ok(); // ~90 kHz round-robin rate

        let (step_producer, step_consumer) = unsafe { STEP_QUEUE.split() };
        let step_scheduler = StepIsrScheduler::new(step_consumer);

        static mut PHASE_MOVES_A: Queue<crate::phase_stepping::MoveTarget, { crate::phase_stepping::PENDING_MOVES_CAPACITY }> = Queue::new();
        static mut PHASE_MOVES_B: Queue<crate::phase_stepping::MoveTarget, { crate::phase_stepping::PENDING_MOVES_CAPACITY }> = Queue::new();
        let (_moves_a_producer, moves_a_consumer) = unsafe { PHASE_MOVES_A.split() };
        let (_moves_b_producer, moves_b_consumer) = unsafe { PHASE_MOVES_B.split() };
        let phase_axis_a = AxisState::new(
            crate::phase_stepping::PhaseConversion { ticks_per_unit: 256.0 * 80.0 / 256.0 },
            moves_a_consumer,
        );
        let phase_axis_b = AxisState::new(
            crate::phase_stepping::PhaseConversion { ticks_per_unit: 256.0 * 80.0 / 256.0 },
            moves_b_consumer,
        );

        let move_scheduler = MoveIsrScheduler::new(step_producer);

        // Step masks for the two burst-stepping-capable axes, sharing one
        // GPIO port's low/high BSRR halves -- matches the XL-Buddy pinout's
        // A/B step bit assignment.
        let burst_stepper = BurstStepper::<2>::new([1 << 0, 1 << 3]);

        // Schedule periodic software tasks
        heater_task::spawn().ok();
        adc_task::spawn().ok();
        move_isr_task::spawn().ok();
        burst_stepper_task::spawn().ok();

        defmt::info!("RTIC Init complete.");

        (
            Shared { usart_tx },
            Local {
                led,
                step_scheduler,
                stepper_timer,
                phase_timer,
                phase_axis_a,
                phase_axis_b,
                phase_spi: PhaseSteppingSpi::new(NullSpi),
                phase_bus_lock: SharedBusLock::new(),
                move_scheduler,
                usart_rx,
                burst_stepper,
                burst_dma: NullBurstDma,
                burst_dir_port: GpioProxy,
            },
        )
    }

    #[idle(local = [led])]
    fn idle(cx: idle::Context) -> ! {
        loop {
            cx.local.led.toggle();
            Systick::delay(500.millis()).unwrap();
        }
    }

    /// Step ISR. Highest priority task: pops one step event, writes STEP/DIR
    /// (or defers to phase stepping on axes it owns), reprograms the compare
    /// deadline.
    #[task(binds = TIM2, local = [step_scheduler, stepper_timer], priority = 4)]
    fn stepper_isr(cx: stepper_isr::Context) {
        cx.local.stepper_timer.clear_interrupt(TimerEvent::Update);

        // Placeholder: a real build reads the timer's free-running counter
        // register directly; `CounterUs` doesn't expose it through the HAL's
        // countdown-timer interface.
        let timer_proxy = StepperTimerProxy { tim: cx.local.stepper_timer, now: 0 };

        let step_port_proxy = Mutex::new(RefCell::new(GpioProxy));
        let dir_port_proxy = Mutex::new(RefCell::new(GpioProxy));
        let timer_proxy_mutex = Mutex::new(RefCell::new(timer_proxy));

        cx.local.step_scheduler.on_timer_interrupt(&step_port_proxy, &dir_port_proxy, &timer_proxy_mutex);
    }

    /// Phase-stepping ISR. Round-robins whichever axes are in sinusoidal
    /// current mode; lower priority than the step ISR, higher than the move
    /// ISR's software task.
    #[task(binds = TIM3, local = [phase_timer, phase_tick_count: u32 = 0, phase_axis_a, phase_axis_b, phase_spi, phase_bus_lock], priority = 3)]
    fn phase_stepping_isr(cx: phase_stepping_isr::Context) {
        cx.local.phase_timer.clear_interrupt(TimerEvent::Update);
        *cx.local.phase_tick_count += 1;
        let now = *cx.local.phase_tick_count as f32 * 11e-6;

        let _ = cx.local.phase_axis_a.tick(now, cx.local.phase_spi, cx.local.phase_bus_lock);
        let _ = cx.local.phase_axis_b.tick(now, cx.local.phase_spi, cx.local.phase_bus_lock);
    }

    /// Communication Task - handles incoming serial data.
    #[task(binds = USART1, local = [usart_rx], priority = 2)]
    fn usart_task(cx: usart_task::Context) {
        // This task would read bytes from cx.local.usart_rx,
        // feed them to a klipper-proto parser, and on receiving
        // a valid `QueueStep` command, would push it to the
        // planner-block channel that `NoPlannerBlocks` stands in for.
        if let Ok(_byte) = cx.local.usart_rx.read() {
            // ... parsing logic here ...
        }
    }

    /// Move ISR: drains planner blocks, advances generators, flushes the
    /// merger into the step queue. Periodic software task, lowest priority
    /// of the three motion contexts.
    #[task(local = [move_scheduler], priority = 2)]
    async fn move_isr_task(cx: move_isr_task::Context) {
        static STOP_PENDING: AtomicBool = AtomicBool::new(false);
        let mut generators: [motion::generators::GeneratorKind; AXIS_COUNT] = core::array::from_fn(|axis| {
            motion::generators::GeneratorKind::Classic(motion::generators::classic::ClassicGenerator::new(axis, 1.0 / 80.0))
        });
        loop {
            cx.local
                .move_scheduler
                .tick(&mut NoPlannerBlocks, &mut generators, 0.0, &STOP_PENDING);
            Systick::delay(1.millis()).await;
        }
    }

    /// Periodic task for heater control. Lower priority.
    #[task(priority = 1)]
    async fn heater_task(_: heater_task::Context) {
        loop {
            // PID loop logic here
            Systick::delay(100.millis()).await;
        }
    }

    /// Periodic task for ADC sampling. Lower priority.
    #[task(priority = 1)]
    async fn adc_task(_: adc_task::Context) {
        loop {
            // ADC reading logic here
            Systick::delay(500.millis()).await;
        }
    }

    /// Drains any burst queued via `BurstStepper::set_phase_diff` (homing
    /// nudges, disable-phase-stepping MSCNT resync) onto the burst DMA
    /// stream. Nothing calls `set_phase_diff` yet, so `fire()` only ever
    /// sees an empty buffer until the homing/resync callers are wired in;
    /// polling here keeps the DMA handle ready for when they are.
    #[task(local = [burst_stepper, burst_dma, burst_dir_port], priority = 1)]
    async fn burst_stepper_task(cx: burst_stepper_task::Context) {
        loop {
            cx.local.burst_stepper.fire(cx.local.burst_dir_port, cx.local.burst_dma);
            Systick::delay(10.millis()).await;
        }
    }
}
