//! # Stepper Motor Control
//!
//! This module is responsible for controlling the 3D printer's stepper motors. It uses a
//! hardware timer to generate step pulses with precise timing, ensuring smooth and
//! accurate movement.
//!
//! ## Stepper Queue
//!
//! The stepper module uses a priority queue to store future step times. This allows the
//! firmware to plan and execute complex movements with constant acceleration and
//! deceleration. The queue is populated with move sequences received from the host.
//!
//! ## Timer-Driven Control
//!
//! A hardware timer is used to generate the step pulses. The timer is configured to
//! trigger an interrupt at the time of the next step in the queue. The interrupt
-//! service routine (ISR) then executes the step and schedules the next interrupt.

/// The stepper control task.
///
/// This task manages the stepper motor queue and generates step pulses.
#[embassy_executor::task]
pub async fn stepper_task() {
    defmt::info!("Stepper task started");

    // TODO: In a real implementation:
    // 1. Configure a hardware timer for high-frequency step generation.
    // 2. Use a priority queue (like heapless::binary_heap) to store future step times.
    // 3. The timer interrupt would pop from the queue and execute the step.
    // 4. This task would manage adding new move sequences to the queue based on protocol commands.
    loop {
        embassy_time::Timer::after(embassy_time::Duration::from_secs(10)).await;
    }
}