//! Servo actuation over Linux PWM.
//!
//! [`Actuator`] is the seam the pipeline drives; [`PwmServo`] implements it
//! on top of any [`PwmOutput`], and [`SysfsPwm`] is the hardware-backed
//! output for `/sys/class/pwm`. [`NoopActuator`] stands in when the rig is
//! run without a servo attached.

use std::{thread, time::Duration};

use thiserror::Error;
use tracing::debug;

pub use sysfs::SysfsPwm;

mod sysfs;

/// PWM carrier frequency expected by hobby servos.
pub const PWM_FREQUENCY_HZ: u64 = 50;
/// PWM period in nanoseconds at [`PWM_FREQUENCY_HZ`].
pub const PWM_PERIOD_NS: u64 = 1_000_000_000 / PWM_FREQUENCY_HZ;

/// Errors raised by PWM actuators.
#[derive(Debug, Error)]
pub enum ServoError {
    #[error("pwm channel {path} unavailable")]
    Unavailable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {value:?} to {path}")]
    Write {
        path: String,
        value: String,
        #[source]
        source: std::io::Error,
    },
}

/// Low-level PWM channel a servo is driven through.
pub trait PwmOutput: Send {
    /// Set the duty cycle as a percentage of the period.
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ServoError>;
    /// Stop driving the output and release the channel.
    fn disable(&mut self) -> Result<(), ServoError>;
}

/// Duty-cycle calibration for the sorting arm.
///
/// The defaults were measured on the deployed rig: at a 20 ms period they
/// correspond to 1.5 ms (park), 0.4 ms (extended) and 1.0 ms (neutral)
/// pulse widths.
#[derive(Clone, Copy, Debug)]
pub struct MotionProfile {
    /// Duty applied while waiting for objects.
    pub idle_duty: f64,
    /// Duty that extends the arm into the chute.
    pub extended_duty: f64,
    /// Duty the arm returns to after a push.
    pub neutral_duty: f64,
    /// How long the arm is held extended per trigger.
    pub dwell: Duration,
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            idle_duty: 7.5,
            extended_duty: 2.0,
            neutral_duty: 5.0,
            dwell: Duration::from_millis(600),
        }
    }
}

/// Physical side of the pipeline: one arm, driven from one thread.
pub trait Actuator: Send {
    /// Push one object off the belt. Blocks for the full motion so a single
    /// object cannot trigger twice.
    fn trigger(&mut self) -> Result<(), ServoError>;
    /// Park the arm in its idle position.
    fn rest(&mut self) -> Result<(), ServoError>;
    /// Stop driving the hardware.
    fn release(&mut self) -> Result<(), ServoError>;
}

/// Servo arm driven through a [`PwmOutput`].
///
/// Dropping it without [`Actuator::release`] disables the output, so an
/// aborted startup does not leave the line driving.
pub struct PwmServo<P: PwmOutput> {
    pin: P,
    profile: MotionProfile,
    released: bool,
}

impl<P: PwmOutput> PwmServo<P> {
    /// Take ownership of a PWM channel and park the arm.
    pub fn new(pin: P) -> Result<Self, ServoError> {
        Self::with_profile(pin, MotionProfile::default())
    }

    /// As [`PwmServo::new`], with explicit calibration. A channel whose
    /// park write fails is disabled before the error is returned.
    pub fn with_profile(mut pin: P, profile: MotionProfile) -> Result<Self, ServoError> {
        if let Err(err) = pin.set_duty_cycle(profile.idle_duty) {
            let _ = pin.disable();
            return Err(err);
        }
        Ok(Self {
            pin,
            profile,
            released: false,
        })
    }
}

impl<P: PwmOutput> Drop for PwmServo<P> {
    fn drop(&mut self) {
        if !self.released {
            let _ = self.pin.disable();
        }
    }
}

impl<P: PwmOutput> Actuator for PwmServo<P> {
    fn trigger(&mut self) -> Result<(), ServoError> {
        self.pin.set_duty_cycle(self.profile.extended_duty)?;
        thread::sleep(self.profile.dwell);
        self.pin.set_duty_cycle(self.profile.neutral_duty)
    }

    fn rest(&mut self) -> Result<(), ServoError> {
        self.pin.set_duty_cycle(self.profile.idle_duty)
    }

    fn release(&mut self) -> Result<(), ServoError> {
        self.pin.disable()?;
        self.released = true;
        Ok(())
    }
}

/// Actuator that only logs, for bench runs without servo hardware.
#[derive(Debug, Default)]
pub struct NoopActuator;

impl Actuator for NoopActuator {
    fn trigger(&mut self) -> Result<(), ServoError> {
        debug!("actuator trigger (no hardware attached)");
        Ok(())
    }

    fn rest(&mut self) -> Result<(), ServoError> {
        Ok(())
    }

    fn release(&mut self) -> Result<(), ServoError> {
        Ok(())
    }
}
