//! Sysfs PWM backend (`/sys/class/pwm`).

use std::{
    fs, io,
    path::{Path, PathBuf},
    thread,
    time::Duration,
};

use tracing::debug;

use crate::{PWM_PERIOD_NS, PwmOutput, ServoError};

// A freshly exported channel directory is not writable until udev has
// applied its permission rules.
const EXPORT_SETTLE: Duration = Duration::from_millis(100);

/// PWM channel exposed through the Linux sysfs interface.
pub struct SysfsPwm {
    chip_dir: PathBuf,
    channel: u32,
    channel_dir: PathBuf,
}

impl SysfsPwm {
    /// Export and configure `pwm<channel>` on `pwmchip<chip>` for 50 Hz.
    pub fn open(chip: u32, channel: u32) -> Result<Self, ServoError> {
        let chip_dir = PathBuf::from(format!("/sys/class/pwm/pwmchip{chip}"));
        let channel_dir = chip_dir.join(format!("pwm{channel}"));
        let pwm = Self {
            chip_dir,
            channel,
            channel_dir,
        };

        if !pwm.chip_dir.exists() {
            return Err(ServoError::Unavailable {
                path: pwm.chip_dir.display().to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            });
        }
        if !pwm.channel_dir.exists() {
            pwm.write_attr(&pwm.chip_dir.join("export"), &channel.to_string())?;
            thread::sleep(EXPORT_SETTLE);
        }

        pwm.write_channel_attr("period", &PWM_PERIOD_NS.to_string())?;
        pwm.write_channel_attr("duty_cycle", "0")?;
        pwm.write_channel_attr("enable", "1")?;
        debug!(
            "pwm channel {} ready at {}",
            pwm.channel,
            pwm.channel_dir.display()
        );
        Ok(pwm)
    }

    fn write_channel_attr(&self, attribute: &str, value: &str) -> Result<(), ServoError> {
        self.write_attr(&self.channel_dir.join(attribute), value)
    }

    fn write_attr(&self, path: &Path, value: &str) -> Result<(), ServoError> {
        fs::write(path, value).map_err(|source| ServoError::Write {
            path: path.display().to_string(),
            value: value.to_string(),
            source,
        })
    }
}

impl PwmOutput for SysfsPwm {
    fn set_duty_cycle(&mut self, percent: f64) -> Result<(), ServoError> {
        self.write_channel_attr("duty_cycle", &duty_ns(percent).to_string())
    }

    fn disable(&mut self) -> Result<(), ServoError> {
        self.write_channel_attr("enable", "0")?;
        self.write_attr(&self.chip_dir.join("unexport"), &self.channel.to_string())
    }
}

/// On-time in nanoseconds for a duty percentage at the servo period.
pub(crate) fn duty_ns(percent: f64) -> u64 {
    let clamped = percent.clamp(0.0, 100.0);
    ((PWM_PERIOD_NS as f64) * clamped / 100.0).round() as u64
}
