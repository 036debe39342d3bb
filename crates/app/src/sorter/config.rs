//! Configuration parsing for the sorter binary.
//!
//! This module owns translation of CLI arguments into a `SorterConfig`
//! struct which downstream stages use without re-parsing flags. Everything
//! here is fixed for the lifetime of the process; the only live-mutable
//! detection parameter is the active colour range.

use anyhow::{Result, bail};
use clap::Args;
use detect_core::ColorClass;

#[derive(Clone, Debug)]
/// Canonical configuration shared by every part of the pipeline.
pub struct SorterConfig {
    /// Camera URI or device identifier.
    pub camera_uri: String,
    /// Capture width in pixels.
    pub width: i32,
    /// Capture height in pixels.
    pub height: i32,
    /// Frame rate requested from the camera.
    pub fps: f64,
    /// Colour class sorted until the config store says otherwise.
    pub startup_color: ColorClass,
    /// Show the live preview window.
    pub preview: bool,
    /// Remote config store to poll; `None` disables polling.
    pub remote: Option<RemoteOptions>,
    /// Sysfs PWM chip index driving the servo.
    pub pwm_chip: u32,
    /// Sysfs PWM channel index driving the servo.
    pub pwm_channel: u32,
    /// Run without servo hardware.
    pub no_actuator: bool,
}

#[derive(Clone, Debug)]
/// Where and how to poll the remote config store.
pub struct RemoteOptions {
    /// Base URL of the store.
    pub base_url: String,
    /// Auth token appended to each request, when the store requires one.
    pub auth_token: Option<String>,
    /// Key holding the sorter record.
    pub key: String,
}

/// CLI arguments accepted by the sorter.
#[derive(Debug, Args)]
pub struct SorterCliArgs {
    /// Camera device index or URI.
    #[arg(long = "source", value_name = "URI", default_value = "0")]
    pub source: String,
    /// Capture width in pixels.
    #[arg(long = "width", value_name = "PX", default_value_t = 640)]
    pub width: i32,
    /// Capture height in pixels.
    #[arg(long = "height", value_name = "PX", default_value_t = 480)]
    pub height: i32,
    /// Frame rate requested from the camera.
    #[arg(long = "fps", value_name = "FPS", default_value_t = 30.0)]
    pub fps: f64,
    /// Colour class to sort at startup (tag or name, e.g. R or red).
    #[arg(long = "color", value_name = "CLASS", default_value = "red")]
    pub color: String,
    /// Show the live preview window.
    #[arg(long = "preview", action = clap::ArgAction::SetTrue)]
    pub preview: bool,
    /// Base URL of the remote config store; omit to disable polling.
    #[arg(long = "config-url", value_name = "URL", env = "SORTER_CONFIG_URL")]
    pub config_url: Option<String>,
    /// Auth token appended to config requests.
    #[arg(
        long = "config-auth",
        value_name = "TOKEN",
        env = "SORTER_CONFIG_AUTH",
        hide_env_values = true
    )]
    pub config_auth: Option<String>,
    /// Key read from the config store.
    #[arg(long = "config-key", value_name = "KEY", default_value = "sorter")]
    pub config_key: String,
    /// Sysfs PWM chip index driving the servo.
    #[arg(long = "pwm-chip", value_name = "N", default_value_t = 0)]
    pub pwm_chip: u32,
    /// Sysfs PWM channel index driving the servo.
    #[arg(long = "pwm-channel", value_name = "N", default_value_t = 0)]
    pub pwm_channel: u32,
    /// Run without servo hardware (triggers are only logged).
    #[arg(long = "no-actuator", action = clap::ArgAction::SetTrue)]
    pub no_actuator: bool,
}

impl TryFrom<SorterCliArgs> for SorterConfig {
    type Error = anyhow::Error;

    fn try_from(args: SorterCliArgs) -> Result<Self> {
        if args.width <= 0 || args.height <= 0 {
            bail!("Capture width and height must be positive integers");
        }
        if !args.fps.is_finite() || args.fps <= 0.0 {
            bail!("--fps must be positive");
        }
        let startup_color: ColorClass = args.color.parse()?;

        if args.config_auth.is_some() && args.config_url.is_none() {
            bail!("--config-auth requires --config-url");
        }
        let remote = args.config_url.map(|base_url| RemoteOptions {
            base_url,
            auth_token: args.config_auth,
            key: args.config_key,
        });

        Ok(Self {
            camera_uri: args.source,
            width: args.width,
            height: args.height,
            fps: args.fps,
            startup_color,
            preview: args.preview,
            remote,
            pwm_chip: args.pwm_chip,
            pwm_channel: args.pwm_channel,
            no_actuator: args.no_actuator,
        })
    }
}
