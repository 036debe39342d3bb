//! Background poller keeping the active colour range in sync with the
//! remote config store.

use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use detect_core::{ActiveRange, ColorClass};
use tracing::{debug, info, warn};

use crate::sorter::{
    remote::{ConfigClient, ConfigError, RemoteConfig},
    telemetry,
};

/// The store is polled ten times a second so a colour switch lands
/// within one or two frames at 30 fps.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Spawn the config sync thread. It owns the HTTP client and only
/// touches shared state through `active`.
pub(crate) fn spawn_config_sync(
    client: ConfigClient,
    startup_color: ColorClass,
    active: Arc<ActiveRange>,
    shutdown: Arc<AtomicBool>,
) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("config-sync", move || {
        let mut last_class = startup_color;
        while !shutdown.load(Ordering::Relaxed) {
            apply_fetch(client.fetch(), &active, &mut last_class);
            thread::sleep(POLL_INTERVAL);
        }
        debug!("Config sync stopped");
    })
}

/// Fold one poll outcome into the shared range. Errors keep whatever
/// range was last published.
fn apply_fetch(
    outcome: Result<RemoteConfig, ConfigError>,
    active: &ActiveRange,
    last_class: &mut ColorClass,
) {
    match outcome {
        Ok(config) => {
            debug!(
                color = config.color_class.tag(),
                motor = config.actuator_command,
                "Config poll"
            );
            active.publish(config.color_class.hsv_range());
            if config.color_class != *last_class {
                info!(
                    "Switching active colour class: {} -> {}",
                    last_class.name(),
                    config.color_class.name()
                );
                metrics::counter!("sorter_config_updates_total").increment(1);
                *last_class = config.color_class;
            }
        }
        Err(err) => {
            warn!("Config poll failed (retaining previous colour): {err}");
            metrics::counter!("sorter_config_errors_total").increment(1);
        }
    }
}
