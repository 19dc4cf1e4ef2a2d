pub mod packets;

pub use packets::{decode_sent, request_datagram, request_info, response_datagram};
pub use recorder::{MonitorRecorder, MessageRecorder};

use std::time::{Duration, Instant};

/// Installs env_logger once per test binary
pub fn init_logging() {
    env_logger::builder()
        .filter_level(log::LevelFilter::Debug)
        .is_test(true)
        .try_init()
        .ok();
}

/// Polls `condition` until it holds or `timeout` runs out
pub fn wait_until(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Default wait used by the end-to-end tests
pub const WAIT: Duration = Duration::from_secs(5);
