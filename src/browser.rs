use std::thread;
use std::time::Duration;

use log::debug;

/// Delay between bind and launch so the listener is accepting before the
/// browser's first request lands.
const LAUNCH_DELAY: Duration = Duration::from_millis(400);

/// Open `url` in the system's default browser from a detached thread.
/// Fire-and-forget: launch failures never reach the caller.
pub fn launch_after_delay(url: String) {
    let _ = thread::Builder::new()
        .name("browser-open".to_string())
        .spawn(move || {
            thread::sleep(LAUNCH_DELAY);
            if let Err(e) = open::that(&url) {
                debug!("Could not open browser for {}: {}", url, e);
            }
        });
}
