//! Service-manager readiness protocol: after the pool and
//! listener have both started, send the readiness notification; on
//! shutdown entry, send the stopping notification. A thin wrapper over
//! `sd_notify`, a no-op when `NOTIFY_SOCKET` isn't set (e.g. not running
//! under systemd) — matching the crate's own behavior for that case.

use tracing::debug;

pub fn notify_ready() {
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        debug!("sd_notify READY=1 failed (not running under systemd?): {e}");
    }
}

pub fn notify_stopping() {
    if let Err(e) = sd_notify::notify(true, &[sd_notify::NotifyState::Stopping]) {
        debug!("sd_notify STOPPING=1 failed (not running under systemd?): {e}");
    }
}
