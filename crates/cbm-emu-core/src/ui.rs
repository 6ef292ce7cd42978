use log::{error, info};

/// Notifications the kernel sends to whatever frontend is driving it.
///
/// Every method has a default that forwards to `log`, so headless frontends
/// only override what they actually display.
pub trait UiHooks {
    /// An operation failed and the user should be told why.
    fn error(&mut self, message: &str) {
        error!("{message}");
    }

    fn display_recording(&mut self, active: bool) {
        info!("Event: recording {}", if active { "on" } else { "off" });
    }

    fn display_playback(&mut self, active: bool) {
        info!("Event: playback {}", if active { "on" } else { "off" });
    }

    /// Progress of a session in seconds. `total` is 0 while recording.
    fn display_event_time(&mut self, current: u32, total: u32) {
        if total == 0 {
            log::debug!("Event: {current}s recorded");
        } else {
            log::debug!("Event: {current}/{total}s played");
        }
    }

    fn display_status(&mut self, text: &str) {
        info!("{text}");
    }
}

/// [`UiHooks`] that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogUi;

impl UiHooks for LogUi {}

/// [`UiHooks`] that keeps every notification, for tests and for frontends
/// that poll instead of being called back.
#[derive(Debug, Default, Clone)]
pub struct CollectingUi {
    pub errors: Vec<String>,
    pub statuses: Vec<String>,
    pub recording: Option<bool>,
    pub playback: Option<bool>,
    pub event_time: Option<(u32, u32)>,
}

impl UiHooks for CollectingUi {
    fn error(&mut self, message: &str) {
        error!("{message}");
        self.errors.push(message.to_string());
    }

    fn display_recording(&mut self, active: bool) {
        self.recording = Some(active);
    }

    fn display_playback(&mut self, active: bool) {
        self.playback = Some(active);
    }

    fn display_event_time(&mut self, current: u32, total: u32) {
        self.event_time = Some((current, total));
    }

    fn display_status(&mut self, text: &str) {
        self.statuses.push(text.to_string());
    }
}
