//! Watchlist matching and alert dispatch.
//!
//! Confirmed plates are matched by exact text against the owner's watchlist
//! as it is stored at the time of the confirming frame. Each match becomes an
//! `AlertIntent`; delivery is delegated to a `Notifier`, one call per enabled
//! channel.

use std::fmt;

use anyhow::Result;
use serde::Serialize;

use crate::stabilize::ConfirmedPlate;
use crate::storage::WatchlistEntry;
use crate::{CameraId, OwnerId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Email,
    Sms,
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertChannel::Email => f.write_str("email"),
            AlertChannel::Sms => f.write_str("sms"),
        }
    }
}

/// A confirmed plate that hit a watchlist entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AlertIntent {
    pub plate_text: String,
    pub camera_id: CameraId,
    pub owner_id: OwnerId,
    pub notify_email: bool,
    pub notify_sms: bool,
    pub description: Option<String>,
}

impl AlertIntent {
    pub fn channels(&self) -> Vec<AlertChannel> {
        let mut channels = Vec::with_capacity(2);
        if self.notify_email {
            channels.push(AlertChannel::Email);
        }
        if self.notify_sms {
            channels.push(AlertChannel::Sms);
        }
        channels
    }
}

/// Delivers alerts. Implementations must be callable from any pipeline thread.
pub trait Notifier: Send + Sync {
    fn send_alert(&self, channel: AlertChannel, plate_text: &str, owner_id: OwnerId) -> Result<()>;
}

/// Writes every alert to the log.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send_alert(&self, channel: AlertChannel, plate_text: &str, owner_id: OwnerId) -> Result<()> {
        log::warn!(
            "WATCHLIST ALERT: plate {} for owner {} via {}",
            plate_text,
            owner_id,
            channel
        );
        Ok(())
    }
}

/// One intent per confirmation whose text is on the watchlist. The first
/// matching entry supplies the notification flags.
pub fn match_confirmations(
    confirmed: &[ConfirmedPlate],
    watchlist: &[WatchlistEntry],
    owner_id: OwnerId,
) -> Vec<AlertIntent> {
    confirmed
        .iter()
        .filter_map(|plate| {
            let entry = watchlist
                .iter()
                .find(|entry| entry.plate_text == plate.plate_text)?;
            Some(AlertIntent {
                plate_text: plate.plate_text.clone(),
                camera_id: plate.camera_id,
                owner_id,
                notify_email: entry.notify_email,
                notify_sms: entry.notify_sms,
                description: entry.description.clone(),
            })
        })
        .collect()
}

/// Send every enabled channel of every intent. Failures are logged and
/// skipped. Returns the number of successful sends.
pub fn dispatch_alerts(notifier: &dyn Notifier, intents: &[AlertIntent]) -> usize {
    let mut sent = 0;
    for intent in intents {
        log::info!(
            "camera {}: watchlist hit {} ({})",
            intent.camera_id,
            intent.plate_text,
            intent.description.as_deref().unwrap_or("no description")
        );
        for channel in intent.channels() {
            match notifier.send_alert(channel, &intent.plate_text, intent.owner_id) {
                Ok(()) => sent += 1,
                Err(err) => log::error!(
                    "camera {}: {} alert for {} failed: {:#}",
                    intent.camera_id,
                    channel,
                    intent.plate_text,
                    err
                ),
            }
        }
    }
    sent
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
