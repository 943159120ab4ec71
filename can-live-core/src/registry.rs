//! Channel registry
//!
//! Maps selectors to log channels. The catch-all channel always exists and can
//! not be removed; dedicated channels are created on request or, with auto-add
//! enabled, for every identifier seen for the first time.

use crate::channel::{LogChannel, Selector};
use crate::config::MonitorConfig;
use crate::types::MAX_CAN_ID;
use std::collections::BTreeMap;

/// Where a recorded frame ended up
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    /// Channel that received the entry
    pub selector: Selector,
    /// The formatted entry
    pub entry: String,
    /// Dedicated channel created by auto-add after this frame
    pub created: Option<u32>,
}

/// Selector → channel mapping
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    catch_all: LogChannel,
    dedicated: BTreeMap<u32, LogChannel>,
    auto_add: bool,
    config: MonitorConfig,
}

impl ChannelRegistry {
    /// Create a registry holding only the catch-all channel
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            catch_all: LogChannel::new(Selector::CatchAll, config.channel_capacity, config.delta),
            dedicated: BTreeMap::new(),
            auto_add: false,
            config,
        }
    }

    /// Channel for `id`, or the catch-all channel if none is dedicated to it
    pub fn route_frame(&mut self, id: u32) -> &mut LogChannel {
        match self.dedicated.get_mut(&id) {
            Some(channel) => channel,
            None => &mut self.catch_all,
        }
    }

    /// Get or create the channel for `selector`
    ///
    /// Returns the channel and whether it was created by this call.
    pub fn ensure_channel(&mut self, selector: Selector) -> (&mut LogChannel, bool) {
        match selector {
            Selector::CatchAll => (&mut self.catch_all, false),
            Selector::Id(id) => {
                let mut created = false;
                let channel = self.dedicated.entry(id).or_insert_with(|| {
                    created = true;
                    log::info!("Created log channel for CAN ID 0x{:X}", id);
                    LogChannel::new(selector, self.config.channel_capacity, self.config.delta)
                });
                (channel, created)
            }
        }
    }

    /// Remove a dedicated channel; no-op for the catch-all or unknown ids
    pub fn remove_channel(&mut self, selector: Selector) -> bool {
        match selector {
            Selector::CatchAll => false,
            Selector::Id(id) => {
                let removed = self.dedicated.remove(&id).is_some();
                if removed {
                    log::info!("Removed log channel for CAN ID 0x{:X}", id);
                }
                removed
            }
        }
    }

    /// Enable or disable automatic channel creation for unseen identifiers
    pub fn set_auto_add(&mut self, enabled: bool) {
        self.auto_add = enabled;
    }

    pub fn auto_add(&self) -> bool {
        self.auto_add
    }

    /// Record an accepted frame on the channel it routes to
    ///
    /// Frames without a dedicated channel land on the catch-all channel with their
    /// identifier in the text. With auto-add enabled such a frame then creates the
    /// dedicated channel, so only later frames go there.
    pub fn record_frame(&mut self, elapsed: f64, id: u32, payload_hex: &str) -> Routed {
        let channel = self.route_frame(id);
        let selector = channel.selector();
        let entry = match selector {
            Selector::Id(_) => channel.append(elapsed, payload_hex).to_string(),
            Selector::CatchAll => {
                let text = format!("ID 0x{:X}: [{}]", id, payload_hex);
                channel.append(elapsed, &text).to_string()
            }
        };
        log::trace!("0x{:X} -> {}", id, selector);

        let created = if selector == Selector::CatchAll && self.auto_add {
            let (_, created) = self.ensure_channel(Selector::Id(id));
            created.then_some(id)
        } else {
            None
        };

        Routed {
            selector,
            entry,
            created,
        }
    }

    /// Forget the last timestamp of every channel, keeping their history
    pub fn reset_clocks(&mut self) {
        self.catch_all.reset_clock();
        for channel in self.dedicated.values_mut() {
            channel.reset_clock();
        }
    }

    /// Look up a channel without creating it
    pub fn get(&self, selector: Selector) -> Option<&LogChannel> {
        match selector {
            Selector::CatchAll => Some(&self.catch_all),
            Selector::Id(id) => self.dedicated.get(&id),
        }
    }

    pub fn get_mut(&mut self, selector: Selector) -> Option<&mut LogChannel> {
        match selector {
            Selector::CatchAll => Some(&mut self.catch_all),
            Selector::Id(id) => self.dedicated.get_mut(&id),
        }
    }

    /// Selectors in display order: catch-all first, then ascending ids
    pub fn selectors(&self) -> Vec<Selector> {
        std::iter::once(Selector::CatchAll)
            .chain(self.dedicated.keys().map(|&id| Selector::Id(id)))
            .collect()
    }

    /// Number of channels including the catch-all
    pub fn len(&self) -> usize {
        self.dedicated.len() + 1
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Parse a channel selector typed by the user
///
/// Empty text selects the catch-all channel; otherwise the text must be a hex
/// identifier (optionally `0x`-prefixed) within 29 bits. Anything else yields `None`.
pub fn parse_selector(text: &str) -> Option<Selector> {
    let text = text.trim();
    if text.is_empty() {
        return Some(Selector::CatchAll);
    }

    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        log::debug!("Ignoring malformed CAN ID: {:?}", text);
        return None;
    }

    match u32::from_str_radix(digits, 16) {
        Ok(id) if id <= MAX_CAN_ID => Some(Selector::Id(id)),
        _ => {
            log::debug!("Ignoring out-of-range CAN ID: {:?}", text);
            None
        }
    }
}
