//! Terminal presentation of monitor events

use can_live_core::{LogChannel, MonitorError, MonitorObserver, Selector, WorkerEvent};
use clap::ValueEnum;
use std::fmt;
use std::io::{self, Write};

/// How events are printed
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// One line per channel entry, prefixed with the channel title
    Text,
    /// One JSON object per worker event
    Json,
}

/// Observer that prints to a writer
///
/// Observer callbacks can not return errors, so the first failed write is kept
/// and later writes are skipped until the caller collects it with `take_error`.
pub struct Printer<W: Write> {
    out: W,
    format: OutputFormat,
    error: Option<io::Error>,
}

impl<W: Write> Printer<W> {
    pub fn new(out: W, format: OutputFormat) -> Self {
        Self {
            out,
            format,
            error: None,
        }
    }

    /// The first write error since the last call, if any
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    /// Print every entry of a channel under its title
    pub fn show_channel(&mut self, channel: &LogChannel) {
        self.line(format_args!("── {} ({} entries)", channel.title(), channel.len()));
        for entry in channel.entries() {
            self.line(format_args!("{}", entry));
        }
    }

    /// Informational line, suppressed in JSON mode
    pub fn note(&mut self, message: &str) {
        if self.format == OutputFormat::Text {
            self.line(format_args!("{}", message));
        }
    }

    fn line(&mut self, args: fmt::Arguments<'_>) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.out.write_fmt(args).and_then(|_| self.out.write_all(b"\n")) {
            self.error = Some(e);
        }
    }

    fn json(&mut self, event: &WorkerEvent) {
        match serde_json::to_string(event) {
            Ok(line) => self.line(format_args!("{}", line)),
            Err(e) => log::error!("Failed to serialize event: {}", e),
        }
    }

    #[cfg(test)]
    pub(crate) fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> MonitorObserver for Printer<W> {
    fn on_frame_received(&mut self, elapsed: f64, id: u32, payload_hex: &str) {
        if self.format == OutputFormat::Json {
            self.json(&WorkerEvent::FrameReceived {
                elapsed,
                id,
                payload_hex: payload_hex.to_string(),
            });
        }
    }

    fn on_entry_appended(&mut self, selector: Selector, entry: &str) {
        if self.format == OutputFormat::Text {
            self.line(format_args!("[{}] {}", selector, entry));
        }
    }

    fn on_channel_created(&mut self, selector: Selector) {
        self.note(&format!("+ new channel: {}", selector));
    }

    fn on_disconnected(&mut self, reason: &str) {
        match self.format {
            OutputFormat::Text => self.line(format_args!("!! Adapter disconnected: {}", reason)),
            OutputFormat::Json => self.json(&WorkerEvent::Disconnected {
                reason: reason.to_string(),
            }),
        }
    }

    fn on_start_failed(&mut self, error: &MonitorError) {
        eprintln!("!! Could not start receiving: {}", error);
    }
}
