//! Applies user commands to the monitor

use crate::commands::{Command, HELP};
use crate::output::Printer;
use can_live_core::{parse_selector, Driver, Monitor, Selector, WorkerState};
use std::io::Write;

/// Outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

/// Controller state that outlives a single run
pub struct Controller {
    /// Bitrate used by a bare `start`
    pub bitrate: u32,
}

impl Controller {
    pub fn new(bitrate: u32) -> Self {
        Self { bitrate }
    }

    /// Start a run and print when it began
    pub fn start<D: Driver, W: Write>(
        &mut self,
        monitor: &mut Monitor<D>,
        printer: &mut Printer<W>,
    ) {
        if monitor.start(self.bitrate, printer).is_ok() {
            printer.note(&format!(
                "Receiving at {} bit/s since {}",
                self.bitrate,
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
            ));
        }
    }

    pub fn handle<D: Driver, W: Write>(
        &mut self,
        command: Command,
        monitor: &mut Monitor<D>,
        printer: &mut Printer<W>,
    ) -> Flow {
        match command {
            Command::Start(bitrate) => {
                if monitor.state() == WorkerState::Running {
                    printer.note("Already receiving; stop first");
                } else {
                    if let Some(bitrate) = bitrate {
                        self.bitrate = bitrate;
                    }
                    self.start(monitor, printer);
                }
            }
            Command::Stop => {
                if monitor.state() == WorkerState::Running {
                    monitor.stop();
                    printer.note("Stopped");
                } else {
                    printer.note("Not receiving");
                }
            }
            Command::Add(text) => match parse_selector(&text) {
                Some(selector) => {
                    if monitor.ensure_channel(selector) {
                        printer.note(&format!("+ channel: {}", selector));
                    }
                }
                None => log::debug!("Ignoring add for {:?}", text),
            },
            Command::Remove(text) => {
                if let Some(selector) = parse_selector(&text) {
                    if monitor.remove_channel(selector) {
                        printer.note(&format!("- channel: {}", selector));
                    }
                }
            }
            Command::Clear(text) => {
                let selectors = match text.as_deref().map(parse_selector) {
                    None => monitor.registry().selectors(),
                    Some(Some(selector)) => vec![selector],
                    Some(None) => Vec::new(),
                };
                for selector in selectors {
                    monitor.clear_channel(selector);
                }
            }
            Command::AutoAdd(enabled) => {
                monitor.set_auto_add(enabled);
                printer.note(&format!(
                    "Auto add {}",
                    if enabled { "enabled" } else { "disabled" }
                ));
            }
            Command::Show(text) => {
                let selector = text
                    .as_deref()
                    .and_then(parse_selector)
                    .unwrap_or(Selector::CatchAll);
                match monitor.registry().get(selector) {
                    Some(channel) => printer.show_channel(channel),
                    None => printer.note(&format!("No channel for {}", selector)),
                }
            }
            Command::List => {
                let registry = monitor.registry();
                for selector in registry.selectors() {
                    if let Some(channel) = registry.get(selector) {
                        printer.note(&format!(
                            "{:<20} {:>4} entries",
                            channel.title(),
                            channel.len()
                        ));
                    }
                }
                printer.note(&format!(
                    "auto add: {}, state: {:?}",
                    if registry.auto_add() { "on" } else { "off" },
                    monitor.state()
                ));
            }
            Command::Help => printer.note(HELP),
            Command::Quit => {
                monitor.stop();
                return Flow::Quit;
            }
        }
        Flow::Continue
    }
}
