//! Interactive controller commands read from stdin

use crossbeam_channel::Sender;
use std::io::BufRead;
use std::thread;

/// A controller action typed by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Start receiving, optionally at a different bitrate
    Start(Option<u32>),
    Stop,
    /// Create a dedicated channel (raw hex text, validated later)
    Add(String),
    Remove(String),
    /// Clear one channel, or every channel when no id is given
    Clear(Option<String>),
    AutoAdd(bool),
    /// Print a channel's entries (catch-all when no id is given)
    Show(Option<String>),
    List,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  start [bitrate]   start receiving
  stop              stop receiving
  add <id>          add a channel for a hex CAN id
  remove <id>       remove a channel
  clear [id]        clear one channel (all channels without id)
  auto on|off       auto-add channels for new ids
  show [id]         print a channel (catch-all without id)
  list              list channels
  quit              stop and exit";

/// Parse one input line; blank lines yield `Ok(None)`
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Ok(None);
    };
    let arg = words.next().map(str::to_string);
    if let Some(extra) = words.next() {
        return Err(format!("unexpected argument: {}", extra));
    }

    let command = match verb.to_ascii_lowercase().as_str() {
        "start" => match arg {
            Some(text) => Command::Start(Some(
                text.parse::<u32>()
                    .ok()
                    .filter(|&b| b > 0)
                    .ok_or_else(|| format!("invalid bitrate: {}", text))?,
            )),
            None => Command::Start(None),
        },
        "stop" => Command::Stop,
        "add" => Command::Add(arg.ok_or("usage: add <id>")?),
        "remove" | "rm" => Command::Remove(arg.ok_or("usage: remove <id>")?),
        "clear" => Command::Clear(arg),
        "auto" => match arg.as_deref() {
            Some("on") => Command::AutoAdd(true),
            Some("off") => Command::AutoAdd(false),
            _ => return Err("usage: auto on|off".to_string()),
        },
        "show" => Command::Show(arg),
        "list" | "ls" => Command::List,
        "help" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command: {} (try 'help')", other)),
    };
    Ok(Some(command))
}

/// Read commands from stdin on a background thread
///
/// End of input is delivered as `Command::Quit`.
pub fn spawn_stdin_reader(commands: Sender<Command>) -> std::io::Result<()> {
    thread::Builder::new()
        .name("stdin-commands".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                match parse_command(&line) {
                    Ok(Some(command)) => {
                        if commands.send(command).is_err() {
                            return;
                        }
                    }
                    Ok(None) => {}
                    Err(message) => eprintln!("{}", message),
                }
            }
            let _ = commands.send(Command::Quit);
        })?;
    Ok(())
}
