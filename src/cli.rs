//! Command-line interface and REPL

use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::str::FromStr;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use portal_link::{
    Channel, Command, ConnectionStatus, Freshness, SessionEvent, SessionSnapshot,
};

/// Date format used for "last command sent" lines
const TIMESTAMP_FORMAT: &str = "%d/%m/%Y at %H:%M:%S";

/// One parsed prompt line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Connect,
    Disconnect,
    Status { json: bool },
    Write { channel: Channel, value: u8 },
    Named(Command),
    Help,
    Quit,
}

impl FromStr for ReplCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["connect"] => Ok(ReplCommand::Connect),
            ["disconnect"] => Ok(ReplCommand::Disconnect),
            ["status"] => Ok(ReplCommand::Status { json: false }),
            ["status", "--json"] => Ok(ReplCommand::Status { json: true }),
            ["help"] | ["?"] => Ok(ReplCommand::Help),
            ["quit"] | ["exit"] => Ok(ReplCommand::Quit),
            [channel, arg] => {
                // Plain "<channel> <value>" first, then the named form
                if let (Ok(channel), Ok(value)) = (channel.parse::<Channel>(), arg.parse::<u8>()) {
                    return Ok(ReplCommand::Write { channel, value });
                }
                line.parse::<Command>().map(ReplCommand::Named)
            }
            [] => Err("empty command".to_string()),
            _ => Err(format!("Unknown command '{}' (try 'help')", line.trim())),
        }
    }
}

/// Read prompt lines on a dedicated thread
///
/// The receiver yields `None` once the user hits Ctrl+C or Ctrl+D, or the terminal
/// goes away.
pub fn spawn_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();

    std::thread::spawn(move || {
        let mut rl = match DefaultEditor::new() {
            Ok(rl) => rl,
            Err(e) => {
                warn!("Failed to start line editor: {}", e);
                return;
            }
        };

        loop {
            match rl.readline("portal> ") {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    let _ = rl.add_history_entry(line.as_str());
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(e) => {
                    debug!("Readline error: {}", e);
                    break;
                }
            }
        }
    });

    rx
}

pub fn print_help() {
    println!("\n{}", "Commands:".bold());
    println!("  {}                 scan for the controller and connect", "connect".cyan());
    println!("  {}              close the link", "disconnect".cyan());
    println!("  {}         show the mirrored channel values", "status [--json]".cyan());
    println!("  {}      write a raw value (0-255)", "<channel> <value>".cyan());
    println!("  {}                quit", "quit".cyan());
    println!("\n{}", "Named commands:".bold());
    println!("  program rainbow|pride|waves|bubble|dots|fxwave2d|radii|cells|off");
    println!("  mode octopus|flower|lotus|radial");
    println!("  brightness up|down    speed faster|slower    palette <n>");
    println!("  control fancy|rotate-on|rotate-off");
    println!(
        "\n{} {}",
        "Channels:".bold(),
        Channel::all()
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );
}

pub fn render_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::ConnectionStatusChanged(status) => render_connection(status),
        SessionEvent::ChannelChanged { channel, value } => {
            format!("  {} {} = {}", "•".blue(), channel, value.to_string().bold())
        }
        SessionEvent::CommandFailed {
            channel,
            value,
            error,
        } => format!(
            "{} {} <- {} failed: {}",
            "✗".red(),
            channel,
            value,
            error.to_string().red()
        ),
        SessionEvent::LastCommandSent { channel, value, at } => format!(
            "{} Last command sent: {} {} on {}",
            "✓".green(),
            channel,
            value,
            at.format(TIMESTAMP_FORMAT)
        ),
    }
}

fn render_connection(status: &ConnectionStatus) -> String {
    match status {
        ConnectionStatus::Connecting { attempt: 0 } => format!("{}", "Connecting...".yellow()),
        ConnectionStatus::Connecting { attempt } => {
            format!("{} (attempt {})", "Reconnecting...".yellow(), attempt)
        }
        ConnectionStatus::Discovering => format!("{}", "Discovering channels...".yellow()),
        ConnectionStatus::Connected { device, channels } => {
            let values = channels
                .iter()
                .map(|(c, v)| format!("{}={}", c, v))
                .collect::<Vec<_>>()
                .join(" ");
            format!(
                "{} {} ({})",
                "Connected to".green().bold(),
                device.green().bold(),
                values
            )
        }
        ConnectionStatus::Disconnecting => format!("{}", "Disconnecting...".yellow()),
        ConnectionStatus::Disconnected => format!("{}", "Disconnected".red()),
        ConnectionStatus::ConnectionFailed { error, message } => format!(
            "{} {} ({})",
            "Connection failed:".red().bold(),
            error,
            message.dimmed()
        ),
    }
}

pub fn render_snapshot(snapshot: &SessionSnapshot) -> String {
    let mut out = format!("{} {}", "Session:".bold(), snapshot.state);
    for (channel, state) in &snapshot.channels {
        let value = state
            .value
            .map_or_else(|| "-".to_string(), |v| v.to_string());
        let freshness = match state.freshness {
            Freshness::Unread => "unread".dimmed(),
            Freshness::Synced => "synced".green(),
            Freshness::PendingWrite => "pending".yellow(),
        };
        out.push_str(&format!("\n  {:<11} {:>3}  {}", channel.as_str(), value, freshness));
    }
    out
}
