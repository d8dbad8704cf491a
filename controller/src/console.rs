/*!
Line-oriented operator console.

Each stdin line is one action. Console keywords are matched first; any other
line is sent to the pointing system as a telecommand.
*/

use crate::pointing::{PointingController, PointingTarget};
use crate::sink::LogSink;
use crossbeam_channel::Sender;
use shared::transport::available_ports;
use shared::CommandKind;
use std::io::{self, BufRead, Write};
use std::str::FromStr;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// A physical link addressed from the console
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkId {
    Laser,
    Gps(PointingTarget),
}

impl FromStr for LinkId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "laser" | "l" => Ok(LinkId::Laser),
            other => other
                .parse::<PointingTarget>()
                .map(LinkId::Gps)
                .map_err(|_| format!("unknown link '{}', expected laser, a or b", s)),
        }
    }
}

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleAction {
    Connect { link: LinkId, port: String },
    Disconnect(LinkId),
    Target(PointingTarget),
    Status,
    Ports,
    Help,
    Quit,
    /// Anything else, forwarded verbatim to the command codec
    Telecommand(String),
    Empty,
}

impl ConsoleAction {
    pub fn parse(line: &str) -> Result<Self, String> {
        let tokens: Vec<&str> = line.split_whitespace().collect();
        let Some(first) = tokens.first() else {
            return Ok(ConsoleAction::Empty);
        };

        let action = match (first.to_ascii_lowercase().as_str(), &tokens[1..]) {
            ("connect", [link, port]) => ConsoleAction::Connect {
                link: link.parse()?,
                port: port.to_string(),
            },
            ("connect", _) => return Err("usage: connect <laser|a|b> <port>".to_string()),
            ("disconnect", [link]) => ConsoleAction::Disconnect(link.parse()?),
            ("disconnect", _) => return Err("usage: disconnect <laser|a|b>".to_string()),
            ("target", [target]) => ConsoleAction::Target(target.parse()?),
            ("target", _) => return Err("usage: target <a|b>".to_string()),
            ("status", []) => ConsoleAction::Status,
            ("ports", []) => ConsoleAction::Ports,
            ("help" | "?", []) => ConsoleAction::Help,
            ("quit" | "exit", []) => ConsoleAction::Quit,
            _ => ConsoleAction::Telecommand(line.trim().to_string()),
        };
        Ok(action)
    }
}

pub fn help_text() -> String {
    let mut text = String::from(
        "Console commands:\n  \
         connect <laser|a|b> <port>\n  \
         disconnect <laser|a|b>\n  \
         target <a|b>\n  \
         status\n  \
         ports\n  \
         help\n  \
         quit\n\
         Telecommands:\n",
    );
    for kind in CommandKind::ALL {
        text.push_str(&format!("  {}\n", kind.usage()));
    }
    text
}

/// Run one action against the controller. Returns `false` when the operator quits.
pub fn execute(controller: &PointingController, action: ConsoleAction) -> bool {
    match action {
        ConsoleAction::Empty => {}
        ConsoleAction::Quit => return false,
        ConsoleAction::Help => print!("{}", help_text()),
        ConsoleAction::Connect { link, port } => {
            let accepted = match link {
                LinkId::Laser => controller.open_laser(&port),
                LinkId::Gps(target) => controller.open_gps(target, &port),
            };
            if !accepted {
                println!("⚠️ Controller is shutting down");
            }
        }
        ConsoleAction::Disconnect(LinkId::Laser) => controller.close_laser(),
        ConsoleAction::Disconnect(LinkId::Gps(target)) => controller.close_gps(target),
        ConsoleAction::Target(target) => {
            controller.set_pointing_target(target);
            println!("🎯 Pointing at {}", target);
        }
        ConsoleAction::Status => {
            println!("Target: {}", controller.pointing_target());
            for link in controller.status() {
                let port = link.port.as_deref().unwrap_or("-");
                match link.last_location {
                    Some(location) => {
                        println!("  {:<6} {:?} on {}, last fix {}", link.name, link.state, port, location)
                    }
                    None => println!("  {:<6} {:?} on {}", link.name, link.state, port),
                }
            }
            println!(
                "  {} frames sent, {} of them forwarded fixes",
                controller.frames_sent(),
                controller.locations_forwarded()
            );
        }
        ConsoleAction::Ports => print_ports(),
        ConsoleAction::Telecommand(line) => match controller.send_command_line(&line) {
            Ok(command) => println!("✅ Sent {:?}", command),
            Err(e) => println!("❌ {}", e),
        },
    }
    true
}

pub fn print_ports() {
    match available_ports() {
        Ok(ports) if ports.is_empty() => println!("No serial ports found"),
        Ok(ports) => {
            for port in ports {
                println!("  {:<20} {}", port.name, port.description);
            }
        }
        Err(e) => println!("❌ {}", e),
    }
}

/// Forward stdin lines to `lines` until EOF or the receiver goes away
pub fn spawn_stdin_reader(lines: Sender<String>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console-input".to_string())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if lines.send(line).is_err() {
                    break;
                }
            }
            debug!("console input closed");
        })
}

/// Prints feedback and reports to stdout
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl LogSink for ConsoleSink {
    fn feedback(&self, text: &str) {
        let mut stdout = io::stdout().lock();
        // ignore a closed stdout, the links keep running
        let _ = write!(stdout, "{}", text);
        let _ = stdout.flush();
    }

    fn report(&self, message: &str) {
        println!("⚠️ {}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_console_keywords() {
        assert_eq!(
            ConsoleAction::parse("connect laser /dev/ttyUSB0").unwrap(),
            ConsoleAction::Connect {
                link: LinkId::Laser,
                port: "/dev/ttyUSB0".to_string()
            }
        );
        assert_eq!(
            ConsoleAction::parse("  CONNECT b COM4 ").unwrap(),
            ConsoleAction::Connect {
                link: LinkId::Gps(PointingTarget::BalloonB),
                port: "COM4".to_string()
            }
        );
        assert_eq!(
            ConsoleAction::parse("disconnect a").unwrap(),
            ConsoleAction::Disconnect(LinkId::Gps(PointingTarget::BalloonA))
        );
        assert_eq!(
            ConsoleAction::parse("target B").unwrap(),
            ConsoleAction::Target(PointingTarget::BalloonB)
        );
        assert_eq!(ConsoleAction::parse("status").unwrap(), ConsoleAction::Status);
        assert_eq!(ConsoleAction::parse("exit").unwrap(), ConsoleAction::Quit);
        assert_eq!(ConsoleAction::parse("   ").unwrap(), ConsoleAction::Empty);
    }

    #[test]
    fn test_other_lines_are_telecommands() {
        assert_eq!(
            ConsoleAction::parse(" set_motor_position 1 45.0 ").unwrap(),
            ConsoleAction::Telecommand("set_motor_position 1 45.0".to_string())
        );
        assert_eq!(
            ConsoleAction::parse("PING").unwrap(),
            ConsoleAction::Telecommand("PING".to_string())
        );
        // keyword with extra arguments is not a keyword
        assert_eq!(
            ConsoleAction::parse("status now").unwrap(),
            ConsoleAction::Telecommand("status now".to_string())
        );
    }

    #[test]
    fn test_malformed_keywords() {
        assert!(ConsoleAction::parse("connect laser").is_err());
        assert!(ConsoleAction::parse("connect gps3 /dev/ttyUSB0").is_err());
        assert!(ConsoleAction::parse("target c").is_err());
        assert!(ConsoleAction::parse("disconnect").is_err());
    }

    #[test]
    fn test_help_lists_every_telecommand() {
        let help = help_text();
        for kind in CommandKind::ALL {
            assert!(help.contains(&kind.usage()));
        }
    }
}
