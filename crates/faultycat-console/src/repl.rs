//! Console command parsing and dispatch

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use faultycat_core::prelude::*;

/// One line typed at the prompt
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Ports { all: bool },
    Connect(String),
    Disconnect,
    /// Write without reading
    Send(String),
    /// Write, then read for the given window (or the default one)
    Raw(String, Option<u64>),
    Device(DeviceCommand),
    ShowGlitch,
    SetGlitch(Vec<(String, String)>),
    ApplyGlitch,
    Adc(u32),
    Pulses { count: u32, interval_ms: u64 },
    Transcript,
    Clear,
    State,
    Help,
    Quit,
}

pub const HELP: &str = "\
ports [all]               list USB serial ports (or every port)
connect <port>            open the board
disconnect                close the board
send <text>               write a line without reading
raw <text> [ms]           write a line and read for ms
arm | disarm | pulse | status | help-board | jtag | glitch | adc-show | reset
glitch-set k=v ...        edit glitch fields: trigger pull output delay width
glitch-show               print the pending glitch configuration
glitch-apply              upload the pending glitch configuration
adc <count>               upload the ADC sample count (100..=30000)
pulses <count> <ms>       arm, pulse count times every ms, disarm
transcript | clear | state | help | quit";

pub fn parse_line(line: &str) -> Result<Option<ConsoleCommand>> {
    let mut words = line.split_whitespace();
    let Some(head) = words.next() else {
        return Ok(None);
    };
    let rest: Vec<&str> = words.collect();

    let number = |s: Option<&&str>, what: &str| -> Result<u64> {
        s.ok_or_else(|| anyhow!("missing {}", what))?
            .parse::<u64>()
            .map_err(|_| anyhow!("{} must be a number", what))
    };

    let cmd = match head {
        "ports" => ConsoleCommand::Ports {
            all: rest.first() == Some(&"all"),
        },
        "connect" => ConsoleCommand::Connect(
            rest.first()
                .ok_or_else(|| anyhow!("usage: connect <port>"))?
                .to_string(),
        ),
        "disconnect" => ConsoleCommand::Disconnect,
        "send" if rest.is_empty() => bail!("usage: send <text>"),
        "send" => ConsoleCommand::Send(rest.join(" ")),
        "raw" if rest.is_empty() => bail!("usage: raw <text> [ms]"),
        "raw" => {
            // A trailing number is the read window
            match rest.last().and_then(|w| w.parse::<u64>().ok()) {
                Some(ms) if rest.len() > 1 => ConsoleCommand::Raw(rest[..rest.len() - 1].join(" "), Some(ms)),
                _ => ConsoleCommand::Raw(rest.join(" "), None),
            }
        }
        "arm" => ConsoleCommand::Device(DeviceCommand::Arm),
        "disarm" => ConsoleCommand::Device(DeviceCommand::Disarm),
        "pulse" => ConsoleCommand::Device(DeviceCommand::Pulse),
        "status" => ConsoleCommand::Device(DeviceCommand::Status),
        "help-board" => ConsoleCommand::Device(DeviceCommand::Help),
        "jtag" => ConsoleCommand::Device(DeviceCommand::JtagScan),
        "glitch" => ConsoleCommand::Device(DeviceCommand::ExecuteGlitch),
        "adc-show" => ConsoleCommand::Device(DeviceCommand::DisplayAdc),
        "reset" => ConsoleCommand::Device(DeviceCommand::Reset),
        "glitch-show" => ConsoleCommand::ShowGlitch,
        "glitch-apply" => ConsoleCommand::ApplyGlitch,
        "glitch-set" => {
            let pairs = rest
                .iter()
                .map(|kv| {
                    kv.split_once('=')
                        .map(|(k, v)| (k.to_string(), v.to_string()))
                        .ok_or_else(|| anyhow!("expected key=value, got {}", kv))
                })
                .collect::<Result<Vec<_>>>()?;
            if pairs.is_empty() {
                bail!("usage: glitch-set key=value ...");
            }
            ConsoleCommand::SetGlitch(pairs)
        }
        "adc" => {
            let count = number(rest.first(), "sample count")?;
            ConsoleCommand::Adc(u32::try_from(count).map_err(|_| anyhow!("sample count too large"))?)
        }
        "pulses" => ConsoleCommand::Pulses {
            count: u32::try_from(number(rest.first(), "count")?).map_err(|_| anyhow!("count too large"))?,
            interval_ms: number(rest.get(1), "interval")?,
        },
        "transcript" => ConsoleCommand::Transcript,
        "clear" => ConsoleCommand::Clear,
        "state" => ConsoleCommand::State,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command '{}', type help", other),
    };
    Ok(Some(cmd))
}

/// Console state kept between lines
pub struct Console {
    pub session: Session,
    pub glitch: GlitchConfig,
}

impl Console {
    pub fn new(session: Session) -> Self {
        Self {
            session,
            glitch: GlitchConfig::default(),
        }
    }

    /// Run one command; returns the text to print
    pub async fn dispatch(&mut self, cmd: ConsoleCommand) -> Result<String> {
        let s = &self.session;
        let out = match cmd {
            ConsoleCommand::Ports { all } => {
                let ports = if all { Session::list_ports() } else { Session::usb_ports() };
                if ports.is_empty() {
                    "no ports found".to_string()
                } else {
                    ports
                        .iter()
                        .map(|p| {
                            format!(
                                "{:<20} {:<10} {} {}",
                                p.name,
                                p.port_type,
                                p.manufacturer.as_deref().unwrap_or("N/A"),
                                p.product.as_deref().unwrap_or("N/A")
                            )
                        })
                        .collect::<Vec<_>>()
                        .join("\n")
                }
            }
            ConsoleCommand::Connect(port) => s.connect_serial(&port).await?,
            ConsoleCommand::Disconnect => s.disconnect_serial().await?,
            ConsoleCommand::Send(text) => s.send_command(&text).await?,
            ConsoleCommand::Raw(text, ms) => {
                let ms = ms.unwrap_or(s.config().default_read_window_ms);
                s.send_command_with_read(&text, ms).await?
            }
            ConsoleCommand::Device(DeviceCommand::Status) => {
                let (result, status) = s.status().await?;
                match status {
                    Some(st) => format!("{}\n[status: {}]", result.raw_response.trim_end(), st),
                    None => result.raw_response,
                }
            }
            ConsoleCommand::Device(command) => s.execute(command).await?.raw_response,
            ConsoleCommand::ShowGlitch => format!("{:#?}", self.glitch),
            ConsoleCommand::SetGlitch(pairs) => {
                let mut pending = self.glitch;
                for (k, v) in &pairs {
                    pending.set(k, v)?;
                }
                pending.validate()?;
                self.glitch = pending;
                format!("{:#?}", self.glitch)
            }
            ConsoleCommand::ApplyGlitch => s.apply_glitch(&self.glitch).await?.output,
            ConsoleCommand::Adc(sample_count) => s.apply_adc(&AdcConfig { sample_count }).await?.output,
            ConsoleCommand::Pulses { count, interval_ms } => {
                let train = PulseTrain {
                    count,
                    interval: Duration::from_millis(interval_ms),
                };
                s.pulse_train(&train).await?.output
            }
            ConsoleCommand::Transcript => s.transcript().join(""),
            ConsoleCommand::Clear => {
                s.clear_transcript();
                "transcript cleared".to_string()
            }
            ConsoleCommand::State => serde_json::to_string_pretty(&StateView::from(s.snapshot()))?,
            ConsoleCommand::Help => HELP.to_string(),
            ConsoleCommand::Quit => String::new(),
        };
        Ok(out)
    }
}

/// Snapshot without the transcript body
#[derive(serde::Serialize)]
struct StateView {
    state: SessionState,
    port_name: Option<String>,
    last_message: Option<StatusMessage>,
    transcript_entries: usize,
    evicted: u64,
}

impl From<SessionSnapshot> for StateView {
    fn from(s: SessionSnapshot) -> Self {
        Self {
            state: s.state,
            port_name: s.port_name,
            last_message: s.last_message,
            transcript_entries: s.transcript.len(),
            evicted: s.evicted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(line: &str) -> ConsoleCommand {
        parse_line(line).unwrap().unwrap()
    }

    #[test]
    fn test_blank_line_is_nothing() {
        assert!(parse_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_device_shortcuts() {
        assert_eq!(parse("arm"), ConsoleCommand::Device(DeviceCommand::Arm));
        assert_eq!(parse("glitch"), ConsoleCommand::Device(DeviceCommand::ExecuteGlitch));
        assert_eq!(parse("adc-show"), ConsoleCommand::Device(DeviceCommand::DisplayAdc));
    }

    #[test]
    fn test_raw_with_and_without_window() {
        assert_eq!(parse("raw gl 1500"), ConsoleCommand::Raw("gl".into(), Some(1500)));
        assert_eq!(parse("raw 1000"), ConsoleCommand::Raw("1000".into(), None));
    }

    #[test]
    fn test_glitch_set_pairs() {
        assert_eq!(
            parse("glitch-set trigger=3 width=2500"),
            ConsoleCommand::SetGlitch(vec![
                ("trigger".into(), "3".into()),
                ("width".into(), "2500".into())
            ])
        );
        assert!(parse_line("glitch-set trigger").is_err());
        assert!(parse_line("glitch-set").is_err());
    }

    #[test]
    fn test_numeric_arguments() {
        assert_eq!(parse("adc 1000"), ConsoleCommand::Adc(1000));
        assert_eq!(
            parse("pulses 5 250"),
            ConsoleCommand::Pulses {
                count: 5,
                interval_ms: 250
            }
        );
        assert!(parse_line("adc many").is_err());
        assert!(parse_line("pulses 5").is_err());
    }

    #[test]
    fn test_unknown_command() {
        assert!(parse_line("launch").is_err());
        assert!(parse_line("connect").is_err());
    }

    #[test]
    fn test_missing_text_reports_usage() {
        let err = parse_line("send").unwrap_err().to_string();
        assert_eq!(err, "usage: send <text>");
        let err = parse_line("raw  ").unwrap_err().to_string();
        assert_eq!(err, "usage: raw <text> [ms]");
    }
}
