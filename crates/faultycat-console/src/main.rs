//! Interactive console for the FaultyCat board

mod repl;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use faultycat_core::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use repl::{parse_line, Console, ConsoleCommand};

#[derive(Parser, Debug)]
#[command(name = "faultycat", version, about = "Drive a FaultyCat board over USB serial")]
struct Args {
    /// Port to connect to on startup
    #[arg(short, long)]
    port: Option<String>,

    /// JSON config file (defaults to <config dir>/faultycat/config.json if present)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured baud rate
    #[arg(short, long)]
    baud: Option<u32>,

    /// Override the line terminator, with \n and \r escapes
    #[arg(short, long)]
    terminator: Option<String>,

    /// Print the USB serial ports and exit
    #[arg(short, long)]
    list: bool,
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("faultycat").join("config.json"))
}

fn unescape(s: &str) -> String {
    s.replace("\\r", "\r").replace("\\n", "\n")
}

fn load_config(args: &Args) -> Result<SessionConfig> {
    let mut config = match &args.config {
        Some(path) => SessionConfig::load(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => match default_config_path().filter(|p| p.exists()) {
            Some(path) => SessionConfig::load(&path)
                .with_context(|| format!("loading config from {}", path.display()))?,
            None => SessionConfig::default(),
        },
    };
    if let Some(baud) = args.baud {
        config.baud_rate = baud;
    }
    if let Some(t) = &args.terminator {
        config.line_terminator = unescape(t);
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.list {
        for port in filter_usb(list_ports()) {
            println!("{}\t{}", port.name, port.product.as_deref().unwrap_or("N/A"));
        }
        return Ok(());
    }

    let config = load_config(&args)?;
    info!(baud = config.baud_rate, "starting console");
    let mut console = Console::new(Session::serial(config));

    if let Some(port) = &args.port {
        match console.session.connect_serial(port).await {
            Ok(msg) => println!("{}", msg),
            Err(e) => error!(error = %e, "initial connect failed"),
        }
    }

    println!("FaultyCat console {}. Type help for commands.", faultycat_core::VERSION);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        stdout.write_all(b"?> ").await?;
        stdout.flush().await?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        let cmd = match parse_line(&line) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => continue,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        if cmd == ConsoleCommand::Quit {
            break;
        }

        match console.dispatch(cmd).await {
            Ok(out) if out.is_empty() => {}
            Ok(out) => println!("{}", out.trim_end()),
            Err(e) => eprintln!("error: {}", e),
        }
    }

    console.session.disconnect().await?;
    Ok(())
}
