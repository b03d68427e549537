//! Vigil Logtest - push events through the analysis engine one line at a time.
//!
//! Every stdin line is sent to the engine's logtest socket within one session
//! and the per-phase outcome is printed. With `-U` the last event's
//! `rule:alert:decoder` triple decides the exit status, which lets ruleset
//! test runners drive the tool non-interactively.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;
use vigil_core::logtest::{self, parse_unit_test, render_output, UnitTest};
use vigil_core::{FramedChannel, LogtestClient, PathsConfig, VIGIL_VERSION};

#[derive(Parser, Debug)]
#[command(name = "vigil-logtest")]
#[command(about = "Tool for developing, tuning, and debugging rules")]
#[command(disable_version_flag = true)]
struct Args {
    /// Version and license message
    #[arg(short = 'V')]
    version: bool,

    /// Execute in debug mode
    #[arg(short)]
    debug: bool,

    /// Unit test. Exits 0 when the last event matches
    #[arg(short = 'U', value_name = "rule:alert:decoder")]
    unit_test: Option<String>,

    /// Use custom location
    #[arg(short, value_name = "location", default_value = logtest::DEFAULT_LOCATION)]
    location: String,

    /// Quiet execution
    #[arg(short)]
    quiet: bool,

    /// Verbose (full) output/rule debugging
    #[arg(short)]
    verbose: bool,

    /// Logtest socket of the analysis engine
    #[arg(long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(&args);

    let code = run(args).await?;
    std::process::exit(code);
}

fn init_logging(args: &Args) {
    let level = if args.quiet {
        Level::ERROR
    } else if args.debug {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_target(false);
    if args.debug {
        builder.compact().init();
    } else {
        builder.without_time().with_level(false).init();
    }
}

async fn run(args: Args) -> Result<i32> {
    if args.version {
        info!("Vigil logtest v{}", VIGIL_VERSION);
        info!("Copyright (C) Vigil Contributors. Licensed under GPL-2.0-only.");
        return Ok(0);
    }

    let expected = match args.unit_test.as_deref().map(parse_unit_test).transpose() {
        Ok(expected) => expected,
        Err(e) => {
            error!("{}", e);
            return Ok(1);
        }
    };

    let options = if args.verbose {
        let mut options = serde_json::Map::new();
        options.insert("rules_debug".to_string(), serde_json::Value::Bool(true));
        Some(options)
    } else {
        None
    };

    let socket = args
        .socket
        .unwrap_or_else(|| PathsConfig::default().logtest_socket);
    let mut client = LogtestClient::new(channel(socket)?, args.location);

    info!("Starting vigil-logtest v{}", VIGIL_VERSION);
    info!("Type one log per line");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut session_token: Option<String> = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(event) = line else { break };
        if event.is_empty() {
            continue;
        }
        info!("");

        let reply = match client
            .process_log(&event, session_token.as_deref(), options.clone())
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                error!("** Vigil-logtest error {}", e);
                continue;
            }
        };

        if let Some(previous) = &session_token {
            if *previous != reply.token {
                warn!("New session was created with token \"{}\"", reply.token);
            }
        }

        let warnings: Vec<&String> = reply
            .messages
            .iter()
            .filter(|m| m.starts_with("WARNING"))
            .collect();
        for message in &warnings {
            warn!("** Vigil-logtest: {}", message);
        }
        if !warnings.is_empty() {
            warn!("");
        }

        session_token = Some(reply.token.clone());

        for line in render_output(&reply) {
            info!("{}", line);
        }

        if let Some(expected) = &expected {
            show_unit_test_result(expected, client.last_ut());
        }
    }

    client.remove_last_session().await;

    Ok(match &expected {
        Some(expected) if expected == client.last_ut() => 0,
        Some(_) => 1,
        None => 0,
    })
}

fn show_unit_test_result(expected: &UnitTest, actual: &UnitTest) {
    info!("");
    if expected == actual {
        info!("Unit test OK");
    } else {
        info!("Unit test FAIL. Expected {:?} , Result {:?}", expected, actual);
    }
}

#[cfg(unix)]
fn channel(socket: PathBuf) -> Result<FramedChannel> {
    Ok(FramedChannel::unix(socket))
}

#[cfg(not(unix))]
fn channel(socket: PathBuf) -> Result<FramedChannel> {
    anyhow::bail!("logtest socket {} requires Unix domain sockets", socket.display())
}
