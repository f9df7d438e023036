use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use serde_json::{json, Map, Value};

use stevesroom::chat::{ChatLink, HttpChatClient};
use stevesroom::config::{RoomConfig, ENDPOINT_ENV};
use stevesroom::error_codes::{find_coded_error, CodedError};
use stevesroom::logging::init_logger;
use stevesroom::rehearsal::{parse_rehearsal_script, Rehearsal, ScriptedReplies};
use stevesroom::stage::StageSettings;
use stevesroom::timecodes::TimecodeTable;

#[derive(Debug, Parser)]
#[command(name = "stevesroom")]
#[command(version = env!("STEVESROOM_VERSION"))]
#[command(about = "Steve's Room: a looping-video conversation with a stuck artist")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Validate a timecode table and print its segments.
    Check {
        /// Timecode YAML; the built-in room table when omitted.
        #[arg(long)]
        timecodes: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Run a rehearsal script headless and print the transcript.
    Rehearse {
        script: PathBuf,
        #[arg(long)]
        config: Option<PathBuf>,
        /// Ask the chat service instead of using the script's replies.
        #[arg(long)]
        live: bool,
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Open the preview window.
    Play {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        endpoint: Option<String>,
    },
}

fn main() -> ExitCode {
    init_logger();
    let cli = Cli::parse();
    let json = matches!(cli.command, Commands::Check { json: true, .. });

    match run(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            report_error(&error, json);
            match find_coded_error(&error) {
                Some(coded) => ExitCode::from(coded.kind.exit_code()),
                None => ExitCode::FAILURE,
            }
        }
    }
}

fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Check { timecodes, json } => run_check(timecodes.as_deref(), json),
        Commands::Rehearse {
            script,
            config,
            live,
            endpoint,
        } => run_rehearse(&script, config.as_deref(), live, endpoint.as_deref()),
        Commands::Play { config, endpoint } => run_play(config.as_deref(), endpoint.as_deref()),
    }
}

fn report_error(error: &anyhow::Error, json: bool) {
    if !json {
        eprintln!("error: {error:#}");
        return;
    }

    let envelope = match find_coded_error(error) {
        Some(coded) => {
            let mut envelope = coded.envelope();
            envelope.error.message = format!("{error:#}");
            envelope
        }
        None => CodedError::runtime("ERROR", format!("{error:#}")).envelope(),
    };
    match serde_json::to_string_pretty(&envelope) {
        Ok(body) => println!("{body}"),
        Err(_) => eprintln!("error: {error:#}"),
    }
}

fn run_check(timecodes: Option<&Path>, json: bool) -> Result<()> {
    let (source, table) = match timecodes {
        Some(path) => (path.display().to_string(), TimecodeTable::load(path)?),
        None => ("built-in".to_owned(), TimecodeTable::room()),
    };

    if json {
        let loops = table
            .loops()
            .map(|(name, span)| (name.to_owned(), json!({ "start": span.start, "end": span.end })))
            .collect::<Map<String, Value>>();
        let transitions = table
            .transitions()
            .map(|(name, spec)| {
                (
                    name.to_owned(),
                    json!({
                        "start": spec.span.start,
                        "end": spec.span.end,
                        "next_state": spec.next.target(),
                    }),
                )
            })
            .collect::<Map<String, Value>>();
        let body = json!({
            "ok": true,
            "source": source,
            "loops": loops,
            "transitions": transitions,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "OK: {} ({} loops, {} transitions)",
        source,
        table.loops().count(),
        table.transitions().count()
    );
    for (name, span) in table.loops() {
        println!("loop        {name:<20} [{:>6.2}s, {:>6.2}s)", span.start, span.end);
    }
    for (name, spec) in table.transitions() {
        println!(
            "transition  {name:<20} [{:>6.2}s, {:>6.2}s) -> {}",
            spec.span.start,
            spec.span.end,
            spec.next.target().unwrap_or("(hold)")
        );
    }
    Ok(())
}

fn run_rehearse(
    script_path: &Path,
    config_path: Option<&Path>,
    live: bool,
    endpoint: Option<&str>,
) -> Result<()> {
    let config = RoomConfig::load_or_default(config_path)?;
    let table = config.timecode_table()?;
    let raw = fs::read_to_string(script_path)
        .with_context(|| format!("failed to read rehearsal script {}", script_path.display()))?;
    let steps = parse_rehearsal_script(&raw)
        .with_context(|| format!("invalid rehearsal script {}", script_path.display()))?;

    let rehearsal = Rehearsal::new(
        table,
        config.video_duration_secs,
        StageSettings::from(&config),
    );

    let report = if live {
        let endpoint = config.resolve_endpoint(endpoint, env::var(ENDPOINT_ENV).ok())?;
        info!("rehearsal: live replies from {endpoint}");
        let client = HttpChatClient::new(&endpoint, config.request_timeout())?;
        let mut link = ChatLink::new(client)?;
        rehearsal.run(&steps, &mut link)?
    } else {
        if endpoint.is_some() {
            warn!("rehearsal: --endpoint has no effect without --live");
        }
        let mut replies = ScriptedReplies::from_steps(&steps);
        let report = rehearsal.run(&steps, &mut replies)?;
        if replies.remaining() > 0 {
            warn!(
                "rehearsal: {} scripted replies were never used",
                replies.remaining()
            );
        }
        report
    };

    print!("{}", report.render());
    Ok(())
}

#[cfg(feature = "play")]
fn run_play(config_path: Option<&Path>, endpoint: Option<&str>) -> Result<()> {
    let config = RoomConfig::load_or_default(config_path)?;
    let endpoint = config.resolve_endpoint(endpoint, env::var(ENDPOINT_ENV).ok())?;
    stevesroom::play::run(config, endpoint)
}

#[cfg(not(feature = "play"))]
fn run_play(_config_path: Option<&Path>, _endpoint: Option<&str>) -> Result<()> {
    Err(anyhow::anyhow!(CodedError::usage(
        "FEATURE_DISABLED",
        "this build has no preview window; rebuild with --features play",
    )))
}
