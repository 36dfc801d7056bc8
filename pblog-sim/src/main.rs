use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{debug, info};

use pblog_sim::config::{PARAM_CHANNELS, PARAM_LOG_FILE};
use pblog_sim::host::{MemoryHost, SimModule};
use pblog_sim::recording::{inspect, LogInfo, LogManager};
use pblog_sim::Player;

#[derive(Parser, Debug)]
#[command(name = "pblog", version, about = "Inspect and replay simulation logs")]
struct Cli {
    #[clap(flatten)]
    verbose: clap_verbosity_flag::Verbosity<clap_verbosity_flag::InfoLevel>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List the logs in a folder, newest first
    List {
        /// Log folder, defaults to the recorder's default folder
        #[arg(short, long)]
        folder: Option<PathBuf>,

        /// Print JSON instead of a table
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Summarize one log
    Info {
        file: PathBuf,

        /// Print JSON instead of text
        #[arg(long, default_value_t = false)]
        json: bool,
    },

    /// Replay a log against an in-memory host and print every published message
    Replay {
        file: PathBuf,

        /// Simulation step length
        #[arg(long, default_value_t = 10)]
        step_ms: u64,

        /// Topics to play, separated by `||`
        #[arg(short, long)]
        channels: Option<String>,

        /// Give up after this many steps
        #[arg(long, default_value_t = 1_000_000)]
        max_steps: u64,

        /// Sleep one step length between steps
        #[arg(long, default_value_t = false)]
        realtime: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.verbose.log_level_filter())
        .parse_default_env()
        .init();
    debug!("pblog {}", pblog_sim::VERSION);

    match cli.command {
        Command::List { folder, json } => list(folder, json),
        Command::Info { file, json } => {
            let log = inspect(&file).with_context(|| format!("Cannot read {}", file.display()))?;
            if json {
                println!("{}", serde_json::to_string_pretty(&log)?);
            } else {
                print_info(&log);
            }
            Ok(())
        }
        Command::Replay {
            file,
            step_ms,
            channels,
            max_steps,
            realtime,
        } => replay(file, step_ms, channels, max_steps, realtime),
    }
}

fn list(folder: Option<PathBuf>, json: bool) -> Result<()> {
    let manager = match folder {
        Some(folder) => LogManager::with_base_dir(folder),
        None => LogManager::new(),
    };
    let logs = manager.list_logs();

    if json {
        println!("{}", serde_json::to_string_pretty(&logs)?);
        return Ok(());
    }

    println!("{} logs in {}", logs.len(), manager.base_dir().display());
    for log in &logs {
        println!(
            "{:<40} {:>10} bytes {:>8} records {:>10} ms  {}",
            log.filename, log.size, log.record_count, log.duration_ms, log.scenario_path
        );
    }
    Ok(())
}

fn print_info(log: &LogInfo) {
    println!("File:        {} ({} bytes)", log.path.display(), log.size);
    println!("Scenario:    {}", log.scenario_path);
    println!("Ego groups:  {}", log.ego_groups.join(", "));
    println!("Topics:      {}", log.topics.join(", "));
    println!(
        "Records:     {}{}",
        log.record_count,
        if log.complete { "" } else { " (ends in a bad record)" }
    );
    println!("Duration:    {} ms", log.duration_ms);
    println!("Channels:");
    for (channel, count) in &log.channels {
        println!("  {:<40} {:>8}", channel, count);
    }
}

fn replay(
    file: PathBuf,
    step_ms: u64,
    channels: Option<String>,
    max_steps: u64,
    realtime: bool,
) -> Result<()> {
    let mut host = MemoryHost::new().with_parameter(PARAM_LOG_FILE, file.display().to_string());
    if let Some(channels) = channels {
        host = host.with_parameter(PARAM_CHANNELS, channels);
    }

    let mut player = Player::new();
    player.init(&mut host)?;
    player
        .reset(&mut host)
        .with_context(|| format!("Cannot replay {}", file.display()))?;

    let step_ms = step_ms.max(1);
    let mut steps = 0;
    while steps < max_steps && host.stop_requests().is_empty() {
        host.set_timestamp((steps * step_ms) as i64);
        player.step(&mut host)?;
        for message in host.take_published() {
            println!(
                "{:>10} ms  {:<40} {:>8} bytes",
                message.timestamp_ms,
                message.topic,
                message.payload.len()
            );
        }
        steps += 1;
        if realtime {
            thread::sleep(Duration::from_millis(step_ms));
        }
    }

    info!(
        "Published {} events in {} steps of {} ms",
        player.published_count(),
        steps,
        step_ms
    );
    player.stop()?;
    Ok(())
}
