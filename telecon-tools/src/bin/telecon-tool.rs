use clap::{Parser, Subcommand};
use telecon::console::{ConsoleError, Ingested, IngestReport};
use telecon::data::export::OUTBOUND_PREFIX;
use telecon::data::CommandCatalog;
use telecon::link::ConnectionError;
use telecon::Engine;
use telecon_tools::{init_logging, ConsoleOpts};

use chrono::Local;
use log::{debug, info};
use std::fs::File;
use std::io::{prelude::*, BufReader};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[command(
    name = "telecon-tool",
    version,
    about = "Send commands to an instrument and record its telemetry"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Send one or more commands and print what comes back
    Send {
        #[command(flatten)]
        opts: ConsoleOpts,

        /// Commands to send, in order
        #[arg(required = true)]
        commands: Vec<String>,

        /// How long to listen for replies after the last command
        #[arg(short = 'w', long = "wait-ms", default_value_t = 500)]
        wait_ms: u64,
    },
    /// Print telemetry as it arrives
    Watch {
        #[command(flatten)]
        opts: ConsoleOpts,

        /// Only print changes of these properties
        #[arg(short = 'P', long = "property")]
        properties: Vec<String>,

        /// Stop after this many frames
        #[arg(short = 'n', long = "count")]
        count: Option<usize>,

        /// Stop after this many seconds
        #[arg(short = 'd', long = "duration")]
        duration_s: Option<u64>,

        /// Write the event log here when done
        #[arg(short = 'o', long = "export")]
        export: Option<PathBuf>,
    },
    /// Feed a recorded event log through the console offline
    Replay {
        /// Event log, one frame per line
        file: PathBuf,

        /// Print the series of these properties
        #[arg(short = 'P', long = "property")]
        properties: Vec<String>,
    },
    /// List the command catalog
    Catalog {
        #[command(flatten)]
        opts: ConsoleOpts,

        /// Catalog file (default: the configured one, or the built-in list)
        #[arg(short = 'f', long = "file")]
        file: Option<PathBuf>,
    },
    /// Print the effective configuration as YAML
    Config {
        #[command(flatten)]
        opts: ConsoleOpts,
    },
}

fn connect(opts: &ConsoleOpts) -> Result<Engine, ConsoleError> {
    let config = opts.load_config()?;
    let mut engine = Engine::from_config(&config)?;
    let (host, port) = config.default_endpoint()?;
    let peer = engine.connect(host, port)?;
    info!("connected to {}", peer);
    Ok(engine)
}

fn print_report(engine: &Engine, report: &IngestReport, filter: &[String]) {
    let index = match &report.outcome {
        Ingested::PropertyChange { index, property } => {
            if !filter.is_empty() && !filter.contains(property) {
                return;
            }
            *index
        }
        Ingested::Ack { index } => {
            if !filter.is_empty() {
                return;
            }
            *index
        }
        Ingested::Dropped(err) => {
            debug!("not a frame: {}", err);
            return;
        }
    };
    if let Some(frame) = engine.log().get(index) {
        println!("[{}] {}", Local::now().format("%H:%M:%S%.3f"), frame);
    }
    if let Some(err) = &report.persistence {
        eprintln!("store: {}", err);
    }
}

fn send(opts: &ConsoleOpts, commands: Vec<String>, wait_ms: u64) -> Result<(), ConsoleError> {
    let mut engine = connect(opts)?;
    for command in &commands {
        engine.send(command)?;
        println!("{}{}", OUTBOUND_PREFIX, command);
    }

    let deadline = Instant::now() + Duration::from_millis(wait_ms);
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        for report in engine.pump(left.min(Duration::from_millis(50)))? {
            print_report(&engine, &report, &[]);
        }
    }
    engine.disconnect()?;
    Ok(())
}

fn watch(
    opts: &ConsoleOpts,
    properties: Vec<String>,
    count: Option<usize>,
    duration_s: Option<u64>,
    export: Option<PathBuf>,
) -> Result<(), ConsoleError> {
    let mut engine = connect(opts)?;
    let deadline = duration_s.map(|s| Instant::now() + Duration::from_secs(s));

    let result = loop {
        if count.is_some_and(|n| engine.log().len() >= n) {
            break Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            break Ok(());
        }
        match engine.pump(Duration::from_millis(100)) {
            Ok(reports) => {
                for report in &reports {
                    print_report(&engine, report, &properties);
                }
            }
            Err(err @ ConnectionError::Lost { .. }) => {
                eprintln!("{}", err);
                break Ok(());
            }
            Err(err) => break Err(err),
        }
    };

    if let Some(path) = export {
        let n = engine.export_log(&path)?;
        info!("wrote {} frames to {}", n, path.display());
    }
    Ok(result?)
}

fn replay(file: PathBuf, properties: Vec<String>) -> Result<(), ConsoleError> {
    let reader = BufReader::new(File::open(&file)?);
    let mut engine = Engine::default();
    let view = engine.open_view(properties.iter().cloned());

    let mut dropped = 0;
    for line in reader.lines() {
        if !engine.ingest_line(&line?).is_frame() {
            dropped += 1;
        }
    }
    println!(
        "{} frames, {} lines dropped, {} properties",
        engine.log().len(),
        dropped,
        engine.properties().len()
    );

    for (property, value) in engine.properties().iter() {
        println!("{:<24} {}", property, value);
    }

    if let Some(cursor) = engine.view(view) {
        for property in cursor.targets() {
            println!();
            println!("{}:", property);
            for point in cursor.series(property).unwrap_or_default() {
                println!("  {:.0}\t{}", point.time, point.value);
            }
        }
    }
    Ok(())
}

fn catalog(opts: &ConsoleOpts, file: Option<PathBuf>) -> Result<(), ConsoleError> {
    let config = opts.load_config()?;
    let catalog = match file.or(config.catalog_path) {
        Some(path) => CommandCatalog::load(path)?,
        None => CommandCatalog::default(),
    };
    for group in catalog.groups() {
        println!("[{}]", group.name);
        for entry in &group.entries {
            if entry.effect.is_empty() {
                println!("  {}", entry.command);
            } else {
                println!("  {:<24} {}", entry.command, entry.effect);
            }
        }
    }
    Ok(())
}

fn config(opts: &ConsoleOpts) -> Result<(), ConsoleError> {
    let config = opts.load_config()?;
    print!("{}", config.to_yaml()?);
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Send {
            opts,
            commands,
            wait_ms,
        } => send(&opts, commands, wait_ms),
        Commands::Watch {
            opts,
            properties,
            count,
            duration_s,
            export,
        } => watch(&opts, properties, count, duration_s, export),
        Commands::Replay { file, properties } => replay(file, properties),
        Commands::Catalog { opts, file } => catalog(&opts, file),
        Commands::Config { opts } => config(&opts),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::FAILURE
        }
    }
}
