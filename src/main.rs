use std::{
    io::{self, BufRead},
    path::{Path, PathBuf},
    sync::mpsc::{self, Sender},
    thread,
    time::Duration,
};

use busbuddy::{
    AppConfig, BusBuddyError, JsonLinesChannel, LogNotifier, ManualPositionSource,
    PermissionStatus, PositionSample, PositionSource, RawFix, ReplayPositionSource, SessionConfig,
    StaticGrantor, TrackerEvent, TrackingSession,
    channel::Endpoint,
    tracking::{Control, RuntimeOptions, path_distance_km, run_tracker},
    writer,
};
use clap::{Parser, Subcommand, arg};
use log::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a live tracking session, controlled with start/pause/resume/stop/quit on stdin
    Track {
        /// Replay fixes from a JSON Lines recording instead of waiting for live ones
        #[arg(short, long)]
        replay: Option<PathBuf>,

        /// Delay between replayed fixes
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Realtime server address, overrides the configured one
        #[arg(short, long, conflicts_with = "telemetry_file")]
        server: Option<String>,

        /// Write telemetry frames to a file instead of a server
        #[arg(short, long)]
        telemetry_file: Option<PathBuf>,

        /// Record accepted fixes to a JSON Lines file
        #[arg(long)]
        record: Option<PathBuf>,

        #[arg(long)]
        session_id: Option<String>,

        #[arg(long, default_value_t = false)]
        deny_location: bool,

        #[arg(long, default_value_t = false)]
        deny_notifications: bool,
    },
    /// Print the travelled distance of a recording
    Distance {
        #[arg(short, long)]
        input: PathBuf,
    },
    /// Print the effective configuration
    Config {
        #[arg(long, default_value_t = false)]
        save: bool,
    },
}

struct TrackOptions {
    replay: Option<PathBuf>,
    interval_ms: Option<u64>,
    endpoint: Endpoint,
    record: Option<PathBuf>,
    grantor: StaticGrantor,
}

fn load_config() -> AppConfig {
    match AppConfig::from_local_file() {
        Ok(Some(config)) => config,
        Ok(None) => AppConfig::default(),
        Err(e) => {
            warn!("Ignoring unreadable config file: {}", e);
            AppConfig::default()
        }
    }
}

fn status(denied: bool) -> PermissionStatus {
    if denied {
        PermissionStatus::Denied
    } else {
        PermissionStatus::Granted
    }
}

fn track(config: AppConfig, options: TrackOptions) -> Result<(), BusBuddyError> {
    match &options.replay {
        Some(path) => {
            let mut source = ReplayPositionSource::from_file(path)?;
            if let Some(interval_ms) = options.interval_ms {
                source = source.with_interval(Duration::from_millis(interval_ms));
            }
            run_session(config, source, options)
        }
        None => {
            warn!("No position provider available, waiting for commands only");
            run_session(config, ManualPositionSource::new(), options)
        }
    }
}

fn run_session(
    config: AppConfig,
    source: impl PositionSource,
    mut options: TrackOptions,
) -> Result<(), BusBuddyError> {
    let (event_tx, event_rx) = mpsc::channel::<TrackerEvent>();

    let ctrlc_tx = event_tx.clone();
    ctrlc::set_handler(move || {
        println!("Exiting...");
        let _ = ctrlc_tx.send(TrackerEvent::Control(Control::Shutdown));
    })
    .map_err(|e| BusBuddyError::SignalHandlerError { source: e })?;

    // if we need to record fixes we spawn a writer and have the tracker tee accepted fixes to it
    let (recorder, writer_handle) = match options.record.take() {
        Some(output_file) => {
            let (fix_tx, fix_rx) = mpsc::channel::<RawFix>();
            let handle = thread::spawn(move || writer::write_fixes(&output_file, fix_rx));
            (Some(fix_tx), Some(handle))
        }
        None => (None, None),
    };

    let channel = JsonLinesChannel::new(options.endpoint.clone(), config.reconnect.clone())
        .with_inbound(event_tx.clone());
    let mut session = TrackingSession::new(
        SessionConfig::from(&config),
        source,
        LogNotifier::new(),
        channel,
        event_tx.clone(),
    );

    spawn_command_reader(event_tx.clone(), options.replay.is_none());
    let _ = event_tx.send(TrackerEvent::Control(Control::Start));

    let runtime_options = RuntimeOptions {
        tick_interval: Duration::from_millis(config.tick_interval_ms.max(1)),
        stop_when_exhausted: options.replay.is_some(),
    };
    let summaries = run_tracker(
        &mut session,
        &mut options.grantor,
        event_rx,
        recorder,
        &runtime_options,
    );

    for summary in &summaries {
        match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => warn!("Could not print session summary: {}", e),
        }
    }

    if let Some(handle) = writer_handle {
        match handle.join() {
            Ok(result) => {
                let written = result?;
                info!("Recorded {} fixes", written);
            }
            Err(_) => warn!("Fix writer thread panicked"),
        }
    }
    Ok(())
}

fn spawn_command_reader(event_tx: Sender<TrackerEvent>, quit_on_eof: bool) {
    thread::spawn(move || {
        for line in io::stdin().lock().lines() {
            let Ok(line) = line else {
                break;
            };
            let control = match line.trim() {
                "start" => Control::Start,
                "pause" => Control::Pause,
                "resume" => Control::Resume,
                "stop" => Control::Stop,
                "quit" | "exit" => Control::Shutdown,
                "" => continue,
                other => {
                    warn!("Unknown command '{}'", other);
                    continue;
                }
            };
            if event_tx.send(TrackerEvent::Control(control)).is_err() {
                return;
            }
        }
        if quit_on_eof {
            let _ = event_tx.send(TrackerEvent::Control(Control::Shutdown));
        }
    });
}

fn distance(input: &Path) -> Result<(), BusBuddyError> {
    let replay = ReplayPositionSource::from_file(input)?;
    let samples: Vec<PositionSample> = replay
        .fixes()
        .iter()
        .copied()
        .map(PositionSample::from)
        .collect();
    println!("{:.3} km over {} fixes", path_distance_km(&samples), samples.len());
    Ok(())
}

fn config(save: bool) -> Result<(), BusBuddyError> {
    let config = load_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| BusBuddyError::ConfigSerializeError { source: e })?;
    println!("{}", json);
    if save {
        let path = config.save()?;
        println!("Saved to {:?}", path);
    }
    Ok(())
}

fn main() {
    #[cfg(debug_assertions)]
    colog::init();

    let cli = Args::parse();
    match cli.command {
        Commands::Track {
            replay,
            interval_ms,
            server,
            telemetry_file,
            record,
            session_id,
            deny_location,
            deny_notifications,
        } => {
            let mut app_config = load_config();
            if session_id.is_some() {
                app_config.session_id = session_id;
            }
            let endpoint = match telemetry_file {
                Some(path) => Endpoint::File(path),
                None => Endpoint::Tcp(server.unwrap_or_else(|| app_config.server_address.clone())),
            };
            let options = TrackOptions {
                replay,
                interval_ms,
                endpoint,
                record,
                grantor: StaticGrantor::new(status(deny_location), status(deny_notifications)),
            };
            track(app_config, options).expect("Error while tracking");
        }
        Commands::Distance { input } => {
            distance(&input).expect("Error while measuring recording");
        }
        Commands::Config { save } => {
            config(save).expect("Error while handling config");
        }
    };
}
