//! Headless loto client: follows the server stream with simulated audio devices
//! and reads caller commands from standard input.

use std::sync::Arc;

use anyhow::Context;
use loto_sync::{
    audio::SimulatedDevice,
    client::StateChannel,
    config::ClientConfig,
    dto::snapshot::Number,
    queue::{FileStorage, LocalStorage},
    sync::{BoardView, ClientRole, EngineHandle, EngineSetup, Notice, VolumeChange, spawn_engine},
};
use tokio::{
    io::{AsyncBufReadExt, BufReader},
    sync::{broadcast, mpsc, watch},
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ClientConfig::load();
    info!(server = %config.server_url, role = %config.role, "starting client");

    let channel = StateChannel::new(&config.server_url, config.reconnect_delay)
        .context("building HTTP client")?;

    let storage: Option<Box<dyn LocalStorage>> = match config.role {
        ClientRole::Caller => match FileStorage::open(&config.storage_path) {
            Ok(storage) => Some(Box::new(storage)),
            Err(err) => {
                warn!(error = %err, "queue will not survive a restart");
                None
            }
        },
        ClientRole::Display => None,
    };

    let background = SimulatedDevice::new();
    let call = SimulatedDevice::new();
    background.handle().set_default_duration(config.simulated_duration);
    call.handle().set_default_duration(config.simulated_duration);

    let (snapshots_tx, snapshots_rx) = mpsc::channel(16);
    let subscription = channel.subscribe(snapshots_tx);
    let (engine, task) = spawn_engine(
        EngineSetup {
            config: config.engine_config(),
            role: config.role,
            api: Arc::new(channel),
            background: Box::new(background),
            call: Box::new(call),
            storage,
        },
        snapshots_rx,
    );

    tokio::spawn(log_notices(engine.subscribe_notices()));
    tokio::spawn(log_board(engine.context().watch_board()));

    tokio::select! {
        result = run_console(&engine) => result?,
        _ = shutdown_signal() => info!("shutdown requested"),
    }

    subscription.abort();
    if engine.shutdown().await.is_ok() {
        task.await.context("joining sync engine")?;
    }
    Ok(())
}

/// One line typed on the console.
#[derive(Debug, Clone, PartialEq)]
enum ConsoleCommand {
    Add(i64),
    Random,
    Remove(usize),
    Clear,
    Skip,
    Pause,
    Background(bool),
    Special { url: String, mute: bool },
    Volume(VolumeChange),
    Mute(bool),
    Resume,
    Reset,
    Queue,
    Status,
    Quit,
}

const HELP: &str = "commands: add N | random | remove I | clear | skip | pause | bg on|off | \
special URL [mute] | volume bg|call|duck|rate V | mute on|off | resume | reset | queue | status | quit";

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return Err(HELP.into());
    };
    let argument = words.next();

    let command = match (verb.to_ascii_lowercase().as_str(), argument) {
        ("add", Some(value)) => ConsoleCommand::Add(
            value
                .parse()
                .map_err(|_| format!("`{value}` is not a number"))?,
        ),
        ("random", None) => ConsoleCommand::Random,
        ("remove", Some(index)) => ConsoleCommand::Remove(
            index
                .parse()
                .map_err(|_| format!("`{index}` is not a queue position"))?,
        ),
        ("clear", None) => ConsoleCommand::Clear,
        ("skip", None) => ConsoleCommand::Skip,
        ("pause", None) => ConsoleCommand::Pause,
        ("bg", Some(switch)) => ConsoleCommand::Background(parse_switch(switch)?),
        ("special", Some(url)) => ConsoleCommand::Special {
            url: url.to_string(),
            mute: words.next() == Some("mute"),
        },
        ("volume", Some(which)) => {
            let raw = words.next().ok_or("volume needs a value")?;
            let value = raw
                .parse::<f64>()
                .map_err(|_| format!("`{raw}` is not a value"))?;
            let change = match which {
                "bg" => VolumeChange::Background(value),
                "call" => VolumeChange::Call(value),
                "duck" => VolumeChange::Duck(value),
                "rate" => VolumeChange::Rate(value),
                other => return Err(format!("unknown setting `{other}`")),
            };
            ConsoleCommand::Volume(change)
        }
        ("mute", Some(switch)) => ConsoleCommand::Mute(parse_switch(switch)?),
        ("resume", None) => ConsoleCommand::Resume,
        ("reset", None) => ConsoleCommand::Reset,
        ("queue", None) => ConsoleCommand::Queue,
        ("status", None) => ConsoleCommand::Status,
        ("quit" | "exit", None) => ConsoleCommand::Quit,
        _ => return Err(HELP.into()),
    };
    Ok(command)
}

fn parse_switch(value: &str) -> Result<bool, String> {
    match value {
        "on" => Ok(true),
        "off" => Ok(false),
        other => Err(format!("expected on or off, got `{other}`")),
    }
}

/// Read commands until end of input or `quit`.
async fn run_console(engine: &EngineHandle) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("reading console")? {
        if line.trim().is_empty() {
            continue;
        }
        let command = match parse_command(&line) {
            Ok(ConsoleCommand::Quit) => break,
            Ok(command) => command,
            Err(message) => {
                println!("{message}");
                continue;
            }
        };
        if let Err(err) = execute(engine, command).await {
            println!("{err}");
        }
    }
    Ok(())
}

async fn execute(engine: &EngineHandle, command: ConsoleCommand) -> anyhow::Result<()> {
    match command {
        ConsoleCommand::Add(number) => {
            let length = engine.enqueue(number).await?;
            println!("queued {number:02} ({length} waiting)");
        }
        ConsoleCommand::Random => {
            let number = engine.enqueue_random().await?;
            println!("queued {number}");
        }
        ConsoleCommand::Remove(index) => {
            let number = engine.remove(index).await?;
            println!("removed {number}");
        }
        ConsoleCommand::Clear => engine.clear_queue().await?,
        ConsoleCommand::Skip => engine.skip().await?,
        ConsoleCommand::Pause => engine.toggle_pause().await?,
        ConsoleCommand::Background(enabled) => engine.set_background_music(enabled).await?,
        ConsoleCommand::Special { url, mute } => engine.play_special(url, mute).await?,
        ConsoleCommand::Volume(change) => {
            let settings = engine.adjust_volume(change).await?;
            println!(
                "bg {:.2} call {:.2} duck {:.2} rate {:.2}",
                settings.bg_volume, settings.call_volume, settings.duck_level, settings.playback_rate
            );
        }
        ConsoleCommand::Mute(muted) => engine.set_local_mute(muted).await?,
        ConsoleCommand::Resume => engine.confirm_resume().await?,
        ConsoleCommand::Reset => engine.reset().await?,
        ConsoleCommand::Queue => {
            let status = engine.status().await?;
            println!("queue: {}", join(&status.queue));
            if let Some(number) = status.processing {
                println!("in flight: {number}");
            }
        }
        ConsoleCommand::Status => {
            let status = engine.status().await?;
            println!("{status:#?}");
        }
        ConsoleCommand::Quit => {}
    }
    Ok(())
}

fn join(numbers: &[Number]) -> String {
    if numbers.is_empty() {
        return "(empty)".into();
    }
    numbers
        .iter()
        .map(Number::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

async fn log_notices(mut notices: broadcast::Receiver<Notice>) {
    loop {
        match notices.recv().await {
            Ok(Notice::Status(message)) => info!("{message}"),
            Ok(Notice::Warning(message)) => warn!("{message}"),
            Ok(Notice::ResumeRequired) => warn!("audio blocked; type `resume` to continue"),
            Ok(Notice::CallFinished { number, play_id, reason }) => {
                info!(play_id, number = ?number, ?reason, "announcement finished");
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => warn!(skipped, "notices dropped"),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn log_board(mut board: watch::Receiver<BoardView>) {
    while board.changed().await.is_ok() {
        let view = board.borrow_and_update().clone();
        info!(
            called = %view.counter_label(),
            latest = ?view.latest,
            status = ?view.status,
            paused = view.is_paused,
            "board updated"
        );
    }
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {},
                    _ = term.recv() => {},
                }
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
