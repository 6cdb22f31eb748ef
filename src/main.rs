//! Application entry point: WanderFM.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Parse arguments and load [`AppConfig`] (defaults on first run).
//!    `--init-config` writes the effective settings and exits here.
//! 3. Create the [`tokio`] runtime (multi-thread, 2 workers).
//! 4. Seed [`SharedState`] from arguments and an optional city weather lookup.
//! 5. Build the orchestrator around the Lyria service and the audio output.
//! 6. Read control commands from stdin until `quit`, EOF or Ctrl-C, then
//!    stop playback before exiting.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use wanderfm::{
    audio::{AudioOutput, CpalOutput, NullOutput},
    config::AppConfig,
    context::{PlaceClient, WeatherClient},
    control::{parse_command, Command, ParseError, HELP},
    generation::LyriaService,
    pipeline::{Orchestrator, SharedState},
};

#[derive(Debug, Parser)]
#[command(name = "wanderfm", version, about = "Context-steered generative music player")]
struct Args {
    /// Settings file (defaults to the platform config directory).
    #[arg(long, env = "WANDERFM_CONFIG")]
    config: Option<PathBuf>,

    /// Initial tempo, clamped to 60-180.
    #[arg(long)]
    bpm: Option<i32>,

    #[arg(long)]
    genre: Option<String>,

    /// Mood or activity, e.g. "focus" or "winding down".
    #[arg(long)]
    experience: Option<String>,

    /// Look up current weather for this city at startup.
    #[arg(long)]
    city: Option<String>,

    /// Stream without opening an audio device.
    #[arg(long)]
    no_audio: bool,

    /// Start playback immediately.
    #[arg(long)]
    autostart: bool,

    /// Write the effective settings to the settings file and exit.
    #[arg(long)]
    init_config: bool,
}

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 2. Arguments + config
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load_from(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => AppConfig::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config ({e}); using defaults");
            AppConfig::default()
        }),
    };
    log::info!("WanderFM starting up");

    if args.init_config {
        return write_config(&args, &config);
    }

    // 3. Tokio runtime
    let rt = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(args, config))
}

fn write_config(args: &Args, config: &AppConfig) -> anyhow::Result<()> {
    match &args.config {
        Some(path) => config.save_to(path)?,
        None => config.save()?,
    }
    println!("settings written");
    Ok(())
}

async fn run(args: Args, config: AppConfig) -> anyhow::Result<()> {
    // 4. Control inputs
    let state = SharedState::new(&config.control);
    if let Some(bpm) = args.bpm {
        state.set_bpm(bpm);
    }
    if let Some(genre) = &args.genre {
        state.set_genre(genre).context("--genre")?;
    }
    if let Some(experience) = &args.experience {
        state.set_experience(experience).context("--experience")?;
    }

    let weather = WeatherClient::from_config(&config.weather);
    let places = PlaceClient::from_config(&config.place);
    if let Some(city) = args.city.as_ref().or(config.weather.city.as_ref()) {
        lookup_weather(&weather, &state, city).await;
    }

    // 5. Orchestrator
    let api_key = config.generation.resolved_api_key().ok_or_else(|| {
        anyhow!("no API key: set generation.api_key in settings.toml or GOOGLE_API_KEY")
    })?;
    let service = Arc::new(LyriaService::new(config.generation.clone(), api_key));
    let output: Arc<dyn AudioOutput> = if args.no_audio || !config.playback.enabled {
        log::info!("Audio output disabled; chunks are drained without playback");
        Arc::new(NullOutput)
    } else {
        Arc::new(CpalOutput)
    };
    let orchestrator = Orchestrator::new(state.clone(), service, output, &config);

    if args.autostart {
        spawn_start(&orchestrator);
    }

    // 6. Control loop
    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        let line = tokio::select! {
            _ = &mut ctrl_c => {
                log::info!("Interrupted");
                break;
            }
            line = lines.next_line() => line,
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                log::warn!("Failed to read stdin: {e}");
                break;
            }
        };

        let command = match parse_command(&line) {
            Ok(command) => command,
            Err(ParseError::Empty) => continue,
            Err(e) => {
                println!("{e}");
                continue;
            }
        };
        if command == Command::Quit {
            break;
        }
        handle(command, &orchestrator, &state, &weather, &places).await;
    }

    orchestrator.stop().await;
    log::info!("WanderFM stopped");
    Ok(())
}

async fn handle(
    command: Command,
    orchestrator: &Orchestrator,
    state: &SharedState,
    weather: &WeatherClient,
    places: &PlaceClient,
) {
    match command {
        Command::Start => spawn_start(orchestrator),
        Command::Stop => {
            orchestrator.stop().await;
            println!("stopped");
        }
        Command::Status => match serde_json::to_string_pretty(&orchestrator.status()) {
            Ok(json) => println!("{json}"),
            Err(e) => log::error!("Failed to serialise status: {e}"),
        },
        Command::Help => println!("{HELP}"),
        Command::City(city) => lookup_weather(weather, state, &city).await,
        Command::Locate {
            latitude,
            longitude,
        } => locate(weather, places, state, latitude, longitude).await,
        other => {
            if let Err(e) = other.apply_to(state) {
                println!("rejected: {e}");
            }
        }
    }
}

/// Start playback without blocking the control loop.
fn spawn_start(orchestrator: &Orchestrator) {
    let orchestrator = orchestrator.clone();
    tokio::spawn(async move {
        match orchestrator.start().await {
            Ok(()) => println!("playing"),
            Err(e) => println!("start failed: {e}"),
        }
    });
}

async fn locate(
    weather: &WeatherClient,
    places: &PlaceClient,
    state: &SharedState,
    latitude: f64,
    longitude: f64,
) {
    let (conditions, place) = tokio::join!(
        weather.current(latitude, longitude),
        places.locate(latitude, longitude)
    );
    match conditions {
        Ok(conditions) => state.set_weather_value(conditions),
        Err(e) => log::warn!("Weather lookup for ({latitude}, {longitude}) failed: {e}"),
    }
    match place {
        Ok(place) => {
            if let Err(e) = state.set_place(&place.name, place.category.as_deref()) {
                println!("rejected: {e}");
            }
        }
        Err(e) => log::warn!("Place lookup for ({latitude}, {longitude}) failed: {e}"),
    }
}

async fn lookup_weather(client: &WeatherClient, state: &SharedState, city: &str) {
    match client.for_city(city).await {
        Ok(weather) => state.set_weather_value(weather),
        Err(e) => log::warn!("Weather lookup for {city} failed: {e}"),
    }
}
