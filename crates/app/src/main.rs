use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use clap::{Parser, Subcommand};
use speaker_hub_core::{
    AssetStore, HeadlessDisplay, Hub, HubConfig, HubError, SheetKind, SnapshotSettings, SoftMixer,
    SpriteSheet, StopHandle, SystemClock,
};
use tracing_subscriber::EnvFilter;

mod script;

use script::{Script, ScriptRunner};

/// Sprite sheets looked up in the assets directory.
const SHEETS: [(SheetKind, &str); 2] = [
    (SheetKind::Icons, "icons_256.png"),
    (SheetKind::Buttons, "buttons_256.png"),
];

fn main() -> speaker_hub_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            script,
            assets,
            frames,
            every,
        } => run(
            config.as_deref(),
            script.as_deref(),
            assets.as_deref(),
            frames,
            every,
        ),
        Commands::Defaults => print_defaults(),
    }
}

fn run(
    config: Option<&Path>,
    script: Option<&Path>,
    assets: Option<&Path>,
    frames: Option<PathBuf>,
    every: u32,
) -> speaker_hub_core::Result<()> {
    let config = load_config(config)?;
    tracing::info!(?script, ?assets, ?frames, "starting headless hub");

    let mut display = HeadlessDisplay::new(config.display.width, config.display.height);
    if let Some(dir) = frames {
        display = display.with_snapshots(SnapshotSettings { dir, every });
    }
    let probe = display.probe();

    let mut hub = Hub::new(
        config,
        Box::new(display),
        Box::new(SoftMixer::default()),
        Arc::new(SystemClock),
    )?;
    if let Some(dir) = assets {
        hub.set_assets(load_assets(dir)?);
    }

    let script = match script {
        Some(path) => Script::load(path)?,
        None => Script::demo(),
    };
    let mut runner = ScriptRunner::new(script, &mut hub);
    if let Some(listener) = runner.take_listener() {
        hub.attach_listener(Box::new(listener))?;
    }
    let stop = hub.stop_handle();
    install_interrupt_handler(stop.clone())?;
    let driver = runner.spawn(hub.buttons(), stop.clone())?;

    let result = hub.run();
    if result.is_err() {
        stop.force();
    }
    if driver.join().is_err() {
        tracing::error!("script driver panicked");
    }

    tracing::info!(frames = probe.frames_pushed(), "headless hub finished");
    result
}

/// First Ctrl-C or SIGTERM plays the outro, a second one skips it. Either
/// way the hub still tears down before the process exits.
fn install_interrupt_handler(stop: StopHandle) -> speaker_hub_core::Result<()> {
    ctrlc::set_handler(move || on_interrupt(&stop))
        .map_err(|err| HubError::msg(format!("could not install interrupt handler: {err}")))
}

fn on_interrupt(stop: &StopHandle) {
    if stop.is_stop_requested() {
        tracing::warn!("interrupted again, skipping outro");
        stop.force();
    } else {
        tracing::info!("interrupted, shutting down");
        stop.request_stop();
    }
}

fn load_config(path: Option<&Path>) -> speaker_hub_core::Result<HubConfig> {
    let Some(path) = path else {
        return Ok(HubConfig::default());
    };
    let text = fs::read_to_string(path)?;
    let config: HubConfig = serde_json::from_str(&text)?;
    tracing::debug!(?path, "configuration loaded");
    Ok(config)
}

fn load_assets(dir: &Path) -> speaker_hub_core::Result<AssetStore> {
    let mut store = AssetStore::new();
    for (kind, file) in SHEETS {
        let path = dir.join(file);
        if !path.exists() {
            tracing::warn!(?path, "sprite sheet missing, using drawn glyphs");
            continue;
        }
        let sheet = image::open(&path)?.to_rgba8();
        store.register_sheet(kind, SpriteSheet::new(sheet));
    }
    Ok(store)
}

fn print_defaults() -> speaker_hub_core::Result<()> {
    let text = serde_json::to_string_pretty(&HubConfig::default())?;
    println!("{text}");
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Status display hub for a multi-source speaker", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the hub against a headless display and a scripted scenario.
    Run {
        /// JSON configuration file; defaults apply to anything missing.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// JSON scenario to play instead of the built-in demo.
        #[arg(short, long)]
        script: Option<PathBuf>,
        /// Directory holding `icons_256.png` and `buttons_256.png`.
        #[arg(short, long)]
        assets: Option<PathBuf>,
        /// Write snapshots of pushed frames into this directory.
        #[arg(short, long)]
        frames: Option<PathBuf>,
        /// Keep every n-th pushed frame.
        #[arg(short, long, default_value_t = 30)]
        every: u32,
    },
    /// Print the default configuration as JSON.
    Defaults,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_interrupt_forces_the_stop() {
        let stop = StopHandle::default();
        on_interrupt(&stop);
        assert!(stop.is_stop_requested());
        assert!(!stop.is_forced());

        on_interrupt(&stop);
        assert!(stop.is_forced());
        on_interrupt(&stop);
        assert!(stop.is_forced());
    }

    #[test]
    fn cli_parses_run_options() {
        let cli = Cli::try_parse_from(["speaker-hub", "run", "--every", "5", "--frames", "out"]).unwrap();
        match cli.command {
            Commands::Run { every, frames, config, .. } => {
                assert_eq!(every, 5);
                assert_eq!(frames, Some(PathBuf::from("out")));
                assert!(config.is_none());
            }
            Commands::Defaults => panic!("expected the run subcommand"),
        }
    }
}
