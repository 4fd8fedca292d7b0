use clap::Parser;
use config::Config;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};
use zaptv::{
    channels::{build_lineup, CatalogConfig},
    controller::{Command, PlaybackConfig, PlaybackController},
    create_app,
    metrics::MonitoringConfig,
    player::{run_sink_events, Player, SharedPlayer},
    sink::{build_sink, SinkConfig, SinkKind},
    source::{load_all, SourcesConfig},
    SearchSource,
};

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(long, default_value = "config.toml")]
    config: String,

    /// Category to open the session with
    #[arg(long)]
    category: Option<String>,

    /// Sink used to try stream candidates (overrides config)
    #[arg(long)]
    sink: Option<SinkKind>,
}

#[derive(Debug, Deserialize)]
struct Settings {
    #[serde(default)]
    server: ServerConfig,
    #[serde(default)]
    sources: SourcesConfig,
    #[serde(default)]
    catalog: CatalogConfig,
    #[serde(default)]
    playback: PlaybackConfig,
    #[serde(default)]
    sink: SinkConfig,
    #[serde(default)]
    monitoring: MonitoringConfig,
}

#[derive(Debug, Deserialize)]
struct ServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

/// Resolves a configured file to the directory to watch and the path events will carry.
///
/// Directories are watched instead of files so that files created later, or
/// replaced by an editor's rename-on-save, still trigger a reload.
fn watch_target(file: &str) -> anyhow::Result<(PathBuf, PathBuf)> {
    let path = Path::new(file);
    let name = path
        .file_name()
        .ok_or_else(|| anyhow::anyhow!("{file} does not name a file"))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let dir = std::fs::canonicalize(dir)?;
    let target = dir.join(name);
    Ok((dir, target))
}

fn watch_sources(
    files: &[String],
    sources: SourcesConfig,
    catalog: CatalogConfig,
    client: reqwest::Client,
    player: SharedPlayer,
) -> anyhow::Result<RecommendedWatcher> {
    let mut dirs = Vec::new();
    let mut targets = Vec::new();
    for file in files {
        match watch_target(file) {
            Ok((dir, target)) => {
                if !dirs.contains(&dir) {
                    dirs.push(dir);
                }
                targets.push(target);
            }
            Err(e) => warn!("Not watching {}: {}", file, e),
        }
    }

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| {
        if let Ok(event) = res {
            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                && event.paths.iter().any(|p| targets.contains(p))
            {
                let _ = tx.send(event);
            }
        }
    })?;

    for dir in &dirs {
        match watcher.watch(dir, RecursiveMode::NonRecursive) {
            Ok(()) => info!("Watching {} for channel file changes", dir.display()),
            Err(e) => warn!("Failed to watch {}: {}", dir.display(), e),
        }
    }

    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            // Editors write in bursts; settle before re-reading.
            tokio::time::sleep(Duration::from_millis(300)).await;
            while rx.try_recv().is_ok() {}

            info!("Channel source changed ({:?}), reloading", event.paths);
            let records = load_all(&sources, &client).await;
            let (channels, categories) = build_lineup(&records, &catalog);
            if channels.is_empty() {
                warn!("Reload produced no channels, keeping the current list");
                continue;
            }
            player.lock().await.reload(channels, &categories);
        }
    });

    Ok(watcher)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    // Load configuration
    let settings = Config::builder()
        .add_source(config::File::with_name(&args.config))
        .build()?;
    let mut settings: Settings = settings.try_deserialize()?;

    info!("Configuration loaded from {}: {:?}", args.config, settings);

    if let Some(kind) = args.sink {
        settings.sink.kind = kind;
    }

    let client = reqwest::Client::builder().build()?;
    let records = load_all(&settings.sources, &client).await;
    let (channels, categories) = build_lineup(&records, &settings.catalog);

    if channels.is_empty() {
        error!("No channels loaded from any source. The session will stay idle.");
    }
    info!(
        "Total channels: {} from {} raw records, categories: {:?}",
        channels.len(),
        records.len(),
        categories
    );

    let controller = PlaybackController::init(
        channels,
        &categories,
        &settings.catalog.all_label,
        settings.playback.clone(),
    );

    let (events_tx, events_rx) = tokio::sync::mpsc::unbounded_channel();
    let sink = build_sink(&settings.sink, events_tx.clone())?;
    info!("Using {:?} sink", settings.sink.kind);

    let player = Player::new(controller, sink).shared();
    tokio::spawn(run_sink_events(player.clone(), events_rx));

    {
        let mut p = player.lock().await;
        if let Some(category) = args.category {
            let outcome = p.apply(Command::SetCategory { category: category.clone() });
            info!("Opening category \"{}\": {:?}", category, outcome);
        }
        // No-op when the category switch already started a load.
        p.start();
    }

    let _watcher = if settings.sources.watch && !settings.sources.files.is_empty() {
        Some(watch_sources(
            &settings.sources.files,
            settings.sources.clone(),
            settings.catalog.clone(),
            client.clone(),
            player.clone(),
        )?)
    } else {
        None
    };

    let search = settings.sources.api_url.is_some().then(|| SearchSource {
        client: client.clone(),
        sources: settings.sources.clone(),
        catalog: settings.catalog.clone(),
    });
    let app = create_app(player, events_tx, settings.monitoring, search);

    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_target_resolves_missing_file() {
        let dir = std::env::temp_dir().join(format!("zaptv-watch-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("later.m3u");

        let (watched, target) = watch_target(file.to_str().unwrap()).unwrap();
        assert_eq!(watched, std::fs::canonicalize(&dir).unwrap());
        assert_eq!(target, watched.join("later.m3u"));
        assert!(!target.exists());

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_watch_target_relative_and_invalid() {
        let (dir, target) = watch_target("channels.m3u").unwrap();
        assert_eq!(dir, std::env::current_dir().unwrap().canonicalize().unwrap());
        assert_eq!(target, dir.join("channels.m3u"));

        assert!(watch_target("/no/such/zaptv/dir/channels.m3u").is_err());
        assert!(watch_target("..").is_err());
    }
}
