//! Serpent Daemon - background training and live play service
//!
//! Runs training jobs on the blocking pool, tracks their progress in a
//! shared job table and serves clients over a JSON-lines TCP socket.
//!
//! Storage locations:
//! - Linux: ~/.local/share/serpent/
//! - Windows: %APPDATA%\serpent\
//! - MacOS: ~/Library/Application Support/serpent/

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod daemon;
mod jobs;
mod optimizer;
mod paths;
mod play;
mod policy;
mod protocol;
mod runner;
mod sampler;

use config::DaemonConfig;
use daemon::{send, DaemonState};
use paths::AppPaths;
use protocol::{Request, Response};

async fn handle_client(
    stream: TcpStream,
    state: Arc<DaemonState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let resp = Response::Error {
                    message: format!("Invalid request: {}", e),
                };
                send(&mut writer, &resp).await?;
                continue;
            }
        };

        if let Request::WatchJob {
            run_id,
            interval_ms,
        } = request
        {
            state.watch_job(&mut writer, run_id, interval_ms).await?;
            continue;
        }

        let response = state.handle_request(request).await;
        send(&mut writer, &response).await?;
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging (RUST_LOG, default info)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let paths = AppPaths::new()?;
    let config = DaemonConfig::load(&paths.config_file())?;
    info!("Data directory: {}", paths.data_dir().display());

    let listen_addr = config.listen_addr.clone();
    let state = Arc::new(DaemonState::new(config)?);

    // Ctrl-C: cancel live sessions, stop the loops, let the runtime drain.
    {
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C: shutting down");
                state.begin_shutdown();
            }
        });
    }

    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Serpent daemon listening on {}", listen_addr);

    // Play loop task
    let state_clone = Arc::clone(&state);
    tokio::spawn(async move {
        let frame_millis = u64::from((1000 / state_clone.config.target_fps.max(1)).max(1));
        let mut ticker = time::interval(Duration::from_millis(frame_millis));
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = state_clone.shutdown.cancelled() => break,
            }

            let mut play = state_clone.play.write().await;
            if play.is_running() {
                play.tick();
            }
        }
    });

    // Accept client connections
    loop {
        let (stream, addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = state.shutdown.cancelled() => break,
        };
        info!("Client connected: {}", addr);
        let state_clone = Arc::clone(&state);

        tokio::spawn(async move {
            if let Err(e) = handle_client(stream, state_clone).await {
                error!("Client handler error: {}", e);
            }
        });
    }

    let pending = state.drain(Duration::from_secs(5)).await;
    if pending > 0 {
        warn!("{} session(s) still winding down at exit", pending);
    }
    info!("Serpent daemon stopped");
    Ok(())
}
