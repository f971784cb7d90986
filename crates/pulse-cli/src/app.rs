//! Command execution

use std::time::Duration;

use tracing::info;

use pulse_core::{AuthSession, EngineId, PulseConfig, SessionHandle, UiRequest};
use pulse_runtime::RuntimeBuilder;

use crate::cli::{Cli, Commands};
use crate::config::to_toml;
use crate::error::Result;
use crate::keepalive::{KeepAliveEngine, PING};

/// Engine slot the keep-alive demo registers under
pub const KEEPALIVE_ENGINE: EngineId = EngineId::PRESENCE;

pub async fn execute(cli: Cli, config: PulseConfig) -> Result<()> {
    match cli.command {
        Commands::Run {
            duration,
            interval,
            user_id,
            session_id,
        } => {
            let session = SessionHandle::new();
            if let (Some(user_id), Some(session_id)) = (user_id, session_id) {
                session.establish(AuthSession {
                    user_id,
                    session_id,
                    secret: Vec::new(),
                });
            }
            run(config, session, Duration::from_secs(interval), duration.map(Duration::from_secs)).await
        }
        Commands::Config => {
            println!("{}", to_toml(&config)?);
            Ok(())
        }
        Commands::Check => {
            println!("configuration ok ({:?} transport)", config.mode);
            Ok(())
        }
    }
}

async fn run(
    config: PulseConfig,
    session: SessionHandle,
    interval: Duration,
    duration: Option<Duration>,
) -> Result<()> {
    let handle = RuntimeBuilder::new(config)
        .with_session(session)
        .with_engine(KeepAliveEngine::new(KEEPALIVE_ENGINE, interval))
        .build_and_start()
        .await?;

    handle.post_ui_request(KEEPALIVE_ENGINE, UiRequest::new(PING, Vec::new()))?;

    let mut states = handle.subscribe_connection_state();
    let until = async {
        match duration {
            Some(duration) => tokio::time::sleep(duration).await,
            None => std::future::pending().await,
        }
    };
    tokio::pin!(until);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                break;
            }
            _ = &mut until => break,
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                info!(%state, "connection");
            }
        }
    }

    let stats = handle.transport_stats();
    info!(
        frames_sent = stats.frames_sent,
        frames_received = stats.frames_received,
        heartbeats = stats.heartbeats_sent,
        "transport totals"
    );
    handle.shutdown().await;
    Ok(())
}
