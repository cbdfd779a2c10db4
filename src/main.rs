use std::sync::Arc;
use std::time::Duration;

use mc_manager::autostop::IdleWatcher;
use mc_manager::config::ManagerConfig;
use mc_manager::operator::Operator;
use mc_manager::protocol::query::QueryClient;
use mc_manager::supervisor::{ServerManager, ServerStatus};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("mc-manager starting");

    let cfg = ManagerConfig::load()?;
    tracing::info!("Server working directory: {}", cfg.server.working_dir.display());

    let manager = ServerManager::new(cfg.server.clone());

    // Idle watcher runs in the background for the whole daemon lifetime
    let watcher = if cfg.autostop.enabled {
        let watcher = Arc::new(IdleWatcher::new(manager.clone(), &cfg.autostop));
        watcher.reset_on_join();
        tokio::spawn(watcher.clone().run());
        Some(watcher)
    } else {
        tracing::info!("Idle auto-stop disabled");
        None
    };

    let query = cfg
        .query
        .enabled
        .then(|| QueryClient::new(cfg.query.host.clone(), cfg.query.port, cfg.query.timeout()));

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    tokio::spawn(async move {
        while let Some(msg) = out_rx.recv().await {
            println!("{}", msg);
        }
    });

    let operator = Operator::new(manager.clone(), watcher, query, cfg.operator.start_wait(), out_tx);
    println!("Type 'help' for a list of commands.");

    let mut input = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = input.next_line() => match line {
                Ok(Some(line)) => {
                    // 명령 처리 중에도 종료 시그널에 반응
                    let keep_going = tokio::select! {
                        keep = operator.handle_line(&line) => keep,
                        _ = shutdown_signal() => {
                            tracing::info!("Shutdown signal received");
                            false
                        }
                    };
                    if !keep_going {
                        break;
                    }
                }
                Ok(None) => {
                    // stdin 닫힘 (서비스로 실행 중), 시그널이 올 때까지 대기
                    shutdown_signal().await;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Failed to read operator input: {}", e);
                    shutdown_signal().await;
                    break;
                }
            },
            _ = shutdown_signal() => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    if manager.status() != ServerStatus::Stopped {
        tracing::info!("Terminating, stopping server if running...");
        if let Err(e) = manager.stop().await {
            tracing::warn!("Server stop reported: {}", e);
        }
    }

    // give the printer a moment to flush pending replies
    tokio::time::sleep(Duration::from_millis(50)).await;
    tracing::info!("mc-manager shutting down");
    Ok(())
}

/// Ctrl+C everywhere, SIGTERM on Unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                tracing::warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
