//! Listener loop and process-level signal handling.
//!
//! `SIGHUP` triggers a config/accounts/usercommands/welcome reload in place
//! (`hub.py`'s admin-driven `$ReloadConfig` path, here wired to the
//! conventional Unix reload signal instead). `SIGINT`/`SIGTERM` drain the
//! hub task and exit.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::hub::{Hub, HubEvent, HubPaths};
use crate::limits::Limits;

pub async fn run(hub: Hub, port: u16, limits: Limits) -> std::io::Result<()> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "listening");

    let (hub_tx, hub_rx) = mpsc::channel(256);
    let hub_task = tokio::spawn(hub.run(hub_rx));

    let mut sighup = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())?;
    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                match accepted {
                    Ok((socket, addr)) => {
                        let hub_tx = hub_tx.clone();
                        let limits = limits.clone();
                        tokio::spawn(async move {
                            crate::io::handle_connection(socket, addr, hub_tx, limits).await;
                        });
                    }
                    Err(e) => error!(error = %e, "accept failed"),
                }
            }
            _ = sighup.recv() => {
                info!("received SIGHUP, reloading");
                let _ = hub_tx.send(HubEvent::Reload).await;
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, shutting down");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("received ctrl-c, shutting down");
                break;
            }
        }
    }

    drop(hub_tx);
    let _ = hub_task.await;
    Ok(())
}

pub fn paths_from(dir: &std::path::Path) -> HubPaths {
    HubPaths {
        config: dir.join("dchub.conf"),
        accounts: dir.join("dchub-accounts.conf"),
        usercommands: dir.join("dchub-usercommands.conf"),
        welcome: dir.join("welcome.txt"),
    }
}
