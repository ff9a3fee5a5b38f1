//! Per-connection I/O task: owns the socket, decodes frames with
//! [`crate::frame::DcCodec`], and shuttles them to and from the `Hub`.
//!
//! The hub never touches a socket directly — every connection gets one of
//! these tasks, talking to the hub only through [`HubEvent`] and an
//! `mpsc::UnboundedSender<String>` for outbound lines, matching the
//! single-writer model described in SPEC_FULL.md's runtime section.

use std::net::SocketAddr;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::frame::DcCodec;
use crate::hub::HubEvent;
use crate::limits::Limits;

pub async fn handle_connection(socket: TcpStream, addr: SocketAddr, hub_tx: mpsc::Sender<HubEvent>, limits: Limits) {
    let codec = DcCodec::new(limits.maxcommandsize);
    let mut framed = Framed::new(socket, codec);

    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
    let (reply_tx, reply_rx) = oneshot::channel();
    if hub_tx
        .send(HubEvent::Connect { ip: addr.ip(), out_tx, reply: reply_tx })
        .await
        .is_err()
    {
        return;
    }
    let Ok(id) = reply_rx.await else { return };

    loop {
        tokio::select! {
            outbound = out_rx.recv() => {
                match outbound {
                    Some(line) => {
                        if framed.send(line).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = framed.next() => {
                match inbound {
                    Some(Ok(raw)) => {
                        if hub_tx.send(HubEvent::Frame { id, raw }).await.is_err() {
                            break;
                        }
                    }
                    Some(Err(crate::error::FrameError::TooLong(len))) => {
                        warn!(id, len, "frame too long, dropping connection");
                        let _ = hub_tx.send(HubEvent::FrameTooLong { id }).await;
                        break;
                    }
                    Some(Err(e)) => {
                        debug!(id, error = %e, "connection read error");
                        break;
                    }
                    None => break,
                }
            }
        }
    }

    let _ = hub_tx.send(HubEvent::Disconnect { id }).await;
}
