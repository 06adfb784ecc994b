//! Per-link plumbing: handshake, framing, send/receive loops, reconnect.
//!
//! Link lifecycle: Connecting -> Connected -> (Failed -> ReconnectScheduled
//! -> Connecting) or Closed on mesh shutdown. Reconnects re-run the same
//! self/duplicate checks as the first dial, so a peer that re-established
//! itself inbound in the meantime is not double-connected.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::stream::{SplitSink, StreamExt as _};
use futures::SinkExt as _;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tracing::{debug, warn};

use crate::identity::PeerIdentity;
use crate::protocol::PeerMessage;

use super::{LinkHandle, MeshInner};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(1);
/// Backoff stops doubling after this many attempts (1s, 2s, 4s, 8s, 16s).
const RECONNECT_MAX_EXPONENT: u32 = 4;

type WireStream = Framed<TcpStream, LengthDelimitedCodec>;
type WireSink = SplitSink<WireStream, Bytes>;

pub(super) fn spawn_dial(inner: Arc<MeshInner>, addr: String, attempt: u32) {
    tokio::spawn(async move {
        dial(inner, addr, attempt).await;
    });
}

async fn dial(inner: Arc<MeshInner>, addr: String, attempt: u32) {
    if inner.closed() {
        return;
    }
    // Self and duplicate checks run again on every retry: the peer may have
    // connected to us inbound while the reconnect timer was pending.
    let identity = PeerIdentity::normalize(&addr);
    if identity == inner.identity {
        return;
    }
    if inner.links().contains_key(&identity) {
        debug!("{identity} already linked, cancelling dial to {addr}");
        return;
    }
    match TcpStream::connect(&addr).await {
        Ok(stream) => {
            debug!("connected out to {addr}");
            let framed = Framed::new(stream, LengthDelimitedCodec::new());
            run_link(inner, framed, identity, Some(addr), None).await;
        }
        Err(e) => {
            warn!("failed to connect to {addr}: {e}");
            schedule_reconnect(inner, addr, attempt + 1);
        }
    }
}

fn schedule_reconnect(inner: Arc<MeshInner>, addr: String, attempt: u32) {
    if inner.closed() {
        return;
    }
    let delay =
        RECONNECT_BASE_DELAY * 2u32.pow(attempt.saturating_sub(1).min(RECONNECT_MAX_EXPONENT));
    debug!("reconnecting to {addr} in {delay:?} (attempt {attempt})");
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        dial(inner, addr, attempt).await;
    });
}

/// Serve a connection accepted by the listener. The first frame decides the
/// link identity: a Hello keys it by the peer's self-reported listen address;
/// anything else falls back to the transport-observed address.
pub(super) async fn run_inbound(inner: Arc<MeshInner>, stream: TcpStream, addr: SocketAddr) {
    let mut framed = Framed::new(stream, LengthDelimitedCodec::new());
    let (identity, carried) =
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, framed.next()).await {
            Ok(Some(Ok(bytes))) => match postcard::from_bytes::<PeerMessage>(&bytes) {
                Ok(PeerMessage::Hello { listen_addr, .. }) => {
                    (PeerIdentity::normalize(&listen_addr), None)
                }
                Ok(msg) => (PeerIdentity::normalize(&addr.to_string()), Some(msg)),
                Err(e) => {
                    warn!("undecodable handshake frame from {addr}: {e}");
                    (PeerIdentity::normalize(&addr.to_string()), None)
                }
            },
            Ok(Some(Err(e))) => {
                warn!("handshake read error from {addr}: {e}");
                return;
            }
            Ok(None) => {
                debug!("{addr} closed before handshake");
                return;
            }
            Err(_) => {
                warn!("handshake timeout from {addr}");
                return;
            }
        };
    if identity == inner.identity {
        debug!("dropping inbound connection from ourselves ({addr})");
        return;
    }
    run_link(inner, framed, identity, None, carried).await;
}

/// Drive one established connection until its stream ends. `dialed` is set
/// for outbound links and triggers the reconnect schedule on failure.
async fn run_link(
    inner: Arc<MeshInner>,
    framed: WireStream,
    identity: PeerIdentity,
    dialed: Option<String>,
    carried: Option<PeerMessage>,
) {
    let (mut sink, mut stream) = framed.split();

    // Announce ourselves first so the remote can key this connection.
    let hello = PeerMessage::Hello {
        listen_addr: inner.listen_addr.clone(),
        name: inner.player_name.clone(),
    };
    if let Err(e) = send_frame(&mut sink, &hello).await {
        warn!("failed to send handshake to {identity}: {e}");
        if let Some(addr) = dialed {
            schedule_reconnect(inner, addr, 1);
        }
        return;
    }

    // Claim the send slot unless another connection already holds it (the
    // peer may be linked both inbound and outbound); the loser keeps
    // receiving so no messages are lost, but never writes.
    let token = inner.next_token();
    let (tx, mut rx) = mpsc::unbounded_channel::<PeerMessage>();
    let registered = inner.register_link(&identity, LinkHandle { token, tx });
    let writer = registered.then(|| {
        let peer = identity.clone();
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                if let Err(e) = send_frame(&mut sink, &msg).await {
                    warn!("send to {peer} failed: {e}");
                    break;
                }
            }
        })
    });
    if !registered {
        debug!("{identity} already has a send link, receiving only");
    }

    if let Some(msg) = carried {
        inner.forward(&identity, msg);
    }

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(bytes) => match postcard::from_bytes::<PeerMessage>(&bytes) {
                // Handshake frames carry nothing new after link setup.
                Ok(PeerMessage::Hello { .. }) => {}
                Ok(msg) => inner.forward(&identity, msg),
                Err(e) => warn!("dropping undecodable frame from {identity}: {e}"),
            },
            Err(e) => {
                warn!("stream error from {identity}: {e}");
                break;
            }
        }
    }
    debug!("link to {identity} ended");

    if let Some(writer) = writer {
        writer.abort();
    }
    if registered {
        inner.remove_link(&identity, token);
    }
    if let Some(addr) = dialed {
        schedule_reconnect(inner, addr, 1);
    }
}

async fn send_frame(sink: &mut WireSink, msg: &PeerMessage) -> anyhow::Result<()> {
    let bytes = postcard::to_stdvec(msg)?;
    sink.send(Bytes::from(bytes)).await?;
    Ok(())
}
