//! Peer-facing transports.
//!
//! Algorithms that broadcast periodically ride UDP: one datagram to the
//! broadcast address reaches the fleet, and loss is part of the model.
//! Algorithms that must broadcast on every advancement instead open a full
//! TCP mesh at startup so no update is lost; frames from all inbound
//! streams are funneled into one channel for the receiver activity.
//!
//! Each half is owned by exactly one activity: the broadcaster holds the
//! [`PeerSender`], the receiver holds the [`PeerReceiver`].

use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use futures::future;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use acsim_consensus::ReplicaId;
use acsim_core::SimulationParams;
use acsim_wire::FRAME_LEN;

const MESH_RETRY_DELAY: Duration = Duration::from_millis(250);
const INBOUND_QUEUE: usize = 1024;

/// Outbound half of the peer transport.
pub struct PeerSender {
    mode: SenderMode,
}

enum SenderMode {
    Udp {
        socket: UdpSocket,
        broadcast: SocketAddr,
        peers: Vec<SocketAddr>,
    },
    Mesh {
        streams: Vec<Option<TcpStream>>,
    },
}

impl PeerSender {
    /// Send a frame to the whole fleet.
    pub async fn broadcast(&mut self, frame: &[u8]) {
        match &mut self.mode {
            SenderMode::Udp { socket, broadcast, .. } => {
                if let Err(e) = socket.send_to(frame, *broadcast).await {
                    warn!(error = %e, "peer broadcast failed");
                }
            }
            SenderMode::Mesh { streams } => {
                for id in 0..streams.len() {
                    Self::write_stream(streams, id, frame).await;
                }
            }
        }
    }

    /// Send a frame to a chosen subset of peers, used by Byzantine
    /// send-omission.
    pub async fn send_to(&mut self, frame: &[u8], targets: &[ReplicaId]) {
        match &mut self.mode {
            SenderMode::Udp { socket, peers, .. } => {
                for &id in targets {
                    if let Err(e) = socket.send_to(frame, peers[id]).await {
                        debug!(peer = id, error = %e, "peer send failed");
                    }
                }
            }
            SenderMode::Mesh { streams } => {
                for &id in targets {
                    Self::write_stream(streams, id, frame).await;
                }
            }
        }
    }

    /// A peer whose stream breaks is dropped from the mesh; everyone else
    /// keeps receiving.
    async fn write_stream(streams: &mut [Option<TcpStream>], id: ReplicaId, frame: &[u8]) {
        if let Some(stream) = streams[id].as_mut() {
            if let Err(e) = stream.write_all(frame).await {
                warn!(peer = id, error = %e, "peer stream broke, dropping it");
                streams[id] = None;
            }
        }
    }
}

/// Inbound half of the peer transport.
pub struct PeerReceiver {
    mode: ReceiverMode,
}

enum ReceiverMode {
    Udp {
        socket: UdpSocket,
    },
    Mesh {
        frames: mpsc::Receiver<Vec<u8>>,
        accept_task: JoinHandle<()>,
    },
}

impl PeerReceiver {
    /// Wait up to `wait` for the next frame. `Ok(None)` is a timeout; the
    /// caller re-checks termination and loops.
    pub async fn recv(&mut self, wait: Duration) -> io::Result<Option<Vec<u8>>> {
        match &mut self.mode {
            ReceiverMode::Udp { socket } => {
                let mut buf = [0u8; FRAME_LEN];
                match timeout(wait, socket.recv_from(&mut buf)).await {
                    Err(_) => Ok(None),
                    Ok(Ok((len, _))) => Ok(Some(buf[..len].to_vec())),
                    Ok(Err(e)) => Err(e),
                }
            }
            ReceiverMode::Mesh { frames, .. } => match timeout(wait, frames.recv()).await {
                Err(_) => Ok(None),
                Ok(Some(frame)) => Ok(Some(frame)),
                Ok(None) => Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "peer mesh closed",
                )),
            },
        }
    }
}

impl Drop for PeerReceiver {
    fn drop(&mut self) {
        if let ReceiverMode::Mesh { accept_task, .. } = &self.mode {
            accept_task.abort();
        }
    }
}

/// Open the periodic-broadcast transport: a listening socket on the shared
/// peer port and a broadcast-capable send socket.
pub async fn udp(params: &SimulationParams) -> anyhow::Result<(PeerSender, PeerReceiver)> {
    let listen = UdpSocket::bind(("0.0.0.0", params.server_port)).await?;
    let send = UdpSocket::bind("0.0.0.0:0").await?;
    send.set_broadcast(true)?;

    let peers = (0..params.servers)
        .map(|id| params.peer_addr(id))
        .collect::<anyhow::Result<Vec<_>>>()?;
    let broadcast = SocketAddr::from((Ipv4Addr::BROADCAST, params.server_port));

    Ok((
        PeerSender { mode: SenderMode::Udp { socket: send, broadcast, peers } },
        PeerReceiver { mode: ReceiverMode::Udp { socket: listen } },
    ))
}

/// Open the event-driven transport: a pairwise TCP mesh, with inbound
/// streams fanned into one frame channel.
///
/// Blocks until an outbound stream to every peer is established, so the
/// whole fleet must be starting up concurrently.
pub async fn tcp_mesh(
    params: &SimulationParams,
    replica_id: ReplicaId,
) -> anyhow::Result<(PeerSender, PeerReceiver)> {
    let listener = TcpListener::bind(("0.0.0.0", params.server_port)).await?;
    let (frames_tx, frames_rx) = mpsc::channel(INBOUND_QUEUE);
    let accept_task = tokio::spawn(accept_loop(listener, frames_tx));

    let connections = future::join_all((0..params.servers).map(|id| {
        let addr = params.peer_addr(id);
        async move {
            if id == replica_id {
                return Ok(None);
            }
            Ok::<_, anyhow::Error>(Some(connect_with_retry(addr?, id).await))
        }
    }))
    .await;
    let streams = connections.into_iter().collect::<anyhow::Result<Vec<_>>>()?;

    info!(replica = replica_id, "peer mesh established");
    Ok((
        PeerSender { mode: SenderMode::Mesh { streams } },
        PeerReceiver { mode: ReceiverMode::Mesh { frames: frames_rx, accept_task } },
    ))
}

async fn connect_with_retry(addr: SocketAddr, id: ReplicaId) -> TcpStream {
    loop {
        match TcpStream::connect(addr).await {
            Ok(stream) => return stream,
            Err(e) => {
                debug!(peer = id, error = %e, "peer not up yet, retrying");
                tokio::time::sleep(MESH_RETRY_DELAY).await;
            }
        }
    }
}

async fn accept_loop(listener: TcpListener, frames: mpsc::Sender<Vec<u8>>) {
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!(%peer, "accepted peer stream");
                tokio::spawn(read_frames(stream, frames.clone()));
            }
            Err(e) => {
                warn!(error = %e, "peer accept failed");
                tokio::time::sleep(MESH_RETRY_DELAY).await;
            }
        }
    }
}

async fn read_frames(mut stream: TcpStream, frames: mpsc::Sender<Vec<u8>>) {
    let mut buf = [0u8; FRAME_LEN];
    loop {
        match stream.read_exact(&mut buf).await {
            Ok(_) => {
                if frames.send(buf.to_vec()).await.is_err() {
                    break;
                }
            }
            Err(_) => break,
        }
    }
}
