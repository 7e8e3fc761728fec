//! The bidirectional boundary with the controller.
//!
//! Commands arrive as 1024-byte frames over a TCP connection the replica
//! opens at startup (retrying until the controller's rendezvous accepts);
//! state reports leave as fire-and-forget UDP datagrams to the same
//! controller address.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use acsim_consensus::ReplicaId;
use acsim_core::SimulationParams;
use acsim_wire::{decode_frame, encode_frame, ControllerCommand, RegisterHello, StateReport, FRAME_LEN};

const CONNECT_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Errors on the command channel.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The read exceeded its deadline; the caller re-checks termination and
    /// keeps looping.
    #[error("controller read exceeded deadline")]
    Timeout,

    /// A blank or undecodable frame; logged and dropped.
    #[error("controller sent a blank or malformed frame")]
    NoData,

    /// The TCP stream broke. Fatal for the replica: it latches done.
    #[error("controller connection lost")]
    ConnectionLost(#[source] io::Error),
}

/// The replica side of the controller boundary.
pub struct ControllerLink;

impl ControllerLink {
    /// Connect to the controller, register, and split into the two
    /// single-owner halves: the command stream for the controller handler
    /// and the report channel for the receiver.
    pub async fn connect(
        params: &SimulationParams,
        replica_id: ReplicaId,
    ) -> anyhow::Result<(CommandStream, Arc<ReportChannel>)> {
        let controller = params.controller_addr()?;

        let mut stream = loop {
            match TcpStream::connect(controller).await {
                Ok(stream) => break stream,
                Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                    info!(replica = replica_id, "controller connection refused, retrying");
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
                Err(e) => return Err(e.into()),
            }
        };
        info!(replica = replica_id, "connected to controller");

        let hello = encode_frame(&RegisterHello { id: replica_id })?;
        stream.write_all(&hello).await?;

        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok((
            CommandStream { replica_id, stream, frame: [0; FRAME_LEN], filled: 0 },
            Arc::new(ReportChannel { replica_id, socket, target: controller }),
        ))
    }
}

/// The inbound command half. Owned by the controller handler activity.
pub struct CommandStream {
    replica_id: ReplicaId,
    stream: TcpStream,
    frame: [u8; FRAME_LEN],
    filled: usize,
}

impl CommandStream {
    /// Receive one command, waiting at most `wait`.
    ///
    /// A frame may straddle several reads; partially received bytes are kept
    /// across timeouts so the stream never desynchronizes.
    pub async fn recv(&mut self, wait: Duration) -> Result<ControllerCommand, LinkError> {
        let deadline = Instant::now() + wait;
        while self.filled < FRAME_LEN {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(LinkError::Timeout)?;
            match timeout(remaining, self.stream.read(&mut self.frame[self.filled..])).await {
                Err(_) => return Err(LinkError::Timeout),
                Ok(Ok(0)) => {
                    return Err(LinkError::ConnectionLost(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "controller closed the command stream",
                    )))
                }
                Ok(Ok(n)) => self.filled += n,
                Ok(Err(e)) => return Err(LinkError::ConnectionLost(e)),
            }
        }

        self.filled = 0;
        decode_frame(&self.frame).map_err(|_| {
            debug!(replica = self.replica_id, "dropping malformed controller frame");
            LinkError::NoData
        })
    }
}

/// The outbound report half. Shared by whoever has something to tell the
/// controller; sends are fire-and-forget.
pub struct ReportChannel {
    replica_id: ReplicaId,
    socket: UdpSocket,
    target: SocketAddr,
}

impl ReportChannel {
    pub async fn send(&self, report: &StateReport) {
        let frame = match encode_frame(report) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(replica = self.replica_id, error = %e, "could not encode state report");
                return;
            }
        };
        if let Err(e) = self.socket.send_to(&frame, self.target).await {
            debug!(replica = self.replica_id, error = %e, "state report send failed");
        }
    }
}
