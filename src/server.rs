//! The UDP event loop: one socket, one task.
//!
//! Every pass blocks on the socket for at most the poll interval, so
//! the resolver's timer sweep always runs promptly even when the
//! socket is quiet.  All handling runs to completion inside a pass;
//! the only suspension point is the socket itself.

use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::resolver::{Outbound, Resolver};

/// Upper bound on how long a pass may block on the socket.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Receive buffer size.  UDP datagrams cannot be larger; anything
/// that does not fit is malformed by definition.
const RECV_BUF_SIZE: usize = 65535;

pub struct Server {
    socket: UdpSocket,
    resolver: Resolver,
}

impl Server {
    pub fn new(socket: UdpSocket, resolver: Resolver) -> Self {
        Self { socket, resolver }
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.socket.local_addr()
    }

    /// Poll, dispatch, sweep, forever.
    pub async fn run(mut self) {
        let mut buf = vec![0u8; RECV_BUF_SIZE];

        loop {
            match timeout(POLL_INTERVAL, self.socket.recv_from(&mut buf)).await {
                Ok(Ok((size, peer))) => {
                    let outbound = self.resolver.handle_datagram(&buf[..size], peer, Instant::now());
                    self.send_all(outbound).await;
                }
                Ok(Err(error)) => {
                    tracing::debug!(?error, "recv error");
                }
                // poll interval elapsed with nothing to read
                Err(_) => (),
            }

            let outbound = self.resolver.sweep(Instant::now());
            self.send_all(outbound).await;
        }
    }

    async fn send_all(&self, outbound: Vec<Outbound>) {
        for out in outbound {
            match out.message.into_octets() {
                Ok(mut serialised) => {
                    if let Err(error) = send_udp_bytes_to(&self.socket, out.target, &mut serialised).await
                    {
                        tracing::debug!(target = ?out.target, ?error, "UDP send error");
                    }
                }
                Err(error) => {
                    tracing::warn!(target = ?out.target, ?error, "could not serialise message");
                }
            }
        }
    }
}

/// Write a serialised message to the socket.  Messages over the
/// classic 512-octet UDP limit are cut off there, with the TC flag
/// set so the client knows.
pub async fn send_udp_bytes_to(
    sock: &UdpSocket,
    target: std::net::SocketAddr,
    bytes: &mut [u8],
) -> Result<(), std::io::Error> {
    if bytes.len() > 512 {
        bytes[2] |= 0b0000_0010;
        sock.send_to(&bytes[..512], target).await?;
    } else {
        bytes[2] &= 0b1111_1101;
        sock.send_to(bytes, target).await?;
    }

    Ok(())
}
