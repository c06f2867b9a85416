//! UDP byte transport.
//!
//! [UdpTransport] binds local socket and talks to single remote peer. Datagrams from other
//! addresses are dropped.

use anyhow::{Context, Result};
use std::{net::SocketAddr, time::Duration};
use tokio::net::UdpSocket;

use crate::codec::ByteTransport;

/// Maximum size of received datagram (IPv6 minimum MTU).
pub const MAX_DATAGRAM: usize = 1280;

pub struct UdpTransport {
    socket: UdpSocket,
    remote: SocketAddr,
    receive_timeout: Duration,
}

impl UdpTransport {
    pub async fn connect(local: &str, remote: &str, receive_timeout: Duration) -> Result<Self> {
        let socket = UdpSocket::bind(local)
            .await
            .context(format!("binding udp socket to {}", local))?;
        let remote = tokio::net::lookup_host(remote)
            .await
            .context(format!("resolving {}", remote))?
            .next()
            .context(format!("no address for {}", remote))?;
        log::debug!("udp transport {:?} -> {}", socket.local_addr(), remote);
        Ok(Self {
            socket,
            remote,
            receive_timeout,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote
    }

    async fn receive_from_peer(&self) -> Result<Vec<u8>> {
        loop {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            let (n, addr) = self.socket.recv_from(&mut buf).await?;
            if addr != self.remote {
                log::debug!("dropping {} bytes from unexpected peer {}", n, addr);
                continue;
            }
            buf.truncate(n);
            return Ok(buf);
        }
    }
}

impl ByteTransport for UdpTransport {
    async fn transmit(&self, data: &[u8]) -> Result<()> {
        self.socket
            .send_to(data, self.remote)
            .await
            .context(format!("sending to {}", self.remote))?;
        Ok(())
    }

    async fn receive(&self) -> Result<Vec<u8>> {
        tokio::time::timeout(self.receive_timeout, self.receive_from_peer())
            .await
            .context(format!("receive timeout from {}", self.remote))?
    }
}
