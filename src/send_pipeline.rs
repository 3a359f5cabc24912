use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tracing::trace;

/// This is an abstraction for sending a buffer on a UDP socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SendSocket: Send + Sync + 'static {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<()>;
}

/// The production [SendSocket], sharing the socket with the receive loop.
///
/// A client's socket is connected to the server, and some platforms reject an explicit
///  destination on connected sockets, so the destination is ignored in that case.
pub struct UdpSendSocket {
    socket: Arc<UdpSocket>,
    connected: bool,
}

impl UdpSendSocket {
    pub fn listening(socket: Arc<UdpSocket>) -> UdpSendSocket {
        UdpSendSocket { socket, connected: false }
    }

    pub fn connected(socket: Arc<UdpSocket>) -> UdpSendSocket {
        UdpSendSocket { socket, connected: true }
    }
}

#[async_trait]
impl SendSocket for UdpSendSocket {
    async fn do_send_packet(&self, to: SocketAddr, packet_buf: &[u8]) -> std::io::Result<()> {
        trace!("UDP socket: sending {} bytes to {:?}", packet_buf.len(), to);

        if self.connected {
            self.socket.send(packet_buf).await?;
        }
        else {
            self.socket.send_to(packet_buf, to).await?;
        }
        Ok(())
    }
}
