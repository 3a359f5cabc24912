use std::net::SocketAddr;
use std::sync::Arc;
use anyhow::anyhow;
use tokio::net::{lookup_host, UdpSocket};
use tracing::{error, info};
use crate::config::LinkConfig;
use crate::end_point::EndPointCore;
use crate::message_queue::Message;
use crate::peer::Peer;
use crate::send_pipeline::UdpSendSocket;
use crate::updater::TickSource;

/// Talks to a single server through a connected UDP socket. The server is the client's only
///  peer, and messages received from it carry no peer reference.
pub struct NetworkClient {
    core: Arc<EndPointCore>,
    server: Arc<Peer>,
    local_addr: SocketAddr,
}

impl Drop for NetworkClient {
    fn drop(&mut self) {
        self.core.close(None);
    }
}

impl NetworkClient {
    pub async fn connect(tick_source: &dyn TickSource, address: &str, port: u16) -> anyhow::Result<NetworkClient> {
        Self::connect_with_config(tick_source, address, port, Arc::new(LinkConfig::default())).await
    }

    /// Resolves the server address and connects a socket to it. UDP has no handshake, so this
    ///  succeeds regardless of whether a server is actually listening.
    pub async fn connect_with_config(tick_source: &dyn TickSource, address: &str, port: u16, config: Arc<LinkConfig>) -> anyhow::Result<NetworkClient> {
        config.validate()?;

        let server_addr = match lookup_host((address, port)).await {
            Ok(mut addrs) => addrs.next(),
            Err(e) => {
                error!("failed to resolve the UDP host address {}:{}: {}", address, port, e);
                return Err(e.into());
            }
        };
        let server_addr = server_addr.ok_or_else(|| {
            error!("UDP host address {}:{} did not resolve to anything", address, port);
            anyhow!("{}:{} did not resolve to a socket address", address, port)
        })?;

        let bind_addr = if server_addr.is_ipv4() {
            SocketAddr::from(([0, 0, 0, 0], 0))
        }
        else {
            SocketAddr::from(([0u16; 8], 0))
        };
        let socket = match Self::dial(bind_addr, server_addr).await {
            Ok(socket) => Arc::new(socket),
            Err(e) => {
                error!("failed to dial the UDP server {:?}: {}", server_addr, e);
                return Err(e);
            }
        };
        let local_addr = socket.local_addr()?;
        info!("UDP client on {:?} connected to {:?}", local_addr, server_addr);

        let core = EndPointCore::new(config.clone(), Arc::new(UdpSendSocket::connected(socket.clone())));
        let server = Arc::new(Peer::new(0, server_addr, config.max_datagram_size));

        core.register_with(tick_source);

        let resolver_server = server.clone();
        tokio::spawn(core.clone().recv_loop(socket, move |from| {
            if from == resolver_server.socket_addr() {
                Some((resolver_server.clone(), None))
            }
            else {
                None
            }
        }));

        Ok(NetworkClient {
            core,
            server,
            local_addr,
        })
    }

    async fn dial(bind_addr: SocketAddr, server_addr: SocketAddr) -> anyhow::Result<UdpSocket> {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(server_addr).await?;
        Ok(socket)
    }

    pub fn server(&self) -> &Arc<Peer> {
        &self.server
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn is_live(&self) -> bool {
        self.core.is_live()
    }

    pub async fn send_message_unreliable(&self, message: &[u8]) -> anyhow::Result<()> {
        self.core.send_unreliable(message, &self.server).await
    }

    pub async fn send_message_reliable(&self, message: &[u8]) -> anyhow::Result<()> {
        self.core.send_reliable(message, &self.server).await
    }

    /// all messages received from the server since the previous call
    pub fn flush(&self) -> Vec<Message> {
        self.core.flush()
    }

    pub async fn pending_reliable_count(&self) -> usize {
        self.core.registry.len().await
    }

    pub fn close(&self, tick_source: &dyn TickSource) {
        self.core.close(Some(tick_source));
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> &Arc<EndPointCore> {
        &self.core
    }
}
