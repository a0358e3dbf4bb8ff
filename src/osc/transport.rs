//! UDP 送受信: 投げっぱなしの送信側と受信ループ

use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rosc::{decoder, encoder, OscMessage, OscPacket, OscType};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::TransportError;

use super::router::Router;

/// UDP ペイロードの最大長
const MAX_PACKET_SIZE: usize = 65_507;

/// [`OscServer`] の状態。`Stopped` が終端
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    Uninitialized,
    Bound,
    Listening,
    Stopped,
}

/// OSC パケットを受信し [`Router`] でディスパッチする
pub struct OscServer {
    socket: Option<UdpSocket>,
    state: watch::Sender<ServerState>,
}

impl OscServer {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ServerState::Uninitialized);
        Self {
            socket: None,
            state,
        }
    }

    /// `addr` にバインドしたサーバー
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let mut server = Self::new();
        server.bind_to(addr).await?;
        Ok(server)
    }

    pub async fn bind_to(&mut self, addr: SocketAddr) -> Result<SocketAddr, TransportError> {
        self.expect_state(ServerState::Uninitialized)?;
        let socket = match UdpSocket::bind(addr).await {
            Ok(socket) => socket,
            Err(source) => {
                self.state.send_replace(ServerState::Stopped);
                return Err(TransportError::Bind { addr, source });
            }
        };
        let local = socket.local_addr().map_err(TransportError::Socket)?;
        self.socket = Some(socket);
        self.state.send_replace(ServerState::Bound);
        info!("OSC server bound to {}", local);
        Ok(local)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// 別タスクから状態変化を監視する
    pub fn subscribe(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    fn expect_state(&self, expected: ServerState) -> Result<(), TransportError> {
        let current = self.state();
        if current == expected {
            Ok(())
        } else {
            Err(TransportError::InvalidState(current, expected))
        }
    }

    /// `cancel` が発火する (`Ok`) かソケットが失敗する (`Err`) まで受信ループを回す。
    ///
    /// ハンドラの失敗ではループを抜けない。どちらの場合も終了後は `Stopped`。
    pub async fn listen(&mut self, router: Arc<Router>, cancel: CancellationToken) -> Result<(), TransportError> {
        self.expect_state(ServerState::Bound)?;
        let socket = self
            .socket
            .take()
            .ok_or(TransportError::InvalidState(ServerState::Uninitialized, ServerState::Bound))?;
        self.state.send_replace(ServerState::Listening);

        let mut buf = vec![0u8; MAX_PACKET_SIZE];
        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                received = socket.recv_from(&mut buf) => match received {
                    Ok((len, from)) => match decoder::decode_udp(&buf[..len]) {
                        Ok((_, packet)) => {
                            let report = router.dispatch_packet(&packet);
                            if report.matched == 0 {
                                debug!("No route for packet from {}", from);
                            }
                        }
                        Err(e) => warn!("Malformed OSC packet from {}: {:?}", from, e),
                    },
                    Err(e) => {
                        error!("OSC socket failed: {}", e);
                        break Err(TransportError::Socket(e));
                    }
                },
            }
        };

        self.state.send_replace(ServerState::Stopped);
        info!("OSC server stopped");
        result
    }
}

impl Default for OscServer {
    fn default() -> Self {
        Self::new()
    }
}

/// 単一メッセージを送信用のバイト列にする
pub fn encode_message(msg: &OscMessage) -> Result<Vec<u8>, TransportError> {
    encoder::encode(&OscPacket::Message(msg.clone())).map_err(|e| TransportError::Encode(format!("{:?}", e)))
}

/// ベストエフォートの OSC 送信側。
///
/// 送信はブロックせず、受信側の不在も報告しない。失敗した送信は数えて debug ログに出す。
pub struct OscPublisher {
    socket: std::net::UdpSocket,
    target: SocketAddr,
    dropped: AtomicU64,
}

impl OscPublisher {
    pub fn new(target_addr: &str) -> Result<Self, TransportError> {
        let target = target_addr
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(target_addr.to_string()))?
            .next()
            .ok_or_else(|| TransportError::Resolve(target_addr.to_string()))?;
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = std::net::UdpSocket::bind(bind).map_err(|source| TransportError::Bind { addr: bind, source })?;
        socket.set_nonblocking(true).map_err(TransportError::Socket)?;
        Ok(Self {
            socket,
            target,
            dropped: AtomicU64::new(0),
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    /// ソケットが拒否したメッセージ数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn publish(&self, addr: &str, args: Vec<OscType>) -> Result<(), TransportError> {
        self.send(&OscMessage {
            addr: addr.to_string(),
            args,
        })
    }

    pub fn send(&self, msg: &OscMessage) -> Result<(), TransportError> {
        let data = encode_message(msg)?;
        if let Err(e) = self.socket.send_to(&data, self.target) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            debug!("Dropped {} to {}: {}", msg.addr, self.target, e);
        }
        Ok(())
    }
}
