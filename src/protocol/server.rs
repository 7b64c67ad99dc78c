use std::io::{Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::ProtocolError;
use crate::models::common::TerminationCause;
use crate::models::snapshot::WorldSnapshot;
use crate::protocol::channel::CommandChannel;

/// 受信ペイロードの読み込みタイムアウト
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// 送信時の接続・書き込みタイムアウト
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// コントローラへの送信路
pub trait PeerLink: Send + Sync {
    /// 1メッセージを送信
    fn send(&self, payload: &str) -> Result<(), ProtocolError>;
}

/// 1メッセージごとにTCP接続を張る送信路
///
/// 送信中のメッセージは常に1つだけです。
#[derive(Debug)]
pub struct TcpPeerLink {
    addr: String,
    lock: Mutex<()>,
}

impl TcpPeerLink {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// 解決できたアドレスへ順に接続を試みる（応答のない相手はタイムアウト）
    fn connect(&self) -> std::io::Result<TcpStream> {
        let mut last_error = None;
        for addr in self.addr.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, CONNECT_TIMEOUT) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "address resolved to nothing")
        }))
    }
}

impl PeerLink for TcpPeerLink {
    fn send(&self, payload: &str) -> Result<(), ProtocolError> {
        let _guard = self.lock.lock();
        let connection_error = |source: std::io::Error| ProtocolError::Connection {
            addr: self.addr.clone(),
            source,
        };

        let mut stream = self.connect().map_err(connection_error)?;
        stream.set_write_timeout(Some(CONNECT_TIMEOUT)).map_err(connection_error)?;
        stream.write_all(payload.as_bytes()).map_err(connection_error)?;
        stream.shutdown(Shutdown::Both).ok();
        Ok(())
    }
}

/// コントローラなしで動かすための送信路（メッセージは破棄）
#[derive(Debug, Clone, Copy, Default)]
pub struct NullLink;

impl PeerLink for NullLink {
    fn send(&self, _payload: &str) -> Result<(), ProtocolError> {
        Ok(())
    }
}

#[derive(Debug)]
struct WorldStatus {
    snapshot: Option<WorldSnapshot>,
    robot_on: bool,
    cause: TerminationCause,
}

/// プロトコル層の共有状態
///
/// スケジューラが1つ生成し、ロボットと受信スレッドに `Arc` で渡します。
pub struct ProtocolContext {
    channel: CommandChannel,
    link: Box<dyn PeerLink>,
    world: RwLock<WorldStatus>,
    sent: AtomicU64,
}

impl std::fmt::Debug for ProtocolContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolContext")
            .field("channel", &self.channel)
            .field("sent", &self.sent)
            .finish_non_exhaustive()
    }
}

impl ProtocolContext {
    pub fn new(channel: CommandChannel, link: Box<dyn PeerLink>) -> Self {
        Self {
            channel,
            link,
            world: RwLock::new(WorldStatus {
                snapshot: None,
                robot_on: true,
                cause: TerminationCause::Running,
            }),
            sent: AtomicU64::new(0),
        }
    }

    /// コントローラを持たないコンテキスト
    pub fn offline(repeat_freq: Option<f64>) -> Self {
        let context = Self::new(CommandChannel::new(repeat_freq), Box::new(NullLink));
        context.channel.mark_peer_gone();
        context
    }

    pub fn channel(&self) -> &CommandChannel {
        &self.channel
    }

    /// 最新のワールド状態を公開
    pub fn publish(&self, snapshot: WorldSnapshot) {
        self.world.write().snapshot = Some(snapshot);
    }

    pub fn set_robot_status(&self, robot_on: bool, cause: TerminationCause) {
        let mut world = self.world.write();
        world.robot_on = robot_on;
        world.cause = cause;
    }

    pub fn robot_on(&self) -> bool {
        self.world.read().robot_on
    }

    /// 最新のワールドメッセージ（未公開なら `None`）
    pub fn world_message(&self) -> Option<Value> {
        let world = self.world.read();
        world
            .snapshot
            .as_ref()
            .map(|s| s.to_world_message(world.robot_on, world.cause))
    }

    /// 送信に成功したメッセージ数
    pub fn sent_count(&self) -> u64 {
        self.sent.load(Ordering::Relaxed)
    }

    /// JSONメッセージを送信
    ///
    /// 失敗してもエラーにはせず、コントローラ切断として記録します。
    pub fn send_json(&self, message: &Value) -> bool {
        match self.link.send(&message.to_string()) {
            Ok(()) => {
                self.sent.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                if !self.channel.peer_gone() {
                    warn!("コントローラへの送信に失敗しました。以降コントローラなしで続行します: {}", e);
                }
                self.channel.mark_peer_gone();
                false
            }
        }
    }

    /// 最新のワールド状態を送信
    pub fn send_world(&self) -> bool {
        match self.world_message() {
            Some(message) => self.send_json(&message),
            None => {
                debug!("公開済みのワールド状態がないため送信をスキップ");
                false
            }
        }
    }

    /// 受信ペイロードの処理
    pub fn manage(&self, payload: &str) -> Result<(), ProtocolError> {
        let payload = payload.trim();
        trace!("受信: {}", payload);

        if !self.robot_on() {
            // 停止後は何を受信しても最終状態を返す
            self.send_world();
            return Ok(());
        }

        match payload {
            "sense" => {
                self.send_world();
            }
            "ready" => self.channel.mark_ready(),
            _ => {
                self.channel.push_payload(payload)?;
            }
        }
        Ok(())
    }
}

/// 受信スレッド
///
/// 1接続ずつ受け付け、EOFまで読み込んでから切断し [`ProtocolContext::manage`] に渡します。
#[derive(Debug)]
pub struct ProtocolListener {
    addr: SocketAddr,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProtocolListener {
    pub fn spawn(bind_addr: &str, context: Arc<ProtocolContext>) -> Result<Self, ProtocolError> {
        let bind_error = |source: std::io::Error| ProtocolError::Bind {
            addr: bind_addr.to_string(),
            source,
        };
        let listener = TcpListener::bind(bind_addr).map_err(bind_error)?;
        let addr = listener.local_addr().map_err(bind_error)?;
        let shutdown = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&shutdown);
        let handle = thread::spawn(move || {
            for stream in listener.incoming() {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                match stream {
                    Ok(stream) => handle_connection(stream, &context),
                    Err(e) => warn!("接続の受け付けに失敗: {}", e),
                }
            }
            debug!("受信スレッド終了");
        });

        info!("コントローラ受信待ち: {}", addr);
        Ok(Self {
            addr,
            shutdown,
            handle: Some(handle),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// 受信スレッドを停止して合流
    pub fn stop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shutdown.store(true, Ordering::SeqCst);
        // accept を抜けさせるための自己接続
        let _ = TcpStream::connect(self.addr);
        if handle.join().is_err() {
            warn!("受信スレッドが異常終了しました");
        }
    }
}

impl Drop for ProtocolListener {
    fn drop(&mut self) {
        self.stop();
    }
}

fn handle_connection(mut stream: TcpStream, context: &ProtocolContext) {
    stream.set_read_timeout(Some(READ_TIMEOUT)).ok();
    let mut payload = String::new();
    if let Err(e) = stream.read_to_string(&mut payload) {
        warn!("ペイロードの読み込みに失敗: {}", e);
        return;
    }
    drop(stream);

    if payload.trim().is_empty() {
        return;
    }
    if let Err(e) = context.manage(&payload) {
        warn!("コマンドを破棄しました: {}", e);
    }
}
