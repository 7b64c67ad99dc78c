//! # Protocol モジュール
//!
//! 外部コントローラ（ジョイスティック）とのソケット通信を担当します。
//!
//! - 受信: 1接続につき1ペイロード（`"sense"` / `"ready"` / コマンドJSON）
//! - 送信: 1メッセージにつき新しい接続（connect → send → close）
//!
//! 受信スレッドとティックループが共有するのは [`CommandChannel`] と
//! 最新のワールド状態のみで、どちらもロックで保護されています。

pub mod channel;
pub mod server;

pub use channel::{CommandBatch, CommandChannel, CommandPayload};
pub use server::{NullLink, PeerLink, ProtocolContext, ProtocolListener, TcpPeerLink};
