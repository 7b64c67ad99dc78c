//! # Error モジュール
//!
//! シミュレータ全体で使用するエラー型を定義します。
//!
//! - `ProtocolError`: ジョイスティック（外部コントローラ）との通信エラー
//! - `TrackError`: 記録軌跡の構築時のデータ不整合
//! - `DatasetError`: 歩行者データセットの読み込みエラー
//! - `SimError`: エンジンが返す集約エラー
//!
//! 補間範囲外の問い合わせはクランプで処理されるため、エラーとしては現れません。

use std::path::PathBuf;

use crate::scenario::ScenarioError;

/// ソケットプロトコルのエラー
///
/// いずれもエピソードを中断しません。不正なバッチは破棄され、
/// 接続エラーの場合はコントローラ切断フラグが立ちます。
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// JSONとして解析できないペイロード
    #[error("不正なコマンドペイロード: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `v_cmds` と `w_cmds` の長さが異なる
    #[error("v_cmds と w_cmds の長さが一致しません (v: {v_len}, w: {w_len})")]
    LengthMismatch {
        /// 並進速度コマンド数
        v_len: usize,
        /// 角速度コマンド数
        w_len: usize,
    },

    /// 送信先に接続できない（コントローラ終了済み）
    #[error("コントローラ {addr} に接続できません: {source}")]
    Connection {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 受信ソケットのバインドに失敗
    #[error("受信ソケット {addr} のバインドに失敗: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// 記録軌跡の構築エラー（データ不整合）
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TrackError {
    #[error("時刻列とサンプル列の長さが一致しません (時刻: {times}, サンプル: {samples})")]
    LengthMismatch { times: usize, samples: usize },

    #[error("軌跡が短すぎます: {len} サンプル (最低3サンプル必要)")]
    TooShort { len: usize },
}

/// 歩行者データセットの読み込みエラー
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("データセットファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("データセットCSV解析エラー {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("データセット形式エラー: {0}")]
    Malformed(String),
}

/// シミュレーションエンジンの集約エラー
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Dataset(#[from] DatasetError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}
