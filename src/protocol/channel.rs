use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::Deserialize;
use tracing::{debug, trace};

use crate::error::ProtocolError;

/// 1ティック分の速度指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandBatch {
    /// 並進速度（m/s）
    pub linear: f64,
    /// 角速度（rad/s）
    pub angular: f64,
    /// 1ティック内で積分するサブステップ数
    pub arity: usize,
}

/// コマンドペイロード `{"v_cmds": [...], "w_cmds": [...]}`
#[derive(Debug, Clone, Deserialize)]
pub struct CommandPayload {
    pub v_cmds: Vec<f64>,
    pub w_cmds: Vec<f64>,
}

#[derive(Debug, Default)]
struct ChannelState {
    /// 受信順のバッチ（追記のみ）
    batches: Vec<CommandBatch>,
    ready: bool,
    peer_gone: bool,
    payloads: u64,
}

/// コマンドバッチのスレッド安全なキュー
///
/// 受信スレッドが追記し、ティックループが `executed` 番目から順に読み出します。
/// バッチは削除されないため、ロボット側の実行済み数だけで二重実行を防げます。
#[derive(Debug)]
pub struct CommandChannel {
    state: Mutex<ChannelState>,
    cond: Condvar,
    /// 繰り返しポリシーの周波数（`None` なら無効）
    repeat_freq: Option<f64>,
}

impl CommandChannel {
    pub fn new(repeat_freq: Option<f64>) -> Self {
        Self {
            state: Mutex::new(ChannelState::default()),
            cond: Condvar::new(),
            repeat_freq,
        }
    }

    /// コマンドペイロードを解析して追記
    ///
    /// 長さが一致しない場合は何も追記しません。戻り値は追記したバッチ数です。
    pub fn push_payload(&self, payload: &str) -> Result<usize, ProtocolError> {
        let commands: CommandPayload = serde_json::from_str(payload)?;
        self.push_commands(&commands.v_cmds, &commands.w_cmds)
    }

    /// 速度指令列を追記
    pub fn push_commands(&self, v_cmds: &[f64], w_cmds: &[f64]) -> Result<usize, ProtocolError> {
        if v_cmds.len() != w_cmds.len() {
            return Err(ProtocolError::LengthMismatch {
                v_len: v_cmds.len(),
                w_len: w_cmds.len(),
            });
        }
        let arity = v_cmds.len();
        if arity == 0 {
            return Ok(0);
        }

        let mut batches: Vec<CommandBatch> = v_cmds
            .iter()
            .zip(w_cmds)
            .map(|(&linear, &angular)| CommandBatch { linear, angular, arity })
            .collect();

        if let Some(freq) = self.repeat_freq {
            // 制御ホライズンを埋めるため最後の指令を複製
            let copies = (freq / arity as f64).floor() as i64 - 1;
            if let Some(&last) = batches.last() {
                for _ in 0..copies.max(0) {
                    batches.push(last);
                }
            }
        }

        let count = batches.len();
        {
            let mut state = self.state.lock();
            state.batches.extend(batches);
            state.payloads += 1;
            trace!("コマンド {} 件を追記 (合計 {})", count, state.batches.len());
        }
        self.cond.notify_all();
        Ok(count)
    }

    /// `index` 番目のバッチ
    pub fn get(&self, index: usize) -> Option<CommandBatch> {
        self.state.lock().batches.get(index).copied()
    }

    /// `index` 番目のバッチが届くまで最大 `timeout` 待つ
    ///
    /// コントローラが切断済みの場合は待たずに戻ります。
    pub fn wait_for_batch(&self, index: usize, timeout: Duration) -> Option<CommandBatch> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while state.batches.len() <= index && !state.peer_gone {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.batches.get(index).copied()
    }

    /// 受信したバッチの総数
    pub fn len(&self) -> usize {
        self.state.lock().batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 受理したコマンドペイロード数
    pub fn payload_count(&self) -> u64 {
        self.state.lock().payloads
    }

    pub fn mark_ready(&self) {
        self.state.lock().ready = true;
        self.cond.notify_all();
        debug!("コントローラ準備完了");
    }

    pub fn is_ready(&self) -> bool {
        self.state.lock().ready
    }

    /// `"ready"` を受信するまで最大 `timeout` 待つ
    pub fn wait_ready(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.ready && !state.peer_gone {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                break;
            }
        }
        state.ready
    }

    /// コントローラ切断を記録し、待機中のスレッドを起こす
    pub fn mark_peer_gone(&self) {
        self.state.lock().peer_gone = true;
        self.cond.notify_all();
    }

    pub fn peer_gone(&self) -> bool {
        self.state.lock().peer_gone
    }
}
