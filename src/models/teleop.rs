use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace};

use crate::models::{
    collision::{check_collision, CollisionFilter},
    common::{math_utils, AgentCategory, AgentState, Pose, TerminationCause, Trajectory},
    snapshot::WorldSnapshot,
    traits::SimAgent,
};
use crate::protocol::{CommandBatch, ProtocolContext};

/// ロボットの名前（プロトコル上の識別子）
pub const ROBOT_NAME: &str = "robot_agent";

/// 遠隔操作ロボットの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeleopState {
    /// コントローラの準備完了待ち
    AwaitingReady,
    Executing,
    /// 未実行のコマンドがなく待機中
    Blocked,
    PoweredOff,
}

/// ロボットのパラメータ
#[derive(Debug, Clone, Copy)]
pub struct TeleopParams {
    /// シミュレーションの時間刻み（秒）
    pub dt: f64,
    pub radius: f64,
    pub goal: Pose,
    /// ゴール到達判定の距離（m）
    pub goal_margin: f64,
    /// これを超えると Timeout（秒）
    pub max_time: f64,
    /// 衝突で停止するか
    pub stop_on_collision: bool,
}

/// 外部コントローラの速度指令で動くロボット
///
/// 指令は理想的に追従されるものとして、単輪モデルを開ループで積分します。
#[derive(Debug)]
pub struct TeleopActor {
    name: String,
    params: TeleopParams,
    context: Arc<ProtocolContext>,
    state: TeleopState,
    cause: TerminationCause,
    current: AgentState,
    trajectory: Trajectory,
    /// 実行済みバッチ数（次に実行するバッチの位置）
    executed: usize,
    /// 待機中のティックの開始時刻
    pending_t: f64,
    collided: bool,
    collision_count: u32,
    running: bool,
}

impl TeleopActor {
    pub fn new(start: Pose, params: TeleopParams, context: Arc<ProtocolContext>) -> Self {
        Self {
            name: ROBOT_NAME.to_string(),
            params,
            context,
            state: TeleopState::AwaitingReady,
            cause: TerminationCause::Running,
            current: AgentState::new(start, 0.0, 0.0),
            trajectory: Trajectory::new(),
            executed: 0,
            pending_t: 0.0,
            collided: false,
            collision_count: 0,
            running: true,
        }
    }

    pub fn state(&self) -> TeleopState {
        self.state
    }

    pub fn executed_count(&self) -> usize {
        self.executed
    }

    pub fn collision_count(&self) -> u32 {
        self.collision_count
    }

    pub fn goal(&self) -> Pose {
        self.params.goal
    }

    pub fn context(&self) -> &Arc<ProtocolContext> {
        &self.context
    }

    pub fn is_blocked(&self) -> bool {
        self.state == TeleopState::Blocked
    }

    /// コントローラの `"ready"` を最大 `timeout` 待つ
    ///
    /// 時間切れでもコントローラなしで開始します。戻り値は準備完了したかどうかです。
    pub fn await_ready(&mut self, timeout: Duration) -> bool {
        let ready = self.context.channel().wait_ready(timeout);
        if self.state == TeleopState::AwaitingReady {
            self.state = TeleopState::Executing;
        }
        ready
    }

    /// 待機中のロボットを再ポーリング
    ///
    /// 最大 `timeout` だけ次のバッチを待ち、届けばそのティックの分として実行します。
    pub fn poll(&mut self, timeout: Duration) -> bool {
        if self.state != TeleopState::Blocked {
            return false;
        }
        match self.context.channel().wait_for_batch(self.executed, timeout) {
            Some(batch) => {
                self.execute(batch, self.pending_t);
                true
            }
            None => false,
        }
    }

    /// 電源オフ（冪等）
    ///
    /// 最初の呼び出しでのみ停止し、終了状態のメッセージを1度だけ送信します。
    pub fn power_off(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.state = TeleopState::PoweredOff;
        self.context.set_robot_status(false, self.cause);
        self.context.send_world();
        info!(
            "ロボット停止: {} (実行コマンド {} 件)",
            self.cause, self.executed
        );
    }

    /// 終了条件の評価。最初に成立したものが確定する
    fn evaluate_termination(&mut self, snapshot: &WorldSnapshot) {
        self.collided = check_collision(
            &self.name,
            &self.current.pose,
            self.params.radius,
            snapshot,
            CollisionFilter::ALL,
        );
        if self.collided {
            self.collision_count += 1;
        }

        if self.collided && self.params.stop_on_collision {
            self.cause.trip(TerminationCause::Collision);
        } else if self.current.pose.distance_to(&self.params.goal) < self.params.goal_margin {
            self.cause.trip(TerminationCause::Success);
        } else if snapshot.sim_t() >= self.params.max_time {
            self.cause.trip(TerminationCause::Timeout);
        }
    }

    /// 1バッチを `arity` サブステップで積分
    fn execute(&mut self, batch: CommandBatch, sim_t: f64) {
        let steps = batch.arity.max(1);
        let sub_dt = self.params.dt / steps as f64;
        let mut pose = self.current.pose;

        for i in 0..steps {
            pose = Pose::new(
                pose.x + batch.linear * pose.heading.cos() * sub_dt,
                pose.y + batch.linear * pose.heading.sin() * sub_dt,
                math_utils::normalize_angle(pose.heading + batch.angular * sub_dt),
            );
            let state = AgentState::new(pose, batch.linear, sim_t + (i + 1) as f64 * sub_dt);
            self.trajectory.push(state);
            self.current = state;
        }

        self.executed += 1;
        self.state = TeleopState::Executing;
        trace!(
            "コマンド #{} 実行: v={:.3}, w={:.3} -> ({:.3}, {:.3})",
            self.executed, batch.linear, batch.angular, pose.x, pose.y
        );
    }
}

impl SimAgent for TeleopActor {
    fn update(&mut self, tick: u64, snapshot: &WorldSnapshot) -> AgentState {
        if !self.running {
            return self.current;
        }

        self.evaluate_termination(snapshot);
        if self.cause.is_terminal() {
            debug!("ロボット終了条件成立: {} (tick {})", self.cause, tick);
            self.power_off();
            return self.current;
        }

        match self.context.channel().get(self.executed) {
            Some(batch) => self.execute(batch, snapshot.sim_t()),
            None => {
                self.state = TeleopState::Blocked;
                self.pending_t = snapshot.sim_t();
            }
        }
        self.current
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn current_state(&self) -> AgentState {
        self.current
    }

    fn trajectory(&self) -> &Trajectory {
        &self.trajectory
    }

    fn termination_cause(&self) -> TerminationCause {
        self.cause
    }

    fn is_finished(&self) -> bool {
        !self.running
    }

    fn force_timeout(&mut self) {
        if self.running {
            self.cause.trip(TerminationCause::Timeout);
            self.power_off();
        }
    }

    fn category(&self) -> AgentCategory {
        AgentCategory::Robot
    }

    fn radius(&self) -> f64 {
        self.params.radius
    }

    fn color(&self) -> &str {
        self.cause.color()
    }

    fn collided(&self) -> bool {
        self.collided
    }
}
