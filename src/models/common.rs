use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::fmt;

/// ワールド座標系での2次元姿勢
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Pose {
    pub x: f64,       // m
    pub y: f64,       // m
    pub heading: f64, // rad
}

impl Pose {
    pub fn new(x: f64, y: f64, heading: f64) -> Self {
        Self { x, y, heading }
    }

    /// XY平面での距離
    pub fn distance_to(&self, other: &Pose) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    /// `[x, y, heading]` 形式（プロトコル出力用）
    pub fn to_array(&self) -> [f64; 3] {
        [self.x, self.y, self.heading]
    }
}

/// エージェントのある時刻における状態
///
/// 軌跡に記録された後は変更されません。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AgentState {
    pub pose: Pose,
    /// 並進速度（m/s）
    pub speed: f64,
    /// シミュレーション時刻（秒）
    pub timestamp: f64,
}

impl AgentState {
    pub fn new(pose: Pose, speed: f64, timestamp: f64) -> Self {
        Self { pose, speed, timestamp }
    }
}

/// 追記専用の軌跡
///
/// タイムスタンプは単調非減少です。生成したアクターが排他的に所有します。
#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    states: Vec<AgentState>,
}

impl Trajectory {
    pub fn new() -> Self {
        Self { states: Vec::new() }
    }

    pub fn push(&mut self, state: AgentState) {
        debug_assert!(
            self.states.last().is_none_or(|last| last.timestamp <= state.timestamp),
            "軌跡のタイムスタンプが逆行しています"
        );
        self.states.push(state);
    }

    pub fn last(&self) -> Option<&AgentState> {
        self.states.last()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn states(&self) -> &[AgentState] {
        &self.states
    }

    /// 軌跡に沿った累積移動距離（m）
    pub fn path_length(&self) -> f64 {
        self.states
            .windows(2)
            .map(|w| w[0].pose.distance_to(&w[1].pose))
            .sum()
    }
}

/// 終了理由
///
/// 一度終端値になると変化しません（単調）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminationCause {
    #[default]
    Running,
    Timeout,
    Collision,
    Success,
}

impl TerminationCause {
    pub fn is_terminal(&self) -> bool {
        *self != TerminationCause::Running
    }

    /// 実行中なら `cause` を設定する。既に終端値なら何もしない
    pub fn trip(&mut self, cause: TerminationCause) -> bool {
        if self.is_terminal() || !cause.is_terminal() {
            return false;
        }
        *self = cause;
        true
    }

    /// プロトコル出力用の文字列（実行中は `None`）
    pub fn as_protocol_str(&self) -> Option<&'static str> {
        match self {
            TerminationCause::Running => None,
            TerminationCause::Timeout => Some("Timeout"),
            TerminationCause::Collision => Some("Collision"),
            TerminationCause::Success => Some("Success"),
        }
    }

    /// 描画側で使う終了理由ごとの色
    pub fn color(&self) -> &'static str {
        match self {
            TerminationCause::Running => "k",
            TerminationCause::Timeout => "b",
            TerminationCause::Collision => "r",
            TerminationCause::Success => "g",
        }
    }
}

impl fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_protocol_str().unwrap_or("Running"))
    }
}

/// スナップショット上のエージェント種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgentCategory {
    /// 記録軌跡を再生する歩行者
    Pedestrian,
    /// 遠隔操作ロボット
    Robot,
}

/// 数学ユーティリティ関数
pub mod math_utils {
    use super::PI;

    /// 角度を (-π, π] の範囲に正規化
    pub fn normalize_angle(angle: f64) -> f64 {
        let mut normalized = angle % (2.0 * PI);
        if normalized > PI {
            normalized -= 2.0 * PI;
        } else if normalized <= -PI {
            normalized += 2.0 * PI;
        }
        normalized
    }

    /// 2つの角度の差（a2 - a1、(-π, π]）
    pub fn angle_difference(a1: f64, a2: f64) -> f64 {
        normalize_angle(a2 - a1)
    }

    /// 2つの角度の円周平均
    pub fn mean_angle(a1: f64, a2: f64) -> f64 {
        (a1.sin() + a2.sin()).atan2(a1.cos() + a2.cos())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_termination_cause_is_monotonic() {
        let mut cause = TerminationCause::Running;
        assert!(cause.trip(TerminationCause::Collision));
        assert!(!cause.trip(TerminationCause::Success));
        assert!(!cause.trip(TerminationCause::Running));
        assert_eq!(cause, TerminationCause::Collision);
        assert_eq!(cause.as_protocol_str(), Some("Collision"));
    }

    #[test]
    fn test_normalize_angle() {
        assert!((math_utils::normalize_angle(3.0 * PI) - PI).abs() < 1e-9);
        assert!((math_utils::normalize_angle(-PI / 2.0) + PI / 2.0).abs() < 1e-9);
        assert!((math_utils::angle_difference(PI - 0.1, -PI + 0.1) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_mean_angle_wraps() {
        let mean = math_utils::mean_angle(PI - 0.1, -PI + 0.1);
        assert!((mean.abs() - PI).abs() < 1e-9);
    }

    #[test]
    fn test_trajectory_path_length() {
        let mut traj = Trajectory::new();
        traj.push(AgentState::new(Pose::new(0.0, 0.0, 0.0), 0.0, 0.0));
        traj.push(AgentState::new(Pose::new(3.0, 4.0, 0.0), 0.0, 1.0));
        assert_eq!(traj.len(), 2);
        assert!((traj.path_length() - 5.0).abs() < 1e-12);
    }
}
