use crate::models::{
    common::{AgentCategory, AgentState, TerminationCause, Trajectory},
    snapshot::{SnapshotEntry, WorldSnapshot},
};

/// 全てのシミュレーションエージェントが実装する基本インターフェース
pub trait SimAgent {
    /// 1ティックの処理実行
    ///
    /// `snapshot` はティック開始時点のワールド状態で、更新後の状態を返します。
    fn update(&mut self, tick: u64, snapshot: &WorldSnapshot) -> AgentState;

    /// エージェント名の取得
    fn name(&self) -> &str;

    /// 現在の状態
    fn current_state(&self) -> AgentState;

    /// これまでに生成した軌跡
    fn trajectory(&self) -> &Trajectory;

    /// 終了理由
    fn termination_cause(&self) -> TerminationCause;

    /// 動作を終えたかどうか
    fn is_finished(&self) -> bool;

    /// エピソード時間切れによる強制終了
    fn force_timeout(&mut self);

    fn category(&self) -> AgentCategory;

    fn radius(&self) -> f64;

    /// 描画用の色
    fn color(&self) -> &str;

    /// 直前のティックで衝突したか
    fn collided(&self) -> bool;

    /// スナップショット用のエントリ
    fn snapshot_entry(&self) -> SnapshotEntry {
        SnapshotEntry {
            state: self.current_state(),
            category: self.category(),
            radius: self.radius(),
            collided: self.collided(),
            active: !self.is_finished(),
        }
    }
}
