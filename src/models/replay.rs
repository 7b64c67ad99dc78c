use tracing::{debug, trace};

use crate::models::{
    collision::{check_collision, CollisionFilter},
    common::{math_utils, AgentCategory, AgentState, Pose, TerminationCause, Trajectory},
    snapshot::WorldSnapshot,
    track::RecordedTrack,
    traits::SimAgent,
};

/// 補間向きと記録向きの平均との許容差（rad）。これを超えると平均を採用する
const HEADING_TOLERANCE: f64 = 0.5;

/// これ未満の移動量では向きを計算しない（m）
const MIN_DISPLACEMENT: f64 = 1e-9;

/// 再生アクターの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayState {
    Playing,
    CollisionPaused,
    Finished,
}

/// 再生アクターのパラメータ
#[derive(Debug, Clone, Copy)]
pub struct ReplayParams {
    /// シミュレーションの時間刻み（秒）
    pub dt: f64,
    pub radius: f64,
    /// 衝突時に一時停止するか（false なら衝突で終了）
    pub pause_on_collide: bool,
    /// 衝突後に停止するティック数
    pub collision_cooldown_ticks: u32,
    /// 他の歩行者との衝突も判定するか
    pub collide_with_pedestrians: bool,
}

/// 記録軌跡を再生する歩行者
///
/// シミュレーション時刻から一時停止分のオフセットを引いた「実効再生時刻」で
/// 記録軌跡を補間します。衝突すると一定ティック停止し、その分だけ
/// 再生時刻が後ろにずれます。
#[derive(Debug, Clone)]
pub struct ReplayActor {
    name: String,
    track: RecordedTrack,
    params: ReplayParams,
    state: ReplayState,
    cause: TerminationCause,
    /// 累積の一時停止時間（秒）
    pause_offset: f64,
    cooldown: u32,
    current: AgentState,
    trajectory: Trajectory,
    collided: bool,
    collision_count: u32,
    color: String,
}

impl ReplayActor {
    pub fn new(name: String, track: RecordedTrack, params: ReplayParams) -> Self {
        let first = *track.first();
        Self {
            name,
            track,
            params,
            state: ReplayState::Playing,
            cause: TerminationCause::Running,
            pause_offset: 0.0,
            cooldown: 0,
            current: AgentState::new(first.pose, first.speed, 0.0),
            trajectory: Trajectory::new(),
            collided: false,
            collision_count: 0,
            color: "b".to_string(),
        }
    }

    pub fn with_color(mut self, color: &str) -> Self {
        self.color = color.to_string();
        self
    }

    pub fn state(&self) -> ReplayState {
        self.state
    }

    pub fn track(&self) -> &RecordedTrack {
        &self.track
    }

    pub fn pause_offset(&self) -> f64 {
        self.pause_offset
    }

    pub fn collision_count(&self) -> u32 {
        self.collision_count
    }

    /// 実効再生時刻
    pub fn replay_time(&self, sim_t: f64) -> f64 {
        sim_t - self.pause_offset
    }

    fn filter(&self) -> CollisionFilter {
        CollisionFilter {
            include_pedestrians: self.params.collide_with_pedestrians,
            include_robots: true,
            // 歩行者は静的マップと衝突しない
            include_map: false,
        }
    }

    fn finish(&mut self, cause: TerminationCause) {
        self.state = ReplayState::Finished;
        self.cause.trip(cause);
    }

    /// 衝突判定。一時停止中は新たな停止を積み増さない
    fn sense(&mut self, snapshot: &WorldSnapshot) {
        self.collided = false;
        if self.cooldown > 0 {
            return;
        }
        if !check_collision(&self.name, &self.current.pose, self.params.radius, snapshot, self.filter()) {
            return;
        }

        self.collided = true;
        self.collision_count += 1;
        if self.params.pause_on_collide {
            let k = self.params.collision_cooldown_ticks;
            self.cooldown = k;
            self.pause_offset += k as f64 * self.params.dt;
            debug!(
                "歩行者 {} が衝突: {} ティック停止 (累積オフセット {:.2}秒)",
                self.name, k, self.pause_offset
            );
        } else {
            debug!("歩行者 {} が衝突により終了", self.name);
            self.finish(TerminationCause::Collision);
        }
    }

    /// 実効再生時刻 `t` における姿勢と速度
    fn interpolate(&self, t: f64) -> (Pose, f64) {
        if t < self.track.second_time() {
            let first = self.track.first();
            return (first.pose, first.speed);
        }

        let (x, y) = self.track.position_at(t);
        let (lo, hi) = self.track.bracket(t);
        let samples = self.track.samples();
        let avg_heading = math_utils::mean_angle(samples[lo].pose.heading, samples[hi].pose.heading);

        let prev = self.current.pose;
        let mut heading = if (x - prev.x).hypot(y - prev.y) < MIN_DISPLACEMENT {
            prev.heading
        } else {
            (y - prev.y).atan2(x - prev.x)
        };
        // 移動量が極小のとき atan2 が不安定になるため、記録向きの平均に戻す
        if math_utils::angle_difference(heading, avg_heading).abs() > HEADING_TOLERANCE {
            heading = avg_heading;
        }

        (Pose::new(x, y, heading), samples[lo].speed)
    }
}

impl SimAgent for ReplayActor {
    fn update(&mut self, tick: u64, snapshot: &WorldSnapshot) -> AgentState {
        if self.state == ReplayState::Finished {
            return self.current;
        }
        let sim_t = snapshot.sim_t();

        self.sense(snapshot);
        if self.state == ReplayState::Finished {
            return self.current;
        }

        if self.cooldown > 0 {
            self.cooldown -= 1;
            if self.cooldown > 0 {
                self.state = ReplayState::CollisionPaused;
                trace!("歩行者 {} 停止中 (残り {} ティック)", self.name, self.cooldown);
                return self.current;
            }
        }
        self.state = ReplayState::Playing;

        let t = self.replay_time(sim_t);
        if t >= self.track.end_time() {
            // 最後の記録位置へ瞬間移動して終了
            let last = *self.track.last();
            self.current = AgentState::new(last.pose, last.speed, sim_t);
            self.trajectory.push(self.current);
            self.finish(TerminationCause::Success);
            debug!("歩行者 {} が軌跡の再生を完了 (tick {})", self.name, tick);
            return self.current;
        }

        let (pose, speed) = self.interpolate(t);
        self.current = AgentState::new(pose, speed, sim_t);
        self.trajectory.push(self.current);
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
        self.state == ReplayState::Finished
    }

    fn force_timeout(&mut self) {
        if self.state != ReplayState::Finished {
            self.finish(TerminationCause::Timeout);
        }
    }

    fn category(&self) -> AgentCategory {
        AgentCategory::Pedestrian
    }

    fn radius(&self) -> f64 {
        self.params.radius
    }

    fn color(&self) -> &str {
        &self.color
    }

    fn collided(&self) -> bool {
        self.collided
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::collision::OpenSpace;
    use crate::models::snapshot::SnapshotEntry;
    use std::f64::consts::FRAC_PI_2;
    use std::sync::Arc;

    const DT: f64 = 0.1;

    fn params(pause_on_collide: bool, cooldown: u32) -> ReplayParams {
        ReplayParams {
            dt: DT,
            radius: 0.2,
            pause_on_collide,
            collision_cooldown_ticks: cooldown,
            collide_with_pedestrians: false,
        }
    }

    fn track(headings: f64) -> RecordedTrack {
        let times = vec![0.0, 1.0, 2.0, 3.0];
        let poses = (0..4).map(|i| Pose::new(i as f64, 0.0, headings)).collect();
        RecordedTrack::new(times, poses, vec![0.0, 0.0, 1.0, 1.0]).unwrap()
    }

    fn diagonal_track() -> RecordedTrack {
        let times: Vec<f64> = (0..21).map(|i| i as f64 * 0.2).collect();
        let poses = (0..21)
            .map(|i| Pose::new(i as f64 * 0.1, i as f64 * 0.05, 0.5_f64.atan2(1.0)))
            .collect();
        RecordedTrack::new(times, poses, vec![0.5; 21]).unwrap()
    }

    fn snapshot(tick: u64, robot_at: Option<(f64, f64)>) -> WorldSnapshot {
        let mut s = WorldSnapshot::new(tick, tick as f64 * DT, Arc::new(OpenSpace));
        if let Some((x, y)) = robot_at {
            s.insert(
                "robot_agent".to_string(),
                SnapshotEntry {
                    state: AgentState::new(Pose::new(x, y, 0.0), 0.0, 0.0),
                    category: AgentCategory::Robot,
                    radius: 0.3,
                    collided: false,
                    active: true,
                },
            );
        }
        s
    }

    fn at_time(sim_t: f64) -> WorldSnapshot {
        WorldSnapshot::new(0, sim_t, Arc::new(OpenSpace))
    }

    #[test]
    fn test_before_second_sample_uses_first_sample() {
        let mut actor = ReplayActor::new("p".to_string(), track(0.0), params(true, 5));
        let state = actor.update(0, &at_time(0.5));
        assert_eq!(state.pose, Pose::new(0.0, 0.0, 0.0));
        assert_eq!(actor.state(), ReplayState::Playing);
    }

    #[test]
    fn test_interpolates_and_finishes_at_end() {
        let mut actor = ReplayActor::new("p".to_string(), track(0.0), params(true, 5));
        let mid = actor.update(15, &at_time(1.5));
        assert!((mid.pose.x - 1.5).abs() < 1e-9);
        assert!(!actor.is_finished());

        let end = actor.update(100, &at_time(10.0));
        assert!((end.pose.x - 3.0).abs() < 1e-12);
        assert!(actor.is_finished());
        assert_eq!(actor.termination_cause(), TerminationCause::Success);
        assert_eq!(actor.trajectory().len(), 2);

        // 終了後は何もしない
        actor.update(101, &at_time(10.1));
        assert_eq!(actor.trajectory().len(), 2);
    }

    #[test]
    fn test_heading_falls_back_to_recorded_average() {
        // 記録上の向きは +y だが位置は +x に進む
        let mut actor = ReplayActor::new("p".to_string(), track(FRAC_PI_2), params(true, 5));
        let state = actor.update(15, &at_time(1.5));
        assert!((state.pose.heading - FRAC_PI_2).abs() < 1e-9);

        let mut consistent = ReplayActor::new("q".to_string(), track(0.2), params(true, 5));
        let state = consistent.update(15, &at_time(1.5));
        // atan2 の結果 (0) は平均 (0.2) から許容差内
        assert!(state.pose.heading.abs() < 1e-9);
    }

    #[test]
    fn test_collision_without_pause_finishes() {
        let mut actor = ReplayActor::new("p".to_string(), track(0.0), params(false, 5));
        actor.update(0, &snapshot(0, Some((0.1, 0.0))));
        assert!(actor.is_finished());
        assert!(actor.collided());
        assert_eq!(actor.termination_cause(), TerminationCause::Collision);
        assert!(actor.trajectory().is_empty());
    }

    #[test]
    fn test_collision_pause_shifts_replay_by_cooldown() {
        let k = 4;
        let collide_tick = 12;
        let ticks = 40;

        let mut free = ReplayActor::new("p".to_string(), diagonal_track(), params(true, k));
        let free_poses: Vec<Pose> = (0..ticks).map(|i| free.update(i, &snapshot(i, None)).pose).collect();

        let mut paused = ReplayActor::new("p".to_string(), diagonal_track(), params(true, k));
        let mut paused_poses = Vec::new();
        for i in 0..ticks {
            let robot = if i == collide_tick {
                let p = paused.current_state().pose;
                Some((p.x, p.y))
            } else {
                None
            };
            paused_poses.push(paused.update(i, &snapshot(i, robot)).pose);
        }

        assert_eq!(paused.collision_count(), 1);
        assert!((paused.pause_offset() - k as f64 * DT).abs() < 1e-12);

        let c = collide_tick as usize;
        let k = k as usize;
        // 衝突前は同一
        assert_eq!(&paused_poses[..c], &free_poses[..c]);
        // 停止中は衝突直前の姿勢を保持
        for pose in &paused_poses[c..c + k - 1] {
            assert_eq!(*pose, free_poses[c - 1]);
        }
        // 停止後は k ティック遅れで同一
        for j in (c + k - 1)..ticks as usize {
            let a = paused_poses[j];
            let b = free_poses[j - k];
            assert!((a.x - b.x).abs() < 1e-9 && (a.y - b.y).abs() < 1e-9, "tick {}", j);
            assert!((a.heading - b.heading).abs() < 1e-9, "tick {}", j);
        }
    }

    #[test]
    fn test_force_timeout() {
        let mut actor = ReplayActor::new("p".to_string(), track(0.0), params(true, 5));
        actor.force_timeout();
        assert!(actor.is_finished());
        assert_eq!(actor.termination_cause(), TerminationCause::Timeout);
    }
}
