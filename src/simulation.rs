//! # Simulation モジュール
//!
//! 歩行者再生と遠隔操作ロボットのシミュレーションエンジンを提供します。
//!
//! 固定時間刻み（Δt）の共通クロックで全エージェントを進め、衝突と終了条件を
//! 判定します。ティックループは単一スレッドで動作し、並行に動くのは
//! コントローラとのソケット受信スレッドだけです。
//!
//! ## ティックの処理順序
//!
//! 1. **スナップショット作成**: ティック開始時点の全エージェントの状態を固定
//! 2. **歩行者更新**: 記録軌跡の再生（登録順）
//! 3. **ロボット更新**: 受信済みコマンドの実行、なければ待機
//! 4. **再ポーリング**: 待機中のロボットに限り、上限付きでコマンド到着を待つ
//! 5. **公開**: 次のティックの状態をプロトコル層へ公開
//!
//! 全員が同じスナップショットを参照するため、更新順序は結果に影響しません。
//!
//! ## 使用例
//!
//! ```no_run
//! use pedsim::scenario::ScenarioConfig;
//! use pedsim::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/corridor.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let summary = engine.run()?;
//! println!("{}", summary.robot_cause);
//! # Ok::<(), pedsim::error::SimError>(())
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::{debug, info, trace, warn};

use crate::dataset::PedestrianDataset;
use crate::error::SimError;
use crate::models::*;
use crate::protocol::{CommandChannel, ProtocolContext, ProtocolListener, TcpPeerLink};
use crate::scenario::ScenarioConfig;

/// シミュレーション上のアクター
#[derive(Debug)]
pub enum Actor {
    Replay(ReplayActor),
    Teleop(TeleopActor),
}

impl Actor {
    pub fn as_agent(&self) -> &dyn SimAgent {
        match self {
            Actor::Replay(actor) => actor,
            Actor::Teleop(actor) => actor,
        }
    }

    pub fn as_agent_mut(&mut self) -> &mut dyn SimAgent {
        match self {
            Actor::Replay(actor) => actor,
            Actor::Teleop(actor) => actor,
        }
    }
}

/// エピソードの集計結果
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub episode_name: String,
    /// 終了時のシミュレーション時刻（秒）
    pub sim_time: f64,
    pub ticks: u64,
    pub robot_cause: TerminationCause,
    /// 受信したコマンドバッチ数
    pub commands_received: usize,
    pub commands_executed: usize,
    pub robot_collisions: u32,
    pub robot_path_length: f64,
    pub pedestrians: usize,
    /// 軌跡を最後まで再生した歩行者数
    pub pedestrians_completed: usize,
    pub pedestrian_collisions: u32,
}

impl EpisodeSummary {
    pub fn log(&self) {
        info!("=== エピソード結果: {} ===", self.episode_name);
        info!("実行時間: {:.2}秒 ({} ティック)", self.sim_time, self.ticks);
        info!("ロボット終了理由: {}", self.robot_cause);
        info!(
            "コマンド: 受信 {} 件 / 実行 {} 件",
            self.commands_received, self.commands_executed
        );
        info!("ロボット走行距離: {:.2}m (衝突 {} 回)", self.robot_path_length, self.robot_collisions);
        info!(
            "歩行者: {} 人中 {} 人が再生完了 (衝突 {} 回)",
            self.pedestrians, self.pedestrians_completed, self.pedestrian_collisions
        );
    }
}

pub struct SimulationEngine {
    pub current_time: f64,
    pub dt: f64,
    pub max_time: f64,
    pub step_count: u64,

    actors: Vec<Actor>,
    map: Arc<dyn Traversability>,
    context: Arc<ProtocolContext>,
    listener: Option<ProtocolListener>,
    pedestrian_counter: usize,

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        let dt = scenario.sim.dt_s;
        let max_time = scenario.sim.episode_horizon_s;
        let map = scenario.build_map();
        let context = Arc::new(ProtocolContext::offline(scenario.repeat_freq()));

        Self {
            current_time: 0.0,
            dt,
            max_time,
            step_count: 0,
            actors: Vec::new(),
            map,
            context,
            listener: None,
            pedestrian_counter: 0,
            scenario_config: scenario,
            verbose_level,
        }
    }

    /// 通信・歩行者・ロボットの準備
    pub fn initialize(&mut self) -> Result<(), SimError> {
        if self.verbose_level > 0 {
            info!("シミュレーションエンジンを初期化中...");
        }

        self.initialize_protocol()?;
        self.initialize_pedestrians()?;
        self.initialize_robot();

        self.context.publish(self.build_snapshot());
        self.send_episode_metadata();

        if self.verbose_level > 0 {
            info!("初期化完了:");
            info!("  歩行者: {}人", self.pedestrian_count());
            info!("  ロボット: {}", if self.robot().is_some() { "1台" } else { "なし" });
        }

        Ok(())
    }

    fn initialize_protocol(&mut self) -> Result<(), SimError> {
        let protocol = &self.scenario_config.protocol;
        if !protocol.enabled {
            info!("コントローラ通信は無効です");
            return Ok(());
        }

        let send_addr = format!("{}:{}", protocol.host, protocol.port_send);
        let recv_addr = format!("{}:{}", protocol.host, protocol.port_recv);
        let channel = CommandChannel::new(self.scenario_config.repeat_freq());
        let context = Arc::new(ProtocolContext::new(channel, Box::new(TcpPeerLink::new(send_addr.clone()))));

        let listener = ProtocolListener::spawn(&recv_addr, Arc::clone(&context))?;
        debug!("コントローラ送信先: {}", send_addr);

        self.context = context;
        self.listener = Some(listener);
        Ok(())
    }

    fn initialize_pedestrians(&mut self) -> Result<(), SimError> {
        let datasets = self.scenario_config.pedestrians.datasets.clone();
        for meta in datasets {
            let Some(file) = meta.file.clone() else {
                continue;
            };
            let dataset = PedestrianDataset::load_csv(meta, &file)?;
            self.add_dataset(&dataset);
        }
        Ok(())
    }

    fn initialize_robot(&mut self) {
        let robot = &self.scenario_config.robot;
        let params = TeleopParams {
            dt: self.dt,
            radius: robot.radius_m,
            goal: self.scenario_config.robot_goal(),
            goal_margin: robot.goal_margin_m,
            max_time: self.max_time,
            stop_on_collision: robot.stop_on_collision,
        };
        let start = self.scenario_config.robot_start();
        if self.verbose_level > 1 {
            debug!(
                "ロボット初期化: ({:.2}, {:.2}) -> ({:.2}, {:.2})",
                start.x, start.y, params.goal.x, params.goal.y
            );
        }
        self.actors
            .push(Actor::Teleop(TeleopActor::new(start, params, Arc::clone(&self.context))));
    }

    /// データセットから歩行者を生成して追加
    pub fn add_dataset(&mut self, dataset: &PedestrianDataset) -> usize {
        let [start, end] = self.scenario_config.pedestrians.ped_range;
        let tracks = dataset.build_tracks((start, end), self.max_time);
        let count = tracks.len();
        for (ped_id, track) in tracks {
            let name = self.add_pedestrian(track);
            if self.verbose_level > 1 {
                debug!("歩行者初期化: {} ({} #{})", name, dataset.meta.name, ped_id);
            }
        }
        count
    }

    /// 記録軌跡から歩行者を1人追加し、その名前を返す
    ///
    /// ロボットより前に更新されるよう、ロボットの手前に挿入します。
    pub fn add_pedestrian(&mut self, track: RecordedTrack) -> String {
        let peds = &self.scenario_config.pedestrians;
        let params = ReplayParams {
            dt: self.dt,
            radius: peds.radius_m,
            pause_on_collide: peds.pause_on_collide,
            collision_cooldown_ticks: peds.collision_cooldown_ticks,
            collide_with_pedestrians: peds.collide_with_pedestrians,
        };
        let name = format!("prerec_{:04}", self.pedestrian_counter);
        self.pedestrian_counter += 1;

        let actor = Actor::Replay(ReplayActor::new(name.clone(), track, params));
        let position = self
            .actors
            .iter()
            .position(|a| matches!(a, Actor::Teleop(_)))
            .unwrap_or(self.actors.len());
        self.actors.insert(position, actor);
        name
    }

    pub fn actors(&self) -> &[Actor] {
        &self.actors
    }

    pub fn robot(&self) -> Option<&TeleopActor> {
        self.actors.iter().find_map(|a| match a {
            Actor::Teleop(robot) => Some(robot),
            Actor::Replay(_) => None,
        })
    }

    pub fn pedestrian_count(&self) -> usize {
        self.actors.iter().filter(|a| matches!(a, Actor::Replay(_))).count()
    }

    pub fn context(&self) -> &Arc<ProtocolContext> {
        &self.context
    }

    /// コントローラからの受信アドレス（通信有効時のみ）
    pub fn listener_addr(&self) -> Option<std::net::SocketAddr> {
        self.listener.as_ref().map(ProtocolListener::local_addr)
    }

    /// エピソードを最後まで実行
    pub fn run(&mut self) -> Result<EpisodeSummary, SimError> {
        info!("=== シミュレーション実行開始 ===");
        self.await_controller();

        while !self.all_finished() {
            if self.current_time > self.max_time {
                self.force_timeout();
                break;
            }

            self.step();

            if self.verbose_level > 2 {
                trace!("時刻: {:.2}秒 (ステップ: {})", self.current_time, self.step_count);
            }

            if self.step_count % 100 == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.max_time) * 100.0;
                info!(
                    "進行状況: {:.1}% ({:.1}/{:.1}秒)",
                    progress, self.current_time, self.max_time
                );
            }
        }

        self.shutdown();

        info!("=== シミュレーション完了 ===");
        let summary = self.summary();
        summary.log();
        Ok(summary)
    }

    /// 1ティック進める
    pub fn step(&mut self) {
        let snapshot = self.build_snapshot();
        let tick = self.step_count;

        for actor in &mut self.actors {
            actor.as_agent_mut().update(tick, &snapshot);
        }

        let protocol = &self.scenario_config.protocol;
        let wait = Duration::from_millis(protocol.command_wait_ms);
        let max_polls = protocol.max_block_polls;
        for actor in &mut self.actors {
            if let Actor::Teleop(robot) = actor {
                poll_blocked_robot(robot, wait, max_polls);
            }
        }

        self.current_time += self.dt;
        self.step_count += 1;
        self.context.publish(self.build_snapshot());
    }

    /// ティック開始時点のスナップショット
    fn build_snapshot(&self) -> WorldSnapshot {
        let mut snapshot = WorldSnapshot::new(self.step_count, self.current_time, Arc::clone(&self.map));
        for actor in &self.actors {
            let agent = actor.as_agent();
            snapshot.insert(agent.name().to_string(), agent.snapshot_entry());
        }
        snapshot
    }

    fn all_finished(&self) -> bool {
        self.actors.iter().all(|a| a.as_agent().is_finished())
    }

    /// 実行中の全アクターを時間切れで終了させる
    fn force_timeout(&mut self) {
        let mut count = 0;
        for actor in &mut self.actors {
            let agent = actor.as_agent_mut();
            if !agent.is_finished() {
                agent.force_timeout();
                count += 1;
            }
        }
        info!("エピソード時間切れ: {} 体のアクターを終了", count);
    }

    /// コントローラの準備完了を待つ
    fn await_controller(&mut self) {
        let timeout = Duration::from_millis(self.scenario_config.protocol.ready_timeout_ms);
        for actor in &mut self.actors {
            if let Actor::Teleop(robot) = actor {
                if robot.await_ready(timeout) {
                    info!("コントローラ準備完了");
                } else if self.listener.is_some() {
                    warn!("コントローラの準備完了を受信できませんでした。コントローラなしで開始します");
                }
            }
        }
    }

    /// 開始前にエピソード情報をコントローラへ送信
    fn send_episode_metadata(&self) {
        if self.listener.is_none() {
            return;
        }
        let robot = &self.scenario_config.robot;
        let mut pedestrians = Map::new();
        for actor in &self.actors {
            if let Actor::Replay(ped) = actor {
                pedestrians.insert(ped.name().to_string(), json!(ped.current_state().pose.to_array()));
            }
        }
        let mut robots = Map::new();
        robots.insert(
            ROBOT_NAME.to_string(),
            json!({
                "start_config": robot.start,
                "goal_config": robot.goal,
                "radius": robot.radius_m,
            }),
        );
        let message = json!({
            "episode_name": self.scenario_config.meta.name,
            "episode_max_time": self.max_time,
            "sim_t": self.current_time,
            "dt": self.dt,
            "robots": Value::Object(robots),
            "pedestrians": Value::Object(pedestrians),
        });
        self.context.send_json(&message);
    }

    fn shutdown(&mut self) {
        if let Some(mut listener) = self.listener.take() {
            listener.stop();
        }
    }

    pub fn summary(&self) -> EpisodeSummary {
        let mut summary = EpisodeSummary {
            episode_name: self.scenario_config.meta.name.clone(),
            sim_time: self.current_time,
            ticks: self.step_count,
            robot_cause: TerminationCause::Running,
            commands_received: self.context.channel().len(),
            commands_executed: 0,
            robot_collisions: 0,
            robot_path_length: 0.0,
            pedestrians: 0,
            pedestrians_completed: 0,
            pedestrian_collisions: 0,
        };

        for actor in &self.actors {
            match actor {
                Actor::Replay(ped) => {
                    summary.pedestrians += 1;
                    summary.pedestrian_collisions += ped.collision_count();
                    if ped.termination_cause() == TerminationCause::Success {
                        summary.pedestrians_completed += 1;
                    }
                }
                Actor::Teleop(robot) => {
                    summary.robot_cause = robot.termination_cause();
                    summary.commands_executed = robot.executed_count();
                    summary.robot_collisions = robot.collision_count();
                    summary.robot_path_length = robot.trajectory().path_length();
                }
            }
        }
        summary
    }
}

impl Drop for SimulationEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// 待機中のロボットを上限付きで再ポーリング
fn poll_blocked_robot(robot: &mut TeleopActor, wait: Duration, max_polls: u32) {
    let mut polls = 0;
    while robot.is_blocked() && polls < max_polls {
        if robot.context().channel().peer_gone() {
            break;
        }
        robot.poll(wait);
        polls += 1;
    }
    if robot.is_blocked() && polls > 0 {
        trace!("ロボット待機継続 ({} 回ポーリング)", polls);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::ScenarioConfig;

    fn scenario(horizon: f64, goal_x: f64) -> ScenarioConfig {
        let yaml = format!(
            r#"
meta:
  version: "1.0"
  name: unit
sim:
  dt_s: 0.1
  episode_horizon_s: {horizon}
robot:
  start: [0.0, 0.0, 0.0]
  goal: [{goal_x}, 0.0, 0.0]
  goal_margin_m: 0.3
pedestrians:
  ped_range: [0, -1]
  collision_cooldown_ticks: 3
protocol:
  enabled: false
"#
        );
        ScenarioConfig::from_yaml_str(&yaml).unwrap()
    }

    fn line_track(from: (f64, f64), to: (f64, f64), duration: f64) -> RecordedTrack {
        let n = 11;
        let heading = (to.1 - from.1).atan2(to.0 - from.0);
        let times: Vec<f64> = (0..n).map(|i| duration * i as f64 / (n - 1) as f64).collect();
        let poses = (0..n)
            .map(|i| {
                let s = i as f64 / (n - 1) as f64;
                Pose::new(from.0 + (to.0 - from.0) * s, from.1 + (to.1 - from.1) * s, heading)
            })
            .collect();
        RecordedTrack::new(times, poses, vec![1.0; n]).unwrap()
    }

    #[test]
    fn test_pedestrians_update_before_robot() {
        let mut engine = SimulationEngine::new(scenario(5.0, 2.0), 0);
        engine.initialize().unwrap();
        engine.add_pedestrian(line_track((0.0, 5.0), (2.0, 5.0), 1.0));
        let names: Vec<&str> = engine.actors().iter().map(|a| a.as_agent().name()).collect();
        assert_eq!(names, vec!["prerec_0000", ROBOT_NAME]);
    }

    #[test]
    fn test_robot_reaches_goal() {
        let mut engine = SimulationEngine::new(scenario(10.0, 2.0), 0);
        engine.initialize().unwrap();
        engine.add_pedestrian(line_track((0.0, 5.0), (2.0, 5.0), 1.0));
        engine
            .context()
            .channel()
            .push_commands(&[1.0; 30], &[0.0; 30])
            .unwrap();

        let summary = engine.run().unwrap();
        assert_eq!(summary.robot_cause, TerminationCause::Success);
        assert_eq!(summary.commands_received, 30);
        assert!(summary.commands_executed >= 17 && summary.commands_executed < 30);
        assert_eq!(summary.pedestrians, 1);
        assert_eq!(summary.pedestrians_completed, 1);
        assert!(!engine.context().robot_on());
    }

    #[test]
    fn test_horizon_forces_timeout() {
        let mut engine = SimulationEngine::new(scenario(1.0, 50.0), 0);
        engine.initialize().unwrap();
        engine.add_pedestrian(line_track((10.0, 10.0), (20.0, 10.0), 100.0));

        let summary = engine.run().unwrap();
        assert_eq!(summary.robot_cause, TerminationCause::Timeout);
        assert_eq!(summary.commands_executed, 0);
        for actor in engine.actors() {
            assert_eq!(actor.as_agent().termination_cause(), TerminationCause::Timeout);
            assert!(actor.as_agent().is_finished());
        }
        assert!(engine.current_time > 1.0);
    }

    #[test]
    fn test_pedestrian_walking_into_robot() {
        let mut engine = SimulationEngine::new(scenario(10.0, 50.0), 0);
        engine.initialize().unwrap();
        engine.add_pedestrian(line_track((3.0, 0.0), (-3.0, 0.0), 3.0));

        let summary = engine.run().unwrap();
        assert_eq!(summary.robot_cause, TerminationCause::Collision);
        assert!(summary.robot_collisions >= 1);
        assert!(summary.pedestrian_collisions >= 1);
        // 衝突で停止した分だけ歩行者は遅れて再生を終える
        let Actor::Replay(ped) = &engine.actors()[0] else {
            panic!("先頭は歩行者のはず");
        };
        assert!(ped.pause_offset() > 0.0);
    }

    #[test]
    fn test_snapshot_reflects_tick_start() {
        let mut engine = SimulationEngine::new(scenario(5.0, 50.0), 0);
        engine.initialize().unwrap();
        engine.add_pedestrian(line_track((10.0, 0.0), (20.0, 0.0), 1.0));
        engine.step();
        engine.step();

        let message = engine.context().world_message().unwrap();
        assert_eq!(message["robot_on"], true);
        assert!((message["sim_t"].as_f64().unwrap() - 0.2).abs() < 1e-9);
        assert!(message.get("prerec_0000").is_some());
        assert!(message.get(ROBOT_NAME).is_some());
    }
}
