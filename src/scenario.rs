use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::dataset::DatasetMeta;
use crate::models::collision::{OccupancyGrid, OpenSpace, Traversability};
use crate::models::common::Pose;
use std::sync::Arc;

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    /// エピソードの最大時間（秒）
    pub episode_horizon_s: f64,
    #[serde(default)]
    pub seed: u64,
}

/// 静的マップ設定
///
/// `rows` の各文字列が y 方向の1行で、`#` が占有セルを表します。
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MapConfig {
    /// 1セルあたりの大きさ（m）
    pub scale_m: f64,
    pub rows: Vec<String>,
}

/// ロボット設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RobotConfig {
    /// 初期姿勢 `[x, y, theta]`
    pub start: [f64; 3],
    /// 目標姿勢 `[x, y, theta]`
    pub goal: [f64; 3],
    #[serde(default = "default_robot_radius")]
    pub radius_m: f64,
    #[serde(default = "default_goal_margin")]
    pub goal_margin_m: f64,
    #[serde(default = "default_true")]
    pub stop_on_collision: bool,
    /// 最後の指令を複製して制御ホライズンを埋めるか
    #[serde(default)]
    pub repeat_joystick: bool,
    #[serde(default = "default_repeat_freq")]
    pub repeat_freq: f64,
}

/// 歩行者設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PedestrianConfig {
    #[serde(default = "default_ped_radius")]
    pub radius_m: f64,
    #[serde(default = "default_true")]
    pub pause_on_collide: bool,
    #[serde(default = "default_cooldown_ticks")]
    pub collision_cooldown_ticks: u32,
    #[serde(default)]
    pub collide_with_pedestrians: bool,
    /// 生成する歩行者の範囲 `[start, end]`（`end = -1` は残り全員）
    pub ped_range: [i64; 2],
    #[serde(default)]
    pub datasets: Vec<DatasetMeta>,
}

/// コントローラ通信設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProtocolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_host")]
    pub host: String,
    /// コントローラ側の受信ポート（シミュレータからの送信先）
    #[serde(default = "default_port_send")]
    pub port_send: u16,
    /// シミュレータ側の受信ポート
    #[serde(default = "default_port_recv")]
    pub port_recv: u16,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_ms: u64,
    /// 1回の再ポーリングで待つ時間
    #[serde(default = "default_command_wait")]
    pub command_wait_ms: u64,
    /// 1ティックあたりの再ポーリング上限
    #[serde(default = "default_max_block_polls")]
    pub max_block_polls: u32,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_host(),
            port_send: default_port_send(),
            port_recv: default_port_recv(),
            ready_timeout_ms: default_ready_timeout(),
            command_wait_ms: default_command_wait(),
            max_block_polls: default_max_block_polls(),
        }
    }
}

/// ログ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_output")]
    pub output: String,
    #[serde(default = "default_log_dir")]
    pub dir: String,
    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
            dir: default_log_dir(),
            file_prefix: default_file_prefix(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_robot_radius() -> f64 {
    0.3
}
fn default_goal_margin() -> f64 {
    0.5
}
fn default_repeat_freq() -> f64 {
    1.0
}
fn default_ped_radius() -> f64 {
    0.2
}
fn default_cooldown_ticks() -> u32 {
    10
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port_send() -> u16 {
    6001
}
fn default_port_recv() -> u16 {
    6000
}
fn default_ready_timeout() -> u64 {
    30_000
}
fn default_command_wait() -> u64 {
    50
}
fn default_max_block_polls() -> u32 {
    20
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_output() -> String {
    "console".to_string()
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_file_prefix() -> String {
    "pedsim".to_string()
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub map: Option<MapConfig>,
    pub robot: RobotConfig,
    pub pedestrians: PedestrianConfig,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::IoError(path.to_path_buf(), e))?;

        let mut config: ScenarioConfig =
            serde_yaml::from_str(&contents).map_err(|e| ScenarioError::ParseError(path.to_path_buf(), e))?;

        // データセットのパスはシナリオファイルからの相対パス
        if let Some(base) = path.parent() {
            for dataset in &mut config.pedestrians.datasets {
                if let Some(file) = dataset.file.as_mut().filter(|f| f.is_relative()) {
                    *file = base.join(&*file);
                }
            }
        }

        config.validate()?;

        Ok(config)
    }

    /// YAML文字列から読み込み（パス解決なし）
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig = serde_yaml::from_str(contents)
            .map_err(|e| ScenarioError::ParseError(PathBuf::from("<inline>"), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if !is_positive(self.sim.dt_s) {
            return Err(ScenarioError::ValidationError("dt_s must be positive".to_string()));
        }
        if !is_positive(self.sim.episode_horizon_s) {
            return Err(ScenarioError::ValidationError(
                "episode_horizon_s must be positive".to_string(),
            ));
        }

        let [start, end] = self.pedestrians.ped_range;
        if start < 0 || (end >= 0 && end <= start) {
            return Err(ScenarioError::ValidationError(format!(
                "ped_range [{}, {}] selects no pedestrians",
                start, end
            )));
        }

        for dataset in &self.pedestrians.datasets {
            if !is_positive(dataset.fps) {
                return Err(ScenarioError::ValidationError(format!(
                    "dataset {} fps must be positive (got {})",
                    dataset.name, dataset.fps
                )));
            }
            if dataset.file.is_none() {
                return Err(ScenarioError::ValidationError(format!(
                    "dataset {} has no file",
                    dataset.name
                )));
            }
        }

        if !is_positive(self.robot.radius_m) || !is_positive(self.pedestrians.radius_m) {
            return Err(ScenarioError::ValidationError("radii must be positive".to_string()));
        }
        if self.robot.repeat_joystick && !is_positive(self.robot.repeat_freq) {
            return Err(ScenarioError::ValidationError("repeat_freq must be positive".to_string()));
        }

        if let Some(map) = &self.map {
            if !is_positive(map.scale_m) {
                return Err(ScenarioError::ValidationError("map scale_m must be positive".to_string()));
            }
            let width = map.rows.first().map_or(0, |r| r.chars().count());
            if width == 0 || map.rows.iter().any(|r| r.chars().count() != width) {
                return Err(ScenarioError::ValidationError(
                    "map rows must be non-empty and of equal width".to_string(),
                ));
            }
        }

        Ok(())
    }

    /// 静的マップの構築（未指定なら全域通行可能）
    pub fn build_map(&self) -> Arc<dyn Traversability> {
        match &self.map {
            Some(map) => {
                let cells = map
                    .rows
                    .iter()
                    .map(|row| row.chars().map(|c| c != '#').collect())
                    .collect();
                Arc::new(OccupancyGrid::new(map.scale_m, cells))
            }
            None => Arc::new(OpenSpace),
        }
    }

    pub fn robot_start(&self) -> Pose {
        let [x, y, theta] = self.robot.start;
        Pose::new(x, y, theta)
    }

    pub fn robot_goal(&self) -> Pose {
        let [x, y, theta] = self.robot.goal;
        Pose::new(x, y, theta)
    }

    /// 繰り返しポリシーの周波数
    pub fn repeat_freq(&self) -> Option<f64> {
        self.robot.repeat_joystick.then_some(self.robot.repeat_freq)
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒", self.sim.episode_horizon_s);
        println!("シード値: {}", self.sim.seed);
        match &self.map {
            Some(map) => println!(
                "マップ: {}x{} セル ({:.2}m/セル)",
                map.rows.first().map_or(0, |r| r.chars().count()),
                map.rows.len(),
                map.scale_m
            ),
            None => println!("マップ: なし（全域通行可能）"),
        }
        println!();

        println!("=== ロボット ===");
        println!("初期姿勢: {:?}", self.robot.start);
        println!("目標姿勢: {:?} (許容 {:.2}m)", self.robot.goal, self.robot.goal_margin_m);
        println!("衝突で停止: {}", self.robot.stop_on_collision);
        if let Some(freq) = self.repeat_freq() {
            println!("指令の繰り返し: {:.1}Hz", freq);
        }
        println!();

        println!("=== 歩行者 ===");
        let [start, end] = self.pedestrians.ped_range;
        println!("範囲: [{}, {}]", start, end);
        println!(
            "衝突時: {}",
            if self.pedestrians.pause_on_collide {
                format!("{}ティック停止", self.pedestrians.collision_cooldown_ticks)
            } else {
                "終了".to_string()
            }
        );
        println!("データセット: {}件", self.pedestrians.datasets.len());
        for dataset in &self.pedestrians.datasets {
            println!("  {}: {:.1}fps", dataset.name, dataset.fps);
        }
        println!();

        println!("=== 通信 ===");
        if self.protocol.enabled {
            println!("受信: {}:{}", self.protocol.host, self.protocol.port_recv);
            println!("送信: {}:{}", self.protocol.host, self.protocol.port_send);
        } else {
            println!("無効");
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {path}: {err}", path = .0.display(), err = .1)]
    IoError(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {path}: {err}", path = .0.display(), err = .1)]
    ParseError(PathBuf, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    ValidationError(String),
}

/// 有限かつ正の値か（NaN・無限大は不可）
fn is_positive(value: f64) -> bool {
    value.is_finite() && value > 0.0
}
