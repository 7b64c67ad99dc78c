use crate::models::{
    common::{AgentCategory, Pose},
    snapshot::WorldSnapshot,
};

/// 静的マップに対する走行可能性の問い合わせ
pub trait Traversability: Send + Sync + std::fmt::Debug {
    /// 点が走行可能か
    fn is_free(&self, x: f64, y: f64) -> bool;

    /// 半径 `radius` の円盤全体が走行可能か
    fn is_free_disc(&self, x: f64, y: f64, radius: f64) -> bool;
}

/// 障害物のない空間
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenSpace;

impl Traversability for OpenSpace {
    fn is_free(&self, _x: f64, _y: f64) -> bool {
        true
    }

    fn is_free_disc(&self, _x: f64, _y: f64, _radius: f64) -> bool {
        true
    }
}

/// 占有格子マップ
///
/// 格子は `[y][x]` の順に格納され、`true` が走行可能セルです。
/// 格子外は占有扱いとします。
#[derive(Debug, Clone)]
pub struct OccupancyGrid {
    /// 1セルあたりの長さ（m）
    pub scale: f64,
    cells: Vec<Vec<bool>>,
}

impl OccupancyGrid {
    pub fn new(scale: f64, cells: Vec<Vec<bool>>) -> Self {
        Self { scale, cells }
    }

    fn cell(&self, ix: i64, iy: i64) -> bool {
        if ix < 0 || iy < 0 {
            return false;
        }
        self.cells
            .get(iy as usize)
            .and_then(|row| row.get(ix as usize))
            .copied()
            .unwrap_or(false)
    }
}

impl Traversability for OccupancyGrid {
    fn is_free(&self, x: f64, y: f64) -> bool {
        self.cell((x / self.scale).floor() as i64, (y / self.scale).floor() as i64)
    }

    fn is_free_disc(&self, x: f64, y: f64, radius: f64) -> bool {
        let cx = (x / self.scale).floor() as i64;
        let cy = (y / self.scale).floor() as i64;
        let r = (radius / self.scale).ceil() as i64;
        for dy in -r..=r {
            for dx in -r..=r {
                // 円盤に掛かるセルのみを検査
                let px = ((cx + dx) as f64 + 0.5) * self.scale;
                let py = ((cy + dy) as f64 + 0.5) * self.scale;
                let reach = radius + self.scale * std::f64::consts::FRAC_1_SQRT_2;
                if (px - x).hypot(py - y) > reach {
                    continue;
                }
                if !self.cell(cx + dx, cy + dy) {
                    return false;
                }
            }
        }
        true
    }
}

/// 衝突判定で考慮する相手
#[derive(Debug, Clone, Copy)]
pub struct CollisionFilter {
    pub include_pedestrians: bool,
    pub include_robots: bool,
    /// 静的マップとの衝突も判定するか
    pub include_map: bool,
}

impl CollisionFilter {
    pub const ALL: CollisionFilter = CollisionFilter {
        include_pedestrians: true,
        include_robots: true,
        include_map: true,
    };

    fn admits(&self, category: AgentCategory) -> bool {
        match category {
            AgentCategory::Pedestrian => self.include_pedestrians,
            AgentCategory::Robot => self.include_robots,
        }
    }
}

/// スナップショットに対する衝突判定
///
/// 自分自身と非アクティブなエントリは除外します。
pub fn check_collision(
    name: &str,
    pose: &Pose,
    radius: f64,
    snapshot: &WorldSnapshot,
    filter: CollisionFilter,
) -> bool {
    if filter.include_map && !snapshot.map().is_free_disc(pose.x, pose.y, radius) {
        return true;
    }
    snapshot.entries().any(|(other_name, entry)| {
        other_name != name
            && entry.active
            && filter.admits(entry.category)
            && pose.distance_to(&entry.state.pose) < radius + entry.radius
    })
}
