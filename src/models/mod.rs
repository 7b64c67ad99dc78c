// 基本的なデータ型と数学ユーティリティ
pub mod common;

// エージェントの基本インターフェース（trait）定義
pub mod traits;

// 衝突判定とワールドスナップショット
pub mod collision;
pub mod snapshot;

// 記録軌跡と各エージェントモデルの実装
pub mod track;
pub mod replay;
pub mod teleop;

// 便利な re-export
pub use common::*;
pub use traits::*;
pub use collision::{check_collision, CollisionFilter, OccupancyGrid, OpenSpace, Traversability};
pub use snapshot::{SnapshotEntry, WorldSnapshot};
pub use track::{RecordedTrack, TrackSample};
pub use replay::{ReplayActor, ReplayParams, ReplayState};
pub use teleop::{TeleopActor, TeleopParams, TeleopState, ROBOT_NAME};
