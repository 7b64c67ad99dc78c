use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Map, Value};

use crate::models::{
    collision::Traversability,
    common::{AgentCategory, AgentState, TerminationCause},
};

/// スナップショット内の1エージェント分の情報
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SnapshotEntry {
    pub state: AgentState,
    /// 種別タグ（歩行者 / ロボット）
    pub category: AgentCategory,
    /// 衝突判定半径（m）
    pub radius: f64,
    /// 直前のティックで衝突していたか
    pub collided: bool,
    /// 終了済みのエージェントは `false`（衝突判定の対象外）
    pub active: bool,
}

/// ティック開始時点のワールド状態
///
/// 公開後は変更されません。全アクターは同じスナップショットを参照するため、
/// 更新順序によって結果が変わることはありません。
#[derive(Debug, Clone)]
pub struct WorldSnapshot {
    tick: u64,
    sim_t: f64,
    map: Arc<dyn Traversability>,
    entries: BTreeMap<String, SnapshotEntry>,
}

impl WorldSnapshot {
    pub fn new(tick: u64, sim_t: f64, map: Arc<dyn Traversability>) -> Self {
        Self {
            tick,
            sim_t,
            map,
            entries: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, name: String, entry: SnapshotEntry) {
        self.entries.insert(name, entry);
    }

    pub fn get(&self, name: &str) -> Option<&SnapshotEntry> {
        self.entries.get(name)
    }

    /// 名前順のエントリ
    pub fn entries(&self) -> impl Iterator<Item = (&String, &SnapshotEntry)> {
        self.entries.iter()
    }

    /// 指定種別のエントリのみ
    pub fn entries_of(&self, category: AgentCategory) -> impl Iterator<Item = (&String, &SnapshotEntry)> {
        self.entries.iter().filter(move |(_, e)| e.category == category)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn sim_t(&self) -> f64 {
        self.sim_t
    }

    pub fn map(&self) -> &dyn Traversability {
        self.map.as_ref()
    }

    /// コントローラへ送るワールドメッセージ（JSON）を生成
    ///
    /// 終了済みのエージェントは含めません。
    pub fn to_world_message(&self, robot_on: bool, cause: TerminationCause) -> Value {
        let mut message = Map::new();
        for (name, entry) in self.entries.iter().filter(|(_, e)| e.active) {
            message.insert(
                name.clone(),
                json!({
                    "x": entry.state.pose.x,
                    "y": entry.state.pose.y,
                    "theta": entry.state.pose.heading,
                    "speed": entry.state.speed,
                    "radius": entry.radius,
                    "collided": entry.collided,
                }),
            );
        }
        message.insert("robot_on".to_string(), Value::Bool(robot_on));
        message.insert(
            "termination_cause".to_string(),
            cause
                .as_protocol_str()
                .map_or(Value::Null, |c| Value::String(c.to_string())),
        );
        message.insert("sim_t".to_string(), json!(self.sim_t));
        Value::Object(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::collision::OpenSpace;
    use crate::models::common::Pose;

    fn entry(x: f64, category: AgentCategory, active: bool) -> SnapshotEntry {
        SnapshotEntry {
            state: AgentState::new(Pose::new(x, 1.0, 0.5), 1.2, 3.0),
            category,
            radius: 0.3,
            collided: false,
            active,
        }
    }

    #[test]
    fn test_world_message_layout() {
        let mut snapshot = WorldSnapshot::new(30, 3.0, Arc::new(OpenSpace));
        snapshot.insert("ped_1".to_string(), entry(2.0, AgentCategory::Pedestrian, true));
        snapshot.insert("ped_2".to_string(), entry(9.0, AgentCategory::Pedestrian, false));
        snapshot.insert("robot_agent".to_string(), entry(0.0, AgentCategory::Robot, true));

        let message = snapshot.to_world_message(true, TerminationCause::Running);
        assert_eq!(message["ped_1"]["x"], json!(2.0));
        assert_eq!(message["ped_1"]["theta"], json!(0.5));
        assert_eq!(message["robot_agent"]["radius"], json!(0.3));
        assert!(message.get("ped_2").is_none());
        assert_eq!(message["robot_on"], json!(true));
        assert_eq!(message["termination_cause"], Value::Null);
        assert_eq!(message["sim_t"], json!(3.0));

        let final_message = snapshot.to_world_message(false, TerminationCause::Success);
        assert_eq!(final_message["termination_cause"], json!("Success"));
    }

    #[test]
    fn test_entries_by_category() {
        let mut snapshot = WorldSnapshot::new(0, 0.0, Arc::new(OpenSpace));
        snapshot.insert("b".to_string(), entry(0.0, AgentCategory::Pedestrian, true));
        snapshot.insert("a".to_string(), entry(0.0, AgentCategory::Pedestrian, true));
        snapshot.insert("robot_agent".to_string(), entry(0.0, AgentCategory::Robot, true));
        let names: Vec<_> = snapshot
            .entries_of(AgentCategory::Pedestrian)
            .map(|(n, _)| n.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(snapshot.len(), 3);
    }
}
