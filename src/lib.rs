//! 記録済み歩行者の再生と遠隔操作ロボットを共通クロックで動かすシミュレータ

pub mod dataset;
pub mod error;
pub mod logging;
pub mod models;
pub mod protocol;
pub mod scenario;
pub mod simulation;

pub use error::SimError;
pub use simulation::{EpisodeSummary, SimulationEngine};
