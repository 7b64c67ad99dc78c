//! # Dataset モジュール
//!
//! 記録済み歩行者データセットの取り込みを担当します。
//!
//! データセットは `(frame, pedestrian_id, x, y)` の行と、座標変換や
//! 出現タイミングを定めるメタデータから成ります。CSVファイルは転置形式
//! （1行目: frame、2行目: 歩行者ID、3行目: y、4行目: x）で格納されています。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::DatasetError;
use crate::models::track::RecordedTrack;

/// データセットの1行（ある歩行者のあるフレームでの位置）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PedestrianRow {
    pub frame: i64,
    pub ped_id: i64,
    pub x: f64,
    pub y: f64,
}

/// データセットのメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatasetMeta {
    pub name: String,
    /// CSVファイルのパス（プログラムから行を与える場合は不要）
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// ワールド座標への変換オフセット `[x, y, theta]`
    #[serde(default)]
    pub offset: [f64; 3],
    #[serde(default)]
    pub swap_axes: bool,
    #[serde(default)]
    pub flip_x: bool,
    #[serde(default)]
    pub flip_y: bool,
    /// 出現後、歩き出すまでの待ち時間（秒）
    #[serde(default)]
    pub spawn_delay_s: f64,
    /// シミュレーション上で最初に現れる時刻（秒）
    #[serde(default)]
    pub start_t: f64,
    /// 記録時のフレームレート
    pub fps: f64,
}

impl DatasetMeta {
    /// x, y 軸の符号（反転指定時は -1）
    pub fn axis_scale(&self) -> (f64, f64) {
        let sx = if self.flip_x { -1.0 } else { 1.0 };
        let sy = if self.flip_y { -1.0 } else { 1.0 };
        (sx, sy)
    }
}

/// 歩行者ごとに整理されたデータセット
#[derive(Debug, Clone)]
pub struct PedestrianDataset {
    pub meta: DatasetMeta,
    /// データ先頭のフレーム番号
    pub first_frame: i64,
    peds: BTreeMap<i64, Vec<PedestrianRow>>,
}

impl PedestrianDataset {
    /// 行データからデータセットを作成
    ///
    /// 各歩行者の行はフレーム順に並べ替えられます。
    pub fn from_rows(meta: DatasetMeta, rows: Vec<PedestrianRow>) -> Result<Self, DatasetError> {
        let first_frame = rows
            .first()
            .map(|r| r.frame)
            .ok_or_else(|| DatasetError::Malformed(format!("データセット {} に行がありません", meta.name)))?;

        let mut peds: BTreeMap<i64, Vec<PedestrianRow>> = BTreeMap::new();
        for row in rows {
            peds.entry(row.ped_id).or_default().push(row);
        }
        for ped_rows in peds.values_mut() {
            ped_rows.sort_by_key(|r| r.frame);
        }

        Ok(Self { meta, first_frame, peds })
    }

    /// 転置形式のCSVファイルを読み込む
    pub fn load_csv<P: AsRef<Path>>(meta: DatasetMeta, path: P) -> Result<Self, DatasetError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(DatasetError::FileNotFound(path.to_path_buf()));
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .trim(csv::Trim::All)
            .from_path(path)
            .map_err(|source| DatasetError::Csv { path: path.to_path_buf(), source })?;

        let mut columns: Vec<Vec<f64>> = Vec::with_capacity(4);
        for record in reader.records() {
            let record = record.map_err(|source| DatasetError::Csv { path: path.to_path_buf(), source })?;
            let values = record
                .iter()
                .map(|field| {
                    field.parse::<f64>().map_err(|_| {
                        DatasetError::Malformed(format!("数値に変換できません: '{}' ({})", field, path.display()))
                    })
                })
                .collect::<Result<Vec<_>, _>>()?;
            columns.push(values);
        }

        let [frames, ids, ys, xs] = columns.as_slice() else {
            return Err(DatasetError::Malformed(format!(
                "{} は4行 (frame, ped, y, x) である必要があります (実際: {}行)",
                path.display(),
                columns.len()
            )));
        };
        let n = frames.len();
        if ids.len() != n || ys.len() != n || xs.len() != n {
            return Err(DatasetError::Malformed(format!("{} の各行の列数が一致しません", path.display())));
        }

        let rows = (0..n)
            .map(|i| PedestrianRow {
                frame: frames[i].round() as i64,
                ped_id: ids[i].round() as i64,
                x: xs[i],
                y: ys[i],
            })
            .collect();

        debug!("データセット読み込み: {} ({}行)", path.display(), n);
        Self::from_rows(meta, rows)
    }

    pub fn pedestrian_ids(&self) -> impl Iterator<Item = i64> + '_ {
        self.peds.keys().copied()
    }

    pub fn rows_for(&self, ped_id: i64) -> Option<&[PedestrianRow]> {
        self.peds.get(&ped_id).map(Vec::as_slice)
    }

    pub fn max_ped_id(&self) -> i64 {
        self.peds.keys().next_back().copied().unwrap_or(0)
    }

    /// 指定範囲の歩行者の記録軌跡を生成
    ///
    /// `ped_range = (start, end)` に対して ID `start+1 ..= end` を対象とし、
    /// `end = -1` は残り全員を意味します。データセットに存在しないIDや
    /// 軌跡が構築できない歩行者は警告を出してスキップします。
    /// 最初のフレームが `max_time` を超える歩行者に達した時点で打ち切ります。
    pub fn build_tracks(&self, ped_range: (i64, i64), max_time: f64) -> Vec<(i64, RecordedTrack)> {
        let (start_idx, end_idx) = ped_range;
        let max_peds = self.max_ped_id();
        let requested = if end_idx < 0 { max_peds - start_idx } else { end_idx - start_idx };
        let requested = requested.min(max_peds).max(0);

        let mut start_frame = self.first_frame;
        let mut start_frame_fixed = false;
        let mut tracks = Vec::new();

        for i in 0..requested {
            let ped_id = i + start_idx + 1;
            let Some(rows) = self.rows_for(ped_id) else {
                warn!("要求された歩行者 {} はデータセット {} に存在しません", ped_id, self.meta.name);
                continue;
            };

            if !start_frame_fixed {
                // 最初の歩行者を時刻の基準にする
                start_frame = rows[0].frame;
                start_frame_fixed = true;
            }
            if (rows[0].frame - start_frame) as f64 / self.meta.fps > max_time {
                debug!("歩行者 {} 以降はエピソード時間外のため生成を打ち切ります", ped_id);
                break;
            }

            match RecordedTrack::from_rows(rows, &self.meta, start_frame) {
                Ok(track) => tracks.push((ped_id, track)),
                Err(e) => warn!("歩行者 {} ({}) をスキップします: {}", ped_id, self.meta.name, e),
            }
        }

        info!(
            "データセット \"{}\" の範囲 [{}, {}] から {} 人の歩行者を生成",
            self.meta.name,
            start_idx,
            end_idx,
            tracks.len()
        );
        tracks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn meta(fps: f64) -> DatasetMeta {
        DatasetMeta {
            name: "test".to_string(),
            file: None,
            offset: [0.0, 0.0, 0.0],
            swap_axes: false,
            flip_x: false,
            flip_y: false,
            spawn_delay_s: 0.0,
            start_t: 0.0,
            fps,
        }
    }

    fn row(frame: i64, ped_id: i64, x: f64, y: f64) -> PedestrianRow {
        PedestrianRow { frame, ped_id, x, y }
    }

    #[test]
    fn test_groups_rows_by_pedestrian() {
        let rows = vec![
            row(2, 1, 0.2, 0.0),
            row(0, 1, 0.0, 0.0),
            row(1, 2, 5.0, 5.0),
            row(1, 1, 0.1, 0.0),
        ];
        let dataset = PedestrianDataset::from_rows(meta(10.0), rows).unwrap();
        let frames: Vec<i64> = dataset.rows_for(1).unwrap().iter().map(|r| r.frame).collect();
        assert_eq!(frames, vec![0, 1, 2]);
        assert_eq!(dataset.pedestrian_ids().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(dataset.max_ped_id(), 2);
    }

    #[test]
    fn test_build_tracks_skips_missing_and_short() {
        let rows = vec![
            row(0, 1, 0.0, 0.0),
            row(1, 1, 0.1, 0.0),
            row(2, 1, 0.2, 0.0),
            // 歩行者2は欠番、歩行者3は1行のみ
            row(5, 3, 1.0, 1.0),
            row(3, 4, 2.0, 2.0),
            row(4, 4, 2.0, 2.5),
        ];
        let dataset = PedestrianDataset::from_rows(meta(10.0), rows).unwrap();
        let tracks = dataset.build_tracks((0, -1), 100.0);
        let ids: Vec<i64> = tracks.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn test_build_tracks_stops_after_horizon() {
        let rows = vec![
            row(0, 1, 0.0, 0.0),
            row(1, 1, 0.1, 0.0),
            row(500, 2, 1.0, 1.0),
            row(501, 2, 1.1, 1.0),
        ];
        let dataset = PedestrianDataset::from_rows(meta(10.0), rows).unwrap();
        let tracks = dataset.build_tracks((0, 2), 10.0);
        assert_eq!(tracks.len(), 1);
    }

    #[test]
    fn test_load_transposed_csv() {
        let path = std::env::temp_dir().join(format!("pedsim_dataset_{}.csv", std::process::id()));
        {
            let mut file = std::fs::File::create(&path).unwrap();
            writeln!(file, "0,1,2,0").unwrap();
            writeln!(file, "1,1,1,2").unwrap();
            writeln!(file, "0.5,0.5,0.5,3.0").unwrap();
            writeln!(file, "1.0,2.0,3.0,4.0").unwrap();
        }
        let dataset = PedestrianDataset::load_csv(meta(25.0), &path).unwrap();
        std::fs::remove_file(&path).ok();

        let ped1 = dataset.rows_for(1).unwrap();
        assert_eq!(ped1.len(), 3);
        assert_eq!(ped1[2], row(2, 1, 3.0, 0.5));
        assert_eq!(dataset.rows_for(2).unwrap()[0].y, 3.0);
    }

    #[test]
    fn test_load_csv_rejects_wrong_shape() {
        let path = std::env::temp_dir().join(format!("pedsim_bad_{}.csv", std::process::id()));
        std::fs::write(&path, "0,1\n1,1\n").unwrap();
        let result = PedestrianDataset::load_csv(meta(25.0), &path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(result, Err(DatasetError::Malformed(_))));
    }
}
