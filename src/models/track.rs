use crate::dataset::{DatasetMeta, PedestrianRow};
use crate::error::TrackError;
use crate::models::common::Pose;

/// 範囲外をクランプする1次元の線形補間器
///
/// 時刻列は単調非減少であることを前提とします。
#[derive(Debug, Clone)]
pub struct LinearInterp {
    times: Vec<f64>,
    values: Vec<f64>,
}

impl LinearInterp {
    pub fn new(times: Vec<f64>, values: Vec<f64>) -> Self {
        debug_assert_eq!(times.len(), values.len());
        debug_assert!(!times.is_empty());
        Self { times, values }
    }

    /// 時刻 `t` における値
    ///
    /// `t` が範囲外の場合は端の値を返します。
    pub fn eval(&self, t: f64) -> f64 {
        let n = self.times.len();
        if n == 1 || t <= self.times[0] {
            return self.values[0];
        }
        if t >= self.times[n - 1] {
            return self.values[n - 1];
        }
        // times[j] <= t < times[j + 1]
        let j = self
            .times
            .partition_point(|&x| x <= t)
            .saturating_sub(1)
            .min(n - 2);
        let (t0, t1) = (self.times[j], self.times[j + 1]);
        let (v0, v1) = (self.values[j], self.values[j + 1]);
        v0 + (v1 - v0) * (t - t0) / (t1 - t0)
    }
}

/// 記録軌跡の1サンプル
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackSample {
    pub time: f64,
    pub pose: Pose,
    pub speed: f64,
}

/// 歩行者1人分の記録軌跡
///
/// 生のサンプル列と x(t), y(t), heading(t) の補間器を保持します。
/// 構築後は変更されません。補間器の先頭時刻は、幅ゼロの初期区間を
/// 避けるため `t[1] - (t[2] - t[1])` に置き換えられます。
#[derive(Debug, Clone)]
pub struct RecordedTrack {
    samples: Vec<TrackSample>,
    interp_times: Vec<f64>,
    x: LinearInterp,
    y: LinearInterp,
    heading: LinearInterp,
}

impl RecordedTrack {
    /// 時刻・姿勢・速度の列から記録軌跡を作成
    pub fn new(times: Vec<f64>, poses: Vec<Pose>, speeds: Vec<f64>) -> Result<Self, TrackError> {
        if times.len() != poses.len() || times.len() != speeds.len() {
            return Err(TrackError::LengthMismatch {
                times: times.len(),
                samples: poses.len().min(speeds.len()),
            });
        }
        if times.len() < 3 {
            return Err(TrackError::TooShort { len: times.len() });
        }

        let mut interp_times = times.clone();
        interp_times[0] = times[1] - (times[2] - times[1]);

        let x = LinearInterp::new(interp_times.clone(), poses.iter().map(|p| p.x).collect());
        let y = LinearInterp::new(interp_times.clone(), poses.iter().map(|p| p.y).collect());
        let heading = LinearInterp::new(interp_times.clone(), poses.iter().map(|p| p.heading).collect());

        let samples = times
            .into_iter()
            .zip(poses)
            .zip(speeds)
            .map(|((time, pose), speed)| TrackSample { time, pose, speed })
            .collect();

        Ok(Self { samples, interp_times, x, y, heading })
    }

    /// データセットの行から記録軌跡を構築
    ///
    /// 1. フレーム番号を時刻に変換し、出現前の時刻を先頭に追加
    /// 2. 軸の入れ替え・反転の後、オフセットで回転・平行移動
    /// 3. 隣接位置から向きを算出（最後のサンプルは直前の向きを流用）
    /// 4. 距離 / Δt から速度を算出（先頭2サンプルは 0）
    pub fn from_rows(rows: &[PedestrianRow], meta: &DatasetMeta, start_frame: i64) -> Result<Self, TrackError> {
        // 出現前サンプルを加えて最低3サンプル必要
        if rows.len() < 2 {
            return Err(TrackError::TooShort { len: rows.len() + 1 });
        }

        let mut times: Vec<f64> = rows
            .iter()
            .map(|r| (r.frame - start_frame) as f64 / meta.fps + meta.spawn_delay_s + meta.start_t)
            .collect();
        times.insert(0, times[0] - meta.start_t);

        let (sx, sy) = meta.axis_scale();
        let [ox, oy, oth] = meta.offset;
        let (s, c) = oth.sin_cos();
        let mut positions: Vec<(f64, f64)> = rows
            .iter()
            .map(|r| {
                let (a, b) = if meta.swap_axes { (sy * r.y, sx * r.x) } else { (sx * r.x, sy * r.y) };
                (a * c - b * s + ox, a * s + b * c + oy)
            })
            .collect();

        let mut headings: Vec<f64> = positions
            .windows(2)
            .map(|w| (w[1].1 - w[0].1).atan2(w[1].0 - w[0].0))
            .collect();
        headings.push(headings[headings.len() - 1]);

        // 出現前サンプル（最初の位置に留まる）
        positions.insert(0, positions[0]);
        headings.insert(0, headings[0]);

        let poses: Vec<Pose> = positions
            .iter()
            .zip(&headings)
            .map(|(&(x, y), &heading)| Pose::new(x, y, heading))
            .collect();

        let speeds: Vec<f64> = (0..poses.len())
            .map(|j| {
                if j < 2 {
                    return 0.0;
                }
                let dt = times[j] - times[j - 1];
                if dt > 0.0 { poses[j].distance_to(&poses[j - 1]) / dt } else { 0.0 }
            })
            .collect();

        Self::new(times, poses, speeds)
    }

    pub fn samples(&self) -> &[TrackSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn first(&self) -> &TrackSample {
        &self.samples[0]
    }

    pub fn last(&self) -> &TrackSample {
        &self.samples[self.samples.len() - 1]
    }

    /// 出現時刻（補正前の先頭時刻）
    pub fn start_time(&self) -> f64 {
        self.samples[0].time
    }

    /// 2番目の記録時刻。これより前は先頭サンプルをそのまま使う
    pub fn second_time(&self) -> f64 {
        self.samples[1].time
    }

    pub fn end_time(&self) -> f64 {
        self.last().time
    }

    /// 時刻 `t` の補間位置
    pub fn position_at(&self, t: f64) -> (f64, f64) {
        (self.x.eval(t), self.y.eval(t))
    }

    /// 時刻 `t` の補間向き
    pub fn heading_at(&self, t: f64) -> f64 {
        self.heading.eval(t)
    }

    /// 時刻 `t` を挟む2サンプルのインデックス
    pub fn bracket(&self, t: f64) -> (usize, usize) {
        let n = self.interp_times.len();
        let j = self.interp_times.partition_point(|&x| x <= t).saturating_sub(1).min(n - 2);
        (j, j + 1)
    }
}
