//! Per-frame detection storage: the input side of the tracking pipeline.

use nalgebra::DMatrix;

use crate::error::{Result, TrackerError};

/// All detections for one tracking run, indexed by frame once at
/// construction. Columns of `position`/`SE_position` are spatial axes;
/// columns of `feature`/`SE_feature` are appearance features. `SE_*` store
/// **variances**, not standard deviations.
pub struct DetectionStore {
    n: usize,
    n_dims: usize,
    n_features: usize,
    frame_idx: Vec<i64>,
    position: DMatrix<f64>,
    se_position: DMatrix<f64>,
    feature: DMatrix<f64>,
    se_feature: DMatrix<f64>,
    first_frame: i64,
    last_frame: i64,
    n_frames: usize,
    n_frame_locs: Vec<usize>,
    frame_loc_idx: Vec<Vec<usize>>,
}

impl DetectionStore {
    /// Build a store with no appearance features.
    pub fn initialize(
        frame_idx: Vec<i64>,
        position: DMatrix<f64>,
        se_position: DMatrix<f64>,
    ) -> Result<Self> {
        let n = frame_idx.len();
        Self::initialize_with_features(
            frame_idx,
            position,
            se_position,
            DMatrix::zeros(n, 0),
            DMatrix::zeros(n, 0),
        )
    }

    /// Build a store with `feature`/`SE_feature` columns in addition to
    /// position. Per spec.md §4.B: validates shapes, derives `nDims`/
    /// `nFeatures`, stable-sorts detections by frame, and builds the
    /// per-frame location index.
    pub fn initialize_with_features(
        frame_idx: Vec<i64>,
        position: DMatrix<f64>,
        se_position: DMatrix<f64>,
        feature: DMatrix<f64>,
        se_feature: DMatrix<f64>,
    ) -> Result<Self> {
        let n = frame_idx.len();
        if n == 0 {
            return Err(TrackerError::ParameterValue("no detections given".into()));
        }
        if position.nrows() != n {
            return Err(TrackerError::ParameterValue(format!(
                "frameIdx has {n} entries but position has {} rows",
                position.nrows()
            )));
        }
        if se_position.nrows() != n {
            return Err(TrackerError::ParameterValue(format!(
                "frameIdx has {n} entries but SE_position has {} rows",
                se_position.nrows()
            )));
        }
        if position.ncols() != se_position.ncols() {
            return Err(TrackerError::ParameterValue(format!(
                "position has {} columns but SE_position has {}",
                position.ncols(),
                se_position.ncols()
            )));
        }
        if position.ncols() == 0 {
            return Err(TrackerError::ParameterValue("position has zero spatial dimensions".into()));
        }
        if feature.ncols() > 0 {
            if feature.nrows() != n {
                return Err(TrackerError::ParameterValue(format!(
                    "frameIdx has {n} entries but feature has {} rows",
                    feature.nrows()
                )));
            }
            if feature.ncols() != se_feature.ncols() || se_feature.nrows() != n {
                return Err(TrackerError::ParameterValue(
                    "feature and SE_feature shapes do not match".into(),
                ));
            }
        }

        let n_dims = position.ncols();
        let n_features = feature.ncols();

        // Stable sort: detections within the same frame keep their relative
        // input order.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| frame_idx[i]);

        let first_frame = frame_idx[order[0]];
        let last_frame = frame_idx[order[n - 1]];
        let n_frames = (last_frame - first_frame + 1) as usize;

        let mut frame_loc_idx: Vec<Vec<usize>> = vec![Vec::new(); n_frames];
        for &loc in &order {
            let t = (frame_idx[loc] - first_frame) as usize;
            frame_loc_idx[t].push(loc);
        }
        let n_frame_locs = frame_loc_idx.iter().map(Vec::len).collect();

        log::debug!(
            "DetectionStore::initialize: N={n} nDims={n_dims} nFeatures={n_features} \
             firstFrame={first_frame} lastFrame={last_frame} nFrames={n_frames}"
        );

        Ok(Self {
            n,
            n_dims,
            n_features,
            frame_idx,
            position,
            se_position,
            feature,
            se_feature,
            first_frame,
            last_frame,
            n_frames,
            n_frame_locs,
            frame_loc_idx,
        })
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    pub fn n_dims(&self) -> usize {
        self.n_dims
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    pub fn first_frame(&self) -> i64 {
        self.first_frame
    }

    pub fn last_frame(&self) -> i64 {
        self.last_frame
    }

    pub fn n_frames(&self) -> usize {
        self.n_frames
    }

    pub fn frame_idx(&self, loc: usize) -> i64 {
        self.frame_idx[loc]
    }

    /// Reserve hint for downstream track storage: `⌈√N⌉`, matching the
    /// original library's track-vector reservation.
    pub fn track_reserve_hint(&self) -> usize {
        (self.n as f64).sqrt().ceil() as usize
    }

    /// Detection indices present at frame offset `t` (0-based from
    /// `first_frame`), in input order.
    pub fn locs_at(&self, t: usize) -> &[usize] {
        &self.frame_loc_idx[t]
    }

    pub fn n_locs_at(&self, t: usize) -> usize {
        self.n_frame_locs[t]
    }

    pub fn position(&self, loc: usize, d: usize) -> f64 {
        self.position[(loc, d)]
    }

    pub fn se_position(&self, loc: usize, d: usize) -> f64 {
        self.se_position[(loc, d)]
    }

    pub fn feature(&self, loc: usize, f: usize) -> f64 {
        self.feature[(loc, f)]
    }

    pub fn se_feature(&self, loc: usize, f: usize) -> f64 {
        self.se_feature[(loc, f)]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> DetectionStore {
        // frames [2, 1, 1] out of order on input; stable sort must recover
        // [1, 1, 2] while preserving relative order of the two frame-1 locs.
        let frame_idx = vec![2, 1, 1];
        let position = DMatrix::from_row_slice(3, 1, &[30.0, 10.0, 11.0]);
        let se_position = DMatrix::from_element(3, 1, 1.0);
        DetectionStore::initialize(frame_idx, position, se_position).unwrap()
    }

    #[test]
    fn initialize_derives_frame_bounds_and_buckets() {
        let s = store();
        assert_eq!(s.first_frame(), 1);
        assert_eq!(s.last_frame(), 2);
        assert_eq!(s.n_frames(), 2);
        assert_eq!(s.locs_at(0), &[1, 2]);
        assert_eq!(s.locs_at(1), &[0]);
    }

    #[test]
    fn initialize_rejects_shape_mismatch() {
        let frame_idx = vec![0, 1];
        let position = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        let se_position = DMatrix::from_element(1, 2, 1.0);
        assert!(DetectionStore::initialize(frame_idx, position, se_position).is_err());
    }

    #[test]
    fn track_reserve_hint_is_ceil_sqrt_n() {
        let frame_idx = vec![0; 10];
        let position = DMatrix::from_element(10, 1, 0.0);
        let se_position = DMatrix::from_element(10, 1, 1.0);
        let s = DetectionStore::initialize(frame_idx, position, se_position).unwrap();
        assert_eq!(s.track_reserve_hint(), 4);
    }
}
