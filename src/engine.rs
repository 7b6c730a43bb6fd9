//! The tracking engine: a three-state state machine (`Untracked` ->
//! `F2fLinked` -> `GapsClosed`) driving frame-to-frame linking and gap
//! closing over a loaded [`DetectionStore`]. Each state holds exactly the
//! data that's valid for it (per spec.md §9 Design Notes) rather than a
//! single struct with flags gating which fields are "really" in use.

use nalgebra::DMatrix;

use crate::cost;
use crate::detection::DetectionStore;
use crate::error::{Result, TrackerError};
use crate::lap;
use crate::track::Track;

/// Tunable parameters. `D`, `kon`, `koff`, `rho` are data-set-specific and
/// have no sensible default, so they're required constructor arguments; the
/// rest default to the same values the original library's member
/// initializers use and can be overridden by assigning the field directly.
#[derive(Debug, Clone)]
pub struct TrackerParams {
    /// Diffusion coefficient of the Brownian motion model.
    pub d: f64,
    /// Per-frame probability a new target appears.
    pub kon: f64,
    /// Per-frame probability a tracked target disappears.
    pub koff: f64,
    /// Prior probability density of a birth location (normalizes `kon`'s cost).
    pub rho: f64,
    pub max_speed: f64,
    pub max_position_displacement_sigma: f64,
    pub max_feature_displacement_sigma: Vec<f64>,
    pub max_gap_close_frames: i64,
    pub min_gap_close_track_length: usize,
    pub min_final_track_length: usize,
    pub feature_var: Vec<f64>,
}

impl TrackerParams {
    pub fn new(d: f64, kon: f64, koff: f64, rho: f64) -> Self {
        Self {
            d,
            kon,
            koff,
            rho,
            max_speed: 0.0,
            max_position_displacement_sigma: 5.0,
            max_feature_displacement_sigma: Vec::new(),
            max_gap_close_frames: 20,
            min_gap_close_track_length: 1,
            min_final_track_length: 1,
            feature_var: Vec::new(),
        }
    }
}

/// One link/death/birth/join reported by the debug inspection surface.
/// `-1` marks the absence of a source (birth) or destination (death).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugLink {
    pub from: i64,
    pub to: i64,
    pub cost: f64,
}

/// Counters describing the current track table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackerStats {
    pub n_detections: usize,
    pub n_tracks: usize,
    pub n_localizations_assigned: usize,
}

enum EngineState {
    Untracked { store: DetectionStore },
    F2fLinked {
        store: DetectionStore,
        tracks: Vec<Track>,
        birth_frame_idx: Vec<i64>,
        frame_birth_start_idx: Vec<usize>,
    },
    GapsClosed { store: DetectionStore, tracks: Vec<Track> },
}

/// The next frame offset after `t` that has at least one detection, or
/// `None` if `t` is the last non-empty frame. `t` itself may be empty.
fn next_non_empty_after(store: &DetectionStore, t: usize) -> Option<usize> {
    ((t + 1)..store.n_frames()).find(|&u| store.n_locs_at(u) > 0)
}

/// Drives the linking/gap-closing pipeline over one loaded detection set.
pub struct Engine {
    params: TrackerParams,
    state: Option<EngineState>,
}

impl Engine {
    pub fn new(params: TrackerParams) -> Self {
        Self { params, state: None }
    }

    /// Load detections with no appearance features.
    pub fn initialize(&mut self, frame_idx: Vec<i64>, position: DMatrix<f64>, se_position: DMatrix<f64>) -> Result<()> {
        let store = DetectionStore::initialize(frame_idx, position, se_position)?;
        self.state = Some(EngineState::Untracked { store });
        Ok(())
    }

    /// Load detections with appearance features alongside position.
    pub fn initialize_with_features(
        &mut self,
        frame_idx: Vec<i64>,
        position: DMatrix<f64>,
        se_position: DMatrix<f64>,
        feature: DMatrix<f64>,
        se_feature: DMatrix<f64>,
    ) -> Result<()> {
        let store = DetectionStore::initialize_with_features(frame_idx, position, se_position, feature, se_feature)?;
        let n_features = store.n_features();
        if self.params.feature_var.len() != n_features {
            return Err(TrackerError::ParameterValue(format!(
                "featureVar has {} entries but {n_features} features were supplied",
                self.params.feature_var.len()
            )));
        }
        if self.params.max_feature_displacement_sigma.len() != n_features {
            return Err(TrackerError::ParameterValue(format!(
                "maxFeatureDisplacementSigma has {} entries but {n_features} features were supplied",
                self.params.max_feature_displacement_sigma.len()
            )));
        }
        self.state = Some(EngineState::Untracked { store });
        Ok(())
    }

    fn store(&self) -> Result<&DetectionStore> {
        match &self.state {
            Some(EngineState::Untracked { store }) => Ok(store),
            Some(EngineState::F2fLinked { store, .. }) => Ok(store),
            Some(EngineState::GapsClosed { store, .. }) => Ok(store),
            None => Err(TrackerError::Logical("engine has not been initialized".into())),
        }
    }

    /// Link consecutive frames into tracks. Requires `Untracked`.
    pub fn link_f2f(&mut self) -> Result<()> {
        let store = match self.state.take() {
            Some(EngineState::Untracked { store }) => store,
            other => {
                self.state = other;
                return Err(TrackerError::Logical("linkF2F requires the engine to be Untracked".into()));
            }
        };

        let n_frames = store.n_frames();
        let mut tracks: Vec<Track> = Vec::with_capacity(store.track_reserve_hint());
        let mut birth_frame_idx: Vec<i64> = Vec::with_capacity(store.track_reserve_hint());

        // Every detection in the first frame starts its own track: there is
        // no predecessor frame to link it from.
        let mut open: Vec<usize> = Vec::new();
        for &loc in store.locs_at(0) {
            let id = tracks.len();
            tracks.push(Track::new(loc));
            birth_frame_idx.push(store.frame_idx(loc));
            open.push(id);
        }

        let mut t = 0usize;
        while let Some(next_t) = next_non_empty_after(&store, t) {
            let cur_frame = store.first_frame() + t as i64;
            let next_frame = store.first_frame() + next_t as i64;
            let cur_locs = store.locs_at(t);
            let next_locs = store.locs_at(next_t);
            let n_next = next_locs.len();

            let matrix = cost::build_f2f(&store, cur_frame, next_frame, &self.params)?;
            let sol = lap::solve(&matrix)?;

            let mut new_open: Vec<usize> = vec![usize::MAX; n_next];
            for (i, &track_id) in open.iter().enumerate() {
                let j = sol.x[i];
                if j < n_next {
                    tracks[track_id].push(next_locs[j]);
                    new_open[j] = track_id;
                }
                // else: death. The track simply isn't carried forward.
            }
            for (j, slot) in new_open.iter_mut().enumerate() {
                if *slot == usize::MAX {
                    let id = tracks.len();
                    tracks.push(Track::new(next_locs[j]));
                    birth_frame_idx.push(store.frame_idx(next_locs[j]));
                    *slot = id;
                }
            }

            log::debug!(
                "linkF2F: frame {cur_frame}->{next_frame}: {} cur, {} next, {} tracks so far",
                cur_locs.len(),
                n_next,
                tracks.len()
            );

            open = new_open;
            t = next_t;
        }

        let n_tracks = tracks.len();
        let mut frame_birth_start_idx = vec![n_tracks; n_frames + 1];
        let mut tid = 0usize;
        for t in 0..n_frames {
            while tid < n_tracks && birth_frame_idx[tid] < store.first_frame() + t as i64 {
                tid += 1;
            }
            frame_birth_start_idx[t] = tid;
        }

        self.state = Some(EngineState::F2fLinked { store, tracks, birth_frame_idx, frame_birth_start_idx });
        Ok(())
    }

    /// Splice tracks across short gaps. Requires `F2fLinked`.
    pub fn close_gaps(&mut self) -> Result<()> {
        let (store, mut tracks, birth_frame_idx, frame_birth_start_idx) = match self.state.take() {
            Some(EngineState::F2fLinked { store, tracks, birth_frame_idx, frame_birth_start_idx }) => {
                (store, tracks, birth_frame_idx, frame_birth_start_idx)
            }
            other => {
                self.state = other;
                return Err(TrackerError::Logical("closeGaps requires the engine to be F2fLinked".into()));
            }
        };

        let n_tracks = tracks.len();
        let matrix = cost::build_gap_close(&store, &tracks, &birth_frame_idx, &frame_birth_start_idx, &self.params)?;
        let sol = lap::solve(&matrix)?;

        let mut successor: Vec<Option<usize>> = vec![None; n_tracks];
        for i in 0..n_tracks {
            if sol.x[i] < n_tracks {
                successor[i] = Some(sol.x[i]);
            }
        }
        let mut has_predecessor = vec![false; n_tracks];
        for &s in successor.iter().flatten() {
            has_predecessor[s] = true;
        }

        let mut n_joins = 0usize;
        for start in 0..n_tracks {
            if has_predecessor[start] {
                continue;
            }
            let mut cur = start;
            while let Some(next) = successor[cur] {
                let (left, right) = tracks.split_at_mut(next);
                left[start].append_from(&mut right[0]);
                n_joins += 1;
                cur = next;
            }
        }

        tracks.retain(|t| {
            !t.is_empty() && (self.params.min_final_track_length <= 1 || t.len() > self.params.min_final_track_length)
        });

        log::debug!(
            "closeGaps: {n_tracks} tracks before, {n_joins} joins, {} tracks after length filter",
            tracks.len()
        );

        self.state = Some(EngineState::GapsClosed { store, tracks });
        Ok(())
    }

    /// Run whichever of `linkF2F`/`closeGaps` hasn't happened yet. Calling
    /// this repeatedly is a no-op once the engine reaches `GapsClosed`.
    pub fn generate_tracks(&mut self) -> Result<()> {
        match &self.state {
            Some(EngineState::Untracked { .. }) => {
                self.link_f2f()?;
                self.close_gaps()
            }
            Some(EngineState::F2fLinked { .. }) => self.close_gaps(),
            Some(EngineState::GapsClosed { .. }) => Ok(()),
            None => Err(TrackerError::Logical("engine has not been initialized".into())),
        }
    }

    /// The current track table. Empty before `linkF2F` has run.
    pub fn get_tracks(&self) -> &[Track] {
        match &self.state {
            Some(EngineState::F2fLinked { tracks, .. }) => tracks,
            Some(EngineState::GapsClosed { tracks, .. }) => tracks,
            _ => &[],
        }
    }

    pub fn get_stats(&self) -> TrackerStats {
        let n_detections = self.store().map(DetectionStore::len).unwrap_or(0);
        let tracks = self.get_tracks();
        TrackerStats {
            n_detections,
            n_tracks: tracks.len(),
            n_localizations_assigned: tracks.iter().map(Track::len).sum(),
        }
    }

    /// Rebuild and solve the frame-to-frame cost matrix between `frame` and
    /// the next non-empty frame after it, reporting every link, death, and
    /// birth it implies. Available once `linkF2F` has run (it only needs
    /// the store, not the current track table).
    pub fn debug_f2f(&self, frame: i64) -> Result<Vec<DebugLink>> {
        let store = self.store()?;
        if frame < store.first_frame() || frame >= store.last_frame() {
            return Err(TrackerError::ParameterValue(format!(
                "frame {frame} has no following frame to link against"
            )));
        }
        let cur_t = (frame - store.first_frame()) as usize;
        let next_t = next_non_empty_after(store, cur_t).ok_or_else(|| {
            TrackerError::ParameterValue(format!(
                "frame {frame} has no following non-empty frame to link against"
            ))
        })?;
        let next_frame = store.first_frame() + next_t as i64;
        let matrix = cost::build_f2f(store, frame, next_frame, &self.params)?;
        let sol = lap::solve(&matrix)?;

        let cur_locs = store.locs_at(cur_t);
        let next_locs = store.locs_at(next_t);
        let n_cur = cur_locs.len();
        let n_next = next_locs.len();

        let mut linked_next = vec![false; n_next];
        let mut out = Vec::with_capacity(n_cur + n_next);
        for (i, &cur_loc) in cur_locs.iter().enumerate() {
            let j = sol.x[i];
            let cost = matrix.get(i, j).unwrap_or(f64::INFINITY);
            if j < n_next {
                linked_next[j] = true;
                out.push(DebugLink { from: cur_loc as i64, to: next_locs[j] as i64, cost });
            } else {
                out.push(DebugLink { from: cur_loc as i64, to: -1, cost });
            }
        }
        for (j, &next_loc) in next_locs.iter().enumerate() {
            if !linked_next[j] {
                let row = n_cur + j;
                let cost = matrix.get(row, j).unwrap_or(f64::INFINITY);
                out.push(DebugLink { from: -1, to: next_loc as i64, cost });
            }
        }
        Ok(out)
    }

    /// Rebuild and solve the gap-closing cost matrix over the current
    /// (pre-join) track table. Only meaningful in `F2fLinked`, since
    /// `GapsClosed` has already discarded the un-joined tracks it would
    /// operate over.
    pub fn debug_close_gaps(&self) -> Result<Vec<DebugLink>> {
        let (store, tracks, birth_frame_idx, frame_birth_start_idx) = match &self.state {
            Some(EngineState::F2fLinked { store, tracks, birth_frame_idx, frame_birth_start_idx }) => {
                (store, tracks, birth_frame_idx, frame_birth_start_idx)
            }
            Some(EngineState::Untracked { .. }) => {
                return Err(TrackerError::Logical("debugCloseGaps requires linkF2F to have run first".into()));
            }
            Some(EngineState::GapsClosed { .. }) => {
                return Err(TrackerError::Logical(
                    "debugCloseGaps is only meaningful before closeGaps has run".into(),
                ));
            }
            None => return Err(TrackerError::Logical("engine has not been initialized".into())),
        };

        let matrix = cost::build_gap_close(store, tracks, birth_frame_idx, frame_birth_start_idx, &self.params)?;
        let sol = lap::solve(&matrix)?;
        let n = tracks.len();

        let mut joined = vec![false; n];
        let mut out = Vec::with_capacity(n);
        for i in 0..n {
            let j = sol.x[i];
            let cost = matrix.get(i, j).unwrap_or(f64::INFINITY);
            if j < n {
                joined[j] = true;
                out.push(DebugLink { from: i as i64, to: j as i64, cost });
            } else {
                out.push(DebugLink { from: i as i64, to: -1, cost });
            }
        }
        for j in 0..n {
            if !joined[j] {
                let row = n + j;
                let cost = matrix.get(row, j).unwrap_or(f64::INFINITY);
                out.push(DebugLink { from: -1, to: j as i64, cost });
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple_params() -> TrackerParams {
        TrackerParams::new(0.3, 0.1, 0.1, 0.02)
    }

    fn store_2d(frames: &[i64], xs: &[f64], ys: &[f64]) -> (Vec<i64>, DMatrix<f64>, DMatrix<f64>) {
        let n = frames.len();
        let mut pos = DMatrix::zeros(n, 2);
        for i in 0..n {
            pos[(i, 0)] = xs[i];
            pos[(i, 1)] = ys[i];
        }
        let se = DMatrix::from_element(n, 2, 0.1);
        (frames.to_vec(), pos, se)
    }

    #[test]
    fn links_a_trivial_three_frame_track() {
        let (frames, pos, se) = store_2d(&[0, 1, 2], &[0.0, 0.1, 0.2], &[0.0, 0.0, 0.0]);
        let mut e = Engine::new(simple_params());
        e.initialize(frames, pos, se).unwrap();
        e.link_f2f().unwrap();

        let tracks = e.get_tracks();
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].len(), 3);

        let stats = e.get_stats();
        assert_eq!(stats.n_detections, 3);
        assert_eq!(stats.n_localizations_assigned, 3);
    }

    #[test]
    fn separated_targets_stay_in_distinct_tracks() {
        let (frames, pos, se) = store_2d(
            &[0, 0, 1, 1],
            &[0.0, 50.0, 0.1, 50.1],
            &[0.0, 0.0, 0.0, 0.0],
        );
        let mut e = Engine::new(simple_params());
        e.initialize(frames, pos, se).unwrap();
        e.link_f2f().unwrap();
        assert_eq!(e.get_tracks().len(), 2);
        for t in e.get_tracks() {
            assert_eq!(t.len(), 2);
        }
    }

    #[test]
    fn an_empty_frame_is_skipped_directly_by_f2f_linking() {
        // One target present at frames 0 and 2; frame 1 has no detections
        // at all. linkF2F must advance straight to the next non-empty
        // frame (frame 2, ΔT=2) rather than treating frame 1 as a normal
        // step and leaving the join to gap closing.
        let (frames, pos, se) = store_2d(&[0, 2], &[0.0, 0.2], &[0.0, 0.0]);
        let mut e = Engine::new(simple_params());
        e.initialize(frames, pos, se).unwrap();
        e.link_f2f().unwrap();
        assert_eq!(e.get_tracks().len(), 1, "linkF2F should skip the empty frame and link directly");
        assert_eq!(e.get_tracks()[0].len(), 2);

        e.close_gaps().unwrap();
        assert_eq!(e.get_tracks().len(), 1);
        assert_eq!(e.get_tracks()[0].len(), 2);
    }

    #[test]
    fn close_gaps_joins_a_genuine_f2f_death_and_birth() {
        // Three non-empty, consecutive frames. Target A (frame 0) and
        // target C (frame 2) sit close together; target B (frame 1) sits
        // far from both, so F2F can't link A->B or B->C and each ends up
        // in its own length-1 track. Gap closing should then splice A and
        // C together (ΔT=2) while leaving B isolated, since a track ending
        // at `lastFrame - 1` (B) cannot itself be a join source. A small
        // diffusion constant keeps the join cheap enough to beat a separate
        // death-of-A-plus-birth-of-C under the same kon/koff/rho.
        let (frames, pos, se) =
            store_2d(&[0, 1, 2], &[0.0, 50.0, 0.2], &[0.0, 50.0, 0.0]);
        let params = TrackerParams::new(0.05, 0.1, 0.1, 0.02);
        let mut e = Engine::new(params);
        e.initialize(frames, pos, se).unwrap();
        e.link_f2f().unwrap();
        assert_eq!(e.get_tracks().len(), 3, "each target should be isolated before gap closing");

        e.close_gaps().unwrap();
        let tracks = e.get_tracks();
        assert_eq!(tracks.len(), 2);
        assert!(tracks.iter().any(|t| t.len() == 2), "A and C should be joined across the gap");
        assert!(tracks.iter().any(|t| t.len() == 1), "B should remain isolated");
    }

    #[test]
    fn generate_tracks_is_idempotent() {
        let (frames, pos, se) = store_2d(&[0, 1, 2], &[0.0, 0.1, 0.2], &[0.0, 0.0, 0.0]);
        let mut e = Engine::new(simple_params());
        e.initialize(frames, pos, se).unwrap();
        e.generate_tracks().unwrap();
        let n_after_first = e.get_tracks().len();
        e.generate_tracks().unwrap();
        assert_eq!(e.get_tracks().len(), n_after_first);
    }

    #[test]
    fn min_final_track_length_of_one_keeps_length_one_tracks() {
        // A lone, never-linked detection produces a length-1 track. Per
        // spec.md §4.E step 3, minFinalTrackLength <= 1 keeps every
        // non-empty track rather than applying the strict `>` comparison.
        let (frames, pos, se) = store_2d(&[0], &[0.0], &[0.0]);
        let mut params = simple_params();
        params.min_final_track_length = 1;
        let mut e = Engine::new(params);
        e.initialize(frames, pos, se).unwrap();
        e.generate_tracks().unwrap();
        assert_eq!(e.get_tracks().len(), 1, "minFinalTrackLength <= 1 must keep all non-empty tracks");
        assert_eq!(e.get_tracks()[0].len(), 1);
    }

    #[test]
    fn min_final_track_length_filters_strictly_above_one() {
        // A track linked across two adjacent frames has length 2. With the
        // strict `>` comparison, minFinalTrackLength = 2 must still drop it.
        let (frames, pos, se) = store_2d(&[0, 1], &[0.0, 0.1], &[0.0, 0.0]);
        let mut params = simple_params();
        params.min_final_track_length = 2;
        let mut e = Engine::new(params);
        e.initialize(frames, pos, se).unwrap();
        e.generate_tracks().unwrap();
        assert!(e.get_tracks().is_empty(), "a length-2 track must not survive a strict minFinalTrackLength of 2");
    }

    #[test]
    fn calling_link_f2f_twice_is_a_logical_error() {
        let (frames, pos, se) = store_2d(&[0, 1], &[0.0, 0.1], &[0.0, 0.0]);
        let mut e = Engine::new(simple_params());
        e.initialize(frames, pos, se).unwrap();
        e.link_f2f().unwrap();
        assert!(e.link_f2f().is_err());
    }

    #[test]
    fn debug_f2f_reports_a_birth_and_a_death_across_disjoint_frames() {
        let (frames, pos, se) = store_2d(&[0, 1], &[0.0, 50.0], &[0.0, 0.0]);
        let mut e = Engine::new(simple_params());
        e.initialize(frames, pos, se).unwrap();
        e.link_f2f().unwrap();
        let links = e.debug_f2f(0).unwrap();
        assert_eq!(links.len(), 2);
        assert!(links.iter().any(|l| l.to == -1));
        assert!(links.iter().any(|l| l.from == -1));
    }

    #[test]
    fn debug_f2f_skips_to_the_next_non_empty_frame() {
        let (frames, pos, se) = store_2d(&[0, 2], &[0.0, 0.2], &[0.0, 0.0]);
        let mut e = Engine::new(simple_params());
        e.initialize(frames, pos, se).unwrap();
        e.link_f2f().unwrap();
        let links = e.debug_f2f(0).unwrap();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].from, 0);
        assert_eq!(links[0].to, 1);
    }

    #[test]
    fn initialize_with_features_rejects_mismatched_feature_var_length() {
        // n_features derived from the feature matrix is 1; feature_var and
        // max_feature_displacement_sigma default to empty, so this must be
        // a ParameterValueError rather than an out-of-bounds panic later.
        let frames = vec![0, 0];
        let pos = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        let se = DMatrix::from_element(2, 2, 0.1);
        let feat = DMatrix::from_element(2, 1, 0.0);
        let se_feat = DMatrix::from_element(2, 1, 0.1);
        let mut e = Engine::new(simple_params());
        assert!(e.initialize_with_features(frames, pos, se, feat, se_feat).is_err());
    }

    #[test]
    fn initialize_with_features_rejects_mismatched_sigma_length() {
        let frames = vec![0, 0];
        let pos = DMatrix::from_row_slice(2, 2, &[0.0, 0.0, 1.0, 1.0]);
        let se = DMatrix::from_element(2, 2, 0.1);
        let feat = DMatrix::from_element(2, 1, 0.0);
        let se_feat = DMatrix::from_element(2, 1, 0.1);
        let mut params = simple_params();
        params.feature_var = vec![1.0];
        let mut e = Engine::new(params);
        assert!(e.initialize_with_features(frames, pos, se, feat, se_feat).is_err());
    }

    #[test]
    fn feature_distance_disambiguates_spatially_coincident_detections() {
        // Two targets share the same position in both frames and can only
        // be told apart by feature value; the spatial term alone can't
        // distinguish them, so the cross pairs must be gated out by the
        // feature sigma cutoff, leaving only the matching pairs linkable.
        let frames = vec![0, 0, 1, 1];
        let pos = DMatrix::from_element(4, 2, 0.0);
        let se = DMatrix::from_element(4, 2, 0.1);
        let feat = DMatrix::from_row_slice(4, 1, &[0.0, 10.0, 0.05, 10.05]);
        let se_feat = DMatrix::from_element(4, 1, 0.1);

        let mut params = simple_params();
        params.feature_var = vec![1.0];
        params.max_feature_displacement_sigma = vec![5.0];
        let mut e = Engine::new(params);
        e.initialize_with_features(frames, pos, se, feat, se_feat).unwrap();
        e.link_f2f().unwrap();

        let tracks = e.get_tracks();
        assert_eq!(tracks.len(), 2);
        for t in tracks {
            assert_eq!(t.len(), 2);
        }
    }
}
