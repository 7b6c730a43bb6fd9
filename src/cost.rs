//! Frame-to-frame (§4.C) and gap-closing (§4.D) cost matrix builders.
//!
//! Both build a square, four-block augmented matrix: a LINK block scored by
//! Gaussian-log-likelihood distance over a Brownian diffusion model, a
//! DEATH-diagonal and a BIRTH-diagonal block that are always fully
//! populated (so deaths+births alone are always a feasible perfect
//! matching), and an `EPSILON`-cost PHANTOM block completing the square.

use crate::detection::DetectionStore;
use crate::engine::TrackerParams;
use crate::error::{Result, TrackerError};
use crate::sparse::{SparseMatrix, TripletBuilder, EPSILON};
use crate::track::Track;

struct CostConstants {
    log1mkoff: f64,
    logkon: f64,
    logkoff: f64,
    logrho: f64,
    norm_const: f64,
    position_cutoff: f64,
    feature_cutoffs: Vec<f64>,
}

impl CostConstants {
    fn new(params: &TrackerParams, n_dims: usize, n_features: usize) -> Self {
        Self {
            log1mkoff: (1.0 - params.koff).ln(),
            logkon: params.kon.ln(),
            logkoff: params.koff.ln(),
            logrho: params.rho.ln(),
            norm_const: (n_dims + n_features) as f64 * (2.0 * std::f64::consts::PI).ln(),
            position_cutoff: params.max_position_displacement_sigma.powi(2) / 2.0,
            feature_cutoffs: params
                .max_feature_displacement_sigma
                .iter()
                .map(|s| s * s / 2.0)
                .collect(),
        }
    }
}

/// Negative log-likelihood of `cur` and `next` being the same target
/// `delta_t` frames apart under Brownian diffusion, or `None` if gated out
/// by a sigma or speed cutoff.
fn pairwise_cost(
    store: &DetectionStore,
    cur: usize,
    next: usize,
    delta_t: i64,
    params: &TrackerParams,
    c: &CostConstants,
) -> Option<f64> {
    let diffusion_term = 2.0 * params.d * delta_t as f64;
    let mut total_dist_sq = 0.0f64;
    let mut acc = 0.0f64;
    for d in 0..store.n_dims() {
        let var = diffusion_term + store.se_position(cur, d) + store.se_position(next, d);
        let delta = store.position(cur, d) - store.position(next, d);
        let dist_sq = delta * delta;
        total_dist_sq += dist_sq;
        let exponent = dist_sq / var;
        if exponent > c.position_cutoff {
            return None;
        }
        acc += exponent + var.ln();
    }
    if params.max_speed > 0.0 {
        let speed = total_dist_sq.sqrt() / delta_t as f64;
        if speed > params.max_speed {
            return None;
        }
    }
    for f in 0..store.n_features() {
        let var = params.feature_var[f] + store.se_feature(cur, f) + store.se_feature(next, f);
        let delta = store.feature(cur, f) - store.feature(next, f);
        let exponent = delta * delta / var;
        if exponent > c.feature_cutoffs[f] {
            return None;
        }
        acc += exponent + var.ln();
    }
    acc += c.norm_const;
    Some(0.5 * acc)
}

#[cfg(not(feature = "parallel"))]
fn link_triplets(
    store: &DetectionStore,
    cur_locs: &[usize],
    next_locs: &[usize],
    delta_t: i64,
    params: &TrackerParams,
    c: &CostConstants,
) -> Vec<(usize, usize, f64)> {
    let mut out = Vec::new();
    for (j, &next_idx) in next_locs.iter().enumerate() {
        for (i, &cur_idx) in cur_locs.iter().enumerate() {
            if let Some(cost) = pairwise_cost(store, cur_idx, next_idx, delta_t, params, c) {
                out.push((i, j, cost - c.log1mkoff));
            }
        }
    }
    out
}

#[cfg(feature = "parallel")]
fn link_triplets(
    store: &DetectionStore,
    cur_locs: &[usize],
    next_locs: &[usize],
    delta_t: i64,
    params: &TrackerParams,
    c: &CostConstants,
) -> Vec<(usize, usize, f64)> {
    use rayon::prelude::*;
    next_locs
        .par_iter()
        .enumerate()
        .flat_map_iter(|(j, &next_idx)| {
            cur_locs.iter().enumerate().filter_map(move |(i, &cur_idx)| {
                pairwise_cost(store, cur_idx, next_idx, delta_t, params, c)
                    .map(|cost| (i, j, cost - c.log1mkoff))
            })
        })
        .collect()
}

/// Build the frame-to-frame assignment matrix linking frame `cur_frame`'s
/// detections to frame `next_frame`'s.
pub(crate) fn build_f2f(
    store: &DetectionStore,
    cur_frame: i64,
    next_frame: i64,
    params: &TrackerParams,
) -> Result<SparseMatrix> {
    let cur_t = (cur_frame - store.first_frame()) as usize;
    let next_t = (next_frame - store.first_frame()) as usize;
    let cur_locs = store.locs_at(cur_t);
    let next_locs = store.locs_at(next_t);
    let n_cur = cur_locs.len();
    let n_next = next_locs.len();
    let n_tot = n_cur + n_next;
    let delta_t = next_frame - cur_frame;

    let c = CostConstants::new(params, store.n_dims(), store.n_features());
    let reserve = n_tot + 2 * (n_cur * n_next).min(n_cur.max(n_next).saturating_mul(10));
    let mut b = TripletBuilder::with_capacity(n_tot, n_tot, reserve);

    for &(i, j, cost) in &link_triplets(store, cur_locs, next_locs, delta_t, params, &c) {
        b.push(i, j, cost);
        b.push(n_cur + j, n_next + i, EPSILON);
    }

    let death_cost = -c.logkoff;
    for i in 0..n_cur {
        b.push(i, n_next + i, death_cost);
    }
    let birth_cost = -c.logrho - c.logkon;
    for j in 0..n_next {
        b.push(n_cur + j, j, birth_cost);
    }

    b.freeze()
}

/// Build the `2T x 2T` gap-closing matrix over the current track table.
pub(crate) fn build_gap_close(
    store: &DetectionStore,
    tracks: &[Track],
    birth_frame_idx: &[i64],
    frame_birth_start_idx: &[usize],
    params: &TrackerParams,
) -> Result<SparseMatrix> {
    let n_tracks = tracks.len();
    let c = CostConstants::new(params, store.n_dims(), store.n_features());
    let mut b = TripletBuilder::with_capacity(2 * n_tracks, 2 * n_tracks, n_tracks * 10 + n_tracks);

    for i in 0..n_tracks {
        if tracks[i].len() < params.min_gap_close_track_length {
            continue;
        }
        let loc_i = *tracks[i].locs().last().expect("tracks are never empty before gap closing");
        let end_i = store.frame_idx(loc_i);
        if end_i >= store.last_frame() - 1 {
            continue;
        }
        let start_t = (end_i + 2 - store.first_frame()) as usize;
        let start_j = frame_birth_start_idx[start_t];
        for j in start_j..n_tracks {
            if tracks[j].len() < params.min_gap_close_track_length {
                continue;
            }
            let start_j_frame = birth_frame_idx[j];
            let delta_t = start_j_frame - end_i;
            if delta_t < 1 {
                return Err(TrackerError::Logical(
                    "gap close: candidate track does not start after the source track ends".into(),
                ));
            }
            if delta_t >= params.max_gap_close_frames {
                continue;
            }
            let loc_j = *tracks[j].locs().first().expect("tracks are never empty before gap closing");
            if let Some(cost) = pairwise_cost(store, loc_i, loc_j, delta_t, params, &c) {
                let cost = cost - c.logkon - c.logkoff * delta_t as f64;
                b.push(i, j, cost);
                b.push(n_tracks + j, n_tracks + i, EPSILON);
            }
        }
    }

    let death_cost = -c.logkoff;
    let birth_cost = -c.logrho - c.logkon;
    for i in 0..n_tracks {
        b.push(i, n_tracks + i, death_cost);
        b.push(n_tracks + i, i, birth_cost);
    }

    b.freeze()
}
