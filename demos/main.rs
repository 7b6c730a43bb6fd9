//! Runnable walkthrough of the public API: load a handful of 2-D
//! detections with one missed frame, link, close gaps, and print the
//! resulting tracks.

use lap_tracker::{Engine, TrackerParams};
use nalgebra::DMatrix;

fn main() {
    env_logger::init();

    let frame_idx = vec![0, 0, 1, 3, 3];
    let xs = [0.0, 10.0, 0.1, 10.3, 0.3];
    let ys = [0.0, 0.0, 0.0, 0.0, 0.0];

    let n = frame_idx.len();
    let mut position = DMatrix::zeros(n, 2);
    for i in 0..n {
        position[(i, 0)] = xs[i];
        position[(i, 1)] = ys[i];
    }
    let se_position = DMatrix::from_element(n, 2, 0.1);

    let params = TrackerParams::new(0.3, 0.1, 0.1, 0.02);
    let mut engine = Engine::new(params);
    engine.initialize(frame_idx, position, se_position).expect("valid input");
    engine.generate_tracks().expect("feasible assignment problem at every step");

    let stats = engine.get_stats();
    println!(
        "{} detections -> {} tracks ({} localizations assigned)",
        stats.n_detections, stats.n_tracks, stats.n_localizations_assigned
    );
    for (i, track) in engine.get_tracks().iter().enumerate() {
        println!("track {i}: {:?}", track.locs());
    }
}
