//! Sparse Jonker-Volgenant linear assignment solver.
//!
//! Implements the classic four-phase JV method (column reduction, reduction
//! transfer, augmenting row reduction, shortest-augmenting-path
//! augmentation), generalized from the dense textbook version to a sparse
//! cost matrix: an entry that isn't stored in the [`SparseMatrix`] is
//! forbidden rather than zero, and every scan below only ever visits stored
//! entries of the row or column it's working on. Ties are broken in favor of
//! the lower column index, since columns are always scanned in ascending
//! order.

use crate::error::{Result, TrackerError};
use crate::sparse::SparseMatrix;

/// A complete assignment plus the dual potentials that certify its
/// optimality.
#[derive(Debug, Clone)]
pub struct Assignment {
    /// `x[i]` is the column assigned to row `i`.
    pub x: Vec<usize>,
    /// `y[j]` is the row assigned to column `j`.
    pub y: Vec<usize>,
    pub u: Vec<f64>,
    pub v: Vec<f64>,
}

/// `C[i, x[i]]` for each row, used by the debug inspection surface.
pub fn compute_cost(c: &SparseMatrix, x: &[usize]) -> Vec<f64> {
    x.iter().enumerate().map(|(i, &j)| c.get(i, j).unwrap_or(f64::INFINITY)).collect()
}

fn swap_into(collist: &mut [usize], pos: &mut [usize], from: usize, to: usize) {
    if from == to {
        return;
    }
    let a = collist[from];
    let b = collist[to];
    collist[from] = b;
    collist[to] = a;
    pos[a] = to;
    pos[b] = from;
}

/// Solve the square sparse assignment problem. Returns [`TrackerError::Logical`]
/// if the matrix isn't square, a row/column has no stored entries at all, or
/// no feasible perfect matching exists over the stored entries.
pub fn solve(c: &SparseMatrix) -> Result<Assignment> {
    let n = c.rows();
    if c.cols() != n {
        return Err(TrackerError::Logical(format!(
            "malformed cost matrix: expected square, got {}x{}",
            n,
            c.cols()
        )));
    }
    if n == 0 {
        return Ok(Assignment { x: Vec::new(), y: Vec::new(), u: Vec::new(), v: Vec::new() });
    }

    let mut v = vec![0.0f64; n];
    let mut rowsol: Vec<Option<usize>> = vec![None; n];
    let mut colsol: Vec<Option<usize>> = vec![None; n];
    let mut matches = vec![0u32; n];

    // Phase 1: column reduction. Each column claims the row that's cheapest
    // for it; a row claimed by more than one column keeps only its cheapest.
    for j in 0..n {
        let mut best: Option<(usize, f64)> = None;
        for (i, val) in c.col_iter(j) {
            if best.is_none_or(|(_, bv)| val < bv) {
                best = Some((i, val));
            }
        }
        let (imin, min) = best
            .ok_or_else(|| TrackerError::Logical(format!("lap: column {j} has no stored entries")))?;
        v[j] = min;
        matches[imin] += 1;
        if matches[imin] == 1 {
            rowsol[imin] = Some(j);
            colsol[j] = Some(imin);
        } else if v[j] < v[rowsol[imin].unwrap()] {
            let j1 = rowsol[imin].unwrap();
            rowsol[imin] = Some(j);
            colsol[j] = Some(imin);
            colsol[j1] = None;
        } else {
            colsol[j] = None;
        }
    }

    // Phase 2: reduction transfer. A row claimed by exactly one column
    // passes as much of its reduction as possible on to its column's dual.
    let mut free: Vec<usize> = Vec::new();
    for i in 0..n {
        if matches[i] == 0 {
            free.push(i);
        } else if matches[i] == 1 {
            let j1 = rowsol[i].unwrap();
            let mut min = f64::INFINITY;
            for (j, val) in c.row_iter(i) {
                if j != j1 && val - v[j] < min {
                    min = val - v[j];
                }
            }
            if min.is_finite() {
                v[j1] -= min;
            }
        }
    }

    // Phase 3: augmenting row reduction, two sweeps over the still-free rows.
    for _ in 0..2 {
        let mut queue: std::collections::VecDeque<usize> = free.drain(..).collect();
        let mut next_sweep: Vec<usize> = Vec::new();

        while let Some(i) = queue.pop_front() {
            let mut umin = f64::INFINITY;
            let mut usubmin = f64::INFINITY;
            let mut j1: Option<usize> = None;
            let mut j2: Option<usize> = None;
            for (j, val) in c.row_iter(i) {
                let h = val - v[j];
                if h < usubmin {
                    if h >= umin {
                        usubmin = h;
                        j2 = Some(j);
                    } else {
                        usubmin = umin;
                        umin = h;
                        j2 = j1;
                        j1 = Some(j);
                    }
                }
            }
            let mut j1 = j1
                .ok_or_else(|| TrackerError::Logical(format!("lap: row {i} has no stored entries")))?;

            let mut i0 = colsol[j1];
            if umin < usubmin {
                if usubmin.is_finite() {
                    v[j1] -= usubmin - umin;
                }
            } else if i0.is_some() {
                if let Some(alt) = j2 {
                    j1 = alt;
                    i0 = colsol[j1];
                }
            }

            rowsol[i] = Some(j1);
            colsol[j1] = Some(i);

            if let Some(i0) = i0 {
                if umin < usubmin {
                    queue.push_front(i0);
                } else {
                    next_sweep.push(i0);
                }
            }
        }

        free = next_sweep;
    }

    // Phase 4: augmentation. Whatever rows are still free get a full
    // shortest-augmenting-path search, one at a time.
    for freerow in free {
        let mut d = vec![f64::INFINITY; n];
        let mut pred = vec![freerow; n];
        for (j, val) in c.row_iter(freerow) {
            d[j] = val - v[j];
        }

        let mut collist: Vec<usize> = (0..n).collect();
        let mut pos: Vec<usize> = (0..n).collect();
        let mut low = 0usize;
        let mut up = 0usize;
        let mut min_val = 0.0f64;
        let endofpath;

        'search: loop {
            if up == low {
                let candidate = d[collist[up]];
                if !candidate.is_finite() {
                    return Err(TrackerError::Logical(
                        "lap: infeasible assignment problem (no augmenting path)".into(),
                    ));
                }
                min_val = candidate;
                up += 1;

                let mut k = up;
                while k < n {
                    let j = collist[k];
                    let h = d[j];
                    if h <= min_val {
                        if h < min_val {
                            up = low;
                            min_val = h;
                        }
                        swap_into(&mut collist, &mut pos, k, up);
                        up += 1;
                    }
                    k += 1;
                }

                let mut found = None;
                for &j in &collist[low..up] {
                    if colsol[j].is_none() {
                        found = Some(j);
                        break;
                    }
                }
                if let Some(j) = found {
                    endofpath = j;
                    break 'search;
                }
            }

            let j1 = collist[low];
            low += 1;
            let i = colsol[j1].expect("a column in the ready tier is always assigned");
            let base = c.get(i, j1).unwrap_or(f64::INFINITY) - v[j1] - min_val;

            for (j, val) in c.row_iter(i) {
                if pos[j] < up {
                    continue;
                }
                let v2 = val - v[j] - base;
                if v2 < d[j] {
                    pred[j] = i;
                    d[j] = v2;
                    if v2 == min_val {
                        if colsol[j].is_none() {
                            endofpath = j;
                            break 'search;
                        }
                        swap_into(&mut collist, &mut pos, pos[j], up);
                        up += 1;
                    }
                }
            }
        }

        for &j in &collist[..low] {
            v[j] += d[j] - min_val;
        }

        let mut cur = endofpath;
        loop {
            let i = pred[cur];
            colsol[cur] = Some(i);
            let prev_col = rowsol[i];
            rowsol[i] = Some(cur);
            if i == freerow {
                break;
            }
            cur = prev_col.expect("an interior row on the augmenting path was already assigned");
        }
    }

    let mut x = vec![0usize; n];
    let mut u = vec![0.0f64; n];
    for i in 0..n {
        let j = rowsol[i].ok_or_else(|| TrackerError::Logical(format!("lap: row {i} left unassigned")))?;
        let cij = c
            .get(i, j)
            .ok_or_else(|| TrackerError::Logical("lap: assigned cell is not a stored entry".into()))?;
        x[i] = j;
        u[i] = cij - v[j];
    }
    let mut y = vec![0usize; n];
    for j in 0..n {
        y[j] = colsol[j]
            .ok_or_else(|| TrackerError::Logical(format!("lap: column {j} left unassigned")))?;
    }

    Ok(Assignment { x, y, u, v })
}
