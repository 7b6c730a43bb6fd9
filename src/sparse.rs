//! A minimal sparse-matrix type: accumulate `(row, col, value)` triplets,
//! then freeze them once into a CSR/CSC pair over the same stored values.
//! An entry that was never pushed reads as "not present" everywhere — the
//! solver and cost-matrix builders treat that as a forbidden, infinite-cost
//! assignment rather than an implicit zero.

use crate::error::{Result, TrackerError};

/// Smallest magnitude the engine treats as a real, non-zero cost. Used to
/// tell phantom padding entries (cost `EPSILON`) apart from genuine
/// zero-cost links when filtering the debug inspection surface.
pub const EPSILON: f64 = f64::EPSILON;

/// Accumulates triplets for one square cost matrix before freezing.
#[derive(Debug, Default)]
pub struct TripletBuilder {
    rows: usize,
    cols: usize,
    entries: Vec<(usize, usize, f64)>,
}

impl TripletBuilder {
    pub fn new(rows: usize, cols: usize) -> Self {
        Self { rows, cols, entries: Vec::new() }
    }

    pub fn with_capacity(rows: usize, cols: usize, capacity: usize) -> Self {
        Self { rows, cols, entries: Vec::with_capacity(capacity) }
    }

    pub fn push(&mut self, row: usize, col: usize, value: f64) {
        self.entries.push((row, col, value));
    }

    /// Merge in triplets assembled independently (e.g. one `Vec` per row of
    /// a parallel build). The sort in [`Self::freeze`] makes the result
    /// independent of how the caller chose to merge.
    pub fn extend(&mut self, other: impl IntoIterator<Item = (usize, usize, f64)>) {
        self.entries.extend(other);
    }

    pub fn freeze(self) -> Result<SparseMatrix> {
        if self.entries.iter().any(|&(r, c, _)| r >= self.rows || c >= self.cols) {
            return Err(TrackerError::Logical("triplet index out of bounds".into()));
        }
        let mut entries = self.entries;
        entries.sort_by(|a, b| (a.0, a.1).partial_cmp(&(b.0, b.1)).unwrap());
        SparseMatrix::from_sorted(self.rows, self.cols, entries)
    }
}

/// Frozen sparse matrix: CSR (row-major) and CSC (column-major) indices
/// over the same stored entries, built once and read many times by the
/// solver.
pub struct SparseMatrix {
    rows: usize,
    cols: usize,
    row_ptr: Vec<usize>,
    row_col: Vec<usize>,
    row_val: Vec<f64>,
    col_ptr: Vec<usize>,
    col_row: Vec<usize>,
    col_val: Vec<f64>,
}

impl SparseMatrix {
    fn from_sorted(rows: usize, cols: usize, sorted: Vec<(usize, usize, f64)>) -> Result<Self> {
        if rows != cols {
            return Err(TrackerError::Logical(format!(
                "malformed cost matrix: expected square, got {rows}x{cols}"
            )));
        }

        let mut row_ptr = vec![0usize; rows + 1];
        let mut row_col = Vec::with_capacity(sorted.len());
        let mut row_val = Vec::with_capacity(sorted.len());
        for &(r, c, v) in &sorted {
            row_ptr[r + 1] += 1;
            row_col.push(c);
            row_val.push(v);
        }
        for r in 0..rows {
            row_ptr[r + 1] += row_ptr[r];
        }

        let mut by_col = sorted;
        by_col.sort_by(|a, b| (a.1, a.0).partial_cmp(&(b.1, b.0)).unwrap());
        let mut col_ptr = vec![0usize; cols + 1];
        let mut col_row = Vec::with_capacity(by_col.len());
        let mut col_val = Vec::with_capacity(by_col.len());
        for &(r, c, v) in &by_col {
            col_ptr[c + 1] += 1;
            col_row.push(r);
            col_val.push(v);
        }
        for c in 0..cols {
            col_ptr[c + 1] += col_ptr[c];
        }

        Ok(Self { rows, cols, row_ptr, row_col, row_val, col_ptr, col_row, col_val })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn nnz(&self) -> usize {
        self.row_val.len()
    }

    /// Stored `(col, value)` pairs for `row`, ascending by column.
    pub fn row_iter(&self, row: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.row_col[start..end].iter().copied().zip(self.row_val[start..end].iter().copied())
    }

    /// Stored `(row, value)` pairs for `col`, ascending by row.
    pub fn col_iter(&self, col: usize) -> impl Iterator<Item = (usize, f64)> + '_ {
        let start = self.col_ptr[col];
        let end = self.col_ptr[col + 1];
        self.col_row[start..end].iter().copied().zip(self.col_val[start..end].iter().copied())
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        let start = self.row_ptr[row];
        let end = self.row_ptr[row + 1];
        self.row_col[start..end]
            .binary_search(&col)
            .ok()
            .map(|offset| self.row_val[start + offset])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freeze_builds_matching_csr_and_csc() {
        let mut b = TripletBuilder::new(3, 3);
        b.push(0, 2, 1.0);
        b.push(1, 0, 2.0);
        b.push(2, 1, 3.0);
        b.push(0, 0, 4.0);
        let m = b.freeze().unwrap();

        assert_eq!(m.get(0, 0), Some(4.0));
        assert_eq!(m.get(0, 2), Some(1.0));
        assert_eq!(m.get(0, 1), None);
        assert_eq!(m.row_iter(0).collect::<Vec<_>>(), vec![(0, 4.0), (2, 1.0)]);
        assert_eq!(m.col_iter(1).collect::<Vec<_>>(), vec![(2, 3.0)]);
        assert_eq!(m.nnz(), 4);
    }

    #[test]
    fn freeze_rejects_non_square() {
        let b = TripletBuilder::new(2, 3);
        assert!(b.freeze().is_err());
    }

    #[test]
    fn freeze_rejects_out_of_bounds_triplets() {
        let mut b = TripletBuilder::new(2, 2);
        b.push(0, 5, 1.0);
        assert!(b.freeze().is_err());
    }
}
