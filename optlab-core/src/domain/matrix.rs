//! Dense row-major matrix of simulated paths (paths × steps).

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum MatrixError {
    #[error("matrix dimensions must be positive (got {n_paths} × {n_steps})")]
    EmptyShape { n_paths: usize, n_steps: usize },
    #[error("row {row} has {got} columns, expected {expected}")]
    RaggedRow { row: usize, got: usize, expected: usize },
}

/// Row-major `n_paths × n_steps` matrix. Row `i` is one simulated path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathMatrix {
    n_paths: usize,
    n_steps: usize,
    data: Vec<f64>,
}

impl PathMatrix {
    pub fn zeros(n_paths: usize, n_steps: usize) -> Result<Self, MatrixError> {
        if n_paths == 0 || n_steps == 0 {
            return Err(MatrixError::EmptyShape { n_paths, n_steps });
        }
        Ok(Self {
            n_paths,
            n_steps,
            data: vec![0.0; n_paths * n_steps],
        })
    }

    pub fn from_rows(rows: Vec<Vec<f64>>) -> Result<Self, MatrixError> {
        let n_paths = rows.len();
        let n_steps = rows.first().map_or(0, Vec::len);
        if n_paths == 0 || n_steps == 0 {
            return Err(MatrixError::EmptyShape { n_paths, n_steps });
        }
        let mut data = Vec::with_capacity(n_paths * n_steps);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != n_steps {
                return Err(MatrixError::RaggedRow {
                    row: i,
                    got: row.len(),
                    expected: n_steps,
                });
            }
            data.extend(row);
        }
        Ok(Self {
            n_paths,
            n_steps,
            data,
        })
    }

    pub fn n_paths(&self) -> usize {
        self.n_paths
    }

    pub fn n_steps(&self) -> usize {
        self.n_steps
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.data[i * self.n_steps..(i + 1) * self.n_steps]
    }

    pub fn row_mut(&mut self, i: usize) -> &mut [f64] {
        &mut self.data[i * self.n_steps..(i + 1) * self.n_steps]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> {
        self.data.chunks_exact(self.n_steps)
    }

    pub fn rows_mut(&mut self) -> impl Iterator<Item = &mut [f64]> {
        self.data.chunks_exact_mut(self.n_steps)
    }

    /// Last column: the value of every path at the final step.
    pub fn terminal_values(&self) -> Vec<f64> {
        self.rows().map(|r| r[self.n_steps - 1]).collect()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }
}
