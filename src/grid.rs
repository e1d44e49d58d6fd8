//! Dense per-pixel grids with explicit unknown cells.

use nalgebra::Vector2;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// Row-major `height x width` grid, `None` marks an unknown cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid<T> {
    cells: Array2<Option<T>>,
}

/// Range along the viewing ray of every pixel.
pub type DepthMap = Grid<f64>;
/// Per-pixel displacement to the corresponding pixel of another image.
pub type FlowField = Grid<Vector2<f32>>;

impl<T: Copy> Grid<T> {
    pub fn unknown(width: usize, height: usize) -> Self {
        Self {
            cells: Array2::from_elem((height, width), None),
        }
    }

    #[cfg(test)]
    pub fn filled(width: usize, height: usize, value: T) -> Self {
        Self {
            cells: Array2::from_elem((height, width), Some(value)),
        }
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.cells.ncols()
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.cells.nrows()
    }

    #[inline]
    pub fn get(&self, u: usize, v: usize) -> Option<T> {
        self.cells.get((v, u)).copied().flatten()
    }

    #[inline]
    pub fn set(&mut self, u: usize, v: usize, value: Option<T>) {
        self.cells[(v, u)] = value;
    }

    pub fn known_count(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// `((u, v), value)` of every known cell in row-major order.
    pub fn iter_known(&self) -> impl Iterator<Item = ((usize, usize), T)> + '_ {
        self.cells
            .indexed_iter()
            .filter_map(|((v, u), c)| c.map(|value| ((u, v), value)))
    }

    pub fn ensure_same_size<U: Copy>(&self, other: &Grid<U>) -> Result<(), PipelineError> {
        if self.width() != other.width() || self.height() != other.height() {
            return Err(PipelineError::ShapeMismatch(
                self.width(),
                self.height(),
                other.width(),
                other.height(),
            ));
        }
        Ok(())
    }
}

impl<T: Copy + Send + Sync> Grid<T> {
    /// Evaluate `f(u, v)` for every cell in parallel.
    pub fn par_from_fn<F>(width: usize, height: usize, f: F) -> Self
    where
        F: Fn(usize, usize) -> Option<T> + Sync + Send,
    {
        let mut grid = Self::unknown(width, height);
        Zip::indexed(&mut grid.cells).par_for_each(|(v, u), cell| *cell = f(u, v));
        grid
    }
}
