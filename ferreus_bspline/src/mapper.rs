/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements level resolutions and the mapping from domain coordinates to lattice cells.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Level resolutions and the coordinate mapper.
//!
//! A level with resolution `r` splits dimension `d` of the bounding box into
//! `r[d]` equal cells. Cell `c` is supported by the four control nodes
//! `c, c + 1, c + 2, c + 3`, so a lattice carries `r[d] + 3` nodes per
//! dimension.
use crate::{BoundingBox, LatticeError};
use serde::{Deserialize, Serialize};

/// Number of extra control nodes per dimension required by the cubic support.
pub const LATTICE_PADDING: usize = 3;

/// Largest node count that can be held in a dense `Vec<f64>`.
pub const MAX_DENSE_NODES: usize = isize::MAX as usize / std::mem::size_of::<f64>();

/// Per-level lattice resolution: the number of cells along each dimension.
///
/// The total node count of a `LevelSpec` always fits in a `usize`, so every
/// flattened node index and stride is representable.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawLevelSpec")]
pub struct LevelSpec {
    resolution: Vec<usize>,
}

#[derive(Deserialize)]
struct RawLevelSpec {
    resolution: Vec<usize>,
}

impl TryFrom<RawLevelSpec> for LevelSpec {
    type Error = LatticeError;

    fn try_from(raw: RawLevelSpec) -> Result<Self, Self::Error> {
        LevelSpec::new(raw.resolution)
    }
}

impl LevelSpec {
    /// Creates a level specification from per-dimension cell counts.
    ///
    /// # Errors
    /// - [`LatticeError::ShapeMismatch`] if `resolution` is empty.
    /// - [`LatticeError::InvalidResolution`] if any entry is zero.
    /// - [`LatticeError::TooManyNodes`] if the node count overflows `usize`.
    pub fn new(resolution: Vec<usize>) -> Result<Self, LatticeError> {
        if resolution.is_empty() {
            return Err(LatticeError::ShapeMismatch {
                name: "grid",
                expected: 1,
                found: 0,
            });
        }

        if let Some(d) = resolution.iter().position(|&r| r == 0) {
            return Err(LatticeError::InvalidResolution {
                dimension: d,
                resolution: 0,
            });
        }

        if checked_num_nodes(&resolution).is_none() {
            return Err(LatticeError::TooManyNodes { resolution });
        }

        Ok(Self { resolution })
    }

    /// Cells per dimension.
    #[inline]
    pub fn resolution(&self) -> &[usize] {
        &self.resolution
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.resolution.len()
    }

    /// The next finer level: every dimension gets twice as many cells.
    ///
    /// # Errors
    /// [`LatticeError::TooManyNodes`] if the finer lattice cannot be indexed.
    pub fn refined(&self) -> Result<Self, LatticeError> {
        let resolution: Vec<usize> = self
            .resolution
            .iter()
            .map(|r| r.saturating_mul(2))
            .collect();

        if self.resolution.iter().any(|r| r.checked_mul(2).is_none()) {
            return Err(LatticeError::TooManyNodes { resolution });
        }

        Self::new(resolution)
    }

    /// Control nodes per dimension (`resolution + 3`).
    pub fn lattice_shape(&self) -> Vec<usize> {
        self.resolution
            .iter()
            .map(|r| r.saturating_add(LATTICE_PADDING))
            .collect()
    }

    /// Total number of control nodes.
    pub fn num_nodes(&self) -> usize {
        checked_num_nodes(&self.resolution).unwrap_or(usize::MAX)
    }

    /// Number of control nodes, if a lattice of this resolution can be held
    /// in a dense `Vec<f64>`.
    ///
    /// # Errors
    /// [`LatticeError::TooManyNodes`] otherwise.
    pub fn dense_len(&self) -> Result<usize, LatticeError> {
        let num_nodes = self.num_nodes();
        if num_nodes <= MAX_DENSE_NODES {
            Ok(num_nodes)
        } else {
            Err(LatticeError::TooManyNodes {
                resolution: self.resolution.clone(),
            })
        }
    }

    /// Row-major (C-order) strides of the flattened node array; the last
    /// dimension varies fastest.
    pub fn strides(&self) -> Vec<usize> {
        let shape = self.lattice_shape();
        let mut strides = vec![1usize; shape.len()];
        for d in (0..shape.len().saturating_sub(1)).rev() {
            strides[d] = strides[d + 1].saturating_mul(shape[d + 1]);
        }
        strides
    }
}

fn checked_num_nodes(resolution: &[usize]) -> Option<usize> {
    resolution.iter().try_fold(1usize, |acc, r| {
        r.checked_add(LATTICE_PADDING)
            .and_then(|n| acc.checked_mul(n))
    })
}

/// Maps `point` into the cells of `spec`, writing the cell index and the
/// fractional offset within the cell for each dimension.
///
/// For every dimension `u = (p - lo) / (hi - lo) * resolution`,
/// `cell = floor(u)` and `t = u - cell`. The cell index is clamped to
/// `[0, resolution - 1]`, so a point exactly on the upper face lands in the
/// last cell with `t = 1`, and points outside the box keep an offset outside
/// `[0, 1)` that extrapolates the boundary cell's polynomial.
///
/// NaN coordinates map to cell `0` with a NaN offset.
#[inline]
pub fn locate(
    point: &[f64],
    bbox: &BoundingBox,
    spec: &LevelSpec,
    cell: &mut [usize],
    offset: &mut [f64],
) {
    let lo = bbox.lo();
    let hi = bbox.hi();

    for d in 0..spec.dimensions() {
        let cells = spec.resolution[d];
        let u = (point[d] - lo[d]) / (hi[d] - lo[d]) * cells as f64;
        let floor = u.floor();

        let c = if !(floor >= 0.0) {
            0
        } else if floor >= cells as f64 {
            cells - 1
        } else {
            floor as usize
        };

        cell[d] = c;
        offset[d] = u - c as f64;
    }
}

/// Derivative of the local cell coordinate with respect to the domain
/// coordinate along dimension `d`.
#[inline]
pub fn cell_scale(bbox: &BoundingBox, spec: &LevelSpec, d: usize) -> f64 {
    spec.resolution[d] as f64 / bbox.extent(d)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> BoundingBox {
        BoundingBox::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap()
    }

    #[test]
    fn level_spec_validation() {
        assert!(LevelSpec::new(vec![]).is_err());
        assert_eq!(
            LevelSpec::new(vec![4, 0]).unwrap_err(),
            LatticeError::InvalidResolution {
                dimension: 1,
                resolution: 0
            }
        );
        assert!(LevelSpec::new(vec![1, 1, 1]).is_ok());
        assert!(matches!(
            LevelSpec::new(vec![usize::MAX - 2]),
            Err(LatticeError::TooManyNodes { .. })
        ));
    }

    #[test]
    fn refinement_stops_before_node_indices_overflow() {
        let mut spec = LevelSpec::new(vec![4, 4]).unwrap();
        let mut levels = 1;

        while let Ok(finer) = spec.refined() {
            spec = finer;
            levels += 1;
            assert!(levels < 64);
        }

        let nodes = spec
            .lattice_shape()
            .iter()
            .try_fold(1usize, |acc, n| acc.checked_mul(*n));
        assert_eq!(nodes, Some(spec.num_nodes()));
        assert!(matches!(
            spec.refined(),
            Err(LatticeError::TooManyNodes { .. })
        ));

        let json = serde_json::to_string(&LevelSpec {
            resolution: vec![usize::MAX / 2, 2],
        })
        .unwrap();
        assert!(serde_json::from_str::<LevelSpec>(&json).is_err());
    }

    #[test]
    fn shape_strides_and_refinement() {
        let spec = LevelSpec::new(vec![4, 2]).unwrap();
        assert_eq!(spec.lattice_shape(), vec![7, 5]);
        assert_eq!(spec.strides(), vec![5, 1]);
        assert_eq!(spec.num_nodes(), 35);
        assert_eq!(spec.refined().unwrap().resolution(), &[8, 4]);
    }

    #[test]
    fn interior_points_map_to_floor_cell() {
        let bbox = unit_square();
        let spec = LevelSpec::new(vec![4, 8]).unwrap();
        let mut cell = [0usize; 2];
        let mut offset = [0.0; 2];

        locate(&[0.3, 0.3], &bbox, &spec, &mut cell, &mut offset);

        assert_eq!(cell, [1, 2]);
        assert!((offset[0] - 0.2).abs() < 1e-12);
        assert!((offset[1] - 0.4).abs() < 1e-12);
    }

    #[test]
    fn upper_face_maps_to_last_cell() {
        let bbox = unit_square();
        let spec = LevelSpec::new(vec![4, 4]).unwrap();
        let mut cell = [0usize; 2];
        let mut offset = [0.0; 2];

        locate(&[1.0, 1.0], &bbox, &spec, &mut cell, &mut offset);

        assert_eq!(cell, [3, 3]);
        assert_eq!(offset, [1.0, 1.0]);
    }

    #[test]
    fn outside_points_are_clamped_and_extrapolated() {
        let bbox = unit_square();
        let spec = LevelSpec::new(vec![4, 4]).unwrap();
        let mut cell = [0usize; 2];
        let mut offset = [0.0; 2];

        locate(&[-0.5, 1.5], &bbox, &spec, &mut cell, &mut offset);

        assert_eq!(cell, [0, 3]);
        assert!((offset[0] + 2.0).abs() < 1e-12);
        assert!((offset[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn nan_coordinates_do_not_panic() {
        let bbox = unit_square();
        let spec = LevelSpec::new(vec![4, 4]).unwrap();
        let mut cell = [9usize; 2];
        let mut offset = [0.0; 2];

        locate(&[f64::NAN, 0.5], &bbox, &spec, &mut cell, &mut offset);

        assert_eq!(cell[0], 0);
        assert!(offset[0].is_nan());
        assert_eq!(cell[1], 2);
    }
}
