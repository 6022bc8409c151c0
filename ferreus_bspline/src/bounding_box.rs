/////////////////////////////////////////////////////////////////////////////////////////////
//
// Defines the axis-aligned bounding box shared by every control lattice of a model.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use crate::LatticeError;
use faer::MatRef;
use serde::{Deserialize, Serialize};

/// Axis-aligned box `[lo, hi]` over which control lattices are laid out.
///
/// Every dimension satisfies `lo[d] < hi[d]` with both bounds finite. The box
/// is immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl BoundingBox {
    /// Creates a bounding box from its lower and upper corners.
    ///
    /// # Errors
    /// - [`LatticeError::ShapeMismatch`] if `lo` is empty or `hi` differs in length.
    /// - [`LatticeError::InvalidDomain`] if any `lo[d] >= hi[d]` or a bound is not finite.
    ///
    /// # Example
    /// ```
    /// use ferreus_bspline::BoundingBox;
    ///
    /// let bbox = BoundingBox::new(vec![0.0, -1.0], vec![1.0, 1.0]).unwrap();
    /// assert_eq!(bbox.dimensions(), 2);
    /// assert!(BoundingBox::new(vec![1.0], vec![1.0]).is_err());
    /// ```
    pub fn new(lo: Vec<f64>, hi: Vec<f64>) -> Result<Self, LatticeError> {
        if lo.is_empty() {
            return Err(LatticeError::ShapeMismatch {
                name: "lo",
                expected: hi.len().max(1),
                found: 0,
            });
        }

        if hi.len() != lo.len() {
            return Err(LatticeError::ShapeMismatch {
                name: "hi",
                expected: lo.len(),
                found: hi.len(),
            });
        }

        for (d, (l, h)) in lo.iter().zip(hi.iter()).enumerate() {
            // Written so that NaN bounds fail the test as well.
            if !(l.is_finite() && h.is_finite() && l < h) {
                return Err(LatticeError::InvalidDomain {
                    dimension: d,
                    lo: *l,
                    hi: *h,
                });
            }
        }

        Ok(Self { lo, hi })
    }

    /// Creates the bounding box of a point array (one point per row), grown on
    /// every side by `padding` times the extent of that dimension.
    ///
    /// Dimensions in which all points share the same coordinate are grown by
    /// `0.5` on each side so the resulting box is never degenerate.
    pub fn from_points(points: MatRef<f64>, padding: f64) -> Result<Self, LatticeError> {
        let dims = points.ncols();

        if points.nrows() == 0 {
            return Err(LatticeError::ShapeMismatch {
                name: "points",
                expected: 1,
                found: 0,
            });
        }

        let mut lo = vec![f64::INFINITY; dims];
        let mut hi = vec![f64::NEG_INFINITY; dims];

        for i in 0..points.nrows() {
            for d in 0..dims {
                let value = *points.get(i, d);
                if value < lo[d] {
                    lo[d] = value;
                }
                if value > hi[d] {
                    hi[d] = value;
                }
            }
        }

        for d in 0..dims {
            let extent = hi[d] - lo[d];
            let pad = if extent > 0.0 { padding.max(0.0) * extent } else { 0.5 };
            lo[d] -= pad;
            hi[d] += pad;
        }

        Self::new(lo, hi)
    }

    /// Number of spatial dimensions.
    #[inline]
    pub fn dimensions(&self) -> usize {
        self.lo.len()
    }

    /// Lower corner.
    #[inline]
    pub fn lo(&self) -> &[f64] {
        &self.lo
    }

    /// Upper corner.
    #[inline]
    pub fn hi(&self) -> &[f64] {
        &self.hi
    }

    /// Length of the box along dimension `d`.
    #[inline]
    pub fn extent(&self, d: usize) -> f64 {
        self.hi[d] - self.lo[d]
    }

    /// Returns `true` if `point` lies inside the closed box.
    ///
    /// Points containing NaN coordinates are never inside.
    pub fn contains(&self, point: &[f64]) -> bool {
        point.len() == self.dimensions()
            && point
                .iter()
                .zip(self.lo.iter().zip(self.hi.iter()))
                .all(|(p, (l, h))| *p >= *l && *p <= *h)
    }
}
