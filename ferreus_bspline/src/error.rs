/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the error type raised when validating lattice geometry and combining lattices.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use std::fmt;

/// Errors raised while validating bounding boxes and level specifications,
/// or while combining control lattices.
///
/// Validation happens before any numerical work is performed, so none of
/// these errors can be produced part way through a fit.
#[derive(Debug, Clone, PartialEq)]
pub enum LatticeError {
    /// An input vector does not have the expected length.
    ShapeMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    /// A dimension of the bounding box does not satisfy `lo < hi`, or one of
    /// its bounds is not finite.
    InvalidDomain { dimension: usize, lo: f64, hi: f64 },

    /// A lattice resolution must have at least one interval per dimension.
    InvalidResolution { dimension: usize, resolution: usize },

    /// The lattice of this resolution has more control nodes than can be
    /// indexed, or stored densely.
    TooManyNodes { resolution: Vec<usize> },

    /// Two lattices cannot be combined because their resolutions differ and
    /// the coarser one cannot be refined onto the finer one.
    IncompatibleLattices {
        coarse: Vec<usize>,
        fine: Vec<usize>,
    },
}

impl fmt::Display for LatticeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LatticeError::ShapeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "shape mismatch: {} should have length {}, found {}",
                name, expected, found
            ),
            LatticeError::InvalidDomain { dimension, lo, hi } => write!(
                f,
                "invalid domain in dimension {}: expected finite lo < hi, found lo = {}, hi = {}",
                dimension, lo, hi
            ),
            LatticeError::InvalidResolution {
                dimension,
                resolution,
            } => write!(
                f,
                "invalid lattice resolution in dimension {}: {} (must be at least 1)",
                dimension, resolution
            ),
            LatticeError::TooManyNodes { resolution } => write!(
                f,
                "a lattice of resolution {:?} has too many control nodes",
                resolution
            ),
            LatticeError::IncompatibleLattices { coarse, fine } => write!(
                f,
                "cannot refine a lattice of resolution {:?} onto resolution {:?}",
                coarse, fine
            ),
        }
    }
}

impl std::error::Error for LatticeError {}
