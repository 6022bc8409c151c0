/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares the validation and evaluation errors returned by the multilevel B-spline API.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

use ferreus_bspline::LatticeError;
use std::fmt;

/// Errors returned when constructing or evaluating a [`crate::MultilevelBSpline`].
///
/// All construction errors are detected before any fitting work begins, so a
/// failed build never leaves a partially constructed model behind.
#[derive(Debug, Clone, PartialEq)]
pub enum MbaError {
    /// An input does not have the expected dimensionality or sample count.
    ShapeMismatch {
        name: &'static str,
        expected: usize,
        found: usize,
    },

    /// A dimension of the domain has `lo >= hi` or a non-finite bound.
    InvalidDomain { dimension: usize, lo: f64, hi: f64 },

    /// A configuration value is outside its permitted range.
    InvalidConfig {
        parameter: &'static str,
        value: String,
        expected: &'static str,
    },

    /// A sample coordinate or value is NaN or infinite.
    NonFiniteInput { name: &'static str, row: usize },

    /// A target point lies outside the domain while
    /// [`crate::config::OutOfDomain::Reject`] is configured.
    PointOutsideDomain { point_index: usize },

    /// The stored levels of a model cannot be combined.
    IncompatibleLevels(LatticeError),
}

impl fmt::Display for MbaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MbaError::ShapeMismatch {
                name,
                expected,
                found,
            } => write!(
                f,
                "shape mismatch: {} should have size {}, found {}",
                name, expected, found
            ),
            MbaError::InvalidDomain { dimension, lo, hi } => write!(
                f,
                "invalid domain in dimension {}: expected finite lo < hi, found lo = {}, hi = {}",
                dimension, lo, hi
            ),
            MbaError::InvalidConfig {
                parameter,
                value,
                expected,
            } => write!(
                f,
                "invalid configuration: {} = {} (expected {})",
                parameter, value, expected
            ),
            MbaError::NonFiniteInput { name, row } => {
                write!(f, "non-finite {} at row {}", name, row)
            }
            MbaError::PointOutsideDomain { point_index } => write!(
                f,
                "target point at row {} lies outside the model domain",
                point_index
            ),
            MbaError::IncompatibleLevels(source) => {
                write!(f, "incompatible model levels: {}", source)
            }
        }
    }
}

impl std::error::Error for MbaError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MbaError::IncompatibleLevels(source) => Some(source),
            _ => None,
        }
    }
}

impl From<LatticeError> for MbaError {
    fn from(err: LatticeError) -> Self {
        match err {
            LatticeError::ShapeMismatch {
                name,
                expected,
                found,
            } => MbaError::ShapeMismatch {
                name,
                expected,
                found,
            },
            LatticeError::InvalidDomain { dimension, lo, hi } => {
                MbaError::InvalidDomain { dimension, lo, hi }
            }
            LatticeError::InvalidResolution {
                dimension,
                resolution,
            } => MbaError::InvalidConfig {
                parameter: "grid",
                value: format!("{} in dimension {}", resolution, dimension),
                expected: "a positive number of cells in every dimension",
            },
            LatticeError::TooManyNodes { resolution } => MbaError::InvalidConfig {
                parameter: "grid",
                value: format!("{:?}", resolution),
                expected: "a lattice whose control nodes can be indexed",
            },
            err @ LatticeError::IncompatibleLattices { .. } => MbaError::IncompatibleLevels(err),
        }
    }
}
