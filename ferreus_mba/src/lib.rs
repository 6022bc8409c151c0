/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API and high-level documentation for multilevel B-spline approximation.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Multilevel B-spline approximation of scattered data
//!
//! Scattered samples of a scalar function in any number of dimensions are
//! approximated by a sum of uniform cubic tensor-product B-splines defined on
//! a hierarchy of regular control lattices `1`. The coarsest lattice captures
//! the overall shape of the data; each finer lattice, with twice as many cells
//! per dimension, approximates the residual left by the levels before it.
//!
//! The result is a compact, C² continuous function that can be evaluated
//! anywhere in constant time per level, independent of the number of samples.
//!
//! Fitting a level is a local, closed-form operation: every sample spreads
//! its residual over the `4^NDim` control nodes around it, and every node
//! takes the weighted average of what it received. Construction therefore
//! scales linearly with the number of samples and runs in parallel via
//! [`rayon`](https://docs.rs/rayon/latest/rayon/). The numerical kernel lives
//! in the [`ferreus_bspline`] crate.
//!
//! # Features
//! - Any number of dimensions (the stencil grows as `4^NDim`)
//! - Dense or sparse lattice storage, chosen per level from its fill ratio
//! - Optional per-sample weights and an optional linear trend removed before the first level
//! - Batched evaluation of `faer` matrices or `ndarray` arrays of any leading shape
//! - Gradients, exact compaction of all levels into one lattice, and JSON persistence
//!
//! # Examples
//!
//! ```
//! use ferreus_mba::{
//!     MultilevelBSpline,
//!     MbaParams,
//!     generate_random_points,
//!     MBATestFunctions,
//! };
//!
//! // Generate some random data in the unit square
//! let source_points = generate_random_points(500, 2, Some(42));
//!
//! // Assign some values to the source points using Franke's function
//! let source_values = MBATestFunctions::franke_2d(&source_points);
//!
//! let params = MbaParams::builder()
//!     .max_levels(6)
//!     .tol(1e-6)
//!     .build();
//!
//! // Build the hierarchy, starting from a 4 x 4 lattice over the unit square
//! let model = MultilevelBSpline::builder(
//!     vec![0.0, 0.0],
//!     vec![1.0, 1.0],
//!     vec![4, 4],
//!     source_points.clone(),
//!     source_values.clone(),
//! )
//! .params(params)
//! .build()
//! .unwrap();
//!
//! // Every level reduces the residual at the samples
//! let first = model.reports().first().unwrap().rms;
//! let last = model.reports().last().unwrap().rms;
//! assert!(last < first);
//!
//! println!("{model}");
//! ```
//!
//! # References
//! 1.  S. Lee, G. Wolberg, and S. Y. Shin. Scattered data interpolation with
//!     multilevel B-splines. IEEE Transactions on Visualization and Computer
//!     Graphics, 3(3):228–244, 1997.
pub mod config;

mod common;

mod error;

mod mba;

mod model_io;

mod multilevel;

pub mod progress;

mod trend;

mod mba_test_functions;

pub use {
    common::{create_evaluation_grid, csv_to_point_arrays, generate_random_points, point_arrays_to_csv},
    config::{FillPolicy, InitialApproximation, MbaParams, MbaParamsBuilder, OutOfDomain},
    error::MbaError,
    mba::{MultilevelBSpline, MultilevelBSplineBuilder},
    mba_test_functions::MBATestFunctions,
    model_io::ModelIOError,
    multilevel::{LevelReport, Termination},
    trend::LinearTrend,
};

pub use ferreus_bspline::{BoundingBox, ControlLattice, LevelSpec};
