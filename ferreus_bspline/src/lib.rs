/////////////////////////////////////////////////////////////////////////////////////////////
//
// Exposes the public API for the uniform cubic B-spline control lattice crate.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! # Uniform cubic B-spline control lattices
//!
//! This crate provides the numerical kernel used by `ferreus_mba` for
//! multilevel B-spline approximation of scattered data:
//!
//! - [`BoundingBox`] - the axis-aligned domain shared by all lattices of a model.
//! - [`LevelSpec`] and [`mapper::locate`] - the per-level resolution and the mapping
//!   from domain coordinates to a lattice cell and fractional offset.
//! - [`basis`] - the four uniform cubic blending functions and their
//!   `4^NDim` tensor-product [`Stencil`].
//! - [`ControlLattice`] - evaluation, gradients, parallel local least-squares
//!   fitting from weighted samples, and exact refinement by subdivision.
//!
//! Any number of dimensions is supported, though the stencil size grows
//! as `4^NDim`.
//!
//! # Example
//!
//! ```
//! use ferreus_bspline::{BoundingBox, ControlLattice, LevelSpec};
//! use faer::Mat;
//!
//! let bbox = BoundingBox::new(vec![0.0, 0.0], vec![1.0, 1.0]).unwrap();
//! let spec = LevelSpec::new(vec![4, 4]).unwrap();
//!
//! // A single sample is reproduced exactly by one lattice.
//! let points = Mat::from_fn(1, 2, |_, _| 0.5);
//! let lattice = ControlLattice::fit(&bbox, spec, points.as_ref(), &[3.0], None, 0.5).unwrap();
//!
//! assert!((lattice.apply(&bbox, &[0.5, 0.5]) - 3.0).abs() < 1e-12);
//! ```
//!
//! # References
//! 1. S. Lee, G. Wolberg, and S. Y. Shin. Scattered data interpolation with
//!    multilevel B-splines. IEEE Transactions on Visualization and Computer
//!    Graphics, 3(3):228–244, 1997.
pub mod basis;

mod bounding_box;

mod error;

mod lattice;

pub mod mapper;

pub use {
    basis::Stencil,
    bounding_box::BoundingBox,
    error::LatticeError,
    lattice::{ControlLattice, LatticeScratch, LatticeStorage, DENSE_ACCUMULATOR_LIMIT},
    mapper::{LevelSpec, LATTICE_PADDING},
};
