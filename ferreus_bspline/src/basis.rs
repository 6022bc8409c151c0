/////////////////////////////////////////////////////////////////////////////////////////////
//
// Evaluates uniform cubic B-spline blending functions and their tensor-product stencils.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Uniform cubic B-spline blending functions.
//!
//! For a fractional cell offset `t` the four blending weights are
//!
//! ```text
//! b0(t) = (1 - t)^3 / 6
//! b1(t) = (3t^3 - 6t^2 + 4) / 6
//! b2(t) = (-3t^3 + 3t^2 + 3t + 1) / 6
//! b3(t) = t^3 / 6
//! ```
//!
//! and node `cell + k` of a lattice receives `b_k(t)`. The weights are a
//! partition of unity for every `t`, including offsets outside `[0, 1)`
//! produced by extrapolation.

/// The four blending weights for offset `t`.
#[inline(always)]
pub fn weights(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let t3 = t2 * t;
    let s = 1.0 - t;

    [
        s * s * s / 6.0,
        (3.0 * t3 - 6.0 * t2 + 4.0) / 6.0,
        (-3.0 * t3 + 3.0 * t2 + 3.0 * t + 1.0) / 6.0,
        t3 / 6.0,
    ]
}

/// First derivatives of the blending weights with respect to `t`.
#[inline(always)]
pub fn derivatives(t: f64) -> [f64; 4] {
    let t2 = t * t;
    let s = 1.0 - t;

    [
        -0.5 * s * s,
        1.5 * t2 - 2.0 * t,
        -1.5 * t2 + t + 0.5,
        0.5 * t2,
    ]
}

/// Tensor-product stencil of a point: the `4^NDim` control nodes whose
/// basis functions are non-zero at the point, with their weights.
///
/// Buffers are reused between calls, so one stencil per worker thread is
/// enough for any number of points.
#[derive(Debug, Clone, Default)]
pub struct Stencil {
    indices: Vec<usize>,
    weights: Vec<f64>,
}

impl Stencil {
    /// Creates an empty stencil sized for `dimensions`.
    pub fn new(dimensions: usize) -> Self {
        let capacity = 4usize.pow(dimensions as u32);
        Self {
            indices: Vec::with_capacity(capacity),
            weights: Vec::with_capacity(capacity),
        }
    }

    /// Fills the stencil for the lattice cell `cell` given the per-dimension
    /// weight factors and the lattice strides.
    ///
    /// `factors[d][k]` is the weight of node `cell[d] + k` along dimension `d`;
    /// the node weight is the product of its factors over all dimensions.
    pub fn build(&mut self, cell: &[usize], factors: &[[f64; 4]], strides: &[usize]) {
        self.indices.clear();
        self.weights.clear();

        let base: usize = cell.iter().zip(strides).map(|(c, s)| c * s).sum();
        self.indices.push(base);
        self.weights.push(1.0);

        for (d, factor) in factors.iter().enumerate() {
            let len = self.indices.len();
            for k in 1..4 {
                let shift = k * strides[d];
                for j in 0..len {
                    let index = self.indices[j] + shift;
                    let weight = self.weights[j] * factor[k];
                    self.indices.push(index);
                    self.weights.push(weight);
                }
            }
            self.weights[..len].iter_mut().for_each(|w| *w *= factor[0]);
        }
    }

    /// Flattened node indices of the stencil.
    #[inline]
    pub fn indices(&self) -> &[usize] {
        &self.indices
    }

    /// Weights of the stencil, aligned with [`Stencil::indices`].
    #[inline]
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Iterates over `(node index, weight)` pairs.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = (usize, f64)> + '_ {
        self.indices.iter().copied().zip(self.weights.iter().copied())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}
