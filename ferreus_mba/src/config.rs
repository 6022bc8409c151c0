/////////////////////////////////////////////////////////////////////////////////////////////
//
// Declares configuration types for multilevel construction, sparsity handling, and evaluation.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Declares configuration types for multilevel construction, sparsity handling, and evaluation.
use crate::MbaError;
use serde::{Deserialize, Serialize};

/// What to do when a level's fill ratio falls below `min_fill`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillPolicy {
    /// Keep refining. Sparse levels are common at fine resolutions and
    /// usually still reduce the residual where data exists.
    Continue,

    /// Stop after the first level whose fill ratio is below `min_fill`.
    Stop,
}

impl Default for FillPolicy {
    fn default() -> Self {
        FillPolicy::Continue
    }
}

/// Behaviour of evaluation for target points outside the model domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutOfDomain {
    /// Extend the polynomial pieces of the boundary cells.
    Extrapolate,

    /// Fail with [`MbaError::PointOutsideDomain`].
    Reject,
}

impl Default for OutOfDomain {
    fn default() -> Self {
        OutOfDomain::Extrapolate
    }
}

/// Optional global approximation removed from the data before level 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InitialApproximation {
    /// Level 0 fits the raw sample values.
    None,

    /// A least-squares linear trend is fitted first and the lattices
    /// approximate what remains.
    Linear,
}

impl Default for InitialApproximation {
    fn default() -> Self {
        InitialApproximation::None
    }
}

/// Parameters controlling multilevel construction and evaluation.
///
/// ### Default Values
/// - `max_levels`: `8`
/// - `tol`: `1e-8`
/// - `min_fill`: `0.5`
/// - `fill_policy`: [`FillPolicy::Continue`]
/// - `out_of_domain`: [`OutOfDomain::Extrapolate`]
/// - `initial_approximation`: [`InitialApproximation::None`]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MbaParams {
    /// Maximum number of lattice levels to build.
    pub max_levels: usize,

    /// Construction stops once the RMS residual at the samples is at or
    /// below this value.
    pub tol: f64,

    /// Fill ratio in `(0, 1]` below which a lattice is stored sparsely and
    /// [`MbaParams::fill_policy`] is applied.
    pub min_fill: f64,

    /// Reaction to levels with a fill ratio below `min_fill`.
    pub fill_policy: FillPolicy,

    /// Evaluation behaviour outside the domain.
    pub out_of_domain: OutOfDomain,

    /// Global approximation removed before level 0.
    pub initial_approximation: InitialApproximation,
}

impl Default for MbaParams {
    fn default() -> Self {
        MbaParams {
            max_levels: 8,
            tol: 1e-8,
            min_fill: 0.5,
            fill_policy: FillPolicy::default(),
            out_of_domain: OutOfDomain::default(),
            initial_approximation: InitialApproximation::default(),
        }
    }
}

impl MbaParams {
    /// Returns a new [`MbaParamsBuilder`] populated with the default values.
    pub fn builder() -> MbaParamsBuilder {
        MbaParamsBuilder::new()
    }

    /// Checks every parameter against its permitted range.
    ///
    /// # Errors
    /// [`MbaError::InvalidConfig`] if `max_levels < 1`, `tol` is not a positive
    /// finite number, or `min_fill` is outside `(0, 1]`.
    pub fn validate(&self) -> Result<(), MbaError> {
        if self.max_levels < 1 {
            return Err(MbaError::InvalidConfig {
                parameter: "max_levels",
                value: self.max_levels.to_string(),
                expected: "at least 1",
            });
        }

        if !(self.tol > 0.0 && self.tol.is_finite()) {
            return Err(MbaError::InvalidConfig {
                parameter: "tol",
                value: self.tol.to_string(),
                expected: "a positive finite number",
            });
        }

        if !(self.min_fill > 0.0 && self.min_fill <= 1.0) {
            return Err(MbaError::InvalidConfig {
                parameter: "min_fill",
                value: self.min_fill.to_string(),
                expected: "a value in (0, 1]",
            });
        }

        Ok(())
    }
}

/// A convenience builder for constructing a [`MbaParams`] instance.
///
/// The builder should be called via the [`MbaParams::builder`] method.
///
/// See [`MbaParams`] for details on each field.
#[derive(Debug, Clone, Copy)]
pub struct MbaParamsBuilder {
    params: MbaParams,
}

impl MbaParamsBuilder {
    fn new() -> Self {
        Self {
            params: MbaParams::default(),
        }
    }

    /// Sets the maximum number of levels.
    pub fn max_levels(mut self, max_levels: usize) -> Self {
        self.params.max_levels = max_levels;
        self
    }

    /// Sets the RMS residual convergence tolerance.
    pub fn tol(mut self, tol: f64) -> Self {
        self.params.tol = tol;
        self
    }

    /// Sets the sparsity threshold.
    pub fn min_fill(mut self, min_fill: f64) -> Self {
        self.params.min_fill = min_fill;
        self
    }

    /// Sets the reaction to sparse levels.
    pub fn fill_policy(mut self, fill_policy: FillPolicy) -> Self {
        self.params.fill_policy = fill_policy;
        self
    }

    /// Sets the out-of-domain evaluation behaviour.
    pub fn out_of_domain(mut self, out_of_domain: OutOfDomain) -> Self {
        self.params.out_of_domain = out_of_domain;
        self
    }

    /// Sets the initial global approximation.
    pub fn initial_approximation(mut self, initial_approximation: InitialApproximation) -> Self {
        self.params.initial_approximation = initial_approximation;
        self
    }

    /// Builds and returns a [`MbaParams`] instance.
    ///
    /// Values are checked when the model is built, see [`MbaParams::validate`].
    pub fn build(self) -> MbaParams {
        self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let params = MbaParams::default();
        assert_eq!(params.max_levels, 8);
        assert_eq!(params.tol, 1e-8);
        assert_eq!(params.min_fill, 0.5);
        assert_eq!(params.fill_policy, FillPolicy::Continue);
        assert!(params.validate().is_ok());
        assert_eq!(MbaParams::builder().build(), params);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let cases = [
            (MbaParams::builder().max_levels(0).build(), "max_levels"),
            (MbaParams::builder().tol(0.0).build(), "tol"),
            (MbaParams::builder().tol(-1e-3).build(), "tol"),
            (MbaParams::builder().tol(f64::NAN).build(), "tol"),
            (MbaParams::builder().min_fill(0.0).build(), "min_fill"),
            (MbaParams::builder().min_fill(1.5).build(), "min_fill"),
            (MbaParams::builder().min_fill(f64::NAN).build(), "min_fill"),
        ];

        for (params, name) in cases {
            match params.validate() {
                Err(MbaError::InvalidConfig { parameter, .. }) => assert_eq!(parameter, name),
                other => panic!("expected InvalidConfig for {name}, got {other:?}"),
            }
        }
    }

    #[test]
    fn boundary_values_are_accepted() {
        let params = MbaParams::builder()
            .max_levels(1)
            .tol(f64::MIN_POSITIVE)
            .min_fill(1.0)
            .build();
        assert!(params.validate().is_ok());
    }

    #[test]
    fn params_round_trip_through_json() {
        let params = MbaParams::builder()
            .max_levels(3)
            .fill_policy(FillPolicy::Stop)
            .out_of_domain(OutOfDomain::Reject)
            .initial_approximation(InitialApproximation::Linear)
            .build();

        let json = serde_json::to_string(&params).unwrap();
        let restored: MbaParams = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, params);
    }
}
