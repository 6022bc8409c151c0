/////////////////////////////////////////////////////////////////////////////////////////////
//
// Implements control lattices: evaluation, local least-squares fitting, and refinement.
//
// Created on: 19 Oct 2026     Author: Daniel Owen
//
// Copyright (c) 2026, Maptek Pty Ltd. All rights reserved. Licensed under the MIT License.
//
/////////////////////////////////////////////////////////////////////////////////////////////

//! Control lattices.
//!
//! A [`ControlLattice`] holds one scalar per control node of a regular grid
//! laid over a [`BoundingBox`]. It is fitted once from a set of weighted
//! samples and is immutable afterwards.
//!
//! # Fitting
//! Each sample `p` with residual `r` and weight `w` touches the `4^NDim`
//! nodes of its stencil. With node weights `φ_k(p)` and `S = Σ φ_k(p)^2`, the
//! control value that reproduces `r` at `p` with the smallest norm is
//! `c_k = φ_k r / S`. Every node accumulates
//!
//! ```text
//! numerator[k]   += w * φ_k^2 * c_k
//! denominator[k] += w * φ_k^2
//! ```
//!
//! and its final value is `numerator / denominator`, or `0` for nodes that no
//! sample touched. Accumulation runs in parallel over contiguous chunks of
//! samples, one accumulator per chunk, merged in chunk order before the
//! division. For a fixed thread pool size the result is reproducible.
//!
//! A chunk accumulates into dense arrays only when it makes at least as many
//! contributions as the lattice has nodes; otherwise it uses a hash map, so
//! the memory of a fit stays proportional to the work done.
use crate::{
    basis::{self, Stencil},
    mapper::{self, LevelSpec},
    BoundingBox, LatticeError,
};
use faer::MatRef;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lattices with more nodes than this are always accumulated into hash maps
/// keyed by the flattened node index.
pub const DENSE_ACCUMULATOR_LIMIT: usize = 1 << 21;

/// Minimum number of samples handled by one fitting chunk.
const FIT_MIN_CHUNK: usize = 1024;

/// Storage of the fitted node values.
///
/// Dense storage keeps every node in C-order. Sparse storage only keeps the
/// nodes that received data; all other nodes are zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LatticeStorage {
    Dense(Vec<f64>),
    Sparse(#[serde(with = "sparse_entries")] HashMap<usize, f64>),
}

/// Sparse node values are written as `[index, value]` pairs sorted by index,
/// which keeps files deterministic and avoids integer map keys in JSON.
mod sparse_entries {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::collections::HashMap;

    pub fn serialize<S: Serializer>(
        values: &HashMap<usize, f64>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut entries: Vec<(usize, f64)> = values.iter().map(|(i, v)| (*i, *v)).collect();
        entries.sort_unstable_by_key(|(i, _)| *i);
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<HashMap<usize, f64>, D::Error> {
        let entries = Vec::<(usize, f64)>::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

impl LatticeStorage {
    #[inline(always)]
    fn value(&self, index: usize) -> f64 {
        match self {
            LatticeStorage::Dense(values) => values[index],
            LatticeStorage::Sparse(values) => values.get(&index).copied().unwrap_or(0.0),
        }
    }
}

/// Per-thread scratch space used to map points onto a lattice.
///
/// Create one per worker and reuse it for every point and every lattice of
/// the same dimensionality.
#[derive(Debug, Clone)]
pub struct LatticeScratch {
    point: Vec<f64>,
    cell: Vec<usize>,
    offset: Vec<f64>,
    factors: Vec<[f64; 4]>,
    stencil: Stencil,
}

impl LatticeScratch {
    pub fn new(dimensions: usize) -> Self {
        Self {
            point: vec![0.0; dimensions],
            cell: vec![0; dimensions],
            offset: vec![0.0; dimensions],
            factors: vec![[0.0; 4]; dimensions],
            stencil: Stencil::new(dimensions),
        }
    }

    #[inline]
    fn load_point(&mut self, point: &[f64]) {
        self.point.copy_from_slice(point);
    }

    #[inline]
    fn load_row(&mut self, points: MatRef<f64>, row: usize) {
        for (d, p) in self.point.iter_mut().enumerate() {
            *p = *points.get(row, d);
        }
    }

    #[inline]
    fn locate(&mut self, bbox: &BoundingBox, spec: &LevelSpec) {
        mapper::locate(&self.point, bbox, spec, &mut self.cell, &mut self.offset);
    }

    /// Builds the value stencil for the currently loaded point.
    #[inline]
    fn build_stencil(&mut self, bbox: &BoundingBox, spec: &LevelSpec, strides: &[usize]) {
        self.locate(bbox, spec);
        for (factor, t) in self.factors.iter_mut().zip(self.offset.iter()) {
            *factor = basis::weights(*t);
        }
        self.stencil.build(&self.cell, &self.factors, strides);
    }
}

/// Running numerator / denominator sums of a lattice fit.
enum Accumulator {
    Dense {
        numerator: Vec<f64>,
        denominator: Vec<f64>,
    },
    Sparse(HashMap<usize, (f64, f64)>),
}

impl Accumulator {
    fn new(num_nodes: usize, dense: bool) -> Self {
        if dense {
            Accumulator::Dense {
                numerator: vec![0.0; num_nodes],
                denominator: vec![0.0; num_nodes],
            }
        } else {
            Accumulator::Sparse(HashMap::new())
        }
    }

    #[inline(always)]
    fn add(&mut self, index: usize, numerator: f64, denominator: f64) {
        match self {
            Accumulator::Dense {
                numerator: num,
                denominator: den,
            } => {
                num[index] += numerator;
                den[index] += denominator;
            }
            Accumulator::Sparse(map) => {
                let entry = map.entry(index).or_insert((0.0, 0.0));
                entry.0 += numerator;
                entry.1 += denominator;
            }
        }
    }

    /// Adds every contribution of `sample` (already loaded in `scratch`).
    #[inline]
    fn accumulate(&mut self, scratch: &LatticeScratch, residual: f64, weight: f64) {
        let sum_sq: f64 = scratch.stencil.weights().iter().map(|w| w * w).sum();

        if !(sum_sq > 0.0) || !sum_sq.is_finite() {
            return;
        }

        for (index, phi) in scratch.stencil.iter() {
            let phi_sq = phi * phi;
            let local = phi * residual / sum_sq;
            self.add(index, weight * phi_sq * local, weight * phi_sq);
        }
    }

    fn merge(self, other: Self) -> Self {
        match (self, other) {
            (
                Accumulator::Dense {
                    mut numerator,
                    mut denominator,
                },
                Accumulator::Dense {
                    numerator: other_num,
                    denominator: other_den,
                },
            ) => {
                numerator
                    .iter_mut()
                    .zip(other_num)
                    .for_each(|(a, b)| *a += b);
                denominator
                    .iter_mut()
                    .zip(other_den)
                    .for_each(|(a, b)| *a += b);
                Accumulator::Dense {
                    numerator,
                    denominator,
                }
            }
            (Accumulator::Sparse(a), Accumulator::Sparse(b)) => {
                let (mut big, small) = if a.len() >= b.len() { (a, b) } else { (b, a) };
                for (index, (num, den)) in small {
                    let entry = big.entry(index).or_insert((0.0, 0.0));
                    entry.0 += num;
                    entry.1 += den;
                }
                Accumulator::Sparse(big)
            }
            // Both sides are created by `Accumulator::new` for the same lattice.
            _ => unreachable!("accumulators of one fit share a representation"),
        }
    }

    /// Divides the accumulated sums and picks the storage for the result.
    fn finish(self, num_nodes: usize, min_fill: f64) -> (LatticeStorage, f64) {
        let touched = match &self {
            Accumulator::Dense { denominator, .. } => {
                denominator.iter().filter(|d| **d > 0.0).count()
            }
            Accumulator::Sparse(map) => map.values().filter(|(_, d)| *d > 0.0).count(),
        };
        let fill_ratio = touched as f64 / num_nodes as f64;
        let dense = fill_ratio >= min_fill;

        let storage = match self {
            Accumulator::Dense {
                numerator,
                denominator,
            } => {
                if dense {
                    LatticeStorage::Dense(
                        numerator
                            .iter()
                            .zip(denominator.iter())
                            .map(|(n, d)| if *d > 0.0 { n / d } else { 0.0 })
                            .collect(),
                    )
                } else {
                    LatticeStorage::Sparse(
                        denominator
                            .iter()
                            .enumerate()
                            .filter(|(_, d)| **d > 0.0)
                            .map(|(i, d)| (i, numerator[i] / d))
                            .collect(),
                    )
                }
            }
            Accumulator::Sparse(map) => {
                let values = map
                    .into_iter()
                    .filter(|(_, (_, d))| *d > 0.0)
                    .map(|(i, (n, d))| (i, n / d));
                if dense {
                    let mut out = vec![0.0; num_nodes];
                    values.for_each(|(i, v)| out[i] = v);
                    LatticeStorage::Dense(out)
                } else {
                    LatticeStorage::Sparse(values.collect())
                }
            }
        };

        (storage, fill_ratio)
    }
}

/// One level's regular grid of cubic B-spline control values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlLattice {
    spec: LevelSpec,
    strides: Vec<usize>,
    storage: LatticeStorage,
    fill_ratio: f64,
}

impl ControlLattice {
    /// Fits a lattice of resolution `spec` to weighted residuals.
    ///
    /// - `points`: sample coordinates, one row per sample.
    /// - `residuals`: value to approximate at each sample.
    /// - `weights`: optional per-sample weights (default `1`). Samples with
    ///   non-positive weight are ignored.
    /// - `min_fill`: lattices whose fill ratio is below this threshold are
    ///   stored sparsely.
    ///
    /// Samples with a non-finite residual are ignored.
    ///
    /// # Errors
    /// [`LatticeError::ShapeMismatch`] if the dimensionality of `bbox`,
    /// `spec` and `points` disagree, or if `residuals`/`weights` do not have
    /// one entry per sample.
    pub fn fit(
        bbox: &BoundingBox,
        spec: LevelSpec,
        points: MatRef<f64>,
        residuals: &[f64],
        weights: Option<&[f64]>,
        min_fill: f64,
    ) -> Result<Self, LatticeError> {
        let dims = bbox.dimensions();
        check_len("grid", dims, spec.dimensions())?;
        check_len("point columns", dims, points.ncols())?;
        check_len("residuals", points.nrows(), residuals.len())?;
        if let Some(w) = weights {
            check_len("weights", points.nrows(), w.len())?;
        }

        let num_nodes = spec.num_nodes();
        let strides = spec.strides();

        let num_samples = points.nrows();
        let num_chunks = (num_samples / FIT_MIN_CHUNK).clamp(1, rayon::current_num_threads());
        let chunk_len = num_samples.div_ceil(num_chunks).max(1);
        let dense = use_dense_accumulator(num_nodes, chunk_len, dims);

        // Partial sums are merged in chunk order so repeated fits agree bit for bit.
        let partials: Vec<Accumulator> = (0..num_chunks)
            .into_par_iter()
            .map(|chunk| {
                let mut acc = Accumulator::new(num_nodes, dense);
                let mut scratch = LatticeScratch::new(dims);
                let start = (chunk * chunk_len).min(num_samples);
                let end = (start + chunk_len).min(num_samples);

                for i in start..end {
                    let weight = weights.map_or(1.0, |w| w[i]);
                    let residual = residuals[i];

                    if weight > 0.0 && residual.is_finite() {
                        scratch.load_row(points, i);
                        scratch.build_stencil(bbox, &spec, &strides);
                        acc.accumulate(&scratch, residual, weight);
                    }
                }

                acc
            })
            .collect();

        let accumulator = partials
            .into_iter()
            .reduce(Accumulator::merge)
            .unwrap_or_else(|| Accumulator::new(num_nodes, dense));

        let (storage, fill_ratio) = accumulator.finish(num_nodes, min_fill);

        Ok(Self {
            spec,
            strides,
            storage,
            fill_ratio,
        })
    }

    /// Builds a dense lattice directly from node values in C-order.
    ///
    /// The fill ratio of such a lattice is the fraction of non-zero nodes.
    pub fn from_dense(spec: LevelSpec, values: Vec<f64>) -> Result<Self, LatticeError> {
        check_len("lattice values", spec.num_nodes(), values.len())?;

        let nonzero = values.iter().filter(|v| **v != 0.0).count();
        let fill_ratio = nonzero as f64 / values.len() as f64;

        Ok(Self {
            strides: spec.strides(),
            spec,
            storage: LatticeStorage::Dense(values),
            fill_ratio,
        })
    }

    /// Evaluates the lattice at `point`.
    ///
    /// # Panics
    /// If `point` does not have one coordinate per lattice dimension.
    pub fn apply(&self, bbox: &BoundingBox, point: &[f64]) -> f64 {
        let mut scratch = LatticeScratch::new(self.spec.dimensions());
        self.apply_with(bbox, point, &mut scratch)
    }

    /// Evaluates the lattice at `point` reusing `scratch`.
    ///
    /// # Panics
    /// If `point` or `scratch` do not match the lattice dimensionality.
    #[inline]
    pub fn apply_with(&self, bbox: &BoundingBox, point: &[f64], scratch: &mut LatticeScratch) -> f64 {
        scratch.load_point(point);
        scratch.build_stencil(bbox, &self.spec, &self.strides);

        scratch
            .stencil
            .iter()
            .map(|(index, weight)| weight * self.storage.value(index))
            .sum()
    }

    /// Adds the gradient of the lattice at `point` to `gradient`.
    ///
    /// # Panics
    /// If `point`, `gradient` or `scratch` do not match the lattice dimensionality.
    pub fn add_gradient_with(
        &self,
        bbox: &BoundingBox,
        point: &[f64],
        scratch: &mut LatticeScratch,
        gradient: &mut [f64],
    ) {
        let dims = self.spec.dimensions();
        scratch.load_point(point);
        scratch.locate(bbox, &self.spec);

        for g in 0..dims {
            for d in 0..dims {
                let t = scratch.offset[d];
                scratch.factors[d] = if d == g {
                    let scale = mapper::cell_scale(bbox, &self.spec, d);
                    basis::derivatives(t).map(|v| v * scale)
                } else {
                    basis::weights(t)
                };
            }

            scratch
                .stencil
                .build(&scratch.cell, &scratch.factors, &self.strides);

            gradient[g] += scratch
                .stencil
                .iter()
                .map(|(index, weight)| weight * self.storage.value(index))
                .sum::<f64>();
        }
    }

    /// Returns the lattice one level finer (twice the cells per dimension)
    /// that represents exactly the same function, everywhere including the
    /// extrapolated region outside the bounding box.
    ///
    /// Uses cubic B-spline subdivision: along each axis, fine nodes coinciding
    /// with coarse nodes take `(c[j-1] + 6c[j] + c[j+1]) / 8` and fine nodes
    /// between two coarse nodes take `(c[j] + c[j+1]) / 2`.
    ///
    /// # Errors
    /// [`LatticeError::TooManyNodes`] if the finer lattice cannot be indexed
    /// or stored densely.
    pub fn refine(&self) -> Result<Self, LatticeError> {
        let spec = self.spec.refined()?;
        spec.dense_len()?;

        let mut shape = self.spec.lattice_shape();
        let mut values = self.to_dense();

        for axis in 0..shape.len() {
            values = subdivide_axis(&values, &mut shape, axis);
        }

        let nonzero = values.iter().filter(|v| **v != 0.0).count();

        Ok(Self {
            strides: spec.strides(),
            fill_ratio: nonzero as f64 / values.len() as f64,
            spec,
            storage: LatticeStorage::Dense(values),
        })
    }

    /// Refines this lattice until it reaches the resolution of `target`.
    ///
    /// # Errors
    /// [`LatticeError::IncompatibleLattices`] if `target` is not reachable by
    /// repeated doubling of this lattice's resolution.
    pub fn refine_to(&self, target: &LevelSpec) -> Result<Self, LatticeError> {
        let incompatible = || LatticeError::IncompatibleLattices {
            coarse: self.spec.resolution().to_vec(),
            fine: target.resolution().to_vec(),
        };

        if target.dimensions() != self.spec.dimensions() {
            return Err(incompatible());
        }

        let mut current = self.clone();
        while current.spec != *target {
            let can_refine = current
                .spec
                .resolution()
                .iter()
                .zip(target.resolution())
                .all(|(c, t)| c.checked_mul(2).is_some_and(|c2| c2 <= *t));

            if !can_refine {
                return Err(incompatible());
            }
            current = current.refine()?;
        }

        Ok(current)
    }

    /// Returns a dense lattice at the resolution of `finer` that evaluates to
    /// the sum of `self` and `finer`.
    ///
    /// # Errors
    /// - [`LatticeError::IncompatibleLattices`] as for [`ControlLattice::refine_to`].
    /// - [`LatticeError::TooManyNodes`] if `finer` is too large to store densely.
    pub fn merged_with(&self, finer: &ControlLattice) -> Result<Self, LatticeError> {
        finer.spec.dense_len()?;
        let refined = self.refine_to(&finer.spec)?;
        let mut values = refined.to_dense();

        match &finer.storage {
            LatticeStorage::Dense(fine) => {
                values.iter_mut().zip(fine.iter()).for_each(|(a, b)| *a += b);
            }
            LatticeStorage::Sparse(fine) => {
                fine.iter().for_each(|(i, v)| values[*i] += v);
            }
        }

        Self::from_dense(finer.spec.clone(), values)
    }

    /// All node values in C-order, zero-filling nodes absent from sparse storage.
    ///
    /// # Panics
    /// If a sparse lattice has more nodes than a `Vec<f64>` can hold.
    pub fn to_dense(&self) -> Vec<f64> {
        match &self.storage {
            LatticeStorage::Dense(values) => values.clone(),
            LatticeStorage::Sparse(values) => {
                let mut out = vec![0.0; self.spec.num_nodes()];
                values.iter().for_each(|(i, v)| out[*i] = *v);
                out
            }
        }
    }

    /// Checks the internal consistency of a lattice, e.g. after deserialization.
    pub fn validate(&self) -> Result<(), LatticeError> {
        let spec = LevelSpec::new(self.spec.resolution().to_vec())?;
        check_len("lattice strides", spec.dimensions(), self.strides.len())?;

        let expected_strides = spec.strides();
        if expected_strides != self.strides {
            return Err(LatticeError::ShapeMismatch {
                name: "lattice strides",
                expected: expected_strides[0],
                found: self.strides[0],
            });
        }

        let num_nodes = spec.num_nodes();
        match &self.storage {
            LatticeStorage::Dense(values) => check_len("lattice values", num_nodes, values.len()),
            LatticeStorage::Sparse(values) => match values.keys().find(|i| **i >= num_nodes) {
                Some(i) => Err(LatticeError::ShapeMismatch {
                    name: "sparse lattice index",
                    expected: num_nodes,
                    found: *i,
                }),
                None => Ok(()),
            },
        }
    }

    /// The lattice resolution.
    #[inline]
    pub fn spec(&self) -> &LevelSpec {
        &self.spec
    }

    /// Fraction of control nodes that received at least one contribution.
    #[inline]
    pub fn fill_ratio(&self) -> f64 {
        self.fill_ratio
    }

    #[inline]
    pub fn is_sparse(&self) -> bool {
        matches!(self.storage, LatticeStorage::Sparse(_))
    }

    #[inline]
    pub fn storage(&self) -> &LatticeStorage {
        &self.storage
    }

    /// Total number of control nodes, stored or not.
    #[inline]
    pub fn num_nodes(&self) -> usize {
        self.spec.num_nodes()
    }

    /// Number of node values physically stored.
    pub fn stored_nodes(&self) -> usize {
        match &self.storage {
            LatticeStorage::Dense(values) => values.len(),
            LatticeStorage::Sparse(values) => values.len(),
        }
    }

    /// Value of the node at a flattened C-order index.
    #[inline]
    pub fn node_value(&self, index: usize) -> f64 {
        self.storage.value(index)
    }
}

#[inline]
fn check_len(name: &'static str, expected: usize, found: usize) -> Result<(), LatticeError> {
    if expected == found {
        Ok(())
    } else {
        Err(LatticeError::ShapeMismatch {
            name,
            expected,
            found,
        })
    }
}

/// Whether a fitting chunk of `chunk_len` samples should accumulate into
/// dense arrays of `num_nodes` entries.
fn use_dense_accumulator(num_nodes: usize, chunk_len: usize, dims: usize) -> bool {
    let stencil_len = u32::try_from(dims)
        .ok()
        .and_then(|d| 4usize.checked_pow(d))
        .unwrap_or(usize::MAX);

    num_nodes <= DENSE_ACCUMULATOR_LIMIT && num_nodes <= chunk_len.saturating_mul(stencil_len)
}

/// Subdivides a C-order node array along `axis`, updating `shape`.
fn subdivide_axis(values: &[f64], shape: &mut [usize], axis: usize) -> Vec<f64> {
    let coarse = shape[axis];
    let fine = 2 * coarse - 3;
    let outer: usize = shape[..axis].iter().product();
    let inner: usize = shape[axis + 1..].iter().product();

    let mut out = vec![0.0; outer * fine * inner];

    for o in 0..outer {
        let src = &values[o * coarse * inner..(o + 1) * coarse * inner];
        let dst = &mut out[o * fine * inner..(o + 1) * fine * inner];

        for k in 0..fine {
            let row = &mut dst[k * inner..(k + 1) * inner];
            if k % 2 == 1 {
                let j = (k + 1) / 2;
                for (i, v) in row.iter_mut().enumerate() {
                    *v = (src[(j - 1) * inner + i]
                        + 6.0 * src[j * inner + i]
                        + src[(j + 1) * inner + i])
                        / 8.0;
                }
            } else {
                let j = k / 2;
                for (i, v) in row.iter_mut().enumerate() {
                    *v = 0.5 * (src[j * inner + i] + src[(j + 1) * inner + i]);
                }
            }
        }
    }

    shape[axis] = fine;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use faer::Mat;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn unit_box(dims: usize) -> BoundingBox {
        BoundingBox::new(vec![0.0; dims], vec![1.0; dims]).unwrap()
    }

    fn random_points(n: usize, dims: usize, seed: u64) -> Mat<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        Mat::from_fn(n, dims, |_, _| rng.random_range(0.0..1.0))
    }

    fn row(points: &Mat<f64>, i: usize) -> Vec<f64> {
        (0..points.ncols()).map(|d| points[(i, d)]).collect()
    }

    fn random_lattice(spec: LevelSpec, seed: u64) -> ControlLattice {
        let mut rng = StdRng::seed_from_u64(seed);
        let values = (0..spec.num_nodes())
            .map(|_| rng.random_range(-1.0..1.0))
            .collect();
        ControlLattice::from_dense(spec, values).unwrap()
    }

    #[test]
    fn single_sample_is_reproduced_exactly() {
        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![4, 4]).unwrap();
        let points = Mat::from_fn(1, 2, |_, j| if j == 0 { 0.37 } else { 0.61 });

        let lattice =
            ControlLattice::fit(&bbox, spec, points.as_ref(), &[2.5], None, 0.5).unwrap();

        assert!((lattice.apply(&bbox, &[0.37, 0.61]) - 2.5).abs() < 1e-12);
        assert_eq!(lattice.stored_nodes(), 16);
        assert!(lattice.is_sparse());
        assert!((lattice.fill_ratio() - 16.0 / 49.0).abs() < 1e-15);
    }

    #[test]
    fn untouched_nodes_default_to_zero() {
        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![8, 8]).unwrap();
        let points = Mat::from_fn(1, 2, |_, _| 0.05);

        let lattice =
            ControlLattice::fit(&bbox, spec, points.as_ref(), &[1.0], None, 0.5).unwrap();

        // The far corner only sees untouched nodes.
        assert_eq!(lattice.apply(&bbox, &[1.0, 1.0]), 0.0);
        assert_eq!(lattice.node_value(lattice.num_nodes() - 1), 0.0);
    }

    #[test]
    fn empty_sample_set_gives_zero_lattice() {
        let bbox = unit_box(3);
        let spec = LevelSpec::new(vec![2, 2, 2]).unwrap();
        let points = Mat::<f64>::zeros(0, 3);

        let lattice = ControlLattice::fit(&bbox, spec, points.as_ref(), &[], None, 0.5).unwrap();

        assert_eq!(lattice.fill_ratio(), 0.0);
        assert_eq!(lattice.apply(&bbox, &[0.5, 0.5, 0.5]), 0.0);
    }

    #[test]
    fn fit_rejects_mismatched_inputs() {
        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![4, 4]).unwrap();
        let points = random_points(5, 2, 1);

        let err = ControlLattice::fit(&bbox, spec.clone(), points.as_ref(), &[0.0; 4], None, 0.5)
            .unwrap_err();
        assert!(matches!(err, LatticeError::ShapeMismatch { name: "residuals", .. }));

        let err = ControlLattice::fit(
            &bbox,
            spec.clone(),
            points.as_ref(),
            &[0.0; 5],
            Some(&[1.0; 3]),
            0.5,
        )
        .unwrap_err();
        assert!(matches!(err, LatticeError::ShapeMismatch { name: "weights", .. }));

        let points_3d = random_points(5, 3, 1);
        assert!(ControlLattice::fit(&bbox, spec, points_3d.as_ref(), &[0.0; 5], None, 0.5).is_err());
    }

    #[test]
    fn zero_weight_samples_are_ignored() {
        let bbox = unit_box(1);
        let spec = LevelSpec::new(vec![4]).unwrap();
        let points = Mat::from_fn(2, 1, |i, _| if i == 0 { 0.3 } else { 0.32 });

        let weighted = ControlLattice::fit(
            &bbox,
            spec.clone(),
            points.as_ref(),
            &[1.0, 100.0],
            Some(&[1.0, 0.0]),
            0.5,
        )
        .unwrap();

        assert!((weighted.apply(&bbox, &[0.3]) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn fit_is_linear_in_the_residuals() {
        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![3, 5]).unwrap();
        let points = random_points(500, 2, 3);
        let residuals: Vec<f64> = (0..500).map(|i| (i as f64 * 0.1).cos()).collect();
        let doubled: Vec<f64> = residuals.iter().map(|r| 2.0 * r).collect();

        let a = ControlLattice::fit(&bbox, spec.clone(), points.as_ref(), &residuals, None, 0.5)
            .unwrap();
        let b = ControlLattice::fit(&bbox, spec, points.as_ref(), &doubled, None, 0.5).unwrap();

        assert!(!a.is_sparse());
        for i in 0..points.nrows() {
            let p = row(&points, i);
            assert!((2.0 * a.apply(&bbox, &p) - b.apply(&bbox, &p)).abs() < 1e-10);
        }
    }

    #[test]
    fn dense_and_sparse_storage_evaluate_identically() {
        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![16, 16]).unwrap();
        let points = random_points(40, 2, 11);
        let residuals: Vec<f64> = (0..40).map(|i| (i as f64 * 0.37).sin()).collect();

        let dense =
            ControlLattice::fit(&bbox, spec.clone(), points.as_ref(), &residuals, None, 0.0)
                .unwrap();
        let sparse =
            ControlLattice::fit(&bbox, spec, points.as_ref(), &residuals, None, 1.5).unwrap();

        assert!(!dense.is_sparse());
        assert!(sparse.is_sparse());
        assert_eq!(dense.fill_ratio(), sparse.fill_ratio());
        assert_eq!(dense.to_dense(), sparse.to_dense());

        let targets = random_points(50, 2, 12);
        for i in 0..targets.nrows() {
            let p = row(&targets, i);
            assert_eq!(dense.apply(&bbox, &p), sparse.apply(&bbox, &p));
        }
    }

    #[test]
    fn multi_chunk_fit_matches_single_chunk_fit() {
        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![16, 16]).unwrap();
        let points = random_points(5000, 2, 17);
        let residuals: Vec<f64> = (0..points.nrows())
            .map(|i| (6.0 * points[(i, 0)]).sin() * (4.0 * points[(i, 1)]).cos())
            .collect();

        let fit_on = |threads: usize| {
            rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .unwrap()
                .install(|| {
                    ControlLattice::fit(&bbox, spec.clone(), points.as_ref(), &residuals, None, 0.5)
                        .unwrap()
                })
        };

        let single = fit_on(1);
        let multi = fit_on(4);

        assert_eq!(multi, fit_on(4));
        assert!(!multi.is_sparse());
        assert_eq!(single.fill_ratio(), multi.fill_ratio());
        for (a, b) in single.to_dense().iter().zip(multi.to_dense()) {
            assert!((a - b).abs() <= 1e-12 * (1.0 + a.abs()), "{a} vs {b}");
        }
    }

    #[test]
    fn accumulator_representation_follows_chunk_work() {
        // A [4, 4] lattice has 49 nodes and a 2D stencil touches 16.
        assert!(use_dense_accumulator(49, 4, 2));
        assert!(!use_dense_accumulator(49, 3, 2));
        assert!(!use_dense_accumulator(DENSE_ACCUMULATOR_LIMIT + 1, usize::MAX, 2));
        assert!(use_dense_accumulator(10, 1, 64));

        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![64, 64]).unwrap();
        let points = random_points(6, 2, 5);
        let residuals = [1.0, -1.0, 0.5, 2.0, 0.0, 3.0];

        let lattice =
            ControlLattice::fit(&bbox, spec, points.as_ref(), &residuals, None, 0.5).unwrap();

        assert!(lattice.is_sparse());
        for i in 0..points.nrows() {
            let p = row(&points, i);
            assert!(lattice.apply(&bbox, &p).is_finite());
        }
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn oversized_lattices_report_errors() {
        let bbox = unit_box(2);
        let points = Mat::from_fn(1, 2, |_, _| 0.5);

        let huge = LevelSpec::new(vec![1 << 31, 1 << 31]).unwrap();
        let lattice =
            ControlLattice::fit(&bbox, huge, points.as_ref(), &[1.0], None, 0.5).unwrap();
        assert!(lattice.is_sparse());
        assert!((lattice.apply(&bbox, &[0.5, 0.5]) - 1.0).abs() < 1e-12);
        assert!(matches!(
            lattice.refine(),
            Err(LatticeError::TooManyNodes { .. })
        ));

        let fine = LevelSpec::new(vec![1 << 30, 1 << 30]).unwrap();
        let fine = ControlLattice::fit(&bbox, fine, points.as_ref(), &[1.0], None, 0.5).unwrap();
        let coarse = random_lattice(LevelSpec::new(vec![1, 1]).unwrap(), 2);
        assert!(matches!(
            coarse.merged_with(&fine),
            Err(LatticeError::TooManyNodes { .. })
        ));
    }

    #[test]
    fn apply_is_deterministic_at_upper_corner() {
        let bbox = unit_box(3);
        let lattice = random_lattice(LevelSpec::new(vec![2, 3, 4]).unwrap(), 5);

        let a = lattice.apply(&bbox, &[1.0, 1.0, 1.0]);
        let b = lattice.apply(&bbox, &[1.0, 1.0, 1.0]);

        assert!(a.is_finite());
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn refinement_preserves_the_function() {
        let mut rng = StdRng::seed_from_u64(21);

        for dims in 1..=3usize {
            let bbox = BoundingBox::new(vec![-1.0; dims], vec![2.0; dims]).unwrap();
            let spec = LevelSpec::new((1..=dims).map(|d| d + 1).collect()).unwrap();
            let coarse = random_lattice(spec, dims as u64);
            let fine = coarse.refine().unwrap();

            assert_eq!(
                fine.spec().resolution(),
                coarse.spec().refined().unwrap().resolution()
            );

            for _ in 0..50 {
                // Includes points outside the box to check extrapolation.
                let p: Vec<f64> = (0..dims).map(|_| rng.random_range(-1.5..2.5)).collect();
                let a = coarse.apply(&bbox, &p);
                let b = fine.apply(&bbox, &p);
                assert!((a - b).abs() < 1e-10, "dims = {dims}, p = {p:?}: {a} vs {b}");
            }
        }
    }

    #[test]
    fn merged_lattice_evaluates_to_sum() {
        let bbox = unit_box(2);
        let coarse = random_lattice(LevelSpec::new(vec![2, 3]).unwrap(), 8);
        let fine = random_lattice(LevelSpec::new(vec![8, 12]).unwrap(), 9);

        let merged = coarse.merged_with(&fine).unwrap();
        let targets = random_points(30, 2, 10);

        for i in 0..targets.nrows() {
            let p = row(&targets, i);
            let expected = coarse.apply(&bbox, &p) + fine.apply(&bbox, &p);
            assert!((merged.apply(&bbox, &p) - expected).abs() < 1e-10);
        }
    }

    #[test]
    fn refine_to_rejects_unreachable_resolution() {
        let coarse = random_lattice(LevelSpec::new(vec![3, 3]).unwrap(), 1);
        let target = LevelSpec::new(vec![8, 8]).unwrap();

        assert!(matches!(
            coarse.refine_to(&target),
            Err(LatticeError::IncompatibleLattices { .. })
        ));
    }

    #[test]
    fn gradient_matches_finite_differences() {
        let bbox = BoundingBox::new(vec![0.0, -2.0], vec![3.0, 2.0]).unwrap();
        let lattice = random_lattice(LevelSpec::new(vec![5, 4]).unwrap(), 33);
        let mut scratch = LatticeScratch::new(2);
        let h = 1e-6;

        for p in [[0.4, -1.3], [2.9, 1.7], [1.5, 0.0], [3.2, -2.1]] {
            let mut gradient = [0.0; 2];
            lattice.add_gradient_with(&bbox, &p, &mut scratch, &mut gradient);

            for d in 0..2 {
                let mut plus = p;
                let mut minus = p;
                plus[d] += h;
                minus[d] -= h;
                let fd = (lattice.apply(&bbox, &plus) - lattice.apply(&bbox, &minus)) / (2.0 * h);
                assert!((gradient[d] - fd).abs() < 1e-5, "p = {p:?}, d = {d}");
            }
        }
    }

    #[test]
    fn serde_round_trip_keeps_sparse_storage() {
        let bbox = unit_box(2);
        let spec = LevelSpec::new(vec![8, 8]).unwrap();
        let points = random_points(3, 2, 4);

        let lattice =
            ControlLattice::fit(&bbox, spec, points.as_ref(), &[1.0, -2.0, 0.5], None, 0.5)
                .unwrap();
        let json = serde_json::to_string(&lattice).unwrap();
        let restored: ControlLattice = serde_json::from_str(&json).unwrap();

        assert!(restored.validate().is_ok());
        assert_eq!(restored, lattice);
    }

    #[test]
    fn validate_detects_corrupt_storage() {
        let mut lattice = random_lattice(LevelSpec::new(vec![2, 2]).unwrap(), 3);
        lattice.storage = LatticeStorage::Dense(vec![0.0; 3]);
        assert!(lattice.validate().is_err());

        lattice.storage = LatticeStorage::Sparse(HashMap::from([(1000, 1.0)]));
        assert!(lattice.validate().is_err());
    }
}
