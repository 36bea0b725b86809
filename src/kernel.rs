use crate::config::KernelFamily;
use anyhow::Result;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, f64::consts::PI};

/// Dispersal probability density at distance `dist` (normalized 2-D forms).
fn density(family: KernelFamily, alpha: f64, dist: f64) -> f64 {
    match family {
        KernelFamily::PowerLaw => (alpha - 1.0) * (alpha - 2.0) / (2.0 * PI)
            * (1.0 + dist).powf(-alpha),
        KernelFamily::NegativeExponential => (-dist / alpha).exp() / (2.0 * PI * alpha * alpha),
    }
}

/// Lookup from discrete cell-to-cell distance to mean dispersal probability.
///
/// Built once per agent by Monte Carlo integration of the kernel density
/// over source and target cell areas; see [`DispersalTable::estimate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispersalTable {
    /// Sorted `(rounded distance, mean probability)` pairs.
    entries: Vec<(u64, f64)>,
    /// Total probability mass over the whole neighborhood, for diagnostics.
    total_mass: f64,
}

impl DispersalTable {
    /// Estimate the table for one agent.
    ///
    /// Only the lower sextant of offsets (`0 <= x <= R`, `x <= y <= R`) is
    /// simulated; the square grid's 8-fold symmetry covers the rest. Each
    /// offset draws `draw_count` pairs of uniform points within the source
    /// and target cell areas and averages the kernel density over them.
    ///
    /// Every offset uses its own counter-derived stream of the seeded
    /// generator, so the result is reproducible bit for bit and offsets
    /// could be estimated concurrently.
    pub fn estimate(
        family: KernelFamily,
        alpha: f64,
        max_distance: f64,
        cell_length: f64,
        draw_count: usize,
        seed: u64,
    ) -> Result<Self> {
        let radius = (max_distance / cell_length).floor() as i64;
        let cell_area = cell_length * cell_length;
        // Uniform point within a cell, centered on the cell's midpoint.
        let point_dist = Uniform::new(-cell_length / 2.0, cell_length / 2.0)?;

        let mut sums: BTreeMap<u64, (f64, u32)> = BTreeMap::new();
        let mut total_mass = 0.0;
        let mut stream = 0u64;

        for x in 0..=radius {
            for y in x..=radius {
                stream += 1;

                let offset_dist = cell_length * ((x * x + y * y) as f64).sqrt();
                if offset_dist > max_distance {
                    continue;
                }

                let mut rng = ChaCha12Rng::seed_from_u64(seed);
                rng.set_stream(stream);

                let mut density_sum = 0.0;
                for _ in 0..draw_count {
                    let src = (point_dist.sample(&mut rng), point_dist.sample(&mut rng));
                    let tgt = (
                        x as f64 * cell_length + point_dist.sample(&mut rng),
                        y as f64 * cell_length + point_dist.sample(&mut rng),
                    );
                    let dist = (tgt.0 - src.0).hypot(tgt.1 - src.1);
                    density_sum += density(family, alpha, dist);
                }

                // Integrate the density over one cell area and clamp.
                let prob = (density_sum / draw_count as f64 * cell_area).clamp(0.0, 1.0);

                let key = offset_dist.round() as u64;
                let entry = sums.entry(key).or_insert((0.0, 0));
                entry.0 += prob;
                entry.1 += 1;

                // Symmetry multiplicity: the center maps to itself, offsets
                // on an axis or diagonal to 4 cells, all others to 8.
                let multiplicity = if x == 0 && y == 0 {
                    1.0
                } else if x == 0 || x == y {
                    4.0
                } else {
                    8.0
                };
                total_mass += prob * multiplicity;
            }
        }

        let entries = sums
            .into_iter()
            .map(|(key, (sum, count))| (key, sum / count as f64))
            .collect();

        Ok(Self {
            entries,
            total_mass,
        })
    }

    /// Mean dispersal probability at the entry nearest to `dist`.
    pub fn probability_at(&self, dist: f64) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let key = dist.round() as u64;
        let idx = match self.entries.binary_search_by_key(&key, |&(k, _)| k) {
            Ok(idx) => idx,
            Err(idx) => {
                // Between two entries: take the nearer key.
                if idx == 0 {
                    0
                } else if idx == self.entries.len() {
                    self.entries.len() - 1
                } else {
                    let below = key - self.entries[idx - 1].0;
                    let above = self.entries[idx].0 - key;
                    if below <= above { idx - 1 } else { idx }
                }
            }
        };
        self.entries[idx].1
    }

    /// Total probability mass over the neighborhood (diagnostic only).
    pub fn total_mass(&self) -> f64 {
        self.total_mass
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Dense convolution weights over the `(2R+1)²` neighborhood of a cell.
///
/// Materialized from a [`DispersalTable`] so the force-of-infection loop
/// never performs a distance-to-probability lookup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NeighborhoodKernel {
    radius: usize,
    weights: Vec<f64>,
}

impl NeighborhoodKernel {
    pub fn materialize(table: &DispersalTable, max_distance: f64, cell_length: f64) -> Self {
        let radius = (max_distance / cell_length).floor() as usize;
        let side = 2 * radius + 1;
        let mut weights = vec![0.0; side * side];

        for dr in -(radius as i64)..=radius as i64 {
            for dc in -(radius as i64)..=radius as i64 {
                // A cell never disperses to itself.
                if dr == 0 && dc == 0 {
                    continue;
                }
                let dist = cell_length * ((dr * dr + dc * dc) as f64).sqrt();
                if dist > max_distance {
                    continue;
                }
                let row = (dr + radius as i64) as usize;
                let col = (dc + radius as i64) as usize;
                weights[row * side + col] = table.probability_at(dist);
            }
        }

        Self { radius, weights }
    }

    pub fn radius(&self) -> usize {
        self.radius
    }

    /// Weight of the offset `(dr, dc)`, each in `[-radius, radius]`.
    pub fn weight(&self, dr: i64, dc: i64) -> f64 {
        let side = 2 * self.radius + 1;
        let row = (dr + self.radius as i64) as usize;
        let col = (dc + self.radius as i64) as usize;
        self.weights[row * side + col]
    }
}
