use crate::config::{DisturbanceClass, DisturbanceSchedule, LandscapeConfig, SpeciesConfig};
use anyhow::Result;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::{Bernoulli, Uniform};
use serde::{Deserialize, Serialize};

/// An age-tracked group of trees of one species at one site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cohort {
    /// Species ordinal in the configured species list.
    pub species: usize,
    pub age: u32,
}

/// A disturbance that hit a site, with its severity where the kind has one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Disturbance {
    Harvest,
    Fire(u8),
    Wind(u8),
    BiologicalAgent(u8),
    BiomassInsect,
}

impl Disturbance {
    pub fn class(&self) -> DisturbanceClass {
        match self {
            Disturbance::Harvest => DisturbanceClass::Harvest,
            Disturbance::Fire(_) => DisturbanceClass::Fire,
            Disturbance::Wind(_) => DisturbanceClass::Wind,
            Disturbance::BiologicalAgent(_) => DisturbanceClass::BiologicalAgent,
            Disturbance::BiomassInsect => DisturbanceClass::BiomassInsect,
        }
    }

    pub fn severity(&self) -> Option<u8> {
        match self {
            Disturbance::Fire(sev) | Disturbance::Wind(sev) | Disturbance::BiologicalAgent(sev) => {
                Some(*sev)
            }
            Disturbance::Harvest | Disturbance::BiomassInsect => None,
        }
    }
}

/// A dated disturbance event in a site's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisturbanceEvent {
    pub disturbance: Disturbance,
    pub year: u32,
}

/// Mutable state of one active cell: its ecoregion, its tree cohorts, and
/// its recent disturbance history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub ecoregion: usize,
    pub cohorts: Vec<Cohort>,
    pub events: Vec<DisturbanceEvent>,
}

impl Site {
    /// Oldest cohort age of a species at this site, or 0 if absent.
    pub fn oldest_age(&self, species: usize) -> u32 {
        self.cohorts
            .iter()
            .filter(|cohort| cohort.species == species)
            .map(|cohort| cohort.age)
            .max()
            .unwrap_or(0)
    }

    /// Remove every cohort the predicate condemns and return the removed
    /// cohorts so the caller can tally them.
    pub fn mark_and_sweep(&mut self, mut condemn: impl FnMut(&Cohort) -> bool) -> Vec<Cohort> {
        let mut killed = Vec::new();
        self.cohorts.retain(|cohort| {
            if condemn(cohort) {
                killed.push(*cohort);
                false
            } else {
                true
            }
        });
        killed
    }
}

/// The raster landscape: a row-major grid of optionally active sites.
///
/// Inactive cells carry no state and never participate in the simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landscape {
    rows: usize,
    cols: usize,
    cell_length: f64,
    sites: Vec<Option<Site>>,
}

impl Landscape {
    /// Generate a synthetic landscape from the configured activity fraction,
    /// ecoregion count, and per-species presence probabilities.
    pub fn generate(cfg: &LandscapeConfig, species: &[SpeciesConfig]) -> Result<Self> {
        let mut rng = ChaCha12Rng::seed_from_u64(cfg.seed);

        let active_dist = Bernoulli::new(cfg.active_fraction)?;
        let eco_dist = Uniform::new(0, cfg.n_ecoregions)?;
        let n_cohorts_dist = Uniform::new_inclusive(1, 3)?;

        let mut presence_dists = Vec::with_capacity(species.len());
        let mut age_dists = Vec::with_capacity(species.len());
        for spc in species {
            presence_dists.push(Bernoulli::new(spc.presence)?);
            age_dists.push(Uniform::new_inclusive(1, spc.max_init_age)?);
        }

        let n_cells = cfg.rows * cfg.cols;
        let mut sites = Vec::with_capacity(n_cells);
        for _ in 0..n_cells {
            if !active_dist.sample(&mut rng) {
                sites.push(None);
                continue;
            }

            let mut cohorts = Vec::new();
            for (i_spc, _) in species.iter().enumerate() {
                if !presence_dists[i_spc].sample(&mut rng) {
                    continue;
                }
                for _ in 0..n_cohorts_dist.sample(&mut rng) {
                    cohorts.push(Cohort {
                        species: i_spc,
                        age: age_dists[i_spc].sample(&mut rng),
                    });
                }
            }

            sites.push(Some(Site {
                ecoregion: eco_dist.sample(&mut rng),
                cohorts,
                events: Vec::new(),
            }));
        }

        Ok(Self {
            rows: cfg.rows,
            cols: cfg.cols,
            cell_length: cfg.cell_length,
            sites,
        })
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn n_cells(&self) -> usize {
        self.sites.len()
    }

    pub fn cell_length(&self) -> f64 {
        self.cell_length
    }

    pub fn index(&self, row: usize, col: usize) -> usize {
        row * self.cols + col
    }

    pub fn site(&self, idx: usize) -> Option<&Site> {
        self.sites[idx].as_ref()
    }

    pub fn site_mut(&mut self, idx: usize) -> Option<&mut Site> {
        self.sites[idx].as_mut()
    }

    pub fn is_active(&self, idx: usize) -> bool {
        self.sites[idx].is_some()
    }

    pub fn n_active(&self) -> usize {
        self.sites.iter().filter(|site| site.is_some()).count()
    }

    /// Advance every cohort's age by one year.
    pub fn age_cohorts(&mut self) {
        for site in self.sites.iter_mut().flatten() {
            for cohort in &mut site.cohorts {
                cohort.age += 1;
            }
        }
    }

    /// Sample background harvest/fire/wind events for one year and record
    /// them into the per-site histories.
    pub fn apply_background_disturbances(
        &mut self,
        schedule: &DisturbanceSchedule,
        year: u32,
        rng: &mut ChaCha12Rng,
    ) -> Result<()> {
        if schedule.harvest_rate == 0.0 && schedule.fire_rate == 0.0 && schedule.wind_rate == 0.0 {
            return Ok(());
        }

        let harvest_dist = Bernoulli::new(schedule.harvest_rate)?;
        let fire_dist = Bernoulli::new(schedule.fire_rate)?;
        let wind_dist = Bernoulli::new(schedule.wind_rate)?;
        let severity_dist = Uniform::new_inclusive(1u8, 5u8)?;

        for site in self.sites.iter_mut().flatten() {
            if harvest_dist.sample(rng) {
                site.events.push(DisturbanceEvent {
                    disturbance: Disturbance::Harvest,
                    year,
                });
            }
            if fire_dist.sample(rng) {
                site.events.push(DisturbanceEvent {
                    disturbance: Disturbance::Fire(severity_dist.sample(rng)),
                    year,
                });
            }
            if wind_dist.sample(rng) {
                site.events.push(DisturbanceEvent {
                    disturbance: Disturbance::Wind(severity_dist.sample(rng)),
                    year,
                });
            }
        }

        Ok(())
    }

    /// Drop disturbance events that can no longer influence any modifier.
    pub fn prune_events(&mut self, before_year: u32) {
        for site in self.sites.iter_mut().flatten() {
            site.events.retain(|event| event.year >= before_year);
        }
    }
}
