use crate::config::{AgentConfig, SpeciesConfig};
use crate::kernel::{DispersalTable, NeighborhoodKernel};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Host parameters of one species under one agent, resolved from config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostParams {
    pub host_ages: [u32; 3],
    pub host_scores: [f64; 3],
    pub vulnerable_ages: [u32; 3],
    pub mortality_probs: [f64; 3],
    pub mortality_of_interest: bool,
}

impl HostParams {
    /// Host score for an oldest-cohort age; the highest qualifying band wins.
    pub fn host_score(&self, age: u32) -> f64 {
        for band in (0..3).rev() {
            if age >= self.host_ages[band] {
                return self.host_scores[band];
            }
        }
        0.0
    }

    /// Whether a cohort of this age dies given the cell's shared draw `u`.
    ///
    /// Any vulnerability band the cohort qualifies for can kill it.
    pub fn condemns(&self, age: u32, u: f64) -> bool {
        (0..3).any(|band| age >= self.vulnerable_ages[band] && u <= self.mortality_probs[band])
    }
}

/// One epidemic agent, built once at initialization: its configuration,
/// its per-species host tables indexed by species ordinal, and its own
/// dispersal kernel (never shared between agents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Agent {
    pub cfg: AgentConfig,
    /// Host parameters by species ordinal; `None` for excluded species.
    pub hosts: Vec<Option<HostParams>>,
    /// Conifer flag by species ordinal.
    pub conifer: Vec<bool>,
    pub kernel: NeighborhoodKernel,
}

impl Agent {
    /// Build an agent from its validated configuration.
    pub fn build(cfg: &AgentConfig, species: &[SpeciesConfig], cell_length: f64) -> Result<Self> {
        let mut hosts = vec![None; species.len()];
        for host in &cfg.hosts {
            let i_spc = species
                .iter()
                .position(|spc| spc.name == host.species)
                .with_context(|| format!("unknown host species {:?}", host.species))?;
            hosts[i_spc] = Some(HostParams {
                host_ages: host.host_ages,
                host_scores: host.host_scores,
                vulnerable_ages: host.vulnerable_ages,
                mortality_probs: host.mortality_probs,
                mortality_of_interest: host.mortality_of_interest,
            });
        }

        let conifer = species.iter().map(|spc| spc.conifer).collect();

        let table = DispersalTable::estimate(
            cfg.kernel,
            cfg.shape_alpha,
            cfg.max_distance,
            cell_length,
            cfg.draw_count,
            cfg.kernel_seed,
        )
        .with_context(|| format!("failed to estimate dispersal table for {:?}", cfg.name))?;
        log::info!(
            "agent {:?}: dispersal table has {} distance classes, total mass {:.4}",
            cfg.name,
            table.len(),
            table.total_mass()
        );

        let kernel = NeighborhoodKernel::materialize(&table, cfg.max_distance, cell_length);

        Ok(Self {
            cfg: cfg.clone(),
            hosts,
            conifer,
            kernel,
        })
    }

    /// Whether the agent is active in the given simulation year.
    pub fn active_in(&self, year: u32) -> bool {
        (self.cfg.start_year..=self.cfg.end_year).contains(&year)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HostParams {
        HostParams {
            host_ages: [20, 50, 100],
            host_scores: [0.2, 0.5, 1.0],
            vulnerable_ages: [30, 60, 120],
            mortality_probs: [0.1, 0.4, 0.8],
            mortality_of_interest: false,
        }
    }

    #[test]
    fn highest_qualifying_band_wins() {
        let host = params();
        assert_eq!(host.host_score(10), 0.0);
        assert_eq!(host.host_score(20), 0.2);
        assert_eq!(host.host_score(99), 0.5);
        assert_eq!(host.host_score(100), 1.0);
    }

    #[test]
    fn any_band_can_condemn() {
        let host = params();
        // Old enough for every band: the high probability applies even when
        // the draw exceeds the low-band probability.
        assert!(host.condemns(150, 0.75));
        assert!(!host.condemns(150, 0.85));
        // Only the low band qualifies.
        assert!(host.condemns(40, 0.1));
        assert!(!host.condemns(40, 0.2));
        // Too young for any band.
        assert!(!host.condemns(10, 0.0));
    }
}
