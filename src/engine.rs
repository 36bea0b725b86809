use crate::agent::Agent;
use crate::config::Config;
use crate::epidemic::{self, CellState, InfectionStatus, StepSummary};
use crate::foi;
use crate::host;
use crate::landscape::Landscape;
use anyhow::{Context, Result, bail};
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use rand_distr::LogNormal;
use rmp_serde::{decode, encode};
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter, Write},
    path::Path,
};

/// One saved trajectory frame: the event summaries accumulated since the
/// previous save plus the per-agent status and mortality grids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Year after the last step of this frame.
    pub year: u32,
    pub summaries: Vec<StepSummary>,
    /// Discrete infection status per agent per cell (0/1/2).
    pub status: Vec<Vec<u8>>,
    /// Cohorts killed per agent per cell since the previous save.
    pub mortality: Vec<Vec<u32>>,
}

/// Simulation engine.
///
/// Holds the configuration, landscape, built agents, per-agent epidemic
/// state, and random number generators, and provides methods to
/// initialize, run, save, and load simulations.
#[derive(Serialize, Deserialize)]
pub struct Engine {
    cfg: Config,
    landscape: Landscape,
    agents: Vec<Agent>,
    /// Epidemic state per agent ordinal per cell, sized at initialization.
    states: Vec<Vec<CellState>>,
    /// Kills per agent per cell since the last save.
    mortality: Vec<Vec<u32>>,
    pending: Vec<StepSummary>,
    year: u32,
    weather_rng: ChaCha12Rng,
    disturbance_rng: ChaCha12Rng,
}

impl Engine {
    /// Create a new `Engine` with the given configuration, a generated
    /// landscape, and the configured initial infections.
    pub fn generate_initial_condition(cfg: Config) -> Result<Self> {
        let landscape = Landscape::generate(&cfg.landscape, &cfg.species)
            .context("failed to generate landscape")?;
        log::info!(
            "generated {}x{} landscape with {} active cells",
            landscape.rows(),
            landscape.cols(),
            landscape.n_active()
        );

        let mut agents = Vec::with_capacity(cfg.agents.len());
        for agent_cfg in &cfg.agents {
            let agent = Agent::build(agent_cfg, &cfg.species, landscape.cell_length())
                .with_context(|| format!("failed to build agent {:?}", agent_cfg.name))?;
            agents.push(agent);
        }

        let n_cells = landscape.n_cells();
        let mut states = Vec::with_capacity(agents.len());
        for agent in &agents {
            let mut cells = vec![CellState::susceptible(); n_cells];
            seed_infections(&mut cells, &landscape, agent)?;
            states.push(cells);
        }

        let mortality = vec![vec![0u32; n_cells]; agents.len()];

        let mut weather_rng = ChaCha12Rng::seed_from_u64(cfg.landscape.seed);
        weather_rng.set_stream(1);
        let mut disturbance_rng = ChaCha12Rng::seed_from_u64(cfg.disturbances.seed);
        disturbance_rng.set_stream(2);

        Ok(Self {
            cfg,
            landscape,
            agents,
            states,
            mortality,
            pending: Vec::new(),
            year: 0,
            weather_rng,
            disturbance_rng,
        })
    }

    pub fn cfg(&self) -> &Config {
        &self.cfg
    }

    pub fn year(&self) -> u32 {
        self.year
    }

    /// Perform the simulation and save the resulting frames to a binary file.
    pub fn perform_simulation<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let saves_per_file = self.cfg.output.saves_per_file;
        for i_save in 0..saves_per_file {
            for _ in 0..self.cfg.output.steps_per_save {
                self.perform_step().context("failed to perform step")?;
            }

            let frame = self.take_frame();
            encode::write(&mut writer, &frame).context("failed to serialize frame")?;

            let progress = 100.0 * (i_save + 1) as f64 / saves_per_file as f64;
            log::info!("completed {progress:06.2}%");
        }

        writer.flush().context("failed to flush writer stream")?;

        Ok(())
    }

    /// Save a checkpoint of the entire engine state.
    ///
    /// Can be used to resume the simulation later.
    pub fn save_checkpoint<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);
        encode::write(&mut writer, &self).context("failed to serialize engine")?;
        Ok(())
    }

    /// Load a previously saved engine checkpoint.
    pub fn load_checkpoint<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);
        let engine = decode::from_read(&mut reader).context("failed to deserialize engine")?;
        Ok(engine)
    }

    /// Advance the whole landscape by one annual step.
    pub fn perform_step(&mut self) -> Result<()> {
        let year = self.year;

        self.landscape.age_cohorts();
        self.landscape
            .apply_background_disturbances(&self.cfg.disturbances, year, &mut self.disturbance_rng)
            .context("failed to generate background disturbances")?;

        for i_agent in 0..self.agents.len() {
            if !self.agents[i_agent].active_in(year) {
                continue;
            }

            // Latest epidemic event per cell across every agent, for the
            // prior-event host index modifier.
            let prior_years = self.prior_epidemic_years();

            let agent = &self.agents[i_agent];
            let shim = host::compute_shim_grid(&self.landscape, agent, &prior_years, year);

            let beta = agent.cfg.transmission_rate
                * weather_index(
                    agent.cfg.weather_mean,
                    agent.cfg.weather_std_dev,
                    &mut self.weather_rng,
                )?;

            let pressure = infection_pressure(&self.states[i_agent]);
            let foi = foi::compute_foi(
                self.landscape.rows(),
                self.landscape.cols(),
                &shim,
                &pressure,
                &agent.kernel,
                beta,
            );

            let summary = epidemic::advance(
                &mut self.states[i_agent],
                &mut self.landscape,
                agent,
                &foi,
                &mut self.mortality[i_agent],
                year,
            );
            log::debug!(
                "year {year}, agent {:?}: {} new infected, {} diseased, {} cohorts killed",
                summary.agent,
                summary.new_infected,
                summary.diseased,
                summary.cohorts_killed
            );
            self.pending.push(summary);
        }

        let horizon = self
            .cfg
            .agents
            .iter()
            .flat_map(|agent| agent.disturbance_modifiers.iter())
            .map(|dm| dm.duration)
            .max()
            .unwrap_or(0);
        self.landscape.prune_events(year.saturating_sub(horizon));

        self.year += 1;

        Ok(())
    }

    /// Collect the accumulated summaries and grids into a frame and reset
    /// the per-save accumulators.
    fn take_frame(&mut self) -> Frame {
        let status = self
            .states
            .iter()
            .map(|cells| cells.iter().map(|cell| cell.status.as_u8()).collect())
            .collect();

        let mortality = self.mortality.clone();
        for grid in &mut self.mortality {
            grid.fill(0);
        }

        Frame {
            year: self.year,
            summaries: std::mem::take(&mut self.pending),
            status,
            mortality,
        }
    }

    fn prior_epidemic_years(&self) -> Vec<Option<u32>> {
        let n_cells = self.landscape.n_cells();
        let mut years = vec![None; n_cells];
        for cells in &self.states {
            for (idx, cell) in cells.iter().enumerate() {
                if let Some(event_year) = cell.last_event {
                    years[idx] = Some(years[idx].map_or(event_year, |y: u32| y.max(event_year)));
                }
            }
        }
        years
    }
}

/// Dense `P_I + P_D` source grid, zero wherever the discrete status is not
/// infectious.
fn infection_pressure(cells: &[CellState]) -> Vec<f64> {
    cells
        .iter()
        .map(|cell| match cell.status {
            InfectionStatus::Infected | InfectionStatus::Diseased => cell.p_i + cell.p_d,
            InfectionStatus::Susceptible => 0.0,
        })
        .collect()
}

/// Annual weather index, normalized by its baseline so 1.0 is typical.
fn weather_index(mean: f64, std_dev: f64, rng: &mut ChaCha12Rng) -> Result<f64> {
    if std_dev == 0.0 {
        return Ok(1.0);
    }
    let dist = LogNormal::new(mean.ln(), std_dev)?;
    Ok(dist.sample(rng) / mean)
}

fn seed_infections(
    cells: &mut [CellState],
    landscape: &Landscape,
    agent: &Agent,
) -> Result<()> {
    for &[row, col] in &agent.cfg.init_sites {
        let idx = landscape.index(row, col);
        if !landscape.is_active(idx) {
            bail!(
                "initial infection site ({row}, {col}) of agent {:?} is inactive",
                agent.cfg.name
            );
        }
        cells[idx] = CellState::infected();
    }

    if agent.cfg.init_infected > 0 {
        let active: Vec<usize> = (0..cells.len())
            .filter(|&idx| landscape.is_active(idx))
            .collect();
        if active.len() < agent.cfg.init_infected {
            bail!(
                "agent {:?} requests {} initial infections but only {} cells are active",
                agent.cfg.name,
                agent.cfg.init_infected,
                active.len()
            );
        }
        let mut rng = ChaCha12Rng::seed_from_u64(agent.cfg.seed);
        rng.set_stream(3);
        for &idx in active.choose_multiple(&mut rng, agent.cfg.init_infected) {
            cells[idx] = CellState::infected();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        AgentConfig, HostConfig, HostIndexMode, KernelFamily, LandscapeConfig, OutputConfig,
        SpeciesConfig,
    };

    fn test_config() -> Config {
        Config {
            landscape: LandscapeConfig {
                rows: 8,
                cols: 8,
                cell_length: 30.0,
                active_fraction: 1.0,
                n_ecoregions: 1,
                seed: 5,
            },
            output: OutputConfig {
                steps_per_save: 1,
                saves_per_file: 4,
            },
            disturbances: Default::default(),
            species: vec![SpeciesConfig {
                name: "fagugran".into(),
                conifer: false,
                presence: 1.0,
                max_init_age: 150,
            }],
            agents: vec![AgentConfig {
                name: "bark-disease".into(),
                start_year: 0,
                end_year: 100,
                host_index_mode: HostIndexMode::Max,
                transmission_rate: 5.0,
                acquisition_rate: 0.5,
                kernel: KernelFamily::NegativeExponential,
                max_distance: 60.0,
                shape_alpha: 40.0,
                draw_count: 100,
                kernel_seed: 1,
                seed: 2,
                weather_mean: 1.0,
                weather_std_dev: 0.0,
                init_infected: 0,
                init_sites: vec![[4, 4]],
                ecoregion_modifiers: vec![0.0],
                disturbance_modifiers: Vec::new(),
                hosts: vec![HostConfig {
                    species: "fagugran".into(),
                    host_ages: [1, 10, 50],
                    host_scores: [0.5, 0.8, 1.0],
                    vulnerable_ages: [1, 10, 50],
                    mortality_probs: [0.2, 0.5, 0.9],
                    mortality_of_interest: true,
                }],
            }],
        }
    }

    fn n_with_status(engine: &Engine, status: InfectionStatus) -> usize {
        engine.states[0]
            .iter()
            .filter(|cell| cell.status == status)
            .count()
    }

    #[test]
    fn initial_infection_is_seeded() {
        let engine = Engine::generate_initial_condition(test_config()).unwrap();
        assert_eq!(n_with_status(&engine, InfectionStatus::Infected), 1);
        let center = engine.landscape.index(4, 4);
        assert_eq!(engine.states[0][center].p_i, 1.0);
    }

    #[test]
    fn runs_are_reproducible() {
        let mut a = Engine::generate_initial_condition(test_config()).unwrap();
        let mut b = Engine::generate_initial_condition(test_config()).unwrap();
        for _ in 0..5 {
            a.perform_step().unwrap();
            b.perform_step().unwrap();
        }
        assert_eq!(a.take_frame(), b.take_frame());
    }

    #[test]
    fn epidemic_spreads_and_statuses_never_regress() {
        let mut engine = Engine::generate_initial_condition(test_config()).unwrap();
        let mut prev: Vec<InfectionStatus> =
            engine.states[0].iter().map(|cell| cell.status).collect();

        for _ in 0..10 {
            engine.perform_step().unwrap();
            for (cell, prev_status) in engine.states[0].iter().zip(&prev) {
                assert!(cell.status >= *prev_status);
                assert!((0.0..=1.0).contains(&cell.p_s));
                assert!((0.0..=1.0).contains(&cell.p_i));
                assert!((0.0..=1.0).contains(&cell.p_d));
            }
            prev = engine.states[0].iter().map(|cell| cell.status).collect();
        }

        let infectious = n_with_status(&engine, InfectionStatus::Infected)
            + n_with_status(&engine, InfectionStatus::Diseased);
        assert!(infectious > 1, "epidemic failed to spread");
    }

    #[test]
    fn diseased_sites_record_mortality() {
        let mut engine = Engine::generate_initial_condition(test_config()).unwrap();
        for _ in 0..20 {
            engine.perform_step().unwrap();
        }
        let frame = engine.take_frame();
        let killed: usize = frame
            .summaries
            .iter()
            .map(|summary| summary.cohorts_killed)
            .sum();
        assert!(killed > 0, "no cohorts were killed in 20 steps");
        let grid_total: u32 = frame.mortality[0].iter().sum();
        assert_eq!(grid_total as usize, killed);
        // Every kill is a cohort of the flagged species.
        let of_interest: usize = frame
            .summaries
            .iter()
            .map(|summary| summary.cohorts_of_interest_killed)
            .sum();
        assert_eq!(of_interest, killed);
    }

    #[test]
    fn inactive_initial_site_is_fatal() {
        let mut cfg = test_config();
        cfg.landscape.active_fraction = 0.5;
        cfg.landscape.seed = 1;
        // Find a seed/site combination where (4, 4) is inactive.
        let landscape = Landscape::generate(&cfg.landscape, &cfg.species).unwrap();
        if landscape.is_active(landscape.index(4, 4)) {
            cfg.agents[0].init_sites = vec![
                (0..cfg.landscape.rows * cfg.landscape.cols)
                    .find(|&idx| !landscape.is_active(idx))
                    .map(|idx| [idx / cfg.landscape.cols, idx % cfg.landscape.cols])
                    .expect("half-active landscape must have an inactive cell"),
            ];
        }
        assert!(Engine::generate_initial_condition(cfg).is_err());
    }
}
