use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::{fmt::Debug, fs, ops::RangeBounds, path::Path};

/// Simulation configuration.
///
/// Loaded from a TOML file and validated before use.
/// See [`Config::from_file`] for loading.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Config {
    pub landscape: LandscapeConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub disturbances: DisturbanceSchedule,
    pub species: Vec<SpeciesConfig>,
    pub agents: Vec<AgentConfig>,
}

/// Synthetic landscape parameters.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct LandscapeConfig {
    /// Number of grid rows.
    pub rows: usize,
    /// Number of grid columns.
    pub cols: usize,
    /// Physical side length of a cell, in the same units as dispersal distances.
    pub cell_length: f64,
    /// Fraction of cells that are active (simulated).
    pub active_fraction: f64,
    /// Number of ecoregions cells are assigned to.
    pub n_ecoregions: usize,
    /// Seed for landscape generation.
    pub seed: u64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Number of annual steps between trajectory saves.
    pub steps_per_save: usize,
    /// Number of saves written per trajectory file.
    pub saves_per_file: usize,
}

/// Background disturbance generation rates (per cell per year).
///
/// These stand in for the harvest/fire/wind events an external model would
/// supply; they only matter through the site host index modifiers.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisturbanceSchedule {
    pub harvest_rate: f64,
    pub fire_rate: f64,
    pub wind_rate: f64,
    pub seed: u64,
}

impl Default for DisturbanceSchedule {
    fn default() -> Self {
        Self {
            harvest_rate: 0.0,
            fire_rate: 0.0,
            wind_rate: 0.0,
            seed: 0,
        }
    }
}

/// A tree species available on the landscape.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct SpeciesConfig {
    pub name: String,
    /// Conifer cohorts are tallied separately for fuel-model consumers.
    pub conifer: bool,
    /// Probability that the species is present at an active cell.
    pub presence: f64,
    /// Upper bound on initial cohort ages.
    pub max_init_age: u32,
}

/// Dispersal kernel family of an agent.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub enum KernelFamily {
    #[serde(rename = "power-law")]
    PowerLaw,
    #[serde(rename = "negative-exponential")]
    NegativeExponential,
}

/// How per-species host scores aggregate into the site host index.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostIndexMode {
    Mean,
    Max,
}

/// Disturbance category a modifier can match against.
///
/// Matching is structural (category plus an optional severity floor), never
/// by inspecting prescription-name strings.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DisturbanceClass {
    Harvest,
    Fire,
    Wind,
    BiologicalAgent,
    BiomassInsect,
    /// A prior infection event from the epidemic engine itself.
    Epidemic,
}

/// One host species definition within an agent: susceptibility thresholds
/// for the site host index and vulnerability bands for cohort mortality.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Species name; must refer to an entry in `[[species]]`.
    pub species: String,
    /// Low/medium/high host age thresholds (ascending).
    pub host_ages: [u32; 3],
    /// Host scores paired with `host_ages`.
    pub host_scores: [f64; 3],
    /// Low/medium/high vulnerability age thresholds (ascending).
    pub vulnerable_ages: [u32; 3],
    /// Mortality probabilities paired with `vulnerable_ages`.
    pub mortality_probs: [f64; 3],
    /// Count kills of this species in the cohorts-of-interest tally.
    #[serde(default)]
    pub mortality_of_interest: bool,
}

/// One disturbance-type modifier of an agent's site host index.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct DisturbanceModifier {
    pub kind: DisturbanceClass,
    /// Only events of at least this severity match (severity-less kinds
    /// ignore it).
    pub min_severity: Option<u8>,
    /// Impact duration in years.
    pub duration: u32,
    /// Modifier magnitude at the year of the event.
    pub magnitude: f64,
}

/// Immutable definition of one epidemic agent (pathogen or pest).
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    /// First simulation year the agent is active.
    pub start_year: u32,
    /// Last simulation year the agent is active (inclusive).
    pub end_year: u32,
    pub host_index_mode: HostIndexMode,
    /// Baseline transmission rate (beta).
    pub transmission_rate: f64,
    /// Infected-to-diseased acquisition rate.
    pub acquisition_rate: f64,
    pub kernel: KernelFamily,
    /// Maximum dispersal distance, in the same units as the cell length.
    pub max_distance: f64,
    /// Kernel shape coefficient (alpha).
    pub shape_alpha: f64,
    /// Monte Carlo draws per cell offset for kernel estimation.
    pub draw_count: usize,
    /// Seed of the kernel estimation stream.
    pub kernel_seed: u64,
    /// Seed of the per-cell transition draws and the weather stream.
    pub seed: u64,
    /// Baseline of the annual weather index.
    pub weather_mean: f64,
    /// Log-scale spread of the annual weather index (0 for a constant index).
    pub weather_std_dev: f64,
    /// Number of randomly placed initial infections.
    #[serde(default)]
    pub init_infected: usize,
    /// Explicitly placed initial infections as `[row, col]` pairs.
    #[serde(default)]
    pub init_sites: Vec<[usize; 2]>,
    /// Additive site host index modifier per ecoregion.
    pub ecoregion_modifiers: Vec<f64>,
    #[serde(default)]
    pub disturbance_modifiers: Vec<DisturbanceModifier>,
    /// Host species of this agent; species not listed are excluded from the
    /// site host index and are never killed.
    pub hosts: Vec<HostConfig>,
}

impl Config {
    /// Load a [`Config`] from a TOML file.
    ///
    /// Performs validation on all parameters before returning.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read, deserialized,
    /// or if the configuration values are invalid.
    pub fn from_file<P: AsRef<Path>>(file: P) -> Result<Self> {
        let file = file.as_ref();
        let contents =
            fs::read_to_string(file).with_context(|| format!("failed to read {file:?}"))?;

        let config: Config = toml::from_str(&contents).context("failed to parse config")?;

        config.validate().context("failed to validate config")?;

        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        self.landscape
            .validate()
            .context("invalid landscape section")?;

        check_num(self.output.steps_per_save, 1..10_000)
            .context("invalid number of steps per save")?;
        check_num(self.output.saves_per_file, 1..10_000)
            .context("invalid number of saves per file")?;

        for rate in [
            self.disturbances.harvest_rate,
            self.disturbances.fire_rate,
            self.disturbances.wind_rate,
        ] {
            check_num(rate, 0.0..=1.0).context("invalid disturbance rate")?;
        }

        if self.species.is_empty() {
            bail!("at least one species must be defined");
        }
        for spc in &self.species {
            spc.validate()
                .with_context(|| format!("invalid species {:?}", spc.name))?;
        }

        if self.agents.is_empty() {
            bail!("at least one agent must be defined");
        }
        for agent in &self.agents {
            agent
                .validate(&self.landscape, &self.species)
                .with_context(|| format!("invalid agent {:?}", agent.name))?;
        }

        Ok(())
    }
}

impl LandscapeConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.rows, 1..=8192).context("invalid number of rows")?;
        check_num(self.cols, 1..=8192).context("invalid number of columns")?;
        if !self.cell_length.is_finite() || self.cell_length <= 0.0 {
            bail!("cell length must be positive, but is {}", self.cell_length);
        }
        check_num(self.active_fraction, 0.0..=1.0).context("invalid active fraction")?;
        check_num(self.n_ecoregions, 1..=256).context("invalid number of ecoregions")?;
        Ok(())
    }
}

impl SpeciesConfig {
    fn validate(&self) -> Result<()> {
        check_num(self.presence, 0.0..=1.0).context("invalid presence probability")?;
        check_num(self.max_init_age, 1..=2_000).context("invalid maximum initial age")?;
        Ok(())
    }
}

impl AgentConfig {
    fn validate(&self, landscape: &LandscapeConfig, species: &[SpeciesConfig]) -> Result<()> {
        if self.start_year > self.end_year {
            bail!(
                "start year {} is after end year {}",
                self.start_year,
                self.end_year
            );
        }

        check_num(self.transmission_rate, 0.0..=1_000.0).context("invalid transmission rate")?;
        check_num(self.acquisition_rate, 0.0..=1.0).context("invalid acquisition rate")?;

        if self.max_distance < landscape.cell_length {
            bail!(
                "maximum dispersal distance {} is below the cell length {}",
                self.max_distance,
                landscape.cell_length
            );
        }
        match self.kernel {
            KernelFamily::PowerLaw => {
                // The normalization constant requires alpha > 2.
                if !(self.shape_alpha > 2.0 && self.shape_alpha <= 100.0) {
                    bail!(
                        "power-law shape coefficient must be in (2, 100], but is {}",
                        self.shape_alpha
                    );
                }
            }
            KernelFamily::NegativeExponential => {
                if !(self.shape_alpha > 0.0 && self.shape_alpha.is_finite()) {
                    bail!(
                        "negative-exponential shape coefficient must be positive, but is {}",
                        self.shape_alpha
                    );
                }
            }
        }
        check_num(self.draw_count, 1..=10_000_000).context("invalid draw count")?;

        if !(self.weather_mean > 0.0 && self.weather_mean.is_finite()) {
            bail!("weather mean must be positive, but is {}", self.weather_mean);
        }
        check_num(self.weather_std_dev, 0.0..=10.0).context("invalid weather spread")?;

        for &[row, col] in &self.init_sites {
            if row >= landscape.rows || col >= landscape.cols {
                bail!(
                    "initial infection site ({row}, {col}) is outside the {}x{} landscape",
                    landscape.rows,
                    landscape.cols
                );
            }
        }

        let n_eco = self.ecoregion_modifiers.len();
        if n_eco != landscape.n_ecoregions {
            bail!(
                "expected {} ecoregion modifiers, found {n_eco}",
                landscape.n_ecoregions
            );
        }
        for &modifier in &self.ecoregion_modifiers {
            check_num(modifier, -10.0..=10.0).context("invalid ecoregion modifier")?;
        }

        for dm in &self.disturbance_modifiers {
            check_num(dm.magnitude, -1.0..=1.0).context("invalid disturbance magnitude")?;
            check_num(dm.duration, 1..=1_000).context("invalid disturbance duration")?;
            if let Some(severity) = dm.min_severity {
                check_num(severity, 1..=5).context("invalid disturbance severity floor")?;
            }
        }

        if self.hosts.is_empty() {
            bail!("at least one host species must be defined");
        }
        for host in &self.hosts {
            host.validate()
                .with_context(|| format!("invalid host {:?}", host.species))?;
            if !species.iter().any(|spc| spc.name == host.species) {
                bail!("host refers to unknown species {:?}", host.species);
            }
        }

        Ok(())
    }
}

impl HostConfig {
    fn validate(&self) -> Result<()> {
        check_ascending(&self.host_ages).context("host age thresholds must ascend")?;
        check_ascending(&self.vulnerable_ages).context("vulnerability thresholds must ascend")?;
        for &score in &self.host_scores {
            check_num(score, 0.0..=1.0).context("invalid host score")?;
        }
        for &prob in &self.mortality_probs {
            check_num(prob, 0.0..=1.0).context("invalid mortality probability")?;
        }
        Ok(())
    }
}

fn check_num<T, R>(num: T, range: R) -> Result<()>
where
    T: PartialOrd + Debug,
    R: RangeBounds<T> + Debug,
{
    if !range.contains(&num) {
        bail!("number must be in the range {range:?}, but is {num:?}");
    }
    Ok(())
}

fn check_ascending(vals: &[u32; 3]) -> Result<()> {
    if vals[0] > vals[1] || vals[1] > vals[2] {
        bail!("thresholds must be ascending, but are {vals:?}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_toml() -> String {
        String::new()
            + "[landscape]\n"
            + "rows = 8\n"
            + "cols = 8\n"
            + "cell_length = 30.0\n"
            + "active_fraction = 1.0\n"
            + "n_ecoregions = 1\n"
            + "seed = 1\n"
            + "\n"
            + "[output]\n"
            + "steps_per_save = 1\n"
            + "saves_per_file = 4\n"
            + "\n"
            + "[[species]]\n"
            + "name = \"fagugran\"\n"
            + "conifer = false\n"
            + "presence = 1.0\n"
            + "max_init_age = 150\n"
            + "\n"
            + "[[agents]]\n"
            + "name = \"bark-disease\"\n"
            + "start_year = 0\n"
            + "end_year = 50\n"
            + "host_index_mode = \"mean\"\n"
            + "transmission_rate = 0.5\n"
            + "acquisition_rate = 0.2\n"
            + "kernel = \"power-law\"\n"
            + "max_distance = 90.0\n"
            + "shape_alpha = 2.5\n"
            + "draw_count = 100\n"
            + "kernel_seed = 1\n"
            + "seed = 2\n"
            + "weather_mean = 1.0\n"
            + "weather_std_dev = 0.0\n"
            + "init_infected = 1\n"
            + "ecoregion_modifiers = [0.0]\n"
            + "\n"
            + "[[agents.hosts]]\n"
            + "species = \"fagugran\"\n"
            + "host_ages = [20, 50, 100]\n"
            + "host_scores = [0.2, 0.5, 1.0]\n"
            + "vulnerable_ages = [30, 60, 120]\n"
            + "mortality_probs = [0.1, 0.4, 0.8]\n"
            + "mortality_of_interest = true\n"
    }

    fn parse(contents: &str) -> Result<Config> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn valid_config_parses() {
        let config = parse(&base_toml()).expect("base config must be valid");
        assert_eq!(config.agents.len(), 1);
        assert_eq!(config.species[0].name, "fagugran");
        assert_eq!(config.agents[0].hosts.len(), 1);
    }

    #[test]
    fn unsupported_kernel_family_is_rejected() {
        let contents = base_toml().replace("\"power-law\"", "\"dynamic\"");
        assert!(parse(&contents).is_err());
    }

    #[test]
    fn power_law_alpha_must_exceed_two() {
        let contents = base_toml().replace("shape_alpha = 2.5", "shape_alpha = 1.5");
        assert!(parse(&contents).is_err());
    }

    #[test]
    fn disturbance_magnitude_is_range_checked() {
        let contents = base_toml().replace(
            "init_infected = 1\n",
            "init_infected = 1\ndisturbance_modifiers = [{ kind = \"fire\", min_severity = 2, duration = 10, magnitude = 1.5 }]\n",
        );
        assert!(parse(&contents).is_err());
    }

    #[test]
    fn ecoregion_modifier_count_must_match() {
        let contents = base_toml().replace(
            "ecoregion_modifiers = [0.0]",
            "ecoregion_modifiers = [0.0, 0.1]",
        );
        assert!(parse(&contents).is_err());
    }

    #[test]
    fn initial_site_outside_grid_is_rejected() {
        let contents = base_toml().replace(
            "init_infected = 1\n",
            "init_infected = 0\ninit_sites = [[8, 0]]\n",
        );
        assert!(parse(&contents).is_err());
    }

    #[test]
    fn unknown_host_species_is_rejected() {
        let contents = base_toml().replace("species = \"fagugran\"", "species = \"acerrubr\"");
        assert!(parse(&contents).is_err());
    }
}
