use crate::config::Config;
use crate::engine::Frame;
use crate::stats::{Accumulator, AccumulatorReport, Curve, CurveReport};
use anyhow::{Context, Result};
use rmp_serde::decode;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, BufWriter},
    path::Path,
};

/// Report of one observable, tagged by its shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ObsReport {
    Accumulator(AccumulatorReport),
    Curve(CurveReport),
}

pub trait Obs {
    fn update(&mut self, frame: &Frame) -> Result<()>;
    fn report(&self) -> Vec<(String, ObsReport)>;
}

/// Per-agent epidemic curves: sites infected and sites diseased per save.
pub struct EpidemicCurves {
    agents: Vec<String>,
    infected: Vec<Curve>,
    diseased: Vec<Curve>,
}

impl EpidemicCurves {
    pub fn new(cfg: &Config) -> Self {
        let agents: Vec<String> = cfg.agents.iter().map(|agent| agent.name.clone()).collect();
        let infected = agents.iter().map(|_| Curve::new()).collect();
        let diseased = agents.iter().map(|_| Curve::new()).collect();
        Self {
            agents,
            infected,
            diseased,
        }
    }
}

impl Obs for EpidemicCurves {
    fn update(&mut self, frame: &Frame) -> Result<()> {
        for (i_agent, name) in self.agents.iter().enumerate() {
            let mut infected = 0;
            let mut diseased = 0;
            for summary in frame.summaries.iter().filter(|s| &s.agent == name) {
                infected = infected.max(summary.infected);
                diseased = diseased.max(summary.diseased);
            }
            self.infected[i_agent].push(infected as f64);
            self.diseased[i_agent].push(diseased as f64);
        }
        Ok(())
    }

    fn report(&self) -> Vec<(String, ObsReport)> {
        let mut reports = Vec::new();
        for (i_agent, name) in self.agents.iter().enumerate() {
            reports.push((
                format!("{name}/infected_sites"),
                ObsReport::Curve(self.infected[i_agent].report()),
            ));
            reports.push((
                format!("{name}/diseased_sites"),
                ObsReport::Curve(self.diseased[i_agent].report()),
            ));
        }
        reports
    }
}

/// Per-agent mortality: cohorts killed per save and damaged sites per step.
pub struct MortalityTotals {
    agents: Vec<String>,
    killed: Vec<Curve>,
    of_interest: Vec<Curve>,
    damaged: Vec<Accumulator>,
}

impl MortalityTotals {
    pub fn new(cfg: &Config) -> Self {
        let agents: Vec<String> = cfg.agents.iter().map(|agent| agent.name.clone()).collect();
        Self {
            killed: agents.iter().map(|_| Curve::new()).collect(),
            of_interest: agents.iter().map(|_| Curve::new()).collect(),
            damaged: agents.iter().map(|_| Accumulator::new()).collect(),
            agents,
        }
    }
}

impl Obs for MortalityTotals {
    fn update(&mut self, frame: &Frame) -> Result<()> {
        for (i_agent, name) in self.agents.iter().enumerate() {
            let mut killed = 0;
            let mut of_interest = 0;
            for summary in frame.summaries.iter().filter(|s| &s.agent == name) {
                killed += summary.cohorts_killed;
                of_interest += summary.cohorts_of_interest_killed;
                self.damaged[i_agent].add(summary.damaged as f64);
            }
            self.killed[i_agent].push(killed as f64);
            self.of_interest[i_agent].push(of_interest as f64);
        }
        Ok(())
    }

    fn report(&self) -> Vec<(String, ObsReport)> {
        let mut reports = Vec::new();
        for (i_agent, name) in self.agents.iter().enumerate() {
            reports.push((
                format!("{name}/cohorts_killed"),
                ObsReport::Curve(self.killed[i_agent].report()),
            ));
            reports.push((
                format!("{name}/cohorts_of_interest_killed"),
                ObsReport::Curve(self.of_interest[i_agent].report()),
            ));
            reports.push((
                format!("{name}/damaged_sites"),
                ObsReport::Accumulator(self.damaged[i_agent].report()),
            ));
        }
        reports
    }
}

pub struct Analyzer {
    cfg: Config,
    obs_ptr_vec: Vec<Box<dyn Obs>>,
}

impl Analyzer {
    pub fn new(cfg: Config) -> Self {
        let mut obs_ptr_vec: Vec<Box<dyn Obs>> = Vec::new();
        obs_ptr_vec.push(Box::new(EpidemicCurves::new(&cfg)));
        obs_ptr_vec.push(Box::new(MortalityTotals::new(&cfg)));
        Self { cfg, obs_ptr_vec }
    }

    pub fn add_file<P: AsRef<Path>>(&mut self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::open(file).with_context(|| format!("failed to open {file:?}"))?;
        let mut reader = BufReader::new(file);

        for _ in 0..self.cfg.output.saves_per_file {
            let frame: Frame = decode::from_read(&mut reader).context("failed to read frame")?;
            for obs in &mut self.obs_ptr_vec {
                obs.update(&frame).context("failed to update observable")?;
            }
        }
        Ok(())
    }

    pub fn save_results<P: AsRef<Path>>(&self, file: P) -> Result<()> {
        let file = file.as_ref();
        let file = File::create(file).with_context(|| format!("failed to create {file:?}"))?;
        let mut writer = BufWriter::new(file);

        let reports: Vec<(String, ObsReport)> = self
            .obs_ptr_vec
            .iter()
            .flat_map(|obs| obs.report())
            .collect();
        rmp_serde::encode::write(&mut writer, &reports).context("failed to serialize results")?;
        Ok(())
    }
}
