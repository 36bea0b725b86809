use crate::agent::Agent;
use crate::landscape::Landscape;
use rand::prelude::*;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

/// Discrete infection status of a cell under one agent.
///
/// Transitions are monotone: a cell never leaves `Diseased`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum InfectionStatus {
    Susceptible,
    Infected,
    Diseased,
}

impl InfectionStatus {
    pub fn as_u8(self) -> u8 {
        match self {
            InfectionStatus::Susceptible => 0,
            InfectionStatus::Infected => 1,
            InfectionStatus::Diseased => 2,
        }
    }
}

/// Per-cell epidemic state of one agent.
///
/// The probabilities are soft state: each evolves independently and is
/// clamped to [0, 1] after every update; they are not required to sum to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellState {
    pub status: InfectionStatus,
    pub p_s: f64,
    pub p_i: f64,
    pub p_d: f64,
    /// Year of the last mortality event at this cell, if any.
    pub last_event: Option<u32>,
}

impl CellState {
    pub fn susceptible() -> Self {
        Self {
            status: InfectionStatus::Susceptible,
            p_s: 1.0,
            p_i: 0.0,
            p_d: 0.0,
            last_event: None,
        }
    }

    pub fn infected() -> Self {
        Self {
            status: InfectionStatus::Infected,
            p_s: 0.0,
            p_i: 1.0,
            p_d: 0.0,
            last_event: None,
        }
    }
}

/// What a single cell update did, beyond the probability bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Still susceptible.
    None,
    /// Crossed into `Infected` this step; never triggers mortality.
    BecameInfected,
    /// Crossed into `Diseased` this step; mortality applies.
    BecameDiseased,
    /// Remained `Infected`.
    StillInfected,
    /// Remained `Diseased`; mortality re-applies with the new draw.
    StillDiseased,
}

/// Advance one cell's probabilities and status with the shared draw `u`.
///
/// The probability deltas always apply, whatever the status; the discrete
/// transition is evaluated afterwards against the same draw.
pub fn step_cell(state: &mut CellState, foi: f64, acquisition_rate: f64, u: f64) -> Outcome {
    let delta_s = -foi * state.p_s;
    let delta_i = foi * state.p_s - acquisition_rate * state.p_i;
    let delta_d = acquisition_rate * state.p_i;

    state.p_s = (state.p_s + delta_s).clamp(0.0, 1.0);
    state.p_i = (state.p_i + delta_i).clamp(0.0, 1.0);
    state.p_d = (state.p_d + delta_d).clamp(0.0, 1.0);

    match state.status {
        InfectionStatus::Susceptible => {
            if state.p_i >= u {
                state.status = InfectionStatus::Infected;
                Outcome::BecameInfected
            } else {
                Outcome::None
            }
        }
        InfectionStatus::Infected => {
            if state.p_d >= u {
                state.status = InfectionStatus::Diseased;
                Outcome::BecameDiseased
            } else {
                Outcome::StillInfected
            }
        }
        InfectionStatus::Diseased => Outcome::StillDiseased,
    }
}

/// The uniform draw shared by a cell's transition and mortality decisions.
///
/// Derived from (agent seed, year, cell index) so the sequence does not
/// depend on iteration order and cells could be advanced concurrently.
pub fn cell_draw(seed: u64, year: u32, idx: usize) -> f64 {
    let mixed = seed
        ^ (year as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15)
        ^ (idx as u64).wrapping_mul(0xD1B5_4A32_D192_ED03);
    let mut rng = ChaCha12Rng::seed_from_u64(mixed);
    rng.random()
}

/// Per-step, per-agent event summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub year: u32,
    pub agent: String,
    /// Sites that crossed into `Infected` this step.
    pub new_infected: usize,
    /// Sites counted as infected this step (includes those that also
    /// crossed into `Diseased`).
    pub infected: usize,
    /// Sites counted as diseased this step.
    pub diseased: usize,
    /// Sites where at least one cohort was killed.
    pub damaged: usize,
    pub cohorts_killed: usize,
    pub conifers_killed: usize,
    pub cohorts_of_interest_killed: usize,
}

/// Advance every active cell of one agent for one annual step.
///
/// Mutates the per-cell epidemic states and the landscape's cohorts, adds
/// this step's kills into `mortality`, and returns the event summary.
pub fn advance(
    states: &mut [CellState],
    landscape: &mut Landscape,
    agent: &Agent,
    foi: &[f64],
    mortality: &mut [u32],
    year: u32,
) -> StepSummary {
    let mut summary = StepSummary {
        year,
        agent: agent.cfg.name.clone(),
        new_infected: 0,
        infected: 0,
        diseased: 0,
        damaged: 0,
        cohorts_killed: 0,
        conifers_killed: 0,
        cohorts_of_interest_killed: 0,
    };

    for idx in 0..states.len() {
        if !landscape.is_active(idx) {
            continue;
        }

        let u = cell_draw(agent.cfg.seed, year, idx);
        let outcome = step_cell(&mut states[idx], foi[idx], agent.cfg.acquisition_rate, u);

        match outcome {
            Outcome::None => {}
            Outcome::BecameInfected => summary.new_infected += 1,
            Outcome::StillInfected => summary.infected += 1,
            Outcome::BecameDiseased => {
                summary.infected += 1;
                summary.diseased += 1;
                apply_mortality(states, landscape, agent, mortality, year, idx, u, &mut summary);
            }
            Outcome::StillDiseased => {
                summary.diseased += 1;
                apply_mortality(states, landscape, agent, mortality, year, idx, u, &mut summary);
            }
        }
    }

    summary
}

#[allow(clippy::too_many_arguments)]
fn apply_mortality(
    states: &mut [CellState],
    landscape: &mut Landscape,
    agent: &Agent,
    mortality: &mut [u32],
    year: u32,
    idx: usize,
    u: f64,
    summary: &mut StepSummary,
) {
    let Some(site) = landscape.site_mut(idx) else {
        return;
    };

    let hosts = &agent.hosts;
    let killed = site.mark_and_sweep(|cohort| {
        hosts[cohort.species]
            .as_ref()
            .is_some_and(|host| host.condemns(cohort.age, u))
    });

    if killed.is_empty() {
        return;
    }

    summary.damaged += 1;
    summary.cohorts_killed += killed.len();
    for cohort in &killed {
        if agent.conifer[cohort.species] {
            summary.conifers_killed += 1;
        }
        if hosts[cohort.species]
            .as_ref()
            .is_some_and(|host| host.mortality_of_interest)
        {
            summary.cohorts_of_interest_killed += 1;
        }
    }

    mortality[idx] += killed.len() as u32;
    states[idx].last_event = Some(year);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probabilities_stay_in_bounds_under_overshoot() {
        let mut state = CellState::susceptible();
        // A huge force of infection would push P_I far past 1 without the
        // clamp.
        step_cell(&mut state, 50.0, 0.2, 0.99);
        assert!((0.0..=1.0).contains(&state.p_s));
        assert!((0.0..=1.0).contains(&state.p_i));
        assert!((0.0..=1.0).contains(&state.p_d));
        assert_eq!(state.p_i, 1.0);
        assert_eq!(state.p_s, 0.0);
    }

    #[test]
    fn susceptible_crosses_when_p_i_meets_the_draw() {
        let mut state = CellState::susceptible();
        assert_eq!(step_cell(&mut state, 0.3, 0.1, 0.5), Outcome::None);
        assert_eq!(state.status, InfectionStatus::Susceptible);

        let mut state = CellState::susceptible();
        assert_eq!(step_cell(&mut state, 0.6, 0.1, 0.5), Outcome::BecameInfected);
        assert_eq!(state.status, InfectionStatus::Infected);
    }

    #[test]
    fn infected_progresses_through_diseased_and_never_reverts() {
        let mut state = CellState::infected();
        // Acquisition moves mass to P_D; a low draw crosses immediately.
        assert_eq!(step_cell(&mut state, 0.0, 0.5, 0.4), Outcome::BecameDiseased);
        assert_eq!(state.status, InfectionStatus::Diseased);

        // Diseased is terminal, whatever the draws and deltas do.
        for step in 0..50 {
            let u = cell_draw(3, step, 0);
            step_cell(&mut state, 0.0, 0.5, u);
            assert_eq!(state.status, InfectionStatus::Diseased);
        }
    }

    #[test]
    fn infected_tally_includes_fresh_diseased() {
        // Covered at the advance level by the engine tests; here we pin the
        // outcome mapping.
        let mut state = CellState::infected();
        assert_eq!(step_cell(&mut state, 0.0, 0.0, 0.5), Outcome::StillInfected);
    }

    #[test]
    fn draws_are_order_independent_and_reproducible() {
        let a = cell_draw(7, 3, 100);
        let b = cell_draw(7, 3, 100);
        assert_eq!(a, b);
        assert_ne!(cell_draw(7, 3, 100), cell_draw(7, 3, 101));
        assert_ne!(cell_draw(7, 3, 100), cell_draw(7, 4, 100));
        for idx in 0..64 {
            let u = cell_draw(1, 1, idx);
            assert!((0.0..1.0).contains(&u));
        }
    }
}
