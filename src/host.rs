use crate::agent::Agent;
use crate::config::{DisturbanceClass, HostIndexMode};
use crate::landscape::{Landscape, Site};

/// Raw site host index of one site in [0, 1].
///
/// Maps each host species' oldest cohort age through the agent's three
/// ordered thresholds and aggregates by the configured mode. A site with no
/// qualifying host species scores 0 without any division.
pub fn site_host_index(site: &Site, agent: &Agent) -> f64 {
    let mut score_sum = 0.0;
    let mut score_max = 0.0f64;
    let mut n_hosts = 0;

    for (i_spc, host) in agent.hosts.iter().enumerate() {
        let Some(host) = host else { continue };
        let age = site.oldest_age(i_spc);
        if age == 0 {
            continue;
        }
        let score = host.host_score(age);
        score_sum += score;
        score_max = score_max.max(score);
        n_hosts += 1;
    }

    if n_hosts == 0 {
        return 0.0;
    }
    let shi = match agent.cfg.host_index_mode {
        HostIndexMode::Mean => score_sum / n_hosts as f64,
        HostIndexMode::Max => score_max,
    };
    shi.clamp(0.0, 1.0)
}

/// Modified site host index before normalization, in [0, 1].
///
/// Adds to the raw index a contribution from every configured disturbance
/// modifier whose most recent matching event falls within its impact
/// window, decaying linearly from full magnitude at the event year to 0 at
/// the duration bound, plus the site's ecoregion modifier. Sites with a
/// zero raw index stay 0.
pub fn modified_host_index(
    site: &Site,
    agent: &Agent,
    shi: f64,
    prior_epidemic_year: Option<u32>,
    year: u32,
) -> f64 {
    if shi <= 0.0 {
        return 0.0;
    }

    let mut shim = shi;
    for dm in &agent.cfg.disturbance_modifiers {
        let event_year = if dm.kind == DisturbanceClass::Epidemic {
            prior_epidemic_year
        } else {
            site.events
                .iter()
                .filter(|event| {
                    event.disturbance.class() == dm.kind
                        && match (dm.min_severity, event.disturbance.severity()) {
                            (Some(floor), Some(severity)) => severity >= floor,
                            _ => true,
                        }
                })
                .map(|event| event.year)
                .max()
        };

        if let Some(event_year) = event_year {
            let elapsed = year.saturating_sub(event_year);
            if elapsed <= dm.duration {
                let remaining = (dm.duration - elapsed) as f64;
                shim += dm.magnitude * remaining / dm.duration as f64;
            }
        }
    }

    shim += agent.cfg.ecoregion_modifiers[site.ecoregion];
    shim.clamp(0.0, 1.0)
}

/// Compute the normalized modified host index for every cell.
///
/// The normalization divides every positive value by the landscape mean,
/// where the mean's denominator is the count of all active cells, not just
/// the positive ones. After this pass 1.0 reads as "typical landscape
/// susceptibility", which is what the transmission rate is calibrated
/// against.
pub fn compute_shim_grid(
    landscape: &Landscape,
    agent: &Agent,
    prior_epidemic_years: &[Option<u32>],
    year: u32,
) -> Vec<f64> {
    let mut shim = vec![0.0; landscape.n_cells()];
    for idx in 0..landscape.n_cells() {
        let Some(site) = landscape.site(idx) else {
            continue;
        };
        let shi = site_host_index(site, agent);
        shim[idx] = modified_host_index(site, agent, shi, prior_epidemic_years[idx], year);
    }

    normalize_by_landscape_mean(&mut shim, landscape.n_active());
    shim
}

/// Divide every positive value by `sum / n_active`; zeros stay zero.
pub fn normalize_by_landscape_mean(values: &mut [f64], n_active: usize) {
    if n_active == 0 {
        return;
    }
    let mean = values.iter().sum::<f64>() / n_active as f64;
    if mean <= 0.0 {
        return;
    }
    for val in values.iter_mut() {
        if *val > 0.0 {
            *val /= mean;
        }
    }
}
