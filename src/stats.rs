use serde::{Deserialize, Serialize};

/// Running mean and sample standard deviation (Welford update).
pub struct Accumulator {
    n_vals: usize,
    mean: f64,
    diff_2_sum: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccumulatorReport {
    pub mean: f64,
    pub std_dev: f64,
}

impl Accumulator {
    pub fn new() -> Self {
        Self {
            n_vals: 0,
            mean: 0.0,
            diff_2_sum: 0.0,
        }
    }

    pub fn add(&mut self, val: f64) {
        self.n_vals += 1;

        let diff_a = val - self.mean;
        self.mean += diff_a / self.n_vals as f64;

        let diff_b = val - self.mean;
        self.diff_2_sum += diff_a * diff_b;
    }

    pub fn report(&self) -> AccumulatorReport {
        AccumulatorReport {
            mean: self.mean,
            std_dev: if self.n_vals > 1 {
                (self.diff_2_sum / (self.n_vals as f64 - 1.0)).sqrt()
            } else {
                f64::NAN
            },
        }
    }
}

/// A per-year series of one epidemic quantity.
pub struct Curve {
    vals: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurveReport {
    /// Largest value over the run.
    pub peak: f64,
    /// Index of the first save at which the peak occurred.
    pub peak_index: usize,
    /// Sum over the whole run.
    pub total: f64,
    /// Value at the last save.
    pub last: f64,
}

impl Curve {
    pub fn new() -> Self {
        Self { vals: Vec::new() }
    }

    pub fn push(&mut self, val: f64) {
        self.vals.push(val);
    }

    pub fn report(&self) -> CurveReport {
        let mut peak = f64::NAN;
        let mut peak_index = 0;
        for (idx, &val) in self.vals.iter().enumerate() {
            // The first occurrence of the maximum wins.
            if peak.is_nan() || val > peak {
                peak = val;
                peak_index = idx;
            }
        }
        CurveReport {
            peak,
            peak_index,
            total: self.vals.iter().sum(),
            last: self.vals.last().copied().unwrap_or(f64::NAN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_matches_direct_formulas() {
        let vals = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let mut acc = Accumulator::new();
        for &val in &vals {
            acc.add(val);
        }
        let report = acc.report();
        assert!((report.mean - 5.0).abs() < 1e-12);
        // Sample standard deviation of the classic example set.
        assert!((report.std_dev - (32.0f64 / 7.0).sqrt()).abs() < 1e-12);
    }

    #[test]
    fn curve_reports_first_peak() {
        let mut curve = Curve::new();
        for val in [0.0, 3.0, 7.0, 7.0, 2.0] {
            curve.push(val);
        }
        let report = curve.report();
        assert_eq!(report.peak, 7.0);
        assert_eq!(report.peak_index, 2);
        assert_eq!(report.total, 19.0);
        assert_eq!(report.last, 2.0);
    }

    #[test]
    fn empty_curve_reports_nan() {
        let report = Curve::new().report();
        assert!(report.peak.is_nan());
        assert!(report.last.is_nan());
        assert_eq!(report.total, 0.0);
    }
}
