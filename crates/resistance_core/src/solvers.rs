use crate::error::{FailureReason, ModelError, ModelResult};
use crate::traits::DynamicalSystem;
use serde::{Deserialize, Serialize};

/// Explicit embedded Runge-Kutta pair used by [`AdaptiveSolver`].
/// Both pairs are 7-stage, FSAL, order 5 with an order-4 error estimate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AdaptiveMethod {
    /// Dormand-Prince 5(4), the classic RK45 pair.
    #[default]
    DormandPrince5,
    /// Tsitouras 5(4).
    Tsit5,
}

impl AdaptiveMethod {
    fn tableau(self) -> &'static Tableau {
        match self {
            AdaptiveMethod::DormandPrince5 => &DOPRI5,
            AdaptiveMethod::Tsit5 => &TSIT5,
        }
    }
}

const STAGES: usize = 7;

/// Butcher tableau of a 7-stage FSAL pair. Row 6 of `a` equals `b`, so the
/// last stage is the derivative at the accepted point.
struct Tableau {
    c: [f64; STAGES],
    a: [[f64; STAGES]; STAGES],
    /// b - b_hat, scaled by h gives the local error estimate.
    e: [f64; STAGES],
    /// Order of the embedded error estimate.
    error_order: i32,
    /// Continuous extension: stage i weight at θ is
    /// dense[i][0] θ + dense[i][1] θ² + dense[i][2] θ³ + dense[i][3] θ⁴.
    dense: [[f64; 4]; STAGES],
}

const DOPRI5: Tableau = Tableau {
    c: [0.0, 1.0 / 5.0, 3.0 / 10.0, 4.0 / 5.0, 8.0 / 9.0, 1.0, 1.0],
    a: [
        [0.0; STAGES],
        [1.0 / 5.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [3.0 / 40.0, 9.0 / 40.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [44.0 / 45.0, -56.0 / 15.0, 32.0 / 9.0, 0.0, 0.0, 0.0, 0.0],
        [
            19372.0 / 6561.0,
            -25360.0 / 2187.0,
            64448.0 / 6561.0,
            -212.0 / 729.0,
            0.0,
            0.0,
            0.0,
        ],
        [
            9017.0 / 3168.0,
            -355.0 / 33.0,
            46732.0 / 5247.0,
            49.0 / 176.0,
            -5103.0 / 18656.0,
            0.0,
            0.0,
        ],
        [
            35.0 / 384.0,
            0.0,
            500.0 / 1113.0,
            125.0 / 192.0,
            -2187.0 / 6784.0,
            11.0 / 84.0,
            0.0,
        ],
    ],
    e: [
        71.0 / 57600.0,
        0.0,
        -71.0 / 16695.0,
        71.0 / 1920.0,
        -17253.0 / 339200.0,
        22.0 / 525.0,
        -1.0 / 40.0,
    ],
    error_order: 4,
    // Shampine's fourth-order interpolant for Dormand-Prince.
    dense: [
        [
            1.0,
            -8048581381.0 / 2820520608.0,
            8663915743.0 / 2820520608.0,
            -12715105075.0 / 11282082432.0,
        ],
        [0.0, 0.0, 0.0, 0.0],
        [
            0.0,
            131558114200.0 / 32700410799.0,
            -68118460800.0 / 10900136933.0,
            87487479700.0 / 32700410799.0,
        ],
        [
            0.0,
            -1754552775.0 / 470086768.0,
            14199869525.0 / 1410260304.0,
            -10690763975.0 / 1880347072.0,
        ],
        [
            0.0,
            127303824393.0 / 49829197408.0,
            -318862633887.0 / 49829197408.0,
            701980252875.0 / 199316789632.0,
        ],
        [
            0.0,
            -282668133.0 / 205662961.0,
            2019193451.0 / 616988883.0,
            -1453857185.0 / 822651844.0,
        ],
        [
            0.0,
            40617522.0 / 29380423.0,
            -110615467.0 / 29380423.0,
            69997945.0 / 29380423.0,
        ],
    ],
};

const TSIT5: Tableau = Tableau {
    c: [0.0, 0.161, 0.327, 0.9, 0.9800255409045097, 1.0, 1.0],
    a: [
        [0.0; STAGES],
        [0.161, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0],
        [-0.008480655492356989, 0.335480655492357, 0.0, 0.0, 0.0, 0.0, 0.0],
        [
            2.898,
            -6.359447987781783,
            4.361447987781783,
            0.0,
            0.0,
            0.0,
            0.0,
        ],
        [
            5.325864858437957,
            -11.748883564062828,
            7.495539342889693,
            -0.09249506636030195,
            0.0,
            0.0,
            0.0,
        ],
        [
            5.86145544294642,
            -12.92096931784711,
            8.159367898576159,
            -0.071584973281401,
            -0.02826857949054663,
            0.0,
            0.0,
        ],
        [
            0.09646076681806523,
            0.01,
            0.4798896504144996,
            1.379008574103742,
            -3.290069515436099,
            2.324710524099774,
            0.0,
        ],
    ],
    e: [
        -0.00178001105222577714,
        -0.0008164344596567469,
        0.007880878010261995,
        -0.1447110071732629,
        0.5823571654525552,
        -0.45808210592918697,
        1.0 / 66.0,
    ],
    error_order: 4,
    dense: [
        [
            1.0,
            -2.763706197274826,
            2.9132554618219126,
            -1.0530884977290216,
        ],
        [0.0, 0.13169999999999998, -0.2234, 0.1017],
        [
            0.0,
            3.9302962368947516,
            -5.941033872131505,
            2.490627285651253,
        ],
        [
            0.0,
            -12.411077166933676,
            30.33818863028232,
            -16.548102889244902,
        ],
        [
            0.0,
            37.50931341651104,
            -88.1789048947664,
            47.37952196281928,
        ],
        [
            0.0,
            -27.896526289197286,
            65.09189467479366,
            -34.87065786149661,
        ],
        [0.0, 1.5, -4.0, 2.5],
    ],
};

/// Tolerances, limits and controller constants for adaptive integration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorSettings {
    pub method: AdaptiveMethod,
    pub rtol: f64,
    pub atol: f64,
    /// Budget of attempted steps (accepted + rejected).
    pub max_steps: usize,
    /// First trial step; selected from the initial slope when absent.
    pub initial_step: Option<f64>,
    pub max_step: Option<f64>,
    pub safety: f64,
    pub min_factor: f64,
    pub max_factor: f64,
}

impl Default for IntegratorSettings {
    fn default() -> Self {
        Self {
            method: AdaptiveMethod::DormandPrince5,
            rtol: 1e-6,
            atol: 1e-6,
            max_steps: 100_000,
            initial_step: None,
            max_step: None,
            safety: 0.9,
            min_factor: 0.2,
            max_factor: 10.0,
        }
    }
}

impl IntegratorSettings {
    pub fn validate(&self) -> ModelResult<()> {
        if !(self.rtol.is_finite() && self.rtol > 0.0) {
            return Err(ModelError::invalid("rtol must be positive"));
        }
        if !(self.atol.is_finite() && self.atol > 0.0) {
            return Err(ModelError::invalid("atol must be positive"));
        }
        if self.max_steps == 0 {
            return Err(ModelError::invalid("max_steps must be greater than zero"));
        }
        if let Some(h) = self.initial_step {
            if !(h.is_finite() && h > 0.0) {
                return Err(ModelError::invalid("initial_step must be positive"));
            }
        }
        if let Some(h) = self.max_step {
            if !(h > 0.0) {
                return Err(ModelError::invalid("max_step must be positive"));
            }
        }
        if !(self.safety > 0.0 && self.safety <= 1.0) {
            return Err(ModelError::invalid("safety must lie in (0, 1]"));
        }
        if !(self.min_factor > 0.0 && self.min_factor < 1.0) {
            return Err(ModelError::invalid("min_factor must lie in (0, 1)"));
        }
        if !(self.max_factor > 1.0) {
            return Err(ModelError::invalid("max_factor must exceed 1"));
        }
        Ok(())
    }
}

/// Work counters for one integration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolverStats {
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub rhs_evaluations: usize,
}

/// Furthest accepted point of a failed integration.
#[derive(Debug, Clone, PartialEq)]
pub struct SolverFailure {
    pub time: f64,
    pub state: Vec<f64>,
    pub reason: FailureReason,
    pub stats: SolverStats,
}

/// Embedded Runge-Kutta integrator with step-size control and fourth-order
/// dense output at requested sample times.
pub struct AdaptiveSolver {
    settings: IntegratorSettings,
    tableau: &'static Tableau,
    k: [Vec<f64>; STAGES],
    tmp: Vec<f64>,
    y_new: Vec<f64>,
    stats: SolverStats,
}

impl AdaptiveSolver {
    pub fn new(settings: IntegratorSettings, dim: usize) -> ModelResult<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            tableau: settings.method.tableau(),
            k: std::array::from_fn(|_| vec![0.0; dim]),
            tmp: vec![0.0; dim],
            y_new: vec![0.0; dim],
            stats: SolverStats::default(),
        })
    }

    pub fn stats(&self) -> SolverStats {
        self.stats
    }

    /// Integrates from `t_eval[0]` to the last entry of `t_eval`, returning
    /// the state at every entry. `t_eval` must be strictly increasing.
    pub fn solve<S: DynamicalSystem<f64>>(
        &mut self,
        system: &S,
        y0: &[f64],
        t_eval: &[f64],
    ) -> Result<Vec<Vec<f64>>, SolverFailure> {
        self.stats = SolverStats::default();

        let mut samples = Vec::with_capacity(t_eval.len());
        let (Some(&t0), Some(&t_end)) = (t_eval.first(), t_eval.last()) else {
            return Ok(samples);
        };
        samples.push(y0.to_vec());

        let mut t = t0;
        let mut y = y0.to_vec();
        if !y.iter().all(|v| v.is_finite()) {
            return Err(self.failure(t, &y, FailureReason::NonFiniteState));
        }

        // k[0] holds f(t, y) at the start of each step (FSAL).
        system.apply(t, &y, &mut self.k[0]);
        self.stats.rhs_evaluations += 1;

        let max_step = self.settings.max_step.unwrap_or(f64::INFINITY);
        let mut h = match self.settings.initial_step {
            Some(h) => h,
            None => self.select_initial_step(system, t, &y, t_end - t),
        }
        .min(max_step);

        let exponent = -1.0 / (self.tableau.error_order as f64 + 1.0);
        let mut next_sample = 1;
        let mut attempts = 0usize;
        let mut step_rejected = false;

        while t < t_end {
            if attempts >= self.settings.max_steps {
                return Err(self.failure(
                    t,
                    &y,
                    FailureReason::MaxStepsExceeded {
                        steps: self.settings.max_steps,
                    },
                ));
            }
            attempts += 1;

            // Below ten ulps of t a step no longer resolves. The floor on h
            // never exceeds what is left of the span.
            let resolvable = 10.0 * (t.next_up() - t).abs();
            h = h.max(resolvable.min(t_end - t));
            let last = t + h >= t_end;
            let h_trial = if last { t_end - t } else { h };

            self.compute_stages(system, t, &y, h_trial);
            let err = self.error_norm(&y, h_trial);

            if err <= 1.0 {
                let t_new = if last { t_end } else { t + h_trial };
                if !self.y_new.iter().all(|v| v.is_finite()) {
                    return Err(self.failure(t, &y, FailureReason::NonFiniteState));
                }

                while next_sample < t_eval.len() && t_eval[next_sample] <= t_new {
                    let ts = t_eval[next_sample];
                    if ts == t_new {
                        samples.push(self.y_new.clone());
                    } else {
                        samples.push(self.interpolate(&y, t, h_trial, ts));
                    }
                    next_sample += 1;
                }

                let mut factor = if err == 0.0 {
                    self.settings.max_factor
                } else {
                    (self.settings.safety * err.powf(exponent)).min(self.settings.max_factor)
                };
                if step_rejected {
                    factor = factor.min(1.0);
                }

                t = t_new;
                y.copy_from_slice(&self.y_new);
                let (head, tail) = self.k.split_at_mut(STAGES - 1);
                head[0].copy_from_slice(&tail[0]);
                h = (h_trial * factor).min(max_step);
                step_rejected = false;
                self.stats.accepted_steps += 1;
            } else {
                if h_trial <= resolvable {
                    return Err(self.failure(
                        t,
                        &y,
                        FailureReason::StepSizeTooSmall { step: h_trial },
                    ));
                }
                let factor = if err.is_finite() {
                    (self.settings.safety * err.powf(exponent)).max(self.settings.min_factor)
                } else {
                    self.settings.min_factor
                };
                h = h_trial * factor;
                step_rejected = true;
                self.stats.rejected_steps += 1;
            }
        }

        Ok(samples)
    }

    fn failure(&self, time: f64, state: &[f64], reason: FailureReason) -> SolverFailure {
        SolverFailure {
            time,
            state: state.to_vec(),
            reason,
            stats: self.stats,
        }
    }

    /// Evaluates stages 2..7 (stage 1 is carried over) and writes the
    /// propagated solution into `y_new`. The last stage is f(t + h, y_new).
    fn compute_stages<S: DynamicalSystem<f64>>(&mut self, system: &S, t: f64, y: &[f64], h: f64) {
        let tab = self.tableau;
        for stage in 1..STAGES {
            for n in 0..y.len() {
                let mut sum = 0.0;
                for j in 0..stage {
                    sum += tab.a[stage][j] * self.k[j][n];
                }
                self.tmp[n] = y[n] + h * sum;
            }
            let (_, rest) = self.k.split_at_mut(stage);
            system.apply(t + tab.c[stage] * h, &self.tmp, &mut rest[0]);
        }
        // Row 6 is b, so tmp after the final stage is the new solution.
        self.y_new.copy_from_slice(&self.tmp);
        self.stats.rhs_evaluations += STAGES - 1;
    }

    /// RMS of the embedded error scaled by atol + rtol * max(|y|, |y_new|).
    fn error_norm(&self, y: &[f64], h: f64) -> f64 {
        let dim = y.len();
        if dim == 0 {
            return 0.0;
        }
        let mut sum = 0.0;
        for n in 0..dim {
            let mut err = 0.0;
            for i in 0..STAGES {
                err += self.tableau.e[i] * self.k[i][n];
            }
            let scale =
                self.settings.atol + self.settings.rtol * y[n].abs().max(self.y_new[n].abs());
            let scaled = h * err / scale;
            sum += scaled * scaled;
        }
        (sum / dim as f64).sqrt()
    }

    /// Evaluates the pair's continuous extension over [t, t + h]. Must run
    /// before the FSAL shift, while k holds this step's stages.
    fn interpolate(&self, y: &[f64], t: f64, h: f64, at: f64) -> Vec<f64> {
        let theta = (at - t) / h;
        let powers = [theta, theta * theta, theta * theta * theta, theta.powi(4)];
        let weights: [f64; STAGES] = std::array::from_fn(|i| {
            self.tableau.dense[i]
                .iter()
                .zip(&powers)
                .map(|(c, p)| c * p)
                .sum()
        });
        (0..y.len())
            .map(|n| {
                let slope: f64 = (0..STAGES).map(|i| weights[i] * self.k[i][n]).sum();
                y[n] + h * slope
            })
            .collect()
    }

    /// Starting step from the size of the state and the initial slope
    /// (Hairer, Norsett & Wanner, II.4).
    fn select_initial_step<S: DynamicalSystem<f64>>(
        &mut self,
        system: &S,
        t0: f64,
        y0: &[f64],
        span: f64,
    ) -> f64 {
        let dim = y0.len().max(1) as f64;
        let atol = self.settings.atol;
        let rtol = self.settings.rtol;
        let f0 = &self.k[0];

        let rms = |values: &mut dyn Iterator<Item = f64>| -> f64 {
            (values.map(|v| v * v).sum::<f64>() / dim).sqrt()
        };
        let scale: Vec<f64> = y0.iter().map(|v| atol + v.abs() * rtol).collect();

        let d0 = rms(&mut y0.iter().zip(&scale).map(|(y, s)| y / s));
        let d1 = rms(&mut f0.iter().zip(&scale).map(|(f, s)| f / s));
        let h0 = if d0 < 1e-5 || d1 < 1e-5 {
            1e-6
        } else {
            0.01 * d0 / d1
        };

        for n in 0..y0.len() {
            self.tmp[n] = y0[n] + h0 * f0[n];
        }
        let mut f1 = vec![0.0; y0.len()];
        system.apply(t0 + h0, &self.tmp, &mut f1);
        self.stats.rhs_evaluations += 1;

        let f0 = &self.k[0];
        let d2 = rms(
            &mut f1
                .iter()
                .zip(f0.iter())
                .zip(&scale)
                .map(|((a, b), s)| (a - b) / s),
        ) / h0;

        let order = self.tableau.error_order as f64 + 1.0;
        let h1 = if d1 <= 1e-15 && d2 <= 1e-15 {
            (h0 * 1e-3).max(1e-6)
        } else {
            (0.01 / d1.max(d2)).powf(1.0 / order)
        };

        (100.0 * h0).min(h1).min(span)
    }
}
