//! Monotone decay models and their least-squares fitting
//!
//! Both models have two parameters `(A0, s)` where the rate is carried in log
//! space (`τ = e^s` or `α = e^s`), so any converged fit has a strictly positive
//! persistence time by construction.
//!
//! Fitting uses Levenberg-Marquardt with Marquardt diagonal scaling on the 2×2
//! normal equations:
//!
//! ```text
//! (JᵀJ + λ·diag(JᵀJ)) δ = Jᵀr
//! ```
//!
//! λ shrinks tenfold after an accepted step and grows tenfold after a rejected
//! one.

use crate::config::TemporalConfig;
use crate::core_types::{DecayFit, FitQuality};
use nalgebra::{Matrix2, Vector2};
use serde::{Deserialize, Serialize};

/// Largest log-rate accepted during iteration (e^50 steps)
const MAX_LOG_RATE: f64 = 50.0;
const LAMBDA_INITIAL: f64 = 1e-3;
const LAMBDA_MAX: f64 = 1e14;
/// Below this the amplitude is indistinguishable from no signal
const MIN_AMPLITUDE: f64 = 1e-12;

/// Decay model family used for persistence fitting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecayModelKind {
    /// `A(t) = A0·exp(−t/τ)`
    #[default]
    Exponential,
    /// `A(t) = A0·(1+t)^(−α)`
    PowerLaw,
}

impl DecayModelKind {
    pub fn model(self) -> &'static dyn DecayModel {
        match self {
            DecayModelKind::Exponential => &ExponentialDecay,
            DecayModelKind::PowerLaw => &PowerLawDecay,
        }
    }
}

/// A two-parameter monotone decay `f(t; A0, s)`
pub trait DecayModel: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, params: &Vector2<f64>, t: f64) -> f64;

    /// `(∂f/∂A0, ∂f/∂s)`
    fn gradient(&self, params: &Vector2<f64>, t: f64) -> Vector2<f64>;

    /// Starting point from a log-linear regression on same-signed samples
    fn initial_guess(&self, lags: &[f64], values: &[f64]) -> Vector2<f64>;

    /// Rate parameter in natural units (τ or α)
    fn rate_param(&self, params: &Vector2<f64>) -> f64 {
        params[1].exp()
    }

    /// Lag at which the fitted anomaly has fallen to `A0 / e`
    fn persistence_time(&self, params: &Vector2<f64>) -> f64;
}

/// Exponential decay with time constant τ
#[derive(Debug, Clone, Copy, Default)]
pub struct ExponentialDecay;

impl DecayModel for ExponentialDecay {
    fn name(&self) -> &'static str {
        "exponential"
    }

    #[inline]
    fn evaluate(&self, params: &Vector2<f64>, t: f64) -> f64 {
        params[0] * (-t * (-params[1]).exp()).exp()
    }

    #[inline]
    fn gradient(&self, params: &Vector2<f64>, t: f64) -> Vector2<f64> {
        let inv_tau = (-params[1]).exp();
        let decay = (-t * inv_tau).exp();
        Vector2::new(decay, params[0] * decay * t * inv_tau)
    }

    fn initial_guess(&self, lags: &[f64], values: &[f64]) -> Vector2<f64> {
        let span = lags.last().copied().unwrap_or(1.0).max(1.0);
        log_linear_guess(lags.iter().copied(), values, |slope| {
            if slope < 0.0 {
                -1.0 / slope
            } else {
                span
            }
        })
    }

    fn persistence_time(&self, params: &Vector2<f64>) -> f64 {
        params[1].exp()
    }
}

/// Power-law decay with exponent α
#[derive(Debug, Clone, Copy, Default)]
pub struct PowerLawDecay;

impl DecayModel for PowerLawDecay {
    fn name(&self) -> &'static str {
        "power_law"
    }

    #[inline]
    fn evaluate(&self, params: &Vector2<f64>, t: f64) -> f64 {
        params[0] * (1.0 + t).powf(-params[1].exp())
    }

    #[inline]
    fn gradient(&self, params: &Vector2<f64>, t: f64) -> Vector2<f64> {
        let alpha = params[1].exp();
        let ln_t = (1.0 + t).ln();
        let shape = (1.0 + t).powf(-alpha);
        Vector2::new(shape, -params[0] * shape * ln_t * alpha)
    }

    fn initial_guess(&self, lags: &[f64], values: &[f64]) -> Vector2<f64> {
        log_linear_guess(lags.iter().map(|t| (1.0 + t).ln()), values, |slope| {
            if slope < 0.0 {
                -slope
            } else {
                1.0
            }
        })
    }

    fn persistence_time(&self, params: &Vector2<f64>) -> f64 {
        (1.0 / params[1].exp()).exp() - 1.0
    }
}

/// Regress `ln|y|` on `x` over samples sharing the sign of the first one.
///
/// `rate_from_slope` maps the fitted slope to the model's natural rate.
fn log_linear_guess(
    xs: impl Iterator<Item = f64>,
    values: &[f64],
    rate_from_slope: impl Fn(f64) -> f64,
) -> Vector2<f64> {
    let first = values.iter().copied().find(|v| v.abs() > MIN_AMPLITUDE).unwrap_or(0.0);
    let sign = first.signum();
    let points: Vec<(f64, f64)> = xs
        .zip(values)
        .filter(|(_, y)| y.signum() == sign && y.abs() > MIN_AMPLITUDE)
        .map(|(x, y)| (x, y.abs().ln()))
        .collect();

    if points.len() < 2 {
        return Vector2::new(first, rate_from_slope(0.0).max(f64::MIN_POSITIVE).ln());
    }
    let n = points.len() as f64;
    let mean_x = points.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mean_x).powi(2)).sum();
    let sxy: f64 = points.iter().map(|p| (p.0 - mean_x) * (p.1 - mean_y)).sum();
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    let rate = rate_from_slope(slope).max(f64::MIN_POSITIVE);
    Vector2::new(sign * intercept.exp(), rate.ln())
}

// ============================================================================
// LEVENBERG-MARQUARDT
// ============================================================================

/// Why a fit produced no parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitFailure {
    NotConverged,
    Diverged,
}

#[derive(Debug, Clone, Copy)]
struct Solution {
    params: Vector2<f64>,
    sse: f64,
    iterations: usize,
}

fn sum_squared_residuals(model: &dyn DecayModel, params: &Vector2<f64>, lags: &[f64], values: &[f64]) -> f64 {
    lags.iter()
        .zip(values)
        .map(|(&t, &y)| (y - model.evaluate(params, t)).powi(2))
        .sum()
}

fn levenberg_marquardt(
    model: &dyn DecayModel,
    lags: &[f64],
    values: &[f64],
    max_iterations: usize,
    tolerance: f64,
) -> Result<Solution, FitFailure> {
    let mut params = model.initial_guess(lags, values);
    let mut sse = sum_squared_residuals(model, &params, lags, values);
    if !sse.is_finite() {
        return Err(FitFailure::Diverged);
    }
    let mut lambda = LAMBDA_INITIAL;

    for iteration in 1..=max_iterations {
        let mut jtj = Matrix2::zeros();
        let mut jtr = Vector2::zeros();
        for (&t, &y) in lags.iter().zip(values) {
            let g = model.gradient(&params, t);
            let r = y - model.evaluate(&params, t);
            jtj += g * g.transpose();
            jtr += g * r;
        }

        let mut damped = jtj;
        for i in 0..2 {
            damped[(i, i)] += lambda * jtj[(i, i)].max(1e-12);
        }

        let Some(delta) = damped.try_inverse().map(|inv| inv * jtr) else {
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                return Err(FitFailure::NotConverged);
            }
            continue;
        };

        let candidate = params + delta;
        if candidate[1].abs() > MAX_LOG_RATE {
            return Err(FitFailure::Diverged);
        }
        let candidate_sse = sum_squared_residuals(model, &candidate, lags, values);

        if candidate_sse.is_finite() && candidate_sse <= sse {
            // Heavily damped steps are short by construction and prove nothing
            let near_gauss_newton = lambda <= 1.0;
            let step_small = delta.norm() <= tolerance * (params.norm() + tolerance);
            let gain_small = sse - candidate_sse <= tolerance * sse.max(f64::MIN_POSITIVE);
            params = candidate;
            sse = candidate_sse;
            lambda = (lambda / 10.0).max(1e-12);
            if near_gauss_newton && (step_small || gain_small) {
                return Ok(Solution {
                    params,
                    sse,
                    iterations: iteration,
                });
            }
        } else {
            lambda *= 10.0;
            if lambda > LAMBDA_MAX {
                // No downhill step exists at machine precision: stationary point
                return Ok(Solution {
                    params,
                    sse,
                    iterations: iteration,
                });
            }
        }
    }
    Err(FitFailure::NotConverged)
}

/// Fit `model` to `(lag, anomaly)` points.
///
/// Returns the fit (when usable) and its quality label. Never panics and never
/// errors: failure modes are reported through [`FitQuality`].
pub fn fit_decay(
    model: &dyn DecayModel,
    points: &[(f64, f64)],
    config: &TemporalConfig,
) -> (Option<DecayFit>, FitQuality) {
    if points.len() < config.min_points_for_fit {
        return (None, FitQuality::InsufficientData);
    }
    let lags: Vec<f64> = points.iter().map(|p| p.0).collect();
    let values: Vec<f64> = points.iter().map(|p| p.1).collect();

    let Ok(solution) = levenberg_marquardt(
        model,
        &lags,
        &values,
        config.max_fit_iterations,
        config.convergence_tolerance,
    ) else {
        return (None, FitQuality::FitFailed);
    };

    let tau = model.persistence_time(&solution.params);
    let amplitude = solution.params[0];
    if !(tau.is_finite() && tau > 0.0 && tau <= config.max_persistence_steps)
        || !amplitude.is_finite()
        || amplitude.abs() < MIN_AMPLITUDE
    {
        return (None, FitQuality::FitFailed);
    }

    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let ss_tot: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 {
        1.0 - solution.sse / ss_tot
    } else if solution.sse <= f64::EPSILON {
        1.0
    } else {
        0.0
    };

    let fit = DecayFit {
        amplitude,
        rate_param: model.rate_param(&solution.params),
        tau,
        r_squared,
        rmse: (solution.sse / n).sqrt(),
        iterations: solution.iterations,
    };
    (Some(fit), FitQuality::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn points(values: &[f64]) -> Vec<(f64, f64)> {
        values.iter().enumerate().map(|(i, &v)| (i as f64, v)).collect()
    }

    #[test]
    fn test_reference_decay_sequence() {
        let (fit, quality) = fit_decay(
            &ExponentialDecay,
            &points(&[2.0, 1.2, 0.7, 0.4]),
            &TemporalConfig::default(),
        );
        assert_eq!(quality, FitQuality::Ok);
        let fit = fit.unwrap();
        assert!(fit.tau > 1.4 && fit.tau < 2.2, "tau = {}", fit.tau);
        assert!(fit.r_squared > 0.99, "r2 = {}", fit.r_squared);
        assert_relative_eq!(fit.amplitude, 2.0, epsilon = 0.1);
    }

    #[test]
    fn test_exact_exponential_recovered() {
        let values: Vec<f64> = (0..8).map(|t| -3.0 * (-f64::from(t) / 2.5).exp()).collect();
        let (fit, quality) = fit_decay(&ExponentialDecay, &points(&values), &TemporalConfig::default());
        assert_eq!(quality, FitQuality::Ok);
        let fit = fit.unwrap();
        assert_relative_eq!(fit.tau, 2.5, epsilon = 1e-4);
        assert_relative_eq!(fit.amplitude, -3.0, epsilon = 1e-4);
    }

    #[test]
    fn test_power_law_recovered() {
        let values: Vec<f64> = (0..10).map(|t| 1.5 * (1.0 + f64::from(t)).powf(-0.8)).collect();
        let (fit, quality) = fit_decay(&PowerLawDecay, &points(&values), &TemporalConfig::default());
        assert_eq!(quality, FitQuality::Ok);
        let fit = fit.unwrap();
        assert_relative_eq!(fit.rate_param, 0.8, epsilon = 1e-4);
        assert_relative_eq!(fit.tau, (1.0_f64 / 0.8).exp() - 1.0, epsilon = 1e-3);
    }

    #[test]
    fn test_too_few_points() {
        let (fit, quality) = fit_decay(&ExponentialDecay, &points(&[1.0, 0.5]), &TemporalConfig::default());
        assert!(fit.is_none());
        assert_eq!(quality, FitQuality::InsufficientData);
    }

    #[test]
    fn test_growth_is_not_a_decay() {
        let values: Vec<f64> = (0..6).map(|t| (f64::from(t) / 2.0).exp()).collect();
        let (fit, quality) = fit_decay(&ExponentialDecay, &points(&values), &TemporalConfig::default());
        assert!(fit.is_none());
        assert_eq!(quality, FitQuality::FitFailed);
    }

    #[test]
    fn test_iteration_budget_exhaustion_fails() {
        let config = TemporalConfig {
            max_fit_iterations: 1,
            convergence_tolerance: 1e-300,
            ..TemporalConfig::default()
        };
        let (fit, quality) = fit_decay(&ExponentialDecay, &points(&[2.0, 1.0, 0.9, 0.1, 0.3]), &config);
        assert!(fit.is_none());
        assert_eq!(quality, FitQuality::FitFailed);
    }
}
