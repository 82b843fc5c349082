//! Additive trend + weekly seasonality model fitted by least squares
//!
//! y(t) = a + b·t + Σ_k [c_k·sin(2πkt/7) + d_k·cos(2πkt/7)]
//!
//! `t` is measured in days from the first observation, so gaps in the
//! history are handled naturally. Prediction intervals use the OLS
//! prediction standard error σ·sqrt(1 + xᵀ(XᵀX)⁻¹x), which widens with the
//! distance from the fitted range.

use chrono::NaiveDate;
use nalgebra::{DMatrix, DVector};
use std::f64::consts::PI;

use crate::error::PipelineError;

const WEEK_DAYS: f64 = 7.0;

const MIN_RECIPROCAL_CONDITION: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelSpec {
    /// Fourier order of the weekly component (0 disables it)
    pub weekly_order: usize,
    /// Weekly terms are only fitted with at least this many points
    pub min_points_for_weekly: usize,
    /// Coverage of the prediction interval, e.g. 0.80
    pub interval_width: f64,
}

impl Default for ModelSpec {
    fn default() -> Self {
        Self {
            weekly_order: 3,
            min_points_for_weekly: 14,
            interval_width: 0.80,
        }
    }
}

/// Point forecast with interval bounds for one future date
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub ds: NaiveDate,
    pub yhat: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone)]
pub struct FittedModel {
    origin: NaiveDate,
    last_date: NaiveDate,
    time_scale: f64,
    value_scale: f64,
    weekly_order: usize,
    beta: DVector<f64>,
    xtx_inv: DMatrix<f64>,
    sigma2: f64,
    z: f64,
}

/// Two-sided normal quantile: the z with P(|Z| <= z) = `interval_width`
pub fn z_score(interval_width: f64) -> f64 {
    let width = interval_width.clamp(1e-9, 1.0 - 1e-12);
    inverse_normal_cdf(0.5 + width / 2.0)
}

/// Acklam's rational approximation of the standard normal quantile
/// (relative error below 1.2e-9 on (0, 1))
fn inverse_normal_cdf(p: f64) -> f64 {
    const A: [f64; 6] = [
        -3.969683028665376e1,
        2.209460984245205e2,
        -2.759285104469687e2,
        1.383577518672690e2,
        -3.066479806614716e1,
        2.506628277459239e0,
    ];
    const B: [f64; 5] = [
        -5.447609879822406e1,
        1.615858368580409e2,
        -1.556989798598866e2,
        6.680131188771972e1,
        -1.328068155288572e1,
    ];
    const C: [f64; 6] = [
        -7.784894002430293e-3,
        -3.223964580411365e-1,
        -2.400758277161838e0,
        -2.549732539343734e0,
        4.374664141464968e0,
        2.938163982698783e0,
    ];
    const D: [f64; 4] = [
        7.784695709041462e-3,
        3.224671290700398e-1,
        2.445134137142996e0,
        3.754408661907416e0,
    ];
    const P_LOW: f64 = 0.02425;

    if p < P_LOW {
        let q = (-2.0 * p.ln()).sqrt();
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= 1.0 - P_LOW {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        -inverse_normal_cdf(1.0 - p)
    }
}

impl FittedModel {
    /// Fit on `(date, value)` pairs with strictly increasing dates
    pub fn fit(history: &[(NaiveDate, f64)], spec: &ModelSpec) -> Result<Self, PipelineError> {
        let (origin, last_date) = match (history.first(), history.last()) {
            (Some(first), Some(last)) => (first.0, last.0),
            _ => return Err(PipelineError::ModelFitError("empty history".to_string())),
        };

        if history.windows(2).any(|w| w[1].0 <= w[0].0) {
            return Err(PipelineError::ModelFitError(
                "history dates must be strictly increasing".to_string(),
            ));
        }
        if history.iter().any(|(_, y)| !y.is_finite()) {
            return Err(PipelineError::ModelFitError(
                "history contains non-finite values".to_string(),
            ));
        }

        let weekly_order = if history.len() >= spec.min_points_for_weekly {
            spec.weekly_order
        } else {
            0
        };

        let span_days = (last_date - origin).num_days().max(1) as f64;
        let value_scale = history
            .iter()
            .map(|(_, y)| y.abs())
            .fold(0.0_f64, f64::max)
            .max(1.0);

        let n = history.len();
        let k = 2 + 2 * weekly_order;
        if n <= k {
            return Err(PipelineError::ModelFitError(format!(
                "{} points cannot fit {} parameters",
                n, k
            )));
        }

        let mut x_data = Vec::with_capacity(n * k);
        let mut y_data = Vec::with_capacity(n);
        for (date, y) in history {
            let t = (*date - origin).num_days() as f64;
            x_data.extend(design_row(t, span_days, weekly_order));
            y_data.push(y / value_scale);
        }

        let x = DMatrix::from_row_slice(n, k, &x_data);
        let y = DVector::from_vec(y_data);

        // OLS: β = (X'X)^(-1) X'y
        let xtx = x.transpose() * &x;

        // Near-collinear columns (e.g. every point on the same weekday) make the
        // inverse numerically meaningless even when LU succeeds
        let singular_values = xtx.singular_values();
        if !(singular_values.min() > singular_values.max() * MIN_RECIPROCAL_CONDITION) {
            return Err(PipelineError::ModelFitError(
                "design matrix is rank deficient".to_string(),
            ));
        }

        let xtx_inv = xtx.try_inverse().ok_or_else(|| {
            PipelineError::ModelFitError("singular design matrix".to_string())
        })?;
        let beta = &xtx_inv * (x.transpose() * &y);

        let residuals = &y - &x * &beta;
        let sigma2 = residuals.iter().map(|r| r * r).sum::<f64>() / (n - k) as f64;

        if !sigma2.is_finite() || beta.iter().any(|b| !b.is_finite()) {
            return Err(PipelineError::ModelFitError(
                "least squares produced non-finite coefficients".to_string(),
            ));
        }

        Ok(Self {
            origin,
            last_date,
            time_scale: span_days,
            value_scale,
            weekly_order,
            beta,
            xtx_inv,
            sigma2,
            z: z_score(spec.interval_width),
        })
    }

    pub fn last_date(&self) -> NaiveDate {
        self.last_date
    }

    /// Residual standard deviation in the original units
    pub fn sigma(&self) -> f64 {
        self.sigma2.sqrt() * self.value_scale
    }

    /// Forecast `horizon` consecutive days starting the day after the last observation
    pub fn forecast(&self, horizon: usize) -> Result<Vec<Prediction>, PipelineError> {
        let mut predictions = Vec::with_capacity(horizon);

        for step in 1..=horizon {
            let ds = self.last_date + chrono::Duration::days(step as i64);
            let t = (ds - self.origin).num_days() as f64;
            let row = DVector::from_vec(design_row(t, self.time_scale, self.weekly_order));

            let yhat = row.dot(&self.beta);
            let leverage = (row.transpose() * &self.xtx_inv * &row)[(0, 0)].max(0.0);
            let se = (self.sigma2 * (1.0 + leverage)).sqrt();
            let half_width = self.z * se;

            let prediction = Prediction {
                ds,
                yhat: yhat * self.value_scale,
                lower: (yhat - half_width) * self.value_scale,
                upper: (yhat + half_width) * self.value_scale,
            };

            if !(prediction.yhat.is_finite() && prediction.lower.is_finite() && prediction.upper.is_finite()) {
                return Err(PipelineError::ModelFitError(format!(
                    "non-finite forecast for {}",
                    ds
                )));
            }

            predictions.push(prediction);
        }

        Ok(predictions)
    }
}

fn design_row(t: f64, time_scale: f64, weekly_order: usize) -> Vec<f64> {
    let mut row = Vec::with_capacity(2 + 2 * weekly_order);
    row.push(1.0);
    row.push(t / time_scale);
    for order in 1..=weekly_order {
        let angle = 2.0 * PI * order as f64 * t / WEEK_DAYS;
        row.push(angle.sin());
        row.push(angle.cos());
    }
    row
}
