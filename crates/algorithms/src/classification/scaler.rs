//! Column standardization (z-score)

use ndarray::{Array1, Array2, Axis};

/// Per-column mean and scale fitted on a feature matrix.
///
/// Scale is the population standard deviation; a constant column keeps a
/// scale of 1 so it is centred without dividing by zero.
#[derive(Debug, Clone, PartialEq)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
}

impl StandardScaler {
    /// Fit on the rows of `x` (samples x features).
    pub fn fit(x: &Array2<f64>) -> Self {
        let rows = x.nrows().max(1) as f64;
        let mean = x.sum_axis(Axis(0)) / rows;

        let mut var = Array1::<f64>::zeros(x.ncols());
        for row in x.axis_iter(Axis(0)) {
            for ((v, &value), &m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) {
                *v += (value - m).powi(2);
            }
        }
        let scale = var.mapv(|v| {
            let std = (v / rows).sqrt();
            if std < 10.0 * f64::EPSILON || !std.is_finite() {
                1.0
            } else {
                std
            }
        });

        Self { mean, scale }
    }

    pub fn transform(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean) / &self.scale
    }

    pub fn fit_transform(x: &Array2<f64>) -> Array2<f64> {
        Self::fit(x).transform(x)
    }

    pub fn mean(&self) -> &Array1<f64> {
        &self.mean
    }

    pub fn scale(&self) -> &Array1<f64> {
        &self.scale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_zscore_columns() {
        let x = array![[1.0, 10.0], [2.0, 10.0], [3.0, 10.0]];
        let scaler = StandardScaler::fit(&x);
        let z = scaler.transform(&x);

        assert_relative_eq!(scaler.mean()[0], 2.0);
        assert_relative_eq!(scaler.scale()[0], (2.0_f64 / 3.0).sqrt(), epsilon = 1e-12);
        assert_relative_eq!(z[(0, 0)], -z[(2, 0)], epsilon = 1e-12);
        assert_relative_eq!(z[(1, 0)], 0.0);

        let col_mean: f64 = z.column(0).sum() / 3.0;
        let col_var: f64 = z.column(0).iter().map(|v| v * v).sum::<f64>() / 3.0;
        assert_relative_eq!(col_mean, 0.0, epsilon = 1e-12);
        assert_relative_eq!(col_var, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_constant_column_is_centred_only() {
        let x = array![[0.5, 1.0], [0.5, 3.0]];
        let z = StandardScaler::fit_transform(&x);
        assert_eq!(z[(0, 0)], 0.0);
        assert_eq!(z[(1, 0)], 0.0);
        assert!(z.iter().all(|v| v.is_finite()));
    }
}
