use serde::{Deserialize, Serialize};

/// Held-out regression metrics. Reported only; they never gate a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionMetrics {
    pub samples: usize,
    pub mse: f64,
    /// Absent when the held-out target has no variance.
    pub r2: Option<f64>,
    pub explained_variance: Option<f64>,
}

impl RegressionMetrics {
    pub fn compute(actual: &[f64], predicted: &[f64]) -> Self {
        let n = actual.len().min(predicted.len());
        if n == 0 {
            return Self {
                samples: 0,
                mse: 0.0,
                r2: None,
                explained_variance: None,
            };
        }
        let count = n as f64;
        let actual = &actual[..n];
        let residuals: Vec<f64> = actual
            .iter()
            .zip(predicted)
            .map(|(real, guess)| real - guess)
            .collect();

        let ss_res: f64 = residuals.iter().map(|r| r * r).sum();
        let target_variance = variance(actual);
        let (r2, explained_variance) = if target_variance > 0.0 {
            (
                Some(1.0 - (ss_res / count) / target_variance),
                Some(1.0 - variance(&residuals) / target_variance),
            )
        } else {
            (None, None)
        };

        Self {
            samples: n,
            mse: ss_res / count,
            r2,
            explained_variance,
        }
    }
}

fn variance(values: &[f64]) -> f64 {
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}
