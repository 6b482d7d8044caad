use serde::{Deserialize, Serialize};

/// Fitted ridge-regression model. `width` is fixed at the first fit;
/// prediction inputs of a different width are padded or truncated.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TrainedModel {
    pub weights: Vec<f64>,
    pub intercept: f64,
    pub width: usize,
}

impl TrainedModel {
    pub fn predict(&self, features: &[f64]) -> f64 {
        let mut y = self.intercept;
        for (i, w) in self.weights.iter().enumerate() {
            y += w * features.get(i).copied().unwrap_or(0.0);
        }
        y
    }
}

/// Ridge fit by normal equations over the samples, intercept included as
/// an augmented column and left unregularized. Returns `None` when there
/// are no samples or the system is degenerate.
pub fn fit(samples: &[(Vec<f64>, f64)], lambda: f64) -> Option<TrainedModel> {
    let width = samples.iter().map(|(x, _)| x.len()).max()?;
    if width == 0 {
        return None;
    }
    let n = width + 1;

    // a = X'X + lambda*I (diagonal except the intercept), b = X'y.
    let mut a = vec![vec![0.0f64; n]; n];
    let mut b = vec![0.0f64; n];
    for (x, y) in samples {
        let row = |i: usize| {
            if i < width {
                x.get(i).copied().unwrap_or(0.0)
            } else {
                1.0
            }
        };
        for i in 0..n {
            b[i] += row(i) * y;
            for j in 0..n {
                a[i][j] += row(i) * row(j);
            }
        }
    }
    for (i, row) in a.iter_mut().enumerate().take(width) {
        row[i] += lambda;
    }

    let solution = solve(a, b)?;
    let intercept = solution[width];
    let mut weights = solution;
    weights.truncate(width);
    Some(TrainedModel {
        weights,
        intercept,
        width,
    })
}

/// Gaussian elimination with partial pivoting; `None` on a singular system.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| {
            a[i][col]
                .abs()
                .partial_cmp(&a[j][col].abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0f64; n];
    for row in (0..n).rev() {
        let mut sum = b[row];
        for col in row + 1..n {
            sum -= a[row][col] * x[col];
        }
        x[row] = sum / a[row][row];
    }
    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}
