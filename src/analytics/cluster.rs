//! Deterministic k-means used to group countries by similarity.
//!
//! Seeding takes the first `k` inputs rather than random restarts. That
//! biases results toward input order but makes every response reproducible
//! for the same query, which the API contract requires.

const MAX_ITER_1D: usize = 100;
const MAX_ITER_CORRELATION: usize = 10;

/// Lloyd's algorithm on scalar values, nearest center by absolute difference.
/// Returns a cluster index in `[0, k)` per input point.
///
/// With fewer points than `k` the algorithm is skipped and every point gets
/// its own index.
pub fn kmeans_1d(values: &[f64], k: usize) -> Vec<usize> {
    let n = values.len();
    if n < k {
        return (0..n).collect();
    }

    let mut centers: Vec<f64> = values[..k].to_vec();
    let mut assignments = vec![0usize; n];

    for _ in 0..MAX_ITER_1D {
        let mut changed = false;
        for (i, v) in values.iter().enumerate() {
            let nearest = centers
                .iter()
                .enumerate()
                .min_by(|(_, a), (_, b)| (v - *a).abs().total_cmp(&(v - *b).abs()))
                .map(|(idx, _)| idx)
                .unwrap_or(0);
            if assignments[i] != nearest {
                assignments[i] = nearest;
                changed = true;
            }
        }
        if !changed {
            break;
        }

        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<f64> = values
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == c)
                .map(|(v, _)| *v)
                .collect();
            // Empty clusters keep their previous center
            if !members.is_empty() {
                *center = members.iter().sum::<f64>() / members.len() as f64;
            }
        }
    }

    assignments
}

/// Pearson product-moment correlation. Returns 0.0 when either series is
/// constant (zero variance).
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n == 0 {
        return 0.0;
    }
    let n_f = n as f64;
    let mean_x: f64 = x[..n].iter().sum::<f64>() / n_f;
    let mean_y: f64 = y[..n].iter().sum::<f64>() / n_f;

    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (xi, yi) in x[..n].iter().zip(&y[..n]) {
        let dx = xi - mean_x;
        let dy = yi - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    let denom = (var_x * var_y).sqrt();
    if denom == 0.0 {
        return 0.0;
    }
    cov / denom
}

/// K-means over aligned time-series vectors, assigning by maximum Pearson
/// correlation instead of minimum distance. Vectors are first truncated to
/// the shortest common length; centers are element-wise means of their
/// members. Returns a cluster index per input vector.
pub fn kmeans_correlation(vectors: &[Vec<f64>], k: usize) -> Vec<usize> {
    let n = vectors.len();
    if n < k {
        return (0..n).collect();
    }

    let min_len = vectors.iter().map(|v| v.len()).min().unwrap_or(0);
    if min_len == 0 {
        return vec![0; n];
    }
    let truncated: Vec<&[f64]> = vectors.iter().map(|v| &v[..min_len]).collect();

    let mut centers: Vec<Vec<f64>> = truncated[..k].iter().map(|v| v.to_vec()).collect();
    let mut assignments = vec![0usize; n];

    for _ in 0..MAX_ITER_CORRELATION {
        for (i, v) in truncated.iter().enumerate() {
            let mut best = 0usize;
            let mut best_score = f64::NEG_INFINITY;
            for (c, center) in centers.iter().enumerate() {
                let score = pearson(v, center);
                if score > best_score {
                    best_score = score;
                    best = c;
                }
            }
            assignments[i] = best;
        }

        let mut any_center_changed = false;
        for (c, center) in centers.iter_mut().enumerate() {
            let members: Vec<&[f64]> = truncated
                .iter()
                .zip(&assignments)
                .filter(|(_, &a)| a == c)
                .map(|(v, _)| *v)
                .collect();
            if members.is_empty() {
                continue;
            }
            let mut new_center = vec![0.0; min_len];
            for m in &members {
                for (acc, v) in new_center.iter_mut().zip(*m) {
                    *acc += v;
                }
            }
            for acc in &mut new_center {
                *acc /= members.len() as f64;
            }
            if new_center != *center {
                *center = new_center;
                any_center_changed = true;
            }
        }
        if !any_center_changed {
            break;
        }
    }

    assignments
}
