//! Summary statistics that skip missing values, mirroring the usual
//! `nanmean`/`nanvar`/`nanquantile` semantics.

fn defined(values: &[f64]) -> impl Iterator<Item = f64> + '_ {
    values.iter().copied().filter(|v| !v.is_nan())
}

pub fn nanmean(values: &[f64]) -> f64 {
    let (sum, n) = defined(values).fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
    if n == 0 {
        f64::NAN
    } else {
        sum / n as f64
    }
}

/// Population variance (ddof = 0) of the non-NaN values.
pub fn nanvar(values: &[f64]) -> f64 {
    let mean = nanmean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let (sq, n) = defined(values).fold((0.0, 0usize), |(sq, n), v| {
        (sq + (v - mean) * (v - mean), n + 1)
    });
    sq / n as f64
}

/// Variance of the defined entries of an optional series.
pub fn variance_of_defined(values: &[Option<f64>]) -> f64 {
    let values: Vec<f64> = values.iter().map(|v| v.unwrap_or(f64::NAN)).collect();
    nanvar(&values)
}

/// `q`-quantile of the non-NaN values, linearly interpolated between the
/// closest ranks. `q` is clamped to `[0, 1]`.
pub fn nanquantile(values: &[f64], q: f64) -> f64 {
    let mut sorted: Vec<f64> = defined(values).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let rank = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let weight = rank - lower as f64;

    sorted[lower] + (sorted[upper] - sorted[lower]) * weight
}
