/// Adjusted p-values for hypotheses ranked against permuted (null) data.
///
/// `is_real` must be sorted by descending test statistic; `true` marks a
/// hypothesis from the real data and `false` one from permuted data. The
/// empirical p-value of each entry is the fraction of permuted hypotheses
/// ranked at or above it. Each value is then scaled by `n_real / rank`, where
/// rank counts real hypotheses at or above the entry, and a running minimum
/// from the least to the most significant entry keeps the result monotone.
/// Values are clipped to 1 and returned in input order.
pub fn empirical_fdr(is_real: &[bool]) -> Vec<f64> {
    let n_permuted = is_real.iter().filter(|&&real| !real).count();
    let n_real = is_real.len() - n_permuted;

    let mut seen_permuted = 0usize;
    let mut seen_real = 0usize;

    let mut adjusted: Vec<f64> = is_real
        .iter()
        .map(|&real| {
            if real {
                seen_real += 1;
            } else {
                seen_permuted += 1;
            }

            let pvalue = if n_permuted == 0 {
                0.0
            } else {
                seen_permuted as f64 / n_permuted as f64
            };

            if seen_real == 0 {
                f64::INFINITY
            } else {
                pvalue * n_real as f64 / seen_real as f64
            }
        })
        .collect();

    let mut running_min = f64::INFINITY;
    for value in adjusted.iter_mut().rev() {
        running_min = running_min.min(*value);
        *value = running_min.min(1.0);
    }

    adjusted
}

/// Benjamini-Hochberg adjustment of raw p-values, in input order.
pub fn benjamini_hochberg(pvalues: &[f64]) -> Vec<f64> {
    adjustp::adjust(pvalues, adjustp::Procedure::BenjaminiHochberg)
}
