use anyhow::{bail, Result};

/// Merged high-variance intervals of one chromosome, ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Peaks {
    pub starts: Vec<u64>,
    pub ends: Vec<u64>,
}

impl Peaks {
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        self.starts.iter().copied().zip(self.ends.iter().copied())
    }
}

/// Merges windows whose smoothed variance reaches `var_cutoff` into peaks.
///
/// Every active window covers `[center - half_bw, center + half_bw]`. A run of
/// consecutive active windows forms one peak. After inactive windows, the next
/// active window rejoins the previous peak only when its footprint touches or
/// overlaps it. NaN variances are never active and starts are clamped at 0.
///
/// # Arguments
/// - `smoothed_vars`: variance per window, in coordinate order.
/// - `window_centers`: genomic center of each window, ascending.
/// - `var_cutoff`: minimum variance of an active window.
/// - `half_bw`: half of the smoothing bandwidth.
///
/// # Errors
/// Returns an error if the two input slices differ in length.
pub fn find_peaks(
    smoothed_vars: &[f64],
    window_centers: &[u64],
    var_cutoff: f64,
    half_bw: u64,
) -> Result<Peaks> {
    if smoothed_vars.len() != window_centers.len() {
        bail!(
            "Got {} window variances but {} window centers",
            smoothed_vars.len(),
            window_centers.len()
        );
    }

    let mut peaks = Peaks::default();
    let mut current: Option<(u64, u64)> = None;
    let mut in_peak = false;

    for (&var, &center) in smoothed_vars.iter().zip(window_centers) {
        if var.is_nan() || var < var_cutoff {
            in_peak = false;
            continue;
        }

        let start = center.saturating_sub(half_bw);
        let end = center + half_bw;

        current = match current {
            // consecutive active windows always extend the open peak
            Some((peak_start, peak_end)) if in_peak || start <= peak_end => {
                Some((peak_start, peak_end.max(end)))
            }
            Some((peak_start, peak_end)) => {
                peaks.starts.push(peak_start);
                peaks.ends.push(peak_end);
                Some((start, end))
            }
            None => Some((start, end)),
        };
        in_peak = true;
    }

    if let Some((peak_start, peak_end)) = current {
        peaks.starts.push(peak_start);
        peaks.ends.push(peak_end);
    }

    Ok(peaks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    const TEST_VARS1: [f64; 35] = [
        0.6, 0.1, 0.2, 0.1, 0.5, 0.4, 0.6, 0.4, 0.5, 0.4, 0.5, 0.4, 0.7, 0.8, 0.9, 1.0, 0.1, 0.6,
        0.4, 0.2, 0.1, 0.1, 0.2, 0.1, 0.7, 0.1, 0.1, 0.2, 0.1, 0.2, 0.1, 0.2, 0.1, 0.2, 0.6,
    ];

    const TEST_VARS2: [f64; 56] = [
        0.0, f64::NAN, 0.0, 0.5, 0.2, 0.2, 0.2, 0.2, 0.5, 0.2, 0.2, 0.2, 0.5, 0.2, 0.2, 0.5, 0.2,
        0.5, 0.2, 0.5, 0.2, 0.5, 0.0, 0.0, 0.0, 0.0, 0.5, 0.5, 0.2, 0.2, 0.2, 0.2, 0.5, 0.5, 0.2,
        0.2, 0.2, 0.5, 0.5, 0.2, 0.2, 0.5, 0.5, 0.2, 0.5, 0.5, 0.2, 0.5, 0.5, 0.2, 0.5, 0.5, 0.0,
        0.0, 0.0, 0.0,
    ];

    fn window_centers(n: usize, stepsize: u64, half_bw: u64) -> Vec<u64> {
        (0..n as u64).map(|i| i * stepsize + half_bw).collect()
    }

    #[rstest]
    #[case(&TEST_VARS1, 2000, 100, 0.55, vec![0], vec![5400])]
    #[case(&TEST_VARS1, 200, 100, 0.55, vec![0, 600, 1200, 2400, 3400], vec![200, 800, 1900, 2600, 3600])]
    #[case(
        &TEST_VARS1, 2000, 2000, 0.55,
        vec![0, 12000, 24000, 34000, 48000, 68000],
        vec![2000, 14000, 32000, 36000, 50000, 70000]
    )]
    #[case(
        &TEST_VARS1, 100, 200, 0.55,
        vec![0, 1200, 2400, 3400, 4800, 6800],
        vec![100, 1300, 3100, 3500, 4900, 6900]
    )]
    #[case(
        &TEST_VARS1, 398, 200, 0.55,
        vec![0, 1200, 2400, 3400, 4800, 6800],
        vec![398, 1598, 3398, 3798, 5198, 7198]
    )]
    #[case(&TEST_VARS1, 450, 200, 0.25, vec![0, 800, 4800, 6800], vec![450, 4050, 5250, 7250])]
    #[case(&TEST_VARS1, 250, 100, 0.85, vec![1400], vec![1750])]
    #[case(
        &TEST_VARS2, 300, 100, 0.3,
        vec![300, 800, 1200, 2600, 3200, 3700],
        vec![600, 1100, 2400, 3000, 3600, 5400]
    )]
    fn test_find_peaks(
        #[case] smoothed_vars: &[f64],
        #[case] bandwidth: u64,
        #[case] stepsize: u64,
        #[case] var_cutoff: f64,
        #[case] expected_starts: Vec<u64>,
        #[case] expected_ends: Vec<u64>,
    ) {
        let half_bw = bandwidth / 2;
        let centers = window_centers(smoothed_vars.len(), stepsize, half_bw);

        let peaks = find_peaks(smoothed_vars, &centers, var_cutoff, half_bw).unwrap();

        assert_eq!(peaks.starts, expected_starts);
        assert_eq!(peaks.ends, expected_ends);
    }

    #[test]
    fn test_isolated_window_spans_bandwidth() {
        let peaks = find_peaks(&[0.1, 0.9, 0.1], &[1000, 1100, 1200], 0.5, 100).unwrap();
        assert_eq!(peaks.iter().collect::<Vec<_>>(), vec![(1000, 1200)]);
    }

    #[test]
    fn test_gap_splits_only_without_overlap() {
        // one inactive window between two active ones
        let vars = [0.9, 0.1, 0.9];
        let centers = [1000, 1100, 1200];

        let apart = find_peaks(&vars, &centers, 0.5, 50).unwrap();
        assert_eq!(apart.len(), 2);

        let overlapping = find_peaks(&vars, &centers, 0.5, 150).unwrap();
        assert_eq!(overlapping.iter().collect::<Vec<_>>(), vec![(850, 1350)]);
    }

    #[test]
    fn test_consecutive_windows_merge_without_overlap() {
        let peaks = find_peaks(&[0.9, 0.9], &[1000, 1200], 0.5, 50).unwrap();
        assert_eq!(peaks.iter().collect::<Vec<_>>(), vec![(950, 1250)]);

        // a NaN window ends the run like any inactive window
        let split = find_peaks(&[0.9, f64::NAN, 0.9], &[1000, 1200, 1400], 0.5, 50).unwrap();
        assert_eq!(split.iter().collect::<Vec<_>>(), vec![(950, 1050), (1350, 1450)]);
    }

    #[test]
    fn test_cutoff_is_inclusive_and_start_clamped() {
        let peaks = find_peaks(&[0.5, f64::NAN], &[30, 130], 0.5, 100).unwrap();
        assert_eq!(peaks.iter().collect::<Vec<_>>(), vec![(0, 130)]);
    }

    #[test]
    fn test_no_active_windows() {
        let peaks = find_peaks(&[0.1, f64::NAN], &[10, 20], 0.5, 5).unwrap();
        assert!(peaks.is_empty());
        assert!(find_peaks(&[], &[], 0.5, 5).unwrap().is_empty());
    }

    #[test]
    fn test_length_mismatch() {
        assert!(find_peaks(&[0.1], &[10, 20], 0.5, 5).is_err());
    }
}
