use anyhow::{bail, Result};

/// Locally smoothed baseline methylation, one value per chromosome position.
///
/// Positions without enough local support hold NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct SmoothedProfile {
    values: Vec<f64>,
}

impl SmoothedProfile {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// Builds a profile of `len` positions from `(position, value)` pairs.
    /// Unlisted positions stay NaN.
    pub fn from_points<I>(len: usize, points: I) -> Result<Self>
    where
        I: IntoIterator<Item = (usize, f64)>,
    {
        let mut values = vec![f64::NAN; len];
        for (position, value) in points {
            if position >= len {
                bail!(
                    "Smoothed value at position {} is beyond the chromosome length ({})",
                    position,
                    len
                );
            }
            values[position] = value;
        }
        Ok(Self { values })
    }

    /// Smoothed value at `position`, NaN past the end of the profile.
    #[inline]
    pub fn get(&self, position: usize) -> f64 {
        self.values.get(position).copied().unwrap_or(f64::NAN)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_points() -> Result<()> {
        let profile = SmoothedProfile::from_points(4, vec![(0, 0.5), (2, 0.25)])?;
        assert_eq!(profile.len(), 4);
        assert_eq!(profile.get(0), 0.5);
        assert!(profile.get(1).is_nan());
        assert_eq!(profile.get(2), 0.25);
        assert!(profile.get(10).is_nan());
        Ok(())
    }

    #[test]
    fn test_point_beyond_length() {
        let result = SmoothedProfile::from_points(2, vec![(2, 0.1)]);
        assert!(result.is_err());
    }
}
