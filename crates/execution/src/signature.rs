//! Input fingerprint used to skip runs that would change nothing.

/// Aggregate fingerprint of a run's inputs.
///
/// Area values are quantized to thousandths so float noise from repeated
/// parsing does not defeat the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunSignature {
    total_remaining_milli: i64,
    daily_capacity_milli: i64,
    item_count: usize,
}

impl RunSignature {
    /// Fingerprint of total remaining workload, daily capacity and item count.
    pub fn new(total_remaining: f64, daily_capacity: f64, item_count: usize) -> Self {
        Self {
            total_remaining_milli: quantize(total_remaining),
            daily_capacity_milli: quantize(daily_capacity),
            item_count,
        }
    }

    /// Number of items covered.
    pub fn item_count(&self) -> usize {
        self.item_count
    }
}

fn quantize(v: f64) -> i64 {
    if v.is_finite() {
        (v * 1000.0).round() as i64
    } else {
        i64::MIN
    }
}

impl std::fmt::Display for RunSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "remaining={:.3}/capacity={:.3}/items={}",
            self.total_remaining_milli as f64 / 1000.0,
            self.daily_capacity_milli as f64 / 1000.0,
            self.item_count
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equal_inputs_equal_signatures() {
        assert_eq!(RunSignature::new(160.0, 80.0, 2), RunSignature::new(160.0000001, 80.0, 2));
    }

    #[test]
    fn test_any_component_changes_signature() {
        let base = RunSignature::new(160.0, 80.0, 2);
        assert_ne!(base, RunSignature::new(150.0, 80.0, 2));
        assert_ne!(base, RunSignature::new(160.0, 70.0, 2));
        assert_ne!(base, RunSignature::new(160.0, 80.0, 3));
    }

    #[test]
    fn test_display() {
        assert_eq!(
            RunSignature::new(160.0, 80.0, 2).to_string(),
            "remaining=160.000/capacity=80.000/items=2"
        );
    }
}
