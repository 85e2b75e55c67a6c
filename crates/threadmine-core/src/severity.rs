use serde::{Deserialize, Serialize};

/// Canonical severity of a problem cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    /// Integer weight applied to a cluster's frequency to score an idea.
    pub fn multiplier(self) -> i64 {
        match self {
            Severity::High => 3,
            Severity::Medium => 2,
            Severity::Low => 1,
        }
    }

    /// `frequency * multiplier`, clamped so a nonsensical negative frequency
    /// from the model can never produce a negative score.
    pub fn score(self, frequency: i64) -> i64 {
        frequency.max(0) * self.multiplier()
    }
}

/// Map whatever severity text the model produced onto the canonical scale.
///
/// Total over all inputs. Compound values ("medium-high") resolve to the
/// stronger interpretation rules below; anything unrecognized defaults to
/// medium. The medium default is a deliberate policy, revisited in DESIGN.md.
pub fn normalize_severity(raw: Option<&str>) -> Severity {
    let Some(raw) = raw else {
        return Severity::Medium;
    };
    let value = raw.trim().to_ascii_lowercase();

    match value.as_str() {
        "low" => return Severity::Low,
        "medium" => return Severity::Medium,
        "high" => return Severity::High,
        _ => {}
    }

    let has_low = value.contains("low") || value.contains("minor");
    let has_medium = value.contains("medium") || value.contains("moderate");
    let has_high = value.contains("high");

    match (has_low, has_medium, has_high) {
        (_, true, true) => Severity::High,
        (true, true, _) | (true, _, true) => Severity::Medium,
        (false, false, true) => Severity::High,
        (false, true, false) => Severity::Medium,
        (true, false, false) => Severity::Low,
        (false, false, false) => Severity::Medium,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_values_pass_through() {
        assert_eq!(normalize_severity(Some("low")), Severity::Low);
        assert_eq!(normalize_severity(Some("medium")), Severity::Medium);
        assert_eq!(normalize_severity(Some("high")), Severity::High);
        assert_eq!(normalize_severity(Some("HIGH")), Severity::High);
        assert_eq!(normalize_severity(Some("  Low ")), Severity::Low);
    }

    #[test]
    fn compound_values_resolve() {
        assert_eq!(normalize_severity(Some("medium-high")), Severity::High);
        assert_eq!(normalize_severity(Some("high/medium")), Severity::High);
        assert_eq!(normalize_severity(Some("low-medium")), Severity::Medium);
        assert_eq!(normalize_severity(Some("high to low")), Severity::Medium);
    }

    #[test]
    fn synonyms_map_to_tokens() {
        assert_eq!(normalize_severity(Some("moderate")), Severity::Medium);
        assert_eq!(normalize_severity(Some("minor")), Severity::Low);
        assert_eq!(normalize_severity(Some("very high impact")), Severity::High);
    }

    #[test]
    fn unrecognized_and_absent_default_to_medium() {
        assert_eq!(normalize_severity(Some("")), Severity::Medium);
        assert_eq!(normalize_severity(Some("critical")), Severity::Medium);
        assert_eq!(normalize_severity(None), Severity::Medium);
    }

    #[test]
    fn score_is_frequency_times_multiplier() {
        assert_eq!(Severity::High.score(5), 15);
        assert_eq!(Severity::Medium.score(2), 4);
        assert_eq!(Severity::Low.score(7), 7);
        assert_eq!(Severity::High.score(-3), 0);
    }
}
