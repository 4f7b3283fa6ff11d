//! Weighted operation mix and per-iteration operation selection

use crate::error::{EngineError, EngineResult};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Tolerance on the weight sum of a validated mix.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-3;

/// Kind of call a virtual user issues in one iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Lookup of one entity by id.
    Read,
    /// Query by search term.
    Search,
    /// Create of a freshly generated record.
    Write,
}

impl OperationKind {
    /// All kinds in declaration order.
    pub const ALL: [OperationKind; 3] = [Self::Read, Self::Search, Self::Write];

    /// Label used in logs, metrics and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Search => "search",
            Self::Write => "write",
        }
    }

    /// Dense index, used to address per-kind counter arrays.
    pub fn index(&self) -> usize {
        match self {
            Self::Read => 0,
            Self::Search => 1,
            Self::Write => 2,
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One weighted entry of an [`OperationMix`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightedOperation {
    pub kind: OperationKind,
    /// Probability of choosing this kind (0.0-1.0)
    pub weight: f64,
}

/// Ordered, validated set of weighted operation kinds.
///
/// Construction goes through [`OperationMix::new`] or
/// [`OperationMix::from_percentages`], both of which fail fast on malformed
/// input, so a value of this type always has weights summing to 1.0.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OperationMix {
    entries: Vec<WeightedOperation>,
}

impl OperationMix {
    /// Build a mix from explicit weights.
    pub fn new(entries: Vec<WeightedOperation>) -> EngineResult<Self> {
        if entries.is_empty() {
            return Err(EngineError::InvalidMix("mix has no operations".to_string()));
        }

        for entry in &entries {
            if !entry.weight.is_finite() || !(0.0..=1.0).contains(&entry.weight) {
                return Err(EngineError::InvalidMix(format!(
                    "weight {} for {} is outside [0, 1]",
                    entry.weight, entry.kind
                )));
            }
        }

        for (i, entry) in entries.iter().enumerate() {
            if entries[..i].iter().any(|e| e.kind == entry.kind) {
                return Err(EngineError::InvalidMix(format!(
                    "{} appears more than once",
                    entry.kind
                )));
            }
        }

        let sum: f64 = entries.iter().map(|e| e.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(EngineError::InvalidMix(format!(
                "weights sum to {}, expected 1.0",
                sum
            )));
        }

        Ok(Self { entries })
    }

    /// Build a Read/Search/Write mix from whole percentages that sum to 100.
    pub fn from_percentages(read: f64, search: f64, write: f64) -> EngineResult<Self> {
        let sum = read + search + write;
        if [read, search, write].iter().any(|p| !p.is_finite() || *p < 0.0) {
            return Err(EngineError::InvalidMix(
                "percentages must be non-negative".to_string(),
            ));
        }
        if (sum - 100.0).abs() > 0.1 {
            return Err(EngineError::InvalidMix(format!(
                "percentages sum to {}, expected 100",
                sum
            )));
        }

        Self::new(vec![
            WeightedOperation {
                kind: OperationKind::Read,
                weight: read / 100.0,
            },
            WeightedOperation {
                kind: OperationKind::Search,
                weight: search / 100.0,
            },
            WeightedOperation {
                kind: OperationKind::Write,
                weight: write / 100.0,
            },
        ])
    }

    /// 60% read, 20% search, 20% write. Every shipped load scenario uses it.
    pub fn standard() -> Self {
        Self {
            entries: vec![
                WeightedOperation {
                    kind: OperationKind::Read,
                    weight: 0.6,
                },
                WeightedOperation {
                    kind: OperationKind::Search,
                    weight: 0.2,
                },
                WeightedOperation {
                    kind: OperationKind::Write,
                    weight: 0.2,
                },
            ],
        }
    }

    pub fn entries(&self) -> &[WeightedOperation] {
        &self.entries
    }

    /// Pick one kind using cumulative-weight sampling.
    ///
    /// Draws `r` in `[0, 1)` and returns the first kind whose cumulative
    /// weight reaches `r`. Falls back to [`OperationKind::Read`] when rounding
    /// leaves the cumulative sum just short of `r`.
    pub fn select<R: Rng + ?Sized>(&self, rng: &mut R) -> OperationKind {
        let roll: f64 = rng.gen();
        self.select_with(roll)
    }

    /// Deterministic core of [`OperationMix::select`] for a given roll.
    pub fn select_with(&self, roll: f64) -> OperationKind {
        let mut cumulative = 0.0;
        for entry in &self.entries {
            cumulative += entry.weight;
            if cumulative >= roll && entry.weight > 0.0 {
                return entry.kind;
            }
        }

        OperationKind::Read
    }

    /// Short description such as `read 60% / search 20% / write 20%`.
    pub fn description(&self) -> String {
        self.entries
            .iter()
            .map(|e| format!("{} {:.0}%", e.kind, e.weight * 100.0))
            .collect::<Vec<_>>()
            .join(" / ")
    }
}

impl Default for OperationMix {
    fn default() -> Self {
        Self::standard()
    }
}

/// `read 60%, search 20%, write 20%`
impl fmt::Display for OperationMix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}%", entry.kind, (entry.weight * 100.0).round())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_standard_mix_proportions_converge() {
        let mix = OperationMix::standard();
        let mut rng = StdRng::seed_from_u64(7);
        let mut counts = [0usize; 3];

        let draws = 100_000;
        for _ in 0..draws {
            counts[mix.select(&mut rng).index()] += 1;
        }

        let read = counts[0] as f64 / draws as f64;
        let search = counts[1] as f64 / draws as f64;
        let write = counts[2] as f64 / draws as f64;
        assert!((read - 0.6).abs() < 0.01, "read share {}", read);
        assert!((search - 0.2).abs() < 0.01, "search share {}", search);
        assert!((write - 0.2).abs() < 0.01, "write share {}", write);
    }

    #[test]
    fn test_select_with_walks_declaration_order() {
        let mix = OperationMix::standard();

        assert_eq!(mix.select_with(0.0), OperationKind::Read);
        assert_eq!(mix.select_with(0.6), OperationKind::Read);
        assert_eq!(mix.select_with(0.61), OperationKind::Search);
        assert_eq!(mix.select_with(0.79), OperationKind::Search);
        assert_eq!(mix.select_with(0.81), OperationKind::Write);
        assert_eq!(mix.select_with(0.999_999), OperationKind::Write);
    }

    #[test]
    fn test_select_falls_back_to_read_when_sum_is_short() {
        // Sums to 0.9995: inside tolerance but short of a roll near 1.0
        let mix = OperationMix::new(vec![
            WeightedOperation {
                kind: OperationKind::Search,
                weight: 0.4995,
            },
            WeightedOperation {
                kind: OperationKind::Write,
                weight: 0.5,
            },
        ])
        .unwrap();

        assert_eq!(mix.select_with(0.9999), OperationKind::Read);
    }

    #[test]
    fn test_zero_weight_entry_is_never_selected() {
        let mix = OperationMix::from_percentages(0.0, 50.0, 50.0).unwrap();

        assert_eq!(mix.select_with(0.0), OperationKind::Search);
    }

    #[test]
    fn test_from_percentages_normalizes() {
        let mix = OperationMix::from_percentages(60.0, 20.0, 20.0).unwrap();
        assert_eq!(mix, OperationMix::standard());
        assert_eq!(mix.description(), "read 60% / search 20% / write 20%");
    }

    #[test]
    fn test_malformed_mixes_are_rejected() {
        assert!(OperationMix::from_percentages(60.0, 20.0, 30.0).is_err());
        assert!(OperationMix::from_percentages(-10.0, 60.0, 50.0).is_err());
        assert!(OperationMix::new(vec![]).is_err());
        assert!(OperationMix::new(vec![WeightedOperation {
            kind: OperationKind::Read,
            weight: 1.5,
        }])
        .is_err());
        assert!(OperationMix::new(vec![
            WeightedOperation {
                kind: OperationKind::Read,
                weight: 0.5,
            },
            WeightedOperation {
                kind: OperationKind::Read,
                weight: 0.5,
            },
        ])
        .is_err());
    }
}
