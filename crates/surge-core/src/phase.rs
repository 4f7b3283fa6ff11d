//! Phase classification of samples by elapsed time

use crate::profile::LoadProfile;
use std::time::Duration;

/// Phase every run treats as the latency reference.
pub const BASELINE_PHASE: &str = "baseline";

/// Bucket for samples no phase window or label claims.
pub const UNCLASSIFIED_PHASE: &str = "unclassified";

#[derive(Debug, Clone, PartialEq)]
struct PhaseWindow {
    name: String,
    start: Duration,
    end: Duration,
}

/// Maps elapsed run time to a phase name.
///
/// Windows come from the `phase` labels of the profile's stages. Adjacent
/// stages with the same label merge into one window. An external label is
/// consulted only when no window covers the instant; with neither, samples
/// land in [`UNCLASSIFIED_PHASE`].
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseClassifier {
    windows: Vec<PhaseWindow>,
    profile_end: Duration,
    external_label: Option<String>,
}

impl PhaseClassifier {
    pub fn from_profile(profile: &LoadProfile) -> Self {
        let mut windows: Vec<PhaseWindow> = Vec::new();
        let mut start = Duration::ZERO;

        for stage in profile.stages() {
            let end = start + stage.duration;
            if let Some(name) = &stage.phase {
                match windows.last_mut() {
                    Some(last) if last.name == *name && last.end == start => last.end = end,
                    _ => windows.push(PhaseWindow {
                        name: name.clone(),
                        start,
                        end,
                    }),
                }
            }
            start = end;
        }

        Self {
            windows,
            profile_end: start,
            external_label: None,
        }
    }

    /// Fallback label for instants not covered by any stage label.
    pub fn with_external_label(mut self, label: Option<String>) -> Self {
        self.external_label = label.filter(|l| !l.trim().is_empty());
        self
    }

    /// Phase names in run order, without duplicates.
    pub fn phase_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for window in &self.windows {
            if !names.contains(&window.name) {
                names.push(window.name.clone());
            }
        }
        if let Some(label) = &self.external_label {
            if !names.contains(label) {
                names.push(label.clone());
            }
        }
        names
    }

    /// Phase deltas are measured against: `baseline` when present, else the
    /// first phase.
    pub fn baseline_name(&self) -> Option<String> {
        let names = self.phase_names();
        if names.iter().any(|n| n == BASELINE_PHASE) {
            return Some(BASELINE_PHASE.to_string());
        }
        names.into_iter().next()
    }

    /// Phase of a sample taken `elapsed` after run start.
    ///
    /// Instants past the end of the profile belong to the last labelled window.
    pub fn classify(&self, elapsed: Duration) -> &str {
        if let Some(window) = self
            .windows
            .iter()
            .find(|w| elapsed >= w.start && elapsed < w.end)
        {
            return &window.name;
        }

        if elapsed >= self.profile_end {
            if let Some(last) = self.windows.last() {
                return &last.name;
            }
        }

        self.external_label.as_deref().unwrap_or(UNCLASSIFIED_PHASE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::LoadStage;

    fn mins(m: u64) -> Duration {
        Duration::from_secs(m * 60)
    }

    fn warm_start() -> LoadProfile {
        LoadProfile::new(vec![
            LoadStage::new(mins(2), 100).with_phase("baseline"),
            LoadStage::new(mins(3), 200).with_phase("deploy"),
            LoadStage::new(mins(3), 100).with_phase("recovery"),
        ])
        .unwrap()
    }

    #[test]
    fn test_classify_by_elapsed_time() {
        let classifier = PhaseClassifier::from_profile(&warm_start());

        assert_eq!(classifier.classify(Duration::ZERO), "baseline");
        assert_eq!(classifier.classify(mins(2) - Duration::from_millis(1)), "baseline");
        assert_eq!(classifier.classify(mins(2)), "deploy");
        assert_eq!(classifier.classify(mins(6)), "recovery");
        assert_eq!(classifier.classify(mins(20)), "recovery");
    }

    #[test]
    fn test_adjacent_stages_merge() {
        let profile = LoadProfile::new(vec![
            LoadStage::new(mins(2), 50).with_phase("baseline"),
            LoadStage::new(Duration::from_secs(1), 800).with_phase("spike"),
            LoadStage::new(mins(3), 800).with_phase("spike"),
            LoadStage::new(mins(2), 50).with_phase("recovery"),
        ])
        .unwrap();
        let classifier = PhaseClassifier::from_profile(&profile);

        assert_eq!(classifier.phase_names(), vec!["baseline", "spike", "recovery"]);
        assert_eq!(classifier.classify(mins(4)), "spike");
    }

    #[test]
    fn test_external_label_is_a_fallback() {
        let profile = LoadProfile::new(vec![
            LoadStage::new(mins(1), 10).with_phase("baseline"),
            LoadStage::new(mins(1), 10),
        ])
        .unwrap();
        let classifier =
            PhaseClassifier::from_profile(&profile).with_external_label(Some("deploy".to_string()));

        assert_eq!(classifier.classify(Duration::from_secs(30)), "baseline");
        assert_eq!(classifier.classify(Duration::from_secs(90)), "deploy");
    }

    #[test]
    fn test_unlabelled_samples_are_unclassified() {
        let profile = LoadProfile::new(vec![LoadStage::new(mins(1), 10)]).unwrap();
        let classifier =
            PhaseClassifier::from_profile(&profile).with_external_label(Some("  ".to_string()));

        assert_eq!(classifier.classify(Duration::from_secs(5)), UNCLASSIFIED_PHASE);
        assert_eq!(classifier.baseline_name(), None);
    }

    #[test]
    fn test_baseline_falls_back_to_first_phase() {
        let profile = LoadProfile::new(vec![
            LoadStage::new(mins(1), 10).with_phase("warmup"),
            LoadStage::new(mins(1), 10).with_phase("load"),
        ])
        .unwrap();

        assert_eq!(
            PhaseClassifier::from_profile(&profile).baseline_name(),
            Some("warmup".to_string())
        );
        assert_eq!(
            PhaseClassifier::from_profile(&warm_start()).baseline_name(),
            Some("baseline".to_string())
        );
    }
}
