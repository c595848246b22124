use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Phases used when none are configured.
pub const DEFAULT_PHASES: [&str; 3] = ["perceive", "act", "commit"];

/// Construction parameters for a [`Kernel`](crate::Kernel).
///
/// Loadable from YAML:
///
/// ```yaml
/// seed: 42
/// phases: [perceive, act, commit]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    pub seed: u64,
    pub phases: Vec<String>,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            phases: default_phases(),
        }
    }
}

impl KernelConfig {
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed,
            ..Self::default()
        }
    }

    pub fn from_yaml_str(text: &str) -> Result<Self, KernelError> {
        let config: Self = serde_yaml::from_str(text)
            .map_err(|e| KernelError::Config(e.to_string()))?;
        validate_phases(&config.phases)?;
        Ok(config)
    }
}

pub fn default_phases() -> Vec<String> {
    DEFAULT_PHASES.iter().map(|p| p.to_string()).collect()
}

/// A phase list must be non-empty and free of duplicates.
pub fn validate_phases(phases: &[String]) -> Result<(), KernelError> {
    if phases.is_empty() {
        return Err(KernelError::InvalidPhases("no phases declared".into()));
    }
    for (i, phase) in phases.iter().enumerate() {
        if phases[..i].contains(phase) {
            return Err(KernelError::InvalidPhases(format!(
                "phase {phase:?} declared twice"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = KernelConfig::default();
        assert_eq!(c.seed, 0);
        assert_eq!(c.phases, vec!["perceive", "act", "commit"]);
    }

    #[test]
    fn yaml_with_partial_fields() {
        let c = KernelConfig::from_yaml_str("seed: 42\n").unwrap();
        assert_eq!(c.seed, 42);
        assert_eq!(c.phases, default_phases());

        let c = KernelConfig::from_yaml_str("seed: 1\nphases: [sense, decide]\n").unwrap();
        assert_eq!(c.phases, vec!["sense", "decide"]);
    }

    #[test]
    fn malformed_yaml_is_a_config_error() {
        assert!(matches!(
            KernelConfig::from_yaml_str("seed: not-a-number\n"),
            Err(KernelError::Config(_))
        ));
        assert!(matches!(
            KernelConfig::from_yaml_str("phases: {a: 1}\n"),
            Err(KernelError::Config(_))
        ));
    }

    #[test]
    fn yaml_rejects_bad_phase_lists() {
        assert!(matches!(
            KernelConfig::from_yaml_str("phases: []\n"),
            Err(KernelError::InvalidPhases(_))
        ));
        assert!(matches!(
            KernelConfig::from_yaml_str("phases: [a, a]\n"),
            Err(KernelError::InvalidPhases(_))
        ));
    }
}
