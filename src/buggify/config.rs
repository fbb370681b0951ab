//! Per-fault probability configuration

use super::faults;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// Master switch; when false nothing fires
    pub enabled: bool,
    /// Probability per fault id; ids without an entry never fire
    pub probabilities: HashMap<String, f64>,
}

impl Default for FaultConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultConfig {
    /// Enabled, with no configured faults
    pub fn new() -> Self {
        FaultConfig {
            enabled: true,
            probabilities: HashMap::new(),
        }
    }

    pub fn disabled() -> Self {
        FaultConfig {
            enabled: false,
            probabilities: HashMap::new(),
        }
    }

    /// Low background fault rate across every store fault
    pub fn moderate() -> Self {
        let mut config = Self::new();
        for id in faults::ALL_FAULTS {
            config.probabilities.insert((*id).to_string(), 0.01);
        }
        config
    }

    pub fn with(mut self, fault_id: &str, probability: f64) -> Self {
        self.probabilities
            .insert(fault_id.to_string(), probability.clamp(0.0, 1.0));
        self
    }

    pub fn get(&self, fault_id: &str) -> f64 {
        if !self.enabled {
            return 0.0;
        }
        self.probabilities.get(fault_id).copied().unwrap_or(0.0)
    }
}
