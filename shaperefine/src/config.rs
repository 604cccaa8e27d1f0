use std::path::Path;

use serde::Deserialize;

use crate::error::RefineError;

/// Options of a refinement run.
///
/// Can be loaded from TOML; missing keys keep their default value:
///
/// ```toml
/// enable_shape_assertions = true
/// max_refinement_iterations = 64
/// verify_after_each_pass = false
/// trace_ir = false
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RefineOptions {
    /// When `false`, shape assertions are removed without being checked.
    pub enable_shape_assertions: bool,
    /// Upper bound on the number of shape refinement sweeps.
    pub max_refinement_iterations: usize,
    /// Re-run the structural verifier after every pass.
    pub verify_after_each_pass: bool,
    /// Dump the module at `trace` level after every pass.
    pub trace_ir: bool,
}

impl Default for RefineOptions {
    fn default() -> Self {
        Self {
            enable_shape_assertions: true,
            max_refinement_iterations: 64,
            verify_after_each_pass: false,
            trace_ir: false,
        }
    }
}

impl RefineOptions {
    pub fn from_toml_str(source: &str) -> Result<Self, RefineError> {
        let options: RefineOptions =
            toml::from_str(source).map_err(|e| RefineError::InvalidConfig(e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn load_from_toml(path: &Path) -> Result<Self, RefineError> {
        let source = std::fs::read_to_string(path).map_err(|e| {
            RefineError::InvalidConfig(format!("cannot read `{}`: {}", path.display(), e))
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), RefineError> {
        if self.max_refinement_iterations == 0 {
            return Err(RefineError::InvalidConfig(
                "max_refinement_iterations must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_shape_assertions(mut self, enabled: bool) -> Self {
        self.enable_shape_assertions = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_keys_use_defaults() {
        let options = RefineOptions::from_toml_str("trace_ir = true").unwrap();
        assert!(options.trace_ir);
        assert!(options.enable_shape_assertions);
        assert_eq!(options.max_refinement_iterations, 64);
    }

    #[test]
    fn rejects_invalid_values() {
        assert!(RefineOptions::from_toml_str("max_refinement_iterations = 0").is_err());
        assert!(RefineOptions::from_toml_str("unknown = 1").is_err());
        assert!(RefineOptions::from_toml_str("trace_ir = 3").is_err());
    }
}
