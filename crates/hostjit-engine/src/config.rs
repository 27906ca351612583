//! Context configuration

/// Cranelift optimization level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptLevel {
    /// No optimization
    None,
    /// Optimize for speed
    #[default]
    Speed,
    /// Optimize for speed and code size
    SpeedAndSize,
}

impl OptLevel {
    /// Value of Cranelift's `opt_level` setting
    pub fn as_str(&self) -> &'static str {
        match self {
            OptLevel::None => "none",
            OptLevel::Speed => "speed",
            OptLevel::SpeedAndSize => "speed_and_size",
        }
    }

    /// Parse a level as spelled by `as_str`
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(OptLevel::None),
            "speed" => Some(OptLevel::Speed),
            "speed_and_size" => Some(OptLevel::SpeedAndSize),
            _ => None,
        }
    }
}

/// Highest optimization level a context accepts
pub fn max_optimization_level() -> OptLevel {
    OptLevel::SpeedAndSize
}

/// What the bridge does with a host type it cannot classify
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnclassifiedPolicy {
    /// Fail the bridge call with `UnclassifiedType`
    #[default]
    Error,
    /// Map the type to `void` and log a warning. The runtime then sees a
    /// record that does not match the host function and skips the call.
    DegradeToVoid,
}

/// Context configuration
#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Optimization level for every function compiled in the context
    pub opt_level: OptLevel,
    /// Handling of unclassified host types in bridge calls
    pub unclassified_policy: UnclassifiedPolicy,
    /// Keep the Cranelift IR text of compiled functions
    pub capture_native_ir: bool,
    /// Run the Cranelift verifier on every function
    pub verify: bool,
}

impl Default for ContextConfig {
    fn default() -> Self {
        ContextConfig {
            opt_level: OptLevel::Speed,
            unclassified_policy: UnclassifiedPolicy::Error,
            capture_native_ir: false,
            verify: cfg!(debug_assertions),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opt_level_round_trip_names() {
        for level in [OptLevel::None, OptLevel::Speed, OptLevel::SpeedAndSize] {
            assert_eq!(OptLevel::parse(level.as_str()), Some(level));
        }
        assert_eq!(OptLevel::parse("fast"), None);
        assert_eq!(max_optimization_level(), OptLevel::SpeedAndSize);
    }

    #[test]
    fn test_default_config() {
        let config = ContextConfig::default();
        assert_eq!(config.opt_level, OptLevel::Speed);
        assert_eq!(config.unclassified_policy, UnclassifiedPolicy::Error);
        assert!(!config.capture_native_ir);
    }
}
