//! Configuration for the rewrite pipeline.
//!
//! This module provides [`RewriterConfig`], which controls strategy selection, where
//! generated helpers are placed and the thresholds of the enum code generator.

use crate::metadata::signatures::TypeName;

/// Configuration for the rewrite pipeline.
///
/// Controls which strategies run, where generated helpers are placed and how the enum
/// code generator chooses between lookup shapes.
#[derive(Debug, Clone)]
pub struct RewriterConfig {
    /// Rewrite reflection-style enum call sites (default: true).
    pub enable_call_sites: bool,

    /// Flatten try/finally regions (default: true).
    pub enable_handler_flattening: bool,

    /// Full name of an attribute that restricts flattening to marked types.
    ///
    /// `None` flattens every type with finally regions.
    pub flatten_marker: Option<String>,

    /// Namespace of the generated-code holder type (default: empty).
    pub holder_namespace: String,

    /// Name of the generated-code holder type (default: `<EnumHelpers>`).
    pub holder_name: String,

    /// A sparse value set still uses a single switch when its span is at most this many
    /// times the number of distinct values (default: 2).
    pub table_density_ratio: u64,

    /// Upper bound on the number of bit combinations precomputed for flag enums
    /// (default: 256).
    pub max_flag_combinations: usize,

    /// Validate every rewritten body and restore it on failure (default: true).
    pub verify_bodies: bool,
}

impl Default for RewriterConfig {
    fn default() -> Self {
        Self {
            enable_call_sites: true,
            enable_handler_flattening: true,
            flatten_marker: None,
            holder_namespace: String::new(),
            holder_name: "<EnumHelpers>".to_string(),
            table_density_ratio: 2,
            max_flag_combinations: 256,
            verify_bodies: true,
        }
    }
}

impl RewriterConfig {
    /// Creates a configuration with all defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration that only rewrites enum call sites.
    #[must_use]
    pub fn call_sites_only() -> Self {
        Self {
            enable_handler_flattening: false,
            ..Self::default()
        }
    }

    /// Configuration that only flattens finally regions.
    #[must_use]
    pub fn flattening_only() -> Self {
        Self {
            enable_call_sites: false,
            ..Self::default()
        }
    }

    /// Restricts flattening to types carrying the given attribute.
    #[must_use]
    pub fn with_flatten_marker(mut self, attribute: &str) -> Self {
        self.flatten_marker = Some(attribute.to_string());
        self
    }

    /// Places generated helpers on `namespace.name`.
    #[must_use]
    pub fn with_holder(mut self, namespace: &str, name: &str) -> Self {
        self.holder_namespace = namespace.to_string();
        self.holder_name = name.to_string();
        self
    }

    /// Name of the generated-code holder type.
    #[must_use]
    pub fn holder_type(&self) -> TypeName {
        TypeName::new(&self.holder_namespace, &self.holder_name)
    }

    /// Returns true if any strategy is enabled.
    #[must_use]
    pub fn any_enabled(&self) -> bool {
        self.enable_call_sites || self.enable_handler_flattening
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RewriterConfig::default();
        assert!(config.enable_call_sites);
        assert!(config.enable_handler_flattening);
        assert_eq!(config.table_density_ratio, 2);
        assert_eq!(config.max_flag_combinations, 256);
        assert!(config.flatten_marker.is_none());
        assert_eq!(config.holder_type().full_name(), "<EnumHelpers>");
    }

    #[test]
    fn test_presets() {
        assert!(!RewriterConfig::call_sites_only().enable_handler_flattening);
        assert!(!RewriterConfig::flattening_only().enable_call_sites);

        let config = RewriterConfig::new()
            .with_holder("App.Generated", "Enums")
            .with_flatten_marker("App.NoExceptionsAttribute");
        assert_eq!(config.holder_type().full_name(), "App.Generated.Enums");
        assert_eq!(
            config.flatten_marker.as_deref(),
            Some("App.NoExceptionsAttribute")
        );
    }
}
