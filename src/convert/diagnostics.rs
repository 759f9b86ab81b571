use std::fmt;

use crate::geofile::feature::FeatureId;

/// Granularity at which a recoverable error was caught.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningScope {
    /// The whole call, e.g. an unreadable `.prj`.
    Collection,
    /// One feature, which was skipped or passed through unchanged.
    Feature,
    /// One attribute value, which was set to null.
    Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    pub scope: WarningScope,
    pub feature: Option<FeatureId>,
    pub field: Option<String>,
    pub message: String,
}

impl Warning {
    pub fn collection(message: impl Into<String>) -> Self {
        Self {
            scope: WarningScope::Collection,
            feature: None,
            field: None,
            message: message.into(),
        }
    }

    pub fn feature(feature: FeatureId, message: impl Into<String>) -> Self {
        Self {
            scope: WarningScope::Feature,
            feature: Some(feature),
            field: None,
            message: message.into(),
        }
    }

    pub fn value(feature: FeatureId, field: &str, message: impl Into<String>) -> Self {
        Self {
            scope: WarningScope::Value,
            feature: Some(feature),
            field: Some(field.to_string()),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.feature {
            Some(feature) => write!(f, "feature {}: {}", feature, self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Ordered warnings of one conversion call.
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    warnings: Vec<Warning>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, warning: Warning) {
        log::warn!("{}", warning);
        self.warnings.push(warning);
    }

    /// Append warnings that were already logged where they were produced.
    pub fn extend_logged(&mut self, warnings: impl IntoIterator<Item = Warning>) {
        self.warnings.extend(warnings);
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn len(&self) -> usize {
        self.warnings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }
}
