//! CRD errors

use std::fmt;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CrdError {
    #[error("bbDevConfig: {0} are mutually exclusive, only one can be specified")]
    MultipleBbDevConfigs(String),

    #[error("Unknown accelerator family: {0}")]
    UnknownFamily(String),
}

/// Admission rule violations, one message per failed rule
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationError(pub Vec<String>);

impl ValidationError {
    pub fn push(&mut self, message: impl Into<String>) {
        self.0.push(message.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn messages(&self) -> &[String] {
        &self.0
    }

    /// `Ok(())` when no rule failed
    pub fn into_result(self) -> Result<(), ValidationError> {
        if self.is_empty() { Ok(()) } else { Err(self) }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("; "))
    }
}

impl std::error::Error for ValidationError {}
