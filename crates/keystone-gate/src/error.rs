use std::fmt;

/// Errors raised while registering handlers or editing a call context.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    /// A handler pattern failed to compile.
    #[error("invalid handler pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    /// A context field was assigned a value of the wrong shape.
    #[error("invalid value for field '{field}': {reason}")]
    InvalidField { field: String, reason: String },
}

impl GateError {
    pub fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl PartialEq for GateError {
    fn eq(&self, other: &Self) -> bool {
        fmt::format(format_args!("{self}")) == fmt::format(format_args!("{other}"))
    }
}

impl Eq for GateError {}
