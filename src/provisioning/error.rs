use thiserror::Error;

use crate::iap::IapError;
use crate::store::StoreError;

/// Errors surfaced by tenant, branch and role provisioning.
///
/// Validation variants are produced before any external call is made.
/// External failures are wrapped in [`ProvisionError::Step`] with the name
/// of the step that failed, so the caller sees a single error naming the
/// first failing step.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error("invalid {field}: {message}")]
    Validation { field: &'static str, message: String },

    #[error("branch name '{0}' is reserved")]
    ReservedBranchName(String),

    #[error("role name '{0}' is reserved")]
    ReservedRoleName(String),

    #[error("invalid schema name: {0}")]
    InvalidSchemaName(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{step} failed: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<ProvisionError>,
    },

    #[error(transparent)]
    Iap(#[from] IapError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type ProvisionResult<T> = Result<T, ProvisionError>;

impl ProvisionError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        ProvisionError::Validation {
            field,
            message: message.into(),
        }
    }

    /// Wrap this error with the name of the step that produced it.
    pub fn in_step(self, step: impl Into<String>) -> Self {
        ProvisionError::Step {
            step: step.into(),
            source: Box::new(self),
        }
    }

    /// True for errors raised before any external call was attempted.
    pub fn is_validation(&self) -> bool {
        matches!(
            self.root_cause(),
            ProvisionError::Validation { .. }
                | ProvisionError::ReservedBranchName(_)
                | ProvisionError::ReservedRoleName(_)
                | ProvisionError::InvalidSchemaName(_)
        )
    }

    /// Outermost step name, if the error came out of a provisioning step.
    pub fn failed_step(&self) -> Option<&str> {
        match self {
            ProvisionError::Step { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The innermost error with every step wrapper peeled off.
    pub fn root_cause(&self) -> &ProvisionError {
        let mut current = self;
        while let ProvisionError::Step { source, .. } = current {
            current = source;
        }
        current
    }
}
