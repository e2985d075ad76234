use thiserror::Error;

use herald_infra::providers::ProviderError;
use herald_infra::templates::TemplateError;

/// Errors raised before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// The scope is granted to every user and cannot be used as an audience.
    #[error("{0:?} is a default scope and cannot be targeted")]
    DefaultScope(String),

    #[error("failed to load templates: {0}")]
    TemplateLoad(#[from] TemplateError),

    #[error("invalid organization role {0:?}")]
    InvalidRole(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("failed to render endorsement: {0}")]
    Endorsement(String),

    #[error("invalid dispatch: {0}")]
    Validation(String),
}
