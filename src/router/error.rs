use thiserror::Error;

use crate::security::SecurityError;

/// Configuration errors raised while registering resource groups.
/// Any of these aborts the whole registration pass.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Possible values for method are: 'GET', 'POST', 'DELETE', or 'PUT' (got '{0}')")]
    InvalidMethod(String),

    #[error(
        "path_params should not be used for {method} endpoints ({group}:{action}). \
         All function params are considered path parameters by default"
    )]
    PathParamsNotAllowed {
        group: String,
        action: String,
        method: String,
    },

    #[error("path parameter '{param}' of {group}:{action} must reference a non-optional function parameter")]
    OptionalPathParam {
        group: String,
        action: String,
        param: String,
    },

    #[error(transparent)]
    Security(#[from] SecurityError),

    #[error("Invalid url prefix '{prefix}' for resource group '{group}'")]
    InvalidUrlPrefix { group: String, prefix: String },

    #[error(
        "Could not infer the resource ID parameters for method {action} of resource group {group}. \
         Please specify the resource ID parameters explicitly"
    )]
    ResourceIdNotInferred { group: String, action: String },

    #[error("Cannot verify permissions of {group}:{action} without a security scope")]
    MissingScope { group: String, action: String },

    #[error("Route collision on {method} {url}: {first} and {second}")]
    RouteCollision {
        method: String,
        url: String,
        first: String,
        second: String,
    },

    #[error("Duplicate action '{action}' in resource group '{group}'")]
    DuplicateAction { group: String, action: String },
}
