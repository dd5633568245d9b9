//! Endpoint registry and request routing.
//!
//! Resource groups declare operations, the [`RouteTableBuilder`] turns them
//! into an immutable [`RouteTable`], and the [`Dispatcher`] serves requests
//! against it.

pub mod descriptor;
pub mod dispatch;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod resource;
pub mod signature;
pub mod table;

pub use descriptor::{path_param_names, EndpointDescriptor};
pub use dispatch::{DispatchError, DispatchRequest, DispatchStage, Dispatcher};
pub use endpoint::{EndpointSpec, Method, PermissionPolicy};
pub use error::RegistryError;
pub use handler::{handler_fn, Args, Handler, HandlerResult};
pub use resource::{CustomOp, ResourceGroup, RestOp};
pub use signature::{Param, Signature};
pub use table::{ResolveError, ResolvedRoute, RouteEntry, RouteSummary, RouteTable, RouteTableBuilder};
