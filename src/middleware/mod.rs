pub mod auth;
pub mod response;

pub use auth::principal_middleware;
pub use response::{DispatchResponse, ResponseBody};
