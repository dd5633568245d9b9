// handlers/auth/mod.rs - Authentication resource groups

pub mod login;
pub mod whoami;

use std::sync::Arc;

use crate::router::{EndpointSpec, ResourceGroup, RestOp, Signature};
use crate::security::AccessControl;

/// `POST /api/auth` is open to anonymous callers; `GET /api/auth/whoami`
/// only needs an authenticated principal
pub fn groups(access: Arc<AccessControl>, jwt_secret: String, expiry_hours: u64) -> Vec<ResourceGroup> {
    let auth = ResourceGroup::api("Auth", "auth").secure(false).rest(
        RestOp::Create,
        Signature::new().required("username").required("password"),
        login::handler(access, jwt_secret, expiry_hours),
    );

    let whoami = ResourceGroup::api("Whoami", "auth/whoami").index(
        EndpointSpec::get().no_permissions(),
        Signature::new(),
        whoami::handler(),
    );

    vec![auth, whoami]
}
