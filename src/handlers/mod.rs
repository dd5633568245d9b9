// handlers/mod.rs - Built-in resource groups
//
// Each submodule builds the ResourceGroups it owns; the server registers them
// all into one route table at startup.

pub mod auth;
pub mod crash;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::crash::CrashStore;
use crate::router::ResourceGroup;
use crate::security::AccessControl;

/// Every group the dashboard serves
pub fn resource_groups(config: &AppConfig, access: Arc<AccessControl>, crash: CrashStore) -> Vec<ResourceGroup> {
    let mut groups = auth::groups(
        access,
        config.security.jwt_secret.clone(),
        config.security.jwt_expiry_hours,
    );
    groups.push(crash::group(crash, config.crash.prune_keep_days));
    groups
}
