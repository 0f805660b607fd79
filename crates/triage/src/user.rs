//! User directory consumed by the job service.
//!
//! The core only needs to resolve a user to its organisation; everything
//! else about authentication lives outside this crate.

use std::collections::HashMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct UserRegistry {
    organizations: RwLock<HashMap<String, String>>,
}

impl UserRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, user_id: &str, organization: &str) {
        let mut map = match self.organizations.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.insert(user_id.to_string(), organization.to_string());
    }

    /// The organisation the user belongs to, if the user is known.
    pub fn organization_of(&self, user_id: &str) -> Option<String> {
        let map = match self.organizations.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        map.get(user_id).cloned()
    }
}
