//! Roles: the agent/voice identities a conversation can speak as

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Static role entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: String,
    pub display_name: String,
    /// Synthesis voice identifier
    pub voice_id: String,
    /// Agent-side character identifier, if the agent service needs one
    #[serde(default)]
    pub character_id: Option<String>,
}

impl Role {
    pub fn new(
        id: impl Into<String>,
        display_name: impl Into<String>,
        voice_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            voice_id: voice_id.into(),
            character_id: None,
        }
    }

    pub fn with_character_id(mut self, character_id: impl Into<String>) -> Self {
        self.character_id = Some(character_id.into());
        self
    }
}

/// Read-only lookup table of roles, in registration order
#[derive(Debug, Clone, Default)]
pub struct RoleRegistry {
    roles: Vec<Role>,
    index: HashMap<String, usize>,
}

impl RoleRegistry {
    /// Build a registry, rejecting duplicate or empty ids
    pub fn new(roles: Vec<Role>) -> Result<Self> {
        let mut index = HashMap::with_capacity(roles.len());
        for (position, role) in roles.iter().enumerate() {
            if role.id.trim().is_empty() {
                return Err(Error::Config("role id must not be empty".to_string()));
            }
            if index.insert(role.id.clone(), position).is_some() {
                return Err(Error::Config(format!("duplicate role id: {}", role.id)));
            }
        }
        Ok(Self { roles, index })
    }

    /// Look up a role by id
    pub fn get(&self, id: &str) -> Result<&Role> {
        self.index
            .get(id)
            .map(|&position| &self.roles[position])
            .ok_or_else(|| Error::RoleNotFound(id.to_string()))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn list(&self) -> &[Role] {
        &self.roles
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> RoleRegistry {
        RoleRegistry::new(vec![
            Role::new("libai", "Li Bai", "longshu-v2").with_character_id("c-1"),
            Role::new("storyteller", "Storyteller", "sijia"),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup() {
        let registry = registry();
        let role = registry.get("libai").unwrap();
        assert_eq!(role.voice_id, "longshu-v2");
        assert_eq!(role.character_id.as_deref(), Some("c-1"));
        assert!(registry.contains("storyteller"));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_unknown_role() {
        let err = registry().get("nobody").unwrap_err();
        assert!(matches!(err, Error::RoleNotFound(id) if id == "nobody"));
    }

    #[test]
    fn test_list_keeps_registration_order() {
        let ids: Vec<_> = registry().list().iter().map(|r| r.id.clone()).collect();
        assert_eq!(ids, vec!["libai", "storyteller"]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let result = RoleRegistry::new(vec![
            Role::new("a", "A", "v1"),
            Role::new("a", "A again", "v2"),
        ]);
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
