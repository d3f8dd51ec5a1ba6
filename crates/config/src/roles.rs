//! Built-in role table

use voice_chat_core::Role;

/// Role selected at startup unless configured otherwise
pub const DEFAULT_ROLE: &str = "libai";

const NEKO_VOICE: &str = "cosyvoice-v2-prefix-e929f25649664a16adaf04fc563870f6";

/// The roles shipped with the service
pub fn default_roles() -> Vec<Role> {
    vec![
        Role::new("libai", "李白模拟", "longshu-v2")
            .with_character_id("5ffe587bb14941cda6012bffe3ac3f46"),
        Role::new("nekogirl", "猫娘", NEKO_VOICE)
            .with_character_id("e2eed5eed7bb4fa8a75a7b4cfc8fb235"),
        Role::new("dongxuelian", "东雪莲", NEKO_VOICE),
        Role::new(
            "yunli",
            "云璃",
            "cosyvoice-v2-prefix-0b859e34494541c3ae4d2fa1e5e6d3a9",
        ),
        Role::new("storyteller", "讲故事的人", "sijia"),
        Role::new("direct_model", "直接模型", "longxiang"),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use voice_chat_core::RoleRegistry;

    #[test]
    fn test_default_roles_register() {
        let registry = RoleRegistry::new(default_roles()).unwrap();
        assert_eq!(registry.len(), 6);
        assert!(registry.contains(DEFAULT_ROLE));
        assert_eq!(registry.get("storyteller").unwrap().voice_id, "sijia");
        assert!(registry.get("yunli").unwrap().character_id.is_none());
    }
}
