//! Per-user bookkeeping: open-shell counts and shell-id generation.

use std::collections::HashMap;

use tracing::error;

/// Metadata for one user.
#[derive(Debug, Default)]
pub struct UserMeta {
    num_shells: usize,
    next_shell_id: u64,
}

impl UserMeta {
    /// The next shell id for this user, as a decimal string. Successive
    /// calls never repeat.
    pub fn next_id(&mut self) -> String {
        let id = self.next_shell_id;
        self.next_shell_id += 1;
        id.to_string()
    }

    pub fn shell_count(&self) -> usize {
        self.num_shells
    }
}

/// Registry of all users that ever created a shell.
#[derive(Debug, Default)]
pub struct UserRegistry {
    meta: HashMap<String, UserMeta>,
}

impl UserRegistry {
    pub fn meta_mut(&mut self, username: &str) -> &mut UserMeta {
        self.meta.entry(username.to_string()).or_default()
    }

    pub fn shell_count(&self, username: &str) -> usize {
        self.meta.get(username).map_or(0, UserMeta::shell_count)
    }

    pub fn increment_count(&mut self, username: &str) {
        self.meta_mut(username).num_shells += 1;
    }

    /// Decrementing below zero is a bookkeeping bug; log it and clamp.
    pub fn decrement_count(&mut self, username: &str) {
        let meta = self.meta_mut(username);
        if meta.num_shells > 0 {
            meta.num_shells -= 1;
        } else {
            error!(username, "shell count would go negative");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential_decimal_strings_per_user() {
        let mut registry = UserRegistry::default();
        assert_eq!(registry.meta_mut("a").next_id(), "0");
        assert_eq!(registry.meta_mut("a").next_id(), "1");
        assert_eq!(registry.meta_mut("b").next_id(), "0");
        assert_eq!(registry.meta_mut("a").next_id(), "2");
    }

    #[test]
    fn counts_track_increments_and_decrements() {
        let mut registry = UserRegistry::default();
        registry.increment_count("a");
        registry.increment_count("a");
        assert_eq!(registry.shell_count("a"), 2);
        registry.decrement_count("a");
        assert_eq!(registry.shell_count("a"), 1);
        assert_eq!(registry.shell_count("b"), 0);
    }

    #[test]
    fn decrement_clamps_at_zero() {
        let mut registry = UserRegistry::default();
        registry.decrement_count("a");
        assert_eq!(registry.shell_count("a"), 0);
    }
}
