use std::collections::HashMap;

/// Static allow-list of API keys. Unknown keys count as inactive.
#[derive(Debug, Clone, Default)]
pub struct ApiKeyTable {
    keys: HashMap<String, bool>,
}

impl ApiKeyTable {
    pub fn new(keys: HashMap<String, bool>) -> Self {
        Self { keys }
    }

    pub fn is_active(&self, key: &str) -> bool {
        self.keys.get(key).copied().unwrap_or(false)
    }

    pub fn active_count(&self) -> usize {
        self.keys.values().filter(|active| **active).count()
    }
}
