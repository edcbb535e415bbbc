use crate::core::Scanner;
use crate::source::{
    BlockHashScanner, ClassicReentrancyScanner, HardcodedAuthorityScanner, IntegerOverflowScanner,
    StoragePointerScanner,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Rules by id. Iteration is in id order so the engine's rule order never
/// depends on registration order.
pub struct ScannerRegistry {
    scanners: BTreeMap<String, Arc<dyn Scanner>>,
}

impl ScannerRegistry {
    pub fn new() -> Self {
        Self {
            scanners: BTreeMap::new(),
        }
    }

    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(StoragePointerScanner::new());
        registry.register(ClassicReentrancyScanner::new());
        registry.register(HardcodedAuthorityScanner::new());
        registry.register(BlockHashScanner::new());
        registry.register(IntegerOverflowScanner::new());
        registry
    }

    /// Registers `scanner`, replacing any rule with the same id.
    pub fn register<S: Scanner + 'static>(&mut self, scanner: S) {
        let id = scanner.id().to_string();
        self.scanners.insert(id, Arc::new(scanner));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Scanner>> {
        self.scanners.get(id).cloned()
    }

    pub fn scanners(&self) -> Vec<Arc<dyn Scanner>> {
        self.scanners.values().cloned().collect()
    }

    pub fn list_ids(&self) -> Vec<String> {
        self.scanners.keys().cloned().collect()
    }

    /// Whether `id` names a registered rule or one of the finding kinds a
    /// registered rule emits.
    pub fn knows(&self, id: &str) -> bool {
        self.scanners
            .values()
            .any(|s| s.id() == id || s.rule_ids().contains(&id))
    }

    pub fn len(&self) -> usize {
        self.scanners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scanners.is_empty()
    }
}

impl Default for ScannerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_rule() {
        let registry = ScannerRegistry::with_defaults();
        assert_eq!(
            registry.list_ids(),
            vec![
                "block-hash",
                "classic-reentrancy",
                "hardcoded-authority",
                "integer-overflow",
                "storage-pointer"
            ]
        );
        assert!(registry.knows("stale-block-hash-reference"));
        assert!(registry.knows("cross-branch-unbound-storage-reference"));
        assert!(!registry.knows("tx-origin"));
        assert!(ScannerRegistry::default().is_empty());
    }

    #[test]
    fn test_register_replaces_same_id() {
        let mut registry = ScannerRegistry::new();
        registry.register(BlockHashScanner::new());
        registry.register(BlockHashScanner::new());
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("block-hash").map(|s| s.name()), Some("Block Hash Horizon Scanner"));
    }
}
