use log::warn;
use std::collections::HashMap;
use std::sync::Arc;

use crate::{types::ChainId, Error, Result};

/// Chain id → strategy map shared by keyrings, readers and writers.
///
/// Populated once at startup. When two implementations claim the same
/// chain id the first one registered is kept and the rest are dropped.
pub struct ChainRegistry<T: ?Sized> {
    entries: HashMap<ChainId, Arc<T>>,
}

impl<T: ?Sized> ChainRegistry<T> {
    pub fn from_entries<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (ChainId, Arc<T>)>,
    {
        let mut map: HashMap<ChainId, Arc<T>> = HashMap::new();
        for (chain_id, entry) in entries {
            if map.contains_key(&chain_id) {
                warn!("Duplicate registration for chain {}, keeping the first one", chain_id);
                continue;
            }
            map.insert(chain_id, entry);
        }
        Self { entries: map }
    }

    pub fn get(&self, chain_id: ChainId) -> Option<Arc<T>> {
        self.entries.get(&chain_id).cloned()
    }

    pub fn resolve(&self, chain_id: ChainId) -> Result<Arc<T>> {
        self.get(chain_id).ok_or(Error::UnsupportedChain(chain_id))
    }

    pub fn contains(&self, chain_id: ChainId) -> bool {
        self.entries.contains_key(&chain_id)
    }

    pub fn chain_ids(&self) -> Vec<ChainId> {
        let mut ids: Vec<_> = self.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: ?Sized> Default for ChainRegistry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Named: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Fixed(&'static str);

    impl Named for Fixed {
        fn name(&self) -> &str {
            self.0
        }
    }

    #[test]
    fn test_first_registration_wins() {
        let registry: ChainRegistry<dyn Named> = ChainRegistry::from_entries(vec![
            (1, Arc::new(Fixed("first")) as Arc<dyn Named>),
            (2, Arc::new(Fixed("other")) as Arc<dyn Named>),
            (1, Arc::new(Fixed("second")) as Arc<dyn Named>),
        ]);
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get(1).map(|n| n.name().to_string()), Some("first".to_string()));
        assert_eq!(registry.chain_ids(), vec![1, 2]);
    }

    #[test]
    fn test_resolve_unknown_chain() {
        let registry: ChainRegistry<dyn Named> = ChainRegistry::default();
        assert!(matches!(registry.resolve(9), Err(Error::UnsupportedChain(9))));
    }
}
