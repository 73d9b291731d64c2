use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::naming::{namespace_of, range_of};

/// Index of broker -> namespace -> owned bundle ranges, used by the anti-affinity
/// and even-distribution filters.
#[derive(Debug, Clone, Default)]
pub struct BundleRangeCache {
    inner: Arc<DashMap<String, HashMap<String, HashSet<String>>>>,
}

impl BundleRangeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, broker: &str, namespace: &str, range: &str) {
        self.inner
            .entry(broker.to_string())
            .or_default()
            .entry(namespace.to_string())
            .or_default()
            .insert(range.to_string());
    }

    /// Replaces everything known about `broker` with the given bundle names.
    pub fn reload_from_bundles<'a>(&self, broker: &str, bundles: impl IntoIterator<Item = &'a String>) {
        let mut namespaces: HashMap<String, HashSet<String>> = HashMap::new();
        for bundle in bundles {
            namespaces
                .entry(namespace_of(bundle).to_string())
                .or_default()
                .insert(range_of(bundle).to_string());
        }
        self.inner.insert(broker.to_string(), namespaces);
    }

    pub fn remove_broker(&self, broker: &str) {
        self.inner.remove(broker);
    }

    pub fn retain_brokers(&self, live: &HashSet<String>) {
        self.inner.retain(|broker, _| live.contains(broker));
    }

    /// Forgets the cached ranges of `namespace` on every broker.
    pub fn invalidate_namespace(&self, namespace: &str) {
        for mut entry in self.inner.iter_mut() {
            entry.value_mut().remove(namespace);
        }
    }

    pub fn bundle_count(&self, broker: &str, namespace: &str) -> usize {
        self.inner
            .get(broker)
            .and_then(|namespaces| namespaces.get(namespace).map(HashSet::len))
            .unwrap_or(0)
    }

    /// Namespaces with at least one bundle on `broker`.
    pub fn namespaces_of(&self, broker: &str) -> Vec<String> {
        self.inner
            .get(broker)
            .map(|namespaces| {
                namespaces
                    .iter()
                    .filter(|(_, ranges)| !ranges.is_empty())
                    .map(|(ns, _)| ns.clone())
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reload_and_count() {
        let cache = BundleRangeCache::new();
        let bundles = vec![
            "t/ns/0x0_0x4".to_string(),
            "t/ns/0x4_0x8".to_string(),
            "t/other/0x0_0x8".to_string(),
        ];
        cache.reload_from_bundles("b1", &bundles);
        assert_eq!(cache.bundle_count("b1", "t/ns"), 2);
        assert_eq!(cache.bundle_count("b1", "t/other"), 1);
        assert_eq!(cache.bundle_count("b2", "t/ns"), 0);

        cache.add("b1", "t/ns", "0x8_0xc");
        assert_eq!(cache.bundle_count("b1", "t/ns"), 3);

        cache.reload_from_bundles("b1", &bundles[..1]);
        assert_eq!(cache.bundle_count("b1", "t/ns"), 1);
        assert_eq!(cache.bundle_count("b1", "t/other"), 0);
    }

    #[test]
    fn test_invalidate_namespace_and_retain() {
        let cache = BundleRangeCache::new();
        cache.add("b1", "t/ns", "0x0_0x8");
        cache.add("b2", "t/ns", "0x8_0xf");
        cache.add("b2", "t/keep", "0x0_0xf");

        cache.invalidate_namespace("t/ns");
        assert_eq!(cache.bundle_count("b1", "t/ns"), 0);
        assert_eq!(cache.namespaces_of("b2"), vec!["t/keep".to_string()]);

        let live: HashSet<String> = ["b1".to_string()].into_iter().collect();
        cache.retain_brokers(&live);
        assert!(cache.namespaces_of("b2").is_empty());
    }
}
