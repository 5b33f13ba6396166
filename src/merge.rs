//! Merging of same-named metric families across endpoints.

use ahash::AHashMap as HashMap;
use tracing::warn;

use crate::model::MetricFamily;
use crate::scrape::ScrapeResult;

/// Families accumulated for one response, in first-seen order.
///
/// The first family inserted under a name holds the schema (help and kind)
/// for that name; later families only contribute samples.
#[derive(Debug, Default)]
pub struct MergedSnapshot {
    families: Vec<MetricFamily>,
    index: HashMap<String, usize>,
}

impl MergedSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a family, appending its samples if the name is already present.
    ///
    /// A family whose kind disagrees with the schema holder is still merged;
    /// the mismatch is logged and left for the encoder to report.
    pub fn absorb(&mut self, family: MetricFamily) {
        match self.index.get(&family.name) {
            Some(&idx) => {
                let existing = &mut self.families[idx];
                if existing.kind != family.kind {
                    warn!(
                        "Metric family {} reported as {} but first seen as {}; keeping {}",
                        family.name, family.kind, existing.kind, existing.kind
                    );
                }
                existing.samples.extend(family.samples);
            }
            None => {
                self.index.insert(family.name.clone(), self.families.len());
                self.families.push(family);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&MetricFamily> {
        self.index.get(name).map(|&idx| &self.families[idx])
    }

    pub fn families(&self) -> &[MetricFamily] {
        &self.families
    }

    pub fn len(&self) -> usize {
        self.families.len()
    }

    pub fn is_empty(&self) -> bool {
        self.families.is_empty()
    }
}

impl IntoIterator for MergedSnapshot {
    type Item = MetricFamily;
    type IntoIter = std::vec::IntoIter<MetricFamily>;

    fn into_iter(self) -> Self::IntoIter {
        self.families.into_iter()
    }
}

/// Builds the response snapshot: the proxy's own families first, then every
/// successful scrape in the order the results arrived.
pub fn merge(self_families: Vec<MetricFamily>, results: Vec<ScrapeResult>) -> MergedSnapshot {
    let mut snapshot = MergedSnapshot::new();

    for family in self_families {
        snapshot.absorb(family);
    }

    for result in results {
        if let ScrapeResult::Success { families, .. } = result {
            for family in families {
                snapshot.absorb(family);
            }
        }
    }

    snapshot
}
