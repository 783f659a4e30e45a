//! Relationship index: attachments bucketed by the principal they describe.

use std::collections::HashMap;
use std::sync::Arc;

use crate::entity::{Bucket, Entity};

/// Attachments keyed by subject id, one map per bucket.
///
/// Built while reading a source and read-only once transformation starts.
/// Buckets only grow. Addresses are keyed by their own id and a later
/// address with the same id replaces the earlier one.
#[derive(Debug, Default)]
pub struct RelationshipIndex {
    links: HashMap<Bucket, HashMap<String, Vec<Arc<Entity>>>>,
    addresses: HashMap<String, Arc<Entity>>,
    indexed: usize,
}

impl RelationshipIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// File `entity` under every subject id it references.
    ///
    /// Returns the subject ids it was filed under (the address id for
    /// addresses). An attachment with no subjects is kept nowhere.
    pub fn insert(&mut self, bucket: Bucket, entity: Entity) -> Vec<String> {
        let entity = Arc::new(entity);
        self.indexed += 1;

        let Some(subject_prop) = bucket.subject_property() else {
            let id = entity.id().to_string();
            self.addresses.insert(id.clone(), entity);
            return vec![id];
        };

        let subjects: Vec<String> = entity
            .values(subject_prop)
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();

        let bucket_map = self.links.entry(bucket).or_default();
        for subject in &subjects {
            bucket_map
                .entry(subject.clone())
                .or_default()
                .push(Arc::clone(&entity));
        }
        subjects
    }

    /// Attachments in `bucket` about `subject_id`, in insertion order.
    pub fn attachments(&self, bucket: Bucket, subject_id: &str) -> &[Arc<Entity>] {
        self.links
            .get(&bucket)
            .and_then(|m| m.get(subject_id))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn address(&self, id: &str) -> Option<&Entity> {
        self.addresses.get(id).map(Arc::as_ref)
    }

    /// Number of attachment entities accepted so far.
    pub fn indexed(&self) -> usize {
        self.indexed
    }

    /// Number of distinct subjects in `bucket`.
    pub fn subject_count(&self, bucket: Bucket) -> usize {
        match bucket {
            Bucket::Addresses => self.addresses.len(),
            _ => self.links.get(&bucket).map_or(0, HashMap::len),
        }
    }
}
