use std::collections::HashSet;

use anyhow::Result;
use derive_more::{AsRef, Deref, DerefMut, Display, From, FromStr, Into, IntoIterator};
use rand::{Rng, seq::SliceRandom};
use serde::{Deserialize, Serialize};

use super::error::DedupError;

/// Opaque, unique identifier of a conversation record.
#[derive(
    Default,
    Debug,
    Clone,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    Serialize,
    Deserialize,
    AsRef,
    From,
    FromStr,
)]
#[as_ref(str, String)]
#[serde(transparent)]
pub struct RecordId {
    inner: String,
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self {
            inner: value.to_owned(),
        }
    }
}

/// Newtype wrapper around a single embedding vector.
#[derive(Debug, Clone, Default, PartialEq, From, Into, Deref, AsRef, Serialize, Deserialize)]
#[as_ref([f32])]
#[serde(transparent)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    pub fn dimension(&self) -> usize {
        self.0.len()
    }
}

/// An id paired with its embedding. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub id: RecordId,
    pub embedding: Embedding,
}

impl Record {
    pub fn new<I, E>(id: I, embedding: E) -> Self
    where
        I: Into<RecordId>,
        E: Into<Embedding>,
    {
        Self {
            id: id.into(),
            embedding: embedding.into(),
        }
    }
}

/// The records still eligible for grouping.
///
/// Ids are unique and every embedding shares one dimensionality. Within a run
/// the set only ever shrinks.
#[derive(Debug, Clone, Default, PartialEq, IntoIterator)]
#[into_iterator(owned, ref)]
pub struct WorkingSet {
    records: Vec<Record>,
}

impl WorkingSet {
    /// Build a working set, checking id uniqueness and dimensionality.
    pub fn try_new(records: Vec<Record>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(records.len());
        let expected = records.first().map(|r| r.embedding.dimension());
        for record in &records {
            if !seen.insert(&record.id) {
                return Err(DedupError::DuplicateId(record.id.to_string()).into());
            }
            match expected {
                Some(expected) if record.embedding.dimension() != expected => {
                    return Err(DedupError::DimensionMismatch {
                        id: record.id.to_string(),
                        expected,
                        found: record.embedding.dimension(),
                    }
                    .into());
                }
                _ => {}
            }
        }
        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Dimensionality of the embeddings, or `None` when empty.
    pub fn dimension(&self) -> Option<usize> {
        self.records.first().map(|r| r.embedding.dimension())
    }

    pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
        self.records.iter().map(|r| &r.id)
    }

    /// Drop every record whose id is in `ids`. Returns how many were removed.
    pub fn remove_ids(&mut self, ids: &HashSet<&RecordId>) -> usize {
        let before = self.records.len();
        self.records.retain(|r| !ids.contains(&r.id));
        before - self.records.len()
    }

    /// Randomly permute the records in place.
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.records.shuffle(rng)
    }
}

/// A set of record ids judged to be near-duplicates of each other.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, From, Into, Deref, DerefMut, IntoIterator, Serialize, Deserialize,
)]
#[into_iterator(owned, ref)]
#[serde(transparent)]
pub struct IdGroup(Vec<RecordId>);

impl FromIterator<RecordId> for IdGroup {
    fn from_iter<T: IntoIterator<Item = RecordId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Ordered list of groups, as produced by a run.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, From, Into, Deref, DerefMut, IntoIterator, Serialize, Deserialize,
)]
#[into_iterator(owned, ref)]
#[serde(transparent)]
pub struct IdGroups(Vec<IdGroup>);

impl IdGroups {
    /// Total number of ids across all groups.
    pub fn num_ids(&self) -> usize {
        self.0.iter().map(|g| g.len()).sum()
    }

    /// Every id appearing in any group.
    pub fn id_set(&self) -> HashSet<&RecordId> {
        self.0.iter().flat_map(|g| g.iter()).collect()
    }

    pub fn append(&mut self, other: &mut IdGroups) {
        self.0.append(&mut other.0)
    }
}

impl FromIterator<IdGroup> for IdGroups {
    fn from_iter<T: IntoIterator<Item = IdGroup>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}
