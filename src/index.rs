//! In-memory cosine vector collections.

use std::cmp::Ordering;
use std::collections::HashMap;

use tracing::{debug, info};

use crate::corpus::CompetencyRecord;
use crate::error::{AssistantError, Result};

/// Validated collection identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CollectionName(String);

impl CollectionName {
    /// Builds a collection name, rejecting blank input.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(AssistantError::IndexBackend(
                "collection name is required".to_string(),
            ));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the raw name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stored vector with its competency payload. `id` is the corpus row position.
#[derive(Debug, Clone)]
pub struct Point {
    /// Integer identifier (row position in the corpus).
    pub id: usize,
    /// Unit-agnostic embedding; cosine normalizes at query time.
    pub vector: Vec<f32>,
    /// Competency carried alongside the vector.
    pub payload: CompetencyRecord,
}

/// Search hit returned by [`VectorStore::search`].
#[derive(Debug, Clone)]
pub struct ScoredPoint<'a> {
    /// Point identifier.
    pub id: usize,
    /// Cosine similarity with the query vector.
    pub score: f32,
    /// Competency payload.
    pub payload: &'a CompetencyRecord,
}

#[derive(Debug)]
struct Collection {
    dimension: usize,
    points: Vec<Point>,
}

/// Named cosine collections held in memory for the lifetime of the process.
#[derive(Debug, Default)]
pub struct VectorStore {
    collections: HashMap<CollectionName, Collection>,
}

impl VectorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drops `name` if present, then creates it empty with a fixed dimension.
    pub fn recreate_collection(&mut self, name: &CollectionName, dimension: usize) -> Result<()> {
        if dimension == 0 {
            return Err(AssistantError::IndexBackend(format!(
                "collection {} needs a positive vector size",
                name.as_str()
            )));
        }
        if self.collections.remove(name).is_some() {
            info!(collection = name.as_str(), "deleted existing collection");
        }
        self.collections.insert(
            name.clone(),
            Collection {
                dimension,
                points: Vec::new(),
            },
        );
        Ok(())
    }

    /// Inserts points, replacing any existing point with the same id.
    pub fn upsert(&mut self, name: &CollectionName, points: Vec<Point>) -> Result<()> {
        let collection = self.collections.get_mut(name).ok_or_else(|| {
            AssistantError::IndexBackend(format!("collection {} does not exist", name.as_str()))
        })?;
        for point in points {
            if point.vector.len() != collection.dimension {
                return Err(AssistantError::IndexBackend(format!(
                    "point {} has dimension {} but collection {} expects {}",
                    point.id,
                    point.vector.len(),
                    name.as_str(),
                    collection.dimension
                )));
            }
            match collection.points.iter_mut().find(|p| p.id == point.id) {
                Some(existing) => *existing = point,
                None => collection.points.push(point),
            }
        }
        debug!(
            collection = name.as_str(),
            points = collection.points.len(),
            "upserted batch"
        );
        Ok(())
    }

    /// Number of points stored in `name`, or `None` if it does not exist.
    pub fn count(&self, name: &CollectionName) -> Option<usize> {
        self.collections.get(name).map(|c| c.points.len())
    }

    /// Vector size of `name`, or `None` if it does not exist.
    pub fn dimension(&self, name: &CollectionName) -> Option<usize> {
        self.collections.get(name).map(|c| c.dimension)
    }

    /// Returns up to `limit` points ordered by descending cosine similarity.
    ///
    /// Equal scores keep ascending id order.
    pub fn search(
        &self,
        name: &CollectionName,
        query: &[f32],
        limit: usize,
    ) -> Result<Vec<ScoredPoint<'_>>> {
        let collection = self.collections.get(name).ok_or_else(|| {
            AssistantError::Retrieval(format!("collection {} does not exist", name.as_str()))
        })?;
        if query.len() != collection.dimension {
            return Err(AssistantError::Retrieval(format!(
                "query has dimension {} but collection {} expects {}",
                query.len(),
                name.as_str(),
                collection.dimension
            )));
        }
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut hits: Vec<ScoredPoint<'_>> = collection
            .points
            .iter()
            .map(|point| ScoredPoint {
                id: point.id,
                score: cosine_similarity(query, &point.vector),
                payload: &point.payload,
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }
}

/// Cosine similarity of two equal-length vectors; 0.0 when either is all zeros.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}
