//! Competency index construction and similarity search.

use std::num::NonZeroUsize;
use std::sync::Mutex;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::corpus::CompetencyRecord;
use crate::embedder::Embedder;
use crate::error::{AssistantError, Result};
use crate::index::{CollectionName, Point, VectorStore};

/// Competency matched to a query, with its cosine similarity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetencyMatch {
    /// Competency name.
    pub name: String,
    /// Competency description.
    pub description: String,
    /// Cosine similarity in `[-1, 1]`.
    pub similarity_score: f32,
}

/// Anything that can rank competencies for a free-text query.
pub trait CompetencySearch {
    /// Returns at most `top_n` matches scoring strictly above `threshold`,
    /// sorted by descending score.
    fn search(&self, query: &str, top_n: usize, threshold: f32) -> Result<Vec<CompetencyMatch>>;
}

/// Competency corpus, its embeddings and the embedder that produced them.
pub struct CompetencyIndex {
    store: VectorStore,
    collection: CollectionName,
    embedder: Box<dyn Embedder>,
    query_cache: Option<Mutex<LruCache<String, Vec<f32>>>>,
}

impl CompetencyIndex {
    /// Embeds `corpus` and loads it into a freshly recreated collection.
    ///
    /// `query_cache_size` bounds the LRU cache of query embeddings; zero
    /// disables caching.
    pub fn build(
        corpus: &[CompetencyRecord],
        embedder: Box<dyn Embedder>,
        collection: CollectionName,
        query_cache_size: usize,
    ) -> Result<Self> {
        if corpus.is_empty() {
            return Err(AssistantError::data_load(
                "cannot build an index from an empty corpus",
            ));
        }
        if let Some(pos) = corpus
            .iter()
            .position(|r| r.name.trim().is_empty() || r.description.trim().is_empty())
        {
            return Err(AssistantError::data_load(format!(
                "competency at row {pos} is missing a name or description"
            )));
        }

        info!(
            competencies = corpus.len(),
            model = embedder.model_id(),
            collection = collection.as_str(),
            "building competency index"
        );
        let texts: Vec<String> = corpus.iter().map(CompetencyRecord::embedding_text).collect();
        let batch_size = embedder.batch_size().max(1);
        let mut store = VectorStore::new();
        let mut created = false;
        for (batch_no, (records, batch_texts)) in corpus
            .chunks(batch_size)
            .zip(texts.chunks(batch_size))
            .enumerate()
        {
            let inputs: Vec<&str> = batch_texts.iter().map(String::as_str).collect();
            let vectors = embedder.embed_batch(&inputs).map_err(|err| {
                AssistantError::IndexBackend(format!("failed to embed competencies: {err:#}"))
            })?;
            if vectors.len() != inputs.len() {
                return Err(AssistantError::IndexBackend(format!(
                    "embedder returned {} vectors for {} competencies",
                    vectors.len(),
                    inputs.len()
                )));
            }
            if !created {
                let dimension = vectors.first().map(Vec::len).unwrap_or(0);
                store.recreate_collection(&collection, dimension)?;
                created = true;
            }
            let offset = batch_no * batch_size;
            let points = records
                .iter()
                .zip(vectors)
                .enumerate()
                .map(|(idx, (record, vector))| Point {
                    id: offset + idx,
                    vector,
                    payload: record.clone(),
                })
                .collect();
            store.upsert(&collection, points)?;
        }

        let query_cache =
            NonZeroUsize::new(query_cache_size).map(|capacity| Mutex::new(LruCache::new(capacity)));
        let index = Self {
            store,
            collection,
            embedder,
            query_cache,
        };
        info!(points = index.len(), "competency index ready");
        Ok(index)
    }

    /// Number of indexed competencies.
    pub fn len(&self) -> usize {
        self.store.count(&self.collection).unwrap_or(0)
    }

    /// True when no competencies are indexed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Identifier of the embedding model backing this index.
    pub fn model_id(&self) -> &str {
        self.embedder.model_id()
    }

    fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        if let Some(cache) = &self.query_cache {
            let mut guard = cache
                .lock()
                .map_err(|_| AssistantError::Retrieval("query cache poisoned".to_string()))?;
            if let Some(hit) = guard.get(query) {
                debug!("query embedding cache hit");
                return Ok(hit.clone());
            }
        }

        let embedding = self
            .embedder
            .embed_one(query)
            .map_err(|err| AssistantError::Retrieval(format!("failed to embed query: {err:#}")))?;

        if let Some(cache) = &self.query_cache {
            let mut guard = cache
                .lock()
                .map_err(|_| AssistantError::Retrieval("query cache poisoned".to_string()))?;
            guard.put(query.to_string(), embedding.clone());
        }
        Ok(embedding)
    }
}

impl CompetencySearch for CompetencyIndex {
    fn search(&self, query: &str, top_n: usize, threshold: f32) -> Result<Vec<CompetencyMatch>> {
        let query = query.trim();
        if query.is_empty() || top_n == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embed_query(query)?;
        let hits = self.store.search(&self.collection, &embedding, top_n)?;
        let mut matches: Vec<CompetencyMatch> = hits
            .into_iter()
            .filter(|hit| hit.score > threshold)
            .map(|hit| CompetencyMatch {
                name: hit.payload.name.clone(),
                description: hit.payload.description.clone(),
                similarity_score: hit.score,
            })
            .collect();
        matches.sort_by(|a, b| {
            b.similarity_score
                .partial_cmp(&a.similarity_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        debug!(query, matches = matches.len(), "competency search finished");
        Ok(matches)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Embeds text onto fixed keyword axes so scores are predictable.
    pub(crate) struct AxisEmbedder {
        pub axes: Vec<&'static str>,
        pub calls: Arc<AtomicUsize>,
    }

    impl AxisEmbedder {
        pub(crate) fn new(axes: Vec<&'static str>) -> Self {
            Self {
                axes,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Embedder for AxisEmbedder {
        fn model_id(&self) -> &str {
            "axis"
        }

        fn batch_size(&self) -> usize {
            2
        }

        fn embed_batch(&self, inputs: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(inputs
                .iter()
                .map(|input| {
                    let lower = input.to_lowercase();
                    self.axes
                        .iter()
                        .map(|axis| lower.matches(axis).count() as f32)
                        .collect()
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    impl Embedder for FailingEmbedder {
        fn model_id(&self) -> &str {
            "failing"
        }

        fn batch_size(&self) -> usize {
            8
        }

        fn embed_batch(&self, _inputs: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("model offline")
        }
    }

    fn corpus() -> Vec<CompetencyRecord> {
        vec![
            CompetencyRecord::new("Data Analysis", "Interpreting data to support decisions"),
            CompetencyRecord::new("Public Speaking", "Presenting ideas to an audience"),
            CompetencyRecord::new("Data Visualization", "Charts that make data speaking clearly"),
        ]
    }

    fn index(cache: usize) -> (CompetencyIndex, Arc<AtomicUsize>) {
        let embedder = AxisEmbedder::new(vec!["data", "speaking"]);
        let calls = Arc::clone(&embedder.calls);
        let index = CompetencyIndex::build(
            &corpus(),
            Box::new(embedder),
            CollectionName::new("competencies").unwrap(),
            cache,
        )
        .expect("index");
        (index, calls)
    }

    #[test]
    fn data_query_matches_data_analysis_not_public_speaking() {
        let (index, _) = index(0);
        let matches = index.search("improve my data skills", 3, 0.4).unwrap();
        assert_eq!(matches[0].name, "Data Analysis");
        assert!(matches[0].similarity_score > 0.4);
        assert!(matches.iter().all(|m| m.name != "Public Speaking"));
    }

    #[test]
    fn results_respect_top_n_threshold_and_order() {
        let (index, _) = index(0);
        for (query, top_n, threshold) in [
            ("data", 1, 0.0),
            ("data speaking", 3, 0.1),
            ("speaking", 2, 0.5),
            ("data data speaking", 3, -1.0),
        ] {
            let matches = index.search(query, top_n, threshold).unwrap();
            assert!(matches.len() <= top_n, "{query}");
            assert!(matches.iter().all(|m| m.similarity_score > threshold), "{query}");
            assert!(matches
                .windows(2)
                .all(|w| w[0].similarity_score >= w[1].similarity_score));
        }
    }

    #[test]
    fn threshold_is_strict() {
        let (index, _) = index(0);
        // "Data Analysis" scores exactly 1.0 for a pure data query.
        let matches = index.search("data", 3, 1.0).unwrap();
        assert!(matches.is_empty());
    }

    #[test]
    fn repeated_queries_are_deterministic() {
        let (index, _) = index(0);
        let first = index.search("data speaking", 3, 0.0).unwrap();
        let second = index.search("data speaking", 3, 0.0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn no_match_returns_empty_not_error() {
        let (index, _) = index(0);
        assert!(index.search("gardening", 3, 0.4).unwrap().is_empty());
        assert!(index.search("   ", 3, 0.4).unwrap().is_empty());
    }

    #[test]
    fn query_cache_skips_repeat_embedding() {
        let (index, calls) = index(8);
        let after_build = calls.load(Ordering::SeqCst);
        index.search("data", 3, 0.0).unwrap();
        index.search("data", 3, 0.0).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), after_build + 1);
    }

    #[test]
    fn build_batches_and_counts_points() {
        let (index, calls) = index(0);
        assert_eq!(index.len(), 3);
        // three competencies with a batch size of two
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_corpus_is_data_load_error() {
        let err = CompetencyIndex::build(
            &[],
            Box::new(AxisEmbedder::new(vec!["data"])),
            CollectionName::new("c").unwrap(),
            0,
        )
        .err()
        .expect("empty corpus");
        assert!(matches!(err, AssistantError::DataLoad { .. }));
    }

    #[test]
    fn embedder_failure_is_index_backend_error() {
        let err = CompetencyIndex::build(
            &corpus(),
            Box::new(FailingEmbedder),
            CollectionName::new("c").unwrap(),
            0,
        )
        .err()
        .expect("embed failure");
        assert!(matches!(err, AssistantError::IndexBackend(_)));
    }
}
