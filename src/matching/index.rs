//! Market Index: the sole record of which markets are eligible for matching.
//!
//! Each market gets exactly one fingerprint (embedding vector + keyword
//! set), registered at creation. Retrieval is hybrid: brute-force cosine
//! over the vector map plus BM25 keyword recall over a tantivy RAM index.
//! All synchronization is internal; callers only see `insert`/`query`/
//! `search_keywords`/`remove`.

use crate::core::error::PipelineError;
use crate::core::types::{Fingerprint, Market};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, STORED, STRING, Schema, TEXT, TantivyDocument, Term, Value};
use tantivy::{Index, IndexWriter};
use tracing::warn;

use super::embedder::cosine_similarity;

/// A market returned from index retrieval, annotated with the raw cosine
/// similarity against the query fingerprint.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub market_id: String,
    pub similarity: f64,
    pub keywords: Vec<String>,
    pub title: String,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

struct IndexedMarket {
    fingerprint: Fingerprint,
    title: String,
    description: String,
    created_at: DateTime<Utc>,
}

struct Inner {
    index: Index,
    writer: IndexWriter,
    keywords_field: Field,
    id_field: Field,
    markets: HashMap<String, IndexedMarket>,
}

pub struct MarketIndex {
    inner: Mutex<Inner>,
}

impl MarketIndex {
    pub fn new() -> Result<Self> {
        let mut schema_builder = Schema::builder();
        let keywords_field = schema_builder.add_text_field("keywords", TEXT);
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let schema = schema_builder.build();

        // RAM index: markets are re-registered from the feed on startup.
        let index = Index::create_in_ram(schema);
        let writer = index.writer(50_000_000)?;

        Ok(Self {
            inner: Mutex::new(Inner {
                index,
                writer,
                keywords_field,
                id_field,
                markets: HashMap::new(),
            }),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("market index mutex poisoned")
    }

    pub fn contains(&self, market_id: &str) -> bool {
        self.lock().markets.contains_key(market_id)
    }

    pub fn len(&self) -> usize {
        self.lock().markets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a market's fingerprint exactly once.
    pub fn insert(&self, market: &Market, fingerprint: Fingerprint) -> Result<(), PipelineError> {
        let mut inner = self.lock();

        if inner.markets.contains_key(&market.id) {
            return Err(PipelineError::DuplicateMarket(market.id.clone()));
        }

        let mut doc = TantivyDocument::default();
        doc.add_text(inner.keywords_field, fingerprint.keywords.join(" "));
        doc.add_text(inner.id_field, &market.id);

        inner
            .writer
            .add_document(doc)
            .map_err(|e| PipelineError::Store(e.to_string()))?;
        // Market additions are low-frequency; committing per insert is fine.
        inner
            .writer
            .commit()
            .map_err(|e| PipelineError::Store(e.to_string()))?;

        inner.markets.insert(
            market.id.clone(),
            IndexedMarket {
                fingerprint,
                title: market.title.clone(),
                description: market.description.clone(),
                created_at: market.created_at,
            },
        );

        Ok(())
    }

    /// Evict a closed market. Unknown ids are a no-op.
    pub fn remove(&self, market_id: &str) -> Result<()> {
        let mut inner = self.lock();

        let term = Term::from_field_text(inner.id_field, market_id);
        inner.writer.delete_term(term);
        inner.writer.commit()?;
        inner.markets.remove(market_id);

        Ok(())
    }

    /// Rank all indexed markets by cosine similarity against the query
    /// vector. An empty index yields an empty result, never an error.
    pub fn query(&self, vector: &[f32], top_k: usize) -> Vec<IndexHit> {
        let inner = self.lock();

        let mut hits: Vec<IndexHit> = inner
            .markets
            .iter()
            .map(|(id, m)| IndexHit {
                market_id: id.clone(),
                similarity: cosine_similarity(vector, &m.fingerprint.vector) as f64,
                keywords: m.fingerprint.keywords.clone(),
                title: m.title.clone(),
                description: m.description.clone(),
                created_at: m.created_at,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.market_id.cmp(&b.market_id))
        });
        hits.truncate(top_k);
        hits
    }

    /// BM25 keyword recall: markets whose keyword sets match any of the
    /// query tokens, annotated with cosine similarity like `query`.
    pub fn search_keywords(&self, tokens: &[String], vector: &[f32], top_k: usize) -> Vec<IndexHit> {
        if tokens.is_empty() {
            return Vec::new();
        }

        let inner = self.lock();

        let reader = match inner.index.reader() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "keyword index reader unavailable");
                return Vec::new();
            }
        };
        let searcher = reader.searcher();

        let query_parser = QueryParser::for_index(&inner.index, vec![inner.keywords_field]);
        let query_str = tokens.join(" ");
        let query = match query_parser.parse_query(&query_str) {
            Ok(q) => q,
            Err(e) => {
                warn!(error = %e, query = %query_str, "keyword query parse failed");
                return Vec::new();
            }
        };

        let top_docs = match searcher.search(&query, &TopDocs::with_limit(top_k)) {
            Ok(docs) => docs,
            Err(e) => {
                warn!(error = %e, "keyword search failed");
                return Vec::new();
            }
        };

        let mut hits = Vec::with_capacity(top_docs.len());
        for (_score, doc_address) in top_docs {
            let retrieved: TantivyDocument = match searcher.doc(doc_address) {
                Ok(d) => d,
                Err(_) => continue,
            };
            let market_id = retrieved
                .get_first(inner.id_field)
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .to_string();

            if let Some(m) = inner.markets.get(&market_id) {
                hits.push(IndexHit {
                    market_id,
                    similarity: cosine_similarity(vector, &m.fingerprint.vector) as f64,
                    keywords: m.fingerprint.keywords.clone(),
                    title: m.title.clone(),
                    description: m.description.clone(),
                    created_at: m.created_at,
                });
            }
        }

        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::MarketStatus;

    fn market(id: &str, title: &str) -> Market {
        Market {
            id: id.to_string(),
            title: title.to_string(),
            description: String::new(),
            created_at: Utc::now(),
            status: MarketStatus::Open,
        }
    }

    fn fp(vector: Vec<f32>, keywords: &[&str]) -> Fingerprint {
        Fingerprint {
            vector,
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn insert_is_exactly_once() {
        let index = MarketIndex::new().unwrap();
        let m = market("m1", "Fed rates decision");

        index.insert(&m, fp(vec![1.0, 0.0], &["fed", "rate"])).unwrap();
        let err = index
            .insert(&m, fp(vec![1.0, 0.0], &["fed", "rate"]))
            .unwrap_err();
        assert!(matches!(err, PipelineError::DuplicateMarket(_)));
    }

    #[test]
    fn query_on_empty_index_is_empty() {
        let index = MarketIndex::new().unwrap();
        assert!(index.query(&[1.0, 0.0], 10).is_empty());
    }

    #[test]
    fn query_ranks_by_cosine() {
        let index = MarketIndex::new().unwrap();
        index
            .insert(&market("m1", "Fed"), fp(vec![1.0, 0.0], &["fed"]))
            .unwrap();
        index
            .insert(&market("m2", "BTC"), fp(vec![0.0, 1.0], &["btc"]))
            .unwrap();

        let hits = index.query(&[0.9, 0.1], 10);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].market_id, "m1");
        assert!(hits[0].similarity > hits[1].similarity);
    }

    #[test]
    fn keyword_search_finds_by_token() {
        let index = MarketIndex::new().unwrap();
        index
            .insert(&market("m1", "Fed rates"), fp(vec![1.0, 0.0], &["fed", "rate"]))
            .unwrap();
        index
            .insert(&market("m2", "BTC price"), fp(vec![0.0, 1.0], &["btc", "price"]))
            .unwrap();

        let hits = index.search_keywords(&["fed".to_string()], &[1.0, 0.0], 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].market_id, "m1");
        assert!((hits[0].similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn remove_evicts_from_both_paths() {
        let index = MarketIndex::new().unwrap();
        index
            .insert(&market("m1", "Fed rates"), fp(vec![1.0, 0.0], &["fed", "rate"]))
            .unwrap();

        index.remove("m1").unwrap();

        assert!(!index.contains("m1"));
        assert!(index.query(&[1.0, 0.0], 10).is_empty());
        assert!(index.search_keywords(&["fed".to_string()], &[1.0, 0.0], 10).is_empty());
    }
}
