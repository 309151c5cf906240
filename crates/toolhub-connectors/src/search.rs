//! Search index connector.

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::ConnectorError;

/// Indexed document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
    pub body: String,
}

/// A ranked query match.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub id: String,
    pub title: String,
    pub score: f64,
    pub snippet: String,
}

/// Full-text index.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Add or replace a document.
    async fn index(&self, doc: Document) -> Result<(), ConnectorError>;

    /// Return at most `top` hits for `query`, best first.
    async fn search(&self, query: &str, top: usize) -> Result<Vec<SearchHit>, ConnectorError>;
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn snippet(body: &str) -> String {
    const MAX: usize = 160;
    if body.len() <= MAX {
        return body.to_owned();
    }
    let mut end = MAX;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &body[..end])
}

/// In-memory index scoring by query-term overlap.
#[derive(Debug, Default)]
pub struct MemorySearchIndex {
    docs: RwLock<BTreeMap<String, Document>>,
}

impl MemorySearchIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SearchIndex for MemorySearchIndex {
    async fn index(&self, doc: Document) -> Result<(), ConnectorError> {
        if doc.id.is_empty() {
            return Err(ConnectorError::InvalidInput("document id is empty".into()));
        }
        self.docs.write().await.insert(doc.id.clone(), doc);
        Ok(())
    }

    async fn search(&self, query: &str, top: usize) -> Result<Vec<SearchHit>, ConnectorError> {
        let wanted = terms(query);
        if wanted.is_empty() {
            return Err(ConnectorError::InvalidInput("query has no terms".into()));
        }

        let docs = self.docs.read().await;
        #[allow(clippy::cast_precision_loss)]
        let mut hits: Vec<SearchHit> = docs
            .values()
            .filter_map(|doc| {
                let mut have = terms(&doc.body);
                have.extend(terms(&doc.title));
                let matched = wanted.intersection(&have).count();
                (matched > 0).then(|| SearchHit {
                    id: doc.id.clone(),
                    title: doc.title.clone(),
                    score: matched as f64 / wanted.len() as f64,
                    snippet: snippet(&doc.body),
                })
            })
            .collect();
        drop(docs);

        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(top);
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, title: &str, body: &str) -> Document {
        Document {
            id: id.into(),
            title: title.into(),
            body: body.into(),
        }
    }

    #[tokio::test]
    async fn test_ranks_by_term_overlap() {
        let index = MemorySearchIndex::new();
        index.index(doc("1", "Rust", "async runtime for rust")).await.unwrap();
        index.index(doc("2", "Tokio", "tokio is an async runtime")).await.unwrap();
        index.index(doc("3", "Cooking", "pasta recipes")).await.unwrap();

        let hits = index.search("Tokio async runtime", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "2");
        assert!((hits[0].score - 1.0).abs() < f64::EPSILON);

        let top_one = index.search("runtime", 1).await.unwrap();
        assert_eq!(top_one.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_query_is_invalid() {
        let index = MemorySearchIndex::new();
        assert!(matches!(
            index.search("  ?! ", 3).await,
            Err(ConnectorError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_snippet_cuts_on_char_boundary() {
        let body = "é".repeat(100);
        let cut = snippet(&body);
        assert!(cut.ends_with("..."));
        assert!(cut.len() <= 163);
    }
}
