//! Document retrieval boundary for the Retrieve node

use crate::config::DocumentConfig;
use crate::error::{Result, TollgateError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument};
use tollgate_cache::{ContentHasher, Fingerprint};
use tracing::{debug, info};

/// Indexing heap for the one-shot build
const WRITER_HEAP_BYTES: usize = 50_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub score: f32,
}

/// Source of supporting passages for a request
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Passage>>;

    /// Content hash of the searchable documents
    ///
    /// Cached retrieval notes and answers are tied to this value, so it must
    /// change whenever a document is added, removed or edited.
    fn fingerprint(&self) -> Fingerprint;
}

/// Keyword retriever over a fixed document set (Tantivy BM25, in RAM)
#[derive(Clone)]
pub struct StaticRetriever {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
    documents: usize,
    fingerprint: Fingerprint,
}

fn index_error(e: tantivy::TantivyError) -> TollgateError {
    TollgateError::Retrieval(e.to_string())
}

impl StaticRetriever {
    /// Index `(id, text)` pairs
    pub fn new<I, S, T>(documents: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        let documents: Vec<(String, String)> = documents
            .into_iter()
            .map(|(id, text)| (id.into(), text.into()))
            .collect();

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT | STORED);
        let index = Index::create_in_ram(schema_builder.build());

        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(index_error)?;
        for (id, text) in &documents {
            writer
                .add_document(doc!(
                    id_field => id.as_str(),
                    text_field => text.as_str()
                ))
                .map_err(index_error)?;
        }
        writer.commit().map_err(index_error)?;

        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(index_error)?;

        let fingerprint = ContentHasher::fingerprint(
            "documents",
            documents
                .iter()
                .flat_map(|(id, text)| [id.as_str(), text.as_str()]),
        );
        info!(
            documents = documents.len(),
            fingerprint = fingerprint.short(),
            "Indexed retrieval documents"
        );

        Ok(Self {
            index,
            reader,
            id_field,
            text_field,
            documents: documents.len(),
            fingerprint,
        })
    }

    pub fn from_config(documents: &[DocumentConfig]) -> Result<Self> {
        Self::new(documents.iter().map(|d| (d.id.as_str(), d.text.as_str())))
    }

    pub fn len(&self) -> usize {
        self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents == 0
    }

    fn search(&self, query: &str, limit: usize) -> Result<Vec<Passage>> {
        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.text_field]);
        // Request text is free-form; syntax errors are dropped, not raised.
        let (parsed, errors) = parser.parse_query_lenient(query);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "Ignored query syntax errors");
        }

        let top_docs = searcher
            .search(&parsed, &TopDocs::with_limit(limit))
            .map_err(index_error)?;

        let mut passages = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address).map_err(index_error)?;
            passages.push(Passage {
                id: text_value(&doc, self.id_field),
                text: text_value(&doc, self.text_field),
                score,
            });
        }
        passages.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        Ok(passages)
    }
}

fn text_value(doc: &TantivyDocument, field: Field) -> String {
    doc.get_first(field)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl Retriever for StaticRetriever {
    async fn retrieve(&self, query: &str, limit: usize) -> Result<Vec<Passage>> {
        if limit == 0 || query.trim().is_empty() || self.is_empty() {
            return Ok(Vec::new());
        }
        self.search(query, limit)
    }

    fn fingerprint(&self) -> Fingerprint {
        self.fingerprint.clone()
    }
}
