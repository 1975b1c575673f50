//! Sparse TF-IDF document similarity over a fixed reference corpus.
//!
//! Raw wiki markup goes through [`markup::WikiMarkupCleaner`] and
//! [`tokenizer::StemmingTokenizer`], a [`vectorizer::VectorizerBuilder`] learns
//! the vocabulary once, and the resulting [`repository::Model`] answers
//! nearest-neighbour queries through [`index::SimilarityIndex`].

pub mod builder;
pub mod cache;
pub mod config;
pub mod error;
pub mod index;
pub mod markup;
pub mod matrix;
pub mod persist;
pub mod reducer;
pub mod repository;
pub mod source;
pub mod tokenizer;
pub mod validation;
pub mod vectorizer;

use serde::{Deserialize, Serialize};

pub use error::{Error, Result};

pub type TermId = u32;

/// Normalized terms of one document, in text order.
pub type TokenSequence = Vec<String>;

/// A fetched document. The core only ever reads these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(alias = "pageid")]
    pub id: String,
    #[serde(default)]
    pub url: String,
    pub title: String,
    #[serde(alias = "wikitext", alias = "text")]
    pub body: String,
}

impl Document {
    pub fn meta(&self) -> DocMeta {
        DocMeta { external_id: self.id.clone(), title: self.title.clone(), url: self.url.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocMeta {
    pub external_id: String,
    pub title: String,
    pub url: String,
}

/// One ranked result of a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub id: String,
    pub score: f32,
}
