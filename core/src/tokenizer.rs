use lazy_static::lazy_static;
use regex::Regex;
use rust_stemmers::{Algorithm, Stemmer};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::markup::WikiMarkupCleaner;
use crate::TokenSequence;

lazy_static! {
    // Words may carry inner punctuation and pipes; edge punctuation is trimmed before stemming.
    static ref RE: Regex = Regex::new(r"(?u)[\p{L}\p{N}][\p{L}\p{N}_'|.\-]*").expect("valid regex");
    static ref STEMMER: Stemmer = Stemmer::create(Algorithm::English);
    static ref STOPWORDS: HashSet<&'static str> = {
        let words: &[&str] = &[
            "a","about","above","after","again","against","all","am","an","and","any","are","aren't","as","at",
            "be","because","been","before","being","below","between","both","but","by",
            "can","can't","cannot","could","couldn't",
            "did","didn't","do","does","doesn't","doing","don't","down","during",
            "each","few","for","from","further",
            "had","hadn't","has","hasn't","have","haven't","having","he","he'd","he'll","he's","her","here","here's","hers","herself","him","himself","his","how","how's",
            "i","i'd","i'll","i'm","i've","if","in","into","is","isn't","it","it's","its","itself",
            "let's","me","more","most","mustn't","my","myself",
            "no","nor","not","of","off","on","once","only","or","other","ought","our","ours","ourselves","out","over","own",
            "same","she","she'd","she'll","she's","should","shouldn't","so","some","such",
            "than","that","that's","the","their","theirs","them","themselves","then","there","there's","these","they","they'd","they'll","they're","they've","this","those","through","to","too",
            "under","until","up","very",
            "was","wasn't","we","we'd","we'll","we're","we've","were","weren't","what","what's","when","when's","where","where's","which","while","who","who's","whom","why","why's","with","won't","would","wouldn't",
            "you","you'd","you'll","you're","you've","your","yours","yourself","yourselves"
        ];
        words.iter().copied().collect()
    };
}

/// Character reserved by the markup; tokens still holding it are markup debris.
const MARKUP_DELIMITER: char = '|';

fn is_stopword(token: &str) -> bool { STOPWORDS.contains(token) }

fn is_trimmable(c: char) -> bool { c.is_ascii_punctuation() || c.is_ascii_digit() }

fn strip_accents(text: &str) -> String { text.nfkd().filter(|c| !is_combining_mark(*c)).collect() }

/// English stemming tokenizer. Pure: the same text always yields the same sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StemmingTokenizer {
    min_chars: usize,
}

impl Default for StemmingTokenizer {
    fn default() -> Self { Self { min_chars: 4 } }
}

impl StemmingTokenizer {
    /// Tokens shorter than `min_chars` characters are discarded.
    pub fn new(min_chars: usize) -> Self { Self { min_chars } }

    /// Lowercase and strip accents, drop words holding `|`, trim punctuation and
    /// digits from both ends, stem, then keep stems that are long enough and
    /// neither the word nor its stem is a stop word.
    pub fn tokenize(&self, text: &str) -> TokenSequence {
        let normalized = strip_accents(text).to_lowercase();
        let mut tokens = Vec::new();
        for mat in RE.find_iter(&normalized) {
            if mat.as_str().contains(MARKUP_DELIMITER) { continue; }
            let word = mat.as_str().trim_matches(is_trimmable);
            if word.is_empty() || is_stopword(word) { continue; }
            let stem = STEMMER.stem(word);
            let trimmed = stem.trim_matches(is_trimmable);
            if trimmed.chars().count() < self.min_chars || is_stopword(trimmed) { continue; }
            tokens.push(trimmed.to_string());
        }
        tokens
    }
}

/// Cleaner and tokenizer applied together, identically at build and query time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analyzer {
    pub cleaner: WikiMarkupCleaner,
    pub tokenizer: StemmingTokenizer,
}

impl Analyzer {
    pub fn new(cleaner: WikiMarkupCleaner, tokenizer: StemmingTokenizer) -> Self { Self { cleaner, tokenizer } }

    pub fn from_config(config: &crate::config::ModelConfig) -> Self {
        Self::new(WikiMarkupCleaner::new(&config.sections_to_remove), StemmingTokenizer::new(config.min_token_chars))
    }

    pub fn analyze(&self, raw: &str) -> TokenSequence { self.tokenizer.tokenize(&self.cleaner.clean(raw)) }
}
