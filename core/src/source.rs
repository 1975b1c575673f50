//! Staged documents as handed over by the fetch step.
//!
//! A staging directory holds single-document JSON files, named either
//! `<anything>.json` or by the bare page id with no extension, and `.jsonl`
//! files (one document per line). JSONL is expanded while discovering;
//! single-document files are only opened by the worker that analyzes them.
//! Hidden files are ignored.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::{Document, Result};

/// Anything a build worker can turn into a [`Document`].
pub trait DocumentSource: Send + Sync {
    /// Short label for log lines.
    fn describe(&self) -> String;

    fn load(&self) -> Result<Document>;
}

impl DocumentSource for Document {
    fn describe(&self) -> String { format!("document {}", self.id) }

    fn load(&self) -> Result<Document> { Ok(self.clone()) }
}

impl<T: DocumentSource + ?Sized> DocumentSource for Box<T> {
    fn describe(&self) -> String { (**self).describe() }

    fn load(&self) -> Result<Document> { (**self).load() }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub path: PathBuf,
}

impl DocumentSource for StagedFile {
    fn describe(&self) -> String { self.path.display().to_string() }

    fn load(&self) -> Result<Document> {
        let reader = BufReader::new(File::open(&self.path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StagedDocument {
    File(StagedFile),
    Inline(Document),
}

impl DocumentSource for StagedDocument {
    fn describe(&self) -> String {
        match self {
            StagedDocument::File(f) => f.describe(),
            StagedDocument::Inline(d) => d.describe(),
        }
    }

    fn load(&self) -> Result<Document> {
        match self {
            StagedDocument::File(f) => f.load(),
            StagedDocument::Inline(d) => d.load(),
        }
    }
}

/// Every staged document under `input` (a file or a directory), in path order.
pub fn discover(input: &Path) -> Result<Vec<StagedDocument>> {
    let mut files: Vec<PathBuf> = Vec::new();
    if input.is_dir() {
        for entry in WalkDir::new(input).sort_by_file_name().into_iter().filter_map(|e| e.ok()) {
            let p = entry.path();
            if p.is_file() && !is_hidden(p) && matches!(extension(p), None | Some("json" | "jsonl")) {
                files.push(p.to_path_buf());
            }
        }
    } else if input.is_file() {
        files.push(input.to_path_buf());
    }

    let mut staged = Vec::new();
    for file in files {
        if extension(&file) == Some("jsonl") {
            read_jsonl(&file, &mut staged)?;
        } else {
            staged.push(StagedDocument::File(StagedFile { path: file }));
        }
    }
    tracing::info!(documents = staged.len(), input = %input.display(), "staged documents discovered");
    Ok(staged)
}

fn extension(path: &Path) -> Option<&str> { path.extension().and_then(|s| s.to_str()) }

fn is_hidden(path: &Path) -> bool {
    path.file_name().and_then(|n| n.to_str()).is_some_and(|n| n.starts_with('.'))
}

fn read_jsonl(file: &Path, out: &mut Vec<StagedDocument>) -> Result<()> {
    let reader = BufReader::new(File::open(file)?);
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() { continue; }
        let doc: Document = serde_json::from_str(&line)?;
        out.push(StagedDocument::Inline(doc));
    }
    Ok(())
}

/// Shuffle with a seeded RNG and keep `fraction` of the documents (at least one
/// when any exist). The remainder is returned second, for held-out validation.
pub fn select_training<T>(mut docs: Vec<T>, fraction: f64, seed: u64) -> (Vec<T>, Vec<T>) {
    let mut rng = StdRng::seed_from_u64(seed);
    docs.shuffle(&mut rng);
    let keep = ((docs.len() as f64 * fraction).round() as usize).clamp(docs.len().min(1), docs.len());
    let held_out = docs.split_off(keep);
    (docs, held_out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_json_and_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("a.json"),
            r#"{"pageid":"1","title":"Apple","url":"https://w/Apple","wikitext":"apple text"}"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("b.jsonl"),
            "{\"id\":\"2\",\"title\":\"Banana\",\"body\":\"banana\"}\n\n{\"id\":\"3\",\"title\":\"Pie\",\"text\":\"pie\"}\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let staged = discover(dir.path()).unwrap();
        assert_eq!(staged.len(), 3);
        assert!(matches!(staged[0], StagedDocument::File(_)));
        let first = staged[0].load().unwrap();
        assert_eq!(first.id, "1");
        assert_eq!(first.body, "apple text");
        let ids: Vec<String> = staged[1..].iter().map(|s| s.load().unwrap().id).collect();
        assert_eq!(ids, vec!["2", "3"]);
        assert_eq!(staged[2].load().unwrap().url, "");
    }

    #[test]
    fn extensionless_page_files_are_documents() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("12345"),
            r#"{"pageid":"12345","title":"Basalt","url":"https://w/Basalt","wikitext":"volcanic rock"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join(".DS_Store"), "junk").unwrap();

        let staged = discover(dir.path()).unwrap();
        assert_eq!(staged.len(), 1);
        assert!(matches!(staged[0], StagedDocument::File(_)));
        let doc = staged[0].load().unwrap();
        assert_eq!(doc.id, "12345");
        assert_eq!(doc.body, "volcanic rock");
    }

    #[test]
    fn broken_file_fails_on_load_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bad.json"), "{ not json").unwrap();
        let staged = discover(dir.path()).unwrap();
        assert_eq!(staged.len(), 1);
        assert!(staged[0].load().is_err());
    }

    #[test]
    fn training_selection_is_seeded() {
        let docs: Vec<u32> = (0..10).collect();
        let (a, rest_a) = select_training(docs.clone(), 0.7, 9);
        let (b, _) = select_training(docs.clone(), 0.7, 9);
        assert_eq!(a, b);
        assert_eq!(a.len(), 7);
        assert_eq!(rest_a.len(), 3);
        let (all, none) = select_training(docs, 1.0, 1);
        assert_eq!(all.len(), 10);
        assert!(none.is_empty());
        let (one, _) = select_training(vec![5u32], 0.01, 3);
        assert_eq!(one, vec![5]);
    }
}
