//! Offline model construction.
//!
//! Documents are split into one contiguous chunk per worker. Each worker owns a
//! [`WorkerContext`] (fault budget, artifact throttle) and only reads the
//! shared analysis cache; fresh token sequences come back with the results and
//! are merged into the cache afterwards, on the calling thread. Fitting runs
//! single-threaded over the merged corpus.

use rayon::prelude::*;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::cache::{AnalysisCache, CacheKey};
use crate::config::ModelConfig;
use crate::matrix::{CorpusMatrix, CsrMatrix};
use crate::reducer::DimensionalityReducer;
use crate::repository::{CorpusRepository, Model};
use crate::source::DocumentSource;
use crate::tokenizer::Analyzer;
use crate::vectorizer::VectorizerBuilder;
use crate::{DocMeta, Document, Error, Result, TokenSequence};

/// Receives the cleaned text of every analyzed document.
pub trait ArtifactSink: Send + Sync {
    fn write(&self, doc: &Document, text: &str) -> Result<()>;
}

/// Writes `<dir>/<id>.txt` per document. Bytes of the id outside
/// `[A-Za-z0-9_-]` are percent-encoded, so distinct ids never share a file.
#[derive(Debug, Clone)]
pub struct TextDirSink {
    dir: PathBuf,
}

impl TextDirSink {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn path_for(&self, doc_id: &str) -> PathBuf {
        let mut name = String::with_capacity(doc_id.len());
        for b in doc_id.bytes() {
            if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
                name.push(b as char);
            } else {
                name.push_str(&format!("%{b:02X}"));
            }
        }
        self.dir.join(format!("{name}.txt"))
    }
}

impl ArtifactSink for TextDirSink {
    fn write(&self, doc: &Document, text: &str) -> Result<()> {
        fs::write(self.path_for(&doc.id), text)?;
        Ok(())
    }
}

/// Enforces a minimum interval between consecutive calls of one worker.
#[derive(Debug)]
pub struct Throttle {
    interval: Duration,
    next: Option<Instant>,
}

impl Throttle {
    pub fn new(interval: Duration) -> Self { Self { interval, next: None } }

    /// Share a global requests-per-second ceiling evenly across `workers`.
    pub fn per_worker(max_qps: f64, workers: usize) -> Result<Self> {
        if !(max_qps > 0.0) {
            return Err(Error::InvalidConfig(format!("max_artifact_qps must be positive, got {max_qps}")));
        }
        Ok(Self::new(Duration::from_secs_f64(workers.max(1) as f64 / max_qps)))
    }

    pub fn interval(&self) -> Duration { self.interval }

    /// Block until the interval since the previous call has elapsed.
    pub fn wait(&mut self) {
        if let Some(next) = self.next {
            let now = Instant::now();
            if next > now {
                std::thread::sleep(next - now);
            }
        }
        self.next = Some(Instant::now() + self.interval);
    }
}

/// Per-worker count of skipped documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultBudget {
    max: usize,
    faults: usize,
}

impl FaultBudget {
    pub fn new(max: usize) -> Self { Self { max, faults: 0 } }

    pub fn faults(&self) -> usize { self.faults }

    /// Count one fault; `true` once the budget is exceeded.
    pub fn record(&mut self) -> bool {
        self.faults += 1;
        self.faults > self.max
    }
}

/// State owned by one worker for the length of a build.
pub struct WorkerContext<'a> {
    pub worker: usize,
    analyzer: &'a Analyzer,
    cache: &'a AnalysisCache,
    artifacts: Option<(&'a dyn ArtifactSink, Throttle)>,
    budget: FaultBudget,
    abort: &'a AtomicBool,
}

impl<'a> WorkerContext<'a> {
    /// Analyze `doc`, reusing cached tokens when its body is unchanged.
    /// The second value is set when the tokens were computed here.
    fn analyze(&mut self, doc: &Document) -> Result<(TokenSequence, Option<CacheKey>)> {
        let cache = self.cache;
        let key = CacheKey::for_document(doc);
        let cached = cache.get(&key);
        if let (Some(tokens), None) = (cached, &self.artifacts) {
            return Ok((tokens.clone(), None));
        }
        let text = self.analyzer.cleaner.clean(&doc.body);
        if let Some((sink, throttle)) = self.artifacts.as_mut() {
            throttle.wait();
            sink.write(doc, &text)?;
        }
        match cached {
            Some(tokens) => Ok((tokens.clone(), None)),
            None => Ok((self.analyzer.tokenizer.tokenize(&text), Some(key))),
        }
    }
}

struct WorkerOutput {
    rows: Vec<(DocMeta, TokenSequence)>,
    fresh: Vec<(CacheKey, TokenSequence)>,
    skipped: usize,
}

fn run_worker<S: DocumentSource>(mut ctx: WorkerContext<'_>, chunk: &[S]) -> Result<WorkerOutput> {
    let mut out = WorkerOutput { rows: Vec::with_capacity(chunk.len()), fresh: Vec::new(), skipped: 0 };
    for source in chunk {
        if ctx.abort.load(Ordering::Relaxed) {
            return Err(Error::BuildAborted);
        }
        let analyzed = source.load().and_then(|doc| ctx.analyze(&doc).map(|r| (doc, r)));
        match analyzed {
            Ok((doc, (tokens, fresh))) => {
                if let Some(key) = fresh {
                    out.fresh.push((key, tokens.clone()));
                }
                out.rows.push((doc.meta(), tokens));
            }
            Err(e) => {
                out.skipped += 1;
                let exceeded = ctx.budget.record();
                tracing::warn!(worker = ctx.worker, source = %source.describe(), error = %e, faults = ctx.budget.faults(), "skipping document");
                if exceeded {
                    ctx.abort.store(true, Ordering::Relaxed);
                    tracing::error!(worker = ctx.worker, faults = ctx.budget.faults(), "fault budget exceeded, aborting build");
                    return Err(Error::WorkerAborted { worker: ctx.worker, faults: ctx.budget.faults() });
                }
            }
        }
    }
    tracing::debug!(worker = ctx.worker, documents = out.rows.len(), fresh = out.fresh.len(), "worker finished");
    Ok(out)
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub documents: usize,
    pub skipped: usize,
    pub vocabulary: usize,
    pub cache_changed: bool,
    pub explained_variance: Option<f64>,
}

#[derive(Debug)]
pub struct BuildOutput {
    pub model: Model,
    pub report: BuildReport,
}

pub struct ModelBuilder {
    config: ModelConfig,
    analyzer: Analyzer,
    sink: Option<Arc<dyn ArtifactSink>>,
}

impl ModelBuilder {
    pub fn new(config: ModelConfig) -> Self {
        let analyzer = Analyzer::from_config(&config);
        Self { config, analyzer, sink: None }
    }

    pub fn with_artifact_sink(mut self, sink: Arc<dyn ArtifactSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn config(&self) -> &ModelConfig { &self.config }

    fn workers(&self) -> usize {
        if self.config.workers > 0 {
            self.config.workers
        } else {
            std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
        }
    }

    /// Analyze `sources`, fit the vectorizer and assemble the model. Freshly
    /// analyzed documents are merged into `cache`; saving it is up to the caller.
    pub fn build<S: DocumentSource>(&self, sources: &[S], cache: &mut AnalysisCache) -> Result<BuildOutput> {
        self.config.validate()?;
        if sources.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let workers = self.workers().min(sources.len());
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("worker pool: {e}")))?;
        tracing::info!(documents = sources.len(), workers, cached = cache.len(), "analyzing documents");

        let start = Instant::now();
        let abort = AtomicBool::new(false);
        let chunk_size = sources.len().div_ceil(workers);
        let results: Vec<Result<WorkerOutput>> = {
            let shared: &AnalysisCache = cache;
            let sink = self.sink.as_deref();
            pool.install(|| {
                sources
                    .par_chunks(chunk_size)
                    .enumerate()
                    .map(|(worker, chunk)| -> Result<WorkerOutput> {
                        let artifacts = match sink {
                            Some(sink) => Some((sink, Throttle::per_worker(self.config.max_artifact_qps, workers)?)),
                            None => None,
                        };
                        let ctx = WorkerContext {
                            worker,
                            analyzer: &self.analyzer,
                            cache: shared,
                            artifacts,
                            budget: FaultBudget::new(self.config.max_faults_per_worker),
                            abort: &abort,
                        };
                        run_worker(ctx, chunk)
                    })
                    .collect()
            })
        };

        let mut outputs = Vec::with_capacity(results.len());
        let mut aborted = None;
        for result in results {
            match result {
                Ok(output) => outputs.push(output),
                Err(e @ Error::WorkerAborted { .. }) => return Err(e),
                Err(e) => aborted = aborted.or(Some(e)),
            }
        }
        if let Some(e) = aborted {
            return Err(e);
        }

        // single writer: workers are done
        let mut corpus = Vec::with_capacity(sources.len());
        let mut metadata = Vec::with_capacity(sources.len());
        let mut skipped = 0;
        let mut cache_changed = false;
        for output in outputs {
            skipped += output.skipped;
            cache_changed |= cache.merge(output.fresh);
            for (meta, tokens) in output.rows {
                metadata.push(meta);
                corpus.push(tokens);
            }
        }
        let pruned = {
            let live: HashSet<&str> = metadata.iter().map(|m| m.external_id.as_str()).collect();
            cache.retain_ids(&live)
        };
        cache_changed |= pruned > 0;
        tracing::info!(documents = corpus.len(), skipped, pruned, cache_changed, elapsed_ms = start.elapsed().as_millis() as u64, "analysis complete");
        if corpus.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let vectorizer = VectorizerBuilder::from_config(&self.config).fit(&corpus)?;
        let rows: Vec<_> = pool.install(|| corpus.par_iter().map(|tokens| vectorizer.transform(tokens)).collect());
        drop(corpus);
        let mut sparse = CsrMatrix::new(vectorizer.n_features());
        for row in &rows {
            sparse.push_row(row)?;
        }
        drop(rows);
        tracing::info!(rows = sparse.n_rows(), cols = sparse.n_cols(), nnz = sparse.nnz(), "corpus matrix assembled");

        let (reducer, matrix) = if self.config.n_components > 0 {
            let (reducer, reduced) = DimensionalityReducer::fit(&sparse, self.config.n_components, self.config.seed)?;
            tracing::info!(
                components = reducer.n_components(),
                explained_variance = reducer.explained_variance_ratio(),
                "dimensionality reduced"
            );
            (Some(reducer), CorpusMatrix::Dense(reduced))
        } else {
            (None, CorpusMatrix::Sparse(sparse))
        };

        let report = BuildReport {
            documents: metadata.len(),
            skipped,
            vocabulary: vectorizer.n_features(),
            cache_changed,
            explained_variance: reducer.as_ref().map(|r| r.explained_variance_ratio()),
        };
        let repository = CorpusRepository::build(matrix, metadata)?;
        let model = Model::new(self.analyzer.clone(), vectorizer, reducer, repository)?;
        Ok(BuildOutput { model, report })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SearchConfig;
    use crate::repository::SearchRequest;
    use std::sync::Mutex;

    fn doc(id: &str, title: &str, body: &str) -> Document {
        Document { id: id.into(), url: format!("https://wiki.test/{title}"), title: title.into(), body: body.into() }
    }

    fn fruit_corpus() -> Vec<Document> {
        vec![
            doc("1", "Apple", "Apple orchards grow apple trees."),
            doc("2", "Banana", "Banana plantations harvest banana bunches."),
            doc("3", "Apple pie", "Apple pie is baked with sliced apple filling."),
        ]
    }

    fn open_config() -> ModelConfig {
        ModelConfig { min_df: 0.0, max_df: 1.0, workers: 2, ..ModelConfig::default() }
    }

    struct FailingSource;

    impl DocumentSource for FailingSource {
        fn describe(&self) -> String { "failing".into() }

        fn load(&self) -> Result<Document> { Err(Error::CorruptModel("unreadable".into())) }
    }

    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<(String, String)>>,
    }

    impl ArtifactSink for RecordingSink {
        fn write(&self, doc: &Document, text: &str) -> Result<()> {
            self.written.lock().unwrap().push((doc.id.clone(), text.to_string()));
            Ok(())
        }
    }

    #[test]
    fn apple_query_ranks_apple_documents_above_banana() {
        let mut cache = AnalysisCache::new();
        let out = ModelBuilder::new(open_config()).build(&fruit_corpus(), &mut cache).unwrap();
        assert_eq!(out.report.documents, 3);
        assert!(out.report.cache_changed);
        assert_eq!(cache.len(), 3);

        let hits = out.model.search(&SearchRequest::new("apple"), &SearchConfig::default()).unwrap();
        let rank = |id: &str| hits.iter().position(|h| h.id == id).unwrap();
        assert!(rank("1") < rank("2"));
        assert!(rank("3") < rank("2"));
        assert!(hits[rank("2")].score < hits[rank("1")].score);
    }

    #[test]
    fn stop_word_query_returns_nothing() {
        let mut cache = AnalysisCache::new();
        let out = ModelBuilder::new(open_config()).build(&fruit_corpus(), &mut cache).unwrap();
        let hits = out.model.search(&SearchRequest::new("a an is"), &SearchConfig::default()).unwrap();
        assert!(hits.is_empty());
        assert!(out.model.search(&SearchRequest::new("   "), &SearchConfig::default()).unwrap().is_empty());
    }

    #[test]
    fn second_build_reuses_cache() {
        let mut cache = AnalysisCache::new();
        let builder = ModelBuilder::new(open_config());
        let first = builder.build(&fruit_corpus(), &mut cache).unwrap();
        let second = builder.build(&fruit_corpus(), &mut cache).unwrap();
        assert!(!second.report.cache_changed);
        assert_eq!(first.model, second.model);

        let mut edited = fruit_corpus();
        edited[1].body = "Banana bread needs ripe banana.".into();
        let third = builder.build(&edited, &mut cache).unwrap();
        assert!(third.report.cache_changed);
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn faults_within_budget_are_skipped() {
        let sources: Vec<Box<dyn DocumentSource>> = vec![
            Box::new(fruit_corpus()[0].clone()),
            Box::new(FailingSource),
            Box::new(fruit_corpus()[2].clone()),
        ];
        let config = ModelConfig { workers: 1, max_faults_per_worker: 1, ..open_config() };
        let out = ModelBuilder::new(config).build(&sources, &mut AnalysisCache::new()).unwrap();
        assert_eq!(out.report.documents, 2);
        assert_eq!(out.report.skipped, 1);
    }

    #[test]
    fn exceeding_fault_budget_aborts() {
        let sources: Vec<Box<dyn DocumentSource>> = vec![Box::new(FailingSource), Box::new(FailingSource), Box::new(fruit_corpus()[0].clone())];
        let config = ModelConfig { workers: 1, max_faults_per_worker: 1, ..open_config() };
        let err = ModelBuilder::new(config).build(&sources, &mut AnalysisCache::new()).unwrap_err();
        assert!(matches!(err, Error::WorkerAborted { worker: 0, faults: 2 }));
    }

    #[test]
    fn sink_receives_cleaned_text() {
        let sink = Arc::new(RecordingSink::default());
        let config = ModelConfig { max_artifact_qps: 1000.0, ..open_config() };
        let mut corpus = fruit_corpus();
        corpus[0].body = "Apple trees.\n== See also ==\nPear\n".into();
        ModelBuilder::new(config).with_artifact_sink(sink.clone()).build(&corpus, &mut AnalysisCache::new()).unwrap();
        let mut written = sink.written.lock().unwrap().clone();
        written.sort();
        assert_eq!(written.len(), 3);
        assert_eq!(written[0], ("1".to_string(), "Apple trees.".to_string()));
    }

    #[test]
    fn reduced_model_keeps_ranking() {
        let config = ModelConfig { n_components: 2, ..open_config() };
        let out = ModelBuilder::new(config).build(&fruit_corpus(), &mut AnalysisCache::new()).unwrap();
        assert!(out.report.explained_variance.is_some());
        let hits = out.model.search(&SearchRequest::new("banana plantations").with_k(1), &SearchConfig::default()).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "2");
    }

    #[test]
    fn throttle_spaces_calls() {
        let mut throttle = Throttle::per_worker(100.0, 2).unwrap();
        assert_eq!(throttle.interval(), Duration::from_millis(20));
        let start = Instant::now();
        throttle.wait();
        throttle.wait();
        throttle.wait();
        assert!(start.elapsed() >= Duration::from_millis(40));
        assert!(Throttle::per_worker(0.0, 2).is_err());
    }

    #[test]
    fn invalid_artifact_rate_is_rejected() {
        for max_artifact_qps in [0.0, -3.0, f64::NAN] {
            let config = ModelConfig { max_artifact_qps, ..open_config() };
            let err = ModelBuilder::new(config).build(&fruit_corpus(), &mut AnalysisCache::new()).unwrap_err();
            assert!(matches!(err, Error::InvalidConfig(_)), "qps {max_artifact_qps}");
        }
    }

    #[test]
    fn removed_documents_leave_the_cache() {
        let mut cache = AnalysisCache::new();
        let builder = ModelBuilder::new(open_config());
        builder.build(&fruit_corpus(), &mut cache).unwrap();
        assert_eq!(cache.len(), 3);
        let out = builder.build(&fruit_corpus()[..2], &mut cache).unwrap();
        assert!(out.report.cache_changed);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn text_sink_sanitizes_ids() {
        let dir = tempfile::tempdir().unwrap();
        let sink = TextDirSink::create(dir.path().join("texts")).unwrap();
        assert_eq!(sink.path_for("a/b c"), dir.path().join("texts").join("a%2Fb%20c.txt"));
        assert_ne!(sink.path_for("a/b"), sink.path_for("a_b"));
        assert_eq!(sink.path_for("Page-1_x"), dir.path().join("texts").join("Page-1_x.txt"));
        sink.write(&doc("7", "Seven", ""), "plain").unwrap();
        assert_eq!(fs::read_to_string(sink.path_for("7")).unwrap(), "plain");
    }
}
