use criterion::{criterion_group, criterion_main, Criterion};
use similarity_core::builder::ModelBuilder;
use similarity_core::cache::AnalysisCache;
use similarity_core::config::{ModelConfig, SearchConfig};
use similarity_core::repository::SearchRequest;
use similarity_core::tokenizer::Analyzer;
use similarity_core::Document;

const PAGE: &str = "'''Basalt''' is a fine-grained [[volcanic rock|volcanic]] rock formed from the \
rapid cooling of low-viscosity lava rich in magnesium and iron.{{cite web|url=x}} More than 90% of all \
volcanic rock on Earth is basalt.<ref>Survey 2011</ref>\n== Formation ==\nBasaltic lava erupts at \
temperatures between 1100 and 1250 degrees.\n== See also ==\n* [[Gabbro]]\n== References ==\n{{reflist}}\n";

fn corpus() -> Vec<Document> {
    let topics = ["basalt", "granite", "glacier", "orchard", "submarine", "volcano", "harvest", "ocean"];
    (0..400)
        .map(|i| {
            let a = topics[i % topics.len()];
            let b = topics[(i * 7 + 3) % topics.len()];
            Document {
                id: i.to_string(),
                url: String::new(),
                title: format!("{a} {b}"),
                body: format!("{PAGE} The {a} region borders the {b} plateau. Entry {i}."),
            }
        })
        .collect()
}

fn bench_analyze(c: &mut Criterion) {
    let analyzer = Analyzer::default();
    c.bench_function("analyze_page", |b| b.iter(|| analyzer.analyze(PAGE)));
}

fn bench_search(c: &mut Criterion) {
    let config = ModelConfig { min_df: 0.0, max_df: 1.0, ..ModelConfig::default() };
    let model = ModelBuilder::new(config).build(&corpus(), &mut AnalysisCache::new()).expect("bench corpus builds").model;
    let request = SearchRequest::new("volcanic basalt plateau near the glacier").with_k(3);
    let search = SearchConfig::default();
    c.bench_function("search_top3", |b| b.iter(|| model.search(&request, &search)));
}

criterion_group!(benches, bench_analyze, bench_search);
criterion_main!(benches);
