use crate::repository::Model;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{create_dir_all, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

/// Bumped whenever the layout of [`Model`] changes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaFile {
    pub num_docs: usize,
    pub num_terms: usize,
    pub n_components: usize,
    pub explained_variance: Option<f64>,
    pub created_at: String,
    pub version: u32,
}

impl MetaFile {
    pub fn describe(model: &Model) -> Self {
        let created_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_default();
        Self {
            num_docs: model.repository().len(),
            num_terms: model.vectorizer().n_features(),
            n_components: model.reducer().map_or(0, |r| r.n_components()),
            explained_variance: model.reducer().map(|r| r.explained_variance_ratio()),
            created_at,
            version: FORMAT_VERSION,
        }
    }
}

pub struct ModelPaths {
    pub root: PathBuf,
}

impl ModelPaths {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self { root: root.as_ref().to_path_buf() }
    }
    pub fn model(&self) -> PathBuf { self.root.join("model.bin") }
    pub fn meta(&self) -> PathBuf { self.root.join("meta.json") }
    pub fn analysis_cache(&self) -> PathBuf { self.root.join("analysis_cache.bin") }
    pub fn texts_dir(&self) -> PathBuf { self.root.join("texts") }
}

/// Write the whole model as one artifact. The file is written next to its
/// final name and renamed, so readers never see a partial model.
pub fn save_model(paths: &ModelPaths, model: &Model) -> Result<()> {
    create_dir_all(&paths.root)?;
    let target = paths.model();
    let tmp = target.with_extension("bin.tmp");
    {
        let mut w = BufWriter::new(File::create(&tmp)?);
        bincode::serialize_into(&mut w, &FORMAT_VERSION)?;
        bincode::serialize_into(&mut w, model)?;
        w.flush()?;
    }
    std::fs::rename(&tmp, &target)?;
    tracing::info!(path = %target.display(), documents = model.repository().len(), "model saved");
    Ok(())
}

/// Load and fully check a model. Any mismatch is fatal.
pub fn load_model(paths: &ModelPaths) -> Result<Model> {
    let path = paths.model();
    let mut r = BufReader::new(File::open(&path)?);
    let version: u32 = bincode::deserialize_from(&mut r).map_err(|e| Error::CorruptModel(format!("{}: {e}", path.display())))?;
    if version != FORMAT_VERSION {
        return Err(Error::CorruptModel(format!("format version {version}, expected {FORMAT_VERSION}")));
    }
    let model: Model = bincode::deserialize_from(&mut r).map_err(|e| Error::CorruptModel(format!("{}: {e}", path.display())))?;
    let mut rest = [0u8; 1];
    if r.read(&mut rest)? != 0 {
        return Err(Error::CorruptModel("trailing bytes after model".into()));
    }
    model.check()?;
    tracing::info!(path = %path.display(), documents = model.repository().len(), terms = model.vectorizer().n_features(), "model loaded");
    Ok(model)
}

pub fn save_meta(paths: &ModelPaths, meta: &MetaFile) -> Result<()> {
    create_dir_all(&paths.root)?;
    let mut f = File::create(paths.meta())?;
    let json = serde_json::to_string_pretty(meta)?;
    f.write_all(json.as_bytes())?;
    Ok(())
}

pub fn load_meta(paths: &ModelPaths) -> Result<MetaFile> {
    let mut f = File::open(paths.meta())?;
    let mut buf = String::new();
    f.read_to_string(&mut buf)?;
    let meta: MetaFile = serde_json::from_str(&buf)?;
    Ok(meta)
}

/// Model plus its `meta.json`.
pub fn save_all(paths: &ModelPaths, model: &Model) -> Result<MetaFile> {
    save_model(paths, model)?;
    let meta = MetaFile::describe(model);
    save_meta(paths, &meta)?;
    Ok(meta)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::ModelBuilder;
    use crate::cache::AnalysisCache;
    use crate::config::{ModelConfig, SearchConfig};
    use crate::repository::SearchRequest;
    use crate::Document;

    fn model() -> Model {
        let docs: Vec<Document> = [("1", "Volcano", "Volcanoes erupt molten lava."), ("2", "Glacier", "Glaciers carve valleys slowly.")]
            .iter()
            .map(|&(id, title, body)| Document { id: id.into(), url: String::new(), title: title.into(), body: body.into() })
            .collect();
        let config = ModelConfig { min_df: 0.0, max_df: 1.0, workers: 1, ..ModelConfig::default() };
        ModelBuilder::new(config).build(&docs, &mut AnalysisCache::new()).unwrap().model
    }

    #[test]
    fn save_then_load_is_identical() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::new(dir.path());
        let model = model();
        let meta = save_all(&paths, &model).unwrap();
        assert_eq!(meta.num_docs, 2);
        assert_eq!(load_meta(&paths).unwrap(), meta);

        let loaded = load_model(&paths).unwrap();
        assert_eq!(loaded, model);
        let request = SearchRequest::new("lava erupting");
        let config = SearchConfig::default();
        assert_eq!(loaded.search(&request, &config).unwrap(), model.search(&request, &config).unwrap());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::new(dir.path());
        let mut bytes = bincode::serialize(&(FORMAT_VERSION + 1)).unwrap();
        bytes.extend(bincode::serialize(&model()).unwrap());
        std::fs::write(paths.model(), bytes).unwrap();
        assert!(matches!(load_model(&paths), Err(Error::CorruptModel(_))));
    }

    #[test]
    fn truncated_artifact_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ModelPaths::new(dir.path());
        save_model(&paths, &model()).unwrap();
        let bytes = std::fs::read(paths.model()).unwrap();
        std::fs::write(paths.model(), &bytes[..bytes.len() / 2]).unwrap();
        assert!(matches!(load_model(&paths), Err(Error::CorruptModel(_))));
    }
}
