use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Serialize;
use tracing::{debug, info};

use crate::domain::GeneId;
use crate::error::GemproError;

/// Directory tree of one project: `<root>/<name>/{model,data,sequences,structures/by_gene}`.
#[derive(Debug, Clone)]
pub struct ProjectLayout {
    base_dir: Utf8PathBuf,
}

impl ProjectLayout {
    pub fn new(root: impl AsRef<Utf8Path>, name: &str) -> Self {
        Self {
            base_dir: root.as_ref().join(name),
        }
    }

    pub fn base_dir(&self) -> &Utf8Path {
        &self.base_dir
    }

    pub fn model_dir(&self) -> Utf8PathBuf {
        self.base_dir.join("model")
    }

    pub fn data_dir(&self) -> Utf8PathBuf {
        self.base_dir.join("data")
    }

    pub fn sequence_dir(&self) -> Utf8PathBuf {
        self.base_dir.join("sequences")
    }

    pub fn structure_dir(&self) -> Utf8PathBuf {
        self.base_dir.join("structures")
    }

    pub fn structure_by_gene_dir(&self) -> Utf8PathBuf {
        self.structure_dir().join("by_gene")
    }

    pub fn gene_sequence_dir(&self, gene: &GeneId) -> Utf8PathBuf {
        self.sequence_dir().join(gene.as_str())
    }

    pub fn gene_structure_dir(&self, gene: &GeneId) -> Utf8PathBuf {
        self.structure_by_gene_dir().join(gene.as_str())
    }

    pub fn annotations_path(&self) -> Utf8PathBuf {
        self.data_dir().join("annotations.json")
    }

    pub fn table_path(&self, table: &str) -> Utf8PathBuf {
        self.data_dir().join(format!("{table}.json"))
    }

    pub fn ensure_dirs(&self) -> Result<(), GemproError> {
        for dir in [
            self.base_dir.clone(),
            self.model_dir(),
            self.data_dir(),
            self.sequence_dir(),
            self.structure_dir(),
            self.structure_by_gene_dir(),
        ] {
            if dir.as_std_path().exists() {
                debug!("directory already exists: {dir}");
                continue;
            }
            fs::create_dir_all(dir.as_std_path())
                .map_err(|err| GemproError::Filesystem(format!("create {dir}: {err}")))?;
            info!("created directory: {dir}");
        }
        Ok(())
    }

    pub fn ensure_dir(dir: &Utf8Path) -> Result<(), GemproError> {
        fs::create_dir_all(dir.as_std_path())
            .map_err(|err| GemproError::Filesystem(format!("create {dir}: {err}")))
    }

    pub fn write_json<T: Serialize + ?Sized>(
        path: &Utf8Path,
        value: &T,
    ) -> Result<(), GemproError> {
        let content = serde_json::to_vec_pretty(value)
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        Self::write_bytes_atomic(path, &content)
    }

    pub fn write_bytes_atomic(path: &Utf8Path, content: &[u8]) -> Result<(), GemproError> {
        let parent = path
            .parent()
            .ok_or_else(|| GemproError::Filesystem(format!("invalid destination path {path}")))?;
        Self::ensure_dir(parent)?;
        let temp = tempfile::Builder::new()
            .prefix(".gempro-write")
            .tempfile_in(parent.as_std_path())
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        fs::write(temp.path(), content).map_err(|err| GemproError::Filesystem(err.to_string()))?;
        temp.persist(path.as_std_path())
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        Ok(())
    }

    /// Copies `source` into `dest_dir`, keeping or replacing the file name.
    pub fn copy_file_atomic(
        source: &Utf8Path,
        dest_dir: &Utf8Path,
        rename_to: Option<&str>,
    ) -> Result<Utf8PathBuf, GemproError> {
        let file_name = match rename_to {
            Some(name) => name.to_string(),
            None => source
                .file_name()
                .ok_or_else(|| GemproError::Filesystem(format!("no file name in {source}")))?
                .to_string(),
        };
        let dest = dest_dir.join(file_name);
        if dest == source {
            return Ok(dest);
        }
        Self::ensure_dir(dest_dir)?;
        let temp = tempfile::Builder::new()
            .prefix(".gempro-copy")
            .tempfile_in(dest_dir.as_std_path())
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        fs::copy(source.as_std_path(), temp.path())
            .map_err(|err| GemproError::Filesystem(format!("copy {source}: {err}")))?;
        temp.persist(dest.as_std_path())
            .map_err(|err| GemproError::Filesystem(err.to_string()))?;
        Ok(dest)
    }
}
