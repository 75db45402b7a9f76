//! Bundle packager.
//!
//! Final pipeline stage: writes `manifest.json` and verifies every bundle
//! file it references exists. Implements the stage framework trait so it
//! participates in skip/resume like every other stage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::config::PipelineConfig;
use crate::exceptions::{PocketWikiError, PocketWikiResult};
use crate::stage::{compute_input_hash, Stage, TOOL_VERSION};

/// The bundle's top-level manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub tool_version: String,
    pub checkpoint_version: u32,
    pub chunk_count: u64,
    pub avgdl: f64,
    pub created_at: String,
    pub config: PipelineConfig,
}

pub struct PackagerStage {
    pub bundle_dir: PathBuf,
    pub config: PipelineConfig,
    pub chunk_count: u64,
    pub avgdl: f64,
}

impl PackagerStage {
    fn required_files(&self) -> Vec<PathBuf> {
        vec![
            self.bundle_dir.join("chunks.jsonl"),
            self.bundle_dir.join("sparse.idx"),
        ]
    }

    fn manifest_path(&self) -> PathBuf {
        self.bundle_dir.join("manifest.json")
    }
}

#[async_trait]
impl Stage for PackagerStage {
    fn name(&self) -> &str {
        "package"
    }

    fn input_hash(&self) -> PocketWikiResult<String> {
        compute_input_hash(
            self.config.config_hash(),
            &self.required_files(),
            TOOL_VERSION,
        )
    }

    fn declared_outputs(&self) -> Vec<PathBuf> {
        vec![self.manifest_path()]
    }

    async fn run(&self) -> PocketWikiResult<()> {
        for path in self.required_files() {
            if !path.exists() {
                return Err(PocketWikiError::ExternalFailure {
                    collaborator: "packager".to_string(),
                    source: anyhow::anyhow!("required bundle file missing: {}", path.display()),
                });
            }
        }

        let manifest = Manifest {
            tool_version: TOOL_VERSION.to_string(),
            checkpoint_version: 1,
            chunk_count: self.chunk_count,
            avgdl: self.avgdl,
            created_at: Utc::now().to_rfc3339(),
            config: self.config.clone(),
        };

        write_manifest_atomically(&self.manifest_path(), &manifest)
    }
}

fn write_manifest_atomically(path: &Path, manifest: &Manifest) -> PocketWikiResult<()> {
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let bytes = serde_json::to_vec_pretty(manifest)?;
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all().map_err(PocketWikiError::Io)?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn run_fails_when_required_bundle_files_are_missing() {
        let dir = tempdir().unwrap();
        let stage = PackagerStage {
            bundle_dir: dir.path().to_path_buf(),
            config: PipelineConfig::default(),
            chunk_count: 0,
            avgdl: 0.0,
        };
        assert!(stage.run().await.is_err());
    }

    #[tokio::test]
    async fn run_writes_manifest_when_bundle_files_present() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("chunks.jsonl"), b"").unwrap();
        std::fs::write(dir.path().join("sparse.idx"), b"PWB1").unwrap();

        let stage = PackagerStage {
            bundle_dir: dir.path().to_path_buf(),
            config: PipelineConfig::default(),
            chunk_count: 42,
            avgdl: 123.4,
        };
        stage.run().await.unwrap();

        let manifest_bytes = std::fs::read(dir.path().join("manifest.json")).unwrap();
        let manifest: Manifest = serde_json::from_slice(&manifest_bytes).unwrap();
        assert_eq!(manifest.chunk_count, 42);
        assert!((manifest.avgdl - 123.4).abs() < 1e-9);
    }
}
