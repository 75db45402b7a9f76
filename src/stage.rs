//! Stage framework.
//!
//! Generic input-hash-based skip/resume harness: before running a stage,
//! load its prior [`crate::data::StageState`]; if it is `completed`, its
//! `input_hash` matches, and every declared output exists, skip the run
//! entirely. After a successful run, write the new state atomically. A
//! failing `run` never writes state, so the next invocation re-runs it.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;

use crate::data::StageState;
use crate::exceptions::{PocketWikiError, PocketWikiResult};
use crate::logging::{report_progress, ProgressEvent};

/// Tool version baked into every stage's `input_hash` so an upgrade that
/// changes stage semantics invalidates prior state even when config and
/// inputs are unchanged.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

#[async_trait]
pub trait Stage: Send + Sync {
    fn name(&self) -> &str;

    /// Deterministic over config + input file digests + tool version. A
    /// cheap `(len, mtime)` digest is used for input files rather than
    /// hashing multi-gigabyte dump contents in full.
    fn input_hash(&self) -> PocketWikiResult<String>;

    fn declared_outputs(&self) -> Vec<PathBuf>;

    async fn run(&self) -> PocketWikiResult<()>;
}

/// Hashes `(config_hash, file digests, tool_version)` into the stable hex
/// string stored as a stage's `input_hash`.
pub fn compute_input_hash(
    config_hash: u64,
    input_paths: &[PathBuf],
    tool_version: &str,
) -> PocketWikiResult<String> {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    config_hash.hash(&mut hasher);
    tool_version.hash(&mut hasher);
    for path in input_paths {
        path.hash(&mut hasher);
        match std::fs::metadata(path) {
            Ok(meta) => {
                meta.len().hash(&mut hasher);
                if let Ok(modified) = meta.modified() {
                    modified.hash(&mut hasher);
                }
            }
            Err(_) => "missing".hash(&mut hasher),
        }
    }
    Ok(format!("{:016x}", hasher.finish()))
}

fn state_path(state_dir: &Path, stage_name: &str) -> PathBuf {
    state_dir.join(format!("{stage_name}.state.json"))
}

fn load_state(state_dir: &Path, stage_name: &str) -> Option<StageState> {
    let path = state_path(state_dir, stage_name);
    let bytes = std::fs::read(path).ok()?;
    serde_json::from_slice(&bytes).ok()
}

fn write_state(state_dir: &Path, state: &StageState) -> PocketWikiResult<()> {
    std::fs::create_dir_all(state_dir)?;
    let path = state_path(state_dir, &state.stage_name);
    let mut tmp_name = path.as_os_str().to_owned();
    tmp_name.push(".tmp");
    let tmp_path = PathBuf::from(tmp_name);

    let bytes = serde_json::to_vec_pretty(state)?;
    {
        use std::io::Write;
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(&bytes)?;
        file.sync_all().map_err(PocketWikiError::Io)?;
    }
    std::fs::rename(&tmp_path, &path)?;
    Ok(())
}

/// Run `stage` unless prior state shows it already completed against an
/// unchanged input hash with all outputs still present.
#[tracing::instrument(skip(stage), fields(stage = stage.name()))]
pub async fn run_stage(stage: &dyn Stage, state_dir: &Path) -> PocketWikiResult<()> {
    let input_hash = stage.input_hash()?;

    if let Some(prior) = load_state(state_dir, stage.name()) {
        let outputs_exist = prior
            .output_file_list
            .iter()
            .all(|p| Path::new(p).exists());
        if prior.completed && prior.input_hash == input_hash && outputs_exist {
            report_progress(ProgressEvent::StageSkipped {
                stage: stage.name().to_string(),
            });
            return Ok(());
        }
    }

    report_progress(ProgressEvent::StageStarted {
        stage: stage.name().to_string(),
    });
    let started = Instant::now();

    stage.run().await?;

    let new_state = StageState {
        stage_name: stage.name().to_string(),
        input_hash,
        completed: true,
        output_file_list: stage
            .declared_outputs()
            .into_iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
    };
    write_state(state_dir, &new_state)?;

    report_progress(ProgressEvent::StageCompleted {
        stage: stage.name().to_string(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    });
    Ok(())
}
