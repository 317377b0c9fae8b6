//! Run directory layout and checkpoint persistence
//!
//! ```text
//! <output_dir>/<YYYY-mm-dd-HH-MM-SS>/
//!     parameters.json
//!     learning_curve.csv
//!     weights/weight_best.<ext> | weights/weight_epoch-NNN.<ext>
//! ```

use super::history::LossHistory;
use super::state::CheckpointPolicy;
use crate::error::ResourceError;
use crate::io::{save_checkpoint, Checkpoint, CheckpointFormat, SaveConfig};
use crate::Result;
use serde::Serialize;
use std::path::{Path, PathBuf};

pub const WEIGHTS_DIR: &str = "weights";
pub const PARAMETERS_FILE: &str = "parameters.json";
pub const LEARNING_CURVE_FILE: &str = "learning_curve.csv";

/// Where the training loop hands checkpoints
pub trait CheckpointSink {
    /// Persist `checkpoint`; "best" overwrites, "each" adds a file
    fn persist(
        &mut self,
        policy: CheckpointPolicy,
        epoch: usize,
        checkpoint: &Checkpoint,
    ) -> Result<PathBuf>;

    /// Called after every epoch with the learning curve so far
    fn record_epoch(&mut self, _history: &LossHistory) -> Result<()> {
        Ok(())
    }
}

/// File name of a checkpoint under `policy`
pub fn checkpoint_file_name(
    policy: CheckpointPolicy,
    epoch: usize,
    format: CheckpointFormat,
) -> String {
    match policy {
        CheckpointPolicy::Best => format!("weight_best.{}", format.extension()),
        CheckpointPolicy::Each => format!("weight_epoch-{epoch:03}.{}", format.extension()),
    }
}

/// One training run's output directory
#[derive(Debug, Clone)]
pub struct RunDirectory {
    root: PathBuf,
    save: SaveConfig,
}

impl RunDirectory {
    /// Create `<output_dir>/<datetime>`; a `-N` suffix avoids collisions
    pub fn create(output_dir: impl AsRef<Path>, format: CheckpointFormat) -> Result<Self> {
        let output_dir = output_dir.as_ref();
        std::fs::create_dir_all(output_dir)?;

        let stamp = chrono::Local::now().format("%Y-%m-%d-%H-%M-%S").to_string();
        let mut root = output_dir.join(&stamp);
        let mut suffix = 1;
        while root.exists() {
            root = output_dir.join(format!("{stamp}-{suffix}"));
            suffix += 1;
        }
        std::fs::create_dir_all(root.join(WEIGHTS_DIR))?;
        tracing::info!(dir = %root.display(), "run directory created");

        Ok(Self {
            root,
            save: SaveConfig::new(format),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn weights_dir(&self) -> PathBuf {
        self.root.join(WEIGHTS_DIR)
    }

    pub fn learning_curve_path(&self) -> PathBuf {
        self.root.join(LEARNING_CURVE_FILE)
    }

    pub fn write_parameters<T: Serialize>(&self, parameters: &T) -> Result<PathBuf> {
        let path = self.root.join(PARAMETERS_FILE);
        let text = serde_json::to_string_pretty(parameters)
            .map_err(|e| crate::Error::Serialization(format!("Run parameters: {e}")))?;
        std::fs::write(&path, text)?;
        Ok(path)
    }
}

impl CheckpointSink for RunDirectory {
    fn persist(
        &mut self,
        policy: CheckpointPolicy,
        epoch: usize,
        checkpoint: &Checkpoint,
    ) -> Result<PathBuf> {
        let path = self
            .weights_dir()
            .join(checkpoint_file_name(policy, epoch, self.save.format));
        save_checkpoint(checkpoint, &path, &self.save)?;
        Ok(path)
    }

    fn record_epoch(&mut self, history: &LossHistory) -> Result<()> {
        history.write_csv(self.learning_curve_path())
    }
}

/// Checkpoint files in `dir`, sorted by name
pub fn list_checkpoints(dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.is_file() && CheckpointFormat::from_path(path).is_some())
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(ResourceError::NoCheckpoints {
            dir: dir.to_path_buf(),
        }
        .into());
    }
    Ok(files)
}

/// `weights` directory of the most recently modified run under `output_dir`
pub fn latest_weights_dir(output_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let output_dir = output_dir.as_ref();
    let no_runs = || ResourceError::NoRuns {
        dir: output_dir.to_path_buf(),
    };

    let entries = std::fs::read_dir(output_dir).map_err(|_| no_runs())?;
    entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join(WEIGHTS_DIR))
        .filter(|weights| weights.is_dir())
        .filter_map(|weights| {
            let modified = std::fs::metadata(weights.parent()?).ok()?.modified().ok()?;
            Some((modified, weights))
        })
        .max_by(|(a, pa), (b, pb)| a.cmp(b).then_with(|| pa.cmp(pb)))
        .map(|(_, weights)| weights)
        .ok_or_else(|| no_runs().into())
}
