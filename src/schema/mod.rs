//! Schema inference
//!
//! Reads the study CSV and decides, from column names and observed values
//! alone, how many output heads the run needs, what kind each is, and which
//! input modalities are available.
//!
//! | Role | Column |
//! |---|---|
//! | identifier | `uniqID` (or `id`) |
//! | tabular input | `input_*` |
//! | image path | `imgpath` |
//! | label | `label_*` |
//! | survival period | `periods` |
//! | split | `split` (`train`, `val`, `test`) |
//! | group | `group` (optional) |

mod dataset;
mod infer;
mod table;
mod types;

pub use dataset::{Dataset, Record, Split, Target};
pub use infer::{infer_task, InferenceOptions};
pub use table::{
    RawTable, GROUP_COLUMN, ID_COLUMNS, IMAGE_COLUMN, INPUT_PREFIX, LABEL_PREFIX, PERIOD_COLUMN,
    SPLIT_COLUMN,
};
pub use types::{
    ImageModality, LabelKind, LabelSpec, ModalityDescriptor, TaskDescription, TaskKind,
};

use crate::Result;
use std::path::Path;

/// Read a CSV, infer its task and type every record
pub fn load_dataset(
    path: impl AsRef<Path>,
    options: &InferenceOptions,
) -> Result<(TaskDescription, Dataset)> {
    let table = RawTable::from_path(path)?;
    let task = infer_task(&table, options)?;
    let dataset = Dataset::from_table(&table, &task)?;
    Ok((task, dataset))
}
