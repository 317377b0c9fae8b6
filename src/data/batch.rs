//! Batch assembly from typed records

use crate::error::ResourceError;
use crate::network::ModelInput;
use crate::schema::{Record, Split, TaskDescription, Target};
use crate::task::HeadTargets;
use ndarray::Array1;

/// A contiguous group of records ready for one forward pass
#[derive(Debug, Clone)]
pub struct Batch {
    /// Dataset indices of the included records
    pub indices: Vec<usize>,
    pub ids: Vec<String>,
    pub splits: Vec<Split>,
    pub groups: Vec<Option<String>>,
    /// records×tabular_columns
    pub tabular: Option<Array1<f32>>,
    /// records×(channels·size·size)
    pub images: Option<Array1<f32>>,
    /// One entry per label head
    pub targets: Vec<HeadTargets>,
    /// Records left out because their image could not be loaded
    pub failures: Vec<ResourceError>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn input(&self) -> ModelInput {
        ModelInput {
            batch: self.len(),
            tabular: self.tabular.clone(),
            images: self.images.clone(),
        }
    }

    /// Survival periods, when the task has them
    pub fn periods(&self) -> Option<&[f32]> {
        self.targets.iter().find_map(|t| match t {
            HeadTargets::Survival { periods, .. } => Some(periods.as_slice()),
            _ => None,
        })
    }
}

/// Collect records into a batch; `images` holds one decoded image per record
pub(crate) fn assemble(
    task: &TaskDescription,
    records: &[(usize, &Record)],
    images: Option<Vec<f32>>,
    with_tabular: bool,
    failures: Vec<ResourceError>,
) -> Batch {
    let mut targets: Vec<HeadTargets> = task.labels.iter().map(HeadTargets::empty_for).collect();
    let mut tabular = Vec::new();

    for (_, record) in records {
        if with_tabular {
            tabular.extend_from_slice(&record.tabular);
        }
        for (head, target) in targets.iter_mut().zip(&record.targets) {
            match (head, target) {
                (HeadTargets::Classes(c), Target::Class(v)) => c.push(*v),
                (HeadTargets::Values(c), Target::Value(v)) => c.push(*v),
                (HeadTargets::Survival { events, periods }, Target::Event(e)) => {
                    events.push(*e);
                    periods.push(record.period.unwrap_or_default());
                }
                _ => {}
            }
        }
    }

    Batch {
        indices: records.iter().map(|(i, _)| *i).collect(),
        ids: records.iter().map(|(_, r)| r.id.clone()).collect(),
        splits: records.iter().map(|(_, r)| r.split).collect(),
        groups: records.iter().map(|(_, r)| r.group.clone()).collect(),
        tabular: with_tabular.then(|| Array1::from(tabular)),
        images: images.map(Array1::from),
        targets,
        failures,
    }
}
