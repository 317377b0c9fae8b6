//! Prefetching batch producer
//!
//! A producer thread assembles batches in epoch order and hands them over a
//! bounded channel, so decoding the next batch overlaps the current step
//! without changing the order batches arrive in.

use super::augment::{normalize, Augmentation};
use super::batch::{assemble, Batch};
use super::image::ImageLoader;
use super::sampler::Sampler;
use crate::error::ResourceError;
use crate::schema::{Dataset, Record};
use crate::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::mpsc::{sync_channel, Receiver};
use std::sync::Arc;
use std::thread::JoinHandle;

/// How batches of one split are produced
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub image_size: usize,
    pub channels: usize,
    pub sampler: Sampler,
    /// Shuffle/sample per epoch; evaluation keeps file order
    pub shuffle: bool,
    pub augmentation: Augmentation,
    pub normalize_image: bool,
    pub seed: u64,
    /// Feed tabular values; image-only models skip them
    pub load_tabular: bool,
    /// Decode images; tabular-only models skip them
    pub load_images: bool,
    /// Leave out records whose image fails instead of failing the batch
    pub skip_failed_images: bool,
    /// A trailing batch smaller than this joins the previous one
    pub min_batch: usize,
    /// Batches buffered ahead of the consumer
    pub prefetch: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            batch_size: 64,
            image_size: crate::network::DEFAULT_IMAGE_SIZE,
            channels: 1,
            sampler: Sampler::Uniform,
            shuffle: false,
            augmentation: Augmentation::Off,
            normalize_image: true,
            seed: 42,
            load_tabular: true,
            load_images: false,
            skip_failed_images: false,
            min_batch: 1,
            prefetch: 2,
        }
    }
}

/// Produces the batches of a fixed set of records
pub struct DataLoader {
    dataset: Arc<Dataset>,
    indices: Vec<usize>,
    config: LoaderConfig,
    images: Arc<dyn ImageLoader>,
}

impl DataLoader {
    pub fn new(
        dataset: Arc<Dataset>,
        indices: Vec<usize>,
        config: LoaderConfig,
        images: Arc<dyn ImageLoader>,
    ) -> Self {
        Self {
            dataset,
            indices,
            config,
            images,
        }
    }

    pub fn num_records(&self) -> usize {
        self.indices.len()
    }

    /// Record order for `epoch`, split into batch-sized chunks
    pub fn plan(&self, epoch: usize) -> Vec<Vec<usize>> {
        let order = if self.config.shuffle {
            self.config.sampler.epoch_order(
                &self.indices,
                self.dataset.records(),
                self.config.seed,
                epoch,
            )
        } else {
            self.indices.clone()
        };

        let mut chunks: Vec<Vec<usize>> = order
            .chunks(self.config.batch_size.max(1))
            .map(<[usize]>::to_vec)
            .collect();
        if chunks.len() > 1 && chunks.last().map_or(0, Vec::len) < self.config.min_batch {
            if let Some(tail) = chunks.pop() {
                if let Some(last) = chunks.last_mut() {
                    last.extend(tail);
                }
            }
        }
        chunks
    }

    /// Start producing the batches of `epoch`
    pub fn epoch(&self, epoch: usize) -> BatchStream {
        let plan = self.plan(epoch);
        let (tx, rx) = sync_channel(self.config.prefetch.max(1));
        let dataset = Arc::clone(&self.dataset);
        let images = Arc::clone(&self.images);
        let config = self.config.clone();

        let handle = std::thread::spawn(move || {
            let mut rng = StdRng::seed_from_u64(config.seed ^ (epoch as u64).rotate_left(32));
            for chunk in plan {
                let batch = build_batch(&dataset, &chunk, &config, images.as_ref(), &mut rng);
                if tx.send(batch).is_err() {
                    // consumer hung up
                    break;
                }
            }
        });

        BatchStream {
            rx,
            handle: Some(handle),
        }
    }
}

fn build_batch(
    dataset: &Dataset,
    chunk: &[usize],
    config: &LoaderConfig,
    images: &dyn ImageLoader,
    rng: &mut StdRng,
) -> Result<Batch> {
    let mut kept: Vec<(usize, &Record)> = Vec::with_capacity(chunk.len());
    let mut failures = Vec::new();
    let mut pixels = config.load_images.then(Vec::new);

    for &index in chunk {
        let record = &dataset.records()[index];
        if let Some(pixels) = pixels.as_mut() {
            match load_image(record, config, images, rng) {
                Ok(image) => pixels.extend(image),
                Err(err) if config.skip_failed_images => {
                    tracing::warn!(record = %record.id, error = %err, "skipping record");
                    failures.push(err);
                    continue;
                }
                Err(err) => return Err(err.into()),
            }
        }
        kept.push((index, record));
    }

    Ok(assemble(
        dataset.task(),
        &kept,
        pixels,
        config.load_tabular,
        failures,
    ))
}

fn load_image(
    record: &Record,
    config: &LoaderConfig,
    images: &dyn ImageLoader,
    rng: &mut StdRng,
) -> std::result::Result<Vec<f32>, ResourceError> {
    let path = record
        .image
        .as_deref()
        .ok_or_else(|| ResourceError::ImageNotFound {
            record: record.id.clone(),
            path: Default::default(),
        })?;
    let mut image = images.load(&record.id, path, config.channels, config.image_size)?;
    config
        .augmentation
        .apply(&mut image, config.channels, config.image_size, rng);
    if config.normalize_image {
        normalize(&mut image);
    }
    Ok(image)
}

/// Batches of one epoch, in plan order
pub struct BatchStream {
    rx: Receiver<Result<Batch>>,
    handle: Option<JoinHandle<()>>,
}

impl Iterator for BatchStream {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rx.recv() {
            Ok(batch) => Some(batch),
            Err(_) => {
                if let Some(handle) = self.handle.take() {
                    if handle.join().is_err() {
                        tracing::error!("batch producer panicked");
                    }
                }
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{infer_task, InferenceOptions, RawTable};
    use std::path::Path;

    struct Checkerboard;

    impl ImageLoader for Checkerboard {
        fn load(
            &self,
            record: &str,
            path: &Path,
            channels: usize,
            size: usize,
        ) -> std::result::Result<Vec<f32>, ResourceError> {
            if path.ends_with("missing.pgm") {
                return Err(ResourceError::ImageNotFound {
                    record: record.to_string(),
                    path: path.to_path_buf(),
                });
            }
            Ok((0..channels * size * size)
                .map(|i| (i % 2) as f32)
                .collect())
        }
    }

    fn dataset(rows: usize, with_missing: bool) -> Arc<Dataset> {
        let ids: Vec<String> = (0..rows).map(|i| format!("r{i}")).collect();
        let labels: Vec<String> = (0..rows).map(|i| (i % 2).to_string()).collect();
        let paths: Vec<String> = (0..rows)
            .map(|i| {
                if with_missing && i == 1 {
                    "missing.pgm".to_string()
                } else {
                    format!("img{i}.pgm")
                }
            })
            .collect();
        let rows: Vec<Vec<&str>> = (0..rows)
            .map(|i| vec![ids[i].as_str(), "1.5", paths[i].as_str(), labels[i].as_str(), "train"])
            .collect();
        let row_refs: Vec<&[&str]> = rows.iter().map(Vec::as_slice).collect();
        let table = RawTable::from_rows(
            &["uniqID", "input_x", "imgpath", "label_y", "split"],
            &row_refs,
        )
        .unwrap();
        let task = infer_task(&table, &InferenceOptions::default()).unwrap();
        Arc::new(Dataset::from_table(&table, &task).unwrap())
    }

    #[test]
    fn test_batches_cover_records_in_order() {
        let ds = dataset(7, false);
        let config = LoaderConfig {
            batch_size: 3,
            ..LoaderConfig::default()
        };
        let loader = DataLoader::new(ds, (0..7).collect(), config, Arc::new(Checkerboard));
        let batches: Vec<Batch> = loader.epoch(0).map(|b| b.unwrap()).collect();
        assert_eq!(
            batches.iter().map(Batch::len).collect::<Vec<_>>(),
            vec![3, 3, 1]
        );
        let ids: Vec<String> = batches.iter().flat_map(|b| b.ids.clone()).collect();
        assert_eq!(ids, (0..7).map(|i| format!("r{i}")).collect::<Vec<_>>());
        assert!(batches[0].images.is_none());
    }

    #[test]
    fn test_min_batch_merges_tail() {
        let ds = dataset(7, false);
        let config = LoaderConfig {
            batch_size: 3,
            min_batch: 2,
            ..LoaderConfig::default()
        };
        let loader = DataLoader::new(ds, (0..7).collect(), config, Arc::new(Checkerboard));
        let sizes: Vec<usize> = loader.plan(0).iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![3, 4]);
    }

    #[test]
    fn test_shuffled_plan_is_seeded() {
        let ds = dataset(20, false);
        let config = LoaderConfig {
            batch_size: 4,
            shuffle: true,
            ..LoaderConfig::default()
        };
        let loader = DataLoader::new(ds, (0..20).collect(), config, Arc::new(Checkerboard));
        assert_eq!(loader.plan(3), loader.plan(3));
        assert_ne!(loader.plan(3), loader.plan(4));
    }

    #[test]
    fn test_images_are_loaded_and_normalised() {
        let ds = dataset(2, false);
        let config = LoaderConfig {
            batch_size: 2,
            image_size: 4,
            load_images: true,
            ..LoaderConfig::default()
        };
        let loader = DataLoader::new(ds, vec![0, 1], config, Arc::new(Checkerboard));
        let batch = loader.epoch(0).next().unwrap().unwrap();
        let images = batch.images.unwrap();
        assert_eq!(images.len(), 2 * 16);
        approx::assert_abs_diff_eq!(images.slice(ndarray::s![0..16]).sum(), 0.0, epsilon = 1e-4);
    }

    #[test]
    fn test_missing_image_fails_or_is_skipped() {
        let ds = dataset(3, true);
        let strict = LoaderConfig {
            batch_size: 3,
            load_images: true,
            image_size: 2,
            ..LoaderConfig::default()
        };
        let loader = DataLoader::new(
            Arc::clone(&ds),
            vec![0, 1, 2],
            strict.clone(),
            Arc::new(Checkerboard),
        );
        assert!(loader.epoch(0).next().unwrap().is_err());

        let lenient = LoaderConfig {
            skip_failed_images: true,
            ..strict
        };
        let loader = DataLoader::new(ds, vec![0, 1, 2], lenient, Arc::new(Checkerboard));
        let batch = loader.epoch(0).next().unwrap().unwrap();
        assert_eq!(batch.ids, vec!["r0", "r2"]);
        assert_eq!(batch.failures.len(), 1);
        assert_eq!(batch.images.unwrap().len(), 2 * 4);
    }
}
