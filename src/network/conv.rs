//! Convolutional-family image extractor
//!
//! Each channel is adaptive-average-pooled onto a fixed grid, then passed
//! through a stem and a projection to the backbone's published width. The
//! pooled grid makes the parameter count independent of image size.

use super::catalog::{Backbone, ExtractorConfig, FeatureExtractor};
use super::params::{Linear, ParameterStore};
use crate::autograd::relu;
use crate::error::ArchitectureError;
use crate::{Result, Tensor};
use ndarray::Array1;
use rand::rngs::StdRng;

/// Edge of the pooled grid per channel
pub(crate) const POOL_GRID: usize = 4;

const STEM_WIDTH: usize = 64;

pub(crate) fn check_image_config(
    backbone: Backbone,
    config: &ExtractorConfig,
    patch: usize,
) -> Result<()> {
    if config.channels != 1 && config.channels != 3 {
        return Err(ArchitectureError::InvalidChannels {
            channels: config.channels,
        }
        .into());
    }
    if config.image_size == 0 || config.image_size % patch != 0 {
        return Err(ArchitectureError::InvalidImageSize {
            backbone: backbone.name().to_string(),
            size: config.image_size,
            patch,
        }
        .into());
    }
    Ok(())
}

/// Average a `h`×`w` window of every channel onto a `grid`×`grid` lattice
///
/// `image` is one record, channel-major, each channel `edge`×`edge`.
/// Cell i covers rows floor(i·h/grid)..ceil((i+1)·h/grid) of the window.
pub(crate) fn pool_window(
    image: &[f32],
    channels: usize,
    edge: usize,
    (y0, x0, h, w): (usize, usize, usize, usize),
    grid: usize,
    out: &mut Vec<f32>,
) {
    let plane = edge * edge;
    for c in 0..channels {
        let channel = &image[c * plane..(c + 1) * plane];
        for gy in 0..grid {
            let ys = y0 + gy * h / grid;
            let ye = y0 + ((gy + 1) * h).div_ceil(grid);
            for gx in 0..grid {
                let xs = x0 + gx * w / grid;
                let xe = x0 + ((gx + 1) * w).div_ceil(grid);
                let mut sum = 0.0;
                for y in ys..ye {
                    sum += channel[y * edge + xs..y * edge + xe].iter().sum::<f32>();
                }
                out.push(sum / ((ye - ys) * (xe - xs)) as f32);
            }
        }
    }
}

pub struct ConvExtractor {
    backbone: Backbone,
    channels: usize,
    image_size: usize,
    stem: Linear,
    proj: Linear,
}

impl ConvExtractor {
    pub fn new(
        backbone: Backbone,
        store: &mut ParameterStore,
        config: &ExtractorConfig,
        rng: &mut StdRng,
    ) -> Result<Self> {
        check_image_config(backbone, config, 1)?;
        let width = backbone
            .image_feature_width()
            .ok_or_else(|| ArchitectureError::UnknownBackbone {
                name: backbone.name().to_string(),
            })?;

        let pooled = config.channels * POOL_GRID * POOL_GRID;
        let stem = Linear::new(store, "image.stem", pooled, STEM_WIDTH, rng);
        let proj = Linear::new(store, "image.proj", STEM_WIDTH, width, rng);
        Ok(Self {
            backbone,
            channels: config.channels,
            image_size: config.image_size,
            stem,
            proj,
        })
    }

    fn pool(&self, input: &Tensor, batch: usize) -> Tensor {
        let per_record = self.input_width();
        let mut pooled = Vec::with_capacity(batch * self.channels * POOL_GRID * POOL_GRID);
        let data = input.data();
        for b in 0..batch {
            let record: Vec<f32> = data
                .slice(ndarray::s![b * per_record..(b + 1) * per_record])
                .to_vec();
            pool_window(
                &record,
                self.channels,
                self.image_size,
                (0, 0, self.image_size, self.image_size),
                POOL_GRID,
                &mut pooled,
            );
        }
        Tensor::constant(Array1::from(pooled))
    }
}

impl FeatureExtractor for ConvExtractor {
    fn backbone(&self) -> Backbone {
        self.backbone
    }

    fn input_width(&self) -> usize {
        self.channels * self.image_size * self.image_size
    }

    fn feature_width(&self) -> usize {
        self.proj.out_features()
    }

    fn forward(&self, store: &ParameterStore, input: &Tensor, batch: usize) -> Result<Tensor> {
        self.check_input(input, batch)?;
        let pooled = self.pool(input, batch);
        let hidden = relu(&self.stem.forward(store, &pooled, batch));
        Ok(relu(&self.proj.forward(store, &hidden, batch)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    fn config(channels: usize, image_size: usize) -> ExtractorConfig {
        ExtractorConfig {
            tabular_inputs: 0,
            mlp_hidden: vec![],
            channels,
            image_size,
        }
    }

    #[test]
    fn test_pool_window_uneven_edges() {
        // 3×3 single channel onto 2×2: cells overlap on the middle row/column
        let image: Vec<f32> = (0..9).map(|v| v as f32).collect();
        let mut out = Vec::new();
        pool_window(&image, 1, 3, (0, 0, 3, 3), 2, &mut out);
        assert_eq!(out.len(), 4);
        // top-left covers rows 0..2, cols 0..2 → {0,1,3,4}
        assert_relative_eq!(out[0], 2.0);
        // bottom-right covers rows 1..3, cols 1..3 → {4,5,7,8}
        assert_relative_eq!(out[3], 6.0);
    }

    #[test]
    fn test_feature_width_matches_catalog() {
        for backbone in [Backbone::ResNet18, Backbone::DenseNet121] {
            let mut store = ParameterStore::new();
            let conv = ConvExtractor::new(
                backbone,
                &mut store,
                &config(3, 8),
                &mut StdRng::seed_from_u64(1),
            )
            .unwrap();
            assert_eq!(Some(conv.feature_width()), backbone.image_feature_width());

            let x = Tensor::constant(Array1::from(vec![0.25; 2 * 3 * 8 * 8]));
            let y = conv.forward(&store, &x, 2).unwrap();
            assert_eq!(y.len(), 2 * conv.feature_width());
        }
    }

    #[test]
    fn test_invalid_channels() {
        let mut store = ParameterStore::new();
        let err = ConvExtractor::new(
            Backbone::ResNet18,
            &mut store,
            &config(2, 8),
            &mut StdRng::seed_from_u64(1),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            Error::Architecture(ArchitectureError::InvalidChannels { channels: 2 })
        ));
    }

    #[test]
    fn test_image_size_independent_params() {
        let mut small = ParameterStore::new();
        let mut large = ParameterStore::new();
        let mut rng = StdRng::seed_from_u64(3);
        ConvExtractor::new(Backbone::ResNet18, &mut small, &config(1, 8), &mut rng).unwrap();
        ConvExtractor::new(Backbone::ResNet18, &mut large, &config(1, 32), &mut rng).unwrap();
        assert_eq!(small.num_values(), large.num_values());
    }
}
