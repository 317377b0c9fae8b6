//! Attention-family image extractor
//!
//! The image is cut into 16×16 patches. Each patch is pooled per channel and
//! embedded as one token; tokens get a learned position embedding, pass
//! through one residual self-attention block, and are mean-pooled.

use super::catalog::{Backbone, ExtractorConfig, FeatureExtractor};
use super::conv::{check_image_config, pool_window, POOL_GRID};
use super::params::{he_uniform, Linear, ParamId, ParameterStore};
use crate::autograd::{add, add_bias, attention, matmul};
use crate::error::ArchitectureError;
use crate::{Result, Tensor};
use ndarray::Array1;
use rand::rngs::StdRng;

const KEY_WIDTH: usize = 64;

pub struct AttentionExtractor {
    backbone: Backbone,
    channels: usize,
    image_size: usize,
    patch: usize,
    embed: Linear,
    position: ParamId,
    query: ParamId,
    key: ParamId,
    width: usize,
}

impl AttentionExtractor {
    pub fn new(
        backbone: Backbone,
        store: &mut ParameterStore,
        config: &ExtractorConfig,
        rng: &mut StdRng,
    ) -> Result<Self> {
        let (Some(patch), Some(width)) = (backbone.patch_size(), backbone.image_feature_width())
        else {
            return Err(ArchitectureError::UnknownBackbone {
                name: backbone.name().to_string(),
            }
            .into());
        };
        check_image_config(backbone, config, patch)?;

        let tokens = (config.image_size / patch).pow(2);
        let token_dim = config.channels * POOL_GRID * POOL_GRID;
        let embed = Linear::new(store, "image.embed", token_dim, width, rng);
        let position = store.register(
            "image.position",
            he_uniform(rng, width, tokens * width).mapv(|v| v * 0.1),
        );
        let query = store.register("image.query", he_uniform(rng, width, width * KEY_WIDTH));
        let key = store.register("image.key", he_uniform(rng, width, width * KEY_WIDTH));

        Ok(Self {
            backbone,
            channels: config.channels,
            image_size: config.image_size,
            patch,
            embed,
            position,
            query,
            key,
            width,
        })
    }

    fn tokens_per_image(&self) -> usize {
        (self.image_size / self.patch).pow(2)
    }

    /// (batch·tokens)×(channels·grid²) patch descriptors
    fn patchify(&self, input: &Tensor, batch: usize) -> Tensor {
        let per_record = self.input_width();
        let per_side = self.image_size / self.patch;
        let token_dim = self.channels * POOL_GRID * POOL_GRID;
        let mut out = Vec::with_capacity(batch * self.tokens_per_image() * token_dim);
        let data = input.data();
        for b in 0..batch {
            let record: Vec<f32> = data
                .slice(ndarray::s![b * per_record..(b + 1) * per_record])
                .to_vec();
            for py in 0..per_side {
                for px in 0..per_side {
                    pool_window(
                        &record,
                        self.channels,
                        self.image_size,
                        (py * self.patch, px * self.patch, self.patch, self.patch),
                        POOL_GRID,
                        &mut out,
                    );
                }
            }
        }
        Tensor::constant(Array1::from(out))
    }
}

impl FeatureExtractor for AttentionExtractor {
    fn backbone(&self) -> Backbone {
        self.backbone
    }

    fn input_width(&self) -> usize {
        self.channels * self.image_size * self.image_size
    }

    fn feature_width(&self) -> usize {
        self.width
    }

    fn forward(&self, store: &ParameterStore, input: &Tensor, batch: usize) -> Result<Tensor> {
        self.check_input(input, batch)?;
        let n = self.tokens_per_image();
        let rows = batch * n;

        let patches = self.patchify(input, batch);
        let embedded = self.embed.forward(store, &patches, rows);
        let tokens = add_bias(&embedded, store.get(self.position), batch, n * self.width);

        let q = matmul(&tokens, store.get(self.query), rows, self.width, KEY_WIDTH);
        let k = matmul(&tokens, store.get(self.key), rows, self.width, KEY_WIDTH);
        let attended = attention(&q, &k, &tokens, batch, n, KEY_WIDTH, self.width);
        let hidden = add(&tokens, &attended);

        let mut pool = Array1::zeros(batch * rows);
        for b in 0..batch {
            for t in 0..n {
                pool[b * rows + b * n + t] = 1.0 / n as f32;
            }
        }
        Ok(matmul(
            &Tensor::constant(pool),
            &hidden,
            batch,
            rows,
            self.width,
        ))
    }
}
