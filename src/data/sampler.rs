//! Epoch ordering of training records

use crate::schema::{Record, Target};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sampler {
    /// Every record once per epoch, seeded shuffle
    #[default]
    Uniform,
    /// Draw with replacement, weight inverse to first-label class frequency
    ClassBalanced,
}

impl FromStr for Sampler {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "no" | "uniform" | "false" => Ok(Sampler::Uniform),
            "yes" | "class_balanced" | "balanced" | "true" => Ok(Sampler::ClassBalanced),
            _ => Err(format!("Unknown sampler: {s}. Valid: yes, no")),
        }
    }
}

impl Sampler {
    /// Record order for one epoch; deterministic in (seed, epoch)
    ///
    /// Class-balanced sampling needs a categorical first label; otherwise the
    /// uniform order is used.
    pub fn epoch_order(
        &self,
        indices: &[usize],
        records: &[Record],
        seed: u64,
        epoch: usize,
    ) -> Vec<usize> {
        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(epoch as u64));

        if *self == Sampler::ClassBalanced {
            if let Some(order) = balanced(indices, records, &mut rng) {
                return order;
            }
            tracing::warn!("class-balanced sampling needs a categorical label; sampling uniformly");
        }

        let mut order = indices.to_vec();
        order.shuffle(&mut rng);
        order
    }
}

fn balanced(indices: &[usize], records: &[Record], rng: &mut StdRng) -> Option<Vec<usize>> {
    let classes: Vec<usize> = indices
        .iter()
        .map(|&i| match records[i].targets.first() {
            Some(Target::Class(c)) => Some(*c),
            _ => None,
        })
        .collect::<Option<_>>()?;

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for &c in &classes {
        *counts.entry(c).or_default() += 1;
    }

    let mut cumulative = Vec::with_capacity(classes.len());
    let mut total = 0.0;
    for c in &classes {
        total += 1.0 / counts[c] as f64;
        cumulative.push(total);
    }

    Some(
        (0..indices.len())
            .map(|_| {
                let draw = rng.random::<f64>() * total;
                let pos = cumulative
                    .partition_point(|&w| w <= draw)
                    .min(indices.len() - 1);
                indices[pos]
            })
            .collect(),
    )
}
