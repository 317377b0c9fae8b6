//! Training-time image augmentation and normalisation

use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Augmentation {
    #[default]
    Off,
    /// Random horizontal flip
    Light,
    /// Flip, brightness/contrast jitter and additive noise
    Heavy,
}

impl FromStr for Augmentation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "no" | "none" => Ok(Augmentation::Off),
            "light" | "xrayaug" => Ok(Augmentation::Light),
            "heavy" | "trivialaugwide" | "randaug" => Ok(Augmentation::Heavy),
            _ => Err(format!(
                "Unknown augmentation: {s}. Valid: off, light (xrayaug), heavy (trivialaugwide, randaug)"
            )),
        }
    }
}

impl fmt::Display for Augmentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Augmentation::Off => write!(f, "off"),
            Augmentation::Light => write!(f, "light"),
            Augmentation::Heavy => write!(f, "heavy"),
        }
    }
}

impl Augmentation {
    /// Augment one channel-major `channels`×`size`×`size` image in place
    pub fn apply(&self, image: &mut [f32], channels: usize, size: usize, rng: &mut StdRng) {
        if *self == Augmentation::Off {
            return;
        }

        if rng.random::<bool>() {
            flip_horizontal(image, channels, size);
        }

        if *self == Augmentation::Heavy {
            let brightness = (rng.random::<f32>() - 0.5) * 0.2;
            let contrast = 1.0 + (rng.random::<f32>() - 0.5) * 0.2;
            let mean = image.iter().sum::<f32>() / image.len().max(1) as f32;
            for v in image.iter_mut() {
                let noise = (rng.random::<f32>() - 0.5) * 0.02;
                *v = ((*v - mean) * contrast + mean + brightness + noise).clamp(0.0, 1.0);
            }
        }
    }
}

fn flip_horizontal(image: &mut [f32], channels: usize, size: usize) {
    for c in 0..channels {
        for y in 0..size {
            let start = (c * size + y) * size;
            image[start..start + size].reverse();
        }
    }
}

/// Per-image zero mean, unit variance; constant images become all zeros
pub fn normalize(image: &mut [f32]) {
    let n = image.len().max(1) as f32;
    let mean = image.iter().sum::<f32>() / n;
    let var = image.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt();
    for v in image.iter_mut() {
        *v = if std > 1e-6 { (*v - mean) / std } else { 0.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rand::SeedableRng;

    #[test]
    fn test_aliases() {
        assert_eq!("xrayaug".parse::<Augmentation>(), Ok(Augmentation::Light));
        assert_eq!("RandAug".parse::<Augmentation>(), Ok(Augmentation::Heavy));
        assert_eq!("no".parse::<Augmentation>(), Ok(Augmentation::Off));
        assert!("mixup".parse::<Augmentation>().is_err());
    }

    #[test]
    fn test_off_is_identity() {
        let mut image = vec![0.1, 0.2, 0.3, 0.4];
        Augmentation::Off.apply(&mut image, 1, 2, &mut StdRng::seed_from_u64(0));
        assert_eq!(image, vec![0.1, 0.2, 0.3, 0.4]);
    }

    #[test]
    fn test_flip_reverses_rows() {
        let mut image = vec![1.0, 2.0, 3.0, 4.0];
        flip_horizontal(&mut image, 1, 2);
        assert_eq!(image, vec![2.0, 1.0, 4.0, 3.0]);
    }

    #[test]
    fn test_heavy_stays_in_range_and_is_seeded() {
        let base: Vec<f32> = (0..48).map(|i| i as f32 / 48.0).collect();
        let mut a = base.clone();
        let mut b = base;
        Augmentation::Heavy.apply(&mut a, 3, 4, &mut StdRng::seed_from_u64(11));
        Augmentation::Heavy.apply(&mut b, 3, 4, &mut StdRng::seed_from_u64(11));
        assert_eq!(a, b);
        assert!(a.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn test_normalize() {
        let mut image = vec![1.0, 3.0];
        normalize(&mut image);
        assert_relative_eq!(image[0], -1.0);
        assert_relative_eq!(image[1], 1.0);

        let mut flat = vec![0.5; 4];
        normalize(&mut flat);
        assert_eq!(flat, vec![0.0; 4]);
    }
}
