//! Data loading: sampling, image decoding, augmentation and batching

mod augment;
mod batch;
mod image;
mod loader;
mod sampler;

pub use augment::{normalize, Augmentation};
pub use batch::Batch;
pub use image::{decode_netpbm, DecodedImage, FileImageLoader, ImageLoader};
pub use loader::{BatchStream, DataLoader, LoaderConfig};
pub use sampler::Sampler;
