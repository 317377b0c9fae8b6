//! Image decoding behind a narrow loader seam
//!
//! Decoded images are channel-major f32 in [0, 1], resized to a square edge.
//! Supported on disk: binary and ASCII Netpbm (`.pgm`, `.ppm`, `.pnm`) and
//! raw little-endian f32 tensors (`.f32`, `.raw`, `.bin`) already stored at
//! the target shape.

use crate::error::ResourceError;
use std::path::Path;

/// Decode one image into `channels`×`size`×`size` values
pub trait ImageLoader: Send + Sync {
    fn load(
        &self,
        record: &str,
        path: &Path,
        channels: usize,
        size: usize,
    ) -> Result<Vec<f32>, ResourceError>;
}

/// Default on-disk loader, dispatching on file extension
#[derive(Debug, Clone, Copy, Default)]
pub struct FileImageLoader;

impl ImageLoader for FileImageLoader {
    fn load(
        &self,
        record: &str,
        path: &Path,
        channels: usize,
        size: usize,
    ) -> Result<Vec<f32>, ResourceError> {
        let bytes = std::fs::read(path).map_err(|_| ResourceError::ImageNotFound {
            record: record.to_string(),
            path: path.to_path_buf(),
        })?;
        let decode_error = |reason: String| ResourceError::ImageDecode {
            record: record.to_string(),
            path: path.to_path_buf(),
            reason,
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_lowercase)
            .unwrap_or_default();

        match extension.as_str() {
            "f32" | "raw" | "bin" => decode_raw(&bytes, channels, size).map_err(decode_error),
            _ => {
                let image = decode_netpbm(&bytes).map_err(decode_error)?;
                Ok(image.convert_channels(channels).resize(size).pixels)
            }
        }
    }
}

fn decode_raw(bytes: &[u8], channels: usize, size: usize) -> Result<Vec<f32>, String> {
    let expected = channels * size * size;
    if bytes.len() != expected * 4 {
        return Err(format!(
            "raw tensor has {} bytes, expected {} ({}×{}×{} f32)",
            bytes.len(),
            expected * 4,
            channels,
            size,
            size
        ));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes(bytemuck::pod_read_unaligned::<[u8; 4]>(chunk)))
        .collect())
}

/// Decoded image, channel-major
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedImage {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    pub pixels: Vec<f32>,
}

impl DecodedImage {
    /// Grey → RGB replicates; RGB → grey uses ITU-R 601 luma
    pub fn convert_channels(self, channels: usize) -> Self {
        if channels == self.channels {
            return self;
        }
        let plane = self.height * self.width;
        let pixels = match (self.channels, channels) {
            (1, 3) => self.pixels.repeat(3),
            (3, 1) => (0..plane)
                .map(|i| {
                    0.299 * self.pixels[i]
                        + 0.587 * self.pixels[plane + i]
                        + 0.114 * self.pixels[2 * plane + i]
                })
                .collect(),
            _ => return self,
        };
        Self {
            channels,
            pixels,
            ..self
        }
    }

    /// Bilinear resample to `size`×`size` with aligned pixel centres
    pub fn resize(self, size: usize) -> Self {
        if self.height == size && self.width == size {
            return self;
        }
        let plane_in = self.height * self.width;
        let sy = self.height as f32 / size as f32;
        let sx = self.width as f32 / size as f32;
        let mut pixels = Vec::with_capacity(self.channels * size * size);

        for c in 0..self.channels {
            let src = &self.pixels[c * plane_in..(c + 1) * plane_in];
            for y in 0..size {
                let fy = ((y as f32 + 0.5) * sy - 0.5).clamp(0.0, (self.height - 1) as f32);
                let y0 = fy.floor() as usize;
                let y1 = (y0 + 1).min(self.height - 1);
                let wy = fy - y0 as f32;
                for x in 0..size {
                    let fx = ((x as f32 + 0.5) * sx - 0.5).clamp(0.0, (self.width - 1) as f32);
                    let x0 = fx.floor() as usize;
                    let x1 = (x0 + 1).min(self.width - 1);
                    let wx = fx - x0 as f32;
                    let top = src[y0 * self.width + x0] * (1.0 - wx) + src[y0 * self.width + x1] * wx;
                    let bottom =
                        src[y1 * self.width + x0] * (1.0 - wx) + src[y1 * self.width + x1] * wx;
                    pixels.push(top * (1.0 - wy) + bottom * wy);
                }
            }
        }

        Self {
            height: size,
            width: size,
            pixels,
            ..self
        }
    }
}

struct HeaderReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    fn skip_whitespace_and_comments(&mut self) {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b'#' => {
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b if b.is_ascii_whitespace() => self.pos += 1,
                _ => break,
            }
        }
    }

    fn token(&mut self) -> Result<&'a str, String> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while self.pos < self.bytes.len() && !self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        if start == self.pos {
            return Err("truncated header".into());
        }
        std::str::from_utf8(&self.bytes[start..self.pos]).map_err(|e| e.to_string())
    }

    fn number(&mut self) -> Result<usize, String> {
        let token = self.token()?;
        token
            .parse()
            .map_err(|_| format!("invalid header value '{token}'"))
    }
}

/// Decode P2/P3 (ASCII) and P5/P6 (binary, 8 or 16 bit) Netpbm images
pub fn decode_netpbm(bytes: &[u8]) -> Result<DecodedImage, String> {
    let mut header = HeaderReader { bytes, pos: 0 };
    let magic = header.token()?;
    let (channels, binary) = match magic {
        "P2" => (1, false),
        "P3" => (3, false),
        "P5" => (1, true),
        "P6" => (3, true),
        other => return Err(format!("unsupported image format '{other}'")),
    };
    let width = header.number()?;
    let height = header.number()?;
    let max_value = header.number()?;
    if width == 0 || height == 0 || max_value == 0 || max_value > 65535 {
        return Err(format!("invalid dimensions {width}×{height} (max {max_value})"));
    }

    let count = width * height * channels;
    let scale = max_value as f32;
    let interleaved: Vec<f32> = if binary {
        // exactly one whitespace byte separates header and raster
        let start = header.pos + 1;
        let depth = if max_value > 255 { 2 } else { 1 };
        let raster = bytes
            .get(start..start + count * depth)
            .ok_or_else(|| "truncated raster".to_string())?;
        if depth == 1 {
            raster.iter().map(|&b| b as f32 / scale).collect()
        } else {
            raster
                .chunks_exact(2)
                .map(|pair| u16::from_be_bytes([pair[0], pair[1]]) as f32 / scale)
                .collect()
        }
    } else {
        (0..count)
            .map(|_| header.number().map(|v| v as f32 / scale))
            .collect::<Result<_, _>>()?
    };

    let plane = width * height;
    let mut pixels = vec![0.0; count];
    for (i, value) in interleaved.into_iter().enumerate() {
        let (pixel, channel) = (i / channels, i % channels);
        pixels[channel * plane + pixel] = value.min(1.0);
    }

    Ok(DecodedImage {
        channels,
        height,
        width,
        pixels,
    })
}
