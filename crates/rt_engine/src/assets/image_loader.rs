//! Image decoding for textures and environment maps

use std::path::Path;

use image::DynamicImage;

use super::{AssetError, AssetResult};

/// Pixel layout of decoded image data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit RGBA in sRGB encoding (color textures)
    Rgba8Srgb,
    /// 8-bit linear RGBA (data textures such as normal maps)
    Rgba8Unorm,
    /// 32-bit float RGBA (environment maps)
    Rgba32Float,
}

impl PixelFormat {
    /// Size of one pixel in bytes
    pub const fn bytes_per_pixel(self) -> usize {
        match self {
            Self::Rgba8Srgb | Self::Rgba8Unorm => 4,
            Self::Rgba32Float => 16,
        }
    }
}

/// Loaded image data ready for GPU upload
#[derive(Debug, Clone, PartialEq)]
pub struct ImageData {
    /// Image width in pixels
    pub width: u32,
    /// Image height in pixels
    pub height: u32,
    /// Layout of `data`
    pub format: PixelFormat,
    /// Tightly packed pixel rows
    pub data: Vec<u8>,
}

impl ImageData {
    /// Load an image from a file path, converting to `format`
    pub fn from_file(path: impl AsRef<Path>, format: PixelFormat) -> AssetResult<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(AssetError::NotFound(path.display().to_string()));
        }

        log::debug!("Loading image from: {}", path.display());
        let image = image::open(path)
            .map_err(|e| AssetError::LoadFailed(format!("{}: {e}", path.display())))?;
        let data = Self::convert(&image, format);
        log::info!("Loaded image {}x{} from {}", data.width, data.height, path.display());
        Ok(data)
    }

    /// Decode an image held in memory
    pub fn from_bytes(bytes: &[u8], format: PixelFormat) -> AssetResult<Self> {
        let image = image::load_from_memory(bytes)
            .map_err(|e| AssetError::LoadFailed(format!("image from memory: {e}")))?;
        Ok(Self::convert(&image, format))
    }

    /// A 1x1 image of a single color
    pub fn solid(rgba: [u8; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba8Unorm,
            data: rgba.to_vec(),
        }
    }

    /// A 1x1 float image of a single color
    pub fn solid_float(rgba: [f32; 4]) -> Self {
        Self {
            width: 1,
            height: 1,
            format: PixelFormat::Rgba32Float,
            data: bytemuck::cast_slice(&rgba[..]).to_vec(),
        }
    }

    /// Size of the pixel data in bytes
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn convert(image: &DynamicImage, format: PixelFormat) -> Self {
        let (width, height) = (image.width(), image.height());
        let data = match format {
            PixelFormat::Rgba8Srgb | PixelFormat::Rgba8Unorm => image.to_rgba8().into_raw(),
            PixelFormat::Rgba32Float => bytemuck::cast_slice(&image.to_rgba32f().into_raw()).to_vec(),
        };
        Self {
            width,
            height,
            format,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encoded_png() -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(2, 3, image::Rgba([255, 0, 0, 255]));
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(image)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_decode_rgba8() {
        let image = ImageData::from_bytes(&encoded_png(), PixelFormat::Rgba8Srgb).unwrap();
        assert_eq!((image.width, image.height), (2, 3));
        assert_eq!(image.byte_len(), 2 * 3 * 4);
        assert_eq!(&image.data[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn test_decode_to_float() {
        let image = ImageData::from_bytes(&encoded_png(), PixelFormat::Rgba32Float).unwrap();
        assert_eq!(image.byte_len(), 2 * 3 * PixelFormat::Rgba32Float.bytes_per_pixel());
        let red = f32::from_ne_bytes(image.data[0..4].try_into().unwrap());
        let green = f32::from_ne_bytes(image.data[4..8].try_into().unwrap());
        assert!((red - 1.0).abs() < 1e-6);
        assert!(green.abs() < 1e-6);
    }

    #[test]
    fn test_garbage_bytes_fail_to_load() {
        let result = ImageData::from_bytes(b"definitely not an image", PixelFormat::Rgba8Unorm);
        assert!(matches!(result, Err(AssetError::LoadFailed(_))));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let result = ImageData::from_file("/nonexistent/skybox.hdr", PixelFormat::Rgba32Float);
        assert!(matches!(result, Err(AssetError::NotFound(_))));
    }
}
