use super::{io_error, is_heif, run_tool, unique_output_path, MediaError};
use crate::config::ConvertSettings;
use crate::provider::ProviderLimits;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

const SHRINK_FACTOR: f64 = 0.75;
const SMALLEST_SIDE: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Conversion {
    /// Already acceptable, or not something this step can help with.
    Unchanged,
    Converted(PathBuf),
}

/// Brings images into a shape the provider accepts, writing results under
/// `output_dir` and never touching the input files.
#[derive(Debug, Clone)]
pub struct Converter<'a> {
    settings: &'a ConvertSettings,
    limits: &'a ProviderLimits,
    output_dir: PathBuf,
}

impl<'a> Converter<'a> {
    pub fn new(
        settings: &'a ConvertSettings,
        limits: &'a ProviderLimits,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            settings,
            limits,
            output_dir: output_dir.into(),
        }
    }

    pub fn convert(&self, path: &Path) -> Result<Conversion, MediaError> {
        fs::create_dir_all(&self.output_dir).map_err(|err| io_error(&self.output_dir, err))?;
        let stem = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("image")
            .to_string();

        let mut current = path.to_path_buf();
        let mut converted = false;
        if is_heif(path) {
            current = self.convert_heif(path, &stem)?;
            converted = true;
        }

        let format = match ImageFormat::from_path(&current) {
            Ok(format) => format,
            Err(_) => return Ok(Conversion::Unchanged),
        };
        if !format.reading_enabled() {
            return Ok(Conversion::Unchanged);
        }

        let size = fs::metadata(&current)
            .map_err(|err| io_error(&current, err))?
            .len();
        let needs_reencode = !self.limits.supports(format);
        let needs_shrink = self.settings.downscale_oversized && size > self.limits.max_bytes;
        if needs_reencode || needs_shrink || self.exceeds_dimensions(&current)? {
            let image = decode(&current)?;
            let target = if converted {
                current.clone()
            } else {
                unique_output_path(&self.output_dir, &stem, "jpg")
            };
            self.write_fitting_jpeg(image, &target)?;
            current = target;
            converted = true;
        }

        if converted {
            Ok(Conversion::Converted(current))
        } else {
            Ok(Conversion::Unchanged)
        }
    }

    fn convert_heif(&self, path: &Path, stem: &str) -> Result<PathBuf, MediaError> {
        let target = unique_output_path(&self.output_dir, stem, "jpg");
        let binary = &self.settings.heic_converter;
        let mut command = Command::new(binary);
        command.arg(path).arg(&target);
        run_tool(binary, &mut command)?;
        if !target.is_file() {
            return Err(MediaError::ToolFailed {
                binary: binary.clone(),
                exit_code: 0,
                stderr: format!("no output written to {}", target.display()),
            });
        }
        Ok(target)
    }

    fn exceeds_dimensions(&self, path: &Path) -> Result<bool, MediaError> {
        if !self.settings.downscale_oversized {
            return Ok(false);
        }
        let (width, height) = image::image_dimensions(path).map_err(|source| MediaError::Decode {
            path: path.display().to_string(),
            source,
        })?;
        Ok(width.max(height) > self.limits.max_dimension)
    }

    /// Re-encodes as JPEG, shrinking until the result fits the byte and
    /// dimension limits or the image gets too small to shrink further.
    fn write_fitting_jpeg(&self, image: DynamicImage, target: &Path) -> Result<(), MediaError> {
        let mut image = image;
        if self.settings.downscale_oversized
            && image.width().max(image.height()) > self.limits.max_dimension
        {
            let side = self.limits.max_dimension;
            image = image.resize(side, side, FilterType::Lanczos3);
        }

        let mut encoded = encode_jpeg(&image, self.settings.jpeg_quality, target)?;
        while self.settings.downscale_oversized
            && encoded.len() as u64 > self.limits.max_bytes
            && image.width().min(image.height()) > SMALLEST_SIDE
        {
            let width = ((image.width() as f64) * SHRINK_FACTOR).round().max(1.0) as u32;
            let height = ((image.height() as f64) * SHRINK_FACTOR).round().max(1.0) as u32;
            image = image.resize_exact(width, height, FilterType::Lanczos3);
            encoded = encode_jpeg(&image, self.settings.jpeg_quality, target)?;
        }

        fs::write(target, encoded).map_err(|err| io_error(target, err))
    }
}

fn decode(path: &Path) -> Result<DynamicImage, MediaError> {
    image::open(path).map_err(|source| MediaError::Decode {
        path: path.display().to_string(),
        source,
    })
}

fn encode_jpeg(image: &DynamicImage, quality: u8, target: &Path) -> Result<Vec<u8>, MediaError> {
    let mut buffer = Vec::new();
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buffer, quality))
        .map_err(|source| MediaError::Encode {
            path: target.display().to_string(),
            source,
        })?;
    Ok(buffer)
}
