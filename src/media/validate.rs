//! Pre-dispatch checks. Anything rejected here costs no provider quota.

use crate::config::ValidationSettings;
use crate::failure::ValidationReason;
use crate::provider::types::format_bytes;
use crate::provider::ProviderLimits;
use image::ImageFormat;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedImage {
    pub format: ImageFormat,
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub reason: ValidationReason,
    pub message: String,
}

impl ValidationFailure {
    fn new(reason: ValidationReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }
}

/// Backend limits narrowed by the user's validation settings.
pub fn effective_limits(limits: &ProviderLimits, settings: &ValidationSettings) -> ProviderLimits {
    let mut narrowed = limits.clone();
    narrowed.min_dimension = narrowed.min_dimension.max(settings.min_dimension);
    if let Some(max) = settings.max_dimension {
        narrowed.max_dimension = narrowed.max_dimension.min(max);
    }
    narrowed
}

/// Checks, in order: readable, format supported, decodable, byte size,
/// dimensions. The first failing check decides the reason.
pub fn validate_image(
    path: &Path,
    limits: &ProviderLimits,
) -> Result<ValidatedImage, ValidationFailure> {
    let bytes = fs::read(path).map_err(|err| {
        ValidationFailure::new(
            ValidationReason::Unreadable,
            format!("cannot read {}: {err}", path.display()),
        )
    })?;

    let format = match ImageFormat::from_path(path) {
        Ok(format) if limits.supports(format) => format,
        Ok(format) => {
            return Err(ValidationFailure::new(
                ValidationReason::UnsupportedFormat,
                format!(
                    "{format:?} is not accepted by the provider (accepted: {})",
                    limits.format_names()
                ),
            ))
        }
        Err(_) => {
            return Err(ValidationFailure::new(
                ValidationReason::UnsupportedFormat,
                format!(
                    "unrecognized image format for {} (accepted: {})",
                    path.display(),
                    limits.format_names()
                ),
            ))
        }
    };

    let decoded = image::load_from_memory_with_format(&bytes, format).map_err(|err| {
        ValidationFailure::new(
            ValidationReason::Corrupted,
            format!("cannot decode {}: {err}", path.display()),
        )
    })?;

    let size = bytes.len() as u64;
    if size > limits.max_bytes {
        return Err(ValidationFailure::new(
            ValidationReason::TooLarge,
            format!(
                "{} exceeds the provider limit of {}",
                format_bytes(size),
                format_bytes(limits.max_bytes)
            ),
        ));
    }

    let (width, height) = (decoded.width(), decoded.height());
    if width.min(height) < limits.min_dimension || width.max(height) > limits.max_dimension {
        return Err(ValidationFailure::new(
            ValidationReason::DimensionsOutOfBounds,
            format!(
                "{width}x{height} is outside the allowed {}..={} pixels per side",
                limits.min_dimension, limits.max_dimension
            ),
        ));
    }

    Ok(ValidatedImage {
        format,
        bytes,
        width,
        height,
    })
}
