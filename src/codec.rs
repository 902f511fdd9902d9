//! Conversion between raster image bytes and normalized model tensors.
use crate::error::{AttackError, Result};
use crate::projection::{ChannelRanges, ValidRange};
use crate::tensorshape::ImageShape;
use crate::AdvFloat;
use base64::{engine::general_purpose, Engine as _};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, GrayImage, ImageOutputFormat, RgbImage};
use ndarray::{Array, ArrayD, ArrayViewD, IxDyn};
use serde::{Deserialize, Serialize};
use std::io::Cursor;

/// How 8-bit pixel values map onto model inputs.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum NormalizationScheme {
    /// `v / 255`, into `[0, 1]`.
    UnitScale,
    /// `v / 127.5 - 1`, into `[-1, 1]`.
    SymmetricUnit,
    /// `(v / 255 - mean[c]) / std[c]` per channel.
    Standardize {
        mean: Vec<AdvFloat>,
        std: Vec<AdvFloat>,
    },
}

impl NormalizationScheme {
    /// Torchvision's ImageNet statistics.
    pub fn imagenet() -> Self {
        Self::Standardize {
            mean: vec![0.485, 0.456, 0.406],
            std: vec![0.229, 0.224, 0.225],
        }
    }

    /// The range every normalized pixel falls in. For `Standardize` this is the
    /// hull of the per-channel ranges.
    ///
    /// # Errors
    /// `InvalidRange` if `Standardize` statistics are empty, differ in length or
    /// have a non-positive standard deviation.
    pub fn valid_range(&self) -> Result<ValidRange> {
        match self {
            Self::UnitScale => Ok(ValidRange::unit()),
            Self::SymmetricUnit => Ok(ValidRange::symmetric()),
            Self::Standardize { mean, std } => Ok(standardized_ranges(mean, std)?.hull()),
        }
    }

    /// Per-channel ranges, for schemes whose channels differ.
    ///
    /// # Errors
    /// See `valid_range`.
    pub fn channel_ranges(&self) -> Result<Option<ChannelRanges>> {
        match self {
            Self::Standardize { mean, std } => standardized_ranges(mean, std).map(Some),
            Self::UnitScale | Self::SymmetricUnit => Ok(None),
        }
    }

    fn check_channels(&self, channels: usize) -> Result<()> {
        if let Self::Standardize { mean, std } = self {
            check_stats(mean, std)?;
            if mean.len() != channels {
                return Err(AttackError::shape_mismatch(&[channels], &[mean.len()]));
            }
        }
        Ok(())
    }

    pub fn normalize(&self, value: u8, channel: usize) -> AdvFloat {
        let v = AdvFloat::from(value);
        match self {
            Self::UnitScale => v / 255.,
            Self::SymmetricUnit => v / 127.5 - 1.,
            Self::Standardize { mean, std } => (v / 255. - mean[channel]) / std[channel],
        }
    }

    /// Inverse of `normalize` on the 0-255 scale, before rounding.
    pub fn denormalize(&self, x: AdvFloat, channel: usize) -> AdvFloat {
        match self {
            Self::UnitScale => x * 255.,
            Self::SymmetricUnit => (x + 1.) * 127.5,
            Self::Standardize { mean, std } => (x * std[channel] + mean[channel]) * 255.,
        }
    }
}

fn check_stats(mean: &[AdvFloat], std: &[AdvFloat]) -> Result<()> {
    if mean.is_empty() || mean.len() != std.len() {
        return Err(AttackError::InvalidRange(format!(
            "{} means for {} standard deviations",
            mean.len(),
            std.len()
        )));
    }
    if std.iter().any(|s| !(s.is_finite() && *s > 0.)) {
        return Err(AttackError::InvalidRange(format!(
            "standard deviations must be positive, got {std:?}"
        )));
    }
    Ok(())
}

/// `[(0 - mean) / std, (1 - mean) / std]` for each channel.
fn standardized_ranges(mean: &[AdvFloat], std: &[AdvFloat]) -> Result<ChannelRanges> {
    check_stats(mean, std)?;
    let ranges = mean
        .iter()
        .zip(std)
        .map(|(m, s)| ValidRange::new(-m / s, (1. - m) / s))
        .collect::<Result<Vec<_>>>()?;
    ChannelRanges::new(ranges)
}

/// A model's input contract: resolution, normalization and class names.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ModelFamily {
    pub name: String,
    pub input_shape: ImageShape,
    pub scheme: NormalizationScheme,
    /// May be shorter than the class count; unnamed classes are shown by index.
    pub class_names: Vec<String>,
}

const CIFAR10_CLASSES: [&str; 10] = [
    "airplane",
    "automobile",
    "bird",
    "cat",
    "deer",
    "dog",
    "frog",
    "horse",
    "ship",
    "truck",
];

impl ModelFamily {
    pub fn mnist() -> Self {
        Self {
            name: "mnist".to_string(),
            input_shape: ImageShape::new(28, 28, 1),
            scheme: NormalizationScheme::UnitScale,
            class_names: (0..10).map(|d| d.to_string()).collect(),
        }
    }

    pub fn cifar10() -> Self {
        Self {
            name: "cifar10".to_string(),
            input_shape: ImageShape::new(32, 32, 3),
            scheme: NormalizationScheme::UnitScale,
            class_names: CIFAR10_CLASSES.iter().map(ToString::to_string).collect(),
        }
    }

    pub fn mobilenet_v2() -> Self {
        Self {
            name: "mobilenet_v2".to_string(),
            input_shape: ImageShape::new(224, 224, 3),
            scheme: NormalizationScheme::SymmetricUnit,
            class_names: vec![],
        }
    }

    /// # Errors
    /// `UnknownModel` for names other than the presets above.
    pub fn preset(name: &str) -> Result<Self> {
        match name {
            "mnist" => Ok(Self::mnist()),
            "cifar10" => Ok(Self::cifar10()),
            "mobilenet_v2" | "imagenet" => Ok(Self::mobilenet_v2()),
            _ => Err(AttackError::UnknownModel(name.to_string())),
        }
    }

    /// # Errors
    /// See `NormalizationScheme::valid_range`.
    pub fn valid_range(&self) -> Result<ValidRange> {
        self.scheme.valid_range()
    }

    /// # Errors
    /// See `NormalizationScheme::valid_range`.
    pub fn channel_ranges(&self) -> Result<Option<ChannelRanges>> {
        self.scheme.channel_ranges()
    }

    /// # Errors
    /// See `decode_image`.
    pub fn decode(&self, bytes: &[u8]) -> Result<ArrayD<AdvFloat>> {
        decode_image(bytes, self.input_shape, &self.scheme)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayFormat {
    Png,
    Jpeg { quality: u8 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct DisplayOptions {
    /// Nearest-neighbour upscale target as `(width, height)`.
    pub upscale: Option<(u32, u32)>,
    pub format: DisplayFormat,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            upscale: Some((256, 256)),
            format: DisplayFormat::Png,
        }
    }
}

/// Expected shape is reported as an RGB image of the same resolution.
fn not_an_image(actual: &[usize]) -> AttackError {
    let (h, w) = match *actual {
        [_, h, w, _] => (h, w),
        _ => (1, 1),
    };
    AttackError::shape_mismatch(&[1, h.max(1), w.max(1), 3], actual)
}

fn u32_dim(n: usize) -> Result<u32> {
    u32::try_from(n).map_err(|e| AttackError::Internal(e.to_string()))
}

/// Decodes PNG or JPEG bytes into a `[1, h, w, c]` tensor normalized with `scheme`.
///
/// The image is converted to grayscale or RGB to match `target.channels` and
/// resized to the target resolution.
///
/// # Errors
/// `MalformedImage` if the bytes are not a supported image, `ShapeMismatch` if
/// the target is empty, has a channel count other than 1 or 3, or disagrees with
/// the scheme's per-channel statistics. `InvalidRange` if those statistics are
/// inconsistent.
pub fn decode_image(
    bytes: &[u8],
    target: ImageShape,
    scheme: &NormalizationScheme,
) -> Result<ArrayD<AdvFloat>> {
    if target.numel() == 0 || !matches!(target.channels, 1 | 3) {
        return Err(not_an_image(&target.dims()));
    }
    scheme.check_channels(target.channels)?;
    let img =
        image::load_from_memory(bytes).map_err(|e| AttackError::MalformedImage(e.to_string()))?;
    let (w, h) = (u32_dim(target.width)?, u32_dim(target.height)?);
    let img = if img.dimensions() == (w, h) {
        img
    } else {
        img.resize_exact(w, h, FilterType::Triangle)
    };
    let raw = if target.channels == 1 {
        img.to_luma8().into_raw()
    } else {
        img.to_rgb8().into_raw()
    };
    let values = raw
        .iter()
        .enumerate()
        .map(|(i, &v)| scheme.normalize(v, i % target.channels))
        .collect();
    Array::from_shape_vec(IxDyn(&target.dims()), values)
        .map_err(|e| AttackError::Internal(e.to_string()))
}

/// Renders a `[1, h, w, c]` tensor as a base64 encoded PNG or JPEG.
///
/// # Errors
/// `ShapeMismatch` if the tensor is not a single grayscale or RGB image.
pub fn encode_image(
    tensor: &ArrayViewD<AdvFloat>,
    scheme: &NormalizationScheme,
    options: &DisplayOptions,
) -> Result<String> {
    let shape = ImageShape::from_tensor_shape(tensor.shape())
        .ok()
        .filter(|s| s.numel() > 0 && matches!(s.channels, 1 | 3))
        .ok_or_else(|| not_an_image(tensor.shape()))?;
    scheme.check_channels(shape.channels)?;

    // Tensor iteration order is NHWC, the same as the raster's row-major order
    let pixels: Vec<u8> = tensor
        .iter()
        .enumerate()
        .map(|(i, &x)| quantize(scheme.denormalize(x, i % shape.channels)))
        .collect();
    let (w, h) = (u32_dim(shape.width)?, u32_dim(shape.height)?);
    let img = if shape.channels == 1 {
        GrayImage::from_raw(w, h, pixels).map(DynamicImage::ImageLuma8)
    } else {
        RgbImage::from_raw(w, h, pixels).map(DynamicImage::ImageRgb8)
    }
    .ok_or_else(|| AttackError::Internal("pixel buffer does not match image size".to_string()))?;

    let img = match options.upscale {
        Some((uw, uh)) if (uw, uh) != (w, h) => img.resize_exact(uw, uh, FilterType::Nearest),
        _ => img,
    };
    let format = match options.format {
        DisplayFormat::Png => ImageOutputFormat::Png,
        DisplayFormat::Jpeg { quality } => ImageOutputFormat::Jpeg(quality),
    };
    let mut bytes = Cursor::new(Vec::new());
    img.write_to(&mut bytes, format)
        .map_err(|e| AttackError::Internal(e.to_string()))?;
    Ok(general_purpose::STANDARD.encode(bytes.into_inner()))
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn quantize(v: AdvFloat) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.round().clamp(0., 255.) as u8
    }
}
