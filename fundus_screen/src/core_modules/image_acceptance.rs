// THEORY:
// `ImageAcceptance` is a cheap, local gate that answers one question: "is this plausibly
// a color fundus photograph?" It does not know anything about glaucoma. It only rejects
// inputs that no classifier should ever be asked to judge.
//
// The gate is a fixed cascade that stops at the first failure:
// 1.  **Decode**: bytes that the `image` crate cannot decode are unreadable.
// 2.  **Size**: either side below `min_dimension` pixels is too small to hold an optic disc
//     at a useful resolution.
// 3.  **Color Mode**: fundus cameras produce color images; a single-channel image is a
//     scan, an export, or a mistake.
// 4.  **Contrast**: the population standard deviation of Rec. 601 luminance (0..255
//     scale) must reach `min_contrast`. Flat images, blank screenshots and solid fills
//     fail here.
//
// The thresholds are policy, not physics. They live in `AcceptancePolicy` so callers can
// tune them without touching the cascade.

use image::DynamicImage;
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_MIN_DIMENSION: u32 = 200;
pub const DEFAULT_MIN_CONTRAST: f64 = 10.0;

/// Reason reported for an accepted image.
pub const VALID_REASON: &str = "Valid image";

/// Why an image was turned away. `Display` yields the user-facing reason.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
pub enum Rejection {
    #[error("Could not read image")]
    Unreadable,
    #[error("Image too small: {height}x{width}")]
    TooSmall { width: u32, height: u32 },
    #[error("Image is grayscale, expected color")]
    Grayscale,
    #[error("Image has very low contrast")]
    LowContrast { std_dev: f64 },
}

/// The decision for a single image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationOutcome {
    pub accepted: bool,
    pub reason: String,
    pub rejection: Option<Rejection>,
}

impl ValidationOutcome {
    fn accept() -> Self {
        Self {
            accepted: true,
            reason: VALID_REASON.to_string(),
            rejection: None,
        }
    }

    fn reject(rejection: Rejection) -> Self {
        Self {
            accepted: false,
            reason: rejection.to_string(),
            rejection: Some(rejection),
        }
    }
}

/// Tunable thresholds for the acceptance cascade.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AcceptancePolicy {
    /// Smallest allowed width and height, in pixels.
    pub min_dimension: u32,
    /// Smallest allowed luminance standard deviation, on a 0..255 scale.
    pub min_contrast: f64,
}

impl Default for AcceptancePolicy {
    fn default() -> Self {
        Self {
            min_dimension: DEFAULT_MIN_DIMENSION,
            min_contrast: DEFAULT_MIN_CONTRAST,
        }
    }
}

impl AcceptancePolicy {
    /// Decodes `image_bytes` and runs the cascade.
    pub fn validate(&self, image_bytes: &[u8]) -> ValidationOutcome {
        match image::load_from_memory(image_bytes) {
            Ok(image) => self.validate_image(&image),
            Err(_) => ValidationOutcome::reject(Rejection::Unreadable),
        }
    }

    /// Runs the cascade on an already decoded image.
    pub fn validate_image(&self, image: &DynamicImage) -> ValidationOutcome {
        let (width, height) = (image.width(), image.height());
        if height < self.min_dimension || width < self.min_dimension {
            return ValidationOutcome::reject(Rejection::TooSmall { width, height });
        }

        if !image.color().has_color() {
            return ValidationOutcome::reject(Rejection::Grayscale);
        }

        let std_dev = luminance_std_dev(image);
        if std_dev < self.min_contrast {
            return ValidationOutcome::reject(Rejection::LowContrast { std_dev });
        }

        ValidationOutcome::accept()
    }
}

/// Validates with the default thresholds.
pub fn validate(image_bytes: &[u8]) -> ValidationOutcome {
    AcceptancePolicy::default().validate(image_bytes)
}

/// Population standard deviation of Rec. 601 luma over every pixel.
pub fn luminance_std_dev(image: &DynamicImage) -> f64 {
    let rgb = image.to_rgb8();
    let count = (rgb.width() as u64 * rgb.height() as u64) as f64;
    if count < 1.0 {
        return 0.0;
    }

    let (sum, sum_sq) = rgb.pixels().fold((0.0f64, 0.0f64), |(sum, sum_sq), pixel| {
        let [r, g, b] = pixel.0;
        let luma = 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
        (sum + luma, sum_sq + luma * luma)
    });

    let mean = sum / count;
    let variance = (sum_sq / count - mean * mean).max(0.0);
    variance.sqrt()
}
