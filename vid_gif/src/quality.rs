//! Quality tiers and their fixed encoder parameter tables.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Named quality preset. Deserializes leniently, see [`QualityTier::parse_lenient`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum QualityTier {
    Low,
    #[default]
    Medium,
    High,
    Ultra,
}

/// How a tier is encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeStrategy {
    /// One ffmpeg invocation with an `fps,scale` filter chain.
    Simple,
    /// palettegen pass followed by a paletteuse pass.
    Palette,
}

/// Parameters of the single-pass filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleParams {
    pub fps: u32,
    pub default_width: u32,
    /// Use lanczos resampling instead of ffmpeg's default scaler.
    pub lanczos: bool,
}

/// Parameters of the two-pass palette path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaletteParams {
    pub fps: u32,
    pub default_width: u32,
    pub max_colors: u32,
    pub reserve_transparent_off: bool,
    /// `stats_mode=diff`: favor moving regions when building the palette.
    pub diff_stats: bool,
    pub dither: &'static str,
}

impl QualityTier {
    pub const ALL: [QualityTier; 4] = [
        QualityTier::Low,
        QualityTier::Medium,
        QualityTier::High,
        QualityTier::Ultra,
    ];

    /// Unknown names map to `Medium`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => QualityTier::Low,
            "medium" => QualityTier::Medium,
            "high" => QualityTier::High,
            "ultra" => QualityTier::Ultra,
            _ => QualityTier::Medium,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QualityTier::Low => "low",
            QualityTier::Medium => "medium",
            QualityTier::High => "high",
            QualityTier::Ultra => "ultra",
        }
    }

    pub fn strategy(&self) -> EncodeStrategy {
        match self {
            QualityTier::Low | QualityTier::Medium => EncodeStrategy::Simple,
            QualityTier::High | QualityTier::Ultra => EncodeStrategy::Palette,
        }
    }

    pub fn default_width(&self) -> u32 {
        match self {
            QualityTier::Low => 240,
            QualityTier::Medium => 480,
            QualityTier::High => 600,
            QualityTier::Ultra => 720,
        }
    }

    pub fn simple_params(&self) -> SimpleParams {
        let (fps, lanczos) = match self {
            QualityTier::Low => (4, false),
            QualityTier::Medium => (8, false),
            QualityTier::High => (12, true),
            QualityTier::Ultra => (20, true),
        };
        SimpleParams {
            fps,
            default_width: self.default_width(),
            lanczos,
        }
    }

    pub fn palette_params(&self) -> PaletteParams {
        let (fps, max_colors, reserve_transparent_off, diff_stats, dither) = match self {
            QualityTier::Low => (8, 32, false, false, "none"),
            QualityTier::Medium => (15, 128, true, false, "bayer:bayer_scale=2"),
            QualityTier::High => (18, 192, true, true, "floyd_steinberg"),
            QualityTier::Ultra => (25, 256, true, true, "floyd_steinberg"),
        };
        PaletteParams {
            fps,
            default_width: self.default_width(),
            max_colors,
            reserve_transparent_off,
            diff_stats,
            dither,
        }
    }
}

impl From<String> for QualityTier {
    fn from(s: String) -> Self {
        QualityTier::parse_lenient(&s)
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
