use std::fmt;
use std::io::Cursor;

use image::{ColorType, ImageFormat, ImageReader};
use serde::Serialize;

/// Color layouts the validator distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColorMode {
    Luma,
    LumaAlpha,
    Rgb,
    Rgba,
    Palette,
    Cmyk,
    Other,
}

impl ColorMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorMode::Luma => "L",
            ColorMode::LumaAlpha => "LA",
            ColorMode::Rgb => "RGB",
            ColorMode::Rgba => "RGBA",
            ColorMode::Palette => "P",
            ColorMode::Cmyk => "CMYK",
            ColorMode::Other => "other",
        }
    }
}

impl From<ColorType> for ColorMode {
    fn from(value: ColorType) -> Self {
        match value {
            ColorType::L8 | ColorType::L16 => ColorMode::Luma,
            ColorType::La8 | ColorType::La16 => ColorMode::LumaAlpha,
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => ColorMode::Rgb,
            ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => ColorMode::Rgba,
            _ => ColorMode::Other,
        }
    }
}

impl fmt::Display for ColorMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationRules {
    pub min_width: u32,
    pub min_height: u32,
    pub accepted_modes: Vec<ColorMode>,
}

impl Default for ValidationRules {
    fn default() -> Self {
        Self {
            min_width: 512,
            min_height: 512,
            accepted_modes: vec![ColorMode::Rgb, ColorMode::Rgba],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ImageInfo {
    pub width: u32,
    pub height: u32,
    pub mode: ColorMode,
    pub format: Option<String>,
    pub byte_len: usize,
}

#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("image bytes could not be decoded: {0}")]
    Undecodable(String),
    #[error("image is {width}x{height}, below the {min_width}x{min_height} minimum")]
    TooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("color mode {mode} is not accepted")]
    UnsupportedMode { mode: ColorMode },
    #[error("provider returned no image data")]
    NoImageData,
}

/// Decodes `bytes` and checks them against `rules`. The bytes are only read.
pub fn validate_image(bytes: &[u8], rules: &ValidationRules) -> Result<ImageInfo, ValidationError> {
    if bytes.is_empty() {
        return Err(ValidationError::NoImageData);
    }
    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|err| ValidationError::Undecodable(err.to_string()))?;
    let format = reader.format();
    let decoded = reader
        .decode()
        .map_err(|err| ValidationError::Undecodable(err.to_string()))?;

    let (width, height) = (decoded.width(), decoded.height());
    if width < rules.min_width || height < rules.min_height {
        return Err(ValidationError::TooSmall {
            width,
            height,
            min_width: rules.min_width,
            min_height: rules.min_height,
        });
    }
    let mode = source_color_mode(bytes, format).unwrap_or_else(|| decoded.color().into());
    if !rules.accepted_modes.contains(&mode) {
        return Err(ValidationError::UnsupportedMode { mode });
    }

    Ok(ImageInfo {
        width,
        height,
        mode,
        format: format.map(format_name),
        byte_len: bytes.len(),
    })
}

/// Decoders expand palette PNGs and convert CMYK JPEGs to RGB, so those
/// layouts are read from the container header instead.
fn source_color_mode(bytes: &[u8], format: Option<ImageFormat>) -> Option<ColorMode> {
    match format? {
        ImageFormat::Png => {
            let mut decoder = png::Decoder::new(Cursor::new(bytes));
            let info = decoder.read_header_info().ok()?;
            (info.color_type == png::ColorType::Indexed).then_some(ColorMode::Palette)
        }
        ImageFormat::Jpeg => (jpeg_component_count(bytes)? == 4).then_some(ColorMode::Cmyk),
        _ => None,
    }
}

/// Component count from the first SOF segment, scanning markers up to SOS.
fn jpeg_component_count(bytes: &[u8]) -> Option<u8> {
    if !bytes.starts_with(&[0xFF, 0xD8]) {
        return None;
    }
    let mut pos = 2;
    loop {
        if *bytes.get(pos)? != 0xFF {
            return None;
        }
        let marker = *bytes.get(pos + 1)?;
        match marker {
            0xFF => {
                pos += 1;
                continue;
            }
            0x01 | 0xD0..=0xD7 => {
                pos += 2;
                continue;
            }
            0xD9 | 0xDA => return None,
            _ => {}
        }
        let len = u16::from_be_bytes([*bytes.get(pos + 2)?, *bytes.get(pos + 3)?]) as usize;
        if matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            // length(2) precision(1) height(2) width(2) components(1)
            return bytes.get(pos + 9).copied();
        }
        pos += 2 + len;
    }
}

fn format_name(format: ImageFormat) -> String {
    format
        .extensions_str()
        .first()
        .map(|ext| ext.to_string())
        .unwrap_or_else(|| format!("{format:?}").to_ascii_lowercase())
}

const CARD_ASPECT_RATIO: f64 = 3.5 / 2.0;
const ASPECT_TOLERANCE: f64 = 0.1;
const MIN_FILE_BYTES: usize = 1024;
const MAX_FILE_BYTES: usize = 10 * 1024 * 1024;
const MIN_PRINT_DPI: f64 = 150.0;

/// Informational print checks for a 3.5" x 2" card. Never fails a generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrintReadiness {
    pub aspect_ratio: f64,
    pub aspect_ratio_ok: bool,
    pub file_size_ok: bool,
    pub estimated_dpi: f64,
    pub dpi_ok: bool,
    pub issues: Vec<String>,
}

impl PrintReadiness {
    pub fn is_print_ready(&self) -> bool {
        self.issues.is_empty()
    }
}

pub fn assess_print_readiness(info: &ImageInfo) -> PrintReadiness {
    let aspect_ratio = info.width as f64 / info.height.max(1) as f64;
    let aspect_ratio_ok = (aspect_ratio - CARD_ASPECT_RATIO).abs() <= ASPECT_TOLERANCE;
    let file_size_ok = (MIN_FILE_BYTES..=MAX_FILE_BYTES).contains(&info.byte_len);
    let estimated_dpi = (info.width as f64 / 3.5).min(info.height as f64 / 2.0);
    let dpi_ok = estimated_dpi >= MIN_PRINT_DPI;

    let mut issues = Vec::new();
    if !aspect_ratio_ok {
        issues.push(format!(
            "aspect ratio {aspect_ratio:.2} differs from {CARD_ASPECT_RATIO:.2}"
        ));
    }
    if !file_size_ok {
        issues.push(format!("file size {} bytes outside 1KB-10MB", info.byte_len));
    }
    if !dpi_ok {
        issues.push(format!(
            "estimated {estimated_dpi:.0} DPI below {MIN_PRINT_DPI:.0}"
        ));
    }

    PrintReadiness {
        aspect_ratio,
        aspect_ratio_ok,
        file_size_ok,
        estimated_dpi,
        dpi_ok,
        issues,
    }
}
