// THEORY:
// The `calibration` module turns format-specific acquisition metadata into the
// physical scale of a pixel. Each instrument format names its four quantities
// differently (physical width/height, pixel columns/rows), and some of them arrive
// as strings with a trailing unit ("100.0 nm") that must be reduced to the leading
// numeric token. Resolution happens once, at ingestion; the resulting
// `CalibrationCoefficients` are immutable for the lifetime of the sample.

use crate::error::{SpotResult, ValidationError};
use crate::sample::AcquisitionHeader;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use tracing::{debug, error};

static NUMERIC_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.?\d*)").expect("numeric token pattern is valid"));

/// The closed set of acquisition formats whose headers we know how to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionFormat {
    /// Flat numeric header: `x_size`, `y_size`, `x_points`, `y_points`.
    S94,
    /// Flat text header with unit-suffixed amplitudes.
    Stp,
    /// Multi-frame stack with a sectioned header (`Control`, `General Info`).
    Mpp,
}

impl AcquisitionFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            AcquisitionFormat::S94 => "s94",
            AcquisitionFormat::Stp => "stp",
            AcquisitionFormat::Mpp => "mpp",
        }
    }

    /// Whether one source file of this format carries a stack of frames.
    pub fn is_multi_frame(&self) -> bool {
        matches!(self, AcquisitionFormat::Mpp)
    }
}

impl fmt::Display for AcquisitionFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AcquisitionFormat {
    type Err = ValidationError;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        match tag.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "s94" => Ok(AcquisitionFormat::S94),
            "stp" => Ok(AcquisitionFormat::Stp),
            "mpp" => Ok(AcquisitionFormat::Mpp),
            _ => Err(ValidationError::UnknownFormat(tag.to_string())),
        }
    }
}

/// Physical size of one pixel, in nanometres, for a single acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationCoefficients {
    x_nm_per_px: f64,
    y_nm_per_px: f64,
    area_coefficient: f64,
}

impl CalibrationCoefficients {
    /// Builds coefficients from per-axis scales. The area coefficient is always
    /// the exact product of the two.
    pub fn from_scales(x_nm_per_px: f64, y_nm_per_px: f64) -> Self {
        Self {
            x_nm_per_px,
            y_nm_per_px,
            area_coefficient: x_nm_per_px * y_nm_per_px,
        }
    }

    pub fn x_nm_per_px(&self) -> f64 {
        self.x_nm_per_px
    }

    pub fn y_nm_per_px(&self) -> f64 {
        self.y_nm_per_px
    }

    pub fn area_coefficient(&self) -> f64 {
        self.area_coefficient
    }

    /// Scales a pixel area to square nanometres.
    pub fn physical_area(&self, pixel_area: f64) -> f64 {
        pixel_area * self.area_coefficient
    }

    /// Scales a pixel distance to nanometres. Only the x-axis scale is applied,
    /// also for non-square pixels.
    pub fn physical_distance(&self, pixel_distance: f64) -> f64 {
        pixel_distance * self.x_nm_per_px
    }
}

/// The four raw quantities every format must provide.
#[derive(Debug, Clone, Copy, PartialEq)]
struct ImageSizes {
    x_nm: f64,
    y_nm: f64,
    x_px: f64,
    y_px: f64,
}

/// Resolves the calibration of one acquisition from its header.
pub fn resolve(
    header: &AcquisitionHeader,
    format: AcquisitionFormat,
) -> SpotResult<CalibrationCoefficients> {
    let Some(fields) = header.as_mapping() else {
        error!(format = %format, "calibration header is not a mapping");
        return Err(ValidationError::NotAMapping.into());
    };

    let sizes = image_sizes(fields, format).inspect_err(|e| {
        error!(format = %format, error = %e, "failed to read calibration fields");
    })?;

    let (x_field, y_field) = pixel_count_fields(format);
    if sizes.x_px == 0.0 {
        return Err(zero_count(x_field, format).into());
    }
    if sizes.y_px == 0.0 {
        return Err(zero_count(y_field, format).into());
    }

    let coefficients =
        CalibrationCoefficients::from_scales(sizes.x_nm / sizes.x_px, sizes.y_nm / sizes.y_px);
    debug!(
        format = %format,
        x_nm_per_px = coefficients.x_nm_per_px,
        y_nm_per_px = coefficients.y_nm_per_px,
        "calibration resolved"
    );
    Ok(coefficients)
}

/// Same as [`resolve`] but takes the format as a raw tag, e.g. a file extension.
pub fn resolve_tagged(header: &AcquisitionHeader, tag: &str) -> SpotResult<CalibrationCoefficients> {
    let format = AcquisitionFormat::from_str(tag)?;
    resolve(header, format)
}

fn pixel_count_fields(format: AcquisitionFormat) -> (&'static str, &'static str) {
    match format {
        AcquisitionFormat::S94 => ("x_points", "y_points"),
        AcquisitionFormat::Stp => ("Number of columns", "Number of rows"),
        AcquisitionFormat::Mpp => ("General Info/Number of columns", "General Info/Number of rows"),
    }
}

fn zero_count(field: &str, format: AcquisitionFormat) -> ValidationError {
    ValidationError::ZeroPixelCount {
        field: field.to_string(),
        format: format.to_string(),
    }
}

fn image_sizes(
    fields: &serde_json::Map<String, Value>,
    format: AcquisitionFormat,
) -> Result<ImageSizes, ValidationError> {
    match format {
        AcquisitionFormat::S94 => Ok(ImageSizes {
            x_nm: plain_number(lookup(fields, &["x_size"], format)?, "x_size", format)?,
            y_nm: plain_number(lookup(fields, &["y_size"], format)?, "y_size", format)?,
            x_px: plain_number(lookup(fields, &["x_points"], format)?, "x_points", format)?,
            y_px: plain_number(lookup(fields, &["y_points"], format)?, "y_points", format)?,
        }),
        AcquisitionFormat::Stp => Ok(ImageSizes {
            x_nm: unit_number(lookup(fields, &["X Amplitude"], format)?, "X Amplitude", format)?,
            y_nm: unit_number(lookup(fields, &["Y Amplitude"], format)?, "Y Amplitude", format)?,
            x_px: plain_number(
                lookup(fields, &["Number of columns"], format)?,
                "Number of columns",
                format,
            )?,
            y_px: plain_number(
                lookup(fields, &["Number of rows"], format)?,
                "Number of rows",
                format,
            )?,
        }),
        AcquisitionFormat::Mpp => {
            let x_amp = ["Control", "X Amplitude"];
            let y_amp = ["Control", "Y Amplitude"];
            let cols = ["General Info", "Number of columns"];
            let rows = ["General Info", "Number of rows"];
            Ok(ImageSizes {
                x_nm: unit_number(lookup(fields, &x_amp, format)?, &x_amp.join("/"), format)?,
                y_nm: unit_number(lookup(fields, &y_amp, format)?, &y_amp.join("/"), format)?,
                x_px: plain_number(lookup(fields, &cols, format)?, &cols.join("/"), format)?,
                y_px: plain_number(lookup(fields, &rows, format)?, &rows.join("/"), format)?,
            })
        }
    }
}

/// Walks a nested key path through the header.
fn lookup<'a>(
    fields: &'a serde_json::Map<String, Value>,
    path: &[&str],
    format: AcquisitionFormat,
) -> Result<&'a Value, ValidationError> {
    let missing = || ValidationError::MissingField {
        field: path.join("/"),
        format: format.to_string(),
    };

    let (first, rest) = path.split_first().ok_or_else(missing)?;
    let mut current = fields.get(*first).ok_or_else(missing)?;
    for key in rest {
        current = current.get(*key).ok_or_else(missing)?;
    }
    Ok(current)
}

/// A field that is either a JSON number or a string holding exactly a number.
fn plain_number(value: &Value, field: &str, format: AcquisitionFormat) -> Result<f64, ValidationError> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .ok_or_else(|| ValidationError::NonNumericField {
        field: field.to_string(),
        format: format.to_string(),
        raw: value.to_string(),
    })
}

/// A field that may carry a unit suffix, e.g. `"100.0 nm"`.
fn unit_number(value: &Value, field: &str, format: AcquisitionFormat) -> Result<f64, ValidationError> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| ValidationError::NonNumericField {
            field: field.to_string(),
            format: format.to_string(),
            raw: value.to_string(),
        }),
        Value::String(s) => {
            extract_number(s).ok_or_else(|| ValidationError::NoNumericToken {
                field: field.to_string(),
                format: format.to_string(),
                raw: s.clone(),
            })
        }
        _ => Err(ValidationError::NonNumericField {
            field: field.to_string(),
            format: format.to_string(),
            raw: value.to_string(),
        }),
    }
}

/// Returns the first unsigned decimal number found in `text`, if any.
pub fn extract_number(text: &str) -> Option<f64> {
    NUMERIC_TOKEN
        .find(text)
        .and_then(|m| m.as_str().parse::<f64>().ok())
}

/// Converts a pixel measurement to nanometres.
pub fn pixels_to_nm(pixels: f64, coefficient: f64) -> f64 {
    pixels * coefficient
}

/// Converts nanometres back to whole pixels, truncating toward zero.
pub fn nm_to_pixels(nm: f64, coefficient: f64) -> i64 {
    (nm / coefficient) as i64
}
