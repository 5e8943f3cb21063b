//! Output formatting options: float format strings and compression.

use crate::error::{ProfilingError, Result};
use serde::{Deserialize, Serialize};

/// Conversion used by a printf-style float format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FloatStyle {
    /// `%g`: shortest of fixed or scientific with `precision` significant digits.
    General,
    /// `%f`: fixed-point with `precision` decimals.
    Fixed,
    /// `%e`: scientific with `precision` decimals.
    Exponent,
}

/// A printf-style float format such as `%.5g`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FloatFormat {
    pub precision: usize,
    pub style: FloatStyle,
}

impl FloatFormat {
    /// Parse a format string of the form `%.<precision><g|f|e>`.
    ///
    /// A missing precision defaults to 6, as in C.
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid =
            || ProfilingError::InvalidParameter(format!("Unsupported float format '{}'", spec));

        let body = spec.trim().strip_prefix('%').ok_or_else(invalid)?;
        let split = body.char_indices().last().map_or(0, |(i, _)| i);
        let (digits, conversion) = body.split_at(split);
        let style = match conversion {
            "g" | "G" => FloatStyle::General,
            "f" | "F" => FloatStyle::Fixed,
            "e" | "E" => FloatStyle::Exponent,
            _ => return Err(invalid()),
        };
        let precision = match digits.strip_prefix('.') {
            Some("") => 0,
            Some(p) => p.parse().map_err(|_| invalid())?,
            None if digits.is_empty() => 6,
            None => return Err(invalid()),
        };

        Ok(Self { precision, style })
    }

    /// Render a finite value. Non-finite values are handled by [`format_value`].
    fn render(&self, value: f64) -> String {
        match self.style {
            FloatStyle::Fixed => format!("{:.*}", self.precision, value),
            FloatStyle::Exponent => {
                let (mantissa, exp) = split_exponent(&format!("{:.*e}", self.precision, value));
                c_exponent(&mantissa, exp)
            }
            FloatStyle::General => self.render_general(value),
        }
    }

    fn render_general(&self, value: f64) -> String {
        if value == 0.0 {
            return "0".to_string();
        }
        let precision = self.precision.max(1);
        let (mantissa, exp) = split_exponent(&format!("{:.*e}", precision - 1, value));

        if exp < -4 || exp >= precision as i32 {
            c_exponent(trim_zeros(&mantissa), exp)
        } else {
            let decimals = (precision as i32 - 1 - exp).max(0) as usize;
            trim_zeros(&format!("{:.*}", decimals, value)).to_string()
        }
    }
}

/// Format a measurement value for output.
///
/// NaN is written as an empty field; infinities as `inf` / `-inf`.
pub fn format_value(value: f64, format: Option<&FloatFormat>) -> String {
    if value.is_nan() {
        return String::new();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    match format {
        Some(f) => f.render(value),
        None => value.to_string(),
    }
}

/// Parse a measurement value; empty and NA spellings become NaN.
pub fn parse_value(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    match trimmed {
        "" | "NA" | "na" | "NaN" | "nan" | "None" => Some(f64::NAN),
        "inf" | "Inf" => Some(f64::INFINITY),
        "-inf" | "-Inf" => Some(f64::NEG_INFINITY),
        _ => trimmed.parse().ok(),
    }
}

fn split_exponent(rendered: &str) -> (String, i32) {
    match rendered.split_once('e') {
        Some((mantissa, exp)) => (mantissa.to_string(), exp.parse().unwrap_or(0)),
        None => (rendered.to_string(), 0),
    }
}

fn c_exponent(mantissa: &str, exp: i32) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{}e{}{:02}", mantissa, sign, exp.abs())
}

fn trim_zeros(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Compression applied to written profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "Option<String>", into = "Option<String>")]
pub enum Compression {
    Gzip,
    #[default]
    None,
}

impl From<Compression> for Option<String> {
    fn from(value: Compression) -> Self {
        Some(
            match value {
                Compression::Gzip => "gzip",
                Compression::None => "none",
            }
            .to_string(),
        )
    }
}

impl TryFrom<Option<String>> for Compression {
    type Error = String;

    fn try_from(value: Option<String>) -> std::result::Result<Self, Self::Error> {
        match value.as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("none") | Some("") => Ok(Self::None),
            Some("gzip") | Some("gz") => Ok(Self::Gzip),
            Some(other) => Err(format!("unsupported compression '{}'", other)),
        }
    }
}

/// How profiles are written: compression and float format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputOptions {
    pub compression: Compression,
    pub float_format: Option<FloatFormat>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn g(precision: usize) -> FloatFormat {
        FloatFormat {
            precision,
            style: FloatStyle::General,
        }
    }

    #[test]
    fn test_parse_format() {
        assert_eq!(FloatFormat::parse("%.5g").unwrap(), g(5));
        assert_eq!(
            FloatFormat::parse("%.3f").unwrap(),
            FloatFormat {
                precision: 3,
                style: FloatStyle::Fixed
            }
        );
        assert_eq!(FloatFormat::parse("%g").unwrap(), g(6));
        assert!(FloatFormat::parse("5g").is_err());
        assert!(FloatFormat::parse("%.5q").is_err());
    }

    #[test]
    fn test_general_matches_printf() {
        let f = g(5);
        assert_eq!(format_value(1.0, Some(&f)), "1");
        assert_eq!(format_value(0.5, Some(&f)), "0.5");
        assert_eq!(format_value(123456.0, Some(&f)), "1.2346e+05");
        assert_eq!(format_value(3.14159265, Some(&f)), "3.1416");
        assert_eq!(format_value(0.0001234567, Some(&f)), "0.00012346");
        assert_eq!(format_value(0.00001234567, Some(&f)), "1.2346e-05");
        assert_eq!(format_value(-2.5, Some(&f)), "-2.5");
        assert_eq!(format_value(0.0, Some(&f)), "0");
        assert_eq!(format_value(99999.7, Some(&f)), "1e+05");
    }

    #[test]
    fn test_fixed_and_exponent() {
        let fixed = FloatFormat::parse("%.2f").unwrap();
        let exp = FloatFormat::parse("%.2e").unwrap();
        assert_eq!(format_value(1.005, Some(&fixed)), "1.00");
        assert_eq!(format_value(1234.5, Some(&exp)), "1.23e+03");
    }

    #[test]
    fn test_nan_and_parse() {
        assert_eq!(format_value(f64::NAN, None), "");
        assert!(parse_value("").unwrap().is_nan());
        assert!(parse_value("NaN").unwrap().is_nan());
        assert_eq!(parse_value(" 2.5 "), Some(2.5));
        assert_eq!(parse_value("abc"), None);
    }

    #[test]
    fn test_compression_from_config() {
        assert_eq!(Compression::try_from(None).unwrap(), Compression::None);
        assert_eq!(
            Compression::try_from(Some("None".to_string())).unwrap(),
            Compression::None
        );
        assert_eq!(
            Compression::try_from(Some("gzip".to_string())).unwrap(),
            Compression::Gzip
        );
        assert!(Compression::try_from(Some("bz2".to_string())).is_err());
    }
}
