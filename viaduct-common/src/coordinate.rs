//! Fixed-point geographic coordinates.
//!
//! Longitude/latitude are stored as signed 32-bit integers at 1e-7 degree
//! resolution, matching OSRM's on-disk representation so that a container
//! produced by an external extractor (out of scope here) can be read
//! without a conversion pass.

use std::fmt;

/// 1 degree == this many fixed-point units.
pub const COORDINATE_PRECISION: i64 = 10_000_000;

const LON_MIN: i32 = -1_800_000_000;
const LON_MAX: i32 = 1_800_000_000;
const LAT_MIN: i32 = -900_000_000;
const LAT_MAX: i32 = 900_000_000;

/// Sentinel for "no coordinate". Never a valid lon/lat pair, and must not
/// take part in arithmetic: all distance/bearing helpers below assert
/// against it.
const UNDEFINED: i32 = i32::MIN;

/// A longitude/latitude pair in 1e-7 degree fixed point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coordinate {
    pub lon: i32,
    pub lat: i32,
}

impl Coordinate {
    pub const UNDEFINED: Coordinate = Coordinate {
        lon: UNDEFINED,
        lat: UNDEFINED,
    };

    /// Construct from fixed-point units, asserting the §3 range invariant.
    pub fn new(lon: i32, lat: i32) -> Self {
        debug_assert!(
            (LON_MIN..=LON_MAX).contains(&lon),
            "longitude {lon} outside valid range"
        );
        debug_assert!(
            (LAT_MIN..=LAT_MAX).contains(&lat),
            "latitude {lat} outside valid range"
        );
        Coordinate { lon, lat }
    }

    /// Construct from floating-point degrees.
    pub fn from_degrees(lon: f64, lat: f64) -> Self {
        Coordinate::new(
            (lon * COORDINATE_PRECISION as f64).round() as i32,
            (lat * COORDINATE_PRECISION as f64).round() as i32,
        )
    }

    pub fn is_defined(&self) -> bool {
        *self != Coordinate::UNDEFINED
    }

    pub fn lon_degrees(&self) -> f64 {
        debug_assert!(self.is_defined());
        self.lon as f64 / COORDINATE_PRECISION as f64
    }

    pub fn lat_degrees(&self) -> f64 {
        debug_assert!(self.is_defined());
        self.lat as f64 / COORDINATE_PRECISION as f64
    }
}

impl fmt::Display for Coordinate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_defined() {
            return write!(f, "undefined");
        }
        write!(f, "{:.7},{:.7}", self.lon_degrees(), self.lat_degrees())
    }
}

/// Parses a decimal longitude/latitude string into fixed-point units.
///
/// Supports an optional leading sign, an integer part, an optional
/// fractional part, and an optional scientific exponent (`e`/`E`). The
/// last retained digit is rounded half-to-even, matching the behavior of
/// `format!("{:.7}")` on an IEEE double rather than naive truncation.
///
/// A parse fails (returns `None`) unless the *entire* input is consumed.
pub fn parse_fixed_degrees(input: &str) -> Option<i32> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return None;
    }

    let mut chars = trimmed.char_indices().peekable();
    let negative = match chars.peek() {
        Some((_, '-')) => {
            chars.next();
            true
        }
        Some((_, '+')) => {
            chars.next();
            false
        }
        _ => false,
    };

    let rest = &trimmed[chars.peek().map(|(i, _)| *i).unwrap_or(trimmed.len())..];
    if rest.is_empty() {
        return None;
    }

    // Split mantissa / exponent on e|E.
    let (mantissa, exponent) = match rest.find(['e', 'E']) {
        Some(pos) => {
            let exp_str = &rest[pos + 1..];
            let exp: i32 = exp_str.parse().ok()?;
            (&rest[..pos], exp)
        }
        None => (rest, 0),
    };

    if mantissa.is_empty() {
        return None;
    }

    let (int_part, frac_part) = match mantissa.find('.') {
        Some(pos) => (&mantissa[..pos], &mantissa[pos + 1..]),
        None => (mantissa, ""),
    };

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !frac_part.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }

    // Build value as (integer-degrees * 1e7 + fractional-units), scaled by
    // the exponent, with half-to-even rounding at the 7th fractional digit.
    const SCALE_DIGITS: i32 = 7;
    let shift = SCALE_DIGITS + exponent;

    let mut digits = String::with_capacity(int_part.len() + frac_part.len() + 1);
    digits.push_str(int_part);
    digits.push_str(frac_part);
    let point_from_right = frac_part.len() as i32 - shift;

    // digits represents an integer; we want round(digits * 10^(-point_from_right))
    if digits.is_empty() {
        return None;
    }
    let raw: i128 = digits.parse().ok()?;

    let scaled = if point_from_right <= 0 {
        raw.checked_mul(10i128.pow((-point_from_right) as u32))?
    } else {
        round_half_to_even_div(raw, 10i128.pow(point_from_right as u32))
    };

    let signed = if negative { -scaled } else { scaled };
    i32::try_from(signed).ok()
}

fn round_half_to_even_div(value: i128, divisor: i128) -> i128 {
    let quotient = value / divisor;
    let remainder = value % divisor;
    let twice = remainder * 2;
    match twice.cmp(&divisor) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => {
            if quotient % 2 == 0 {
                quotient
            } else {
                quotient + 1
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_integers() {
        assert_eq!(parse_fixed_degrees("13"), Some(130_000_000));
        assert_eq!(parse_fixed_degrees("-13"), Some(-130_000_000));
    }

    #[test]
    fn parses_fractional() {
        assert_eq!(parse_fixed_degrees("13.388860"), Some(133_888_860));
        assert_eq!(parse_fixed_degrees("52.517037"), Some(525_170_370));
    }

    #[test]
    fn parses_leading_sign_and_fraction_only() {
        assert_eq!(parse_fixed_degrees("+.5"), Some(5_000_000));
        assert_eq!(parse_fixed_degrees("-.5"), Some(-5_000_000));
    }

    #[test]
    fn parses_scientific_exponent() {
        assert_eq!(parse_fixed_degrees("1.5e1"), Some(150_000_000));
        assert_eq!(parse_fixed_degrees("15e-1"), Some(15_000_000));
    }

    #[test]
    fn rejects_partial_consumption() {
        assert_eq!(parse_fixed_degrees("13.5abc"), None);
        assert_eq!(parse_fixed_degrees(""), None);
        assert_eq!(parse_fixed_degrees("--1"), None);
    }

    #[test]
    fn rounds_half_to_even_on_last_digit() {
        // 8 fractional digits -> rounds at the 7th.
        assert_eq!(parse_fixed_degrees("1.00000005"), Some(10_000_000));
        assert_eq!(parse_fixed_degrees("1.00000015"), Some(10_000_002));
        assert_eq!(parse_fixed_degrees("1.00000025"), Some(10_000_002));
    }

    #[test]
    fn coordinate_roundtrips_through_degrees() {
        let c = Coordinate::from_degrees(13.388860, 52.517037);
        assert_eq!(c.lon, 133_888_860);
        assert_eq!(c.lat, 525_170_370);
    }

    #[test]
    fn undefined_is_distinguished() {
        assert!(!Coordinate::UNDEFINED.is_defined());
        assert!(Coordinate::from_degrees(0.0, 0.0).is_defined());
    }
}
