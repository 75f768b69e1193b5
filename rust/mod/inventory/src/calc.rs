//! Derived-value calculator. Pure functions, no state.

use yard_core::ServiceError;

use crate::model::Piece;

/// Round to 3 decimal places.
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}

/// Linear meters of a piece: `length * width`, 3 decimals.
pub fn linear_meters(length: f64, width: f64) -> f64 {
    round3(length * width)
}

/// Aggregate totals of a platform's piece set.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Totals {
    pub total_length: f64,
    pub total_linear_meters: f64,
}

/// Sum lengths and linear meters over `pieces`. Zeros for an empty set.
pub fn platform_totals(pieces: &[Piece]) -> Totals {
    let (length, linear) = pieces
        .iter()
        .fold((0.0, 0.0), |(l, m), p| (l + p.length, m + p.linear_meters));
    Totals {
        total_length: round3(length),
        total_linear_meters: round3(linear),
    }
}

/// Advisory check for a piece length: finite, `> 0`, `<= max`.
pub fn validate_length(length: f64, max: f64) -> Result<(), ServiceError> {
    check_measure("length", length, max)
}

/// Advisory check for a standard width: finite, `> 0`, `<= max`.
pub fn validate_width(width: f64, max: f64) -> Result<(), ServiceError> {
    check_measure("width", width, max)
}

fn check_measure(what: &str, value: f64, max: f64) -> Result<(), ServiceError> {
    if !value.is_finite() {
        return Err(ServiceError::Validation(format!("{what} must be a number")));
    }
    if value <= 0.0 {
        return Err(ServiceError::Validation(format!(
            "{what} must be greater than 0 (got {value})"
        )));
    }
    if value > max {
        return Err(ServiceError::Validation(format!(
            "{what} must be at most {max} (got {value})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::UNSPECIFIED_MATERIAL;

    fn piece(length: f64, width: f64) -> Piece {
        Piece {
            id: "p".into(),
            sequence_number: 1,
            length,
            standard_width: width,
            linear_meters: linear_meters(length, width),
            material: UNSPECIFIED_MATERIAL.into(),
        }
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{a} != {b}");
    }

    #[test]
    fn linear_meters_rounds_to_three_places() {
        assert_close(linear_meters(2.0, 0.30), 0.6);
        assert_close(linear_meters(1.5, 0.30), 0.45);
        assert_close(linear_meters(1.2345, 1.0), 1.235);
        assert_close(linear_meters(3.3333, 0.3333), 1.111);
    }

    #[test]
    fn linear_meters_matches_rounded_product_over_a_grid() {
        for l in 1..=100 {
            for w in 1..=50 {
                let length = l as f64 * 0.1;
                let width = w as f64 * 0.1;
                assert_close(linear_meters(length, width), round3(length * width));
            }
        }
    }

    #[test]
    fn totals_of_empty_set_are_zero() {
        assert_eq!(platform_totals(&[]), Totals::default());
    }

    #[test]
    fn totals_sum_pieces() {
        let totals = platform_totals(&[piece(2.0, 0.30), piece(1.5, 0.30)]);
        assert_close(totals.total_length, 3.5);
        assert_close(totals.total_linear_meters, 1.05);
    }

    #[test]
    fn length_validation() {
        assert!(validate_length(2.0, 10.0).is_ok());
        assert!(validate_length(10.0, 10.0).is_ok());
        assert!(validate_length(0.0, 10.0).is_err());
        assert!(validate_length(-1.0, 10.0).is_err());
        assert!(validate_length(10.01, 10.0).is_err());
        assert!(validate_length(f64::NAN, 10.0).is_err());
        assert!(validate_length(f64::INFINITY, 10.0).is_err());
    }

    #[test]
    fn width_validation() {
        assert!(validate_width(0.25, 5.0).is_ok());
        assert!(validate_width(0.0, 5.0).unwrap_err().is_validation());
        assert!(validate_width(5.5, 5.0).is_err());
    }
}
