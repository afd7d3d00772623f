use crate::types::Units;

/// Which zeros a coordinate may drop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ZeroOmission {
    #[default]
    Leading,
    /// Short values are padded on the right to the full digit count.
    Trailing,
}

/// Whether coordinates are absolute or relative to the current point.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Notation {
    #[default]
    Absolute,
    Incremental,
}

/// Coordinate format from the %FS (Format Specification) command.
///
/// Example: `%FSLAX24Y24*%` means leading-zero omission, absolute notation,
/// 2 integer digits + 4 decimal digits for both X and Y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinateFormat {
    pub zeros: ZeroOmission,
    pub notation: Notation,
    pub x_integer: u8,
    pub x_decimal: u8,
    pub y_integer: u8,
    pub y_decimal: u8,
}

impl CoordinateFormat {
    /// Total digits of a full-width value on one axis.
    pub fn digits(&self, is_x: bool) -> usize {
        if is_x {
            self.x_integer as usize + self.x_decimal as usize
        } else {
            self.y_integer as usize + self.y_decimal as usize
        }
    }

    /// Restore the zeros a trailing-omission file dropped from `digits`.
    pub fn pad<'d>(&self, digits: &'d str, is_x: bool) -> std::borrow::Cow<'d, str> {
        let width = self.digits(is_x);
        if self.zeros == ZeroOmission::Leading || digits.is_empty() || digits.len() >= width {
            return digits.into();
        }
        format!("{digits:0<width$}").into()
    }
}

/// Converts raw Gerber integer coordinates to millimeters.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateConverter {
    pub format: CoordinateFormat,
    pub units: Units,
}

impl CoordinateConverter {
    /// Convert a raw Gerber coordinate integer to mm.
    ///
    /// The last N digits of the raw value are the decimal part. With X24
    /// format, 1234567 means 123.4567 in the file's units.
    pub fn to_mm(&self, raw: i64, is_x: bool) -> f64 {
        let decimal_digits = if is_x {
            self.format.x_decimal
        } else {
            self.format.y_decimal
        };
        let divisor = 10f64.powi(decimal_digits as i32);
        raw as f64 / divisor * self.units.scale()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn format(integer: u8, decimal: u8) -> CoordinateFormat {
        CoordinateFormat {
            zeros: ZeroOmission::Leading,
            notation: Notation::Absolute,
            x_integer: integer,
            x_decimal: decimal,
            y_integer: integer,
            y_decimal: decimal,
        }
    }

    #[test]
    fn test_format_mm() {
        let conv = CoordinateConverter {
            format: format(2, 4),
            units: Units::Millimeters,
        };
        assert_abs_diff_eq!(conv.to_mm(10000, true), 1.0);
        assert_abs_diff_eq!(conv.to_mm(-25000, false), -2.5);
        assert_abs_diff_eq!(conv.to_mm(0, true), 0.0);
    }

    #[test]
    fn test_inches_to_mm() {
        let conv = CoordinateConverter {
            format: format(2, 5),
            units: Units::Inches,
        };
        // raw 100000 = 1.00000 inches = 25.4 mm
        assert_abs_diff_eq!(conv.to_mm(100000, true), 25.4, epsilon = 1e-9);
    }

    #[test]
    fn test_axes_use_their_own_digits() {
        let conv = CoordinateConverter {
            format: CoordinateFormat {
                x_integer: 3,
                x_decimal: 5,
                y_integer: 2,
                y_decimal: 0,
                ..format(0, 0)
            },
            units: Units::Millimeters,
        };
        assert_abs_diff_eq!(conv.to_mm(1234567, true), 12.34567, epsilon = 1e-9);
        assert_abs_diff_eq!(conv.to_mm(10, false), 10.0);
    }

    #[test]
    fn test_trailing_zero_padding() {
        let mut fmt = format(2, 4);
        assert_eq!(fmt.pad("15", true), "15");
        fmt.zeros = ZeroOmission::Trailing;
        assert_eq!(fmt.pad("15", true), "150000");
        assert_eq!(fmt.pad("123456", false), "123456");
        assert_eq!(fmt.pad("", false), "");
        fmt.y_integer = 3;
        assert_eq!(fmt.pad("1", false), "1000000");
    }
}
