//! Formatting helpers for CLI output
//!
//! Brazilian locale conventions: `.` for thousands, `,` for decimals.

use rust_decimal::Decimal;

/// Format as Brazilian Real: "R$ 1.234,56"
pub fn format_currency(value: Decimal) -> String {
    format!("R$ {}", format_decimal_br(value))
}

/// Format number only: "1.234,56"
pub fn format_decimal_br(value: Decimal) -> String {
    let sign = if value < Decimal::ZERO { "-" } else { "" };
    let rounded = format!("{:.2}", value.abs());
    let (integer, decimals) = rounded.split_once('.').unwrap_or((&rounded, "00"));

    let mut grouped = String::new();
    for (i, c) in integer.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            grouped.push('.');
        }
        grouped.push(c);
    }
    let grouped: String = grouped.chars().rev().collect();

    format!("{}{},{}", sign, grouped, decimals)
}

/// Format a quantity, dropping a trailing ",00" for whole numbers
pub fn format_qty(value: Decimal) -> String {
    if value.fract().is_zero() {
        let whole = format_decimal_br(value);
        whole.trim_end_matches("00").trim_end_matches(',').to_string()
    } else {
        value.normalize().to_string().replace('.', ",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_format_currency() {
        assert_eq!(format_currency(dec!(1234.56)), "R$ 1.234,56");
        assert_eq!(format_currency(dec!(0)), "R$ 0,00");
        assert_eq!(format_currency(dec!(1000000)), "R$ 1.000.000,00");
        assert_eq!(format_currency(dec!(-500)), "R$ -500,00");
    }

    #[test]
    fn test_format_decimal_br() {
        assert_eq!(format_decimal_br(dec!(0.99)), "0,99");
        assert_eq!(format_decimal_br(dec!(12345.6)), "12.345,60");
        assert_eq!(format_decimal_br(dec!(-1234.56)), "-1.234,56");
    }

    #[test]
    fn test_format_qty() {
        assert_eq!(format_qty(dec!(100)), "100");
        assert_eq!(format_qty(dec!(1500)), "1.500");
        assert_eq!(format_qty(dec!(3.8)), "3,8");
    }
}
