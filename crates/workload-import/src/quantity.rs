//! Parsing of Kubernetes resource quantities such as `500m`, `1.5Gi` or `2e3`.
//!
//! Only the conversions needed for component records are provided: CPU in millicores and memory
//! in mebibytes. See the [Kubernetes serialization format][k8s-serialization-format] for the
//! grammar.
//!
//! [k8s-serialization-format]: https://github.com/kubernetes/apimachinery/blob/8c60292e48e46c4faa1e92acb232ce6adb37512c/pkg/api/resource/quantity.go#L37-L59
use std::{num::ParseFloatError, str::FromStr};

use k8s_openapi::apimachinery::pkg::api::resource::Quantity as K8sQuantity;
use snafu::{ResultExt as _, Snafu, ensure};

#[derive(Debug, PartialEq, Snafu)]
pub enum ParseQuantityError {
    #[snafu(display("input is either empty or contains non-ascii characters"))]
    InvalidFormat,

    #[snafu(display("failed to parse floating point number"))]
    InvalidFloat { source: ParseFloatError },

    #[snafu(display("failed to parse {input:?} as quantity suffix"))]
    InvalidSuffix { input: String },
}

/// Multiples based on powers of 2 (`Ki` up to `Ei`).
#[derive(Clone, Copy, Debug, PartialEq, strum::Display, strum::EnumString)]
pub enum BinaryMultiple {
    #[strum(serialize = "Ki")]
    Kibi,

    #[strum(serialize = "Mi")]
    Mebi,

    #[strum(serialize = "Gi")]
    Gibi,

    #[strum(serialize = "Ti")]
    Tebi,

    #[strum(serialize = "Pi")]
    Pebi,

    #[strum(serialize = "Ei")]
    Exbi,
}

impl BinaryMultiple {
    pub fn factor(self) -> f64 {
        match self {
            Self::Kibi => 2f64.powi(10),
            Self::Mebi => 2f64.powi(20),
            Self::Gibi => 2f64.powi(30),
            Self::Tebi => 2f64.powi(40),
            Self::Pebi => 2f64.powi(50),
            Self::Exbi => 2f64.powi(60),
        }
    }
}

/// Multiples based on powers of 10 (`n` up to `E`).
///
/// Kubernetes uses `k` for kilo, but `M` for mega.
#[derive(Clone, Copy, Debug, PartialEq, strum::Display, strum::EnumString)]
pub enum DecimalMultiple {
    #[strum(serialize = "n")]
    Nano,

    #[strum(serialize = "u")]
    Micro,

    #[strum(serialize = "m")]
    Milli,

    #[strum(serialize = "")]
    Empty,

    #[strum(serialize = "k")]
    Kilo,

    #[strum(serialize = "M")]
    Mega,

    #[strum(serialize = "G")]
    Giga,

    #[strum(serialize = "T")]
    Tera,

    #[strum(serialize = "P")]
    Peta,

    #[strum(serialize = "E")]
    Exa,
}

impl DecimalMultiple {
    pub fn factor(self) -> f64 {
        match self {
            Self::Nano => 10f64.powi(-9),
            Self::Micro => 10f64.powi(-6),
            Self::Milli => 10f64.powi(-3),
            Self::Empty => 1.0,
            Self::Kilo => 10f64.powi(3),
            Self::Mega => 10f64.powi(6),
            Self::Giga => 10f64.powi(9),
            Self::Tera => 10f64.powi(12),
            Self::Peta => 10f64.powi(15),
            Self::Exa => 10f64.powi(18),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Suffix {
    Binary(BinaryMultiple),
    Decimal(DecimalMultiple),
    Exponent(f64),
}

impl FromStr for Suffix {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        if let Ok(binary) = BinaryMultiple::from_str(input) {
            return Ok(Self::Binary(binary));
        }

        if let Ok(decimal) = DecimalMultiple::from_str(input) {
            return Ok(Self::Decimal(decimal));
        }

        if let Some(exponent) = input.strip_prefix(['e', 'E'])
            && let Ok(exponent) = f64::from_str(exponent)
        {
            return Ok(Self::Exponent(exponent));
        }

        InvalidSuffixSnafu { input }.fail()
    }
}

impl Suffix {
    pub fn factor(self) -> f64 {
        match self {
            Self::Binary(binary) => binary.factor(),
            Self::Decimal(decimal) => decimal.factor(),
            Self::Exponent(exponent) => 10f64.powf(exponent),
        }
    }
}

/// A parsed quantity, kept as a base-unit floating point value.
///
/// Arbitrary precision is not needed for the limits found on pod templates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quantity {
    value: f64,
    suffix: Suffix,
}

impl FromStr for Quantity {
    type Err = ParseQuantityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let input = input.trim();
        ensure!(!input.is_empty() && input.is_ascii(), InvalidFormatSnafu);

        let suffix_index = input
            .char_indices()
            .find(|&(index, c)| {
                !(c == '.' || c.is_ascii_digit() || (index == 0 && matches!(c, '+' | '-')))
            })
            .map_or(input.len(), |(index, _)| index);
        let (value, suffix) = input.split_at(suffix_index);

        Ok(Self {
            value: f64::from_str(value).context(InvalidFloatSnafu)?,
            suffix: Suffix::from_str(suffix)?,
        })
    }
}

impl TryFrom<&K8sQuantity> for Quantity {
    type Error = ParseQuantityError;

    fn try_from(value: &K8sQuantity) -> Result<Self, Self::Error> {
        Self::from_str(&value.0)
    }
}

impl Quantity {
    /// The value in base units, e.g. cores or bytes.
    pub fn base_value(&self) -> f64 {
        self.value * self.suffix.factor()
    }
}

/// Converts a CPU quantity into millicores, rounding up.
pub fn cpu_millis(quantity: &K8sQuantity) -> Result<i64, ParseQuantityError> {
    let quantity = Quantity::try_from(quantity)?;
    Ok((quantity.base_value() * 1000.0).ceil() as i64)
}

/// Converts a memory quantity into mebibytes, rounding down.
pub fn memory_mebibytes(quantity: &K8sQuantity) -> Result<i64, ParseQuantityError> {
    let quantity = Quantity::try_from(quantity)?;
    Ok((quantity.base_value() / BinaryMultiple::Mebi.factor()).floor() as i64)
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case("500m", 500)]
    #[case("1", 1000)]
    #[case("0.25", 250)]
    #[case("2", 2000)]
    #[case("100n", 1)]
    #[case("2e3", 2_000_000)]
    fn parse_cpu_millis(#[case] input: &str, #[case] expected: i64) {
        assert_eq!(cpu_millis(&K8sQuantity(input.to_owned())).unwrap(), expected);
    }

    #[rstest]
    #[case("512Mi", 512)]
    #[case("1Gi", 1024)]
    #[case("1.5Gi", 1536)]
    #[case("1G", 953)]
    #[case("134217728", 128)]
    #[case("0", 0)]
    fn parse_memory_mebibytes(#[case] input: &str, #[case] expected: i64) {
        assert_eq!(
            memory_mebibytes(&K8sQuantity(input.to_owned())).unwrap(),
            expected
        );
    }

    #[rstest]
    #[case("")]
    #[case("1Zi")]
    #[case("abc")]
    #[case("1.2.3Mi")]
    fn reject_invalid_quantity(#[case] input: &str) {
        assert!(Quantity::from_str(input).is_err());
    }
}
