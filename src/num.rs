use alloy::primitives::U256;
use fastnum::{
    UD256, bint,
    decimal::{Context, RoundingMode},
};

/// Fixed-point to decimal converter.
#[derive(Clone, Copy, Debug, Default)]
pub struct Converter {
    decimals: i32,
}

impl Converter {
    pub fn new(decimals: u8) -> Self {
        Self {
            decimals: decimals as i32,
        }
    }

    /// Converts on-chain fixed-point value into decimal,
    /// `U256` always fits into 256-bit decimal mantissa.
    pub fn from_unsigned(&self, value: U256) -> Option<UD256> {
        let unscaled = bint::UInt::<4>::from_le_slice(value.as_le_slice())?;
        Some(UD256::from_parts(
            unscaled,
            -self.decimals,
            Context::default().with_rounding_mode(RoundingMode::Floor),
        ))
    }

    /// Converts decimal back into on-chain fixed-point value,
    /// truncating digits beyond the converter precision.
    pub fn to_unsigned(&self, value: UD256) -> U256 {
        let rescaled = value.rescale(self.decimals as i16);
        U256::from_le_slice(rescaled.digits().to_radix_le(256).as_slice())
    }

    /// Like [`Self::to_unsigned`], `None` if the value does not fit into
    /// `U256` at the converter precision.
    pub fn checked_to_unsigned(&self, value: UD256) -> Option<U256> {
        let max = self.from_unsigned(U256::MAX)?;
        (value <= max).then(|| self.to_unsigned(value))
    }
}

#[cfg(test)]
mod tests {
    use fastnum::udec256;

    use super::*;

    #[test]
    fn test_numeric_converter_from_unsigned() {
        assert_eq!(
            Converter::new(0).from_unsigned(U256::from(1234567890)),
            Some(udec256!(1234567890))
        );
        assert_eq!(
            Converter::new(6).from_unsigned(U256::from(1234567890)),
            Some(udec256!(1234.56789))
        );
        assert_eq!(
            Converter::new(18).from_unsigned(U256::from(1234567890)),
            Some(udec256!(0.00000000123456789))
        );
    }

    #[test]
    fn test_numeric_converter_quote_and_base_precision_differ() {
        // Same raw value, different token precisions
        let raw = U256::from(250_000_000u64);
        assert_eq!(
            Converter::new(6).from_unsigned(raw),
            Some(udec256!(250))
        );
        assert_eq!(
            Converter::new(18).from_unsigned(raw),
            Some(udec256!(0.00000000025))
        );
    }

    #[test]
    fn test_numeric_converter_to_unsigned() {
        assert_eq!(
            Converter::new(0).to_unsigned(udec256!(1234567890)),
            U256::from(1234567890)
        );
        assert_eq!(
            Converter::new(6).to_unsigned(udec256!(1234.56789)),
            U256::from(1234567890)
        );
        assert_eq!(
            Converter::new(18).to_unsigned(udec256!(1000)),
            U256::from(10u64).pow(U256::from(21))
        );
    }

    #[test]
    fn test_numeric_converter_checked_to_unsigned() {
        let max = Converter::new(0).from_unsigned(U256::MAX).unwrap();
        assert_eq!(Converter::new(0).checked_to_unsigned(max), Some(U256::MAX));
        assert_eq!(Converter::new(6).checked_to_unsigned(max), None);
        assert_eq!(
            Converter::new(6).checked_to_unsigned(udec256!(0.25)),
            Some(U256::from(250_000))
        );
    }
}
