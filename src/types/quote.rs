use fastnum::UD256;

/// Origin of the display price.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PriceSource {
    /// External market data oracle.
    External,
    /// Price reported by the exchange contract in the trade event.
    OnChain,
    /// Quote amount divided by base amount, or zero if not computable.
    Computed,
}

/// Display price of the traded token, produced per notification.
#[derive(Clone, Copy, derive_more::Debug, PartialEq)]
pub struct PriceQuote {
    #[debug("{value}")]
    pub value: UD256,
    pub source: PriceSource,
}

impl PriceQuote {
    pub fn new(value: UD256, source: PriceSource) -> Self {
        Self { value, source }
    }

    /// Degenerate quote, market price is unknown.
    pub fn unknown() -> Self {
        Self::new(UD256::ZERO, PriceSource::Computed)
    }

    pub fn is_known(&self) -> bool {
        !self.value.is_zero()
    }
}
