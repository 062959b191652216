#[allow(clippy::too_many_arguments)]
pub mod exchange {
    alloy::sol!(
        /// Trade events emitted by the spot exchange contract.
        ///
        /// Quote amounts (`usdtIn`/`usdtOut`) are in quote token units,
        /// base amounts (`tokenOut`/`tokenIn`) in traded token units and
        /// `price` is the contract-reported quote-per-base price.
        #[derive(Debug)]
        interface Exchange {
            event Bought(
                uint256 tdate,
                address indexed user,
                address indexed token,
                uint256 usdtIn,
                uint256 tokenOut,
                uint256 price
            );

            event Sold(
                uint256 tdate,
                address indexed user,
                address indexed token,
                uint256 tokenIn,
                uint256 usdtOut,
                uint256 price
            );
        }
    );
}
