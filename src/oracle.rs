//! External spot price sources.

use std::future::Future;

use alloy::primitives::Address;
use fastnum::{UD256, decimal::Context};
use serde::Deserialize;

use crate::error::OracleError;

/// Source of external spot price of a token, denominated in the quote asset.
pub trait PriceOracle: Send + Sync {
    /// Returns the current spot price of the token, `None` if the token is
    /// not listed.
    fn spot_price(
        &self,
        token: Address,
    ) -> impl Future<Output = Result<Option<UD256>, OracleError>> + Send;
}

/// Optional oracle, absent one never knows the price.
impl<O: PriceOracle> PriceOracle for Option<O> {
    async fn spot_price(&self, token: Address) -> Result<Option<UD256>, OracleError> {
        match self {
            Some(oracle) => oracle.spot_price(token).await,
            None => Ok(None),
        }
    }
}

/// HTTP oracle for DEX aggregator style APIs.
///
/// `GET {base_url}/{token}` is expected to respond with
/// `{"pairs": [{"priceUsd": "0.30", ...}, ...]}`, the first pair wins.
#[derive(Clone, Debug)]
pub struct HttpPriceOracle {
    client: reqwest::Client,
    base_url: String,
}

impl HttpPriceOracle {
    pub fn new(client: reqwest::Client, base_url: &url::Url) -> Self {
        Self {
            client,
            base_url: base_url.as_str().trim_end_matches('/').to_string(),
        }
    }

    fn token_url(&self, token: Address) -> String {
        format!("{}/{}", self.base_url, token)
    }
}

impl PriceOracle for HttpPriceOracle {
    async fn spot_price(&self, token: Address) -> Result<Option<UD256>, OracleError> {
        let response = self.client.get(self.token_url(token)).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OracleError::Status(status.as_u16()));
        }
        response.json::<PairsResponse>().await?.spot_price()
    }
}

#[derive(Debug, Deserialize)]
struct PairsResponse {
    #[serde(default)]
    pairs: Option<Vec<Pair>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Pair {
    #[serde(default)]
    price_usd: Option<String>,
}

impl PairsResponse {
    fn spot_price(&self) -> Result<Option<UD256>, OracleError> {
        let Some(price) = self
            .pairs
            .as_ref()
            .and_then(|pairs| pairs.first())
            .and_then(|pair| pair.price_usd.as_deref())
        else {
            return Ok(None);
        };
        UD256::from_str(price, Context::default())
            .map(Some)
            .map_err(|e| OracleError::Parse(format!("price {price:?}: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use alloy::primitives::address;
    use fastnum::udec256;

    use super::*;

    fn parse(body: &str) -> Result<Option<UD256>, OracleError> {
        serde_json::from_str::<PairsResponse>(body)
            .map_err(|e| OracleError::Parse(e.to_string()))?
            .spot_price()
    }

    #[test]
    fn test_first_pair_price_is_used() {
        let body = r#"{"schemaVersion":"1.0.0","pairs":[
            {"chainId":"polygon","priceNative":"0.5","priceUsd":"0.30"},
            {"chainId":"polygon","priceUsd":"0.31"}
        ]}"#;
        assert_eq!(parse(body).unwrap(), Some(udec256!(0.30)));
    }

    #[test]
    fn test_missing_pairs_yield_no_price() {
        assert_eq!(parse(r#"{"pairs":null}"#).unwrap(), None);
        assert_eq!(parse(r#"{"pairs":[]}"#).unwrap(), None);
        assert_eq!(parse(r#"{}"#).unwrap(), None);
        assert_eq!(parse(r#"{"pairs":[{"priceNative":"1"}]}"#).unwrap(), None);
    }

    #[test]
    fn test_malformed_price_is_an_error() {
        assert!(matches!(
            parse(r#"{"pairs":[{"priceUsd":"n/a"}]}"#),
            Err(OracleError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn test_absent_oracle_has_no_price() {
        let oracle: Option<HttpPriceOracle> = None;
        let token = address!("0x1111111111111111111111111111111111111111");
        assert_eq!(oracle.spot_price(token).await.unwrap(), None);
    }

    #[test]
    fn test_token_url() {
        let oracle = HttpPriceOracle::new(
            reqwest::Client::new(),
            &"https://api.dexscreener.com/latest/dex/tokens/".parse().unwrap(),
        );
        assert_eq!(
            oracle.token_url(address!("0x1111111111111111111111111111111111111111")),
            "https://api.dexscreener.com/latest/dex/tokens/0x1111111111111111111111111111111111111111"
        );
    }
}
