use std::str::FromStr;

use fvm_shared::address::Address;
use fvm_shared::bigint::BigInt;
use fvm_shared::econ::TokenAmount;
use pollex_token::TokenConfig;
use serde::{Deserialize, Serialize};

use crate::HarnessError;

/// Network settings bundled with the harness
pub const HELPER_CONFIG: &str = include_str!("../config/helper-config.json");

/// Environment variable selecting the active network
pub const NETWORK_ENV: &str = "NETWORK";

/// Token parameters of a deployment
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TokenSettings {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Entire supply in atto units, as a decimal string
    pub initial_supply: String,
}

/// Which network the suites run against and what they deploy there
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NetworkConfig {
    pub network: String,
    /// Networks on which the deployment fixture is available
    pub development_chains: Vec<String>,
    pub token: TokenSettings,
}

impl NetworkConfig {
    pub fn from_json(json: &str) -> Result<Self, HarnessError> {
        Ok(serde_json::from_str(json)?)
    }

    /// The bundled config, with the network overridden by `NETWORK` if set
    pub fn from_env() -> Result<Self, HarnessError> {
        let mut config = Self::from_json(HELPER_CONFIG)?;
        if let Ok(network) = std::env::var(NETWORK_ENV) {
            config.network = network;
        }
        Ok(config)
    }

    /// Whether the active network is a development chain
    pub fn should_run(&self) -> bool {
        self.development_chains.iter().any(|chain| *chain == self.network)
    }

    pub fn initial_supply(&self) -> Result<TokenAmount, HarnessError> {
        let supply = &self.token.initial_supply;
        let atto =
            BigInt::from_str(supply).map_err(|_| HarnessError::InvalidSupply(supply.clone()))?;
        Ok(TokenAmount::from_atto(atto))
    }

    /// Constructor params crediting the whole supply to `holder`
    pub fn token_config(&self, holder: Address) -> Result<TokenConfig, HarnessError> {
        Ok(TokenConfig {
            name: self.token.name.clone(),
            symbol: self.token.symbol.clone(),
            decimals: self.token.decimals,
            initial_supply: self.initial_supply()?,
            initial_holder: holder,
        })
    }
}
