use erc20_integration::{deploy_fixture, Deployment, NetworkConfig};
use fvm_shared::econ::TokenAmount;

/// Deploys a fresh token, or returns None when the active network isn't a development chain
pub fn setup() -> Option<Deployment> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();

    let config = NetworkConfig::from_env().unwrap();
    if !config.should_run() {
        tracing::info!(network = %config.network, "not a development chain, skipping");
        return None;
    }
    Some(deploy_fixture(&config).unwrap())
}

/// Whole tokens in atto units
#[allow(dead_code)]
pub fn tokens(whole: i64) -> TokenAmount {
    TokenAmount::from_whole(whole)
}
