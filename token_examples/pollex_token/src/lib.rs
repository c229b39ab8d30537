use actor_utils::messaging::MessagingError;
use actor_utils::syscalls::{NoStateError, Syscalls};
use actor_utils::util::ActorRuntime;
use erc20_token::token::types::ERC20Token;
use erc20_token::token::TokenError;
use frc42_dispatch::match_method;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::error::ExitCode;
use fvm_shared::MethodNum;
use serde::{de::DeserializeOwned, ser::Serialize};
use thiserror::Error;

mod token;

pub use token::{PollexState, PollexToken, TokenConfig};

/// Errors that can occur during the execution of this actor
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Error from the underlying token library
    #[error("error in token: {0}")]
    Token(#[from] TokenError),
    /// Error from serialising data to RawBytes
    #[error("ipld encoding error: {0}")]
    Encoding(#[from] fvm_ipld_encoding::Error),
    #[error("actor state not found {0}")]
    NoState(#[from] NoStateError),
    // deserialisation error when loading state
    #[error("error loading state {0}")]
    Deserialization(String),
    // serialisation error when saving state
    #[error("error saving state {0}")]
    Serialization(String),
    #[error("actor messaging error {0}")]
    Messaging(#[from] MessagingError),
    #[error("invalid token configuration: {0}")]
    InvalidConfig(&'static str),
    #[error("token has already been constructed")]
    AlreadyConstructed,
    #[error("missing parameters")]
    MissingParams,
    #[error("unknown method number {0}")]
    UnknownMethod(MethodNum),
}

impl From<&RuntimeError> for ExitCode {
    fn from(error: &RuntimeError) -> Self {
        match error {
            RuntimeError::Token(e) => e.into(),
            RuntimeError::Encoding(_) => ExitCode::USR_SERIALIZATION,
            RuntimeError::NoState(_) => ExitCode::USR_NOT_FOUND,
            RuntimeError::Deserialization(_) | RuntimeError::Serialization(_) => {
                ExitCode::USR_SERIALIZATION
            }
            RuntimeError::Messaging(e) => e.into(),
            RuntimeError::InvalidConfig(_) | RuntimeError::MissingParams => {
                ExitCode::USR_ILLEGAL_ARGUMENT
            }
            RuntimeError::AlreadyConstructed => ExitCode::USR_FORBIDDEN,
            RuntimeError::UnknownMethod(_) => ExitCode::USR_UNHANDLED_MESSAGE,
        }
    }
}

pub fn deserialize_params<O: DeserializeOwned>(
    params: Option<IpldBlock>,
) -> Result<O, RuntimeError> {
    let params = params.ok_or(RuntimeError::MissingParams)?;
    Ok(params.deserialize()?)
}

pub fn return_ipld<T>(value: &T) -> Result<Option<IpldBlock>, RuntimeError>
where
    T: Serialize + ?Sized,
{
    Ok(IpldBlock::serialize_cbor(value)?)
}

/// Entry point of the actor
///
/// Dispatches on FRC-0042 method numbers. Methods that mutate the ledger commit the new state root
/// before returning, so a failed call leaves the root untouched.
pub fn invoke<S: Syscalls, BS: Blockstore>(
    runtime: ActorRuntime<S, BS>,
    method_num: MethodNum,
    params: Option<IpldBlock>,
) -> Result<Option<IpldBlock>, RuntimeError> {
    tracing::debug!(method_num, caller = runtime.caller(), "invoked");

    let res = match_method!(method_num, {
        "Constructor" => {
            let config: TokenConfig = deserialize_params(params)?;
            PollexToken::construct(runtime, config)?;
            Ok(None)
        },
        _ => {
            let mut token_actor = PollexToken::load(runtime)?;
            token_invoke(method_num, params, &mut token_actor)
        },
    });

    if let Err(e) = &res {
        tracing::debug!(method_num, exit_code = ExitCode::from(e).value(), error = %e, "aborted");
    }
    res
}

fn token_invoke<S: Syscalls, BS: Blockstore>(
    method_num: MethodNum,
    params: Option<IpldBlock>,
    token: &mut PollexToken<S, BS>,
) -> Result<Option<IpldBlock>, RuntimeError> {
    match_method!(method_num, {
        "Name" => {
            return_ipld(&token.name())
        },
        "Symbol" => {
            return_ipld(&token.symbol())
        },
        "Decimals" => {
            return_ipld(&token.decimals())
        },
        "TotalSupply" => {
            return_ipld(&token.total_supply())
        },
        "BalanceOf" => {
            let params = deserialize_params(params)?;
            let res = token.balance_of(params)?;
            return_ipld(&res)
        },
        "Allowance" => {
            let params = deserialize_params(params)?;
            let res = token.allowance(params)?;
            return_ipld(&res)
        },
        "Transfer" => {
            let params = deserialize_params(params)?;
            let res = token.transfer(params)?;
            token.commit()?;
            return_ipld(&res)
        },
        "Approve" => {
            let params = deserialize_params(params)?;
            let res = token.approve(params)?;
            token.commit()?;
            return_ipld(&res)
        },
        "TransferFrom" => {
            let params = deserialize_params(params)?;
            let res = token.transfer_from(params)?;
            token.commit()?;
            return_ipld(&res)
        },
        _ => {
            Err(RuntimeError::UnknownMethod(method_num))
        },
    })
}
