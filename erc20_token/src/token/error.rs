use actor_utils::messaging::MessagingError;
use fvm_ipld_encoding::Error as SerializationError;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use thiserror::Error;

use crate::token::state::StateError as TokenStateError;

#[derive(Error, Debug)]
pub enum TokenError {
    #[error("error in underlying state {0}")]
    TokenState(#[from] TokenStateError),
    #[error("value {amount:?} for {name:?} must be non-negative")]
    InvalidNegative { name: &'static str, amount: TokenAmount },
    #[error("token was already initialized with a supply of {supply:?}")]
    AlreadyInitialized { supply: TokenAmount },
    #[error("error calling other actor: {0}")]
    Messaging(#[from] MessagingError),
    #[error("error during serialization {0}")]
    Serialization(#[from] SerializationError),
}

impl From<&TokenError> for ExitCode {
    fn from(error: &TokenError) -> Self {
        match error {
            TokenError::Serialization(_) => ExitCode::USR_SERIALIZATION,
            TokenError::InvalidNegative { name: _, amount: _ } => ExitCode::USR_ILLEGAL_ARGUMENT,
            TokenError::AlreadyInitialized { supply: _ } => ExitCode::USR_ILLEGAL_STATE,
            TokenError::TokenState(state_error) => match state_error {
                TokenStateError::IpldHamt(_) | TokenStateError::Serialization(_) => {
                    ExitCode::USR_SERIALIZATION
                }
                TokenStateError::NegativeAllowance { amount: _, owner: _, spender: _ }
                | TokenStateError::NegativeTotalSupply { supply: _, delta: _ }
                | TokenStateError::MissingState(_) => ExitCode::USR_ILLEGAL_STATE,
                TokenStateError::InsufficientBalance { balance: _, delta: _, owner: _ }
                | TokenStateError::InsufficientAllowance {
                    owner: _,
                    spender: _,
                    allowance: _,
                    delta: _,
                } => ExitCode::USR_INSUFFICIENT_FUNDS,
            },
            TokenError::Messaging(messaging_error) => messaging_error.into(),
        }
    }
}
