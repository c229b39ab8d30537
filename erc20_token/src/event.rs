//! Events emitted by the token ledger
//!
//! Events are recorded by the runtime in the order the operations that produced them ran. Accounts
//! are identified by the ActorID their address resolved to.
use actor_utils::event::ActorEvent;
use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_ipld_encoding::Error as IpldError;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;

pub const TRANSFER_EVENT: &str = "Transfer";
pub const APPROVAL_EVENT: &str = "Approval";

/// Tokens moved between two accounts
///
/// Emitted by transfers, delegated transfers and the initial allocation of supply, where `from` is
/// the token actor itself.
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct Transfer {
    pub from: ActorID,
    pub to: ActorID,
    pub amount: TokenAmount,
}

/// An owner set the allowance of a spender
#[derive(Serialize_tuple, Deserialize_tuple, PartialEq, Eq, Clone, Debug)]
pub struct Approval {
    pub owner: ActorID,
    pub spender: ActorID,
    pub amount: TokenAmount,
}

#[derive(PartialEq, Eq, Clone, Debug)]
pub enum TokenEvent {
    Transfer(Transfer),
    Approval(Approval),
}

impl TokenEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TokenEvent::Transfer(_) => TRANSFER_EVENT,
            TokenEvent::Approval(_) => APPROVAL_EVENT,
        }
    }

    pub fn to_actor_event(&self) -> Result<ActorEvent, IpldError> {
        match self {
            TokenEvent::Transfer(t) => ActorEvent::new(TRANSFER_EVENT, t),
            TokenEvent::Approval(a) => ActorEvent::new(APPROVAL_EVENT, a),
        }
    }

    /// Decodes a token event, returning `Ok(None)` for events of any other name
    pub fn from_actor_event(event: &ActorEvent) -> Result<Option<Self>, IpldError> {
        let decoded = match event.name.as_str() {
            TRANSFER_EVENT => Some(TokenEvent::Transfer(event.decode()?)),
            APPROVAL_EVENT => Some(TokenEvent::Approval(event.decode()?)),
            _ => None,
        };
        Ok(decoded)
    }
}

impl From<Transfer> for TokenEvent {
    fn from(t: Transfer) -> Self {
        TokenEvent::Transfer(t)
    }
}

impl From<Approval> for TokenEvent {
    fn from(a: Approval) -> Self {
        TokenEvent::Approval(a)
    }
}

#[cfg(test)]
mod test {
    use actor_utils::event::ActorEvent;
    use fvm_shared::econ::TokenAmount;

    use super::{Approval, TokenEvent, Transfer, APPROVAL_EVENT, TRANSFER_EVENT};

    #[test]
    fn it_names_events() {
        let transfer: TokenEvent =
            Transfer { from: 1, to: 2, amount: TokenAmount::from_whole(10) }.into();
        let approval: TokenEvent =
            Approval { owner: 1, spender: 2, amount: TokenAmount::from_whole(20) }.into();

        assert_eq!(transfer.name(), TRANSFER_EVENT);
        assert_eq!(transfer.to_actor_event().unwrap().name, TRANSFER_EVENT);
        assert_eq!(approval.name(), APPROVAL_EVENT);

        let decoded = TokenEvent::from_actor_event(&approval.to_actor_event().unwrap()).unwrap();
        assert_eq!(decoded, Some(approval));
    }

    #[test]
    fn it_ignores_foreign_events() {
        let other = ActorEvent::new("Minted", &5u64).unwrap();
        assert_eq!(TokenEvent::from_actor_event(&other).unwrap(), None);

        // a known name with the wrong body is an error
        let bad = ActorEvent::new(TRANSFER_EVENT, &5u64).unwrap();
        TokenEvent::from_actor_event(&bad).unwrap_err();
    }
}
