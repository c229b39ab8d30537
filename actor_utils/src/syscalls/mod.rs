use cid::Cid;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::{address::Address, econ::TokenAmount, error::ErrorNumber, ActorID, MethodNum};
use thiserror::Error;

use crate::event::ActorEvent;
use crate::messaging::Response;

pub mod fake_syscalls;
pub mod staged_syscalls;

#[derive(Copy, Clone, Debug, Error)]
#[error("actor does not exist in state-tree")]
pub struct NoStateError;

/// The Syscalls trait defines methods available to the actor from its execution environment.
pub trait Syscalls {
    /// Get the IPLD root CID. Fails if the actor doesn't have state (before the first call to
    /// `set_root` and after actor deletion).
    fn root(&self) -> Result<Cid, NoStateError>;

    /// Set the IPLD root CID of the actor's state
    fn set_root(&self, cid: &Cid) -> Result<(), NoStateError>;

    /// Returns the ID address of the actor
    fn receiver(&self) -> ActorID;

    /// Returns the ID address of the caller of the current message
    fn caller(&self) -> ActorID;

    /// Sends a message to an actor
    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> Result<Response, ErrorNumber>;

    /// Resolves the ID address of an actor.
    ///
    /// Returns None if the address cannot be resolved. Successfully resolving an address doesn't
    /// necessarily mean the actor exists (e.g., if the addresss was already an actor ID).
    fn resolve_address(&self, addr: &Address) -> Option<ActorID>;

    /// Appends an event to the log of the current message
    fn emit_event(&self, event: &ActorEvent) -> Result<(), ErrorNumber>;
}

impl<S: Syscalls + ?Sized> Syscalls for &S {
    fn root(&self) -> Result<Cid, NoStateError> {
        (**self).root()
    }

    fn set_root(&self, cid: &Cid) -> Result<(), NoStateError> {
        (**self).set_root(cid)
    }

    fn receiver(&self) -> ActorID {
        (**self).receiver()
    }

    fn caller(&self) -> ActorID {
        (**self).caller()
    }

    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> Result<Response, ErrorNumber> {
        (**self).send(to, method, params, value)
    }

    fn resolve_address(&self, addr: &Address) -> Option<ActorID> {
        (**self).resolve_address(addr)
    }

    fn emit_event(&self, event: &ActorEvent) -> Result<(), ErrorNumber> {
        (**self).emit_event(event)
    }
}
