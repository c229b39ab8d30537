use std::cell::RefCell;

use cid::Cid;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::{address::Address, econ::TokenAmount, error::ErrorNumber, ActorID, MethodNum};

use super::{NoStateError, Syscalls};
use crate::event::ActorEvent;
use crate::messaging::{Response, Result as MessagingResult};

/// Events held back from the execution environment until the state they describe is committed
#[derive(Clone, Debug, Default)]
pub struct EventStage {
    events: RefCell<Vec<ActorEvent>>,
}

impl EventStage {
    /// Syscalls that stage emitted events here and pass every other call through to `inner`
    pub fn stage<'a, S: Syscalls>(&'a self, inner: &'a S) -> StagedSyscalls<'a, S> {
        StagedSyscalls { inner, stage: self }
    }

    /// Number of events waiting to be released
    pub fn len(&self) -> usize {
        self.events.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.borrow().is_empty()
    }

    /// Emits the staged events through `syscalls` in the order they were staged
    ///
    /// Returns how many were emitted. An event that fails to emit is dropped along with those
    /// staged after it.
    pub fn release<S: Syscalls>(&self, syscalls: &S) -> MessagingResult<usize> {
        let events = self.events.take();
        for event in &events {
            syscalls.emit_event(event)?;
        }
        Ok(events.len())
    }

    /// Drops the staged events without emitting them
    pub fn discard(&self) {
        self.events.borrow_mut().clear();
    }
}

/// A view of some syscalls whose emitted events go to an [`EventStage`]
#[derive(Clone, Copy, Debug)]
pub struct StagedSyscalls<'a, S: Syscalls> {
    inner: &'a S,
    stage: &'a EventStage,
}

impl<S: Syscalls> Syscalls for StagedSyscalls<'_, S> {
    fn root(&self) -> Result<Cid, NoStateError> {
        self.inner.root()
    }

    fn set_root(&self, cid: &Cid) -> Result<(), NoStateError> {
        self.inner.set_root(cid)
    }

    fn receiver(&self) -> ActorID {
        self.inner.receiver()
    }

    fn caller(&self) -> ActorID {
        self.inner.caller()
    }

    fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> Result<Response, ErrorNumber> {
        self.inner.send(to, method, params, value)
    }

    fn resolve_address(&self, addr: &Address) -> Option<ActorID> {
        self.inner.resolve_address(addr)
    }

    fn emit_event(&self, event: &ActorEvent) -> Result<(), ErrorNumber> {
        self.stage.events.borrow_mut().push(event.clone());
        Ok(())
    }
}
