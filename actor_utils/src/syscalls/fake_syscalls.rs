use std::{cell::RefCell, collections::HashMap};

use cid::Cid;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::{
    address::{Address, Payload},
    econ::TokenAmount,
    error::{ErrorNumber, ExitCode},
    ActorID, MethodNum,
};

use super::{NoStateError, Syscalls};
use crate::event::{ActorEvent, StampedEvent};
use crate::messaging::Response;

/// An in-memory execution environment for running actors natively
#[derive(Clone, Default, Debug)]
pub struct FakeSyscalls {
    /// The root of the calling actor
    pub root: RefCell<Option<Cid>>,
    /// The f0 ID of the calling actor
    pub actor_id: ActorID,
    /// The f0 ID of the caller of the current message
    pub caller: RefCell<ActorID>,

    /// A map of addresses that were instantiated in this runtime
    pub addresses: RefCell<HashMap<Address, ActorID>>,
    /// The next-to-allocate f0 address
    pub next_actor_id: RefCell<ActorID>,

    /// Flag to control message success
    pub abort_next_send: RefCell<bool>,
    /// Flag to make the next state root update fail
    pub abort_next_set_root: RefCell<bool>,

    /// Every event emitted so far, in emission order
    pub events: RefCell<Vec<StampedEvent>>,
}

impl FakeSyscalls {
    /// Creates syscalls for the actor at `actor_id`, allocating accounts from `first_account_id`
    pub fn new(actor_id: ActorID, first_account_id: ActorID) -> Self {
        Self {
            actor_id,
            caller: RefCell::new(actor_id),
            next_actor_id: RefCell::new(first_account_id),
            ..Default::default()
        }
    }

    /// Sets the caller for subsequent messages
    pub fn set_caller(&self, caller: ActorID) {
        self.caller.replace(caller);
    }

    /// Drains the recorded event log
    pub fn take_events(&self) -> Vec<StampedEvent> {
        self.events.take()
    }
}

impl Syscalls for FakeSyscalls {
    fn root(&self) -> Result<Cid, NoStateError> {
        self.root.borrow().ok_or(NoStateError)
    }

    fn set_root(&self, cid: &Cid) -> Result<(), NoStateError> {
        if self.abort_next_set_root.replace(false) {
            return Err(NoStateError);
        }
        self.root.replace(Some(*cid));
        Ok(())
    }

    fn receiver(&self) -> ActorID {
        self.actor_id
    }

    fn caller(&self) -> ActorID {
        *self.caller.borrow()
    }

    fn send(
        &self,
        to: &Address,
        _method: MethodNum,
        params: Option<IpldBlock>,
        _value: TokenAmount,
    ) -> Result<Response, ErrorNumber> {
        if self.abort_next_send.replace(false) {
            return Err(ErrorNumber::AssertionFailed);
        }

        match to.payload() {
            // sending to a public key instantiates an account there
            Payload::Secp256k1(_) | Payload::BLS(_) => {
                let mut map = self.addresses.borrow_mut();
                if !map.contains_key(to) {
                    let actor_id = self.next_actor_id.replace_with(|old| *old + 1);
                    map.insert(*to, actor_id);
                }
            }
            // ID and actor addresses are assumed to exist already
            _ => {}
        }

        // echo the params back as return data
        Ok(Response { exit_code: ExitCode::OK, return_data: params })
    }

    fn resolve_address(&self, addr: &Address) -> Option<ActorID> {
        // if it is already an ID-address, just return it
        if let Payload::ID(id) = addr.payload() {
            return Some(*id);
        }

        self.addresses.borrow().get(addr).copied()
    }

    fn emit_event(&self, event: &ActorEvent) -> Result<(), ErrorNumber> {
        let stamped = StampedEvent { emitter: self.actor_id, event: event.clone() };
        self.events.borrow_mut().push(stamped);
        Ok(())
    }
}
