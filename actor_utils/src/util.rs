use cid::Cid;
use fvm_ipld_blockstore::Blockstore;
use fvm_ipld_blockstore::MemoryBlockstore;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::{address::Address, econ::TokenAmount, ActorID, MethodNum, METHOD_SEND};
use num_traits::Zero;

use crate::event::ActorEvent;
use crate::messaging::{MessagingError, Response, Result as MessagingResult};
use crate::syscalls::{fake_syscalls::FakeSyscalls, NoStateError, Syscalls};

/// ActorRuntime provides access to system resources via Syscalls and the Blockstore
///
/// It provides higher level utilities than raw syscalls for actors to use to interact with the
/// execution environment
#[derive(Clone, Debug)]
pub struct ActorRuntime<S: Syscalls, BS: Blockstore> {
    pub syscalls: S,
    pub blockstore: BS,
}

impl ActorRuntime<FakeSyscalls, MemoryBlockstore> {
    pub fn new_test_runtime() -> Self {
        ActorRuntime { syscalls: FakeSyscalls::default(), blockstore: MemoryBlockstore::default() }
    }
}

impl<S: Syscalls, BS: Blockstore> ActorRuntime<S, BS> {
    pub fn new(syscalls: S, blockstore: BS) -> Self {
        Self { syscalls, blockstore }
    }

    /// A runtime borrowing the syscalls and blockstore of this one
    pub fn borrowed(&self) -> ActorRuntime<&S, &BS> {
        ActorRuntime { syscalls: &self.syscalls, blockstore: &self.blockstore }
    }

    /// Returns the address of the current actor as an ActorID
    pub fn actor_id(&self) -> ActorID {
        self.syscalls.receiver()
    }

    /// Returns the ActorID of the caller of the current message
    pub fn caller(&self) -> ActorID {
        self.syscalls.caller()
    }

    /// Returns the caller of the current message as an ID address
    pub fn caller_address(&self) -> Address {
        Address::new_id(self.caller())
    }

    /// Sends a message to an actor
    pub fn send(
        &self,
        to: &Address,
        method: MethodNum,
        params: Option<IpldBlock>,
        value: TokenAmount,
    ) -> MessagingResult<Response> {
        Ok(self.syscalls.send(to, method, params, value)?)
    }

    /// Attempts to resolve the given address to its ID address form
    ///
    /// Returns MessagingError::AddressNotResolved if the address could not be resolved
    pub fn resolve_id(&self, address: &Address) -> MessagingResult<ActorID> {
        self.syscalls.resolve_address(address).ok_or(MessagingError::AddressNotResolved(*address))
    }

    /// Resolves an address to an ID address, sending a message to initialize an account there if
    /// it doesn't exist
    ///
    /// If the account cannot be created, this function returns MessagingError::AddressNotInitialized
    pub fn resolve_or_init(&self, address: &Address) -> MessagingResult<ActorID> {
        let id = match self.resolve_id(address) {
            Ok(addr) => addr,
            Err(MessagingError::AddressNotResolved(_e)) => self.initialize_account(address)?,
            Err(e) => return Err(e),
        };
        Ok(id)
    }

    pub fn initialize_account(&self, address: &Address) -> MessagingResult<ActorID> {
        self.send(address, METHOD_SEND, None, TokenAmount::zero())?;
        match self.resolve_id(address) {
            Ok(id) => {
                tracing::trace!(%address, id, "initialized account");
                Ok(id)
            }
            Err(MessagingError::AddressNotResolved(e)) => {
                // if we can't resolve after the send, then the account was not initialized
                Err(MessagingError::AddressNotInitialized(e))
            }
            Err(e) => Err(e),
        }
    }

    /// Get the root cid of the actor's state
    pub fn root_cid(&self) -> Result<Cid, NoStateError> {
        self.syscalls.root()
    }

    /// Set the root cid of the actor's state
    pub fn set_root(&self, cid: &Cid) -> Result<(), NoStateError> {
        self.syscalls.set_root(cid)
    }

    /// Emits an event on behalf of the current actor
    pub fn emit_event(&self, event: &ActorEvent) -> MessagingResult<()> {
        Ok(self.syscalls.emit_event(event)?)
    }

    pub fn bs(&self) -> &BS {
        &self.blockstore
    }
}

/// Convenience impl encapsulating the blockstore functionality
impl<S: Syscalls, BS: Blockstore> Blockstore for ActorRuntime<S, BS> {
    fn get(&self, k: &Cid) -> anyhow::Result<Option<Vec<u8>>> {
        self.blockstore.get(k)
    }

    fn put_keyed(&self, k: &Cid, block: &[u8]) -> anyhow::Result<()> {
        self.blockstore.put_keyed(k, block)
    }
}

#[cfg(test)]
mod test {
    use fvm_shared::address::Address;

    use super::ActorRuntime;
    use crate::messaging::MessagingError;
    use crate::syscalls::fake_syscalls::FakeSyscalls;

    fn secp_address() -> Address {
        Address::new_secp256k1(&[0; 65]).unwrap()
    }

    #[test]
    fn it_resolves_or_initializes_accounts() {
        let runtime = ActorRuntime::new_test_runtime();
        let addr = secp_address();

        match runtime.resolve_id(&addr) {
            Err(MessagingError::AddressNotResolved(a)) => assert_eq!(a, addr),
            other => panic!("expected an unresolved address, got {other:?}"),
        }

        let id = runtime.resolve_or_init(&addr).unwrap();
        assert_eq!(runtime.resolve_id(&addr).unwrap(), id);
        // resolving again doesn't allocate a new id
        assert_eq!(runtime.resolve_or_init(&addr).unwrap(), id);
    }

    #[test]
    fn it_reports_failed_initialization() {
        let runtime = ActorRuntime::new_test_runtime();
        runtime.syscalls.abort_next_send.replace(true);

        let err = runtime.resolve_or_init(&secp_address()).unwrap_err();
        assert!(matches!(err, MessagingError::Syscall(_)));
    }

    #[test]
    fn it_borrows_the_same_environment() {
        let runtime = ActorRuntime::new(FakeSyscalls::new(1, 100), fvm_ipld_blockstore::MemoryBlockstore::default());
        runtime.syscalls.set_caller(55);

        let borrowed = runtime.borrowed();
        assert_eq!(borrowed.caller(), 55);
        assert_eq!(borrowed.caller_address(), Address::new_id(55));

        // accounts initialised through the borrow are visible to the owner
        let id = borrowed.resolve_or_init(&secp_address()).unwrap();
        assert_eq!(runtime.resolve_id(&secp_address()).unwrap(), id);
    }
}
