use actor_utils::syscalls::staged_syscalls::{EventStage, StagedSyscalls};
use actor_utils::syscalls::Syscalls;
use actor_utils::util::ActorRuntime;
use cid::multihash::Code;
use cid::Cid;
use erc20_token::token::state::TokenState;
use erc20_token::token::types::{
    AllowanceReturn, ApproveParams, ApproveReturn, BalanceReturn, DecimalsReturn, ERC20Token,
    GetAllowanceParams, TotalSupplyReturn, TransferFromParams, TransferFromReturn, TransferParams,
    TransferReturn,
};
use erc20_token::token::Token;
use fvm_ipld_blockstore::{Block, Blockstore};
use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_ipld_encoding::{CborStore, DAG_CBOR};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;

use crate::RuntimeError;

/// Parameters of the constructor, fixed for the lifetime of the token
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TokenConfig {
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    /// Entire supply in atto units, credited to `initial_holder`
    pub initial_supply: TokenAmount,
    pub initial_holder: Address,
}

impl TokenConfig {
    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.name.is_empty() {
            return Err(RuntimeError::InvalidConfig("name must not be empty"));
        }
        if self.symbol.is_empty() {
            return Err(RuntimeError::InvalidConfig("symbol must not be empty"));
        }
        if self.initial_supply.is_negative() {
            return Err(RuntimeError::InvalidConfig("initial supply must be non-negative"));
        }
        Ok(())
    }
}

/// Actor state, persisted as a single block at the actor's root
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct PollexState {
    /// Balance and allowance ledger
    pub token: TokenState,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
}

impl PollexState {
    pub fn load<BS: Blockstore>(bs: &BS, cid: &Cid) -> Result<Self, RuntimeError> {
        match bs.get_cbor::<Self>(cid) {
            Ok(Some(s)) => Ok(s),
            Ok(None) => Err(RuntimeError::Deserialization(format!("no state found at {cid}"))),
            Err(e) => Err(RuntimeError::Deserialization(e.to_string())),
        }
    }

    pub fn save<BS: Blockstore>(&self, bs: &BS) -> Result<Cid, RuntimeError> {
        let serialized = fvm_ipld_encoding::to_vec(self)
            .map_err(|err| RuntimeError::Serialization(err.to_string()))?;
        let block = Block { codec: DAG_CBOR, data: serialized };
        bs.put(Code::Blake2b256, &block).map_err(|err| RuntimeError::Serialization(err.to_string()))
    }
}

/// The PollexCoin token actor
///
/// Owners of transfers and approvals are always the caller of the current message. Events raised
/// by the ledger are staged and only reach the runtime once `commit` has set the new root.
#[derive(Debug)]
pub struct PollexToken<S: Syscalls, BS: Blockstore> {
    runtime: ActorRuntime<S, BS>,
    state: PollexState,
    events: EventStage,
}

impl<S: Syscalls, BS: Blockstore> PollexToken<S, BS> {
    /// Creates the token and commits it as the actor's state
    ///
    /// The entire initial supply is credited to the configured holder.
    pub fn construct(
        runtime: ActorRuntime<S, BS>,
        config: TokenConfig,
    ) -> Result<Self, RuntimeError> {
        if runtime.root_cid().is_ok() {
            return Err(RuntimeError::AlreadyConstructed);
        }
        config.validate()?;

        let token = Token::<S, BS>::create_state(runtime.bs())?;
        let TokenConfig { name, symbol, decimals, initial_supply, initial_holder } = config;
        let state = PollexState { token, name, symbol, decimals };
        let mut actor = PollexToken { runtime, state, events: EventStage::default() };
        actor.token().initialize(&initial_holder, &initial_supply)?;
        actor.commit()?;

        tracing::debug!(
            name = %actor.state.name,
            symbol = %actor.state.symbol,
            decimals = actor.state.decimals,
            "constructed token"
        );
        Ok(actor)
    }

    /// Loads the actor from its current state root
    pub fn load(runtime: ActorRuntime<S, BS>) -> Result<Self, RuntimeError> {
        let root = runtime.root_cid()?;
        let state = PollexState::load(runtime.bs(), &root)?;
        Ok(Self { runtime, state, events: EventStage::default() })
    }

    pub fn save(&self) -> Result<Cid, RuntimeError> {
        self.state.save(self.runtime.bs())
    }

    /// Saves the state, makes it the actor's new root and then releases the staged events
    ///
    /// If the root can't be updated the staged events are dropped.
    pub fn commit(&self) -> Result<Cid, RuntimeError> {
        let cid = self.save().and_then(|cid| {
            self.runtime.set_root(&cid)?;
            Ok(cid)
        });
        if cid.is_err() {
            self.events.discard();
        }
        let cid = cid?;
        let released = self.events.release(&self.runtime.syscalls)?;
        tracing::trace!(%cid, released, "committed state");
        Ok(cid)
    }

    /// The ledger, with its events staged until the next `commit`
    pub fn token(&mut self) -> Token<'_, StagedSyscalls<'_, S>, &BS> {
        let runtime =
            ActorRuntime::new(self.events.stage(&self.runtime.syscalls), &self.runtime.blockstore);
        Token::wrap(runtime, &mut self.state.token)
    }

    /// Number of events raised since the last `commit`
    pub fn staged_events(&self) -> usize {
        self.events.len()
    }

    pub fn runtime(&self) -> &ActorRuntime<S, BS> {
        &self.runtime
    }

    pub fn state(&self) -> &PollexState {
        &self.state
    }
}

/// Implementation of the token API in an actor
///
/// Here the Ipld parameter structs are marshalled and passed to the underlying library functions
impl<S: Syscalls, BS: Blockstore> ERC20Token for PollexToken<S, BS> {
    type TokenError = RuntimeError;

    fn name(&self) -> String {
        self.state.name.clone()
    }

    fn symbol(&self) -> String {
        self.state.symbol.clone()
    }

    fn decimals(&self) -> DecimalsReturn {
        self.state.decimals
    }

    fn total_supply(&mut self) -> TotalSupplyReturn {
        self.token().total_supply()
    }

    fn balance_of(&mut self, params: Address) -> Result<BalanceReturn, RuntimeError> {
        Ok(self.token().balance_of(&params)?)
    }

    fn allowance(&mut self, params: GetAllowanceParams) -> Result<AllowanceReturn, RuntimeError> {
        Ok(self.token().allowance(&params.owner, &params.spender)?)
    }

    fn transfer(&mut self, params: TransferParams) -> Result<TransferReturn, RuntimeError> {
        let from = self.runtime.caller_address();
        Ok(self.token().transfer(&from, &params.to, &params.amount)?)
    }

    fn approve(&mut self, params: ApproveParams) -> Result<ApproveReturn, RuntimeError> {
        let owner = self.runtime.caller_address();
        Ok(self.token().approve(&owner, &params.spender, &params.amount)?)
    }

    fn transfer_from(
        &mut self,
        params: TransferFromParams,
    ) -> Result<TransferFromReturn, RuntimeError> {
        let spender = self.runtime.caller_address();
        Ok(self.token().transfer_from(&spender, &params.from, &params.to, &params.amount)?)
    }
}
