//! Deployment fixtures for exercising the PollexCoin actor end to end
//!
//! A deployment runs the actor against [`FakeSyscalls`] and a shared in-memory blockstore. Calls
//! go through [`pollex_token::invoke`] with CBOR-encoded params, the same way a message would
//! reach the actor on chain.
use std::cell::RefCell;

use actor_utils::messaging::MessagingError;
use actor_utils::shared_blockstore::SharedMemoryBlockstore;
use actor_utils::syscalls::fake_syscalls::FakeSyscalls;
use actor_utils::syscalls::{NoStateError, Syscalls};
use actor_utils::util::ActorRuntime;
use erc20_token::event::TokenEvent;
use erc20_token::token::state::{StateInvariantError, StateSummary};
use erc20_token::token::types::{
    ApproveParams, GetAllowanceParams, TransferFromParams, TransferFromReturn, TransferParams,
    TransferReturn,
};
use frc42_dispatch::method_hash;
use fvm_ipld_encoding::ipld_block::IpldBlock;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::error::ExitCode;
use fvm_shared::{ActorID, MethodNum};
use pollex_token::{invoke, PollexState, PollexToken, RuntimeError};
use serde::de::DeserializeOwned;
use thiserror::Error;

pub mod config;

pub use config::{NetworkConfig, TokenSettings};

/// ActorID the token is deployed at
pub const TOKEN_ACTOR_ID: ActorID = 100;
/// First ActorID handed out to accounts created during a test
pub const FIRST_ACCOUNT_ID: ActorID = 1000;

pub type HarnessRuntime = ActorRuntime<FakeSyscalls, SharedMemoryBlockstore>;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("actor call failed: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("ipld encoding error: {0}")]
    Encoding(#[from] fvm_ipld_encoding::Error),
    #[error("messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("invalid address: {0}")]
    Address(#[from] fvm_shared::address::Error),
    #[error("actor has no state: {0}")]
    NoState(#[from] NoStateError),
    #[error("invalid network config: {0}")]
    Config(#[from] serde_json::Error),
    #[error("initial supply {0} is not a decimal atto amount")]
    InvalidSupply(String),
    #[error("method {0} returned no value")]
    NoReturn(MethodNum),
    #[error("state invariants violated: {0:?}")]
    Invariants(Vec<StateInvariantError>),
}

impl HarnessError {
    /// Exit code the actor aborted with, if the failure came from the actor
    pub fn exit_code(&self) -> Option<ExitCode> {
        match self {
            HarnessError::Runtime(e) => Some(e.into()),
            _ => None,
        }
    }
}

/// A secp256k1 account together with the ActorID it was initialised at
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Account {
    pub address: Address,
    pub id: ActorID,
}

impl Account {
    /// Creates the account whose public key is `seed` repeated
    pub fn create(runtime: &HarnessRuntime, seed: u8) -> Result<Self, HarnessError> {
        let address = Address::new_secp256k1(&[seed; 65])?;
        let id = runtime.resolve_or_init(&address)?;
        Ok(Self { address, id })
    }
}

#[derive(Clone, Copy, Debug)]
pub struct NamedAccounts {
    pub deployer: Account,
    pub user1: Account,
}

impl NamedAccounts {
    pub fn create(runtime: &HarnessRuntime) -> Result<Self, HarnessError> {
        Ok(Self { deployer: Account::create(runtime, 1)?, user1: Account::create(runtime, 2)? })
    }
}

/// A constructed token actor and the accounts that took part in deploying it
pub struct Deployment {
    pub runtime: HarnessRuntime,
    pub accounts: NamedAccounts,
    pub config: NetworkConfig,
    next_seed: RefCell<u8>,
}

/// Deploys a fresh token with the whole supply held by the deployer
pub fn deploy_fixture(config: &NetworkConfig) -> Result<Deployment, HarnessError> {
    let runtime = ActorRuntime::new(
        FakeSyscalls::new(TOKEN_ACTOR_ID, FIRST_ACCOUNT_ID),
        SharedMemoryBlockstore::new(),
    );
    let accounts = NamedAccounts::create(&runtime)?;

    let params = IpldBlock::serialize_cbor(&config.token_config(accounts.deployer.address)?)?;
    runtime.syscalls.set_caller(accounts.deployer.id);
    invoke(runtime.borrowed(), method_hash!("Constructor"), params)?;

    tracing::info!(
        network = %config.network,
        token = %config.token.name,
        deployer = accounts.deployer.id,
        "deployed token"
    );
    Ok(Deployment { runtime, accounts, config: config.clone(), next_seed: RefCell::new(3) })
}

impl Deployment {
    /// Address of the token actor
    pub fn address(&self) -> Address {
        Address::new_id(self.runtime.actor_id())
    }

    /// A handle to the token whose calls are sent by `signer`
    pub fn contract(&self, signer: &Account) -> Contract<'_> {
        Contract { deployment: self, signer: signer.id }
    }

    /// Creates a further account, distinct from the named ones
    pub fn new_account(&self) -> Result<Account, HarnessError> {
        let seed = self.next_seed.replace_with(|seed| *seed + 1);
        Account::create(&self.runtime, seed)
    }

    /// Drains the events emitted since the last call, decoding those of the token
    pub fn events(&self) -> Result<Vec<TokenEvent>, HarnessError> {
        let mut events = Vec::new();
        for stamped in self.runtime.syscalls.take_events() {
            if let Some(event) = TokenEvent::from_actor_event(&stamped.event)? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// The state committed at the actor's current root
    pub fn state(&self) -> Result<PollexState, HarnessError> {
        Ok(PollexToken::load(self.runtime.borrowed())?.state().clone())
    }

    /// Checks the ledger invariants of the committed state
    pub fn assert_invariants(&self) -> Result<StateSummary, HarnessError> {
        let mut actor = PollexToken::load(self.runtime.borrowed())?;
        let summary = actor.token().assert_invariants().map_err(HarnessError::Invariants)?;
        Ok(summary)
    }

    /// A second deployment of the same actor, reading the committed root from the shared
    /// blockstore
    ///
    /// Accounts keep their ActorIDs. Nothing but the committed state carries over.
    pub fn reopen(&self) -> Result<Deployment, HarnessError> {
        let current = &self.runtime.syscalls;
        let syscalls = FakeSyscalls::new(current.actor_id, *current.next_actor_id.borrow());
        syscalls.addresses.replace(current.addresses.borrow().clone());
        syscalls.set_root(&self.runtime.root_cid()?)?;

        Ok(Deployment {
            runtime: ActorRuntime::new(syscalls, self.runtime.blockstore.clone()),
            accounts: self.accounts,
            config: self.config.clone(),
            next_seed: RefCell::new(*self.next_seed.borrow()),
        })
    }
}

/// Token methods called by a fixed signer
pub struct Contract<'d> {
    deployment: &'d Deployment,
    signer: ActorID,
}

impl<'d> Contract<'d> {
    pub fn signer(&self) -> ActorID {
        self.signer
    }

    /// Connects the same token to another signer
    pub fn connect(&self, signer: &Account) -> Contract<'d> {
        self.deployment.contract(signer)
    }

    fn call<R: DeserializeOwned>(
        &self,
        method: MethodNum,
        params: Option<IpldBlock>,
    ) -> Result<R, HarnessError> {
        let runtime = &self.deployment.runtime;
        runtime.syscalls.set_caller(self.signer);
        let ret = invoke(runtime.borrowed(), method, params)?;
        let block = ret.ok_or(HarnessError::NoReturn(method))?;
        Ok(block.deserialize()?)
    }

    pub fn name(&self) -> Result<String, HarnessError> {
        self.call(method_hash!("Name"), None)
    }

    pub fn symbol(&self) -> Result<String, HarnessError> {
        self.call(method_hash!("Symbol"), None)
    }

    pub fn decimals(&self) -> Result<u8, HarnessError> {
        self.call(method_hash!("Decimals"), None)
    }

    pub fn total_supply(&self) -> Result<TokenAmount, HarnessError> {
        self.call(method_hash!("TotalSupply"), None)
    }

    pub fn balance_of(&self, owner: &Address) -> Result<TokenAmount, HarnessError> {
        self.call(method_hash!("BalanceOf"), IpldBlock::serialize_cbor(owner)?)
    }

    pub fn allowance(
        &self,
        owner: &Address,
        spender: &Address,
    ) -> Result<TokenAmount, HarnessError> {
        let params = GetAllowanceParams { owner: *owner, spender: *spender };
        self.call(method_hash!("Allowance"), IpldBlock::serialize_cbor(&params)?)
    }

    pub fn transfer(
        &self,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferReturn, HarnessError> {
        let params = TransferParams { to: *to, amount: amount.clone() };
        self.call(method_hash!("Transfer"), IpldBlock::serialize_cbor(&params)?)
    }

    pub fn approve(
        &self,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount, HarnessError> {
        let params = ApproveParams { spender: *spender, amount: amount.clone() };
        self.call(method_hash!("Approve"), IpldBlock::serialize_cbor(&params)?)
    }

    pub fn transfer_from(
        &self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferFromReturn, HarnessError> {
        let params = TransferFromParams { from: *from, to: *to, amount: amount.clone() };
        self.call(method_hash!("TransferFrom"), IpldBlock::serialize_cbor(&params)?)
    }
}
