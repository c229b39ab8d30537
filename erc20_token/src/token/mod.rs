use std::ops::Neg;

use actor_utils::messaging::MessagingError;
use actor_utils::syscalls::Syscalls;
use actor_utils::util::ActorRuntime;
use cid::Cid;
pub use error::TokenError;
use fvm_ipld_blockstore::Blockstore;
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;
use fvm_shared::ActorID;
use num_traits::Zero;

use self::state::{StateError as TokenStateError, StateInvariantError, StateSummary, TokenState};
use self::types::{TransferFromReturn, TransferReturn};
use crate::event::{Approval, TokenEvent, Transfer};

mod error;
pub mod state;
pub mod types;

/// Ratio of integral units to whole tokens, aka "18 decimals"
pub const TOKEN_PRECISION: u64 = 1_000_000_000_000_000_000;
/// Number of decimal places matching [`TOKEN_PRECISION`]
pub const TOKEN_DECIMALS: u8 = 18;

type Result<T> = std::result::Result<T, TokenError>;

/// Library functions that implement the ERC20 token ledger
///
/// Holds injectable services to access/interface with IPLD/FVM layer.
pub struct Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Runtime services to interact with the execution environment
    runtime: ActorRuntime<S, BS>,
    /// Reference to token state that will be inspected/mutated
    state: &'st mut TokenState,
}

impl<'st, S, BS> Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Creates a new clean token state instance
    ///
    /// This should be wrapped in a Token handle for convenience. Must be flushed to the blockstore
    /// explicitly to persist changes
    pub fn create_state(bs: &BS) -> Result<TokenState> {
        Ok(TokenState::new(bs)?)
    }

    /// Creates a new clean token state instance, specifying the underlying Hamt bit widths
    ///
    /// This should be wrapped in a Token handle for convenience. Must be flushed to the blockstore
    /// explicitly to persist changes
    pub fn create_state_with_bit_width(bs: &BS, hamt_bit_width: u32) -> Result<TokenState> {
        Ok(TokenState::new_with_bit_width(bs, hamt_bit_width)?)
    }

    /// Wrap an existing token state
    pub fn wrap(runtime: ActorRuntime<S, BS>, state: &'st mut TokenState) -> Self {
        Self { runtime, state }
    }

    /// Replace the current state with another
    /// The previous state is returned and can be safely dropped
    pub fn replace(&mut self, state: TokenState) -> TokenState {
        std::mem::replace(self.state, state)
    }

    /// For an already initialised state tree, loads the state tree from the blockstore at a Cid
    pub fn load_state(bs: &BS, state_cid: &Cid) -> Result<TokenState> {
        Ok(TokenState::load(bs, state_cid)?)
    }

    /// Loads a fresh copy of the state from a blockstore from a given cid, replacing existing state
    /// The old state is returned to enable comparisons and the like but can be safely dropped
    /// otherwise
    pub fn load_replace(&mut self, cid: &Cid) -> Result<TokenState> {
        let new_state = TokenState::load(&self.runtime, cid)?;
        Ok(std::mem::replace(self.state, new_state))
    }

    /// Flush state and return Cid for root
    pub fn flush(&mut self) -> Result<Cid> {
        Ok(self.state.save(&self.runtime)?)
    }

    /// Get a reference to the wrapped state tree
    pub fn state(&self) -> &TokenState {
        self.state
    }

    /// Get a reference to the underlying runtime
    pub fn runtime(&self) -> &ActorRuntime<S, BS> {
        &self.runtime
    }

    /// Opens an atomic transaction on TokenState which allows a closure to make multiple
    /// modifications to the state tree.
    ///
    /// If the closure returns an error, the transaction is dropped atomically and no change is
    /// observed on token state.
    fn transaction<F, Res>(&mut self, f: F) -> Result<Res>
    where
        F: FnOnce(&mut TokenState, &ActorRuntime<S, BS>) -> Result<Res>,
    {
        let mut mutable_state = self.state.clone();
        let res = f(&mut mutable_state, &self.runtime)?;
        // if closure didn't error, save state
        *self.state = mutable_state;
        Ok(res)
    }
}

impl<'st, S, BS> Token<'st, S, BS>
where
    S: Syscalls,
    BS: Blockstore,
{
    /// Credits the entire initial supply to the holder
    ///
    /// Emits a Transfer from the token actor to the holder. Fails if a supply was already
    /// allocated, including a zero one. Returns the holder's new balance.
    pub fn initialize(&mut self, holder: &Address, supply: &TokenAmount) -> Result<TokenAmount> {
        let supply = validate_amount(supply, "initial supply")?;
        if self.state.initialized {
            return Err(TokenError::AlreadyInitialized { supply: self.state.supply.clone() });
        }

        let holder_id = self.runtime.resolve_or_init(holder)?;
        let token_id = self.runtime.actor_id();
        let balance = self.transaction(|state, rt| {
            let balance = state.change_balance_by(rt, holder_id, supply)?;
            state.change_supply_by(supply)?;
            state.initialized = true;
            emit(rt, Transfer { from: token_id, to: holder_id, amount: supply.clone() }.into())?;
            Ok(balance)
        })?;

        tracing::debug!(holder = holder_id, supply = ?supply, "initialized token supply");
        Ok(balance)
    }

    /// Gets the total number of tokens in existence
    ///
    /// This equals the sum of `balance_of` called on all addresses and never changes after
    /// initialization
    pub fn total_supply(&self) -> TokenAmount {
        self.state.supply.clone()
    }

    /// Returns the balance associated with a particular address
    ///
    /// Accounts that have never received transfers implicitly have a zero-balance
    pub fn balance_of(&self, owner: &Address) -> Result<TokenAmount> {
        // Don't instantiate an account if unable to resolve to an ID address, as non-initialized
        // addresses have an implicit zero balance
        match self.runtime.resolve_id(owner) {
            Ok(owner) => Ok(self.state.get_balance(&self.runtime, owner)?),
            Err(MessagingError::AddressNotResolved(_)) => Ok(TokenAmount::zero()),
            Err(e) => Err(e.into()),
        }
    }

    /// Gets the allowance between owner and spender
    ///
    /// An allowance is the amount that the spender can transfer out of the owner's account via
    /// `transfer_from`.
    pub fn allowance(&self, owner: &Address, spender: &Address) -> Result<TokenAmount> {
        // non-initialized addresses give and hold implicit zero allowances
        let owner = match self.runtime.resolve_id(owner) {
            Ok(owner) => owner,
            Err(MessagingError::AddressNotResolved(_)) => return Ok(TokenAmount::zero()),
            Err(e) => return Err(e.into()),
        };
        let spender = match self.runtime.resolve_id(spender) {
            Ok(spender) => spender,
            Err(MessagingError::AddressNotResolved(_)) => return Ok(TokenAmount::zero()),
            Err(e) => return Err(e.into()),
        };

        Ok(self.state.get_allowance_between(&self.runtime, owner, spender)?)
    }

    /// Sets the allowance a spender may transfer out of the owner's balance
    ///
    /// The amount replaces any previous allowance rather than adding to it, and may be zero to
    /// clear it. Emits an Approval event. Returns the new allowance.
    ///
    /// Replacing a non-zero allowance with another non-zero allowance lets a spender who observes
    /// the approval spend the old allowance first and then the new one. Owners wanting to avoid
    /// this should approve zero before approving the new amount.
    pub fn approve(
        &mut self,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<TokenAmount> {
        let amount = validate_amount(amount, "allowance")?;
        let owner_id = self.runtime.resolve_or_init(owner)?;
        let spender_id = self.runtime.resolve_or_init(spender)?;

        self.transaction(|state, rt| {
            state.set_allowance(rt, owner_id, spender_id, amount)?;
            let amount = amount.clone();
            emit(rt, Approval { owner: owner_id, spender: spender_id, amount }.into())
        })?;

        tracing::debug!(owner = owner_id, spender = spender_id, amount = ?amount, "approved");
        Ok(amount.clone())
    }

    /// Transfers an amount from one address to another
    ///
    /// - The requested value MUST be non-negative
    /// - The requested value MUST NOT exceed the sender's balance
    ///
    /// Upon successful transfer:
    /// - The from balance decreases by the requested value
    /// - The to balance increases by the requested value
    /// - A Transfer event is emitted, including for zero amounts and transfers to self
    ///
    /// An unresolvable recipient is initialised as an account first.
    pub fn transfer(
        &mut self,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferReturn> {
        let amount = validate_amount(amount, "transfer")?;
        let from_id = self.runtime.resolve_or_init(from)?;
        let to_id = self.runtime.resolve_or_init(to)?;

        let ret = self.transaction(|state, rt| {
            let ret = move_balance(state, rt, from_id, to_id, amount)?;
            emit(rt, Transfer { from: from_id, to: to_id, amount: amount.clone() }.into())?;
            Ok(ret)
        })?;

        tracing::debug!(from = from_id, to = to_id, amount = ?amount, "transferred");
        Ok(ret)
    }

    /// Transfers an amount out of an owner's balance on behalf of a spender
    ///
    /// - The requested value MUST be non-negative
    /// - The requested value MUST NOT exceed the allowance of the spender on the owner's balance
    /// - The requested value MUST NOT exceed the owner's balance
    ///
    /// The allowance is checked first, so InsufficientAllowance is returned when both checks
    /// would fail. A spender or owner that cannot be resolved has no allowance, so only a zero
    /// amount can succeed for it, in which case the address is initialised like a recipient. On
    /// success the allowance decreases by the requested value and a Transfer event is emitted; no
    /// Approval event is emitted for the decrease.
    pub fn transfer_from(
        &mut self,
        spender: &Address,
        from: &Address,
        to: &Address,
        amount: &TokenAmount,
    ) -> Result<TransferFromReturn> {
        let amount = validate_amount(amount, "transfer")?;

        let spender_id = self.resolve_delegate(spender, from, spender, amount)?;
        let from_id = self.resolve_delegate(from, from, spender, amount)?;
        let to_id = self.runtime.resolve_or_init(to)?;

        let ret = self.transaction(|state, rt| {
            let allowance = state.attempt_use_allowance(rt, spender_id, from_id, amount)?;
            let TransferReturn { from_balance, to_balance } =
                move_balance(state, rt, from_id, to_id, amount)?;
            emit(rt, Transfer { from: from_id, to: to_id, amount: amount.clone() }.into())?;
            Ok(TransferFromReturn { from_balance, to_balance, allowance })
        })?;

        tracing::debug!(
            spender = spender_id,
            from = from_id,
            to = to_id,
            amount = ?amount,
            remaining = ?ret.allowance,
            "transferred from"
        );
        Ok(ret)
    }

    /// Resolves one side of a delegated transfer
    ///
    /// An unknown address holds a zero allowance: it is initialised for a zero amount and
    /// reported as an insufficient allowance otherwise.
    fn resolve_delegate(
        &self,
        address: &Address,
        owner: &Address,
        spender: &Address,
        amount: &TokenAmount,
    ) -> Result<ActorID> {
        if amount.is_zero() {
            return Ok(self.runtime.resolve_or_init(address)?);
        }
        match self.runtime.resolve_id(address) {
            Ok(id) => Ok(id),
            Err(MessagingError::AddressNotResolved(_)) => {
                Err(implied_insufficient_allowance(owner, spender, amount))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Checks the state invariants, throwing an error if they are not met
    pub fn assert_invariants(&self) -> std::result::Result<StateSummary, Vec<StateInvariantError>> {
        let (summary, errors) = self.check_invariants();
        match errors.is_empty() {
            true => Ok(summary),
            false => Err(errors),
        }
    }

    /// Checks the state invariants, returning a state summary and list of errors
    pub fn check_invariants(&self) -> (StateSummary, Vec<StateInvariantError>) {
        self.state.check_invariants(&self.runtime)
    }
}

/// Moves tokens between two accounts, returning their new balances
///
/// A transfer to self leaves the balance untouched but must still not exceed it.
fn move_balance<BS: Blockstore>(
    state: &mut TokenState,
    bs: &BS,
    from: ActorID,
    to: ActorID,
    amount: &TokenAmount,
) -> Result<TransferReturn> {
    if from == to {
        let balance = state.get_balance(bs, from)?;
        if balance.lt(amount) {
            return Err(TokenStateError::InsufficientBalance {
                owner: from,
                balance,
                delta: amount.clone().neg(),
            }
            .into());
        }
        return Ok(TransferReturn { from_balance: balance.clone(), to_balance: balance });
    }

    let from_balance = state.change_balance_by(bs, from, &amount.clone().neg())?;
    let to_balance = state.change_balance_by(bs, to, amount)?;
    Ok(TransferReturn { from_balance, to_balance })
}

fn implied_insufficient_allowance(
    owner: &Address,
    spender: &Address,
    amount: &TokenAmount,
) -> TokenError {
    TokenStateError::InsufficientAllowance {
        owner: *owner,
        spender: *spender,
        allowance: TokenAmount::zero(),
        delta: amount.clone(),
    }
    .into()
}

fn emit<S: Syscalls, BS: Blockstore>(
    runtime: &ActorRuntime<S, BS>,
    event: TokenEvent,
) -> Result<()> {
    tracing::trace!(name = event.name(), ?event, "emitting event");
    runtime.emit_event(&event.to_actor_event()?)?;
    Ok(())
}

/// Validates that a token amount for transfers, approvals or supply is non-negative
///
/// Returns the argument, or an error.
pub fn validate_amount<'a>(a: &'a TokenAmount, name: &'static str) -> Result<&'a TokenAmount> {
    if a.is_negative() {
        return Err(TokenError::InvalidNegative { name, amount: a.clone() });
    }
    Ok(a)
}

#[cfg(test)]
mod test {
    use actor_utils::syscalls::fake_syscalls::FakeSyscalls;
    use actor_utils::util::ActorRuntime;
    use fvm_ipld_blockstore::MemoryBlockstore;
    use fvm_shared::address::Address;
    use fvm_shared::econ::TokenAmount;
    use fvm_shared::ActorID;
    use num_traits::Zero;

    use crate::event::{Approval, TokenEvent, Transfer};
    use crate::token::state::{StateError, TokenState};
    use crate::token::types::{TransferFromReturn, TransferReturn};
    use crate::token::{Token, TokenError, TOKEN_DECIMALS, TOKEN_PRECISION};

    /// Returns a static secp256k1 address
    fn secp_address() -> Address {
        let key = vec![0; 65];
        Address::new_secp256k1(key.as_slice()).unwrap()
    }

    const TOKEN_ACTOR: ActorID = 1;
    const TREASURY: &Address = &Address::new_id(2);
    const ALICE: &Address = &Address::new_id(3);
    const BOB: &Address = &Address::new_id(4);
    const CAROL: &Address = &Address::new_id(5);

    /// Accounts created by the runtime are allocated from here
    const FIRST_ACCOUNT: ActorID = 1000;

    fn new_runtime() -> ActorRuntime<FakeSyscalls, MemoryBlockstore> {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
        ActorRuntime::new(FakeSyscalls::new(TOKEN_ACTOR, FIRST_ACCOUNT), MemoryBlockstore::new())
    }

    fn new_token(
        runtime: ActorRuntime<FakeSyscalls, MemoryBlockstore>,
        state: &mut TokenState,
    ) -> Token<FakeSyscalls, MemoryBlockstore> {
        Token::wrap(runtime, state)
    }

    /// Drains the runtime's event log, decoding every entry as a token event
    fn take_events(token: &Token<FakeSyscalls, MemoryBlockstore>) -> Vec<TokenEvent> {
        token
            .runtime()
            .syscalls
            .take_events()
            .iter()
            .map(|e| {
                assert_eq!(e.emitter, TOKEN_ACTOR);
                TokenEvent::from_actor_event(&e.event).unwrap().unwrap()
            })
            .collect()
    }

    fn whole(n: i64) -> TokenAmount {
        TokenAmount::from_whole(n)
    }

    fn transfer_event(from: &Address, to: &Address, amount: TokenAmount) -> TokenEvent {
        Transfer { from: from.id().unwrap(), to: to.id().unwrap(), amount }.into()
    }

    fn approval_event(owner: &Address, spender: &Address, amount: TokenAmount) -> TokenEvent {
        Approval { owner: owner.id().unwrap(), spender: spender.id().unwrap(), amount }.into()
    }

    #[test]
    fn it_counts_whole_tokens_in_atto_units() {
        assert_eq!(whole(1), TokenAmount::from_atto(TOKEN_PRECISION));
        assert_eq!(TOKEN_PRECISION, 10u64.pow(TOKEN_DECIMALS as u32));
        assert_eq!(whole(10).atto().to_string(), "10000000000000000000");
    }

    #[test]
    fn it_instantiates_and_persists() {
        let runtime = new_runtime();
        let mut state = Token::<FakeSyscalls, _>::create_state(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);

        token.initialize(TREASURY, &whole(1_000)).unwrap();
        let cid = token.flush().unwrap();

        let loaded = Token::<FakeSyscalls, _>::load_state(token.runtime().bs(), &cid).unwrap();
        assert_eq!(&loaded, token.state());
        assert_eq!(loaded.supply, whole(1_000));
    }

    #[test]
    fn it_instantiates_with_variable_bit_width() {
        let runtime = new_runtime();
        let mut state =
            Token::<FakeSyscalls, _>::create_state_with_bit_width(runtime.bs(), 8).unwrap();
        let mut token = new_token(runtime, &mut state);

        token.initialize(TREASURY, &whole(10)).unwrap();
        token.transfer(TREASURY, ALICE, &whole(4)).unwrap();
        let cid = token.flush().unwrap();

        let loaded = TokenState::load(token.runtime().bs(), &cid).unwrap();
        token.replace(loaded);
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(4));
    }

    #[test]
    fn it_mutates_externally_loaded_state() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        let initial_cid = token.flush().unwrap();

        token.transfer(TREASURY, ALICE, &whole(60)).unwrap();
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(60));

        // reloading the earlier root discards the transfer
        let replaced = token.load_replace(&initial_cid).unwrap();
        assert_ne!(replaced.balances, token.state().balances);
        assert_eq!(token.balance_of(ALICE).unwrap(), TokenAmount::zero());
        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(100));
    }

    #[test]
    fn it_initializes_the_supply_to_the_holder() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);

        let balance = token.initialize(TREASURY, &whole(50_000)).unwrap();
        assert_eq!(balance, whole(50_000));
        assert_eq!(token.total_supply(), whole(50_000));
        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(50_000));

        // the supply is allocated by the token actor itself
        let events = take_events(&token);
        assert_eq!(
            events,
            vec![TokenEvent::Transfer(Transfer {
                from: TOKEN_ACTOR,
                to: TREASURY.id().unwrap(),
                amount: whole(50_000),
            })]
        );
        token.assert_invariants().unwrap();
    }

    #[test]
    fn it_refuses_to_initialize_twice() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        take_events(&token);

        let err = token.initialize(ALICE, &whole(5)).unwrap_err();
        match err {
            TokenError::AlreadyInitialized { supply } => assert_eq!(supply, whole(100)),
            e => panic!("unexpected error {e:?}"),
        }
        assert_eq!(token.total_supply(), whole(100));
        assert_eq!(token.balance_of(ALICE).unwrap(), TokenAmount::zero());
        assert!(take_events(&token).is_empty());

        // negative supplies are rejected outright
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(-1)).unwrap_err();
        assert_eq!(token.total_supply(), TokenAmount::zero());
    }

    #[test]
    fn it_refuses_to_reinitialize_a_zero_supply() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);

        token.initialize(TREASURY, &TokenAmount::zero()).unwrap();
        assert!(token.state().initialized);
        assert_eq!(take_events(&token).len(), 1);

        let err = token.initialize(ALICE, &whole(5)).unwrap_err();
        assert!(matches!(err, TokenError::AlreadyInitialized { .. }));
        assert!(token.total_supply().is_zero());
        assert!(token.balance_of(ALICE).unwrap().is_zero());
        assert!(take_events(&token).is_empty());
    }

    #[test]
    fn it_transfers() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        take_events(&token);

        let ret = token.transfer(TREASURY, ALICE, &whole(10)).unwrap();
        assert_eq!(ret, TransferReturn { from_balance: whole(90), to_balance: whole(10) });
        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(90));
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(10));
        assert_eq!(token.total_supply(), whole(100));

        // alice can spend what she received
        token.transfer(ALICE, BOB, &whole(3)).unwrap();
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(7));
        assert_eq!(token.balance_of(BOB).unwrap(), whole(3));

        assert_eq!(
            take_events(&token),
            vec![transfer_event(TREASURY, ALICE, whole(10)), transfer_event(ALICE, BOB, whole(3))]
        );
        token.assert_invariants().unwrap();
    }

    #[test]
    fn it_transfers_zero_and_to_self() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        take_events(&token);

        // zero transfers succeed and are announced
        let ret = token.transfer(TREASURY, ALICE, &TokenAmount::zero()).unwrap();
        assert_eq!(ret.to_balance, TokenAmount::zero());
        // no zero balance was stored for the recipient
        assert_eq!(token.state().count_balances(token.runtime().bs()).unwrap(), 1);

        // a transfer to self doesn't change the balance
        let ret = token.transfer(TREASURY, TREASURY, &whole(100)).unwrap();
        assert_eq!(ret, TransferReturn { from_balance: whole(100), to_balance: whole(100) });

        // but must not exceed it
        let err = token.transfer(TREASURY, TREASURY, &whole(101)).unwrap_err();
        assert!(matches!(err, TokenError::TokenState(StateError::InsufficientBalance { .. })));

        assert_eq!(
            take_events(&token),
            vec![
                transfer_event(TREASURY, ALICE, TokenAmount::zero()),
                transfer_event(TREASURY, TREASURY, whole(100)),
            ]
        );
        token.assert_invariants().unwrap();
    }

    #[test]
    fn it_fails_to_transfer_when_insufficient_balance() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        token.transfer(TREASURY, ALICE, &whole(10)).unwrap();
        take_events(&token);
        let before = token.flush().unwrap();

        let err = token.transfer(ALICE, BOB, &whole(11)).unwrap_err();
        match err {
            TokenError::TokenState(StateError::InsufficientBalance { owner, balance, delta }) => {
                assert_eq!(owner, ALICE.id().unwrap());
                assert_eq!(balance, whole(10));
                assert_eq!(delta, whole(-11));
            }
            e => panic!("unexpected error {e:?}"),
        }

        // nothing changed and nothing was announced
        assert_eq!(token.flush().unwrap(), before);
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(10));
        assert_eq!(token.balance_of(BOB).unwrap(), TokenAmount::zero());
        assert!(take_events(&token).is_empty());
    }

    #[test]
    fn it_transfers_to_uninitialized_addresses() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        take_events(&token);

        let recipient = secp_address();
        assert_eq!(token.balance_of(&recipient).unwrap(), TokenAmount::zero());
        token.transfer(TREASURY, &recipient, &whole(1)).unwrap();

        // the recipient was initialised as an account
        assert_eq!(token.runtime().resolve_id(&recipient).unwrap(), FIRST_ACCOUNT);
        assert_eq!(token.balance_of(&recipient).unwrap(), whole(1));
        assert_eq!(token.balance_of(&Address::new_id(FIRST_ACCOUNT)).unwrap(), whole(1));
        assert_eq!(
            take_events(&token),
            vec![TokenEvent::Transfer(Transfer {
                from: TREASURY.id().unwrap(),
                to: FIRST_ACCOUNT,
                amount: whole(1),
            })]
        );
    }

    #[test]
    fn it_reads_zero_for_unknown_accounts() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let token = new_token(runtime, &mut state);
        let stranger = secp_address();

        assert_eq!(token.balance_of(&stranger).unwrap(), TokenAmount::zero());
        assert_eq!(token.allowance(&stranger, ALICE).unwrap(), TokenAmount::zero());
        assert_eq!(token.allowance(ALICE, &stranger).unwrap(), TokenAmount::zero());
        assert_eq!(token.balance_of(CAROL).unwrap(), TokenAmount::zero());

        // reads don't create accounts
        assert!(token.runtime().resolve_id(&stranger).is_err());
    }

    #[test]
    fn it_approves_absolute_amounts() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);

        let ret = token.approve(ALICE, BOB, &whole(20)).unwrap();
        assert_eq!(ret, whole(20));
        assert_eq!(token.allowance(ALICE, BOB).unwrap(), whole(20));
        // allowances are directional
        assert_eq!(token.allowance(BOB, ALICE).unwrap(), TokenAmount::zero());

        // a further approval replaces the allowance
        token.approve(ALICE, BOB, &whole(5)).unwrap();
        assert_eq!(token.allowance(ALICE, BOB).unwrap(), whole(5));

        // repeating an approval leaves the allowance alone but is announced again
        token.approve(ALICE, BOB, &whole(5)).unwrap();
        assert_eq!(token.allowance(ALICE, BOB).unwrap(), whole(5));

        // approving zero clears the entry
        token.approve(ALICE, BOB, &TokenAmount::zero()).unwrap();
        assert_eq!(token.allowance(ALICE, BOB).unwrap(), TokenAmount::zero());
        let bs = token.runtime().bs();
        assert!(token.state().get_owner_allowance_map(bs, ALICE.id().unwrap()).unwrap().is_none());

        assert_eq!(
            take_events(&token),
            vec![
                approval_event(ALICE, BOB, whole(20)),
                approval_event(ALICE, BOB, whole(5)),
                approval_event(ALICE, BOB, whole(5)),
                approval_event(ALICE, BOB, TokenAmount::zero()),
            ]
        );
        token.assert_invariants().unwrap();
    }

    #[test]
    fn it_approves_uninitialized_spenders() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        let spender = secp_address();

        token.approve(ALICE, &spender, &whole(1)).unwrap();
        assert_eq!(token.allowance(ALICE, &spender).unwrap(), whole(1));
        assert_eq!(token.allowance(ALICE, &Address::new_id(FIRST_ACCOUNT)).unwrap(), whole(1));
    }

    #[test]
    fn it_allows_delegated_transfer() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        token.approve(TREASURY, ALICE, &whole(20)).unwrap();
        take_events(&token);

        // alice moves tokens out of the treasury to herself
        let ret = token.transfer_from(ALICE, TREASURY, ALICE, &whole(5)).unwrap();
        assert_eq!(
            ret,
            TransferFromReturn {
                from_balance: whole(95),
                to_balance: whole(5),
                allowance: whole(15),
            }
        );
        assert_eq!(token.allowance(TREASURY, ALICE).unwrap(), whole(15));
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(5));

        // and to a third party
        token.transfer_from(ALICE, TREASURY, BOB, &whole(15)).unwrap();
        assert_eq!(token.balance_of(BOB).unwrap(), whole(15));
        assert_eq!(token.allowance(TREASURY, ALICE).unwrap(), TokenAmount::zero());

        // only transfers are announced, the allowance decreases silently
        assert_eq!(
            take_events(&token),
            vec![
                transfer_event(TREASURY, ALICE, whole(5)),
                transfer_event(TREASURY, BOB, whole(15)),
            ]
        );
        token.assert_invariants().unwrap();
    }

    #[test]
    fn it_fails_to_transfer_when_insufficient_allowance() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        token.approve(TREASURY, ALICE, &whole(20)).unwrap();
        take_events(&token);
        let before = token.flush().unwrap();

        let err = token.transfer_from(ALICE, TREASURY, ALICE, &whole(40)).unwrap_err();
        match err {
            TokenError::TokenState(StateError::InsufficientAllowance {
                owner,
                spender,
                allowance,
                delta,
            }) => {
                assert_eq!(owner, *TREASURY);
                assert_eq!(spender, *ALICE);
                assert_eq!(allowance, whole(20));
                assert_eq!(delta, whole(40));
            }
            e => panic!("unexpected error {e:?}"),
        }

        assert_eq!(token.flush().unwrap(), before);
        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(100));
        assert_eq!(token.balance_of(ALICE).unwrap(), TokenAmount::zero());
        assert_eq!(token.allowance(TREASURY, ALICE).unwrap(), whole(20));
        assert!(take_events(&token).is_empty());
    }

    #[test]
    fn it_fails_to_transfer_without_approval() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        take_events(&token);

        for amount in [whole(20), TokenAmount::from_atto(1)] {
            let err = token.transfer_from(ALICE, TREASURY, ALICE, &amount).unwrap_err();
            assert!(matches!(
                err,
                TokenError::TokenState(StateError::InsufficientAllowance { .. })
            ));
        }

        // an unresolvable spender or owner has no allowance
        let stranger = secp_address();
        let err = token.transfer_from(&stranger, TREASURY, ALICE, &whole(1)).unwrap_err();
        assert!(matches!(err, TokenError::TokenState(StateError::InsufficientAllowance { .. })));
        let err = token.transfer_from(ALICE, &stranger, ALICE, &whole(1)).unwrap_err();
        assert!(matches!(err, TokenError::TokenState(StateError::InsufficientAllowance { .. })));
        assert!(token.runtime().resolve_id(&stranger).is_err());

        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(100));
        assert!(take_events(&token).is_empty());
    }

    #[test]
    fn it_allows_zero_delegated_transfers_without_approval() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        take_events(&token);

        let ret = token.transfer_from(ALICE, TREASURY, BOB, &TokenAmount::zero()).unwrap();
        assert_eq!(ret.allowance, TokenAmount::zero());
        assert_eq!(ret.from_balance, whole(100));
        assert_eq!(take_events(&token), vec![transfer_event(TREASURY, BOB, TokenAmount::zero())]);
    }

    #[test]
    fn it_treats_unknown_owners_like_empty_accounts_for_zero_amounts() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        take_events(&token);

        // the same call a known owner with nothing approved would succeed with
        let stranger = secp_address();
        let ret = token.transfer_from(ALICE, &stranger, BOB, &TokenAmount::zero()).unwrap();
        assert_eq!(ret.allowance, TokenAmount::zero());
        assert_eq!(ret.from_balance, TokenAmount::zero());
        assert_eq!(ret.to_balance, TokenAmount::zero());

        // the owner was initialised as an account, but nothing was stored for it
        let stranger_id = token.runtime().resolve_id(&stranger).unwrap();
        assert_eq!(stranger_id, FIRST_ACCOUNT);
        assert_eq!(
            take_events(&token),
            vec![TokenEvent::Transfer(Transfer {
                from: stranger_id,
                to: BOB.id().unwrap(),
                amount: TokenAmount::zero(),
            })]
        );
        assert_eq!(token.state().count_balances(token.runtime().bs()).unwrap(), 1);

        // an unknown spender is treated the same way
        let spender = Address::new_secp256k1(&[9; 65]).unwrap();
        token.transfer_from(&spender, TREASURY, BOB, &TokenAmount::zero()).unwrap();
        assert!(token.runtime().resolve_id(&spender).is_ok());
        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(100));
        token.assert_invariants().unwrap();
    }

    #[test]
    fn it_checks_allowance_before_balance() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        token.transfer(TREASURY, ALICE, &whole(5)).unwrap();
        token.approve(ALICE, BOB, &whole(8)).unwrap();
        take_events(&token);

        // both checks would fail, the allowance is reported
        let err = token.transfer_from(BOB, ALICE, BOB, &whole(10)).unwrap_err();
        assert!(matches!(err, TokenError::TokenState(StateError::InsufficientAllowance { .. })));

        // within the allowance but beyond the balance
        let err = token.transfer_from(BOB, ALICE, BOB, &whole(6)).unwrap_err();
        assert!(matches!(err, TokenError::TokenState(StateError::InsufficientBalance { .. })));

        // the allowance wasn't consumed by the failed transfer
        assert_eq!(token.allowance(ALICE, BOB).unwrap(), whole(8));
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(5));
        assert!(take_events(&token).is_empty());
    }

    #[test]
    fn it_allows_spending_a_self_allowance() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();

        // a self-managed transfer through transfer_from still needs an allowance
        token.transfer_from(TREASURY, TREASURY, ALICE, &whole(1)).unwrap_err();

        token.approve(TREASURY, TREASURY, &whole(10)).unwrap();
        let ret = token.transfer_from(TREASURY, TREASURY, ALICE, &whole(4)).unwrap();
        assert_eq!(ret.allowance, whole(6));
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(4));
        token.assert_invariants().unwrap();
    }

    #[test]
    fn it_rejects_negative_amounts() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        token.approve(TREASURY, ALICE, &whole(10)).unwrap();
        take_events(&token);
        let negative = TokenAmount::from_atto(-1);

        let err = token.transfer(TREASURY, ALICE, &negative).unwrap_err();
        assert!(matches!(err, TokenError::InvalidNegative { name: "transfer", .. }));
        let err = token.approve(TREASURY, ALICE, &negative).unwrap_err();
        assert!(matches!(err, TokenError::InvalidNegative { name: "allowance", .. }));
        let err = token.transfer_from(ALICE, TREASURY, ALICE, &negative).unwrap_err();
        assert!(matches!(err, TokenError::InvalidNegative { .. }));

        assert_eq!(token.allowance(TREASURY, ALICE).unwrap(), whole(10));
        assert!(take_events(&token).is_empty());
    }

    #[test]
    fn it_provides_atomic_transactions() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        let treasury = TREASURY.id().unwrap();
        let alice = ALICE.id().unwrap();

        // entire transaction fails
        token
            .transaction(|state, bs| {
                state.change_balance_by(bs, alice, &whole(50))?;
                state.change_balance_by(bs, treasury, &whole(-150))?;
                Ok(())
            })
            .unwrap_err();
        assert_eq!(token.balance_of(ALICE).unwrap(), TokenAmount::zero());
        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(100));

        // entire transaction succeeds
        token
            .transaction(|state, bs| {
                state.change_balance_by(bs, alice, &whole(50))?;
                state.change_balance_by(bs, treasury, &whole(-50))?;
                Ok(())
            })
            .unwrap();
        assert_eq!(token.balance_of(ALICE).unwrap(), whole(50));
        assert_eq!(token.balance_of(TREASURY).unwrap(), whole(50));
    }

    #[test]
    fn check_invariants_returns_a_state_summary() {
        let runtime = new_runtime();
        let mut state = TokenState::new(runtime.bs()).unwrap();
        let mut token = new_token(runtime, &mut state);
        token.initialize(TREASURY, &whole(100)).unwrap();
        token.transfer(TREASURY, ALICE, &whole(30)).unwrap();
        token.transfer(TREASURY, BOB, &whole(20)).unwrap();
        token.approve(ALICE, CAROL, &whole(7)).unwrap();
        token.transfer_from(CAROL, ALICE, CAROL, &whole(2)).unwrap();

        let summary = token.assert_invariants().unwrap();
        assert_eq!(summary.total_supply, whole(100));

        let balances = summary.balance_map.unwrap();
        assert_eq!(balances.len(), 4);
        assert_eq!(balances[&TREASURY.id().unwrap()], whole(50));
        assert_eq!(balances[&ALICE.id().unwrap()], whole(28));
        assert_eq!(balances[&BOB.id().unwrap()], whole(20));
        assert_eq!(balances[&CAROL.id().unwrap()], whole(2));

        let allowances = summary.allowance_map.unwrap();
        assert_eq!(allowances.len(), 1);
        assert_eq!(allowances[&ALICE.id().unwrap()][&CAROL.id().unwrap()], whole(5));
    }
}
