use fvm_ipld_encoding::tuple::{Deserialize_tuple, Serialize_tuple};
use fvm_shared::address::Address;
use fvm_shared::econ::TokenAmount;

/// A standard ERC20-style fungible token interface. This represents the external interface exposed
/// to other on-chain actors
///
/// Token authors must implement this trait and link the methods to standard dispatch numbers (as
/// defined by [FRC-0042](https://github.com/filecoin-project/FIPs/blob/master/FRCs/frc-0042.md)).
/// The owner of a transfer or approval is always the caller of the current message.
pub trait ERC20Token {
    type TokenError;
    /// Returns the name of the token
    ///
    /// Must not be empty
    fn name(&self) -> String;

    /// Returns the ticker symbol of the token
    ///
    /// Must not be empty. Should be a short uppercase string
    fn symbol(&self) -> String;

    /// Returns the number of decimal places used to display token amounts
    ///
    /// Must never change
    fn decimals(&self) -> DecimalsReturn;

    /// Returns the total amount of the token in existence
    ///
    /// Must be non-negative. The total supply must equal the balances of all addresses.
    fn total_supply(&mut self) -> TotalSupplyReturn;

    /// Returns the balance of an address
    ///
    /// Balance is always non-negative. Uninitialised addresses have an implicit zero balance.
    fn balance_of(&mut self, params: Address) -> Result<BalanceReturn, Self::TokenError>;

    /// Returns the allowance a spender may transfer out of an owner's balance
    fn allowance(
        &mut self,
        params: GetAllowanceParams,
    ) -> Result<AllowanceReturn, Self::TokenError>;

    /// Transfers tokens from the caller to another address
    ///
    /// Amount must be non-negative (but can be zero). Transferring to the caller's own address must
    /// be treated as a normal transfer.
    fn transfer(&mut self, params: TransferParams) -> Result<TransferReturn, Self::TokenError>;

    /// Sets the amount a spender may transfer out of the caller's balance
    ///
    /// The new amount replaces any previous allowance. Returns the new allowance.
    fn approve(&mut self, params: ApproveParams) -> Result<ApproveReturn, Self::TokenError>;

    /// Transfers tokens from one address to another
    ///
    /// The caller must have previously been approved to spend at least the sent amount. If
    /// successful, the amount transferred is deducted from the caller's allowance.
    fn transfer_from(
        &mut self,
        params: TransferFromParams,
    ) -> Result<TransferFromReturn, Self::TokenError>;
}

pub type DecimalsReturn = u8;
pub type TotalSupplyReturn = TokenAmount;
pub type BalanceReturn = TokenAmount;
pub type AllowanceReturn = TokenAmount;
pub type ApproveReturn = TokenAmount;

/// Instruction to transfer tokens to another address
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferParams {
    pub to: Address,
    /// A non-negative amount to transfer
    pub amount: TokenAmount,
}

/// Return value after a successful transfer
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferReturn {
    /// The new balance of the `from` address
    pub from_balance: TokenAmount,
    /// The new balance of the `to` address
    pub to_balance: TokenAmount,
}

/// Instruction to transfer tokens between two addresses as a spender
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferFromParams {
    pub from: Address,
    pub to: Address,
    /// A non-negative amount to transfer
    pub amount: TokenAmount,
}

/// Return value after a successful delegated transfer
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct TransferFromReturn {
    /// The new balance of the `from` address
    pub from_balance: TokenAmount,
    /// The new balance of the `to` address
    pub to_balance: TokenAmount,
    /// The remaining allowance between `from` and the spender (caller)
    pub allowance: TokenAmount,
}

/// Instruction to set the allowance of a spender on the caller's balance
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct ApproveParams {
    pub spender: Address,
    /// A non-negative amount, replacing any previous allowance
    pub amount: TokenAmount,
}

/// Params to get the allowance between an owner and a spender
#[derive(Serialize_tuple, Deserialize_tuple, Clone, Debug, PartialEq, Eq)]
pub struct GetAllowanceParams {
    pub owner: Address,
    pub spender: Address,
}
