pub mod block;
pub mod genesis;
pub mod transaction;
pub mod validator;
pub mod vote;

pub use block::{Block, BlockBody, BlockHeader, BlockValidationError};
pub use genesis::Genesis;
pub use transaction::{Transaction, TransactionData, TransactionList};
pub use validator::{Validator, ValidatorSet};
pub use vote::{Commit, Vote, VoteType};
