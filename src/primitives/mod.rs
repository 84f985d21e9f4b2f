mod b58;
mod hash;
mod keys;
mod stream;

pub use b58::ToBase58String;
pub use hash::Hash;
pub use keys::{Address, Keypair, KeypairError};
pub use stream::OptionalStreamExt;
