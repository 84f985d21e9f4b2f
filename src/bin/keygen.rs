use rand::{rngs::ThreadRng, RngCore};
use tenzor::primitives::Keypair;

fn main() {
  let mut rng = ThreadRng::default();
  let count: u32 = std::env::args()
    .nth(1)
    .unwrap_or_else(|| "1".to_owned())
    .parse()
    .unwrap();

  for _ in 0..count {
    let mut secret = [0u8; 32];
    rng.fill_bytes(&mut secret);
    let keypair = Keypair::try_from(&secret[..]).unwrap();

    println!("address: {}", keypair.address());
    println!("secret:  {}", bs58::encode(secret).into_string());
    println!();
  }
}
