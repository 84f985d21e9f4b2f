mod cli;
mod consensus;
mod consumer;
mod dapp;
mod executor;
mod model;
mod network;
mod node;
mod pool;
mod primitives;
mod responder;
mod rpc;
mod store;
mod sync;

use {
  clap::Parser,
  cli::CliOpts,
  consumer::BlockConsumers,
  dapp::reference::InMemoryDapp,
  network::{validator_set_authorizer, swarm, Network},
  node::Node,
  pool::PoolLimits,
  rpc::ApiService,
  std::{sync::Arc, time::Duration},
  store::SledBlockchainStore,
  tracing::{info, Level},
  tracing_subscriber::{
    filter::filter_fn,
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
    Layer,
  },
};

fn print_essentials(opts: &CliOpts) {
  info!("Starting validator node");
  info!("Version: {}", env!("CARGO_PKG_VERSION"));
  info!("Listen addresses: {:?}", opts.listen_multiaddrs());
  info!("Validator address: {}", opts.keypair.address());
  info!("Data directory: {}", opts.data_dir.display());
  info!("P2P identity: {}", opts.p2p_identity().public().to_peer_id());
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
  let opts = CliOpts::parse();

  let loglevel = match opts.verbose {
    1 => Level::DEBUG,
    2.. => Level::TRACE,
    _ => Level::INFO,
  };
  tracing_subscriber::registry()
    .with(tracing_subscriber::fmt::layer().with_filter(filter_fn(
      move |metadata| {
        !metadata.target().starts_with("netlink")
          && metadata.level() <= &loglevel
      },
    )))
    .init();

  print_essentials(&opts);

  let genesis = opts.genesis()?;
  info!("genesis hash: {}", genesis.hash());

  let authorizer = validator_set_authorizer(
    genesis.validators.iter().map(|v| v.address).collect(),
  );
  let (commands, events) = swarm::spawn(
    &opts.keypair,
    &genesis.chain_id,
    opts.listen_multiaddrs(),
    opts.peers(),
    authorizer,
  )
  .await?;
  let network = Network::new(commands, events);

  let store = Arc::new(SledBlockchainStore::open(
    opts.data_dir.join("chain.db"),
  )?);
  let dapp = Arc::new(InMemoryDapp::new());
  let consumers = Arc::new(BlockConsumers::new(vec![]));

  let node = Node::new(
    &genesis,
    Some(opts.keypair.clone()),
    store,
    dapp,
    consumers,
    network,
    genesis.step_timeouts(),
    Duration::from_secs(60),
    PoolLimits::default(),
  )
  .await?;

  if let Some(addr) = opts.rpc {
    ApiService::spawn(addr, node.handle());
  }

  node.run().await;
  Ok(())
}
