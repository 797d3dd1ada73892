// Copyright (c) databroker.dev 2025
// This file is licensed under the MIT

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use databroker_server::{Broker, BrokerConfig};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Local real-time key/value data broker.
#[derive(Debug, Parser)]
#[command(name = "databrokerd", version, about)]
struct Args {
	/// Address to listen on.
	#[arg(long, default_value = "127.0.0.1:8081")]
	bind: String,

	/// Directory for the file-tree and sqlite adapters.
	#[arg(long, default_value = "data")]
	data_dir: PathBuf,

	/// Keep-alive sweep interval in seconds.
	#[arg(long, default_value_t = 30)]
	keepalive_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
	let args = Args::parse();

	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("info,databroker=debug")),
		)
		.init();

	let config = BrokerConfig::new()
		.bind_addr(args.bind)
		.data_dir(args.data_dir)
		.keepalive_interval(Duration::from_secs(args.keepalive_secs));

	let broker = Broker::bind(config).await?;
	info!(addr = %broker.local_addr()?, "databroker listening");

	let handle = broker.handle();
	tokio::spawn(async move {
		if tokio::signal::ctrl_c().await.is_ok() {
			info!("shutdown signal received");
			handle.shutdown();
		}
	});

	broker.serve().await?;
	Ok(())
}
