use std::{path::PathBuf, str::FromStr, sync::Arc};

use clap::Parser as _;
use gale_socks::server::{Server, ServerBuilder};
use tracing::{Level, info};

use crate::{
	cli::{Cli, Commands, ConfigFormat},
	conf::persistent::{AuthModeConfig, PersistentConfig},
};

mod cli;
mod conf;
mod log;

// curl --socks5 127.0.0.1:1080 bing.com
fn main() -> eyre::Result<()> {
	let cli = match Cli::try_parse() {
		Ok(v) => v,
		Err(err) => {
			println!("{:#}", err);
			return Ok(());
		}
	};

	if cli.version {
		const VER: &str = match option_env!("GALE_OVERRIDE_VERSION") {
			Some(v) => v,
			None => env!("CARGO_PKG_VERSION"),
		};
		println!("gale {VER}");
		return Ok(());
	}

	if let Some(Commands::Init { format }) = &cli.command {
		let (name, format) = match format {
			ConfigFormat::Yaml => ("config.yaml", "yaml"),
			ConfigFormat::Toml => ("config.toml", "toml"),
		};
		PersistentConfig::default().export_to_file(&PathBuf::from(name), format)?;
		println!("wrote default configuration to {name}");
		return Ok(());
	}

	let level = Level::from_str(&cli.log_level)?;
	log::init_log(level)?;

	let config = PersistentConfig::load(cli.config.clone(), cli.config_dir.clone())?;
	let threads = match config.server.threads {
		0 => std::thread::available_parallelism().map(Into::into).unwrap_or(1),
		threads => threads,
	};
	let server = Arc::new(build_server(&config, threads)?);

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.worker_threads(threads)
		.enable_all()
		.build()?;
	runtime.block_on(serve(server))
}

fn build_server(config: &PersistentConfig, threads: usize) -> eyre::Result<Server> {
	let opt = &config.server;
	let mut builder = ServerBuilder::new(opt.listen_addr)
		.threads(threads)
		.handshake_timeout(opt.handshake_timeout)
		.tcp_relay_timeout(opt.tcp_relay_timeout)
		.udp_relay_timeout(opt.udp_relay_timeout)
		.enable_tcp_nodelay(opt.tcp_nodelay)
		.bind_validate_accepted_conn(opt.bind_validate_accepted_conn);
	if let AuthModeConfig::Password { username, password } = &opt.auth {
		builder = builder
			.enable_user_auth(true)
			.auth_username(username.clone())
			.auth_password(password.clone());
	}
	Ok(builder.build()?)
}

async fn serve(server: Arc<Server>) -> eyre::Result<()> {
	info!("gale starting");
	server.run().await?;
	tokio::signal::ctrl_c().await?;
	info!(
		recv_bytes = server.recv_bytes_total(),
		sent_bytes = server.sent_bytes_total(),
		"shutting down"
	);
	server.stop();
	server.wait().await;
	Ok(())
}
