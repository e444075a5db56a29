use std::{net::SocketAddr, path::PathBuf, time::Duration};

use educe::Educe;
use figment::{
	Figment,
	providers::{Env, Format, Toml, Yaml},
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize, Educe)]
#[educe(Default)]
pub struct PersistentConfig {
	pub server: ServerOpt,
}

#[derive(Debug, Deserialize, Serialize, Educe)]
#[educe(Default)]
pub struct ServerOpt {
	#[educe(Default(expression = "127.0.0.1:1080".parse().unwrap()))]
	pub listen_addr: SocketAddr,

	/// Worker threads; 0 means one per core.
	#[educe(Default = 0)]
	pub threads: usize,

	#[serde(with = "humantime_serde")]
	#[educe(Default(expression = Duration::from_secs(5)))]
	pub handshake_timeout: Duration,

	#[serde(with = "humantime_serde")]
	#[educe(Default(expression = Duration::from_secs(15)))]
	pub tcp_relay_timeout: Duration,

	#[serde(with = "humantime_serde")]
	#[educe(Default(expression = Duration::from_secs(15)))]
	pub udp_relay_timeout: Duration,

	#[educe(Default = AuthModeConfig::NoAuth)]
	pub auth: AuthModeConfig,

	#[educe(Default = false)]
	pub tcp_nodelay: bool,

	#[educe(Default = false)]
	pub bind_validate_accepted_conn: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Educe)]
#[educe(Default)]
pub enum AuthModeConfig {
	#[educe(Default)]
	NoAuth,
	Password {
		username: String,
		password: String,
	},
}

impl PersistentConfig {
	pub fn export_to_file(&self, file_path: &PathBuf, format: &str) -> eyre::Result<()> {
		use std::{fs, io::Write};

		match format.to_lowercase().as_str() {
			"yaml" => {
				let yaml_content = serde_yaml::to_string(&self)?;
				let mut file = fs::File::create(file_path)?;
				file.write_all(yaml_content.as_bytes())?;
			}
			"toml" => {
				let toml_content = toml::to_string_pretty(&self)?;
				let mut file = fs::File::create(file_path)?;
				file.write_all(toml_content.as_bytes())?;
			}
			_ => return Err(eyre::eyre!("Unsupported file format: {}", format)),
		}

		Ok(())
	}

	pub fn load(config_path: Option<String>, config_dir: Option<PathBuf>) -> eyre::Result<Self> {
		let mut figment = Figment::new();

		// Default configuration locations first, an explicit path wins.
		if let Some(config_dir) = config_dir {
			let config_file = config_dir.join("config.toml");
			if config_file.exists() {
				figment = figment.merge(Toml::file(config_file));
			}

			let config_file = config_dir.join("config.yaml");
			if config_file.exists() {
				figment = figment.merge(Yaml::file(config_file));
			}
		} else {
			let config_toml = std::path::Path::new("config.toml");
			if config_toml.exists() {
				figment = figment.merge(Toml::file(config_toml));
			}

			let config_yaml = std::path::Path::new("config.yaml");
			if config_yaml.exists() {
				figment = figment.merge(Yaml::file(config_yaml));
			}
		}

		if let Some(config_path) = config_path {
			if config_path.ends_with(".yaml") || config_path.ends_with(".yml") {
				figment = figment.merge(Yaml::file(config_path));
			} else {
				figment = figment.merge(Toml::file(config_path));
			}
		}

		// Environment variables override config files.
		figment = figment.merge(Env::prefixed("GALE_"));

		let config: PersistentConfig = figment.extract()?;

		Ok(config)
	}
}
