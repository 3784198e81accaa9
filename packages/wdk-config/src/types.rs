use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct Config {
	pub service: Service,
	pub storage: Storage,
	#[serde(default)]
	pub vocabulary: Vocabulary,
	#[serde(default)]
	pub strategy: Strategy,
}

#[derive(Debug, Deserialize)]
pub struct Service {
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

#[derive(Debug, Deserialize)]
pub struct Storage {
	pub postgres: Postgres,
}

#[derive(Debug, Deserialize)]
pub struct Postgres {
	pub dsn: String,
	pub pool_max_conns: u32,
}

#[derive(Debug, Deserialize)]
pub struct Vocabulary {
	#[serde(default = "default_cache_max_entries")]
	pub cache_max_entries: usize,
	#[serde(default = "default_cache_ttl_seconds")]
	pub cache_ttl_seconds: u64,
}
impl Default for Vocabulary {
	fn default() -> Self {
		Self {
			cache_max_entries: default_cache_max_entries(),
			cache_ttl_seconds: default_cache_ttl_seconds(),
		}
	}
}

#[derive(Debug, Deserialize)]
pub struct Strategy {
	/// Reject mutations that arrive without a strategy checksum.
	#[serde(default)]
	pub require_checksum: bool,
	#[serde(default = "default_max_custom_name_chars")]
	pub max_custom_name_chars: usize,
}
impl Default for Strategy {
	fn default() -> Self {
		Self { require_checksum: false, max_custom_name_chars: default_max_custom_name_chars() }
	}
}

/// Upper bound of the persisted step name columns.
pub const NAME_COLUMN_MAX_SIZE: usize = 200;

fn default_log_level() -> String {
	"info".to_string()
}

fn default_cache_max_entries() -> usize {
	1_024
}

fn default_cache_ttl_seconds() -> u64 {
	600
}

fn default_max_custom_name_chars() -> usize {
	NAME_COLUMN_MAX_SIZE
}
