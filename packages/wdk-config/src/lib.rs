mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Config, NAME_COLUMN_MAX_SIZE, Postgres, Service, Storage, Strategy, Vocabulary};

use std::{fs, path::Path};

pub fn load(path: &Path) -> Result<Config> {
	let raw = fs::read_to_string(path)
		.map_err(|err| Error::ReadConfig { path: path.to_path_buf(), source: err })?;

	let mut cfg: Config = toml::from_str(&raw)
		.map_err(|err| Error::ParseConfig { path: path.to_path_buf(), source: err })?;

	normalize(&mut cfg);

	validate(&cfg)?;

	Ok(cfg)
}

pub fn validate(cfg: &Config) -> Result<()> {
	if cfg.service.log_level.is_empty() {
		return Err(Error::Validation {
			message: "service.log_level must be non-empty.".to_string(),
		});
	}
	if !matches!(cfg.service.log_level.as_str(), "trace" | "debug" | "info" | "warn" | "error")
		&& !cfg.service.log_level.contains('=')
	{
		return Err(Error::Validation {
			message: "service.log_level must be a level name or a filter directive.".to_string(),
		});
	}
	if cfg.storage.postgres.dsn.trim().is_empty() {
		return Err(Error::Validation {
			message: "storage.postgres.dsn must be non-empty.".to_string(),
		});
	}
	if cfg.storage.postgres.pool_max_conns == 0 {
		return Err(Error::Validation {
			message: "storage.postgres.pool_max_conns must be greater than zero.".to_string(),
		});
	}
	if cfg.vocabulary.cache_max_entries == 0 {
		return Err(Error::Validation {
			message: "vocabulary.cache_max_entries must be greater than zero.".to_string(),
		});
	}
	if cfg.vocabulary.cache_ttl_seconds == 0 {
		return Err(Error::Validation {
			message: "vocabulary.cache_ttl_seconds must be greater than zero.".to_string(),
		});
	}
	if cfg.strategy.max_custom_name_chars == 0 {
		return Err(Error::Validation {
			message: "strategy.max_custom_name_chars must be greater than zero.".to_string(),
		});
	}
	if cfg.strategy.max_custom_name_chars > NAME_COLUMN_MAX_SIZE {
		return Err(Error::Validation {
			message: format!(
				"strategy.max_custom_name_chars must be {NAME_COLUMN_MAX_SIZE} or less."
			),
		});
	}

	Ok(())
}

fn normalize(cfg: &mut Config) {
	cfg.service.log_level = cfg.service.log_level.trim().to_ascii_lowercase();
	cfg.storage.postgres.dsn = cfg.storage.postgres.dsn.trim().to_string();
}
