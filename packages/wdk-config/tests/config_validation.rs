use std::{
	env, fs,
	path::PathBuf,
	sync::atomic::{AtomicU64, Ordering},
	time::{SystemTime, UNIX_EPOCH},
};

use toml::Value;

use wdk_config::{Config, Error};

const SAMPLE_CONFIG_TEMPLATE_TOML: &str = include_str!("fixtures/sample_config.template.toml");

fn sample_toml_with(section: &str, key: &str, value: Value) -> String {
	let mut root: Value =
		toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse template config.");
	let table = root.as_table_mut().expect("Template config must be a table.");
	let mut target = table;

	for part in section.split('.') {
		target = target
			.get_mut(part)
			.and_then(Value::as_table_mut)
			.unwrap_or_else(|| panic!("Template config must include [{section}]."));
	}

	target.insert(key.to_string(), value);

	toml::to_string(&root).expect("Failed to render template config.")
}

fn write_temp_config(payload: String) -> PathBuf {
	static COUNTER: AtomicU64 = AtomicU64::new(0);

	let nanos = SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.expect("System time must be valid.")
		.as_nanos();
	let ordinal = COUNTER.fetch_add(1, Ordering::SeqCst);
	let pid = std::process::id();
	let mut path = env::temp_dir();

	path.push(format!("wdk_config_test_{nanos}_{pid}_{ordinal}.toml"));

	fs::write(&path, payload).expect("Failed to write test config.");

	path
}

fn base_config() -> Config {
	toml::from_str(SAMPLE_CONFIG_TEMPLATE_TOML).expect("Failed to parse test config.")
}

#[test]
fn sample_config_loads() {
	let path = write_temp_config(SAMPLE_CONFIG_TEMPLATE_TOML.to_string());
	let result = wdk_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Expected sample config to load.");

	assert_eq!(cfg.vocabulary.cache_max_entries, 1_024);
	assert_eq!(cfg.strategy.max_custom_name_chars, 200);
	assert!(!cfg.strategy.require_checksum);
}

#[test]
fn optional_sections_fall_back_to_defaults() {
	let payload = "\
[service]

[storage.postgres]
dsn = \"postgres://localhost/wdk\"
pool_max_conns = 1
";
	let path = write_temp_config(payload.to_string());
	let result = wdk_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let cfg = result.expect("Expected minimal config to load.");

	assert_eq!(cfg.service.log_level, "info");
	assert_eq!(cfg.vocabulary.cache_ttl_seconds, 600);
	assert_eq!(cfg.strategy.max_custom_name_chars, wdk_config::NAME_COLUMN_MAX_SIZE);
}

#[test]
fn log_level_is_normalized() {
	let payload = sample_toml_with("service", "log_level", Value::String("  WARN ".to_string()));
	let path = write_temp_config(payload);
	let result = wdk_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	assert_eq!(result.expect("Expected config to load.").service.log_level, "warn");
}

#[test]
fn unknown_log_level_is_rejected() {
	let mut cfg = base_config();

	cfg.service.log_level = "loud".to_string();

	let err = wdk_config::validate(&cfg).expect_err("Expected log level validation error.");

	assert!(
		err.to_string().contains("service.log_level must be a level name"),
		"Unexpected error: {err}"
	);
}

#[test]
fn cache_bounds_must_be_positive() {
	let payload = sample_toml_with("vocabulary", "cache_max_entries", Value::Integer(0));
	let path = write_temp_config(payload);
	let result = wdk_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected cache size validation error.");

	assert!(
		err.to_string().contains("vocabulary.cache_max_entries must be greater than zero."),
		"Unexpected error: {err}"
	);

	let mut cfg = base_config();

	cfg.vocabulary.cache_ttl_seconds = 0;

	let err = wdk_config::validate(&cfg).expect_err("Expected cache TTL validation error.");

	assert!(
		err.to_string().contains("vocabulary.cache_ttl_seconds must be greater than zero."),
		"Unexpected error: {err}"
	);
}

#[test]
fn custom_name_limit_cannot_exceed_column_size() {
	let mut cfg = base_config();

	cfg.strategy.max_custom_name_chars = 201;

	let err = wdk_config::validate(&cfg).expect_err("Expected name limit validation error.");

	assert!(
		err.to_string().contains("strategy.max_custom_name_chars must be 200 or less."),
		"Unexpected error: {err}"
	);
}

#[test]
fn unreadable_path_reports_read_error() {
	let mut path = env::temp_dir();

	path.push("wdk_config_test_missing_file.toml");

	let err = wdk_config::load(&path).expect_err("Expected read error.");

	assert!(matches!(err, Error::ReadConfig { .. }), "Unexpected error: {err:?}");
}

#[test]
fn malformed_toml_reports_parse_error() {
	let path = write_temp_config("[service\nlog_level = ".to_string());
	let result = wdk_config::load(&path);

	fs::remove_file(&path).expect("Failed to remove test config.");

	let err = result.expect_err("Expected parse error.");

	assert!(matches!(err, Error::ParseConfig { .. }), "Unexpected error: {err:?}");
}
