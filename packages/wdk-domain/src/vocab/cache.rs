use std::{
	collections::{BTreeMap, HashMap},
	sync::{Arc, Mutex},
};

use time::{Duration, OffsetDateTime};

use crate::{Error, Result, param::ParamDefinition, vocab::VocabularyInstance};

struct CacheEntry {
	instance: Arc<VocabularyInstance>,
	inserted_at: OffsetDateTime,
	expires_at: OffsetDateTime,
}

/// Vocabulary instances shared across requests and users, bounded by entry count and age.
pub struct VocabCache {
	entries: Mutex<HashMap<String, CacheEntry>>,
	max_entries: usize,
	ttl: Duration,
}
impl VocabCache {
	pub fn new(max_entries: usize, ttl: Duration) -> Self {
		Self { entries: Mutex::new(HashMap::new()), max_entries: max_entries.max(1), ttl }
	}

	/// Hashes every field that changes the computed vocabulary, so per-context clones of the
	/// same param never share an entry unless they would compute the same instance.
	pub fn key(
		param: &ParamDefinition,
		depended_values: &BTreeMap<String, String>,
	) -> Result<String> {
		let payload = serde_json::json!({
			"kind": "vocabulary",
			"param": param.full_name,
			"param_kind": param.kind,
			"default_value": param.default_value,
			"no_translation": param.no_translation,
			"depended": depended_values,
		});
		let raw = serde_json::to_vec(&payload).map_err(|err| {
			Error::model(format!("Failed to encode vocabulary cache key payload: {err}"))
		})?;

		Ok(blake3::hash(&raw).to_hex().to_string())
	}

	pub fn get(&self, key: &str) -> Option<Arc<VocabularyInstance>> {
		self.get_at(key, OffsetDateTime::now_utc())
	}

	pub fn insert(&self, key: String, instance: Arc<VocabularyInstance>) {
		self.insert_at(key, instance, OffsetDateTime::now_utc());
	}

	pub fn len(&self) -> usize {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).len()
	}

	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn clear(&self) {
		self.entries.lock().unwrap_or_else(|err| err.into_inner()).clear();
	}

	fn get_at(&self, key: &str, now: OffsetDateTime) -> Option<Arc<VocabularyInstance>> {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		match entries.get(key) {
			Some(entry) if entry.expires_at > now => Some(entry.instance.clone()),
			Some(_) => {
				entries.remove(key);

				None
			},
			None => None,
		}
	}

	fn insert_at(&self, key: String, instance: Arc<VocabularyInstance>, now: OffsetDateTime) {
		let mut entries = self.entries.lock().unwrap_or_else(|err| err.into_inner());

		if !entries.contains_key(&key) && entries.len() >= self.max_entries {
			entries.retain(|_, entry| entry.expires_at > now);

			if entries.len() >= self.max_entries
				&& let Some(oldest) = entries
					.iter()
					.min_by_key(|(_, entry)| entry.inserted_at)
					.map(|(key, _)| key.clone())
			{
				entries.remove(&oldest);
			}
		}

		entries.insert(key, CacheEntry { instance, inserted_at: now, expires_at: now + self.ttl });
	}
}
