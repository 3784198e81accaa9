use std::{
	cell::RefCell,
	collections::{BTreeMap, HashSet},
	sync::Arc,
};

use crate::{
	Error, Result,
	codec,
	param::{EnumItem, ParamContext, ParamDefinition, ParamKind},
	vocab::{RawTerm, VocabCache, VocabularyInstance},
};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryRow {
	columns: BTreeMap<String, Option<String>>,
}
impl QueryRow {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with(mut self, column: &str, value: Option<&str>) -> Self {
		self.columns.insert(column.to_string(), value.map(str::to_string));

		self
	}

	/// Value of a column; `None` when the column is absent or SQL NULL.
	pub fn get(&self, column: &str) -> Option<&str> {
		self.columns.get(column).and_then(|value| value.as_deref())
	}
}

#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct QueryError {
	pub message: String,
}
impl QueryError {
	pub fn new(message: impl Into<String>) -> Self {
		Self { message: message.into() }
	}
}

/// Executes a named backing query with stable param values on behalf of a user.
pub trait QueryRunner: Send + Sync {
	fn run_query(
		&self,
		user_id: i64,
		query_ref: &str,
		values: &BTreeMap<String, String>,
	) -> Result<Vec<QueryRow>, QueryError>;
}

/// Computes vocabularies and defaults for the enumerated params of one context.
///
/// The resolver is scoped to a single request: it carries the acting user explicitly and keeps
/// the stack of params currently being resolved, so a dependency loop that slipped past model
/// validation fails instead of recursing forever.
pub struct VocabularyResolver<'a> {
	context: &'a ParamContext,
	queries: &'a dyn QueryRunner,
	cache: Option<&'a VocabCache>,
	user_id: i64,
	resolving: RefCell<Vec<String>>,
}
impl<'a> VocabularyResolver<'a> {
	pub fn new(context: &'a ParamContext, queries: &'a dyn QueryRunner, user_id: i64) -> Self {
		Self { context, queries, cache: None, user_id, resolving: RefCell::new(Vec::new()) }
	}

	pub fn with_cache(mut self, cache: &'a VocabCache) -> Self {
		self.cache = Some(cache);

		self
	}

	pub fn context(&self) -> &ParamContext {
		self.context
	}

	pub fn user_id(&self) -> i64 {
		self.user_id
	}

	pub fn queries(&self) -> &dyn QueryRunner {
		self.queries
	}

	/// Resolves the vocabulary of `param_name`. Depended values missing from `values` are
	/// replaced by the depended param's own default.
	pub fn resolve(
		&self,
		param_name: &str,
		values: &BTreeMap<String, String>,
	) -> Result<Arc<VocabularyInstance>> {
		let param = self.context.require(param_name)?;

		if param.enum_settings().is_none() {
			return Err(Error::model(format!(
				"Param {} is a {} param and has no vocabulary.",
				param.full_name,
				param.kind.as_str()
			)));
		}

		self.enter(param)?;

		let result = self.resolve_entered(param, values);

		self.resolving.borrow_mut().pop();

		result
	}

	/// Default stable value of any param in the context.
	pub fn default_value(
		&self,
		param_name: &str,
		values: &BTreeMap<String, String>,
	) -> Result<Option<String>> {
		let param = self.context.require(param_name)?;

		if param.enum_settings().is_none() {
			return Ok(param.static_default());
		}

		Ok(self.resolve(param_name, values)?.default_value().map(str::to_string))
	}

	/// Keeps only the valid terms of `stable`, in order and without duplicates. Falls back to
	/// the default when nothing valid remains.
	pub fn valid_stable_value(
		&self,
		param_name: &str,
		stable: Option<&str>,
		values: &BTreeMap<String, String>,
	) -> Result<Option<String>> {
		let param = self.context.require(param_name)?;
		let instance = self.resolve(param_name, values)?;
		let default = instance.default_value().map(str::to_string);
		let Some(stable) = stable else {
			return Ok(default);
		};
		let mut seen = HashSet::new();
		let valid: Vec<String> = codec::convert_to_terms(param, stable)
			.into_iter()
			.filter(|term| instance.contains(term) && seen.insert(term.clone()))
			.collect();

		if valid.is_empty() {
			return Ok(default);
		}

		Ok(Some(valid.join(",")))
	}

	/// Corrects a whole value map in dependency order. Enumerated values are reduced to their
	/// valid terms against vocabularies computed from the already corrected depended values;
	/// other params keep their value or take their static default.
	pub fn fetch_correct_values(
		&self,
		values: &BTreeMap<String, String>,
	) -> Result<BTreeMap<String, String>> {
		let mut corrected = BTreeMap::new();

		for param in self.context.resolution_order() {
			let value = if param.enum_settings().is_some() {
				self.valid_stable_value(
					&param.name,
					values.get(&param.name).map(String::as_str),
					&corrected,
				)?
			} else {
				values.get(&param.name).cloned().or_else(|| param.static_default())
			};

			if let Some(value) = value {
				corrected.insert(param.name.clone(), value);
			}
		}

		Ok(corrected)
	}

	/// Every term the param can take over all combinations of its depended params' values.
	/// Combinations whose vocabulary cannot be computed are skipped.
	pub fn all_values(&self, param_name: &str) -> Result<Vec<String>> {
		let param = self.context.require(param_name)?;
		let mut axes: Vec<(String, Vec<String>)> = Vec::new();

		for depended in self.context.depended_params(param_name) {
			let choices = if depended.enum_settings().is_some() {
				self.all_values(&depended.name)?
			} else {
				match depended.static_default() {
					Some(value) => vec![value],
					None => Vec::new(),
				}
			};

			axes.push((depended.name.clone(), choices));
		}

		let mut seen = HashSet::new();
		let mut out = Vec::new();

		for tuple in cartesian_product(&axes) {
			match self.resolve(param_name, &tuple) {
				Ok(instance) =>
					for term in instance.term_names() {
						if seen.insert(term.to_string()) {
							out.push(term.to_string());
						}
					},
				Err(err) => {
					tracing::warn!(
						param = %param.full_name,
						depended = ?tuple,
						error = %err,
						"Skipping depended value combination."
					);
				},
			}
		}

		Ok(out)
	}

	fn enter(&self, param: &ParamDefinition) -> Result<()> {
		let mut resolving = self.resolving.borrow_mut();

		if resolving.iter().any(|name| name == &param.name) {
			return Err(Error::model(format!(
				"Param {} was re-entered while resolving [{}].",
				param.full_name,
				resolving.join(" -> ")
			)));
		}

		resolving.push(param.name.clone());

		Ok(())
	}

	fn resolve_entered(
		&self,
		param: &ParamDefinition,
		values: &BTreeMap<String, String>,
	) -> Result<Arc<VocabularyInstance>> {
		let mut depended_values = BTreeMap::new();

		for depended in self.context.depended_params(&param.name) {
			let value = match values.get(&depended.name) {
				Some(value) => Some(value.clone()),
				None => self.default_value(&depended.name, values)?,
			};
			let Some(value) = value else {
				return Err(Error::NoDependedValue {
					param: param.full_name.clone(),
					depended: depended.full_name.clone(),
				});
			};

			depended_values.insert(depended.name.clone(), value);
		}

		let key = match self.cache {
			Some(cache) => {
				let key = VocabCache::key(param, &depended_values)?;

				if let Some(instance) = cache.get(&key) {
					tracing::debug!(param = %param.full_name, "Vocabulary cache hit.");

					return Ok(instance);
				}

				tracing::debug!(param = %param.full_name, "Vocabulary cache miss.");

				Some(key)
			},
			None => None,
		};
		let (source, rows) = self.fetch(param, &depended_values)?;
		let instance = Arc::new(VocabularyInstance::build(param, &source, rows, depended_values)?);

		if let (Some(cache), Some(key)) = (self.cache, key) {
			cache.insert(key, instance.clone());
		}

		Ok(instance)
	}

	fn fetch(
		&self,
		param: &ParamDefinition,
		depended_values: &BTreeMap<String, String>,
	) -> Result<(String, Vec<RawTerm>)> {
		match &param.kind {
			ParamKind::Enum(spec) => {
				let rows = spec
					.items
					.iter()
					.filter(|item| item_applies(item, depended_values))
					.map(|item| RawTerm {
						term: Some(item.term.clone()),
						internal: Some(item.internal.clone()),
						display: item.display.clone(),
						parent: item.parent_term.clone(),
					})
					.collect();

				Ok((format!("enum {}", param.full_name), rows))
			},
			ParamKind::FlatVocab(spec) => {
				let rows = self
					.queries
					.run_query(self.user_id, &spec.query_ref, depended_values)
					.map_err(|err| Error::Query {
						query: spec.query_ref.clone(),
						param: param.full_name.clone(),
						message: err.message,
					})?;
				let rows = rows
					.into_iter()
					.map(|row| RawTerm {
						term: row.get("term").map(str::to_string),
						internal: row.get("internal").map(str::to_string),
						display: row.get("display").map(str::to_string),
						parent: row.get("parentTerm").map(str::to_string),
					})
					.collect();

				Ok((spec.query_ref.clone(), rows))
			},
			_ => Err(Error::model(format!(
				"Param {} is a {} param and has no vocabulary.",
				param.full_name,
				param.kind.as_str()
			))),
		}
	}
}

/// A static item applies when it declares no depended values or one of them is among the
/// current values of the depended params.
fn item_applies(item: &EnumItem, depended_values: &BTreeMap<String, String>) -> bool {
	if item.depended_values.is_empty() {
		return true;
	}

	depended_values
		.values()
		.flat_map(|value| value.split(','))
		.map(str::trim)
		.any(|value| item.depended_values.iter().any(|candidate| candidate == value))
}

fn cartesian_product(axes: &[(String, Vec<String>)]) -> Vec<BTreeMap<String, String>> {
	let mut tuples = vec![BTreeMap::new()];

	for (name, choices) in axes {
		let mut next = Vec::with_capacity(tuples.len() * choices.len());

		for tuple in &tuples {
			for choice in choices {
				let mut extended = tuple.clone();

				extended.insert(name.clone(), choice.clone());
				next.push(extended);
			}
		}

		tuples = next;
	}

	tuples
}

#[cfg(test)]
mod tests {
	use std::{
		collections::BTreeMap,
		sync::{
			Mutex,
			atomic::{AtomicUsize, Ordering},
		},
	};

	use time::Duration;

	use crate::{
		param::{
			EnumItem, EnumSettings, EnumSpec, FlatVocabSpec, ParamContext, ParamDefinition,
			ParamKind, SelectMode,
		},
		vocab::{QueryError, QueryRow, QueryRunner, VocabCache, VocabularyResolver},
	};

	/// Returns genes for the organism named in the values, counting calls.
	#[derive(Default)]
	struct GeneQueries {
		calls: AtomicUsize,
		seen_users: Mutex<Vec<i64>>,
	}
	impl QueryRunner for GeneQueries {
		fn run_query(
			&self,
			user_id: i64,
			query_ref: &str,
			values: &BTreeMap<String, String>,
		) -> Result<Vec<QueryRow>, QueryError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			self.seen_users.lock().unwrap_or_else(|err| err.into_inner()).push(user_id);

			if query_ref != "vq.genes" {
				return Err(QueryError::new(format!("unknown query {query_ref}")));
			}

			let genes: &[&str] = match values.get("organism").map(String::as_str) {
				Some("human") => &["BRCA1", "TP53"],
				Some("mouse") => &["Trp53"],
				_ => &[],
			};

			Ok(genes
				.iter()
				.map(|gene| QueryRow::new().with("term", Some(gene)).with("internal", Some(gene)))
				.collect())
		}
	}

	fn organism() -> ParamDefinition {
		ParamDefinition::new(
			"params.organism",
			ParamKind::Enum(EnumSpec {
				settings: EnumSettings::default(),
				items: vec![EnumItem::new("human", "9606"), EnumItem::new("mouse", "10090")],
			}),
		)
	}

	fn gene(settings: EnumSettings) -> ParamDefinition {
		ParamDefinition::new(
			"params.gene",
			ParamKind::FlatVocab(FlatVocabSpec { settings, query_ref: "vq.genes".to_string() }),
		)
		.with_depended_refs("organism")
		.expect("refs parse")
	}

	fn context(settings: EnumSettings) -> ParamContext {
		ParamContext::build("q.genes", vec![gene(settings), organism()]).expect("context builds")
	}

	fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
		pairs.iter().map(|(key, value)| (key.to_string(), value.to_string())).collect()
	}

	#[test]
	fn missing_depended_value_uses_its_default() {
		let context = context(EnumSettings::default());
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 7);
		let implicit = resolver.resolve("gene", &BTreeMap::new()).expect("resolves");
		let explicit = resolver.resolve("gene", &values(&[("organism", "human")])).expect("resolves");

		assert_eq!(implicit.terms(), explicit.terms());
		assert_eq!(implicit.depended_values(), explicit.depended_values());
		assert_eq!(
			*queries.seen_users.lock().unwrap_or_else(|err| err.into_inner()),
			vec![7, 7]
		);
	}

	#[test]
	fn depended_value_without_default_is_an_error() {
		let organism = ParamDefinition::new(
			"params.organism",
			ParamKind::String(crate::param::StringSpec::default()),
		);
		let context =
			ParamContext::build("q", vec![gene(EnumSettings::default()), organism]).expect("builds");
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 1);
		let err = resolver.resolve("gene", &BTreeMap::new()).expect_err("no depended value");

		assert!(matches!(err, crate::Error::NoDependedValue { .. }), "Unexpected error: {err:?}");
	}

	#[test]
	fn zero_rows_is_a_model_error() {
		let context = context(EnumSettings::default());
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 1);
		let err = resolver
			.resolve("gene", &values(&[("organism", "zebrafish")]))
			.expect_err("no rows");

		assert!(matches!(err, crate::Error::Model { .. }), "Unexpected error: {err:?}");
	}

	#[test]
	fn cache_serves_repeated_resolutions() {
		let context = context(EnumSettings::default());
		let queries = GeneQueries::default();
		let cache = VocabCache::new(16, Duration::minutes(5));
		let resolver = VocabularyResolver::new(&context, &queries, 1).with_cache(&cache);
		let first = resolver.resolve("gene", &values(&[("organism", "mouse")])).expect("resolves");
		let second = resolver.resolve("gene", &values(&[("organism", "mouse")])).expect("resolves");

		assert_eq!(first.terms(), second.terms());
		assert_eq!(queries.calls.load(Ordering::SeqCst), 1);
	}

	#[test]
	fn invalid_terms_are_dropped_from_stable_values() {
		let settings = EnumSettings { multi_pick: true, ..EnumSettings::default() };
		let context = context(settings);
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 1);
		let human = values(&[("organism", "human")]);
		let kept = resolver
			.valid_stable_value("gene", Some("TP53,Trp53, TP53,BRCA1"), &human)
			.expect("corrects");
		let fallback =
			resolver.valid_stable_value("gene", Some("Trp53"), &human).expect("corrects");

		assert_eq!(kept.as_deref(), Some("TP53,BRCA1"));
		assert_eq!(fallback.as_deref(), Some("BRCA1"));
	}

	#[test]
	fn correct_values_follow_dependency_order() {
		let context = context(EnumSettings::default());
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 1);
		let corrected = resolver
			.fetch_correct_values(&values(&[("organism", "mouse"), ("gene", "BRCA1")]))
			.expect("corrects");

		assert_eq!(corrected.get("organism").map(String::as_str), Some("mouse"));
		assert_eq!(corrected.get("gene").map(String::as_str), Some("Trp53"));
	}

	#[test]
	fn all_values_spans_every_depended_value() {
		let context = context(EnumSettings::default());
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 1);

		assert_eq!(
			resolver.all_values("gene").expect("enumerates"),
			vec!["BRCA1".to_string(), "TP53".to_string(), "Trp53".to_string()]
		);
	}

	#[test]
	fn static_items_filter_on_depended_values() {
		let organism = organism();
		let strain = ParamDefinition::new(
			"params.strain",
			ParamKind::Enum(EnumSpec {
				settings: EnumSettings {
					multi_pick: true,
					select_mode: Some(SelectMode::All),
					..EnumSettings::default()
				},
				items: vec![
					EnumItem {
						depended_values: vec!["human".to_string()],
						..EnumItem::new("HeLa", "1")
					},
					EnumItem {
						depended_values: vec!["mouse".to_string()],
						..EnumItem::new("C57", "2")
					},
					EnumItem::new("any", "3"),
				],
			}),
		)
		.with_depended_refs("organism")
		.expect("refs parse");
		let context = ParamContext::build("q", vec![organism, strain]).expect("builds");
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 1);
		let instance = resolver.resolve("strain", &values(&[("organism", "mouse")])).expect("resolves");

		assert_eq!(instance.default_value(), Some("C57,any"));
	}

	#[test]
	fn query_failures_carry_context() {
		let settings = EnumSettings::default();
		let broken = ParamDefinition::new(
			"params.broken",
			ParamKind::FlatVocab(FlatVocabSpec { settings, query_ref: "vq.missing".to_string() }),
		);
		let context = ParamContext::build("q", vec![broken]).expect("builds");
		let queries = GeneQueries::default();
		let resolver = VocabularyResolver::new(&context, &queries, 1);
		let err = resolver.resolve("broken", &BTreeMap::new()).expect_err("query fails");

		assert!(err.to_string().contains("vq.missing"), "Unexpected error: {err}");
		assert!(err.to_string().contains("params.broken"), "Unexpected error: {err}");
	}
}
