pub mod cache;
pub mod resolver;
pub mod tree;

pub use cache::VocabCache;
pub use resolver::{QueryError, QueryRow, QueryRunner, VocabularyResolver};
pub use tree::{TermNode, TermTree};

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

use crate::{
	Error, Result,
	param::{EnumSettings, ParamDefinition, SelectMode},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VocabTerm {
	pub term: String,
	pub internal: String,
	pub display: String,
	pub parent: Option<String>,
}

/// One row of a vocabulary fetch before validation.
#[derive(Clone, Debug, Default)]
pub struct RawTerm {
	pub term: Option<String>,
	pub internal: Option<String>,
	pub display: Option<String>,
	pub parent: Option<String>,
}

/// The valid terms of an enumerated param for one depended-value tuple.
#[derive(Clone, Debug)]
pub struct VocabularyInstance {
	param: String,
	terms: Vec<VocabTerm>,
	index: HashMap<String, usize>,
	tree: TermTree,
	default_value: Option<String>,
	depended_values: BTreeMap<String, String>,
}
impl VocabularyInstance {
	/// Validates the fetched rows and computes the tree and default. `source` names where the
	/// rows came from and only appears in errors.
	pub fn build(
		param: &ParamDefinition,
		source: &str,
		rows: Vec<RawTerm>,
		depended_values: BTreeMap<String, String>,
	) -> Result<Self> {
		let Some(settings) = param.enum_settings() else {
			return Err(Error::model(format!(
				"Param {} is a {} param and has no vocabulary.",
				param.full_name,
				param.kind.as_str()
			)));
		};

		if rows.is_empty() {
			let message = format!(
				"No item returned by the query [{source}] of FlatVocabParam [{}].",
				param.full_name
			);

			tracing::warn!(
				param = %param.full_name,
				query = source,
				depended = ?depended_values,
				"Vocabulary fetch returned no rows."
			);

			return Err(Error::model(message));
		}

		let mut terms = Vec::with_capacity(rows.len());
		let mut index = HashMap::with_capacity(rows.len());

		for row in rows {
			let term = required_column(param, source, "term", row.term)?;
			let internal = required_column(param, source, "internal", row.internal)?;
			let parent = row
				.parent
				.map(|parent| parent.trim().to_string())
				.filter(|parent| !parent.is_empty());

			reject_delimiter(param, "term", &term)?;

			if let Some(parent) = parent.as_deref() {
				reject_delimiter(param, "parent term", parent)?;
			}
			if index.contains_key(&term) {
				continue;
			}

			let display = row
				.display
				.map(|display| display.trim().to_string())
				.filter(|display| !display.is_empty())
				.unwrap_or_else(|| term.clone());

			index.insert(term.clone(), terms.len());
			terms.push(VocabTerm { term, internal, display, parent });
		}

		let mut tree = TermTree::build(&terms);

		if settings.suppress_node {
			tree = tree.suppress_single_child_branches();
		}

		let default_value = compute_default(param, settings, &terms, &index, &tree)?;

		Ok(Self {
			param: param.full_name.clone(),
			terms,
			index,
			tree,
			default_value,
			depended_values,
		})
	}

	pub fn param(&self) -> &str {
		&self.param
	}

	pub fn terms(&self) -> &[VocabTerm] {
		&self.terms
	}

	pub fn term_names(&self) -> impl Iterator<Item = &str> {
		self.terms.iter().map(|term| term.term.as_str())
	}

	pub fn contains(&self, term: &str) -> bool {
		self.index.contains_key(term)
	}

	pub fn get(&self, term: &str) -> Option<&VocabTerm> {
		self.index.get(term).map(|&position| &self.terms[position])
	}

	pub fn internal(&self, term: &str) -> Option<&str> {
		self.get(term).map(|term| term.internal.as_str())
	}

	pub fn display(&self, term: &str) -> Option<&str> {
		self.get(term).map(|term| term.display.as_str())
	}

	pub fn tree(&self) -> &TermTree {
		&self.tree
	}

	pub fn default_value(&self) -> Option<&str> {
		self.default_value.as_deref()
	}

	pub fn depended_values(&self) -> &BTreeMap<String, String> {
		&self.depended_values
	}

	pub fn to_json(&self) -> Value {
		let values: Vec<Value> = self
			.terms
			.iter()
			.map(|term| {
				serde_json::json!({
					"parent": term.parent,
					"term": term.term,
					"display": term.display,
				})
			})
			.collect();

		serde_json::json!({ "values": values })
	}
}

fn required_column(
	param: &ParamDefinition,
	source: &str,
	column: &str,
	value: Option<String>,
) -> Result<String> {
	match value {
		Some(value) => Ok(value.trim().to_string()),
		None => Err(Error::model(format!(
			"The {column} of a row returned by [{source}] for param {} is null.",
			param.full_name
		))),
	}
}

fn reject_delimiter(param: &ParamDefinition, label: &str, value: &str) -> Result<()> {
	if value.contains(',') {
		return Err(Error::model(format!(
			"The {label} '{value}' of param {} contains a comma, which is reserved as the value delimiter.",
			param.full_name
		)));
	}

	Ok(())
}

fn compute_default(
	param: &ParamDefinition,
	settings: &EnumSettings,
	terms: &[VocabTerm],
	index: &HashMap<String, usize>,
	tree: &TermTree,
) -> Result<Option<String>> {
	if let Some(declared) = param.default_value.as_deref().filter(|value| !value.is_empty()) {
		let pieces: Vec<&str> = if settings.multi_pick {
			declared.split(',').map(str::trim).collect()
		} else {
			vec![declared]
		};

		if let Some(piece) = pieces.iter().find(|piece| !index.contains_key(**piece)) {
			let message = format!(
				"The default value from model, '{declared}', is not a valid term for param {}, please double check this default value.",
				param.full_name
			);

			tracing::warn!(
				param = %param.full_name,
				term = *piece,
				"Model default is not a valid term."
			);

			if !param.is_dependent() {
				return Err(Error::model(message));
			}
		}

		return Ok(Some(declared.to_string()));
	}

	let value = match settings.effective_select_mode() {
		SelectMode::All =>
			terms.iter().map(|term| term.term.as_str()).collect::<Vec<_>>().join(","),
		SelectMode::First => tree.first_root_preorder().join(","),
		SelectMode::None => return Ok(None),
	};

	Ok(Some(value))
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use crate::{
		param::{EnumSettings, EnumSpec, FlatVocabSpec, ParamDefinition, ParamKind, SelectMode},
		vocab::{RawTerm, VocabularyInstance},
	};

	fn row(term: &str, parent: Option<&str>) -> RawTerm {
		RawTerm {
			term: Some(term.to_string()),
			internal: Some(format!("i_{term}")),
			display: None,
			parent: parent.map(str::to_string),
		}
	}

	fn flat_vocab(settings: EnumSettings) -> ParamDefinition {
		ParamDefinition::new(
			"params.organism",
			ParamKind::FlatVocab(FlatVocabSpec { settings, query_ref: "vq.organisms".to_string() }),
		)
	}

	fn tree_rows() -> Vec<RawTerm> {
		vec![row("A", None), row("B", Some("A")), row("C", Some("A")), row("D", None)]
	}

	#[test]
	fn first_mode_walks_the_first_root() {
		let settings = EnumSettings {
			multi_pick: true,
			select_mode: Some(SelectMode::First),
			..EnumSettings::default()
		};
		let instance =
			VocabularyInstance::build(&flat_vocab(settings), "vq", tree_rows(), BTreeMap::new())
				.expect("instance builds");

		assert_eq!(instance.default_value(), Some("A,B,C"));
	}

	#[test]
	fn all_mode_lists_every_term_once() {
		let settings = EnumSettings {
			multi_pick: true,
			select_mode: Some(SelectMode::All),
			..EnumSettings::default()
		};
		let mut rows = tree_rows();

		rows.push(row("A", None));

		let instance = VocabularyInstance::build(&flat_vocab(settings), "vq", rows, BTreeMap::new())
			.expect("instance builds");

		assert_eq!(instance.default_value(), Some("A,B,C,D"));
		assert_eq!(instance.terms().len(), 4);
	}

	#[test]
	fn none_mode_has_no_default() {
		let settings = EnumSettings {
			multi_pick: true,
			select_mode: Some(SelectMode::None),
			..EnumSettings::default()
		};
		let instance =
			VocabularyInstance::build(&flat_vocab(settings), "vq", tree_rows(), BTreeMap::new())
				.expect("instance builds");

		assert_eq!(instance.default_value(), None);
	}

	#[test]
	fn values_are_trimmed_and_display_falls_back_to_term() {
		let rows = vec![RawTerm {
			term: Some("  human ".to_string()),
			internal: Some(" 9606 ".to_string()),
			display: Some("   ".to_string()),
			parent: Some("  ".to_string()),
		}];
		let instance = VocabularyInstance::build(
			&flat_vocab(EnumSettings::default()),
			"vq",
			rows,
			BTreeMap::new(),
		)
		.expect("instance builds");
		let term = instance.get("human").expect("term is present");

		assert_eq!(term.internal, "9606");
		assert_eq!(term.display, "human");
		assert_eq!(term.parent, None);
	}

	#[test]
	fn commas_in_terms_or_parents_are_rejected() {
		let param = flat_vocab(EnumSettings::default());

		assert!(
			VocabularyInstance::build(&param, "vq", vec![row("a,b", None)], BTreeMap::new())
				.is_err()
		);
		assert!(
			VocabularyInstance::build(&param, "vq", vec![row("a", Some("x,y"))], BTreeMap::new())
				.is_err()
		);
	}

	#[test]
	fn null_columns_and_empty_fetches_are_model_errors() {
		let param = flat_vocab(EnumSettings::default());
		let rows = vec![RawTerm { term: Some("a".to_string()), ..RawTerm::default() }];

		assert!(VocabularyInstance::build(&param, "vq", rows, BTreeMap::new()).is_err());

		let err = VocabularyInstance::build(&param, "vq.organisms", Vec::new(), BTreeMap::new())
			.expect_err("empty fetch");

		assert!(
			err.to_string().contains("No item returned by the query [vq.organisms]"),
			"Unexpected error: {err}"
		);
	}

	#[test]
	fn invalid_model_default_fails_only_for_independent_params() {
		let independent = flat_vocab(EnumSettings::default()).with_default("Z");

		assert!(
			VocabularyInstance::build(&independent, "vq", tree_rows(), BTreeMap::new()).is_err()
		);

		let dependent = flat_vocab(EnumSettings::default())
			.with_default("Z")
			.with_depended_refs("project")
			.expect("refs parse");
		let instance = VocabularyInstance::build(&dependent, "vq", tree_rows(), BTreeMap::new())
			.expect("dependent default is only logged");

		assert_eq!(instance.default_value(), Some("Z"));
	}

	#[test]
	fn multi_pick_model_default_is_split_loosely() {
		let settings = EnumSettings { multi_pick: true, ..EnumSettings::default() };
		let param = flat_vocab(settings).with_default("A , D");
		let instance = VocabularyInstance::build(&param, "vq", tree_rows(), BTreeMap::new())
			.expect("default is valid");

		assert_eq!(instance.default_value(), Some("A , D"));
	}

	#[test]
	fn json_lists_every_term() {
		let param = ParamDefinition::new(
			"params.color",
			ParamKind::Enum(EnumSpec { settings: EnumSettings::default(), items: Vec::new() }),
		);
		let instance = VocabularyInstance::build(&param, "static", tree_rows(), BTreeMap::new())
			.expect("instance builds");
		let json = instance.to_json();

		assert_eq!(json["values"].as_array().map(Vec::len), Some(4));
		assert_eq!(json["values"][1]["parent"], "A");
		assert_eq!(json["values"][0]["parent"], serde_json::Value::Null);
	}
}
