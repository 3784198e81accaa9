pub mod context;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{Error, Result};

pub use context::ParamContext;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParamDefinition {
	pub name: String,
	pub full_name: String,
	pub prompt: String,
	pub help: Option<String>,
	pub default_value: Option<String>,
	pub allow_empty: bool,
	pub empty_value: Option<String>,
	pub visible: bool,
	pub group: Option<String>,
	pub no_translation: bool,
	/// Names of the params whose values must be known before this param's vocabulary can be
	/// computed, in declaration order.
	pub depended_refs: Vec<String>,
	pub kind: ParamKind,
}
impl ParamDefinition {
	pub fn new(full_name: &str, kind: ParamKind) -> Self {
		let name = full_name.rsplit('.').next().unwrap_or(full_name).to_string();

		Self {
			prompt: name.clone(),
			name,
			full_name: full_name.to_string(),
			help: None,
			default_value: None,
			allow_empty: false,
			empty_value: None,
			visible: true,
			group: None,
			no_translation: false,
			depended_refs: Vec::new(),
			kind,
		}
	}

	pub fn with_prompt(mut self, prompt: &str) -> Self {
		self.prompt = prompt.to_string();

		self
	}

	pub fn with_default(mut self, default_value: &str) -> Self {
		self.default_value = Some(default_value.to_string());

		self
	}

	pub fn with_empty_value(mut self, empty_value: Option<&str>) -> Self {
		self.allow_empty = true;
		self.empty_value = empty_value.map(str::to_string);

		self
	}

	pub fn with_no_translation(mut self) -> Self {
		self.no_translation = true;

		self
	}

	/// Sets the depended params from the comma separated form used by model files.
	pub fn with_depended_refs(mut self, raw: &str) -> Result<Self> {
		self.depended_refs = parse_depended_refs(&self.full_name, raw)?;

		Ok(self)
	}

	pub fn is_dependent(&self) -> bool {
		!self.depended_refs.is_empty()
	}

	pub fn is_answer(&self) -> bool {
		matches!(self.kind, ParamKind::Answer)
	}

	pub fn enum_settings(&self) -> Option<&EnumSettings> {
		match &self.kind {
			ParamKind::Enum(spec) => Some(&spec.settings),
			ParamKind::FlatVocab(spec) => Some(&spec.settings),
			_ => None,
		}
	}

	fn enum_settings_mut(&mut self) -> Option<&mut EnumSettings> {
		match &mut self.kind {
			ParamKind::Enum(spec) => Some(&mut spec.settings),
			ParamKind::FlatVocab(spec) => Some(&mut spec.settings),
			_ => None,
		}
	}

	/// Default declared by the model, completed with the kind-specific fallback for params
	/// that do not need a vocabulary.
	pub fn static_default(&self) -> Option<String> {
		let declared = self.default_value.as_deref().filter(|value| !value.is_empty());

		match &self.kind {
			ParamKind::NumberRange(spec) => match declared {
				Some(value) => Some(value.to_string()),
				None => {
					let json = serde_json::json!({ "min": spec.min, "max": spec.max });

					Some(json.to_string())
				},
			},
			ParamKind::Date(spec) => declared.map(str::to_string).or_else(|| spec.min_date.clone()),
			_ => declared.map(str::to_string),
		}
	}

	/// Structural checks that do not need the rest of the context.
	pub fn check(&self) -> Result<()> {
		if self.depended_refs.iter().any(|name| name == &self.name) {
			return Err(Error::model(format!("Param {} cannot depend on itself.", self.full_name)));
		}

		match &self.kind {
			ParamKind::Enum(EnumSpec { settings, .. })
			| ParamKind::FlatVocab(FlatVocabSpec { settings, .. }) => {
				if settings.display_type == Some(DisplayType::TreeBox) && !settings.multi_pick {
					return Err(Error::model(format!(
						"Param {} uses treeBox display but is not multi-pick.",
						self.full_name
					)));
				}

				if let (Some(min), Some(max)) =
					(settings.min_selected_count, settings.max_selected_count)
					&& min > max
				{
					return Err(Error::model(format!(
						"Param {} has minSelectedCount {min} greater than maxSelectedCount {max}.",
						self.full_name
					)));
				}
			},
			ParamKind::String(StringSpec { regex: Some(pattern), .. })
			| ParamKind::Date(DateSpec { regex: Some(pattern), .. }) => {
				regex::Regex::new(pattern).map_err(|err| {
					Error::model(format!("Param {} has an invalid regex: {err}", self.full_name))
				})?;
			},
			ParamKind::Number(NumberSpec { min: Some(min), max: Some(max), .. })
			| ParamKind::NumberRange(NumberRangeSpec { min: Some(min), max: Some(max), .. })
				if min > max =>
			{
				return Err(Error::model(format!(
					"Param {} declares a minimum greater than its maximum.",
					self.full_name
				)));
			},
			ParamKind::Filter(spec) =>
				if spec.metadata_query_ref.trim().is_empty()
					|| spec.ontology_query_ref.trim().is_empty()
				{
					return Err(Error::model(format!(
						"Filter param {} must reference both an ontology and a metadata query.",
						self.full_name
					)));
				},
			_ => {},
		}

		Ok(())
	}

	/// Clones the definition with the overrides declared where a question or query references
	/// it. The shared definition is never modified.
	pub fn with_overrides(&self, overrides: &ParamOverride) -> Result<Self> {
		let mut param = self.clone();

		if let Some(value) = overrides.default_value.as_ref() {
			param.default_value = Some(value.clone());
		}
		if let Some(value) = overrides.allow_empty {
			param.allow_empty = value;
		}
		if let Some(value) = overrides.empty_value.as_ref() {
			param.empty_value = Some(value.clone());
		}
		if let Some(value) = overrides.no_translation {
			param.no_translation = value;
		}
		if let Some(value) = overrides.visible {
			param.visible = value;
		}
		if let Some(value) = overrides.help.as_ref() {
			param.help = Some(value.clone());
		}
		if let Some(value) = overrides.prompt.as_ref() {
			param.prompt = value.clone();
		}
		if let Some(value) = overrides.group.as_ref() {
			param.group = Some(value.clone());
		}
		if let Some(value) = overrides.number {
			match &mut param.kind {
				ParamKind::String(spec) => spec.number = value,
				_ => return Err(override_mismatch(&param, "number")),
			}
		}

		let full_name = param.full_name.clone();
		let enum_overrides = [
			("multiPick", overrides.multi_pick.is_some()),
			("quote", overrides.quote.is_some()),
			("displayType", overrides.display_type.is_some()),
			("selectMode", overrides.select_mode.is_some()),
			("suppressNode", overrides.suppress_node.is_some()),
			("minSelectedCount", overrides.min_selected_count.is_some()),
			("maxSelectedCount", overrides.max_selected_count.is_some()),
			("countOnlyLeaves", overrides.count_only_leaves.is_some()),
		];

		match param.enum_settings_mut() {
			Some(settings) => {
				if let Some(value) = overrides.multi_pick {
					settings.multi_pick = value;
				}
				if let Some(value) = overrides.quote {
					settings.quote = value;
				}
				if let Some(value) = overrides.display_type {
					settings.display_type = Some(value);
				}
				if let Some(value) = overrides.select_mode {
					settings.select_mode = Some(value);
				}
				if let Some(value) = overrides.suppress_node {
					settings.suppress_node = value;
				}
				if let Some(value) = overrides.min_selected_count {
					settings.min_selected_count = Some(value);
				}
				if let Some(value) = overrides.max_selected_count {
					settings.max_selected_count = Some(value);
				}
				if let Some(value) = overrides.count_only_leaves {
					settings.count_only_leaves = value;
				}
			},
			None =>
				if let Some((label, _)) = enum_overrides.iter().find(|(_, set)| *set) {
					return Err(Error::model(format!(
						"Override {label} only applies to enumerated params, not {full_name}."
					)));
				},
		}

		param.check()?;

		Ok(param)
	}

	/// Substitutes the internal value into the `$$name$$` macros of a query text.
	pub fn replace_sql(&self, sql: &str, internal: &str) -> Result<String> {
		match &self.kind {
			ParamKind::NumberRange(_) | ParamKind::DateRange(_) => {
				let value: Value = serde_json::from_str(internal).map_err(|err| {
					Error::model(format!(
						"Internal value of range param {} is not JSON: {err}",
						self.full_name
					))
				})?;
				let bound = |key: &str| match value.get(key) {
					Some(Value::String(text)) => text.clone(),
					Some(Value::Null) | None => "NULL".to_string(),
					Some(other) => other.to_string(),
				};
				let min_macro = format!("$${}.min$$", self.name);
				let max_macro = format!("$${}.max$$", self.name);

				Ok(sql.replace(&min_macro, &bound("min")).replace(&max_macro, &bound("max")))
			},
			_ => Ok(sql.replace(&format!("$${}$$", self.name), internal)),
		}
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParamKind {
	String(StringSpec),
	Number(NumberSpec),
	Date(DateSpec),
	NumberRange(NumberRangeSpec),
	DateRange(DateRangeSpec),
	Enum(EnumSpec),
	FlatVocab(FlatVocabSpec),
	Filter(FilterSpec),
	Answer,
	Dataset,
	Timestamp,
}
impl ParamKind {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::String(_) => "string",
			Self::Number(_) => "number",
			Self::Date(_) => "date",
			Self::NumberRange(_) => "number_range",
			Self::DateRange(_) => "date_range",
			Self::Enum(_) => "enum",
			Self::FlatVocab(_) => "flat_vocab",
			Self::Filter(_) => "filter",
			Self::Answer => "answer",
			Self::Dataset => "dataset",
			Self::Timestamp => "timestamp",
		}
	}
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StringSpec {
	pub number: bool,
	pub is_sql: bool,
	pub regex: Option<String>,
	/// Zero means unbounded.
	pub max_length: usize,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NumberSpec {
	pub integer: bool,
	pub min: Option<f64>,
	pub max: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DateSpec {
	pub regex: Option<String>,
	pub min_date: Option<String>,
	pub max_date: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NumberRangeSpec {
	pub integer: bool,
	pub min: Option<f64>,
	pub max: Option<f64>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DateRangeSpec {
	pub min_date: Option<String>,
	pub max_date: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumSpec {
	pub settings: EnumSettings,
	pub items: Vec<EnumItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnumItem {
	pub term: String,
	pub internal: String,
	pub display: Option<String>,
	pub parent_term: Option<String>,
	/// Values of the depended param this item is valid for. Empty means always valid.
	#[serde(default)]
	pub depended_values: Vec<String>,
}
impl EnumItem {
	pub fn new(term: &str, internal: &str) -> Self {
		Self {
			term: term.to_string(),
			internal: internal.to_string(),
			display: None,
			parent_term: None,
			depended_values: Vec::new(),
		}
	}

	pub fn with_parent(mut self, parent_term: &str) -> Self {
		self.parent_term = Some(parent_term.to_string());

		self
	}

	pub fn with_display(mut self, display: &str) -> Self {
		self.display = Some(display.to_string());

		self
	}
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlatVocabSpec {
	pub settings: EnumSettings,
	/// Vocabulary query returning `term`, `internal` and optionally `display` and `parentTerm`.
	pub query_ref: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FilterSpec {
	pub ontology_query_ref: String,
	pub metadata_query_ref: String,
	/// Relation the rendered predicate selects internal values from.
	pub metadata_table: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EnumSettings {
	pub multi_pick: bool,
	pub quote: bool,
	pub display_type: Option<DisplayType>,
	pub select_mode: Option<SelectMode>,
	pub suppress_node: bool,
	pub min_selected_count: Option<u32>,
	pub max_selected_count: Option<u32>,
	pub count_only_leaves: bool,
	pub skip_validation: bool,
}
impl EnumSettings {
	pub fn effective_display_type(&self) -> DisplayType {
		match self.display_type {
			Some(display_type) => display_type,
			None if self.multi_pick => DisplayType::CheckBox,
			None => DisplayType::Select,
		}
	}

	pub fn effective_max_selected(&self) -> Option<u32> {
		if self.multi_pick { self.max_selected_count } else { Some(1) }
	}

	/// Single-pick params always take the first term.
	pub fn effective_select_mode(&self) -> SelectMode {
		match self.select_mode {
			Some(mode) if self.multi_pick => mode,
			_ => SelectMode::First,
		}
	}
}
impl Default for EnumSettings {
	fn default() -> Self {
		Self {
			multi_pick: false,
			quote: true,
			display_type: None,
			select_mode: None,
			suppress_node: false,
			min_selected_count: None,
			max_selected_count: None,
			count_only_leaves: false,
			skip_validation: false,
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisplayType {
	Select,
	CheckBox,
	TreeBox,
	TypeAhead,
}
impl DisplayType {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Select => "select",
			Self::CheckBox => "checkBox",
			Self::TreeBox => "treeBox",
			Self::TypeAhead => "typeAhead",
		}
	}

	pub fn parse(param: &str, raw: &str) -> Result<Self> {
		match raw.trim() {
			"select" => Ok(Self::Select),
			"checkBox" => Ok(Self::CheckBox),
			"treeBox" => Ok(Self::TreeBox),
			"typeAhead" => Ok(Self::TypeAhead),
			"listBox" => {
				tracing::warn!(param, display_type = raw, "Deprecated display type, using select.");

				Ok(Self::Select)
			},
			"radioBox" => {
				tracing::warn!(param, display_type = raw, "Deprecated display type, using checkBox.");

				Ok(Self::CheckBox)
			},
			other =>
				Err(Error::model(format!("Param {param} has unknown display type '{other}'."))),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SelectMode {
	None,
	All,
	First,
}
impl SelectMode {
	pub fn parse(param: &str, raw: &str) -> Result<Self> {
		match raw.trim().to_ascii_uppercase().as_str() {
			"NONE" => Ok(Self::None),
			"ALL" => Ok(Self::All),
			"FIRST" => Ok(Self::First),
			other => Err(Error::model(format!("Param {param} has unknown select mode '{other}'."))),
		}
	}
}

/// Per-context overrides declared by a param reference.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ParamOverride {
	pub default_value: Option<String>,
	pub allow_empty: Option<bool>,
	pub empty_value: Option<String>,
	pub no_translation: Option<bool>,
	pub visible: Option<bool>,
	pub help: Option<String>,
	pub prompt: Option<String>,
	pub group: Option<String>,
	pub number: Option<bool>,
	pub multi_pick: Option<bool>,
	pub quote: Option<bool>,
	pub display_type: Option<DisplayType>,
	pub select_mode: Option<SelectMode>,
	pub suppress_node: Option<bool>,
	pub min_selected_count: Option<u32>,
	pub max_selected_count: Option<u32>,
	pub count_only_leaves: Option<bool>,
}

pub fn parse_depended_refs(param: &str, raw: &str) -> Result<Vec<String>> {
	let mut refs: Vec<String> = Vec::new();

	for piece in raw.split(',') {
		let name = piece.trim();

		if name.is_empty() {
			continue;
		}
		if refs.iter().any(|existing| existing == name) {
			return Err(Error::model(format!(
				"Param {param} references depended param '{name}' more than once."
			)));
		}

		refs.push(name.to_string());
	}

	Ok(refs)
}

fn override_mismatch(param: &ParamDefinition, label: &str) -> Error {
	Error::model(format!(
		"Override {label} does not apply to {} param {}.",
		param.kind.as_str(),
		param.full_name
	))
}

#[cfg(test)]
mod tests {
	use crate::param::{
		DisplayType, EnumSettings, EnumSpec, ParamDefinition, ParamKind, ParamOverride,
		SelectMode, StringSpec, parse_depended_refs,
	};

	fn organism_param() -> ParamDefinition {
		ParamDefinition::new(
			"params.organism",
			ParamKind::Enum(EnumSpec { settings: EnumSettings::default(), items: Vec::new() }),
		)
	}

	#[test]
	fn depended_refs_are_trimmed_and_deduplicated() {
		let refs = parse_depended_refs("params.gene", " organism , strain,").expect("refs");

		assert_eq!(refs, vec!["organism".to_string(), "strain".to_string()]);
		assert!(parse_depended_refs("params.gene", "organism,organism").is_err());
	}

	#[test]
	fn self_dependency_is_a_model_error() {
		let param = organism_param().with_depended_refs("organism").expect("refs parse");

		assert!(param.check().is_err());
	}

	#[test]
	fn display_type_defaults_follow_multi_pick() {
		let mut settings = EnumSettings::default();

		assert_eq!(settings.effective_display_type(), DisplayType::Select);
		assert_eq!(settings.effective_max_selected(), Some(1));

		settings.multi_pick = true;

		assert_eq!(settings.effective_display_type(), DisplayType::CheckBox);
		assert_eq!(settings.effective_max_selected(), None);
	}

	#[test]
	fn deprecated_display_types_are_mapped() {
		assert_eq!(DisplayType::parse("p", "listBox").expect("listBox"), DisplayType::Select);
		assert_eq!(DisplayType::parse("p", "radioBox").expect("radioBox"), DisplayType::CheckBox);
		assert!(DisplayType::parse("p", "wheel").is_err());
	}

	#[test]
	fn single_pick_always_selects_first() {
		let settings =
			EnumSettings { select_mode: Some(SelectMode::All), ..EnumSettings::default() };

		assert_eq!(settings.effective_select_mode(), SelectMode::First);
	}

	#[test]
	fn tree_box_requires_multi_pick() {
		let overrides =
			ParamOverride { display_type: Some(DisplayType::TreeBox), ..ParamOverride::default() };

		assert!(organism_param().with_overrides(&overrides).is_err());

		let overrides = ParamOverride {
			display_type: Some(DisplayType::TreeBox),
			multi_pick: Some(true),
			..ParamOverride::default()
		};
		let param = organism_param().with_overrides(&overrides).expect("override applies");

		assert!(param.enum_settings().expect("enum settings").multi_pick);
	}

	#[test]
	fn overrides_do_not_leak_into_the_shared_definition() {
		let shared = organism_param();
		let overrides = ParamOverride {
			quote: Some(false),
			prompt: Some("Species".to_string()),
			..ParamOverride::default()
		};
		let local = shared.with_overrides(&overrides).expect("override applies");

		assert!(!local.enum_settings().expect("enum settings").quote);
		assert_eq!(local.prompt, "Species");
		assert!(shared.enum_settings().expect("enum settings").quote);
		assert_eq!(shared.prompt, "organism");
	}

	#[test]
	fn enum_override_on_string_param_is_rejected() {
		let param = ParamDefinition::new("params.text", ParamKind::String(StringSpec::default()));
		let overrides = ParamOverride { multi_pick: Some(true), ..ParamOverride::default() };

		assert!(param.with_overrides(&overrides).is_err());
	}

	#[test]
	fn range_macros_are_replaced() {
		let param = ParamDefinition::new(
			"params.length",
			ParamKind::NumberRange(crate::param::NumberRangeSpec::default()),
		);
		let sql = param
			.replace_sql("len BETWEEN $$length.min$$ AND $$length.max$$", r#"{"min":3,"max":9}"#)
			.expect("replace");

		assert_eq!(sql, "len BETWEEN 3 AND 9");
	}
}
