use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};
use time::Date;

use crate::{
	Error, Result,
	codec::scalar,
	param::{FilterSpec, ParamDefinition},
	vocab::VocabularyResolver,
};

const FILTERS_KEY: &str = "filters";
const FIELD_KEY: &str = "field";
const VALUE_KEY: &str = "value";
const MIN_KEY: &str = "min";
const MAX_KEY: &str = "max";
const INCLUDE_UNKNOWN_KEY: &str = "includeUnknown";
const METADATA_ALIAS: &str = "md";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OntologyType {
	String,
	Number,
	Date,
}
impl OntologyType {
	pub fn parse(raw: &str) -> Option<Self> {
		match raw.trim().to_ascii_lowercase().as_str() {
			"string" => Some(Self::String),
			"number" => Some(Self::Number),
			"date" => Some(Self::Date),
			_ => None,
		}
	}

	/// Column of the metadata query holding values of this type.
	pub fn column(&self) -> &'static str {
		match self {
			Self::String => "string_value",
			Self::Number => "number_value",
			Self::Date => "date_value",
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OntologyTerm {
	pub name: String,
	pub value_type: OntologyType,
	pub ontology_id: String,
	pub is_range: bool,
}

/// Ontology of a filter param's context, plus the distinct metadata values of member fields
/// when validation needs them.
#[derive(Clone, Debug, Default)]
pub struct FilterMetadata {
	ontology: BTreeMap<String, OntologyTerm>,
	members: BTreeMap<String, BTreeSet<String>>,
}
impl FilterMetadata {
	pub fn from_parts(
		terms: Vec<OntologyTerm>,
		members: BTreeMap<String, BTreeSet<String>>,
	) -> Self {
		let ontology = terms.into_iter().map(|term| (term.name.clone(), term)).collect();

		Self { ontology, members }
	}

	/// Runs the ontology query and, when `with_members` is set, the metadata query.
	pub fn load(
		resolver: &VocabularyResolver,
		param: &ParamDefinition,
		spec: &FilterSpec,
		values: &BTreeMap<String, String>,
		with_members: bool,
	) -> Result<Self> {
		let run = |query: &str| {
			resolver.queries().run_query(resolver.user_id(), query, values).map_err(|err| {
				Error::Query {
					query: query.to_string(),
					param: param.full_name.clone(),
					message: err.message,
				}
			})
		};
		let mut terms = Vec::new();

		for row in run(&spec.ontology_query_ref)? {
			let Some(name) = row.get("ontology_term_name") else {
				return Err(Error::model(format!(
					"Ontology query {} of param {} returned a row without ontology_term_name.",
					spec.ontology_query_ref, param.full_name
				)));
			};
			let value_type = row.get("type").and_then(OntologyType::parse).ok_or_else(|| {
				Error::model(format!(
					"Ontology term {name} of param {} has no supported type.",
					param.full_name
				))
			})?;
			let is_range = match row.get("is_range") {
				Some(raw) => matches!(raw.trim(), "1" | "true" | "t"),
				None => value_type != OntologyType::String,
			};

			terms.push(OntologyTerm {
				name: name.to_string(),
				value_type,
				ontology_id: row.get("ontology_id").unwrap_or(name).to_string(),
				is_range,
			});
		}

		let mut metadata = Self::from_parts(terms, BTreeMap::new());

		if !with_members {
			return Ok(metadata);
		}

		for row in run(&spec.metadata_query_ref)? {
			let Some(term) = row.get("ontology_term_name").and_then(|name| metadata.ontology.get(name))
			else {
				continue;
			};
			let Some(value) = row.get(term.value_type.column()) else {
				continue;
			};
			let value = match term.value_type {
				OntologyType::Number => match value.trim().parse::<f64>() {
					Ok(number) => format_number(number),
					Err(_) => continue,
				},
				_ => value.to_string(),
			};

			metadata.members.entry(term.name.clone()).or_default().insert(value);
		}

		Ok(metadata)
	}

	pub fn term(&self, field: &str) -> Option<&OntologyTerm> {
		self.ontology.get(field)
	}
}

#[derive(Clone, Debug, PartialEq)]
pub enum FilterValue {
	/// The filter names a field without a value: matches every known value.
	Unset,
	NumberRange { min: Option<f64>, max: Option<f64> },
	DateRange { min: Option<Date>, max: Option<Date> },
	NumberMembers(Vec<f64>),
	StringMembers(Vec<String>),
}

#[derive(Clone, Debug, PartialEq)]
pub struct Filter {
	pub field: String,
	pub include_unknowns: bool,
	pub value: FilterValue,
}
impl Filter {
	pub fn signature(&self) -> String {
		let range = |min: Option<String>, max: Option<String>| {
			format!(
				"{}:{},{},{}",
				self.field,
				min.unwrap_or_else(|| "null".to_string()),
				max.unwrap_or_else(|| "null".to_string()),
				self.include_unknowns
			)
		};

		match &self.value {
			FilterValue::Unset => format!("{}:null --{}", self.field, self.include_unknowns),
			FilterValue::NumberRange { min, max } =>
				range(min.map(format_number), max.map(format_number)),
			FilterValue::DateRange { min, max } =>
				range(min.map(|min| min.to_string()), max.map(|max| max.to_string())),
			FilterValue::NumberMembers(_) | FilterValue::StringMembers(_) =>
				format!(
					"{}:{} --{}",
					self.field,
					self.member_strings().join(","),
					self.include_unknowns
				),
		}
	}

	pub fn display(&self) -> String {
		let range = |min: Option<String>, max: Option<String>| match (min, max) {
			(None, None) => "any values".to_string(),
			(None, Some(max)) => format!("less than {max}"),
			(Some(min), None) => format!("greater than {min}"),
			(Some(min), Some(max)) => format!("between {min} and {max}"),
		};
		let text = match &self.value {
			FilterValue::Unset => "any values".to_string(),
			FilterValue::NumberRange { min, max } =>
				range(min.map(format_number), max.map(format_number)),
			FilterValue::DateRange { min, max } =>
				range(min.map(|min| min.to_string()), max.map(|max| max.to_string())),
			FilterValue::NumberMembers(_) | FilterValue::StringMembers(_) =>
				self.member_strings().join(","),
		};

		if self.include_unknowns { format!("{text} (include unknowns)") } else { text }
	}

	/// ` WHERE ontology_id = '..' AND (<unknowns> <predicate>)` over the metadata alias.
	pub fn where_clause(&self, term: &OntologyTerm) -> String {
		let column = format!("{METADATA_ALIAS}.{}", term.value_type.column());
		let unknown = if self.include_unknowns {
			format!("{column} is NULL OR ")
		} else {
			" 1=0 OR ".to_string()
		};
		let predicate = match &self.value {
			FilterValue::Unset => format!("{column} is not NULL"),
			FilterValue::NumberRange { min, max } =>
				range_predicate(&column, min.map(format_number), max.map(format_number)),
			FilterValue::DateRange { min, max } => range_predicate(
				&column,
				min.map(|min| format!("date '{min}'")),
				max.map(|max| format!("date '{max}'")),
			),
			FilterValue::NumberMembers(members) if members.is_empty() => "1 != 1".to_string(),
			FilterValue::StringMembers(members) if members.is_empty() => "1 != 1".to_string(),
			FilterValue::NumberMembers(members) => format!(
				"{column} IN ({}) ",
				members.iter().map(|member| format_number(*member)).collect::<Vec<_>>().join(", ")
			),
			FilterValue::StringMembers(members) => format!(
				"{column} IN ('{}') ",
				members
					.iter()
					.map(|member| member.replace('\'', "''"))
					.collect::<Vec<_>>()
					.join("', '")
			),
		};

		format!(
			" WHERE ontology_id = '{}' AND ({unknown}{predicate})",
			term.ontology_id.replace('\'', "''")
		)
	}

	fn member_strings(&self) -> Vec<String> {
		match &self.value {
			FilterValue::NumberMembers(members) =>
				members.iter().map(|member| format_number(*member)).collect(),
			FilterValue::StringMembers(members) => members.clone(),
			_ => Vec::new(),
		}
	}
}

/// Parsed stable value of a filter param: `{"filters":[{"field","value","includeUnknown"}]}`.
#[derive(Clone, Debug, PartialEq)]
pub struct FilterStableValue {
	filters: Vec<Filter>,
}
impl FilterStableValue {
	/// Parses and checks the syntax. Filters are ordered by field.
	pub fn parse(stable: &str) -> Result<Self> {
		let json: Value = serde_json::from_str(stable).map_err(|err| {
			Error::user_input(format!("Invalid stable value. Can't parse JSON. {err}"))
		})?;
		let Some(filters) = json.get(FILTERS_KEY).and_then(Value::as_array) else {
			return Err(Error::user_input(format!(
				"Stable value is missing the array: {FILTERS_KEY}"
			)));
		};
		let mut parsed = Vec::with_capacity(filters.len());

		for filter in filters {
			let Some(filter) = filter.as_object() else {
				return Err(Error::user_input("Invalid stable value. Each filter must be an object."));
			};

			parsed.push(parse_filter(filter)?);
		}

		parsed.sort_by(|left, right| left.field.cmp(&right.field));

		Ok(Self { filters: parsed })
	}

	pub fn filters(&self) -> &[Filter] {
		&self.filters
	}

	pub fn has_member_filters(&self) -> bool {
		self.filters.iter().any(|filter| {
			matches!(filter.value, FilterValue::NumberMembers(_) | FilterValue::StringMembers(_))
		})
	}

	pub fn signature(&self) -> String {
		let mut signatures: Vec<String> = self.filters.iter().map(Filter::signature).collect();

		signatures.sort();

		format!("[{}]", signatures.join(","))
	}

	pub fn display(&self) -> String {
		if self.filters.is_empty() {
			return "unspecified".to_string();
		}

		self.filters.iter().map(Filter::display).collect::<Vec<_>>().join("\n")
	}

	/// Checks fields against the ontology and members against the distinct metadata values.
	/// All problems are reported together.
	pub fn validate(&self, metadata: &FilterMetadata) -> Result<()> {
		let mut errors = Vec::new();

		for filter in &self.filters {
			let Some(term) = metadata.term(&filter.field) else {
				errors.push(format!("'{}' is not a recognized ontology term", filter.field));

				continue;
			};

			let is_members = matches!(
				filter.value,
				FilterValue::NumberMembers(_) | FilterValue::StringMembers(_)
			);
			let is_range = matches!(
				filter.value,
				FilterValue::NumberRange { .. } | FilterValue::DateRange { .. }
			);

			if term.is_range {
				if is_members {
					errors.push(format!(
						"'{}' takes a range value, not a list of members",
						filter.field
					));
				}

				continue;
			}
			if is_range {
				errors.push(format!("'{}' takes a list of members, not a range", filter.field));

				continue;
			}

			let known = metadata.members.get(&filter.field);
			let invalid: Vec<String> = filter
				.member_strings()
				.into_iter()
				.filter(|member| !known.is_some_and(|known| known.contains(member)))
				.collect();

			if !invalid.is_empty() {
				errors.push(invalid.join(", "));
			}
		}

		if errors.is_empty() {
			return Ok(());
		}

		Err(Error::user_input(errors.join("', '")))
	}

	/// Query selecting the internal values that pass every filter.
	pub fn internal_query(&self, spec: &FilterSpec, metadata: &FilterMetadata) -> Result<String> {
		let select =
			format!("SELECT {METADATA_ALIAS}.internal FROM {} {METADATA_ALIAS}", spec.metadata_table);

		if self.filters.is_empty() {
			return Ok(select);
		}

		let mut parts = Vec::with_capacity(self.filters.len());

		for filter in &self.filters {
			let term = metadata.term(&filter.field).ok_or_else(|| {
				Error::user_input(format!("'{}' is not a recognized ontology term", filter.field))
			})?;

			parts.push(format!("{select}{}", filter.where_clause(term)));
		}

		Ok(parts.join(" INTERSECT "))
	}
}

fn parse_filter(filter: &Map<String, Value>) -> Result<Filter> {
	if !filter.contains_key(INCLUDE_UNKNOWN_KEY) && !filter.contains_key(VALUE_KEY) {
		return Err(Error::user_input(format!(
			"A value filter must have at minimum one of the following properties: '{INCLUDE_UNKNOWN_KEY}', '{VALUE_KEY}'."
		)));
	}

	let Some(field) = filter.get(FIELD_KEY).and_then(Value::as_str) else {
		return Err(Error::user_input("Stable value does not specify an ontology term"));
	};
	let include_unknowns = match filter.get(INCLUDE_UNKNOWN_KEY) {
		None | Some(Value::Null) => false,
		Some(Value::Bool(flag)) => *flag,
		Some(other) =>
			return Err(Error::user_input(format!(
				"Filter on '{field}' has a non-boolean {INCLUDE_UNKNOWN_KEY}: {other}"
			))),
	};
	let value = match filter.get(VALUE_KEY) {
		None | Some(Value::Null) => FilterValue::Unset,
		Some(Value::Object(range)) => parse_range(field, range)?,
		Some(Value::Array(members)) => parse_members(field, members)?,
		Some(other) =>
			return Err(Error::user_input(format!(
				"Filter on '{field}' has an unsupported value: {other}"
			))),
	};

	Ok(Filter { field: field.to_string(), include_unknowns, value })
}

/// Numeric unless one of the bounds fails to read as a number, in which case both must be dates.
fn parse_range(field: &str, range: &Map<String, Value>) -> Result<FilterValue> {
	let bound = |key: &str| range.get(key).filter(|value| !value.is_null());
	let (min, max) = (bound(MIN_KEY), bound(MAX_KEY));
	let as_number = |value: &Value| match value {
		Value::Number(number) => number.as_f64(),
		Value::String(text) => text.trim().parse::<f64>().ok(),
		_ => None,
	};
	let numeric = min.is_none_or(|min| as_number(min).is_some())
		&& max.is_none_or(|max| as_number(max).is_some());

	if numeric {
		return Ok(FilterValue::NumberRange {
			min: min.and_then(as_number),
			max: max.and_then(as_number),
		});
	}

	let as_date = |value: &Value| {
		value.as_str().and_then(|text| scalar::parse_date(text).ok()).ok_or_else(|| {
			Error::user_input(format!(
				"Filter on '{field}' has a range bound that is neither a number nor a yyyy-mm-dd date: {value}"
			))
		})
	};

	Ok(FilterValue::DateRange {
		min: min.map(as_date).transpose()?,
		max: max.map(as_date).transpose()?,
	})
}

/// Numeric when the first member reads as a number. Members are kept sorted.
fn parse_members(field: &str, members: &[Value]) -> Result<FilterValue> {
	let numeric = members.first().is_some_and(|first| first.is_number());

	if numeric {
		let mut numbers = members
			.iter()
			.map(|member| {
				member.as_f64().ok_or_else(|| {
					Error::user_input(format!(
						"Filter on '{field}' mixes numeric and non-numeric members: {member}"
					))
				})
			})
			.collect::<Result<Vec<_>>>()?;

		numbers.sort_by(f64::total_cmp);

		return Ok(FilterValue::NumberMembers(numbers));
	}

	let mut strings = members
		.iter()
		.map(|member| {
			member.as_str().map(str::to_string).ok_or_else(|| {
				Error::user_input(format!("Filter on '{field}' has a non-string member: {member}"))
			})
		})
		.collect::<Result<Vec<_>>>()?;

	strings.sort();

	Ok(FilterValue::StringMembers(strings))
}

fn range_predicate(column: &str, min: Option<String>, max: Option<String>) -> String {
	let mut conditions = Vec::new();

	if let Some(min) = min {
		conditions.push(format!("{column} >= {min}"));
	}
	if let Some(max) = max {
		conditions.push(format!("{column} <= {max}"));
	}

	if conditions.is_empty() {
		return " 1=1 ".to_string();
	}

	format!(" ( {} ) ", conditions.join(" AND "))
}

fn format_number(value: f64) -> String {
	value.to_string()
}
