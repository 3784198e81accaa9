pub mod enumerated;
pub mod range;
pub mod scalar;

pub use enumerated::convert_to_terms;

use std::collections::BTreeMap;

use crate::{
	Error, Result,
	filter::{FilterMetadata, FilterStableValue},
	param::{ParamDefinition, ParamKind},
	vocab::VocabularyResolver,
};

/// Value as submitted by a form: a single text field or a list of selected terms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RawValue {
	Single(String),
	Multiple(Vec<String>),
}

/// What the codec needs beyond the param itself: the resolver of the param's context and the
/// stable values of the other params in that context.
pub struct CodecContext<'r, 'a> {
	pub resolver: &'r VocabularyResolver<'a>,
	pub values: &'r BTreeMap<String, String>,
}
impl<'r, 'a> CodecContext<'r, 'a> {
	pub fn new(resolver: &'r VocabularyResolver<'a>, values: &'r BTreeMap<String, String>) -> Self {
		Self { resolver, values }
	}
}

pub fn to_stable(param: &ParamDefinition, raw: &RawValue) -> Result<String> {
	let stable = match (raw, &param.kind) {
		(RawValue::Multiple(terms), ParamKind::Enum(_) | ParamKind::FlatVocab(_)) => terms
			.iter()
			.map(|term| term.trim())
			.filter(|term| !term.is_empty())
			.collect::<Vec<_>>()
			.join(","),
		(RawValue::Multiple(_), _) =>
			return Err(Error::user_input(format!(
				"Parameter '{}' accepts a single value.",
				param.prompt
			))),
		(RawValue::Single(value), ParamKind::NumberRange(_) | ParamKind::DateRange(_)) =>
			range::canonical(param, value)?,
		(RawValue::Single(value), ParamKind::Filter(_)) => {
			FilterStableValue::parse(value)?;

			value.trim().to_string()
		},
		(RawValue::Single(value), _) => value.trim().to_string(),
	};

	Ok(stable)
}

pub fn to_raw(param: &ParamDefinition, stable: &str) -> RawValue {
	match param.enum_settings() {
		Some(settings) if settings.multi_pick =>
			RawValue::Multiple(convert_to_terms(param, stable)),
		_ => RawValue::Single(stable.to_string()),
	}
}

/// Query-ready form of a stable value. With `no_translation` the stable value is returned as
/// is.
pub fn to_internal(param: &ParamDefinition, stable: &str, ctx: &CodecContext) -> Result<String> {
	if param.no_translation {
		return Ok(stable.to_string());
	}

	match &param.kind {
		ParamKind::String(spec) => Ok(scalar::string_internal(spec, stable)),
		ParamKind::Number(_) => Ok(stable.replace(',', "")),
		ParamKind::Date(_) => Ok(format!("'{stable}'")),
		ParamKind::NumberRange(_) | ParamKind::DateRange(_) => range::canonical(param, stable),
		ParamKind::Enum(_) | ParamKind::FlatVocab(_) => {
			let instance = ctx.resolver.resolve(&param.name, ctx.values)?;

			enumerated::internal(param, stable, &instance)
		},
		ParamKind::Filter(spec) => {
			let value = FilterStableValue::parse(stable)?;
			let metadata = FilterMetadata::load(ctx.resolver, param, spec, ctx.values, false)?;

			value.internal_query(spec, &metadata)
		},
		ParamKind::Answer | ParamKind::Dataset | ParamKind::Timestamp => Ok(stable.to_string()),
	}
}

/// Lowercase blake3 hex of the canonical stable value; the empty value signs as "".
pub fn to_signature(param: &ParamDefinition, stable: &str) -> Result<String> {
	if stable.is_empty() {
		return Ok(String::new());
	}

	let canonical = match &param.kind {
		ParamKind::Enum(_) | ParamKind::FlatVocab(_) => {
			let mut terms = convert_to_terms(param, stable);

			terms.sort();
			terms.dedup();

			terms.join(",")
		},
		ParamKind::NumberRange(_) | ParamKind::DateRange(_) => range::canonical(param, stable)?,
		ParamKind::Filter(_) => FilterStableValue::parse(stable)?.signature(),
		_ => stable.to_string(),
	};

	Ok(blake3::hash(canonical.as_bytes()).to_hex().to_string())
}

/// Checks a stable value. Every failure the caller can fix is a user input error.
pub fn validate(param: &ParamDefinition, stable: &str, ctx: &CodecContext) -> Result<()> {
	if stable.trim().is_empty() && param.enum_settings().is_none() {
		if param.allow_empty {
			return Ok(());
		}

		return Err(required(param));
	}

	match &param.kind {
		ParamKind::String(spec) => scalar::validate_string(param, spec, stable),
		ParamKind::Number(spec) => scalar::validate_number(param, spec, stable),
		ParamKind::Date(spec) => scalar::validate_date(param, spec, stable),
		ParamKind::NumberRange(_) | ParamKind::DateRange(_) => range::validate(param, stable),
		ParamKind::Enum(_) | ParamKind::FlatVocab(_) => {
			let instance = ctx.resolver.resolve(&param.name, ctx.values)?;

			enumerated::validate(param, stable, &instance)
		},
		ParamKind::Filter(spec) => {
			let value = FilterStableValue::parse(stable)?;
			let metadata = FilterMetadata::load(
				ctx.resolver,
				param,
				spec,
				ctx.values,
				value.has_member_filters(),
			)?;

			value.validate(&metadata)
		},
		ParamKind::Answer => scalar::validate_id(param, stable, "step"),
		ParamKind::Dataset => scalar::validate_id(param, stable, "dataset"),
		ParamKind::Timestamp => Ok(()),
	}
}

/// Human-readable rendering of a stable value.
pub fn display_value(param: &ParamDefinition, stable: &str, ctx: &CodecContext) -> Result<String> {
	match &param.kind {
		ParamKind::Enum(_) | ParamKind::FlatVocab(_) => {
			let instance = ctx.resolver.resolve(&param.name, ctx.values)?;

			Ok(enumerated::display(param, stable, &instance))
		},
		ParamKind::Filter(_) => Ok(FilterStableValue::parse(stable)?.display()),
		_ => Ok(stable.to_string()),
	}
}

/// Stable value to store when a required input is missing: the empty value when allowed.
pub fn empty_or_required(param: &ParamDefinition) -> Result<String> {
	if param.allow_empty {
		return Ok(param.empty_value.clone().unwrap_or_default());
	}

	Err(required(param))
}

fn required(param: &ParamDefinition) -> Error {
	Error::user_input(format!("The input to parameter '{}' is required", param.prompt))
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use crate::{
		codec::{self, CodecContext, RawValue},
		param::{
			EnumItem, EnumSettings, EnumSpec, NumberRangeSpec, ParamContext, ParamDefinition,
			ParamKind, StringSpec,
		},
		vocab::{QueryError, QueryRow, QueryRunner, VocabularyResolver},
	};

	struct NoQueries;
	impl QueryRunner for NoQueries {
		fn run_query(
			&self,
			_: i64,
			query_ref: &str,
			_: &BTreeMap<String, String>,
		) -> Result<Vec<QueryRow>, QueryError> {
			Err(QueryError::new(format!("unexpected query {query_ref}")))
		}
	}

	fn colors(multi_pick: bool) -> ParamDefinition {
		ParamDefinition::new(
			"params.color",
			ParamKind::Enum(EnumSpec {
				settings: EnumSettings { multi_pick, ..EnumSettings::default() },
				items: vec![
					EnumItem::new("red", "R").with_display("Red"),
					EnumItem::new("green", "G").with_display("Green"),
					EnumItem::new("o'range", "O"),
				],
			}),
		)
	}

	#[test]
	fn signatures_ignore_term_order() {
		let param = colors(true);
		let left = codec::to_signature(&param, "b,a").expect("signs");
		let right = codec::to_signature(&param, "a, b").expect("signs");

		assert_eq!(left, right);
		assert_eq!(left.len(), 64);
		assert_eq!(codec::to_signature(&param, "").expect("signs"), "");
	}

	#[test]
	fn enum_internal_drops_invalid_terms_and_quotes() {
		let param = colors(true);
		let context = ParamContext::build("q", vec![param.clone()]).expect("builds");
		let resolver = VocabularyResolver::new(&context, &NoQueries, 1);
		let values = BTreeMap::new();
		let ctx = CodecContext::new(&resolver, &values);

		assert_eq!(
			codec::to_internal(&param, "red,purple,green", &ctx).expect("internal"),
			"'R','G'"
		);

		let unquoted = param.clone().with_no_translation();

		assert_eq!(
			codec::to_internal(&unquoted, "red,purple", &ctx).expect("internal"),
			"red,purple"
		);
	}

	#[test]
	fn enum_display_uses_labels() {
		let param = colors(true);
		let context = ParamContext::build("q", vec![param.clone()]).expect("builds");
		let resolver = VocabularyResolver::new(&context, &NoQueries, 1);
		let values = BTreeMap::new();
		let ctx = CodecContext::new(&resolver, &values);

		assert_eq!(codec::display_value(&param, "green,red", &ctx).expect("display"), "Green, Red");
	}

	#[test]
	fn multiple_raw_values_join_into_stable_terms() {
		let param = colors(true);
		let raw = RawValue::Multiple(vec![" red".to_string(), String::new(), "green ".to_string()]);

		assert_eq!(codec::to_stable(&param, &raw).expect("stable"), "red,green");
		assert_eq!(
			codec::to_raw(&param, "red,green"),
			RawValue::Multiple(vec!["red".to_string(), "green".to_string()])
		);

		let text = ParamDefinition::new("params.text", ParamKind::String(StringSpec::default()));

		assert!(codec::to_stable(&text, &raw).is_err());
	}

	#[test]
	fn missing_required_value_is_user_input() {
		let text = ParamDefinition::new("params.text", ParamKind::String(StringSpec::default()))
			.with_prompt("Text term");
		let context = ParamContext::build("q", vec![text.clone()]).expect("builds");
		let resolver = VocabularyResolver::new(&context, &NoQueries, 1);
		let values = BTreeMap::new();
		let ctx = CodecContext::new(&resolver, &values);
		let err = codec::validate(&text, "  ", &ctx).expect_err("required");

		assert!(err.is_user_facing());
		assert_eq!(err.to_string(), "The input to parameter 'Text term' is required");
		assert!(codec::validate(&text.clone().with_empty_value(None), "", &ctx).is_ok());
		assert_eq!(
			codec::empty_or_required(&text.with_empty_value(Some("N/A"))).expect("empty value"),
			"N/A"
		);
	}

	#[test]
	fn range_stable_values_are_canonical() {
		let param = ParamDefinition::new(
			"params.length",
			ParamKind::NumberRange(NumberRangeSpec::default()),
		);
		let stable = codec::to_stable(&param, &RawValue::Single(r#"{ "max": 9, "min": 3 }"#.to_string()))
			.expect("stable");

		assert_eq!(stable, r#"{"max":9.0,"min":3.0}"#);
		assert_eq!(
			codec::to_signature(&param, r#"{"min":3,"max":9}"#).expect("signs"),
			codec::to_signature(&param, &stable).expect("signs")
		);
	}
}
