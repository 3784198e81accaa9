use serde_json::Value;
use time::Date;

use crate::{
	Error, Result,
	codec::scalar,
	param::{DateRangeSpec, NumberRangeSpec, ParamDefinition, ParamKind},
};

enum Bounds {
	Number(f64, f64),
	Date(Date, Date),
}

/// Canonical JSON form of a range stable value: `{"max":..,"min":..}` with numbers as numbers
/// and dates as `yyyy-mm-dd` strings.
pub fn canonical(param: &ParamDefinition, stable: &str) -> Result<String> {
	let json = match parse(param, stable)? {
		Bounds::Number(min, max) => serde_json::json!({ "min": min, "max": max }),
		Bounds::Date(min, max) => serde_json::json!({
			"min": format_date(min),
			"max": format_date(max),
		}),
	};

	Ok(json.to_string())
}

pub fn validate(param: &ParamDefinition, stable: &str) -> Result<()> {
	match (parse(param, stable)?, &param.kind) {
		(Bounds::Number(min, max), ParamKind::NumberRange(spec)) =>
			validate_numbers(spec, min, max),
		(Bounds::Date(min, max), ParamKind::DateRange(spec)) =>
			validate_dates(param, spec, min, max),
		_ => Err(not_a_range(param)),
	}
}

fn validate_numbers(spec: &NumberRangeSpec, min: f64, max: f64) -> Result<()> {
	if min > max {
		return Err(Error::user_input(format!(
			"The minimum value, '{min}', in the range must be less than the maximum value, '{max}'"
		)));
	}

	scalar::check_number_bounds(spec.integer, spec.min, None, min, &min.to_string())?;
	scalar::check_number_bounds(spec.integer, None, spec.max, max, &max.to_string())
}

fn validate_dates(
	param: &ParamDefinition,
	spec: &DateRangeSpec,
	min: Date,
	max: Date,
) -> Result<()> {
	if min > max {
		return Err(Error::user_input(format!(
			"The start date, '{}', must not be after the end date, '{}'",
			format_date(min),
			format_date(max)
		)));
	}

	if let Some(bound) = spec.min_date.as_deref() {
		let bound_date = model_date(param, bound)?;

		if min < bound_date {
			return Err(Error::user_input(format!(
				"The date '{}' should not be earlier than '{bound}'",
				format_date(min)
			)));
		}
	}
	if let Some(bound) = spec.max_date.as_deref() {
		let bound_date = model_date(param, bound)?;

		if max > bound_date {
			return Err(Error::user_input(format!(
				"The date '{}' should not be after '{bound}'",
				format_date(max)
			)));
		}
	}

	Ok(())
}

fn parse(param: &ParamDefinition, stable: &str) -> Result<Bounds> {
	let malformed = || {
		Error::user_input(format!(
			"Could not parse '{stable}'. The range should be is the format {{'min':'min value','max':'max value'}}"
		))
	};
	let json: Value = serde_json::from_str(stable).map_err(|_| malformed())?;
	let min = json.get("min").ok_or_else(malformed)?;
	let max = json.get("max").ok_or_else(malformed)?;

	match &param.kind {
		ParamKind::NumberRange(_) => {
			let min = number_bound(param, min).ok_or_else(malformed)??;
			let max = number_bound(param, max).ok_or_else(malformed)??;

			Ok(Bounds::Number(min, max))
		},
		ParamKind::DateRange(_) => {
			let min = min.as_str().ok_or_else(malformed)?;
			let max = max.as_str().ok_or_else(malformed)?;

			Ok(Bounds::Date(scalar::parse_date(min)?, scalar::parse_date(max)?))
		},
		_ => Err(not_a_range(param)),
	}
}

fn number_bound(param: &ParamDefinition, value: &Value) -> Option<Result<f64>> {
	match value {
		Value::Number(number) => number.as_f64().map(Ok),
		Value::String(text) => Some(scalar::parse_number(param, text.trim())),
		_ => None,
	}
}

fn model_date(param: &ParamDefinition, value: &str) -> Result<Date> {
	scalar::parse_date(value).map_err(|_| {
		Error::model(format!("Param {} declares an invalid date bound '{value}'.", param.full_name))
	})
}

fn format_date(date: Date) -> String {
	format!("{:04}-{:02}-{:02}", date.year(), u8::from(date.month()), date.day())
}

fn not_a_range(param: &ParamDefinition) -> Error {
	Error::model(format!("Param {} is a {} param, not a range.", param.full_name, param.kind.as_str()))
}

#[cfg(test)]
mod tests {
	use crate::{
		codec::range,
		param::{DateRangeSpec, NumberRangeSpec, ParamDefinition, ParamKind},
	};

	fn lengths(spec: NumberRangeSpec) -> ParamDefinition {
		ParamDefinition::new("params.length", ParamKind::NumberRange(spec))
	}

	#[test]
	fn numeric_strings_are_accepted_as_bounds() {
		let param = lengths(NumberRangeSpec::default());

		assert_eq!(
			range::canonical(&param, r#"{"min":"1.5","max":2}"#).expect("canonical"),
			r#"{"max":2.0,"min":1.5}"#
		);
	}

	#[test]
	fn malformed_ranges_report_the_expected_format() {
		let param = lengths(NumberRangeSpec::default());
		let err = range::validate(&param, r#"{"min":1}"#).expect_err("missing max");

		assert!(err.to_string().starts_with("Could not parse '{\"min\":1}'."), "Unexpected error: {err}");
		assert!(err.is_user_facing());
	}

	#[test]
	fn number_ranges_check_order_integers_and_bounds() {
		let param =
			lengths(NumberRangeSpec { integer: true, min: Some(0.0), max: Some(100.0) });

		assert!(range::validate(&param, r#"{"min":1,"max":50}"#).is_ok());
		assert!(range::validate(&param, r#"{"min":5,"max":1}"#).is_err());
		assert!(range::validate(&param, r#"{"min":1.5,"max":50}"#).is_err());
		assert!(range::validate(&param, r#"{"min":-1,"max":50}"#).is_err());
		assert!(range::validate(&param, r#"{"min":1,"max":101}"#).is_err());
	}

	#[test]
	fn date_ranges_are_canonical_and_bounded() {
		let param = ParamDefinition::new(
			"params.period",
			ParamKind::DateRange(DateRangeSpec {
				min_date: Some("2000-01-01".to_string()),
				max_date: None,
			}),
		);

		assert_eq!(
			range::canonical(&param, r#"{"min":"2001-02-03","max":"2002-03-04"}"#)
				.expect("canonical"),
			r#"{"max":"2002-03-04","min":"2001-02-03"}"#
		);
		assert!(range::validate(&param, r#"{"min":"1999-01-01","max":"2002-03-04"}"#).is_err());
		assert!(range::validate(&param, r#"{"min":"2003-01-01","max":"2002-03-04"}"#).is_err());
	}
}
