use regex::Regex;
use time::{Date, macros::format_description};

use crate::{
	Error, Result,
	param::{DateSpec, NumberSpec, ParamDefinition, StringSpec},
};

pub const NUMBER_PATTERN: &str = r"^[+-]?\d+(\.\d+)?([eE][+-]?\d+)?$";
pub const DATE_PATTERN: &str = r"\d{4}-\d{2}-\d{2}";

pub fn string_internal(spec: &StringSpec, stable: &str) -> String {
	if spec.number {
		return stable.replace(',', "");
	}
	if spec.is_sql {
		return stable.to_string();
	}

	format!("'{}'", stable.replace('\'', "''"))
}

pub fn validate_string(param: &ParamDefinition, spec: &StringSpec, stable: &str) -> Result<()> {
	if spec.number {
		let value = stable.replace(',', "");

		if !compile(param, NUMBER_PATTERN)?.is_match(&value) || value.parse::<f64>().is_err() {
			return Err(Error::user_input(format!(
				"value must be numerical; '{stable}' is invalid."
			)));
		}
	} else if let Some(pattern) = spec.regex.as_deref() {
		if stable == "*" {
			return Err(Error::user_input(format!(
				"value '{stable}' cannot be used on its own; it needs to be part of a word."
			)));
		}
		if !compile(param, pattern)?.is_match(stable) {
			return Err(Error::user_input(format!(
				"value '{stable}' is invalid and probably contains illegal characters. It must match the regular expression '{pattern}'"
			)));
		}
	}

	let length = stable.chars().count();

	if spec.max_length > 0 && length > spec.max_length {
		return Err(Error::user_input(format!(
			"value cannot be longer than {} characters (it is {length}).",
			spec.max_length
		)));
	}

	Ok(())
}

pub fn validate_number(param: &ParamDefinition, spec: &NumberSpec, stable: &str) -> Result<()> {
	let cleaned = stable.replace(',', "");
	let value = parse_number(param, &cleaned)?;

	check_number_bounds(spec.integer, spec.min, spec.max, value, &cleaned)
}

pub fn validate_date(param: &ParamDefinition, spec: &DateSpec, stable: &str) -> Result<()> {
	let date = parse_date(stable)?;
	let pattern = spec.regex.as_deref().unwrap_or(DATE_PATTERN);

	if !compile(param, pattern)?.is_match(stable) {
		return Err(Error::user_input(format!(
			"value '{stable}' is invalid and probably contains illegal characters. It must match the regular expression '{pattern}'"
		)));
	}

	if let Some(min_date) = spec.min_date.as_deref()
		&& date < parse_model_date(param, min_date)?
	{
		return Err(Error::user_input(format!(
			"The date '{stable}' should not be earlier than '{min_date}'"
		)));
	}
	if let Some(max_date) = spec.max_date.as_deref()
		&& date > parse_model_date(param, max_date)?
	{
		return Err(Error::user_input(format!("The date '{stable}' should not be after '{max_date}'")));
	}

	Ok(())
}

/// Answer and dataset params hold the positive id of a step or a dataset.
pub fn validate_id(param: &ParamDefinition, stable: &str, label: &str) -> Result<()> {
	match stable.trim().parse::<i64>() {
		Ok(id) if id > 0 => Ok(()),
		_ => Err(Error::user_input(format!(
			"Parameter '{}' must hold a {label} id; '{stable}' is invalid.",
			param.prompt
		))),
	}
}

pub fn parse_number(param: &ParamDefinition, value: &str) -> Result<f64> {
	if !compile(param, NUMBER_PATTERN)?.is_match(value) {
		return Err(Error::user_input(format!(
			"value '{value}' is invalid. It must match the regular expression '{NUMBER_PATTERN}'"
		)));
	}

	value
		.parse::<f64>()
		.map_err(|_| Error::user_input(format!("value must be numerical; '{value}' is invalid.")))
}

pub fn check_number_bounds(
	integer: bool,
	min: Option<f64>,
	max: Option<f64>,
	value: f64,
	text: &str,
) -> Result<()> {
	if integer && value.fract() != 0.0 {
		return Err(Error::user_input(format!("value '{text}' must be an integer.")));
	}
	if let Some(min) = min
		&& value < min
	{
		return Err(Error::user_input(format!(
			"value '{text}' must be greater than or equal to '{min}'"
		)));
	}
	if let Some(max) = max
		&& value > max
	{
		return Err(Error::user_input(format!("value '{text}' must be less than or equal to '{max}'")));
	}

	Ok(())
}

pub fn parse_date(value: &str) -> Result<Date> {
	Date::parse(value.trim(), format_description!("[year]-[month]-[day]")).map_err(|_| {
		Error::user_input(format!(
			"value '{value}' cannot be parsed as an Iso1806 date.  Make sure the data is in the yyyy-mm-dd format"
		))
	})
}

fn parse_model_date(param: &ParamDefinition, value: &str) -> Result<Date> {
	parse_date(value).map_err(|_| {
		Error::model(format!("Param {} declares an invalid date bound '{value}'.", param.full_name))
	})
}

fn compile(param: &ParamDefinition, pattern: &str) -> Result<Regex> {
	Regex::new(pattern).map_err(|err| {
		Error::model(format!("Param {} has an invalid regex: {err}", param.full_name))
	})
}
