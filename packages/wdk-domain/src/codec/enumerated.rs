use crate::{
	Error, Result,
	param::{DisplayType, ParamDefinition},
	vocab::VocabularyInstance,
};

/// Splits a stable value into its terms. Single-pick values are one term even when they
/// contain commas.
pub fn convert_to_terms(param: &ParamDefinition, stable: &str) -> Vec<String> {
	let multi_pick = param.enum_settings().is_some_and(|settings| settings.multi_pick);

	if !multi_pick {
		let term = stable.trim();

		return if term.is_empty() { Vec::new() } else { vec![term.to_string()] };
	}

	stable
		.split(',')
		.map(str::trim)
		.filter(|term| !term.is_empty())
		.map(str::to_string)
		.collect()
}

pub fn validate(
	param: &ParamDefinition,
	stable: &str,
	instance: &VocabularyInstance,
) -> Result<()> {
	let Some(settings) = param.enum_settings() else {
		return Ok(());
	};

	if settings.skip_validation {
		return Ok(());
	}

	let terms = convert_to_terms(param, stable);

	if terms.is_empty() {
		if param.allow_empty {
			return Ok(());
		}

		return Err(Error::user_input(format!(
			"At least one value for {} must be selected.",
			param.prompt
		)));
	}

	let selected = if settings.effective_display_type() == DisplayType::TreeBox
		&& settings.count_only_leaves
	{
		instance.tree().count_selected_leaves(&terms)
	} else {
		terms.len()
	};
	let min = settings.min_selected_count.filter(|min| *min > 0);
	let max = settings.effective_max_selected().filter(|max| *max > 0);
	let below = min.is_some_and(|min| selected < min as usize);
	let above = max.is_some_and(|max| selected > max as usize);

	if below || above {
		let lower = min.map_or_else(|| "( Inf".to_string(), |min| format!("[ {min}"));
		let upper = max.map_or_else(|| "Inf )".to_string(), |max| format!("{max} ]"));

		return Err(Error::user_input(format!(
			"Number of selected values ({selected}) was not in range {lower}, {upper} for parameter {}",
			param.prompt
		)));
	}

	let invalid: String = terms
		.iter()
		.filter(|term| !instance.contains(term))
		.map(|term| format!("Invalid term for param [{}]: {term}. \n", param.full_name))
		.collect();

	if !invalid.is_empty() {
		return Err(Error::user_input(invalid));
	}

	Ok(())
}

/// Internal values of the valid selected terms joined with commas. Invalid terms are dropped.
pub fn internal(
	param: &ParamDefinition,
	stable: &str,
	instance: &VocabularyInstance,
) -> Result<String> {
	let quote = param.enum_settings().is_some_and(|settings| settings.quote);
	let values: Vec<String> = convert_to_terms(param, stable)
		.iter()
		.filter_map(|term| instance.internal(term))
		.map(|value| if quote { quote_value(value) } else { value.to_string() })
		.collect();

	if values.is_empty() {
		tracing::debug!(param = %param.full_name, stable, "No valid terms in stable value.");
	}

	Ok(values.join(","))
}

pub fn display(param: &ParamDefinition, stable: &str, instance: &VocabularyInstance) -> String {
	convert_to_terms(param, stable)
		.iter()
		.map(|term| instance.display(term).unwrap_or(term).to_string())
		.collect::<Vec<_>>()
		.join(", ")
}

fn quote_value(value: &str) -> String {
	if value.len() >= 2 && value.starts_with('\'') && value.ends_with('\'') {
		return value.to_string();
	}

	format!("'{}'", value.replace('\'', "''"))
}
