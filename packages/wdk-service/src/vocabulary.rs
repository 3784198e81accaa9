use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use wdk_domain::VocabularyResolver;

use crate::{Result, WdkService};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct VocabularyRequest {
	pub user_id: i64,
	pub question_name: String,
	pub param_name: String,
	/// Current values of the question's params; missing depended values take their defaults.
	#[serde(default)]
	pub values: BTreeMap<String, String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct CorrectValuesRequest {
	pub user_id: i64,
	pub question_name: String,
	#[serde(default)]
	pub values: BTreeMap<String, String>,
}

impl WdkService {
	/// The vocabulary of one enumerated param as `{"values":[{"term","display","parent"}]}`.
	pub fn vocabulary(&self, req: VocabularyRequest) -> Result<Value> {
		let question = self.model.require(&req.question_name)?;
		let resolver =
			VocabularyResolver::new(question.params(), self.queries.as_ref(), req.user_id)
				.with_cache(&self.vocab_cache);
		let instance = resolver.resolve(&req.param_name, &req.values)?;

		Ok(instance.to_json())
	}

	/// Replaces invalid enumerated values with valid terms or defaults, in dependency order.
	pub fn correct_values(&self, req: CorrectValuesRequest) -> Result<BTreeMap<String, String>> {
		let question = self.model.require(&req.question_name)?;
		let resolver =
			VocabularyResolver::new(question.params(), self.queries.as_ref(), req.user_id)
				.with_cache(&self.vocab_cache);
		let corrected = resolver.fetch_correct_values(&req.values)?;
		let changed =
			corrected.iter().filter(|(name, value)| req.values.get(*name) != Some(*value)).count();

		tracing::debug!(question = %req.question_name, changed, "Param values corrected.");

		Ok(corrected)
	}
}
