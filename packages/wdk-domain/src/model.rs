use std::collections::BTreeMap;

use crate::{
	Error, Result,
	param::{ParamContext, ParamDefinition},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QuestionKind {
	Leaf,
	Transform,
	Boolean { operator_param: String },
}

#[derive(Clone, Debug)]
pub struct Question {
	pub full_name: String,
	pub display_name: String,
	pub short_display_name: String,
	pub record_class: String,
	pub kind: QuestionKind,
	params: ParamContext,
	answer_param_names: Vec<String>,
}
impl Question {
	pub fn new(
		full_name: &str,
		record_class: &str,
		kind: QuestionKind,
		params: Vec<ParamDefinition>,
	) -> Result<Self> {
		let params = ParamContext::build(full_name, params)?;
		let answer_param_names = params.answer_param_names();
		let short_name = full_name.rsplit('.').next().unwrap_or(full_name).to_string();

		match &kind {
			QuestionKind::Boolean { operator_param } => {
				params.require(operator_param)?;

				if answer_param_names.len() != 2 {
					return Err(Error::model(format!(
						"Boolean question {full_name} must declare two answer params."
					)));
				}
			},
			QuestionKind::Transform if answer_param_names.is_empty() => {
				return Err(Error::model(format!(
					"Transform question {full_name} must declare an answer param."
				)));
			},
			_ => {},
		}

		Ok(Self {
			full_name: full_name.to_string(),
			display_name: short_name.clone(),
			short_display_name: short_name,
			record_class: record_class.to_string(),
			kind,
			params,
			answer_param_names,
		})
	}

	pub fn with_display_names(mut self, display_name: &str, short_display_name: &str) -> Self {
		self.display_name = display_name.to_string();
		self.short_display_name = short_display_name.to_string();

		self
	}

	pub fn params(&self) -> &ParamContext {
		&self.params
	}

	/// Answer params in declaration order: primary input first, then secondary.
	pub fn answer_param_names(&self) -> &[String] {
		&self.answer_param_names
	}

	pub fn input_count(&self) -> usize {
		self.answer_param_names.len()
	}

	pub fn is_combined(&self) -> bool {
		!self.answer_param_names.is_empty()
	}

	pub fn is_boolean(&self) -> bool {
		matches!(self.kind, QuestionKind::Boolean { .. })
	}
}

/// Questions by full name, as supplied by model loading.
#[derive(Clone, Debug, Default)]
pub struct ModelCatalog {
	questions: BTreeMap<String, Question>,
}
impl ModelCatalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_question(mut self, question: Question) -> Result<Self> {
		if self.questions.contains_key(&question.full_name) {
			return Err(Error::model(format!(
				"Question {} is declared more than once.",
				question.full_name
			)));
		}

		self.questions.insert(question.full_name.clone(), question);

		Ok(self)
	}

	pub fn question(&self, full_name: &str) -> Option<&Question> {
		self.questions.get(full_name)
	}

	/// Looks up a question named by a request.
	pub fn require(&self, full_name: &str) -> Result<&Question> {
		self.question(full_name)
			.ok_or_else(|| Error::user_input(format!("Question {full_name} does not exist.")))
	}

	/// Looks up the question of a stored step; a missing question means the model and the
	/// stored data disagree.
	pub fn require_for_step(&self, full_name: &str, step_id: i64) -> Result<&Question> {
		self.question(full_name).ok_or_else(|| {
			Error::model(format!("Step {step_id} refers to unknown question {full_name}."))
		})
	}
}
