use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{Error, Result, model::Question};

/// Estimated size meaning the count must be recomputed.
pub const RESET_SIZE_FLAG: i64 = -1;
/// Size of the custom name column.
pub const NAME_COLUMN_MAX_SIZE: usize = 200;
pub const DISPLAY_NAME_MAX_CHARS: usize = 4000;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterOption {
	pub name: String,
	pub value: Value,
	#[serde(default)]
	pub disabled: bool,
}

/// What a step asks for: a question, its param stable values, filters and weight.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnswerSpec {
	pub question_name: String,
	pub legacy_filter_name: Option<String>,
	pub assigned_weight: i32,
	pub params: BTreeMap<String, String>,
	#[serde(default)]
	pub filters: Vec<FilterOption>,
	#[serde(default)]
	pub view_filters: Vec<FilterOption>,
}
impl AnswerSpec {
	pub fn new(question_name: &str) -> Self {
		Self {
			question_name: question_name.to_string(),
			legacy_filter_name: None,
			assigned_weight: 0,
			params: BTreeMap::new(),
			filters: Vec::new(),
			view_filters: Vec::new(),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StepNode {
	id: i64,
	user_id: i64,
	strategy_id: Option<i64>,
	project_id: String,
	project_version: String,
	#[serde(with = "time::serde::rfc3339")]
	created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	last_run_at: OffsetDateTime,
	custom_name: Option<String>,
	is_deleted: bool,
	collapsible: bool,
	collapsed_name: Option<String>,
	estimated_size: i64,
	in_memory_only: bool,
	answer: AnswerSpec,
	/// Answer params of the question: the primary input first, then the secondary.
	answer_param_names: Vec<String>,
}
impl StepNode {
	pub fn id(&self) -> i64 {
		self.id
	}

	pub fn user_id(&self) -> i64 {
		self.user_id
	}

	pub fn strategy_id(&self) -> Option<i64> {
		self.strategy_id
	}

	pub fn project_id(&self) -> &str {
		&self.project_id
	}

	pub fn project_version(&self) -> &str {
		&self.project_version
	}

	pub fn created_at(&self) -> OffsetDateTime {
		self.created_at
	}

	pub fn last_run_at(&self) -> OffsetDateTime {
		self.last_run_at
	}

	pub fn custom_name(&self) -> Option<&str> {
		self.custom_name.as_deref()
	}

	pub fn is_deleted(&self) -> bool {
		self.is_deleted
	}

	/// The stored flag only; see `StepGraph::is_collapsible` for the effective value.
	pub fn collapsible_flag(&self) -> bool {
		self.collapsible
	}

	pub fn collapsed_name(&self) -> Option<&str> {
		self.collapsed_name.as_deref().or(self.custom_name.as_deref())
	}

	pub fn explicit_collapsed_name(&self) -> Option<&str> {
		self.collapsed_name.as_deref()
	}

	pub fn estimated_size(&self) -> i64 {
		self.estimated_size
	}

	pub fn is_dirty(&self) -> bool {
		self.estimated_size == RESET_SIZE_FLAG
	}

	pub fn in_memory_only(&self) -> bool {
		self.in_memory_only
	}

	pub fn answer(&self) -> &AnswerSpec {
		&self.answer
	}

	pub fn question_name(&self) -> &str {
		&self.answer.question_name
	}

	pub fn answer_param_names(&self) -> &[String] {
		&self.answer_param_names
	}

	pub fn primary_input(&self) -> Option<i64> {
		self.input_at(0)
	}

	pub fn secondary_input(&self) -> Option<i64> {
		self.input_at(1)
	}

	pub fn inputs(&self) -> Vec<i64> {
		(0..self.answer_param_names.len()).filter_map(|position| self.input_at(position)).collect()
	}

	pub fn is_combined(&self) -> bool {
		self.primary_input().is_some()
	}

	pub fn is_boolean(&self) -> bool {
		self.secondary_input().is_some()
	}

	/// Custom name cleaned for display, or the question's short name when there is none.
	pub fn display_name(&self, question: &Question) -> String {
		let cleaned = self.custom_name.as_deref().map(clean_display_name).unwrap_or_default();

		if cleaned.is_empty() { question.short_display_name.clone() } else { cleaned }
	}

	/// Detached copy: no strategy and no answer-param values.
	pub fn without_strategy(&self) -> Self {
		let mut node = self.clone();

		node.strategy_id = None;

		for name in &self.answer_param_names {
			node.answer.params.remove(name);
		}

		node
	}

	fn input_at(&self, position: usize) -> Option<i64> {
		let name = self.answer_param_names.get(position)?;

		self.answer.params.get(name)?.trim().parse().ok()
	}
}

/// Builds immutable `StepNode`s. Starting from an existing node copies every field.
#[derive(Clone, Debug)]
pub struct StepBuilder {
	node: StepNode,
}
impl StepBuilder {
	pub fn new(id: i64, user_id: i64, question: &Question) -> Self {
		let now = OffsetDateTime::now_utc();

		Self {
			node: StepNode {
				id,
				user_id,
				strategy_id: None,
				project_id: String::new(),
				project_version: String::new(),
				created_at: now,
				last_run_at: now,
				custom_name: None,
				is_deleted: false,
				collapsible: false,
				collapsed_name: None,
				estimated_size: RESET_SIZE_FLAG,
				in_memory_only: false,
				answer: AnswerSpec::new(&question.full_name),
				answer_param_names: question.answer_param_names().to_vec(),
			},
		}
	}

	pub fn from_step(step: &StepNode) -> Self {
		Self { node: step.clone() }
	}

	/// Rebuilds a stored row; `answer_param_names` come from the step's question.
	pub fn from_parts(
		id: i64,
		user_id: i64,
		answer: AnswerSpec,
		answer_param_names: Vec<String>,
	) -> Self {
		let now = OffsetDateTime::now_utc();

		Self {
			node: StepNode {
				id,
				user_id,
				strategy_id: None,
				project_id: String::new(),
				project_version: String::new(),
				created_at: now,
				last_run_at: now,
				custom_name: None,
				is_deleted: false,
				collapsible: false,
				collapsed_name: None,
				estimated_size: RESET_SIZE_FLAG,
				in_memory_only: false,
				answer,
				answer_param_names,
			},
		}
	}

	pub fn id(mut self, id: i64) -> Self {
		self.node.id = id;

		self
	}

	pub fn strategy_id(mut self, strategy_id: Option<i64>) -> Self {
		self.node.strategy_id = strategy_id;

		self
	}

	pub fn project(mut self, project_id: &str, project_version: &str) -> Self {
		self.node.project_id = project_id.to_string();
		self.node.project_version = project_version.to_string();

		self
	}

	pub fn timestamps(mut self, created_at: OffsetDateTime, last_run_at: OffsetDateTime) -> Self {
		self.node.created_at = created_at;
		self.node.last_run_at = last_run_at;

		self
	}

	pub fn custom_name(mut self, custom_name: Option<String>) -> Self {
		self.node.custom_name = custom_name;

		self
	}

	pub fn deleted(mut self, is_deleted: bool) -> Self {
		self.node.is_deleted = is_deleted;

		self
	}

	pub fn collapsible(mut self, collapsible: bool) -> Self {
		self.node.collapsible = collapsible;

		self
	}

	pub fn collapsed_name(mut self, collapsed_name: Option<String>) -> Self {
		self.node.collapsed_name = collapsed_name;

		self
	}

	pub fn estimated_size(mut self, estimated_size: i64) -> Self {
		self.node.estimated_size = estimated_size;

		self
	}

	pub fn mark_result_size_dirty(self) -> Self {
		self.estimated_size(RESET_SIZE_FLAG)
	}

	pub fn in_memory_only(mut self, in_memory_only: bool) -> Self {
		self.node.in_memory_only = in_memory_only;

		self
	}

	pub fn params(mut self, params: BTreeMap<String, String>) -> Self {
		self.node.answer.params = params;

		self
	}

	pub fn legacy_filter_name(mut self, legacy_filter_name: Option<String>) -> Self {
		self.node.answer.legacy_filter_name = legacy_filter_name;

		self
	}

	pub fn assigned_weight(mut self, assigned_weight: i32) -> Self {
		self.node.answer.assigned_weight = assigned_weight;

		self
	}

	pub fn filters(mut self, filters: Vec<FilterOption>, view_filters: Vec<FilterOption>) -> Self {
		self.node.answer.filters = filters;
		self.node.answer.view_filters = view_filters;

		self
	}

	/// Sets the answer params to `inputs` in order: primary, then secondary.
	pub fn inputs(mut self, inputs: &[i64]) -> Self {
		for (name, id) in self.node.answer_param_names.iter().zip(inputs) {
			self.node.answer.params.insert(name.clone(), id.to_string());
		}

		self
	}

	/// Points every answer param that references `old_id` at `new_id`.
	pub fn replace_input(mut self, old_id: i64, new_id: i64) -> Self {
		for name in &self.node.answer_param_names {
			if let Some(value) = self.node.answer.params.get_mut(name)
				&& value.trim().parse::<i64>().ok() == Some(old_id)
			{
				*value = new_id.to_string();
			}
		}

		self
	}

	pub fn build(self) -> Result<StepNode> {
		let mut node = self.node;

		node.custom_name =
			normalize_custom_name(node.custom_name.as_deref(), NAME_COLUMN_MAX_SIZE)?;
		node.collapsed_name = node
			.collapsed_name
			.map(|name| name.trim().to_string())
			.filter(|name| !name.is_empty());

		match node.strategy_id {
			None =>
				if let Some(name) = node
					.answer_param_names
					.iter()
					.find(|name| node.answer.params.contains_key(*name))
				{
					return Err(Error::model(format!(
						"Step {} belongs to no strategy but sets answer param {name}.",
						node.id
					)));
				},
			Some(strategy_id) => {
				let mut unset = None;

				for name in &node.answer_param_names {
					match node.answer.params.get(name) {
						None => unset = unset.or(Some(name)),
						Some(value) if value.trim().parse::<i64>().is_err() =>
							return Err(Error::model(format!(
								"Step {} of strategy {strategy_id} has no step id in answer param {name}: {value}.",
								node.id
							))),
						Some(_) =>
							if let Some(unset) = unset {
								return Err(Error::model(format!(
									"Step {} of strategy {strategy_id} sets answer param {name} but not {unset}.",
									node.id
								)));
							},
					}
				}
			},
		}

		Ok(node)
	}
}

/// Trims a custom name; empty means none. Names longer than `max_chars` are rejected.
pub fn normalize_custom_name(raw: Option<&str>, max_chars: usize) -> Result<Option<String>> {
	let Some(name) = raw.map(str::trim).filter(|name| !name.is_empty()) else {
		return Ok(None);
	};
	let length = name.chars().count();

	if length > max_chars {
		return Err(Error::user_input(format!(
			"The step name is {length} characters long; names may not exceed {max_chars} characters."
		)));
	}

	Ok(Some(name.to_string()))
}

/// Removes markup tags and double quotes, collapses whitespace and truncates.
pub fn clean_display_name(raw: &str) -> String {
	let mut stripped = String::with_capacity(raw.len());
	let mut in_tag = false;

	for ch in raw.chars() {
		match ch {
			'<' => in_tag = true,
			'>' if in_tag => in_tag = false,
			'"' => {},
			_ if !in_tag => stripped.push(ch),
			_ => {},
		}
	}

	stripped
		.split_whitespace()
		.collect::<Vec<_>>()
		.join(" ")
		.chars()
		.take(DISPLAY_NAME_MAX_CHARS)
		.collect()
}
