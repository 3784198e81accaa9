use std::collections::{BTreeMap, VecDeque};

use time::OffsetDateTime;

use crate::{
	Error, Result, codec,
	codec::CodecContext,
	model::{ModelCatalog, Question},
	param::ParamKind,
	step::{self, NAME_COLUMN_MAX_SIZE, StepBuilder, StepNode},
	strategy::{GraphEdit, StepGraph},
	vocab::{QueryRunner, VocabCache, VocabularyResolver},
};

const MAX_WEIGHT_DIGITS: usize = 9;

/// Source of fresh step ids.
pub trait StepIdAllocator {
	fn next_step_id(&mut self) -> Result<i64>;
}

/// Ids reserved ahead of a mutation, typically from a database sequence.
#[derive(Clone, Debug, Default)]
pub struct PreallocatedIds {
	ids: VecDeque<i64>,
}
impl PreallocatedIds {
	pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
		Self { ids: ids.into_iter().collect() }
	}

	pub fn remaining(&self) -> usize {
		self.ids.len()
	}
}
impl StepIdAllocator for PreallocatedIds {
	fn next_step_id(&mut self) -> Result<i64> {
		self.ids.pop_front().ok_or_else(|| Error::model("No preallocated step id is left."))
	}
}

/// Parses an assigned weight: an optionally signed integer of at most nine digits.
pub fn parse_weight(raw: &str) -> Result<i32> {
	let digits = raw.strip_prefix(['+', '-']).unwrap_or(raw);

	if digits.is_empty() || !digits.chars().all(|ch| ch.is_ascii_digit()) {
		return Err(Error::user_input(format!(
			"Invalid weight value: '{raw}'. Only integer numbers are allowed."
		)));
	}
	if digits.len() > MAX_WEIGHT_DIGITS {
		return Err(Error::user_input(format!("Weight number is too big: {raw}")));
	}

	raw.parse().map_err(|_| Error::user_input(format!("Weight number is too big: {raw}")))
}

/// A new step as submitted by a user.
#[derive(Clone, Debug, Default)]
pub struct StepRequest {
	pub question_name: String,
	/// Stable values of the question's non-answer params.
	pub params: BTreeMap<String, String>,
	pub filter_name: Option<String>,
	pub weight: Option<String>,
	pub custom_name: Option<String>,
	/// Detached step to use as the second operand of a boolean question.
	pub secondary_step: Option<StepNode>,
}

/// Changes to an existing step. With neither a question nor params only the filter, weight and
/// name change.
#[derive(Clone, Debug, Default)]
pub struct ReviseRequest {
	pub step_id: i64,
	pub question_name: Option<String>,
	pub params: BTreeMap<String, String>,
	pub filter_name: Option<String>,
	pub weight: Option<String>,
	pub custom_name: Option<String>,
}

/// Applies user edits to a strategy.
///
/// Every request is validated before an id is allocated or a node is built, so a failure leaves
/// no partial edit behind.
pub struct StepMutationEngine<'a> {
	model: &'a ModelCatalog,
	queries: &'a dyn QueryRunner,
	cache: Option<&'a VocabCache>,
	user_id: i64,
	max_custom_name_chars: usize,
	now: OffsetDateTime,
}
impl<'a> StepMutationEngine<'a> {
	pub fn new(model: &'a ModelCatalog, queries: &'a dyn QueryRunner, user_id: i64) -> Self {
		Self {
			model,
			queries,
			cache: None,
			user_id,
			max_custom_name_chars: NAME_COLUMN_MAX_SIZE,
			now: OffsetDateTime::now_utc(),
		}
	}

	pub fn with_cache(mut self, cache: &'a VocabCache) -> Self {
		self.cache = Some(cache);

		self
	}

	pub fn with_max_custom_name_chars(mut self, max_custom_name_chars: usize) -> Self {
		self.max_custom_name_chars = max_custom_name_chars.min(NAME_COLUMN_MAX_SIZE);

		self
	}

	pub fn at(mut self, now: OffsetDateTime) -> Self {
		self.now = now;

		self
	}

	/// Validates the stable values of a question's non-answer params in dependency order.
	///
	/// Missing values take the param's empty value when empty is allowed.
	pub fn build_params(
		&self,
		question: &Question,
		values: &BTreeMap<String, String>,
	) -> Result<BTreeMap<String, String>> {
		let context = question.params();

		for name in values.keys() {
			match context.get(name) {
				None =>
					return Err(Error::user_input(format!(
						"Question {} has no param {name}.",
						question.full_name
					))),
				Some(param) if matches!(param.kind, ParamKind::Answer) =>
					return Err(Error::user_input(format!(
						"Param {name} of question {} names an input step and cannot be set directly.",
						question.full_name
					))),
				Some(_) => {},
			}
		}

		let mut resolver = VocabularyResolver::new(context, self.queries, self.user_id);

		if let Some(cache) = self.cache {
			resolver = resolver.with_cache(cache);
		}

		let mut validated = BTreeMap::new();

		for param in context.resolution_order() {
			if matches!(param.kind, ParamKind::Answer) {
				continue;
			}

			let stable = match values.get(&param.name) {
				Some(value) => {
					let ctx = CodecContext::new(&resolver, &validated);

					codec::validate(param, value, &ctx)?;

					value.clone()
				},
				None => codec::empty_or_required(param)?,
			};

			validated.insert(param.name.clone(), stable);
		}

		Ok(validated)
	}

	/// Replaces a step with a revised copy under a new id.
	pub fn revise(
		&self,
		graph: &StepGraph,
		ids: &mut dyn StepIdAllocator,
		request: ReviseRequest,
	) -> Result<GraphEdit> {
		let old = graph.require_step(request.step_id)?;
		let weight = match request.weight.as_deref() {
			Some(raw) => parse_weight(raw)?,
			None => old.answer().assigned_weight,
		};
		let custom_name = match request.custom_name.as_deref() {
			Some(raw) => step::normalize_custom_name(Some(raw), self.max_custom_name_chars)?,
			None => old.custom_name().map(str::to_string),
		};
		let filter_name = non_empty(request.filter_name.as_deref())
			.or_else(|| old.answer().legacy_filter_name.clone());
		let new_step = if request.question_name.is_some() || !request.params.is_empty() {
			let question_name = request.question_name.as_deref().unwrap_or(old.question_name());
			let question = self.model.require(question_name)?;
			let params = self.build_params(question, &request.params)?;
			let inputs = old.inputs();

			ensure_input_count(question, inputs.len())?;

			let (filters, view_filters) = if question.full_name == old.question_name() {
				(old.answer().filters.clone(), old.answer().view_filters.clone())
			} else {
				(Vec::new(), Vec::new())
			};

			self.new_step(graph, ids.next_step_id()?, question)
				.custom_name(custom_name)
				.collapsible(old.collapsible_flag())
				.collapsed_name(old.explicit_collapsed_name().map(str::to_string))
				.params(params)
				.inputs(&inputs)
				.filters(filters, view_filters)
				.legacy_filter_name(filter_name)
				.assigned_weight(weight)
				.build()?
		} else {
			StepBuilder::from_step(old)
				.id(ids.next_step_id()?)
				.timestamps(self.now, old.last_run_at())
				.custom_name(custom_name)
				.legacy_filter_name(filter_name)
				.assigned_weight(weight)
				.mark_result_size_dirty()
				.build()?
		};
		let edit = graph.replace(old.id(), new_step, Vec::new())?;

		Ok(self.touched(edit))
	}

	/// Inserts a new step before `anchor_step_id`.
	///
	/// When the anchor has a primary input P, the new step reads from P and the anchor reads from
	/// the new step. A first step is instead rebuilt under a new id to read from the new step,
	/// which becomes the first step.
	pub fn insert(
		&self,
		graph: &StepGraph,
		ids: &mut dyn StepIdAllocator,
		anchor_step_id: i64,
		request: StepRequest,
	) -> Result<GraphEdit> {
		let anchor = graph.require_step(anchor_step_id)?;
		let prepared = self.prepare(&request)?;

		match anchor.primary_input() {
			Some(previous_step_id) => {
				let mut inputs = vec![previous_step_id];

				inputs.extend(request.secondary_step.as_ref().map(StepNode::id));
				ensure_input_count(prepared.question, inputs.len())?;

				let new_step = self.requested_step(graph, ids, &prepared, &inputs)?.build()?;
				let extras = self.adopt(graph, request.secondary_step)?;
				let edit = graph.replace(previous_step_id, new_step, extras)?;

				Ok(self.touched(edit))
			},
			None => {
				let anchor_question =
					self.model.require_for_step(anchor.question_name(), anchor.id())?;

				if !anchor_question.is_combined() {
					return Err(Error::user_input(format!(
						"Step {} does not take an input step, so no step can be inserted before it.",
						anchor.id()
					)));
				}
				if request.secondary_step.is_some() {
					return Err(Error::user_input(
						"A new first step cannot combine with another step.",
					));
				}

				ensure_input_count(prepared.question, 0)?;

				let first_step = self.requested_step(graph, ids, &prepared, &[])?.build()?;
				let rebuilt_anchor = StepBuilder::from_step(anchor)
					.id(ids.next_step_id()?)
					.inputs(&[first_step.id()])
					.mark_result_size_dirty()
					.build()?;
				let edit = graph.replace(anchor.id(), rebuilt_anchor, vec![first_step])?;

				Ok(self.touched(edit))
			},
		}
	}

	/// Adds a new step on top of `root_step_id`.
	///
	/// On the strategy root the new step becomes the root. On a nested branch root the new step
	/// replaces the branch root in its consumer and keeps the branch's collapsed presentation.
	pub fn append(
		&self,
		graph: &StepGraph,
		ids: &mut dyn StepIdAllocator,
		root_step_id: i64,
		request: StepRequest,
	) -> Result<GraphEdit> {
		let branch_root = graph.require_step(root_step_id)?;
		let prepared = self.prepare(&request)?;
		let mut inputs = vec![root_step_id];

		inputs.extend(request.secondary_step.as_ref().map(StepNode::id));
		ensure_input_count(prepared.question, inputs.len())?;

		if root_step_id == graph.root_step_id() {
			let new_step = self.requested_step(graph, ids, &prepared, &inputs)?.build()?;
			let extras = self.adopt(graph, request.secondary_step)?;

			return Ok(self.touched(graph.add_step(new_step, extras)?));
		}

		let collapsed_name = branch_root.collapsed_name().map(str::to_string);
		let new_step = self
			.requested_step(graph, ids, &prepared, &inputs)?
			.collapsible(true)
			.collapsed_name(collapsed_name)
			.build()?;
		let extras = self.adopt(graph, request.secondary_step)?;
		let edit = graph.replace(root_step_id, new_step, extras)?;

		Ok(self.touched(edit))
	}

	fn prepare(&self, request: &StepRequest) -> Result<PreparedStep<'a>> {
		let question = self.model.require(&request.question_name)?;
		let params = self.build_params(question, &request.params)?;
		let weight = request.weight.as_deref().map(parse_weight).transpose()?.unwrap_or(0);
		let custom_name = step::normalize_custom_name(
			request.custom_name.as_deref(),
			self.max_custom_name_chars,
		)?;

		if let Some(secondary) = &request.secondary_step
			&& secondary.strategy_id().is_some()
		{
			return Err(Error::user_input(format!(
				"Step {} already belongs to a strategy and cannot be combined again.",
				secondary.id()
			)));
		}

		Ok(PreparedStep {
			question,
			params,
			weight,
			custom_name,
			filter_name: non_empty(request.filter_name.as_deref()),
		})
	}

	fn requested_step(
		&self,
		graph: &StepGraph,
		ids: &mut dyn StepIdAllocator,
		prepared: &PreparedStep,
		inputs: &[i64],
	) -> Result<StepBuilder> {
		let builder = self
			.new_step(graph, ids.next_step_id()?, prepared.question)
			.custom_name(prepared.custom_name.clone())
			.params(prepared.params.clone())
			.inputs(inputs)
			.legacy_filter_name(prepared.filter_name.clone())
			.assigned_weight(prepared.weight);

		Ok(builder)
	}

	fn new_step(&self, graph: &StepGraph, step_id: i64, question: &Question) -> StepBuilder {
		let meta = graph.meta();

		StepBuilder::new(step_id, self.user_id, question)
			.strategy_id(Some(meta.strategy_id))
			.project(&meta.project_id, &meta.version)
			.timestamps(self.now, self.now)
	}

	/// Moves a detached step into the strategy under its existing id.
	fn adopt(&self, graph: &StepGraph, orphan: Option<StepNode>) -> Result<Vec<StepNode>> {
		let Some(orphan) = orphan else { return Ok(Vec::new()) };

		if graph.contains(orphan.id()) {
			return Err(Error::model(format!(
				"Detached step {} is already part of strategy {}.",
				orphan.id(),
				graph.strategy_id()
			)));
		}

		let adopted =
			StepBuilder::from_step(&orphan).strategy_id(Some(graph.strategy_id())).build()?;

		Ok(vec![adopted])
	}

	fn touched(&self, mut edit: GraphEdit) -> GraphEdit {
		edit.graph = edit.graph.touched(self.now);

		edit
	}
}

/// A validated `StepRequest`.
struct PreparedStep<'a> {
	question: &'a Question,
	params: BTreeMap<String, String>,
	weight: i32,
	custom_name: Option<String>,
	filter_name: Option<String>,
}

fn ensure_input_count(question: &Question, given: usize) -> Result<()> {
	let expected = question.input_count();

	if expected != given {
		return Err(Error::user_input(format!(
			"Question {} takes {expected} input step(s), but {given} were given.",
			question.full_name
		)));
	}

	Ok(())
}

fn non_empty(raw: Option<&str>) -> Option<String> {
	raw.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
	use crate::mutation::{self, PreallocatedIds, StepIdAllocator};

	#[test]
	fn weights_accept_signed_integers_of_nine_digits() {
		assert_eq!(mutation::parse_weight("-5").expect("valid"), -5);
		assert_eq!(mutation::parse_weight("0").expect("valid"), 0);
		assert_eq!(mutation::parse_weight("+7").expect("valid"), 7);
		assert_eq!(mutation::parse_weight("999999999").expect("valid"), 999_999_999);
	}

	#[test]
	fn weights_reject_other_input() {
		for raw in ["12a", "1234567890", "", "-", "1.5", " 3"] {
			let err = mutation::parse_weight(raw).expect_err("invalid");

			assert!(err.is_user_facing(), "{raw} should be a user error");
		}
	}

	#[test]
	fn preallocated_ids_run_out() {
		let mut ids = PreallocatedIds::new([4, 5]);

		assert_eq!(ids.next_step_id().expect("id"), 4);
		assert_eq!(ids.next_step_id().expect("id"), 5);
		assert!(!ids.next_step_id().expect_err("exhausted").is_user_facing());
	}
}
