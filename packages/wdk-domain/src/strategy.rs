use std::{
	collections::{BTreeMap, BTreeSet},
	fmt::{Display, Formatter, Result as FmtResult},
	str::FromStr,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{
	Error, Result,
	step::{StepBuilder, StepNode},
};

/// Old step id to the id of the node that replaced it.
pub type IdRemapping = BTreeMap<i64, i64>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StrategyMeta {
	pub strategy_id: i64,
	pub user_id: i64,
	pub project_id: String,
	pub version: String,
	pub name: String,
	pub saved_name: Option<String>,
	pub description: Option<String>,
	pub signature: Option<String>,
	pub is_saved: bool,
	pub is_public: bool,
	pub is_deleted: bool,
	#[serde(with = "time::serde::rfc3339")]
	pub created_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub last_modified_at: OffsetDateTime,
	#[serde(with = "time::serde::rfc3339")]
	pub last_viewed_at: OffsetDateTime,
}

/// Identifies a strategy, or one of its nested branches: `"12"` or `"12_40"`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct StrategyKey {
	pub strategy_id: i64,
	pub branch_root_id: Option<i64>,
}
impl FromStr for StrategyKey {
	type Err = Error;

	fn from_str(raw: &str) -> Result<Self> {
		let invalid = || Error::user_input(format!("Invalid strategy key: {raw}."));
		let (strategy, branch) = match raw.trim().split_once('_') {
			Some((strategy, branch)) => (strategy, Some(branch)),
			None => (raw.trim(), None),
		};
		let strategy_id = strategy.parse().map_err(|_| invalid())?;
		let branch_root_id = match branch {
			Some(branch) => Some(branch.parse().map_err(|_| invalid())?),
			None => None,
		};

		Ok(Self { strategy_id, branch_root_id })
	}
}
impl Display for StrategyKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
		match self.branch_root_id {
			Some(branch) => write!(f, "{}_{branch}", self.strategy_id),
			None => write!(f, "{}", self.strategy_id),
		}
	}
}

/// Result of a structural edit: the new graph and the ids it replaced.
#[derive(Clone, Debug)]
pub struct GraphEdit {
	pub graph: StepGraph,
	pub remapping: IdRemapping,
	/// Nodes of the previous graph that are no longer reachable from the root.
	pub removed: Vec<i64>,
}

/// A strategy: steps reachable from one root through primary and secondary inputs.
///
/// Construction checks the shape once. Every edit returns a new graph, so a value that exists is
/// always a single-rooted tree whose input references resolve inside it.
#[derive(Clone, Debug, PartialEq)]
pub struct StepGraph {
	meta: StrategyMeta,
	root_step_id: i64,
	steps: BTreeMap<i64, StepNode>,
}
impl StepGraph {
	pub fn new(meta: StrategyMeta, root_step_id: i64, steps: Vec<StepNode>) -> Result<Self> {
		let mut by_id = BTreeMap::new();

		for step in steps {
			if step.strategy_id() != Some(meta.strategy_id) {
				return Err(Error::model(format!(
					"Step {} does not belong to strategy {}.",
					step.id(),
					meta.strategy_id
				)));
			}
			if by_id.insert(step.id(), step).is_some() {
				return Err(Error::model(format!(
					"Strategy {} contains a step id more than once.",
					meta.strategy_id
				)));
			}
		}

		let graph = Self { meta, root_step_id, steps: by_id };

		graph.check_shape()?;

		Ok(graph)
	}

	pub fn meta(&self) -> &StrategyMeta {
		&self.meta
	}

	pub fn strategy_id(&self) -> i64 {
		self.meta.strategy_id
	}

	pub fn root_step_id(&self) -> i64 {
		self.root_step_id
	}

	pub fn root(&self) -> &StepNode {
		&self.steps[&self.root_step_id]
	}

	pub fn step(&self, step_id: i64) -> Option<&StepNode> {
		self.steps.get(&step_id)
	}

	/// Looks up a step named by a request.
	pub fn require_step(&self, step_id: i64) -> Result<&StepNode> {
		self.step(step_id).ok_or_else(|| {
			Error::user_input(format!(
				"Step {step_id} is not part of strategy {}.",
				self.meta.strategy_id
			))
		})
	}

	pub fn contains(&self, step_id: i64) -> bool {
		self.steps.contains_key(&step_id)
	}

	pub fn len(&self) -> usize {
		self.steps.len()
	}

	pub fn is_empty(&self) -> bool {
		self.steps.is_empty()
	}

	/// Steps ordered by id.
	pub fn all_steps(&self) -> impl Iterator<Item = &StepNode> {
		self.steps.values()
	}

	/// Steps of the main branch, first step first.
	pub fn main_branch(&self) -> Vec<&StepNode> {
		let mut branch = Vec::new();
		let mut current = Some(self.root_step_id);

		while let Some(step) = current.and_then(|id| self.steps.get(&id)) {
			branch.push(step);

			current = step.primary_input();
		}

		branch.reverse();

		branch
	}

	/// `step_id` and every step it reads from, directly or through other steps.
	pub fn nested_branch(&self, step_id: i64) -> Vec<&StepNode> {
		let mut branch = Vec::new();
		let mut stack = vec![step_id];

		while let Some(id) = stack.pop() {
			let Some(step) = self.steps.get(&id) else { continue };

			branch.push(step);
			stack.extend(step.inputs().into_iter().rev());
		}

		branch
	}

	/// The step that takes `step_id` as an input.
	pub fn parent_of(&self, step_id: i64) -> Option<&StepNode> {
		self.steps.values().find(|step| step.inputs().contains(&step_id))
	}

	/// Every step whose result depends on `step_id`, nearest first.
	pub fn downstream_of(&self, step_id: i64) -> Vec<&StepNode> {
		let mut downstream = Vec::new();
		let mut current = step_id;

		while let Some(parent) = self.parent_of(current) {
			downstream.push(parent);

			current = parent.id();
		}

		downstream
	}

	/// Root of the nested branch holding `step_id`, or `None` on the main branch.
	pub fn branch_root_of(&self, step_id: i64) -> Option<i64> {
		let mut current = step_id;

		while let Some(parent) = self.parent_of(current) {
			if parent.primary_input() != Some(current) {
				return Some(current);
			}

			current = parent.id();
		}

		None
	}

	pub fn key_of(&self, step_id: i64) -> StrategyKey {
		let branch_root_id = self.branch_root_of(step_id);

		StrategyKey { strategy_id: self.meta.strategy_id, branch_root_id }
	}

	/// Explicit flag, or a combined step consumed by another step.
	pub fn is_collapsible(&self, step_id: i64) -> bool {
		let Some(step) = self.steps.get(&step_id) else { return false };

		step.collapsible_flag() || (step.is_combined() && self.parent_of(step_id).is_some())
	}

	/// Lowercase blake3 hex over the canonical JSON of the graph's content.
	///
	/// Run state such as timestamps and size estimates is excluded, so running a step keeps the
	/// checksum stable.
	pub fn checksum(&self) -> Result<String> {
		let steps = self
			.steps
			.values()
			.map(|step| {
				let answer = step.answer();

				serde_json::json!({
					"id": step.id(),
					"question": answer.question_name,
					"params": answer.params,
					"legacy_filter": answer.legacy_filter_name,
					"weight": answer.assigned_weight,
					"filters": answer.filters,
					"view_filters": answer.view_filters,
					"custom_name": step.custom_name(),
					"collapsible": step.collapsible_flag(),
					"collapsed_name": step.collapsed_name(),
				})
			})
			.collect::<Vec<Value>>();
		let canonical = serde_json::json!({
			"strategy_id": self.meta.strategy_id,
			"root_step_id": self.root_step_id,
			"name": self.meta.name,
			"saved_name": self.meta.saved_name,
			"is_saved": self.meta.is_saved,
			"steps": steps,
		});
		let bytes = serde_json::to_vec(&canonical).map_err(|err| {
			Error::model(format!("Failed to encode strategy {}: {err}.", self.meta.strategy_id))
		})?;

		Ok(blake3::hash(&bytes).to_hex().to_string())
	}

	pub fn with_meta(mut self, meta: StrategyMeta) -> Result<Self> {
		if meta.strategy_id != self.meta.strategy_id {
			return Err(Error::model(format!(
				"Strategy {} cannot take the metadata of strategy {}.",
				self.meta.strategy_id, meta.strategy_id
			)));
		}

		self.meta = meta;

		Ok(self)
	}

	pub fn touched(mut self, now: OffsetDateTime) -> Self {
		self.meta.last_modified_at = now;

		self
	}

	/// Splices `new_step` in place of `old_step_id`.
	///
	/// The consumer of the old step is rebuilt to read from the new step, and it and every
	/// step downstream of it are marked dirty. `new_step` may read from the old step.
	/// `extra_steps` are nodes `new_step` reads from that are not yet in the graph. Steps that
	/// are no longer reachable are dropped and reported in `GraphEdit::removed`.
	pub fn replace(
		&self,
		old_step_id: i64,
		new_step: StepNode,
		extra_steps: Vec<StepNode>,
	) -> Result<GraphEdit> {
		if !self.contains(old_step_id) {
			return Err(Error::model(format!(
				"Cannot replace step {old_step_id}; it is not part of strategy {}.",
				self.meta.strategy_id
			)));
		}

		let new_step_id = new_step.id();
		let mut steps = self.steps.clone();

		for step in std::iter::once(new_step).chain(extra_steps) {
			let id = step.id();

			if steps.insert(id, step).is_some() {
				return Err(Error::model(format!(
					"Step id {id} is already used in strategy {}.",
					self.meta.strategy_id
				)));
			}
		}

		let mut dirty = self.downstream_of(old_step_id).into_iter().map(StepNode::id);

		if let Some(parent_id) = dirty.next() {
			let parent = StepBuilder::from_step(&self.steps[&parent_id])
				.replace_input(old_step_id, new_step_id)
				.mark_result_size_dirty()
				.build()?;

			steps.insert(parent_id, parent);
		}
		for id in dirty {
			let step = StepBuilder::from_step(&self.steps[&id]).mark_result_size_dirty().build()?;

			steps.insert(id, step);
		}

		let root_step_id =
			if old_step_id == self.root_step_id { new_step_id } else { self.root_step_id };
		let reachable = reachable_from(root_step_id, &steps);
		let removed =
			steps.keys().copied().filter(|id| !reachable.contains(id)).collect::<Vec<_>>();

		steps.retain(|id, _| reachable.contains(id));

		let graph = Self::new(self.meta.clone(), root_step_id, steps.into_values().collect())?;

		Ok(GraphEdit { graph, remapping: IdRemapping::from([(old_step_id, new_step_id)]), removed })
	}

	/// Makes `new_step`, whose primary input is the current root, the new root.
	pub fn add_step(&self, new_step: StepNode, extra_steps: Vec<StepNode>) -> Result<GraphEdit> {
		if new_step.primary_input() != Some(self.root_step_id) {
			return Err(Error::model(format!(
				"Step {} must read from root step {} to extend strategy {}.",
				new_step.id(),
				self.root_step_id,
				self.meta.strategy_id
			)));
		}

		self.replace(self.root_step_id, new_step, extra_steps)
	}

	fn check_shape(&self) -> Result<()> {
		let strategy_id = self.meta.strategy_id;

		if !self.steps.contains_key(&self.root_step_id) {
			return Err(Error::model(format!(
				"Root step {} of strategy {strategy_id} is missing.",
				self.root_step_id
			)));
		}

		let mut parents = BTreeMap::new();

		for step in self.steps.values() {
			for input in step.inputs() {
				if !self.steps.contains_key(&input) {
					return Err(Error::model(format!(
						"Step {} of strategy {strategy_id} reads from missing step {input}.",
						step.id()
					)));
				}
				if let Some(other) = parents.insert(input, step.id()) {
					return Err(Error::model(format!(
						"Step {input} of strategy {strategy_id} is read by both {other} and {}.",
						step.id()
					)));
				}
			}
		}

		if parents.contains_key(&self.root_step_id) {
			return Err(Error::model(format!(
				"Root step {} of strategy {strategy_id} is read by another step.",
				self.root_step_id
			)));
		}

		let reachable = reachable_from(self.root_step_id, &self.steps);

		if reachable.len() != self.steps.len() {
			let stray =
				self.steps.keys().find(|id| !reachable.contains(id)).copied().unwrap_or_default();

			return Err(Error::model(format!(
				"Step {stray} of strategy {strategy_id} is not reachable from the root or is part of a cycle."
			)));
		}

		Ok(())
	}
}

fn reachable_from(root_step_id: i64, steps: &BTreeMap<i64, StepNode>) -> BTreeSet<i64> {
	let mut seen = BTreeSet::new();
	let mut stack = vec![root_step_id];

	while let Some(id) = stack.pop() {
		let Some(step) = steps.get(&id) else { continue };

		if seen.insert(id) {
			stack.extend(step.inputs());
		}
	}

	seen
}

#[cfg(test)]
mod tests {
	use time::OffsetDateTime;

	use crate::{
		model::{Question, QuestionKind},
		param::{ParamDefinition, ParamKind},
		step::{StepBuilder, StepNode},
		strategy::{StepGraph, StrategyKey, StrategyMeta},
	};

	const STRATEGY_ID: i64 = 9;

	fn meta() -> StrategyMeta {
		let now = OffsetDateTime::UNIX_EPOCH;

		StrategyMeta {
			strategy_id: STRATEGY_ID,
			user_id: 1,
			project_id: "PlasmoDB".to_string(),
			version: "68".to_string(),
			name: "Kinases".to_string(),
			saved_name: None,
			description: None,
			signature: None,
			is_saved: false,
			is_public: false,
			is_deleted: false,
			created_at: now,
			last_modified_at: now,
			last_viewed_at: now,
		}
	}

	fn leaf() -> Question {
		Question::new("q.Leaf", "rc", QuestionKind::Leaf, Vec::new()).expect("leaf builds")
	}

	fn transform() -> Question {
		Question::new(
			"q.Transform",
			"rc",
			QuestionKind::Transform,
			vec![ParamDefinition::new("params.input", ParamKind::Answer)],
		)
		.expect("transform builds")
	}

	fn boolean() -> Question {
		Question::new(
			"q.Boolean",
			"rc",
			QuestionKind::Boolean { operator_param: "op".to_string() },
			vec![
				ParamDefinition::new("params.left", ParamKind::Answer),
				ParamDefinition::new("params.right", ParamKind::Answer),
				ParamDefinition::new("params.op", ParamKind::String(Default::default())),
			],
		)
		.expect("boolean builds")
	}

	fn step(id: i64, question: &Question, inputs: &[i64]) -> StepNode {
		StepBuilder::new(id, 1, question)
			.strategy_id(Some(STRATEGY_ID))
			.estimated_size(10)
			.inputs(inputs)
			.build()
			.expect("step builds")
	}

	/// 1 -> 2 -> 4 on the main branch, with 3 as the second operand of 4.
	fn sample() -> StepGraph {
		StepGraph::new(
			meta(),
			4,
			vec![
				step(1, &leaf(), &[]),
				step(2, &transform(), &[1]),
				step(3, &leaf(), &[]),
				step(4, &boolean(), &[2, 3]),
			],
		)
		.expect("graph builds")
	}

	#[test]
	fn branches_and_keys() {
		let graph = sample();
		let main = graph.main_branch().iter().map(|step| step.id()).collect::<Vec<_>>();

		assert_eq!(main, [1, 2, 4]);
		assert_eq!(graph.branch_root_of(3), Some(3));
		assert_eq!(graph.branch_root_of(1), None);
		assert_eq!(graph.key_of(3).to_string(), "9_3");
		assert_eq!(graph.key_of(2).to_string(), "9");
		assert!(graph.is_collapsible(2));
		assert!(!graph.is_collapsible(3));
	}

	#[test]
	fn strategy_keys_parse() {
		let key = "12_40".parse::<StrategyKey>().expect("parses");

		assert_eq!(key, StrategyKey { strategy_id: 12, branch_root_id: Some(40) });
		assert_eq!("12".parse::<StrategyKey>().expect("parses").branch_root_id, None);
		assert!("12_x".parse::<StrategyKey>().expect_err("invalid").is_user_facing());
	}

	#[test]
	fn rejects_malformed_graphs() {
		let dangling = StepGraph::new(meta(), 2, vec![step(2, &transform(), &[1])]);

		assert!(dangling.is_err());

		let stray = StepGraph::new(meta(), 1, vec![step(1, &leaf(), &[]), step(2, &leaf(), &[])]);

		assert!(stray.is_err());

		let shared = StepGraph::new(
			meta(),
			4,
			vec![step(1, &leaf(), &[]), step(2, &transform(), &[1]), step(4, &boolean(), &[2, 1])],
		);

		assert!(shared.is_err());
	}

	#[test]
	fn replace_marks_downstream_dirty() {
		let graph = sample();
		let edit = graph.replace(1, step(7, &leaf(), &[]), Vec::new()).expect("replaces");

		assert_eq!(edit.remapping.get(&1), Some(&7));
		assert_eq!(edit.removed, [1]);
		assert_eq!(edit.graph.step(2).and_then(StepNode::primary_input), Some(7));
		assert!(edit.graph.step(2).is_some_and(StepNode::is_dirty));
		assert!(edit.graph.step(4).is_some_and(StepNode::is_dirty));
		assert!(!edit.graph.step(3).is_some_and(StepNode::is_dirty));
		assert_eq!(edit.graph.root_step_id(), 4);
	}

	#[test]
	fn replace_rejects_unknown_targets_and_reused_ids() {
		let graph = sample();

		let err = graph.replace(99, step(7, &leaf(), &[]), Vec::new()).expect_err("missing");

		assert!(!err.is_user_facing());
		assert!(graph.replace(1, step(3, &leaf(), &[]), Vec::new()).is_err());
	}

	#[test]
	fn checksum_tracks_content_only() {
		let graph = sample();
		let touched = graph.clone().touched(OffsetDateTime::now_utc());

		assert_eq!(graph.checksum().expect("checksum"), touched.checksum().expect("checksum"));

		let edit = graph.add_step(step(8, &transform(), &[4]), Vec::new()).expect("appends");

		assert_ne!(graph.checksum().expect("checksum"), edit.graph.checksum().expect("checksum"));
		assert_eq!(edit.graph.root_step_id(), 8);
	}
}
