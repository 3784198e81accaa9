use std::collections::BTreeMap;

use serde_json::Value;
use time::OffsetDateTime;

use wdk_domain::{
	AnswerSpec, ModelCatalog, StepBuilder, StepGraph, StepNode, StrategyMeta, step::FilterOption,
};

use crate::{Error, Result};

#[derive(Debug, sqlx::FromRow)]
pub struct StrategyRow {
	pub strategy_id: i64,
	pub user_id: i64,
	pub project_id: String,
	pub version: String,
	pub root_step_id: i64,
	pub name: String,
	pub saved_name: Option<String>,
	pub description: Option<String>,
	pub signature: Option<String>,
	pub is_saved: bool,
	pub is_public: bool,
	pub is_deleted: bool,
	pub created_at: OffsetDateTime,
	pub last_modified_at: OffsetDateTime,
	pub last_viewed_at: OffsetDateTime,
}
impl StrategyRow {
	pub fn from_graph(graph: &StepGraph) -> Self {
		let meta = graph.meta();

		Self {
			strategy_id: meta.strategy_id,
			user_id: meta.user_id,
			project_id: meta.project_id.clone(),
			version: meta.version.clone(),
			root_step_id: graph.root_step_id(),
			name: meta.name.clone(),
			saved_name: meta.saved_name.clone(),
			description: meta.description.clone(),
			signature: meta.signature.clone(),
			is_saved: meta.is_saved,
			is_public: meta.is_public,
			is_deleted: meta.is_deleted,
			created_at: meta.created_at,
			last_modified_at: meta.last_modified_at,
			last_viewed_at: meta.last_viewed_at,
		}
	}

	pub fn meta(&self) -> StrategyMeta {
		StrategyMeta {
			strategy_id: self.strategy_id,
			user_id: self.user_id,
			project_id: self.project_id.clone(),
			version: self.version.clone(),
			name: self.name.clone(),
			saved_name: self.saved_name.clone(),
			description: self.description.clone(),
			signature: self.signature.clone(),
			is_saved: self.is_saved,
			is_public: self.is_public,
			is_deleted: self.is_deleted,
			created_at: self.created_at,
			last_modified_at: self.last_modified_at,
			last_viewed_at: self.last_viewed_at,
		}
	}
}

#[derive(Debug, sqlx::FromRow)]
pub struct StepRow {
	pub step_id: i64,
	pub user_id: i64,
	pub strategy_id: Option<i64>,
	pub project_id: String,
	pub project_version: String,
	pub question_name: String,
	pub legacy_filter_name: Option<String>,
	pub assigned_weight: i32,
	pub params: Value,
	pub filters: Value,
	pub view_filters: Value,
	pub custom_name: Option<String>,
	pub is_collapsible: bool,
	pub collapsed_name: Option<String>,
	pub estimated_size: i64,
	pub is_deleted: bool,
	pub created_at: OffsetDateTime,
	pub last_run_at: OffsetDateTime,
}
impl StepRow {
	pub fn from_node(step: &StepNode) -> Result<Self> {
		if step.in_memory_only() {
			return Err(Error::InvalidArgument(format!(
				"Step {} is in-memory only and cannot be stored.",
				step.id()
			)));
		}

		let answer = step.answer();

		Ok(Self {
			step_id: step.id(),
			user_id: step.user_id(),
			strategy_id: step.strategy_id(),
			project_id: step.project_id().to_string(),
			project_version: step.project_version().to_string(),
			question_name: answer.question_name.clone(),
			legacy_filter_name: answer.legacy_filter_name.clone(),
			assigned_weight: answer.assigned_weight,
			params: to_json(step.id(), "params", &answer.params)?,
			filters: to_json(step.id(), "filters", &answer.filters)?,
			view_filters: to_json(step.id(), "view_filters", &answer.view_filters)?,
			custom_name: step.custom_name().map(str::to_string),
			is_collapsible: step.collapsible_flag(),
			collapsed_name: step.explicit_collapsed_name().map(str::to_string),
			estimated_size: step.estimated_size(),
			is_deleted: step.is_deleted(),
			created_at: step.created_at(),
			last_run_at: step.last_run_at(),
		})
	}

	/// Rebuilds the node. The step's question supplies its answer-param names.
	pub fn into_node(self, catalog: &ModelCatalog) -> Result<StepNode> {
		let question = catalog.require_for_step(&self.question_name, self.step_id)?;
		let params: BTreeMap<String, String> = from_json(self.step_id, "params", self.params)?;
		let filters: Vec<FilterOption> = from_json(self.step_id, "filters", self.filters)?;
		let view_filters: Vec<FilterOption> =
			from_json(self.step_id, "view_filters", self.view_filters)?;
		let answer = AnswerSpec {
			question_name: self.question_name,
			legacy_filter_name: self.legacy_filter_name,
			assigned_weight: self.assigned_weight,
			params,
			filters,
			view_filters,
		};
		let step = StepBuilder::from_parts(
			self.step_id,
			self.user_id,
			answer,
			question.answer_param_names().to_vec(),
		)
		.strategy_id(self.strategy_id)
		.project(&self.project_id, &self.project_version)
		.timestamps(self.created_at, self.last_run_at)
		.custom_name(self.custom_name)
		.deleted(self.is_deleted)
		.collapsible(self.is_collapsible)
		.collapsed_name(self.collapsed_name)
		.estimated_size(self.estimated_size)
		.build()?;

		Ok(step)
	}
}

fn to_json<T>(step_id: i64, column: &str, value: &T) -> Result<Value>
where
	T: serde::Serialize,
{
	serde_json::to_value(value).map_err(|err| {
		Error::InvalidArgument(format!("Step {step_id} has an unencodable {column}: {err}."))
	})
}

fn from_json<T>(step_id: i64, column: &str, value: Value) -> Result<T>
where
	T: serde::de::DeserializeOwned,
{
	serde_json::from_value(value).map_err(|err| {
		Error::InvalidArgument(format!("Step {step_id} has malformed {column}: {err}."))
	})
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use serde_json::json;
	use time::OffsetDateTime;

	use wdk_domain::{
		ModelCatalog, ParamDefinition, ParamKind, Question, QuestionKind, param::StringSpec,
	};

	use crate::models::StepRow;

	fn catalog() -> ModelCatalog {
		let question = Question::new(
			"GeneQuestions.GenesByText",
			"GeneRecordClasses.GeneRecordClass",
			QuestionKind::Leaf,
			vec![ParamDefinition::new(
				"textParams.text_expression",
				ParamKind::String(StringSpec::default()),
			)],
		)
		.expect("Failed to build question.");

		ModelCatalog::new().with_question(question).expect("Failed to build catalog.")
	}

	fn row(params: serde_json::Value) -> StepRow {
		StepRow {
			step_id: 11,
			user_id: 3,
			strategy_id: Some(5),
			project_id: "PlasmoDB".to_string(),
			project_version: "68".to_string(),
			question_name: "GeneQuestions.GenesByText".to_string(),
			legacy_filter_name: None,
			assigned_weight: 4,
			params,
			filters: json!([{ "name": "organism", "value": ["P. falciparum"] }]),
			view_filters: json!([]),
			custom_name: Some("Kinases".to_string()),
			is_collapsible: false,
			collapsed_name: None,
			estimated_size: 42,
			is_deleted: false,
			created_at: OffsetDateTime::UNIX_EPOCH,
			last_run_at: OffsetDateTime::UNIX_EPOCH,
		}
	}

	#[test]
	fn rows_rebuild_nodes() {
		let catalog = catalog();
		let node = row(json!({ "text_expression": "kinase" }))
			.into_node(&catalog)
			.expect("Failed to rebuild step.");

		assert_eq!(node.id(), 11);
		assert_eq!(node.strategy_id(), Some(5));
		assert_eq!(node.answer().assigned_weight, 4);
		assert_eq!(node.answer().filters.len(), 1);
		assert_eq!(node.collapsed_name(), Some("Kinases"));

		let stored = StepRow::from_node(&node).expect("Failed to encode step.");

		assert_eq!(stored.collapsed_name, None);
		assert_eq!(stored.params, json!({ "text_expression": "kinase" }));
		assert_eq!(stored.estimated_size, 42);
	}

	#[test]
	fn malformed_params_are_rejected() {
		let catalog = catalog();
		let err = row(json!(["kinase"])).into_node(&catalog).expect_err("Expected malformed row.");

		assert!(err.to_string().contains("malformed params"));

		let mut unknown = row(json!({}));

		unknown.question_name = "GeneQuestions.Retired".to_string();

		assert!(matches!(unknown.into_node(&catalog), Err(crate::Error::Domain(_))));
	}

	#[test]
	fn empty_param_maps_are_stored_as_objects() {
		let catalog = catalog();
		let node = row(json!({})).into_node(&catalog).expect("Failed to rebuild step.");
		let stored = StepRow::from_node(&node).expect("Failed to encode step.");

		assert_eq!(stored.params, json!(BTreeMap::<String, String>::new()));
	}
}
