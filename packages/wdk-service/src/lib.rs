pub mod append;
pub mod insert;
pub mod revise;
pub mod store;
pub mod vocabulary;

mod error;

pub use append::AppendStepRequest;
pub use error::{Error, Result};
pub use insert::InsertStepRequest;
pub use revise::ReviseStepRequest;
pub use store::{PgStrategyStore, StrategyStore};
pub use vocabulary::{CorrectValuesRequest, VocabularyRequest};

use std::{collections::BTreeMap, future::Future, pin::Pin, sync::Arc};

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};

use wdk_config::Config;
use wdk_domain::{
	GraphEdit, IdRemapping, ModelCatalog, PreallocatedIds, QueryRunner, StepGraph,
	StepMutationEngine, StepRequest, VocabCache,
};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A new step as the caller describes it. The secondary operand of a boolean question is named by
/// id and must be an unattached step of the same user.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct NewStep {
	pub question_name: String,
	#[serde(default)]
	pub params: BTreeMap<String, String>,
	pub filter_name: Option<String>,
	pub weight: Option<String>,
	pub custom_name: Option<String>,
	pub secondary_step_id: Option<i64>,
}

/// Outcome of a committed mutation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MutationResponse {
	pub strategy_id: i64,
	pub root_step_id: i64,
	/// Checksum of the stored graph; send it with the next mutation.
	pub checksum: String,
	pub remapping: IdRemapping,
	pub removed: Vec<i64>,
}

pub struct WdkService {
	pub cfg: Config,
	pub model: Arc<ModelCatalog>,
	pub queries: Arc<dyn QueryRunner>,
	pub store: Arc<dyn StrategyStore>,
	pub vocab_cache: VocabCache,
}
impl WdkService {
	pub fn new(
		cfg: Config,
		model: Arc<ModelCatalog>,
		queries: Arc<dyn QueryRunner>,
		store: Arc<dyn StrategyStore>,
	) -> Self {
		let ttl =
			Duration::seconds(i64::try_from(cfg.vocabulary.cache_ttl_seconds).unwrap_or(i64::MAX));
		let vocab_cache = VocabCache::new(cfg.vocabulary.cache_max_entries, ttl);

		Self { cfg, model, queries, store, vocab_cache }
	}

	pub(crate) fn engine(&self, user_id: i64, now: OffsetDateTime) -> StepMutationEngine<'_> {
		StepMutationEngine::new(&self.model, self.queries.as_ref(), user_id)
			.with_cache(&self.vocab_cache)
			.with_max_custom_name_chars(self.cfg.strategy.max_custom_name_chars)
			.at(now)
	}

	/// Loads the strategy and checks that the caller owns it and saw its current state.
	pub(crate) async fn load_for_edit(
		&self,
		user_id: i64,
		strategy_id: i64,
		checksum: Option<&str>,
	) -> Result<StepGraph> {
		let graph = self.store.load_step_graph(&self.model, strategy_id).await?;

		if graph.meta().user_id != user_id {
			return Err(Error::NotFound {
				message: format!("Strategy {strategy_id} does not exist."),
			});
		}

		match checksum.map(str::trim).filter(|value| !value.is_empty()) {
			Some(expected) => {
				let current = graph.checksum()?;

				if current != expected {
					tracing::info!(strategy_id, "Rejected a mutation against a stale strategy.");

					return Err(Error::OutOfSync {
						message: format!(
							"Strategy {strategy_id} has changed since it was last loaded."
						),
					});
				}
			},
			None if self.cfg.strategy.require_checksum =>
				return Err(Error::InvalidRequest {
					message: "A strategy checksum is required.".to_string(),
				}),
			None => {},
		}

		Ok(graph)
	}

	pub(crate) async fn step_request(&self, user_id: i64, step: NewStep) -> Result<StepRequest> {
		let secondary_step = match step.secondary_step_id {
			Some(step_id) => {
				let Some(orphan) =
					self.store.load_orphan_step(&self.model, user_id, step_id).await?
				else {
					return Err(Error::InvalidRequest {
						message: format!("Step {step_id} is not an unattached step of this user."),
					});
				};

				Some(orphan)
			},
			None => None,
		};

		Ok(StepRequest {
			question_name: step.question_name,
			params: step.params,
			filter_name: step.filter_name,
			weight: step.weight,
			custom_name: step.custom_name,
			secondary_step,
		})
	}

	/// Allocates `id_count` fresh step ids, applies `apply`, and stores the result.
	pub(crate) async fn commit<F>(
		&self,
		operation: &'static str,
		graph: &StepGraph,
		id_count: usize,
		apply: F,
	) -> Result<MutationResponse>
	where
		F: FnOnce(&StepGraph, &mut PreallocatedIds) -> wdk_domain::Result<GraphEdit>,
	{
		let ids = self.store.allocate_step_ids(id_count).await?;
		let mut ids = PreallocatedIds::new(ids);
		let edit = apply(graph, &mut ids)?;
		let checksum = edit.graph.checksum()?;

		self.store.save_step_graph(graph, &edit).await?;

		tracing::info!(
			strategy_id = edit.graph.strategy_id(),
			operation,
			remapped = edit.remapping.len(),
			removed = edit.removed.len(),
			"Strategy mutation committed."
		);

		Ok(MutationResponse {
			strategy_id: edit.graph.strategy_id(),
			root_step_id: edit.graph.root_step_id(),
			checksum,
			remapping: edit.remapping,
			removed: edit.removed,
		})
	}
}
