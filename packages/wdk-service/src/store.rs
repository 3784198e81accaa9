use std::sync::Arc;

use wdk_domain::{GraphEdit, ModelCatalog, StepGraph, StepNode};
use wdk_storage::{db::Db, queries};

use crate::{BoxFuture, Result};

/// Read/write contract between the service and wherever strategies live.
pub trait StrategyStore
where
	Self: Send + Sync,
{
	fn load_step_graph<'a>(
		&'a self,
		model: &'a ModelCatalog,
		strategy_id: i64,
	) -> BoxFuture<'a, Result<StepGraph>>;

	/// A live step of `user_id` that is not attached to any strategy.
	fn load_orphan_step<'a>(
		&'a self,
		model: &'a ModelCatalog,
		user_id: i64,
		step_id: i64,
	) -> BoxFuture<'a, Result<Option<StepNode>>>;

	fn allocate_step_ids(&self, count: usize) -> BoxFuture<'_, Result<Vec<i64>>>;

	/// Stores the edited graph atomically, provided the stored strategy still matches `base`, the
	/// graph the edit was computed from.
	fn save_step_graph<'a>(
		&'a self,
		base: &'a StepGraph,
		edit: &'a GraphEdit,
	) -> BoxFuture<'a, Result<()>>;
}

pub struct PgStrategyStore {
	db: Arc<Db>,
}
impl PgStrategyStore {
	pub fn new(db: Arc<Db>) -> Self {
		Self { db }
	}

	/// Connects and bootstraps the schema.
	pub async fn connect(cfg: &wdk_config::Postgres) -> Result<Self> {
		let db = Db::connect(cfg).await?;

		db.ensure_schema().await?;

		Ok(Self { db: Arc::new(db) })
	}

	pub fn db(&self) -> &Db {
		&self.db
	}
}
impl StrategyStore for PgStrategyStore {
	fn load_step_graph<'a>(
		&'a self,
		model: &'a ModelCatalog,
		strategy_id: i64,
	) -> BoxFuture<'a, Result<StepGraph>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;
			let graph = queries::load_step_graph(&mut conn, model, strategy_id).await?;

			Ok(graph)
		})
	}

	fn load_orphan_step<'a>(
		&'a self,
		model: &'a ModelCatalog,
		user_id: i64,
		step_id: i64,
	) -> BoxFuture<'a, Result<Option<StepNode>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;
			let step = queries::load_orphan_step(&mut conn, model, user_id, step_id).await?;

			Ok(step)
		})
	}

	fn allocate_step_ids(&self, count: usize) -> BoxFuture<'_, Result<Vec<i64>>> {
		Box::pin(async move {
			let mut conn = self.db.pool.acquire().await?;
			let ids = queries::next_step_ids(&mut conn, count).await?;

			Ok(ids)
		})
	}

	fn save_step_graph<'a>(
		&'a self,
		base: &'a StepGraph,
		edit: &'a GraphEdit,
	) -> BoxFuture<'a, Result<()>> {
		Box::pin(async move {
			queries::save_step_graph(
				&self.db,
				Some(base),
				&edit.graph,
				&edit.remapping,
				&edit.removed,
			)
			.await?;

			Ok(())
		})
	}
}
