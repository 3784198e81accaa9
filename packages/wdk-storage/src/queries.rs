use std::collections::BTreeSet;

use sqlx::PgConnection;
use time::OffsetDateTime;

use wdk_domain::{IdRemapping, ModelCatalog, StepGraph, StepNode};

use crate::{
	Error, Result,
	db::Db,
	models::{StepRow, StrategyRow},
};

const STEP_COLUMNS: &str = "\
step_id,
	user_id,
	strategy_id,
	project_id,
	project_version,
	question_name,
	legacy_filter_name,
	assigned_weight,
	params,
	filters,
	view_filters,
	custom_name,
	is_collapsible,
	collapsed_name,
	estimated_size,
	is_deleted,
	created_at,
	last_run_at";

pub async fn next_step_ids(executor: &mut PgConnection, count: usize) -> Result<Vec<i64>> {
	if count == 0 {
		return Ok(Vec::new());
	}

	let count = i64::try_from(count)
		.map_err(|_| Error::InvalidArgument(format!("Cannot allocate {count} step ids.")))?;
	let ids: Vec<i64> =
		sqlx::query_scalar("SELECT nextval('wdk_step_id_seq') FROM generate_series(1, $1)")
			.bind(count)
			.fetch_all(executor)
			.await?;

	Ok(ids)
}

pub async fn next_strategy_id(executor: &mut PgConnection) -> Result<i64> {
	let id: i64 = sqlx::query_scalar("SELECT nextval('wdk_strategy_id_seq')")
		.fetch_one(executor)
		.await?;

	Ok(id)
}

pub async fn get_strategy(
	executor: &mut PgConnection,
	strategy_id: i64,
) -> Result<Option<StrategyRow>> {
	let row = sqlx::query_as::<_, StrategyRow>(
		"\
SELECT
	strategy_id,
	user_id,
	project_id,
	version,
	root_step_id,
	name,
	saved_name,
	description,
	signature,
	is_saved,
	is_public,
	is_deleted,
	created_at,
	last_modified_at,
	last_viewed_at
FROM wdk_strategies
WHERE strategy_id = $1 AND is_deleted = false",
	)
	.bind(strategy_id)
	.fetch_optional(executor)
	.await?;

	Ok(row)
}

pub async fn list_strategy_steps(
	executor: &mut PgConnection,
	strategy_id: i64,
) -> Result<Vec<StepRow>> {
	let sql = format!(
		"\
SELECT
	{STEP_COLUMNS}
FROM wdk_steps
WHERE strategy_id = $1 AND is_deleted = false
ORDER BY step_id"
	);
	let rows = sqlx::query_as::<_, StepRow>(&sql).bind(strategy_id).fetch_all(executor).await?;

	Ok(rows)
}

/// A live step of `user_id` that belongs to no strategy.
pub async fn get_orphan_step(
	executor: &mut PgConnection,
	user_id: i64,
	step_id: i64,
) -> Result<Option<StepRow>> {
	let sql = format!(
		"\
SELECT
	{STEP_COLUMNS}
FROM wdk_steps
WHERE step_id = $1 AND user_id = $2 AND strategy_id IS NULL AND is_deleted = false"
	);
	let row = sqlx::query_as::<_, StepRow>(&sql)
		.bind(step_id)
		.bind(user_id)
		.fetch_optional(executor)
		.await?;

	Ok(row)
}

pub async fn upsert_strategy(executor: &mut PgConnection, row: &StrategyRow) -> Result<()> {
	let result = sqlx::query(
		"\
INSERT INTO wdk_strategies (
	strategy_id,
	user_id,
	project_id,
	version,
	root_step_id,
	name,
	saved_name,
	description,
	signature,
	is_saved,
	is_public,
	is_deleted,
	created_at,
	last_modified_at,
	last_viewed_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
ON CONFLICT (strategy_id) DO UPDATE
SET
	version = EXCLUDED.version,
	root_step_id = EXCLUDED.root_step_id,
	name = EXCLUDED.name,
	saved_name = EXCLUDED.saved_name,
	description = EXCLUDED.description,
	signature = EXCLUDED.signature,
	is_saved = EXCLUDED.is_saved,
	is_public = EXCLUDED.is_public,
	is_deleted = EXCLUDED.is_deleted,
	last_modified_at = EXCLUDED.last_modified_at,
	last_viewed_at = EXCLUDED.last_viewed_at
WHERE wdk_strategies.user_id = EXCLUDED.user_id",
	)
	.bind(row.strategy_id)
	.bind(row.user_id)
	.bind(row.project_id.as_str())
	.bind(row.version.as_str())
	.bind(row.root_step_id)
	.bind(row.name.as_str())
	.bind(row.saved_name.as_deref())
	.bind(row.description.as_deref())
	.bind(row.signature.as_deref())
	.bind(row.is_saved)
	.bind(row.is_public)
	.bind(row.is_deleted)
	.bind(row.created_at)
	.bind(row.last_modified_at)
	.bind(row.last_viewed_at)
	.execute(executor)
	.await?;

	if result.rows_affected() == 0 {
		return Err(Error::Conflict(format!(
			"Strategy {} belongs to another user.",
			row.strategy_id
		)));
	}

	Ok(())
}

pub async fn upsert_step(executor: &mut PgConnection, row: &StepRow) -> Result<()> {
	let sql = format!(
		"\
INSERT INTO wdk_steps (
	{STEP_COLUMNS}
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
ON CONFLICT (step_id) DO UPDATE
SET
	strategy_id = EXCLUDED.strategy_id,
	project_version = EXCLUDED.project_version,
	question_name = EXCLUDED.question_name,
	legacy_filter_name = EXCLUDED.legacy_filter_name,
	assigned_weight = EXCLUDED.assigned_weight,
	params = EXCLUDED.params,
	filters = EXCLUDED.filters,
	view_filters = EXCLUDED.view_filters,
	custom_name = EXCLUDED.custom_name,
	is_collapsible = EXCLUDED.is_collapsible,
	collapsed_name = EXCLUDED.collapsed_name,
	estimated_size = EXCLUDED.estimated_size,
	is_deleted = EXCLUDED.is_deleted,
	last_run_at = EXCLUDED.last_run_at
WHERE wdk_steps.user_id = EXCLUDED.user_id"
	);
	let result = sqlx::query(&sql)
		.bind(row.step_id)
		.bind(row.user_id)
		.bind(row.strategy_id)
		.bind(row.project_id.as_str())
		.bind(row.project_version.as_str())
		.bind(row.question_name.as_str())
		.bind(row.legacy_filter_name.as_deref())
		.bind(row.assigned_weight)
		.bind(&row.params)
		.bind(&row.filters)
		.bind(&row.view_filters)
		.bind(row.custom_name.as_deref())
		.bind(row.is_collapsible)
		.bind(row.collapsed_name.as_deref())
		.bind(row.estimated_size)
		.bind(row.is_deleted)
		.bind(row.created_at)
		.bind(row.last_run_at)
		.execute(executor)
		.await?;

	if result.rows_affected() == 0 {
		return Err(Error::Conflict(format!("Step {} belongs to another user.", row.step_id)));
	}

	Ok(())
}

pub async fn soft_delete_steps(
	executor: &mut PgConnection,
	strategy_id: i64,
	step_ids: &[i64],
) -> Result<u64> {
	if step_ids.is_empty() {
		return Ok(0);
	}

	let result = sqlx::query(
		"\
UPDATE wdk_steps
SET is_deleted = true
WHERE strategy_id = $1 AND step_id = ANY($2) AND is_deleted = false",
	)
	.bind(strategy_id)
	.bind(step_ids)
	.execute(executor)
	.await?;

	Ok(result.rows_affected())
}

pub async fn load_step_graph(
	executor: &mut PgConnection,
	catalog: &ModelCatalog,
	strategy_id: i64,
) -> Result<StepGraph> {
	let Some(strategy) = get_strategy(&mut *executor, strategy_id).await? else {
		return Err(Error::NotFound(format!("Strategy {strategy_id} does not exist.")));
	};
	let rows = list_strategy_steps(&mut *executor, strategy_id).await?;
	let steps = rows.into_iter().map(|row| row.into_node(catalog)).collect::<Result<Vec<_>>>()?;
	let graph = StepGraph::new(strategy.meta(), strategy.root_step_id, steps)?;

	Ok(graph)
}

pub async fn load_orphan_step(
	executor: &mut PgConnection,
	catalog: &ModelCatalog,
	user_id: i64,
	step_id: i64,
) -> Result<Option<StepNode>> {
	let Some(row) = get_orphan_step(executor, user_id, step_id).await? else {
		return Ok(None);
	};

	Ok(Some(row.into_node(catalog)?))
}

/// Locks the strategy row and checks that the stored strategy is still the one `base` was
/// loaded from.
pub async fn lock_unchanged_strategy(
	executor: &mut PgConnection,
	base: &StepGraph,
) -> Result<()> {
	let strategy_id = base.strategy_id();
	let stored: Option<(i64, OffsetDateTime)> = sqlx::query_as(
		"\
SELECT root_step_id, last_modified_at
FROM wdk_strategies
WHERE strategy_id = $1 AND is_deleted = false
FOR UPDATE",
	)
	.bind(strategy_id)
	.fetch_optional(&mut *executor)
	.await?;
	let Some((root_step_id, last_modified_at)) = stored else {
		return Err(Error::OutOfSync(format!("Strategy {strategy_id} no longer exists.")));
	};
	let live_step_ids: Vec<i64> = sqlx::query_scalar(
		"\
SELECT step_id
FROM wdk_steps
WHERE strategy_id = $1 AND is_deleted = false
ORDER BY step_id",
	)
	.bind(strategy_id)
	.fetch_all(&mut *executor)
	.await?;
	let base_step_ids = base.all_steps().map(StepNode::id).collect::<BTreeSet<_>>();

	if root_step_id != base.root_step_id()
		|| last_modified_at != base.meta().last_modified_at
		|| !live_step_ids.iter().copied().eq(base_step_ids.iter().copied())
	{
		return Err(Error::OutOfSync(format!(
			"Strategy {strategy_id} has changed since it was last loaded."
		)));
	}

	Ok(())
}

/// Stores the whole graph in one transaction.
///
/// Every node is upserted, and replaced or dropped steps that are no longer part of the graph are
/// soft-deleted. With a `base`, the save only goes through while the stored strategy still matches
/// the graph the edit was computed from. A new strategy has no base.
pub async fn save_step_graph(
	db: &Db,
	base: Option<&StepGraph>,
	graph: &StepGraph,
	remapping: &IdRemapping,
	removed: &[i64],
) -> Result<()> {
	let rows = graph.all_steps().map(StepRow::from_node).collect::<Result<Vec<_>>>()?;
	let retired = remapping
		.keys()
		.chain(removed)
		.copied()
		.filter(|step_id| !graph.contains(*step_id))
		.collect::<BTreeSet<_>>()
		.into_iter()
		.collect::<Vec<_>>();
	let mut tx = db.pool.begin().await?;

	if let Some(base) = base {
		lock_unchanged_strategy(&mut *tx, base).await?;
	}

	upsert_strategy(&mut *tx, &StrategyRow::from_graph(graph)).await?;

	for row in &rows {
		upsert_step(&mut *tx, row).await?;
	}

	let deleted = soft_delete_steps(&mut *tx, graph.strategy_id(), &retired).await?;

	tx.commit().await?;

	tracing::debug!(
		strategy_id = graph.strategy_id(),
		steps = rows.len(),
		deleted,
		"Step graph saved."
	);

	Ok(())
}
