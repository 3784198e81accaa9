use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::{MutationResponse, NewStep, Result, WdkService};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InsertStepRequest {
	pub user_id: i64,
	pub strategy_id: i64,
	pub checksum: Option<String>,
	/// The new step is placed in front of this step.
	pub anchor_step_id: i64,
	pub step: NewStep,
}

impl WdkService {
	pub async fn insert_step(&self, req: InsertStepRequest) -> Result<MutationResponse> {
		let now = OffsetDateTime::now_utc();
		let graph =
			self.load_for_edit(req.user_id, req.strategy_id, req.checksum.as_deref()).await?;
		let anchor = graph.require_step(req.anchor_step_id)?;
		// A first step is rebuilt under a fresh id as well.
		let id_count = if anchor.primary_input().is_some() { 1 } else { 2 };
		let request = self.step_request(req.user_id, req.step).await?;
		let engine = self.engine(req.user_id, now);
		let anchor_step_id = req.anchor_step_id;

		self.commit("insert", &graph, id_count, |graph, ids| {
			engine.insert(graph, ids, anchor_step_id, request)
		})
		.await
	}
}
