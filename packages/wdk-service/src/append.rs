use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use wdk_domain::StrategyKey;

use crate::{Error, MutationResponse, NewStep, Result, WdkService};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppendStepRequest {
	pub user_id: i64,
	/// `"<strategyId>"` appends to the strategy root, `"<strategyId>_<branchRootId>"` to a nested
	/// branch.
	pub strategy_key: String,
	pub checksum: Option<String>,
	pub step: NewStep,
}

impl WdkService {
	pub async fn append_step(&self, req: AppendStepRequest) -> Result<MutationResponse> {
		let now = OffsetDateTime::now_utc();
		let key: StrategyKey = req.strategy_key.parse()?;
		let graph =
			self.load_for_edit(req.user_id, key.strategy_id, req.checksum.as_deref()).await?;
		let root_step_id = key.branch_root_id.unwrap_or_else(|| graph.root_step_id());

		if key.branch_root_id.is_some() && graph.branch_root_of(root_step_id) != Some(root_step_id)
		{
			return Err(Error::InvalidRequest {
				message: format!("Step {root_step_id} is not the root of a nested branch."),
			});
		}

		let request = self.step_request(req.user_id, req.step).await?;
		let engine = self.engine(req.user_id, now);

		self.commit("append", &graph, 1, |graph, ids| {
			engine.append(graph, ids, root_step_id, request)
		})
		.await
	}
}
