use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use wdk_domain::ReviseRequest;

use crate::{MutationResponse, Result, WdkService};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ReviseStepRequest {
	pub user_id: i64,
	pub strategy_id: i64,
	pub checksum: Option<String>,
	pub step_id: i64,
	pub question_name: Option<String>,
	#[serde(default)]
	pub params: BTreeMap<String, String>,
	pub filter_name: Option<String>,
	pub weight: Option<String>,
	pub custom_name: Option<String>,
}

impl WdkService {
	pub async fn revise_step(&self, req: ReviseStepRequest) -> Result<MutationResponse> {
		let now = OffsetDateTime::now_utc();
		let graph =
			self.load_for_edit(req.user_id, req.strategy_id, req.checksum.as_deref()).await?;
		let engine = self.engine(req.user_id, now);
		let request = ReviseRequest {
			step_id: req.step_id,
			question_name: req.question_name,
			params: req.params,
			filter_name: req.filter_name,
			weight: req.weight,
			custom_name: req.custom_name,
		};

		self.commit("revise", &graph, 1, |graph, ids| engine.revise(graph, ids, request)).await
	}
}
