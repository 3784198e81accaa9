use std::collections::HashMap;

use crate::{Error, Result, param::ParamDefinition};

/// The params of one question or query together with their dependency DAG.
///
/// Built in two phases: definitions are collected first, then the forward and reverse edges and
/// a topological order are computed once every definition is known. The structure is immutable
/// afterwards.
#[derive(Clone, Debug)]
pub struct ParamContext {
	name: String,
	params: Vec<ParamDefinition>,
	index: HashMap<String, usize>,
	depended: Vec<Vec<usize>>,
	dependents: Vec<Vec<usize>>,
	order: Vec<usize>,
}
impl ParamContext {
	pub fn build(name: &str, params: Vec<ParamDefinition>) -> Result<Self> {
		let mut index = HashMap::with_capacity(params.len());

		for (position, param) in params.iter().enumerate() {
			param.check()?;

			if index.insert(param.name.clone(), position).is_some() {
				return Err(Error::model(format!(
					"Context {name} declares param {} more than once.",
					param.name
				)));
			}
		}

		let mut depended = vec![Vec::new(); params.len()];
		let mut dependents = vec![Vec::new(); params.len()];

		for (position, param) in params.iter().enumerate() {
			for reference in &param.depended_refs {
				let Some(&target) = index.get(reference) else {
					return Err(Error::model(format!(
						"Param {} depends on {reference}, which is not declared in {name}.",
						param.full_name
					)));
				};

				depended[position].push(target);
				dependents[target].push(position);
			}
		}

		let order = topological_order(name, &params, &depended)?;

		Ok(Self { name: name.to_string(), params, index, depended, dependents, order })
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	pub fn get(&self, name: &str) -> Option<&ParamDefinition> {
		self.index.get(name).map(|&position| &self.params[position])
	}

	pub fn require(&self, name: &str) -> Result<&ParamDefinition> {
		self.get(name).ok_or_else(|| {
			Error::model(format!("Param {name} is not declared in context {}.", self.name))
		})
	}

	/// Params in declaration order.
	pub fn params(&self) -> &[ParamDefinition] {
		&self.params
	}

	pub fn depended_params(&self, name: &str) -> Vec<&ParamDefinition> {
		self.edges(name, &self.depended)
	}

	pub fn dependent_params(&self, name: &str) -> Vec<&ParamDefinition> {
		self.edges(name, &self.dependents)
	}

	/// Params ordered so that every depended param comes before its dependents.
	pub fn resolution_order(&self) -> impl Iterator<Item = &ParamDefinition> {
		self.order.iter().map(|&position| &self.params[position])
	}

	/// Answer params in declaration order; the first is the primary input.
	pub fn answer_param_names(&self) -> Vec<String> {
		self.params
			.iter()
			.filter(|param| param.is_answer())
			.map(|param| param.name.clone())
			.collect()
	}

	fn edges<'a>(&'a self, name: &str, edges: &[Vec<usize>]) -> Vec<&'a ParamDefinition> {
		match self.index.get(name) {
			Some(&position) => edges[position].iter().map(|&target| &self.params[target]).collect(),
			None => Vec::new(),
		}
	}
}

fn topological_order(
	name: &str,
	params: &[ParamDefinition],
	depended: &[Vec<usize>],
) -> Result<Vec<usize>> {
	// 0 = unvisited, 1 = on the current path, 2 = done.
	let mut state = vec![0_u8; params.len()];
	let mut order = Vec::with_capacity(params.len());

	for start in 0..params.len() {
		if state[start] != 0 {
			continue;
		}

		let mut stack = vec![(start, 0_usize)];

		state[start] = 1;

		while let Some((node, next_edge)) = stack.pop() {
			if let Some(&target) = depended[node].get(next_edge) {
				stack.push((node, next_edge + 1));

				match state[target] {
					0 => {
						state[target] = 1;

						stack.push((target, 0));
					},
					1 => {
						return Err(Error::model(format!(
							"Param {} is part of a dependency cycle in {name}.",
							params[target].full_name
						)));
					},
					_ => {},
				}
			} else {
				state[node] = 2;

				order.push(node);
			}
		}
	}

	Ok(order)
}
