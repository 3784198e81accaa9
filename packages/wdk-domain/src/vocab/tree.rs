use std::collections::{HashMap, HashSet};

use crate::vocab::VocabTerm;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TermNode {
	pub term: String,
	pub display: String,
	pub children: Vec<usize>,
}

/// Arena of term nodes addressed by index. Child lists hold indices into the same arena.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TermTree {
	nodes: Vec<TermNode>,
	roots: Vec<usize>,
}
impl TermTree {
	/// Builds the tree in term order. A term whose parent is absent or not itself a term
	/// becomes a root, and so does the earliest term of every cycle of parent links.
	pub fn build(terms: &[VocabTerm]) -> Self {
		let mut nodes = Vec::with_capacity(terms.len());
		let mut positions = HashMap::with_capacity(terms.len());

		for term in terms {
			positions.insert(term.term.as_str(), nodes.len());
			nodes.push(TermNode {
				term: term.term.clone(),
				display: term.display.clone(),
				children: Vec::new(),
			});
		}

		let mut parents: Vec<Option<usize>> = terms
			.iter()
			.enumerate()
			.map(|(position, term)| {
				term.parent
					.as_deref()
					.and_then(|parent| positions.get(parent).copied())
					.filter(|&parent| parent != position)
			})
			.collect();

		break_parent_cycles(&mut parents);

		let mut roots = Vec::new();

		for (position, parent) in parents.into_iter().enumerate() {
			match parent {
				Some(parent) => nodes[parent].children.push(position),
				None => roots.push(position),
			}
		}

		Self { nodes, roots }
	}

	pub fn is_empty(&self) -> bool {
		self.roots.is_empty()
	}

	pub fn roots(&self) -> impl Iterator<Item = &TermNode> {
		self.roots.iter().map(|&index| &self.nodes[index])
	}

	pub fn children<'a>(&'a self, node: &'a TermNode) -> impl Iterator<Item = &'a TermNode> {
		node.children.iter().map(|&index| &self.nodes[index])
	}

	pub fn find(&self, term: &str) -> Option<&TermNode> {
		self.nodes.iter().find(|node| node.term == term)
	}

	/// Rebuilds the tree with every single-child branch collapsed: while a child list holds
	/// exactly one node that has children of its own, the list is replaced by those children.
	pub fn suppress_single_child_branches(&self) -> Self {
		let mut out = Self::default();
		let roots = self.rebuild_list(&self.roots, &mut out);

		out.roots = roots;

		out
	}

	/// Depth-first walk from the first root with an explicit stack. Each node is emitted
	/// before its children and siblings are visited in declaration order.
	pub fn first_root_preorder(&self) -> Vec<&str> {
		let mut out = Vec::new();
		let mut stack: Vec<usize> = self.roots.first().copied().into_iter().collect();

		while let Some(index) = stack.pop() {
			let node = &self.nodes[index];

			out.push(node.term.as_str());
			stack.extend(node.children.iter().rev().copied());
		}

		out
	}

	/// Number of selected terms that are leaves of this tree.
	pub fn count_selected_leaves(&self, selected: &[String]) -> usize {
		let selected: HashSet<&str> = selected.iter().map(String::as_str).collect();
		let mut count = 0;
		let mut stack: Vec<usize> = self.roots.clone();

		while let Some(index) = stack.pop() {
			let node = &self.nodes[index];

			if node.children.is_empty() {
				if selected.contains(node.term.as_str()) {
					count += 1;
				}
			} else {
				stack.extend(node.children.iter().copied());
			}
		}

		count
	}

	fn rebuild_list(&self, list: &[usize], out: &mut Self) -> Vec<usize> {
		let mut current = list;

		while let [only] = current
			&& !self.nodes[*only].children.is_empty()
		{
			current = &self.nodes[*only].children;
		}

		let mut rebuilt = Vec::with_capacity(current.len());

		for &index in current {
			let node = &self.nodes[index];
			let children = self.rebuild_list(&node.children, out);

			rebuilt.push(out.nodes.len());
			out.nodes.push(TermNode {
				term: node.term.clone(),
				display: node.display.clone(),
				children,
			});
		}

		rebuilt
	}
}

fn break_parent_cycles(parents: &mut [Option<usize>]) {
	let mut settled = vec![false; parents.len()];

	for start in 0..parents.len() {
		let mut path = Vec::new();
		let mut current = Some(start);

		while let Some(index) = current {
			if settled[index] {
				break;
			}
			if let Some(at) = path.iter().position(|&seen| seen == index) {
				if let Some(&first) = path[at..].iter().min() {
					parents[first] = None;
				}

				break;
			}

			path.push(index);

			current = parents[index];
		}

		for index in path {
			settled[index] = true;
		}
	}
}
