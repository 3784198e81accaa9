use std::collections::BTreeMap;

use time::Duration;

use wdk_domain::{VocabCache, VocabularyResolver};
use wdk_testkit::fixtures::{
	self, GENES_BY_ORTHOLOGS, GENES_BY_STRAIN, GENES_BY_TAXON, STRAIN_QUERY,
};

fn values(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
	pairs.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect()
}

#[test]
fn missing_depended_value_matches_explicit_default() {
	let catalog = fixtures::sample_model().expect("Failed to build sample model.");
	let queries = fixtures::sample_queries();
	let context = catalog.require(GENES_BY_STRAIN).expect("Missing question.").params();
	let resolver = VocabularyResolver::new(context, &queries, 1);
	let species_default = resolver
		.default_value("species", &BTreeMap::new())
		.expect("Failed to compute species default.")
		.expect("Species should have a default.");

	assert_eq!(species_default, "P. falciparum");

	let implicit = resolver.resolve("strain", &BTreeMap::new()).expect("Failed to resolve.");
	let explicit = resolver
		.resolve("strain", &values(&[("species", &species_default)]))
		.expect("Failed to resolve.");

	assert_eq!(
		implicit.term_names().collect::<Vec<_>>(),
		explicit.term_names().collect::<Vec<_>>()
	);
	assert_eq!(implicit.default_value(), explicit.default_value());
	assert_eq!(implicit.depended_values(), explicit.depended_values());
	assert_eq!(implicit.default_value(), Some("3D7"));
}

#[test]
fn repeated_resolution_builds_identical_trees() {
	let catalog = fixtures::sample_model().expect("Failed to build sample model.");
	let queries = fixtures::sample_queries();
	let context = catalog.require(GENES_BY_TAXON).expect("Missing question.").params();
	let resolver = VocabularyResolver::new(context, &queries, 1);
	let first = resolver.resolve("organism", &BTreeMap::new()).expect("Failed to resolve.");
	let second = resolver.resolve("organism", &BTreeMap::new()).expect("Failed to resolve.");

	assert_eq!(first.tree(), second.tree());
	assert_eq!(first.to_json(), second.to_json());

	for term in first.terms() {
		if let Some(parent) = &term.parent {
			assert!(first.contains(parent), "parent {parent} of {} is not a term", term.term);
		}
	}
}

#[test]
fn select_modes_pick_first_branch_or_everything() {
	let catalog = fixtures::sample_model().expect("Failed to build sample model.");
	let queries = fixtures::sample_queries();
	let taxon = catalog.require(GENES_BY_TAXON).expect("Missing question.").params();
	let orthologs = catalog.require(GENES_BY_ORTHOLOGS).expect("Missing question.").params();
	let first = VocabularyResolver::new(taxon, &queries, 1)
		.default_value("organism", &BTreeMap::new())
		.expect("Failed to compute default.");
	let all = VocabularyResolver::new(orthologs, &queries, 1)
		.default_value("organism", &BTreeMap::new())
		.expect("Failed to compute default.");

	assert_eq!(first.as_deref(), Some("Plasmodium,P. falciparum,P. vivax"));
	assert_eq!(all.as_deref(), Some("Plasmodium,P. falciparum,P. vivax,Toxoplasma,T. gondii"));
}

#[test]
fn empty_dependent_vocabulary_is_a_model_error() {
	let catalog = fixtures::sample_model().expect("Failed to build sample model.");
	let queries = fixtures::sample_queries();
	let context = catalog.require(GENES_BY_STRAIN).expect("Missing question.").params();
	let resolver = VocabularyResolver::new(context, &queries, 1);
	let err = resolver
		.resolve("strain", &values(&[("species", "T. gondii")]))
		.expect_err("Expected an empty vocabulary to fail.");

	assert!(!err.is_user_facing());
	assert!(err.to_string().contains("No item returned"), "unexpected error: {err}");
}

#[test]
fn shared_cache_skips_repeated_queries() {
	let catalog = fixtures::sample_model().expect("Failed to build sample model.");
	let queries = fixtures::sample_queries();
	let cache = VocabCache::new(16, Duration::minutes(5));
	let context = catalog.require(GENES_BY_STRAIN).expect("Missing question.").params();
	let depended = values(&[("species", "P. vivax")]);

	for user_id in [1, 2] {
		let resolver = VocabularyResolver::new(context, &queries, user_id).with_cache(&cache);
		let instance = resolver.resolve("strain", &depended).expect("Failed to resolve.");

		assert_eq!(instance.default_value(), Some("P01"));
	}

	assert_eq!(queries.call_count(STRAIN_QUERY), 1);
	assert_eq!(cache.len(), 1);
}

#[test]
fn correcting_values_follows_dependency_order() {
	let catalog = fixtures::sample_model().expect("Failed to build sample model.");
	let queries = fixtures::sample_queries();
	let context = catalog.require(GENES_BY_STRAIN).expect("Missing question.").params();
	let resolver = VocabularyResolver::new(context, &queries, 1);
	let corrected = resolver
		.fetch_correct_values(&values(&[("species", "P. vivax"), ("strain", "3D7")]))
		.expect("Failed to correct values.");

	assert_eq!(corrected.get("species").map(String::as_str), Some("P. vivax"));
	assert_eq!(corrected.get("strain").map(String::as_str), Some("P01"));
}

#[test]
fn all_values_span_every_depended_value() {
	let catalog = fixtures::sample_model().expect("Failed to build sample model.");
	let queries = fixtures::sample_queries();
	let context = catalog.require(GENES_BY_STRAIN).expect("Missing question.").params();
	let resolver = VocabularyResolver::new(context, &queries, 1);
	let mut strains = resolver.all_values("strain").expect("Failed to enumerate values.");

	strains.sort();

	assert_eq!(strains, ["3D7", "HB3", "P01"]);
}
