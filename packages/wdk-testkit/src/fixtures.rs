//! A small gene-search model and a query runner that answers from scripts.

use std::{collections::BTreeMap, sync::Mutex};

use time::OffsetDateTime;
use wdk_domain::{
	ModelCatalog, ParamDefinition, ParamKind, Question, QuestionKind, StepBuilder, StepGraph,
	StepNode, StrategyMeta,
	param::{
		EnumItem, EnumSettings, EnumSpec, FilterSpec, FlatVocabSpec, NumberSpec, SelectMode,
		StringSpec,
	},
	vocab::{QueryError, QueryRow, QueryRunner},
};

use crate::Result;

pub const GENES_BY_TAXON: &str = "GeneQuestions.GenesByTaxon";
pub const GENES_BY_STRAIN: &str = "GeneQuestions.GenesByStrain";
pub const GENES_BY_LOCATION: &str = "GeneQuestions.GenesByLocation";
pub const GENES_BY_SAMPLE: &str = "GeneQuestions.GenesBySample";
pub const GENES_BY_ORTHOLOGS: &str = "GeneQuestions.GenesByOrthologs";
pub const GENE_BOOLEAN: &str = "GeneQuestions.GeneBoolean";

pub const ORGANISM_QUERY: &str = "GeneVQ.Organisms";
pub const SPECIES_QUERY: &str = "GeneVQ.Species";
pub const STRAIN_QUERY: &str = "GeneVQ.StrainsBySpecies";
pub const SAMPLE_ONTOLOGY_QUERY: &str = "GeneVQ.SampleOntology";
pub const SAMPLE_METADATA_QUERY: &str = "GeneVQ.SampleMetadata";

const RECORD_CLASS: &str = "GeneRecordClasses.GeneRecordClass";

/// Questions covering every step shape: leaves, a dependent vocabulary, a filter param, a
/// transform and a boolean.
pub fn sample_model() -> Result<ModelCatalog> {
	let organism = |multi_pick: bool, select_mode: Option<SelectMode>| {
		ParamDefinition::new(
			"organismParams.organism",
			ParamKind::FlatVocab(FlatVocabSpec {
				settings: EnumSettings { multi_pick, select_mode, ..EnumSettings::default() },
				query_ref: ORGANISM_QUERY.to_string(),
			}),
		)
		.with_prompt("Organism")
	};
	let taxon = Question::new(
		GENES_BY_TAXON,
		RECORD_CLASS,
		QuestionKind::Leaf,
		vec![organism(true, Some(SelectMode::First))],
	)?
	.with_display_names("Genes by Taxon", "Taxon");
	let strain = Question::new(
		GENES_BY_STRAIN,
		RECORD_CLASS,
		QuestionKind::Leaf,
		vec![
			ParamDefinition::new(
				"strainParams.species",
				ParamKind::FlatVocab(FlatVocabSpec {
					settings: EnumSettings::default(),
					query_ref: SPECIES_QUERY.to_string(),
				}),
			)
			.with_prompt("Species"),
			ParamDefinition::new(
				"strainParams.strain",
				ParamKind::FlatVocab(FlatVocabSpec {
					settings: EnumSettings::default(),
					query_ref: STRAIN_QUERY.to_string(),
				}),
			)
			.with_prompt("Strain")
			.with_depended_refs("species")?,
		],
	)?
	.with_display_names("Genes by Strain", "Strain");
	let location = Question::new(
		GENES_BY_LOCATION,
		RECORD_CLASS,
		QuestionKind::Leaf,
		vec![
			ParamDefinition::new(
				"locationParams.chromosome",
				ParamKind::String(StringSpec::default()),
			)
			.with_prompt("Chromosome"),
			ParamDefinition::new(
				"locationParams.start",
				ParamKind::Number(NumberSpec { integer: true, min: Some(1.0), max: None }),
			)
			.with_prompt("Start"),
			ParamDefinition::new(
				"locationParams.end",
				ParamKind::Number(NumberSpec { integer: true, min: Some(0.0), max: None }),
			)
			.with_prompt("End")
			.with_empty_value(Some("0")),
		],
	)?
	.with_display_names("Genes by Genomic Location", "Location");
	let sample = Question::new(
		GENES_BY_SAMPLE,
		RECORD_CLASS,
		QuestionKind::Leaf,
		vec![
			ParamDefinition::new(
				"sampleParams.samples",
				ParamKind::Filter(FilterSpec {
					ontology_query_ref: SAMPLE_ONTOLOGY_QUERY.to_string(),
					metadata_query_ref: SAMPLE_METADATA_QUERY.to_string(),
					metadata_table: "apidb.sample_metadata".to_string(),
				}),
			)
			.with_prompt("Samples"),
		],
	)?
	.with_display_names("Genes by Sample Characteristics", "Samples");
	let orthologs = Question::new(
		GENES_BY_ORTHOLOGS,
		RECORD_CLASS,
		QuestionKind::Transform,
		vec![
			ParamDefinition::new("InternalParams.gene_result", ParamKind::Answer),
			organism(true, Some(SelectMode::All)),
		],
	)?
	.with_display_names("Orthologs", "Orthologs");
	let boolean = Question::new(
		GENE_BOOLEAN,
		RECORD_CLASS,
		QuestionKind::Boolean { operator_param: "bq_operator".to_string() },
		vec![
			ParamDefinition::new("InternalParams.bq_left_op", ParamKind::Answer),
			ParamDefinition::new("InternalParams.bq_right_op", ParamKind::Answer),
			ParamDefinition::new(
				"InternalParams.bq_operator",
				ParamKind::Enum(EnumSpec {
					settings: EnumSettings::default(),
					items: ["INTERSECT", "UNION", "MINUS"]
						.into_iter()
						.map(|operator| EnumItem::new(operator, operator))
						.collect(),
				}),
			)
			.with_prompt("Operator"),
		],
	)?
	.with_display_names("Combine", "Combine");
	let catalog = ModelCatalog::new()
		.with_question(taxon)?
		.with_question(strain)?
		.with_question(location)?
		.with_question(sample)?
		.with_question(orthologs)?
		.with_question(boolean)?;

	Ok(catalog)
}

/// Vocabulary row with the columns flat-vocab queries return.
pub fn term_row(term: &str, internal: &str, parent: Option<&str>) -> QueryRow {
	QueryRow::new()
		.with("term", Some(term))
		.with("internal", Some(internal))
		.with("display", Some(term))
		.with("parentTerm", parent)
}

/// Runner answering every query of `sample_model`.
///
/// Organisms form the tree `Plasmodium(P. falciparum, P. vivax)`, `Toxoplasma(T. gondii)`.
/// Strains exist for `P. falciparum` and `P. vivax`; other species return no rows.
pub fn sample_queries() -> ScriptedQueryRunner {
	ScriptedQueryRunner::new()
		.with_rows(
			ORGANISM_QUERY,
			vec![
				term_row("Plasmodium", "plas", None),
				term_row("P. falciparum", "pfal", Some("Plasmodium")),
				term_row("P. vivax", "pviv", Some("Plasmodium")),
				term_row("Toxoplasma", "toxo", None),
				term_row("T. gondii", "tgon", Some("Toxoplasma")),
			],
		)
		.with_rows(
			SPECIES_QUERY,
			vec![
				term_row("P. falciparum", "pfal", None),
				term_row("P. vivax", "pviv", None),
				term_row("T. gondii", "tgon", None),
			],
		)
		.with_rows_when(
			STRAIN_QUERY,
			&[("species", "P. falciparum")],
			vec![term_row("3D7", "pf3d7", None), term_row("HB3", "pfhb3", None)],
		)
		.with_rows_when(
			STRAIN_QUERY,
			&[("species", "P. vivax")],
			vec![term_row("P01", "pvp01", None)],
		)
		.with_rows(
			SAMPLE_ONTOLOGY_QUERY,
			vec![
				ontology_row("age", "number"),
				ontology_row("collected", "date"),
				ontology_row("country", "string"),
			],
		)
		.with_rows(
			SAMPLE_METADATA_QUERY,
			vec![
				metadata_row("country", "string_value", "Mali"),
				metadata_row("country", "string_value", "Kenya"),
				metadata_row("age", "number_value", "18"),
				metadata_row("age", "number_value", "65"),
			],
		)
}

/// A strategy meta with fixed timestamps.
pub fn strategy_meta(strategy_id: i64, user_id: i64) -> StrategyMeta {
	let epoch = time_epoch();

	StrategyMeta {
		strategy_id,
		user_id,
		project_id: "PlasmoDB".to_string(),
		version: "68".to_string(),
		name: format!("Strategy {strategy_id}"),
		saved_name: None,
		description: None,
		signature: None,
		is_saved: false,
		is_public: false,
		is_deleted: false,
		created_at: epoch,
		last_modified_at: epoch,
		last_viewed_at: epoch,
	}
}

/// Leaf step of `question_name` in `strategy_id` with the given stable values.
pub fn leaf_step(
	catalog: &ModelCatalog,
	strategy_id: i64,
	step_id: i64,
	question_name: &str,
	params: &[(&str, &str)],
) -> Result<StepNode> {
	combined_step(catalog, strategy_id, step_id, question_name, params, &[])
}

pub fn combined_step(
	catalog: &ModelCatalog,
	strategy_id: i64,
	step_id: i64,
	question_name: &str,
	params: &[(&str, &str)],
	inputs: &[i64],
) -> Result<StepNode> {
	let question = catalog.require(question_name)?;
	let params =
		params.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();
	let step = StepBuilder::new(step_id, 1, question)
		.strategy_id(Some(strategy_id))
		.project("PlasmoDB", "68")
		.timestamps(time_epoch(), time_epoch())
		.estimated_size(100)
		.params(params)
		.inputs(inputs)
		.build()?;

	Ok(step)
}

/// `1 (taxon) -> 2 (orthologs)` on the main branch, combined with `3 (location)` by boolean `4`.
pub fn sample_graph(catalog: &ModelCatalog, strategy_id: i64) -> Result<StepGraph> {
	let steps = vec![
		leaf_step(catalog, strategy_id, 1, GENES_BY_TAXON, &[("organism", "P. falciparum")])?,
		combined_step(
			catalog,
			strategy_id,
			2,
			GENES_BY_ORTHOLOGS,
			&[("organism", "P. vivax")],
			&[1],
		)?,
		leaf_step(
			catalog,
			strategy_id,
			3,
			GENES_BY_LOCATION,
			&[("chromosome", "Pf3D7_01"), ("start", "1"), ("end", "0")],
		)?,
		combined_step(
			catalog,
			strategy_id,
			4,
			GENE_BOOLEAN,
			&[("bq_operator", "INTERSECT")],
			&[2, 3],
		)?,
	];
	let graph = StepGraph::new(strategy_meta(strategy_id, 1), 4, steps)?;

	Ok(graph)
}

/// Executed query with the values it ran with.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueryCall {
	pub query_ref: String,
	pub values: BTreeMap<String, String>,
}

#[derive(Clone, Debug)]
struct Script {
	when: BTreeMap<String, String>,
	rows: Vec<QueryRow>,
}

/// `QueryRunner` answering from scripted rows and recording every call.
///
/// A query without scripts fails. A query whose scripts all fail to match returns no rows.
#[derive(Debug, Default)]
pub struct ScriptedQueryRunner {
	scripts: BTreeMap<String, Vec<Script>>,
	calls: Mutex<Vec<QueryCall>>,
}
impl ScriptedQueryRunner {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_rows(self, query_ref: &str, rows: Vec<QueryRow>) -> Self {
		self.with_rows_when(query_ref, &[], rows)
	}

	/// Rows returned when every `(param, value)` pair matches the query's values.
	pub fn with_rows_when(
		mut self,
		query_ref: &str,
		when: &[(&str, &str)],
		rows: Vec<QueryRow>,
	) -> Self {
		let when = when.iter().map(|(name, value)| (name.to_string(), value.to_string())).collect();

		self.scripts.entry(query_ref.to_string()).or_default().push(Script { when, rows });

		self
	}

	pub fn calls(&self) -> Vec<QueryCall> {
		self.calls.lock().unwrap_or_else(|err| err.into_inner()).clone()
	}

	pub fn call_count(&self, query_ref: &str) -> usize {
		self.calls
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.iter()
			.filter(|call| call.query_ref == query_ref)
			.count()
	}
}
impl QueryRunner for ScriptedQueryRunner {
	fn run_query(
		&self,
		_user_id: i64,
		query_ref: &str,
		values: &BTreeMap<String, String>,
	) -> std::result::Result<Vec<QueryRow>, QueryError> {
		self.calls
			.lock()
			.unwrap_or_else(|err| err.into_inner())
			.push(QueryCall { query_ref: query_ref.to_string(), values: values.clone() });

		let Some(scripts) = self.scripts.get(query_ref) else {
			return Err(QueryError::new(format!("No script for query {query_ref}.")));
		};
		let rows = scripts
			.iter()
			.find(|script| {
				script.when.iter().all(|(name, value)| values.get(name) == Some(value))
			})
			.map(|script| script.rows.clone())
			.unwrap_or_default();

		Ok(rows)
	}
}

fn ontology_row(name: &str, value_type: &str) -> QueryRow {
	QueryRow::new().with("ontology_term_name", Some(name)).with("type", Some(value_type))
}

fn metadata_row(name: &str, column: &str, value: &str) -> QueryRow {
	QueryRow::new().with("ontology_term_name", Some(name)).with(column, Some(value))
}

fn time_epoch() -> OffsetDateTime {
	OffsetDateTime::UNIX_EPOCH
}
