pub mod codec;
pub mod filter;
pub mod model;
pub mod mutation;
pub mod param;
pub mod step;
pub mod strategy;
pub mod vocab;

mod error;

pub use error::{Error, Result};
pub use model::{ModelCatalog, Question, QuestionKind};
pub use mutation::{
	PreallocatedIds, ReviseRequest, StepIdAllocator, StepMutationEngine, StepRequest,
};
pub use param::{ParamContext, ParamDefinition, ParamKind};
pub use step::{AnswerSpec, FilterOption, StepBuilder, StepNode};
pub use strategy::{GraphEdit, IdRemapping, StepGraph, StrategyKey, StrategyMeta};
pub use vocab::{
	QueryError, QueryRow, QueryRunner, VocabCache, VocabularyInstance, VocabularyResolver,
};
