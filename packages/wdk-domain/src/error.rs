pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("{message}")]
	UserInput { message: String },
	#[error("Strategy is out of sync: {message}")]
	OutOfSync { message: String },
	#[error("Model error: {message}")]
	Model { message: String },
	#[error("Param {param} has no value for depended param {depended} and no default to fall back on.")]
	NoDependedValue { param: String, depended: String },
	#[error("Query {query} failed while resolving param {param}: {message}")]
	Query { query: String, param: String, message: String },
}
impl Error {
	pub fn user_input(message: impl Into<String>) -> Self {
		Self::UserInput { message: message.into() }
	}

	pub fn model(message: impl Into<String>) -> Self {
		Self::Model { message: message.into() }
	}

	/// True for errors the caller can correct and retry.
	pub fn is_user_facing(&self) -> bool {
		matches!(self, Self::UserInput { .. } | Self::OutOfSync { .. })
	}
}
