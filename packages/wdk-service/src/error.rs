pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("Invalid request: {message}")]
	InvalidRequest { message: String },
	#[error("Out of sync: {message}")]
	OutOfSync { message: String },
	#[error("Not found: {message}")]
	NotFound { message: String },
	#[error("Conflict: {message}")]
	Conflict { message: String },
	#[error("Model error: {message}")]
	Model { message: String },
	#[error("Storage error: {message}")]
	Storage { message: String },
}
impl From<sqlx::Error> for Error {
	fn from(err: sqlx::Error) -> Self {
		Self::Storage { message: err.to_string() }
	}
}

impl From<wdk_domain::Error> for Error {
	fn from(err: wdk_domain::Error) -> Self {
		match err {
			wdk_domain::Error::UserInput { message } => Self::InvalidRequest { message },
			wdk_domain::Error::OutOfSync { message } => Self::OutOfSync { message },
			other => {
				let message = other.to_string();

				tracing::error!(error = %message, "Model error surfaced.");

				Self::Model { message }
			},
		}
	}
}

impl From<wdk_storage::Error> for Error {
	fn from(err: wdk_storage::Error) -> Self {
		match err {
			wdk_storage::Error::Sqlx(inner) => Self::Storage { message: inner.to_string() },
			wdk_storage::Error::InvalidArgument(message) => Self::InvalidRequest { message },
			wdk_storage::Error::NotFound(message) => Self::NotFound { message },
			wdk_storage::Error::Conflict(message) => Self::Conflict { message },
			wdk_storage::Error::OutOfSync(message) => Self::OutOfSync { message },
			wdk_storage::Error::Domain(inner) => inner.into(),
		}
	}
}
