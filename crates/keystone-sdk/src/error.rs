use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("action not registered: {name}")]
    ActionNotRegistered { name: String },

    #[error("action '{name}' failed: {reason}")]
    ActionFailed { name: String, reason: String },

    #[error("store is not fetchable")]
    NotFetchable,

    #[error("handler turned a {expected} call into a {found} call")]
    UnexpectedCall {
        expected: &'static str,
        found: &'static str,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("store error: {0}")]
    Store(#[from] keystone_store::StoreError),

    #[error("fetch error: {0}")]
    Fetch(#[from] keystone_fetch::FetchError),

    #[error("handler error: {0}")]
    Gate(#[from] keystone_gate::GateError),
}

impl From<keystone_refs::RefError> for SdkError {
    fn from(e: keystone_refs::RefError) -> Self {
        SdkError::Store(e.into())
    }
}

pub type SdkResult<T> = Result<T, SdkError>;
