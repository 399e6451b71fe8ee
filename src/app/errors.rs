use crate::config::Language;
use crate::semantic::SearchError;

#[derive(thiserror::Error, Debug)]
pub enum AppError {
    #[error("language '{0}' is not configured")]
    LanguageNotConfigured(Language),

    #[error(transparent)]
    Search(#[from] SearchError),

    #[error("unexpected error: {0:?}")]
    Other(#[from] anyhow::Error),
}
