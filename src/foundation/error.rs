/// Convenience result type used across Tilelight.
pub type TilelightResult<T> = Result<T, TilelightError>;

/// Top-level error taxonomy used by scheduler and film APIs.
#[derive(thiserror::Error, Debug)]
pub enum TilelightError {
    /// Invalid user-provided configuration or region data.
    #[error("config error: {0}")]
    Config(String),

    /// Errors in film channel handling or buffer merges.
    #[error("film error: {0}")]
    Film(String),

    /// Errors in tile scheduling or worker coordination.
    #[error("scheduler error: {0}")]
    Scheduler(String),

    /// Wrapped lower-level error from dependencies.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TilelightError {
    /// Build a [`TilelightError::Config`] value.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Build a [`TilelightError::Film`] value.
    pub fn film(msg: impl Into<String>) -> Self {
        Self::Film(msg.into())
    }

    /// Build a [`TilelightError::Scheduler`] value.
    pub fn scheduler(msg: impl Into<String>) -> Self {
        Self::Scheduler(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(
            TilelightError::config("x")
                .to_string()
                .contains("config error:")
        );
        assert!(TilelightError::film("x").to_string().contains("film error:"));
        assert!(
            TilelightError::scheduler("x")
                .to_string()
                .contains("scheduler error:")
        );
    }

    #[test]
    fn other_preserves_source() {
        let base = std::io::Error::other("boom");
        let err = TilelightError::Other(anyhow::Error::new(base));
        assert!(err.to_string().contains("boom"));
    }
}
