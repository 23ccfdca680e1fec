use crate::config::ConfigError;
use crate::gateway::ProviderError;
use crate::scan::ScanError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error("payload too large: estimated ~{estimated} tokens exceeds the model context limit of {limit} tokens")]
    SizeExceeded { estimated: usize, limit: usize },

    #[error("backend call failed: {0}")]
    Backend(#[from] ProviderError),

    #[error("chunk {index} of {total} failed: {source}")]
    Chunk {
        index: usize,
        total: usize,
        source: Box<AnalysisError>,
    },

    #[error("reduce round {round}, batch {index} of {total} failed: {source}")]
    Batch {
        round: usize,
        index: usize,
        total: usize,
        source: Box<AnalysisError>,
    },

    #[error("final synthesis failed: {source}")]
    Synthesis { source: Box<AnalysisError> },

    #[error("no analysis in this session yet; run an analysis before asking questions")]
    NoSessionYet,

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("scan failed: {0}")]
    Scan(#[from] ScanError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("worker failed: {0}")]
    Worker(String),
}

impl AnalysisError {
    pub(crate) fn in_chunk(self, index: usize, total: usize) -> Self {
        Self::Chunk {
            index,
            total,
            source: Box::new(self),
        }
    }

    pub(crate) fn in_batch(self, round: usize, index: usize, total: usize) -> Self {
        Self::Batch {
            round,
            index,
            total,
            source: Box::new(self),
        }
    }

    pub(crate) fn in_synthesis(self) -> Self {
        Self::Synthesis {
            source: Box::new(self),
        }
    }

    /// The innermost error, past any positional wrapping.
    pub fn root_cause(&self) -> &AnalysisError {
        match self {
            Self::Chunk { source, .. }
            | Self::Batch { source, .. }
            | Self::Synthesis { source } => source.root_cause(),
            other => other,
        }
    }
}
