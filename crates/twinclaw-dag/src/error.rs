use thiserror::Error;
use twinclaw_common::{ErrorKind, Kind};

#[derive(Error, Debug)]
pub enum DagError {
    #[error("duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("node {0} depends on unknown node {1}")]
    MissingDependency(String, String),

    #[error("dependency graph contains a cycle: {0} -> {1}")]
    Cycle(String, String),

    #[error("job has {0} nodes, exceeding the limit of {1}")]
    TooManyNodes(usize, usize),

    #[error("dependency chain depth {0} exceeds the limit of {1}")]
    TooDeep(usize, usize),

    #[error("job {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] twinclaw_store::StoreError),
}

impl ErrorKind for DagError {
    fn kind(&self) -> Kind {
        match self {
            DagError::DuplicateNode(_)
            | DagError::MissingDependency(_, _)
            | DagError::Cycle(_, _)
            | DagError::TooManyNodes(_, _)
            | DagError::TooDeep(_, _) => Kind::ValidationError,
            DagError::NotFound(_) => Kind::NotFound,
            DagError::Store(e) => e.kind(),
        }
    }
}

pub type DagResult<T> = std::result::Result<T, DagError>;
