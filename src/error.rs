/// An engine-level error.
#[derive(Debug, PartialEq, Eq, Copy, Clone)]
pub enum EchofieldError {
    /// An argument was nil, out of range, or otherwise invalid.
    InvalidArgument,

    /// The system ran out of memory.
    OutOfMemory,

    /// An error occurred while initializing a subsystem or asset.
    Initialization,

    /// A long-running operation was cancelled by the caller.
    Cancelled,

    /// An operation was attempted against an object in the wrong state, such
    /// as querying an uncommitted scene.
    InconsistentState,
}

impl std::error::Error for EchofieldError {}

impl std::fmt::Display for EchofieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match &self {
            Self::InvalidArgument => write!(f, "invalid argument"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::Initialization => write!(f, "error while initializing a subsystem"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::InconsistentState => write!(f, "object is in an inconsistent state"),
        }
    }
}
