use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Room id unknown to the registry.
    NotFound(Ulid),
    /// Malformed input: bad date, out-of-range capacity, empty user id.
    InvalidArgument(String),
    /// Operational bound hit (name length, room/tenant counts).
    LimitExceeded(&'static str),
    /// The durable store failed to persist; in-memory state was left untouched.
    Storage(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::InvalidArgument(msg) => write!(f, "invalid argument: {msg}"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Storage(e) => write!(f, "storage error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
