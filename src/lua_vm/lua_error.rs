/// Lightweight error kind, cheap to thread through `Result` on the hot path.
///
/// The formatted message lives alongside it (see [`LuaError`]) rather than
/// in a side channel, since unlike the teacher crate we have no VM-global
/// scratch slot to stash it in once the offending frame may already have
/// unwound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Syntax,
    Runtime,
    Memory,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Ok => write!(f, "ok"),
            Status::Syntax => write!(f, "syntax error"),
            Status::Runtime => write!(f, "runtime error"),
            Status::Memory => write!(f, "out of memory"),
        }
    }
}

/// A thrown error: kind plus the message pushed on the stack at the throw
/// site (spec §7: "all three unwind through the same handler chain; the
/// distinction is preserved only in the status code").
#[derive(Debug, Clone)]
pub struct LuaError {
    pub kind: Status,
    pub message: String,
}

impl LuaError {
    pub fn syntax(message: impl Into<String>) -> Self {
        Self { kind: Status::Syntax, message: message.into() }
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self { kind: Status::Runtime, message: message.into() }
    }

    pub fn memory(message: impl Into<String>) -> Self {
        Self { kind: Status::Memory, message: message.into() }
    }
}

impl std::fmt::Display for LuaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for LuaError {}

pub type LuaResult<T> = Result<T, LuaError>;
