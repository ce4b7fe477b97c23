use std::fmt;

/// Identifies a function within the namespace owned by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FunctionId {
    pub function: String,
}

impl FunctionId {
    pub fn new(function: impl Into<String>) -> Self {
        Self {
            function: function.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.function
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.function)
    }
}

impl From<&str> for FunctionId {
    fn from(function: &str) -> Self {
        Self::new(function)
    }
}
