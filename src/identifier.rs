use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IdentifierError {
    #[error("Identifier {0} is already allocated")]
    Duplicate(String),
}

/// Hands out component identifiers that are unique within one step.
///
/// A suggested base name is used as-is when free, otherwise `base0`,
/// `base1`, ... are tried in order.
#[derive(Debug, Default)]
pub struct IdentifierAllocator {
    used: HashSet<String>,
}

impl IdentifierAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from identifiers that already exist in the document.
    pub fn with_reserved<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            used: ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn allocate(&mut self, base: &str) -> String {
        if self.used.insert(base.to_string()) {
            return base.to_string();
        }
        let mut suffix = 0u32;
        loop {
            let candidate = format!("{}{}", base, suffix);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Claims an exact identifier; claiming one twice is an integrity error.
    pub fn claim(&mut self, id: &str) -> Result<(), IdentifierError> {
        if self.used.insert(id.to_string()) {
            Ok(())
        } else {
            Err(IdentifierError::Duplicate(id.to_string()))
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.used.contains(id)
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}
