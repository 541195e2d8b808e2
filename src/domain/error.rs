use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("malformed rule pattern at byte {position}: {reason}")]
    Pattern {
        position: usize,
        reason: &'static str,
    },
}

impl DomainError {
    pub fn pattern(position: usize, reason: &'static str) -> Self {
        Self::Pattern { position, reason }
    }
}
