/// Failures reported by an [`crate::EventSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SourceError {
    #[error("backend unavailable: {0}")]
    Transient(String),
    #[error("unknown conversation: {0}")]
    UnknownConversation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_renders_a_reason() {
        assert_eq!(
            SourceError::Transient("timeout".into()).to_string(),
            "backend unavailable: timeout"
        );
        assert_eq!(
            SourceError::UnknownConversation("c9".into()).to_string(),
            "unknown conversation: c9"
        );
    }
}
