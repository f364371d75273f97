//! Outcome values handed to presentation layers.
//!
//! Internally everything is a [`crate::Result`]; a front end that only wants
//! `{ok, message, data}` converts with [`Outcome::from`]. [`BatchOutcome`]
//! summarises a run over many items.

use crate::error::DepotError;

/// Success/failure carrier with messages and optional data.
#[derive(Debug)]
pub struct Outcome<T> {
    /// Whether the operation succeeded.
    pub ok: bool,
    /// Human readable messages.
    pub messages: Vec<String>,
    /// Payload on success.
    pub data: Option<T>,
}

impl<T> Outcome<T> {
    /// First message, or an empty string.
    #[must_use]
    pub fn message(&self) -> &str {
        self.messages.first().map(String::as_str).unwrap_or("")
    }
}

impl<T> From<Result<T, DepotError>> for Outcome<T> {
    fn from(result: Result<T, DepotError>) -> Self {
        match result {
            Ok(data) => Self {
                ok: true,
                messages: Vec::new(),
                data: Some(data),
            },
            Err(e) => Self {
                ok: false,
                messages: vec![e.to_string()],
                data: None,
            },
        }
    }
}

/// Aggregate over many results.
#[derive(Debug)]
pub struct BatchOutcome<T> {
    /// True when every item succeeded.
    pub ok: bool,
    /// Messages of successful items (labels supplied by the caller).
    pub success_messages: Vec<String>,
    /// Messages of failed items.
    pub error_messages: Vec<String>,
    /// Data of successful items.
    pub success_data: Vec<T>,
}

impl<T> BatchOutcome<T> {
    /// Collects `(label, result)` pairs.
    pub fn collect<I>(results: I) -> Self
    where
        I: IntoIterator<Item = (String, Result<T, DepotError>)>,
    {
        let mut batch = Self {
            ok: true,
            success_messages: Vec::new(),
            error_messages: Vec::new(),
            success_data: Vec::new(),
        };
        for (label, result) in results {
            match result {
                Ok(data) => {
                    batch.success_messages.push(label);
                    batch.success_data.push(data);
                }
                Err(e) => {
                    batch.ok = false;
                    batch.error_messages.push(format!("{}: {}", label, e));
                }
            }
        }
        if !batch.ok {
            tracing::warn!("{}", batch.error_messages.join(";"));
        }
        batch
    }

    /// Number of failed items.
    #[must_use]
    pub fn error_count(&self) -> usize {
        self.error_messages.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_from_result() {
        let ok: Outcome<u32> = Outcome::from(Ok(3));
        assert!(ok.ok);
        assert_eq!(ok.data, Some(3));

        let err: Outcome<u32> =
            Outcome::from(Err(DepotError::Validation("bad input".to_string())));
        assert!(!err.ok);
        assert_eq!(err.message(), "bad input");
        assert!(err.data.is_none());
    }

    #[test]
    fn test_batch_outcome() {
        let batch = BatchOutcome::collect(vec![
            ("a".to_string(), Ok(1)),
            (
                "b".to_string(),
                Err(DepotError::Validation("nope".to_string())),
            ),
            ("c".to_string(), Ok(3)),
        ]);
        assert!(!batch.ok);
        assert_eq!(batch.success_data, vec![1, 3]);
        assert_eq!(batch.error_count(), 1);
        assert!(batch.error_messages[0].contains("nope"));
    }
}
