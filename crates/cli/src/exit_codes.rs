//! CLI Exit Code Registry
//!
//! This is the single source of truth for all CLI exit codes.
//! Exit codes are part of the shell contract: scripts rely on them.
//!
//! # Exit Code Ranges
//!
//! | Range   | Domain           | Description                              |
//! |---------|------------------|------------------------------------------|
//! | 0       | Universal        | Success                                  |
//! | 1       | Universal        | General error (unspecified)              |
//! | 2       | Universal        | CLI usage error (bad args, missing file) |
//! | 3-9     | recon            | Reconciliation pass outcomes             |
//!
//! # Adding New Exit Codes
//!
//! 1. Add the constant in the appropriate range
//! 2. Document what triggers it
//! 3. Update the table above
//! 4. Wire it into `recon_exit_code`

use rollbook_recon::{FinalizeError, ReconError};

// =============================================================================
// Universal (0-2)
// =============================================================================

/// Success - command completed without errors.
pub const EXIT_SUCCESS: u8 = 0;

/// General error - unspecified failure.
/// Also used for internal consistency faults (a reference claimed twice).
pub const EXIT_ERROR: u8 = 1;

/// Usage error - bad arguments, unreadable config or selections file.
pub const EXIT_USAGE: u8 = 2;

// =============================================================================
// Recon (3-9)
// =============================================================================

/// Some source records still need a manual match.
/// Not a failure: the pending payload was written and `finalize` is next.
pub const EXIT_PENDING: u8 = 3;

/// Config failed to parse or validate.
pub const EXIT_INVALID_CONFIG: u8 = 4;

/// A dataset could not be read or normalized. Nothing was matched.
pub const EXIT_INGEST: u8 = 5;

/// A selection was refused (unknown name, id taken or not offered) or the
/// selections file is malformed.
pub const EXIT_SELECTION: u8 = 6;

/// The merged output could not be rendered or written.
pub const EXIT_EXPORT: u8 = 7;

/// Map an engine error to its exit code.
pub fn recon_exit_code(err: &ReconError) -> u8 {
    match err {
        ReconError::ConfigParse(_) | ReconError::ConfigValidation(_) => EXIT_INVALID_CONFIG,
        ReconError::Ingestion(_) => EXIT_INGEST,
        ReconError::Session(_) => EXIT_SELECTION,
        ReconError::Finalize(FinalizeError::IncompleteSession { .. }) => EXIT_PENDING,
        ReconError::Finalize(_) => EXIT_ERROR,
        ReconError::Export(_) => EXIT_EXPORT,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollbook_recon::error::{IngestionError, SessionError};

    #[test]
    fn codes_are_distinct() {
        let codes = [
            EXIT_SUCCESS,
            EXIT_ERROR,
            EXIT_USAGE,
            EXIT_PENDING,
            EXIT_INVALID_CONFIG,
            EXIT_INGEST,
            EXIT_SELECTION,
            EXIT_EXPORT,
        ];
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn incomplete_session_is_pending_not_failure() {
        let err = ReconError::Finalize(FinalizeError::IncompleteSession {
            pending: vec!["Alice".into()],
        });
        assert_eq!(recon_exit_code(&err), EXIT_PENDING);

        let err = ReconError::Finalize(FinalizeError::DuplicateReference {
            reference_id: "1".into(),
            first: "A".into(),
            second: "B".into(),
        });
        assert_eq!(recon_exit_code(&err), EXIT_ERROR);
    }

    #[test]
    fn error_classes_map_to_their_codes() {
        let ingest = ReconError::Ingestion(IngestionError::Empty { role: "source".into() });
        assert_eq!(recon_exit_code(&ingest), EXIT_INGEST);

        let session = ReconError::Session(SessionError::NotConfirmed { source_name: "A".into() });
        assert_eq!(recon_exit_code(&session), EXIT_SELECTION);

        assert_eq!(recon_exit_code(&ReconError::ConfigParse("x".into())), EXIT_INVALID_CONFIG);
    }
}
