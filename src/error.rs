use thiserror::Error;

fn origin(member: &Option<u32>, index: &Option<usize>) -> String {
    match (member, index) {
        (Some(m), Some(i)) => format!(" (member {}, ciphertext {})", m, i),
        (Some(m), None) => format!(" (member {})", m),
        (None, Some(i)) => format!(" (ciphertext {})", i),
        (None, None) => String::new(),
    }
}

/// Error types.
///
/// No local recovery exists anywhere in the crate: a failed proof or a
/// broken ledger invariant aborts the enclosing stage and the tally. The
/// ledger is never mutated during a tally, so aborting leaves it intact for
/// a re-run.
#[derive(Debug, Error)]
pub enum Error {
    /// A zero-knowledge proof failed challenge re-derivation or a linear
    /// relation check.
    #[error("votegral: {stage}: proof failed to verify{}", origin(.member, .index))]
    ProofInvalid {
        stage: String,
        member: Option<u32>,
        index: Option<usize>,
    },

    /// A signature mismatch, unauthorized credential, or structural
    /// violation on a ledger record.
    #[error("votegral: ledger invariant violated: {0}")]
    LedgerInvariant(String),

    /// Mismatched input sizes. Indicates a caller bug.
    #[error("votegral: shape mismatch: {0}")]
    ShapeMismatch(String),

    /// Inputs below protocol minimums or participants out of order.
    #[error("votegral: protocol misuse: {0}")]
    ProtocolMisuse(String),

    /// Threshold decryption yielded a point that encodes no candidate.
    #[error("votegral: decryption impossible: plaintext at index {index} is neither identity nor generator")]
    DecryptionImpossible { index: usize },

    /// The external shuffle process exited non-zero or produced malformed
    /// output.
    #[error("votegral: shuffle backend failure: {0}")]
    BackendFailure(String),
}

impl Error {
    pub(crate) fn proof(stage: &str) -> Self {
        Error::ProofInvalid {
            stage: stage.to_string(),
            member: None,
            index: None,
        }
    }

    pub(crate) fn proof_member(stage: &str, member: u32) -> Self {
        Error::ProofInvalid {
            stage: stage.to_string(),
            member: Some(member),
            index: None,
        }
    }

    pub(crate) fn proof_at(stage: &str, member: u32, index: usize) -> Self {
        Error::ProofInvalid {
            stage: stage.to_string(),
            member: Some(member),
            index: Some(index),
        }
    }
}
