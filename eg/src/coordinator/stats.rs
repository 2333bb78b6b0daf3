//! Recovery statistics

/// Counts of recovery paths a coordinator has taken
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryStats {
    /// Membership changes handled by a successful sync
    pub syncs: usize,
    /// Rollbacks to the last commit
    pub restores: usize,
    /// Syncs abandoned because a peer failed
    pub peer_failures: usize,
}

impl std::fmt::Display for RecoveryStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "syncs: {}, restores: {}, peer failures: {}",
            self.syncs, self.restores, self.peer_failures
        )
    }
}
