use std::{error::Error, fmt};

use serde::{Deserialize, Serialize};

use crate::event::Address;

/// A breach of the allocator contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Violation {
    MemoryLeaked,
    ObjectLeaked,
    DeallocatingUnallocatedMemory,
    DeallocatingCountMismatch,
    AssignUninitializedMemory,
    AssignFromUninitializedMemory,
    DestroyingNonconstructedMemory,
}

impl Violation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::MemoryLeaked => "memory_leaked",
            Self::ObjectLeaked => "object_leaked",
            Self::DeallocatingUnallocatedMemory => "deallocating_unallocated_memory",
            Self::DeallocatingCountMismatch => "deallocating_count_mismatch",
            Self::AssignUninitializedMemory => "assign_uninitialized_memory",
            Self::AssignFromUninitializedMemory => "assign_from_uninitialized_memory",
            Self::DestroyingNonconstructedMemory => "destroying_nonconstructed_memory",
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A [`Violation`] and the address it was found at.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Diagnostic {
    pub violation: Violation,
    pub address: Address,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.violation, self.address)
    }
}

/// Everything a session got wrong, sorted and without duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationError {
    diagnostics: Vec<Diagnostic>,
}

impl VerificationError {
    pub(crate) fn new(mut diagnostics: Vec<Diagnostic>) -> Self {
        diagnostics.sort_unstable();
        diagnostics.dedup();
        Self { diagnostics }
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    pub fn count(&self, violation: Violation) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.violation == violation)
            .count()
    }

    pub fn contains(&self, violation: Violation) -> bool {
        self.count(violation) != 0
    }

    /// The distinct violations, in order
    pub fn violations(&self) -> Vec<Violation> {
        let mut violations: Vec<_> = self.diagnostics.iter().map(|d| d.violation).collect();
        violations.dedup();
        violations
    }
}

impl fmt::Display for VerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diagnostic) in self.diagnostics.iter().enumerate() {
            if i != 0 {
                writeln!(f)?;
            }
            write!(f, "{diagnostic}")?;
        }
        Ok(())
    }
}

impl Error for VerificationError {}
