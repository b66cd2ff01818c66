use super::instruction::MemKey;
use super::system::RegisterPair;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// A mask-share collision between two values: the same mask id occurs on
/// both sides with a non-empty combined share set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MaskCollision {
    pub mask: String,
    pub shares: BTreeSet<u32>,
    pub kind: CollisionKind,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CollisionKind {
    /// The intersection of the share sets is non-empty: an identical share
    /// is folded in twice. `shares` lists the intersection.
    SharedShare,
    /// Disjoint share sets of the same mask meet in one value, which is
    /// the unmasking event. `shares` lists the union.
    DistinctShares,
}

impl fmt::Display for MaskCollision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            CollisionKind::SharedShare => write!(
                f,
                "share(s) {} of mask '{}' recombined with themselves",
                fmt_shares(&self.shares),
                self.mask
            ),
            CollisionKind::DistinctShares => write!(
                f,
                "shares {} of mask '{}' meet in one value (possible unmasking)",
                fmt_shares(&self.shares),
                self.mask
            ),
        }
    }
}

pub(crate) fn fmt_shares(shares: &BTreeSet<u32>) -> String {
    let inner = shares
        .iter()
        .map(|share| share.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", inner)
}

/// One advisory finding. These never interrupt execution; they accumulate
/// in the run report.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Leak {
    /// Two operands carry randomness under the same concrete tag.
    RandomReuse { tag: String },

    /// Two operands carry anonymous randomness; reuse can neither be
    /// proven nor excluded.
    PotentialRandomReuse,

    /// Shares of one mask meet in a single value.
    Mask(MaskCollision),

    /// Shares of one mask meet across physically adjacent registers.
    Neighbor {
        register: usize,
        neighbor: usize,
        collision: MaskCollision,
    },

    /// The instruction propagates the carry flag, which is not modeled and
    /// may itself hold secret shares.
    CarryFlag,

    /// Bit-rearranging instruction: unsafe if different shares live in
    /// different parts of a byte.
    BitRearranging,

    /// The instruction has no modeled semantics at all.
    UnknownInstruction,
}

impl fmt::Display for Leak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Leak::RandomReuse { tag } => {
                write!(f, "combining identical random values [{}]", tag)
            }
            Leak::PotentialRandomReuse => {
                write!(f, "potential combination of identical random values")
            }
            Leak::Mask(collision) => write!(f, "{}", collision),
            Leak::Neighbor {
                register,
                neighbor,
                collision,
            } => write!(
                f,
                "cross-talk between r{} and neighboring r{}: {}",
                register, neighbor, collision
            ),
            Leak::CarryFlag => write!(
                f,
                "instruction uses the carry flag, which may hold secret shares"
            ),
            Leak::BitRearranging => write!(
                f,
                "bit-rearranging instruction is not modeled; unsafe if shares sit in different bits of a byte"
            ),
            Leak::UnknownInstruction => write!(f, "instruction is not modeled"),
        }
    }
}

/// Structural errors. A fault aborts the remainder of the offending
/// instruction, is reported with source context, and never stops the run.
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum Fault {
    #[error("access to unknown memory cell {0}")]
    UnknownMemoryCell(MemKey),

    #[error("unrecognized register alias '{0}'")]
    UnknownRegisterAlias(String),

    #[error("register r{0} is outside the register file")]
    RegisterOutOfRange(usize),

    #[error("missing {0} operand")]
    MissingOperand(&'static str),

    #[error("operand '{found}' is not a valid {expected}")]
    BadOperand {
        expected: &'static str,
        found: String,
    },

    #[error("cannot resolve an address from pair {0}: both halves must hold constants of the same kind")]
    UnresolvedPointer(RegisterPair),

    #[error("pop from an empty stack")]
    StackUnderflow,
}

/// A finding attributed to its program position.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Diagnostic {
    pub pc: usize,
    pub source: String,
    pub kind: DiagnosticKind,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum DiagnosticKind {
    Leak(Leak),
    Fault(Fault),
}

impl Diagnostic {
    pub fn leak(pc: usize, source: &str, leak: Leak) -> Self {
        Self {
            pc,
            source: source.to_string(),
            kind: DiagnosticKind::Leak(leak),
        }
    }

    pub fn fault(pc: usize, source: &str, fault: Fault) -> Self {
        Self {
            pc,
            source: source.to_string(),
            kind: DiagnosticKind::Fault(fault),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            DiagnosticKind::Leak(leak) => {
                write!(f, "leakage warning at {} > {}: {}", self.pc, self.source, leak)
            }
            DiagnosticKind::Fault(fault) => {
                write!(f, "error at {} > {}: {}", self.pc, self.source, fault)
            }
        }
    }
}

/// Everything a single run reported, in program order.
#[derive(Clone, Debug, Default)]
pub struct RunReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl RunReport {
    pub fn record(&mut self, diagnostic: Diagnostic) {
        self.diagnostics.push(diagnostic);
    }

    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }

    pub fn leak_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.kind, DiagnosticKind::Leak(_)))
            .count()
    }

    pub fn fault_count(&self) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| matches!(d.kind, DiagnosticKind::Fault(_)))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shares(values: &[u32]) -> BTreeSet<u32> {
        values.iter().copied().collect()
    }

    #[test]
    fn collision_messages_name_mask_and_shares() {
        let reuse = MaskCollision {
            mask: "a".to_string(),
            shares: shares(&[2]),
            kind: CollisionKind::SharedShare,
        };
        assert!(reuse.to_string().contains("share(s) {2} of mask 'a'"));

        let unmask = MaskCollision {
            mask: "a".to_string(),
            shares: shares(&[0, 1]),
            kind: CollisionKind::DistinctShares,
        };
        assert!(unmask.to_string().contains("shares {0, 1} of mask 'a'"));
        assert!(unmask.to_string().contains("unmasking"));
    }

    #[test]
    fn diagnostics_carry_source_context() {
        let diagnostic = Diagnostic::leak(3, "eor r0, r1", Leak::PotentialRandomReuse);
        let rendered = diagnostic.to_string();
        assert!(rendered.starts_with("leakage warning at 3 > eor r0, r1"));
    }
}
