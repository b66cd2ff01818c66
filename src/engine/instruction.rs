use super::system::{RegisterHalf, RegisterPair};
use serde::Deserialize;
use std::fmt;
use strum::EnumString;

/// Every mnemonic with modeled provenance semantics, the bit-rearranging
/// set that is only warned about, and a catch-all for everything else.
/// Parsing a mnemonic never fails; unmodeled names land in `Unknown`.
#[derive(Clone, Debug, Eq, PartialEq, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum Mnemonic {
    Mov,
    Bst,
    Bld,
    Push,
    Pop,
    Eor,
    And,
    Or,
    Add,
    Sub,
    Cp,
    Adc,
    Sbc,
    Cpc,
    Mul,
    Muls,
    Mulsu,
    Fmul,
    Fmuls,
    Fmulsu,
    Ldi,
    Lds,
    Ld,
    Sts,
    St,
    Swap,
    Lsr,
    Lsl,
    Ror,
    Rol,
    Asr,
    #[strum(default)]
    Unknown(String),
}

impl Mnemonic {
    /// Instructions that move individual bits across byte boundaries and
    /// may also clobber the carry flag. Unsafe if different shares live in
    /// different parts of a byte, so they trigger an advisory instead of
    /// being executed.
    pub fn is_bit_rearranging(&self) -> bool {
        matches!(
            self,
            Mnemonic::Swap
                | Mnemonic::Lsr
                | Mnemonic::Lsl
                | Mnemonic::Ror
                | Mnemonic::Rol
                | Mnemonic::Asr
        )
    }
}

/// A memory cell is addressed either numerically or by label. Layout files
/// use the same key domain, so a bare JSON number is an address and a JSON
/// string is a label.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Deserialize)]
#[serde(untagged)]
pub enum MemKey {
    Address(u64),
    Label(String),
}

impl fmt::Display for MemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemKey::Address(address) => write!(f, "{:#06x}", address),
            MemKey::Label(label) => write!(f, "{}", label),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Operand {
    /// Plain register, `r0` .. `r31`.
    Register(usize),
    /// One of the pointer pairs `X`, `Y`, `Z` used for indirect addressing.
    Pair(RegisterPair),
    /// A named half of a pointer pair, `XH`/`XL`/`YH`/`YL`/`ZH`/`ZL`.
    Half(RegisterPair, RegisterHalf),
    /// Numeric literal: immediate value or direct address.
    Number(u64),
    /// Anything else is an opaque label into memory.
    Label(String),
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Register(index) => write!(f, "r{}", index),
            Operand::Pair(pair) => write!(f, "{}", pair),
            Operand::Half(pair, RegisterHalf::High) => write!(f, "{}H", pair),
            Operand::Half(pair, RegisterHalf::Low) => write!(f, "{}L", pair),
            Operand::Number(value) => write!(f, "{:#x}", value),
            Operand::Label(label) => write!(f, "{}", label),
        }
    }
}

/// One structured program line. Operand absence is significant: it selects
/// the zero/one/two-argument form during dispatch. The verbatim source
/// line is kept for diagnostics.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instruction {
    pub mnemonic: Mnemonic,
    pub op1: Option<Operand>,
    pub op2: Option<Operand>,
    pub source: String,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn mnemonics_parse_from_lowercase_names() {
        assert_eq!(Mnemonic::from_str("eor"), Ok(Mnemonic::Eor));
        assert_eq!(Mnemonic::from_str("fmulsu"), Ok(Mnemonic::Fmulsu));
    }

    #[test]
    fn unmodeled_mnemonics_become_unknown() {
        assert_eq!(
            Mnemonic::from_str("rjmp"),
            Ok(Mnemonic::Unknown("rjmp".to_string()))
        );
    }

    #[test]
    fn bit_rearranging_set_is_closed() {
        assert!(Mnemonic::Swap.is_bit_rearranging());
        assert!(Mnemonic::Ror.is_bit_rearranging());
        assert!(!Mnemonic::Eor.is_bit_rearranging());
        assert!(!Mnemonic::Unknown("nop".to_string()).is_bit_rearranging());
    }
}
