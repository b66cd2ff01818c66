use std::fmt;
use strum::EnumString;

pub const NUMBER_OF_REGISTERS: usize = 32;

/// The three paired address registers of the AVR-8 core. Each pair spans
/// two adjacent 8-bit registers, low byte first.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, EnumString)]
pub enum RegisterPair {
    X,
    Y,
    Z,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum RegisterHalf {
    High,
    Low,
}

impl RegisterPair {
    pub fn low(self) -> usize {
        match self {
            RegisterPair::X => 26,
            RegisterPair::Y => 28,
            RegisterPair::Z => 30,
        }
    }

    pub fn high(self) -> usize {
        self.low() + 1
    }

    pub fn half(self, half: RegisterHalf) -> usize {
        match half {
            RegisterHalf::High => self.high(),
            RegisterHalf::Low => self.low(),
        }
    }
}

impl fmt::Display for RegisterPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// Neighboring registers as measured for the AVR ATmega163. The relation is
// not symmetric: r0 and r1 pick up cross-talk from the whole file, while
// r2..r31 only couple with their direct partner.
pub fn neighbor_map() -> Vec<Vec<usize>> {
    let mut map: Vec<Vec<usize>> = (0..NUMBER_OF_REGISTERS).map(|_| Vec::new()).collect();

    map[0] = (1..NUMBER_OF_REGISTERS).collect();
    map[1] = (2..NUMBER_OF_REGISTERS).collect();
    map[1].push(0);

    for reg in (2..NUMBER_OF_REGISTERS).step_by(2) {
        map[reg].push(reg + 1);
        map[reg + 1].push(reg);
    }

    map
}
