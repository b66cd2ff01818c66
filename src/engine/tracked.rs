use super::leak::{fmt_shares, CollisionKind, Leak, MaskCollision};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

pub type ShareSet = BTreeSet<u32>;
pub type MaskShares = BTreeMap<String, ShareSet>;

/// A constant cell holds either a numeric value or a textual label half.
/// Both kinds take part in address synthesis for indirect memory access.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConstValue {
    Number(u64),
    Text(String),
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Number(value) => write!(f, "{:#x}", value),
            ConstValue::Text(text) => write!(f, "{}", text),
        }
    }
}

/// The provenance of one storage cell: fresh randomness, a known public
/// constant, or a set of secret-mask shares folded into the cell over its
/// history. At most one of random/constant is asserted at a time, while
/// shares may coexist with randomness (a share XOR-ed with a random value
/// is still both). A default value is "uninitialized": no flag, no shares.
///
/// All mutating operations run their leakage check first and return the
/// findings; the mutation itself always happens. Detection must not
/// suppress propagation, or a leak downstream of another leak would go
/// unmodeled.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TrackedValue {
    random: bool,
    random_tag: Option<String>,
    constant: bool,
    const_val: Option<ConstValue>,
    mask_shares: MaskShares,
}

impl TrackedValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_random(&self) -> bool {
        self.random
    }

    pub fn is_const(&self) -> bool {
        self.constant
    }

    pub fn random_tag(&self) -> Option<&str> {
        self.random_tag.as_deref()
    }

    pub fn const_value(&self) -> Option<&ConstValue> {
        self.const_val.as_ref()
    }

    pub fn mask_shares(&self) -> &MaskShares {
        &self.mask_shares
    }

    /// Direct assignment of fresh randomness. Warns when the cell already
    /// holds randomness under an equal tag: an anonymous tag can only be
    /// flagged as potential reuse, a named tag as definite reuse.
    pub fn set_random(&mut self, tag: Option<&str>) -> Vec<Leak> {
        let leaks = self
            .check_random_combination(true, tag)
            .into_iter()
            .collect();

        self.random = true;
        self.random_tag = tag.map(str::to_string);
        self.constant = false;
        self.const_val = None;
        self.mask_shares.clear();

        leaks
    }

    /// Direct assignment of a known public value. Never leaks.
    pub fn set_const(&mut self, val: Option<ConstValue>) {
        self.random = false;
        self.random_tag = None;
        self.constant = true;
        self.const_val = val;
        self.mask_shares.clear();
    }

    /// Direct assignment of a single `(mask, share)` pair, as used to
    /// model external I/O onto an already-populated cell. The incoming
    /// share is checked against the current contents before the overwrite.
    pub fn load_mask(&mut self, mask: &str, share: u32) -> Vec<Leak> {
        let mut incoming = MaskShares::new();
        incoming
            .entry(mask.to_string())
            .or_default()
            .insert(share);

        let leaks = self
            .check_mask_combination(&incoming)
            .into_iter()
            .map(Leak::Mask)
            .collect();

        self.random = false;
        self.random_tag = None;
        self.constant = false;
        self.const_val = None;
        self.mask_shares = incoming;

        leaks
    }

    /// In-place fold of `other` into `self`: the result is no longer a
    /// constant, randomness is OR-ed (own tag kept, otherwise adopted),
    /// and share sets are unioned per mask.
    pub fn combine_with(&mut self, other: &TrackedValue) -> Vec<Leak> {
        let leaks = self.check_combination(other);

        self.constant = false;
        self.const_val = None;

        if self.random_tag.is_none() {
            self.random_tag = other.random_tag.clone();
        }
        self.random |= other.random;

        for (mask, shares) in &other.mask_shares {
            self.mask_shares
                .entry(mask.clone())
                .or_default()
                .extend(shares.iter().copied());
        }

        leaks
    }

    /// Full overwrite by a deep copy of `other`, checked like a
    /// combination: the prior contents electrically meet the incoming
    /// value on the same wires.
    pub fn replace_by(&mut self, other: &TrackedValue) -> Vec<Leak> {
        let leaks = self.check_combination(other);
        *self = other.clone();
        leaks
    }

    /// Both leakage checks, run independently and additively.
    pub fn check_combination(&self, other: &TrackedValue) -> Vec<Leak> {
        let mut leaks = Vec::new();

        if let Some(leak) = self.check_random_combination(other.random, other.random_tag()) {
            leaks.push(leak);
        }

        leaks.extend(
            self.check_mask_combination(&other.mask_shares)
                .into_iter()
                .map(Leak::Mask),
        );

        leaks
    }

    /// Flags two random operands with equal tags. Tags that differ, or
    /// operands that are not both random, are fine.
    pub fn check_random_combination(
        &self,
        other_random: bool,
        other_tag: Option<&str>,
    ) -> Option<Leak> {
        if !(self.random && other_random) || self.random_tag.as_deref() != other_tag {
            return None;
        }

        match other_tag {
            None => Some(Leak::PotentialRandomReuse),
            Some(tag) => Some(Leak::RandomReuse {
                tag: tag.to_string(),
            }),
        }
    }

    /// For every mask id present on both sides, a non-empty combined share
    /// set is a collision: a non-empty intersection means an identical
    /// share is folded in twice, disjoint sets meeting means unmasking.
    pub fn check_mask_combination(&self, other: &MaskShares) -> Vec<MaskCollision> {
        let mut collisions = Vec::new();

        for (mask, incoming) in other {
            if let Some(present) = self.mask_shares.get(mask) {
                let intersection: ShareSet = present.intersection(incoming).copied().collect();
                let union: ShareSet = present.union(incoming).copied().collect();

                if union.is_empty() {
                    continue;
                }

                if intersection.is_empty() {
                    collisions.push(MaskCollision {
                        mask: mask.clone(),
                        shares: union,
                        kind: CollisionKind::DistinctShares,
                    });
                } else {
                    collisions.push(MaskCollision {
                        mask: mask.clone(),
                        shares: intersection,
                        kind: CollisionKind::SharedShare,
                    });
                }
            }
        }

        collisions
    }
}

impl fmt::Display for TrackedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut rendered = String::new();

        if self.constant {
            match &self.const_val {
                Some(val) => rendered.push_str(&format!("[const:{}]", val)),
                None => rendered.push_str("[const]"),
            }
        }
        if self.random {
            match &self.random_tag {
                Some(tag) => rendered.push_str(&format!("[rand:{}]", tag)),
                None => rendered.push_str("[rand]"),
            }
        }
        if !self.mask_shares.is_empty() {
            let masks = self
                .mask_shares
                .iter()
                .map(|(mask, shares)| format!("{}: {}", mask, fmt_shares(shares)))
                .collect::<Vec<_>>()
                .join(", ");
            rendered.push_str(&format!("({})", masks));
        }
        if rendered.is_empty() {
            rendered.push_str("[uninitialized]");
        }

        write!(f, "{}", rendered)
    }
}
