use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Size of a base unit (one page) in bytes, as a shift.
pub const BASE_UNIT_SHIFT: u32 = 12;
/// Size of a large unit in bytes, as a shift.
pub const LARGE_UNIT_SHIFT: u32 = 21;
/// Number of base-sized sub-units inside one large unit.
pub const SUBUNITS_PER_LARGE: usize = 1 << (LARGE_UNIT_SHIFT - BASE_UNIT_SHIFT);

macro_rules! define_id {
    ($name:ident, $doc:literal) => {
        #[doc = $doc]
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generates a new random identifier.
            #[must_use]
            #[allow(clippy::new_without_default)]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            /// Creates an identifier from an existing UUID.
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Returns the inner UUID value.
            #[must_use]
            pub const fn as_uuid(&self) -> Uuid {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Ok(Self(Uuid::parse_str(s)?))
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }
    };
}

define_id!(
    TenantId,
    "Unique identifier for a tenant (an accounting domain grouping workload memory)."
);

/// Memory tier index. Tier 0 is the fastest; higher indices are slower.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TierId(pub u8);

impl TierId {
    /// The fast tier.
    pub const FAST: TierId = TierId(0);

    /// Returns the tier index as `usize` for slice indexing.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns `true` for the fastest tier.
    #[must_use]
    pub const fn is_fast(self) -> bool {
        self.0 == 0
    }

    /// Next faster tier, if any.
    #[must_use]
    pub fn faster(self) -> Option<TierId> {
        self.0.checked_sub(1).map(TierId)
    }

    /// Next slower tier, if `tier_count` allows one.
    #[must_use]
    pub fn slower(self, tier_count: usize) -> Option<TierId> {
        let next = self.0 as usize + 1;
        (next < tier_count).then(|| TierId(next as u8))
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tier{}", self.0)
    }
}

/// Virtual address of a tracked unit (base-page aligned for base units,
/// large-unit aligned for large units).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitAddress(pub u64);

impl UnitAddress {
    /// Aligns down to the containing base unit.
    #[must_use]
    pub const fn base_aligned(self) -> UnitAddress {
        UnitAddress(self.0 & !((1u64 << BASE_UNIT_SHIFT) - 1))
    }

    /// Aligns down to the containing large unit.
    #[must_use]
    pub const fn large_aligned(self) -> UnitAddress {
        UnitAddress(self.0 & !((1u64 << LARGE_UNIT_SHIFT) - 1))
    }

    /// Index of the base sub-unit inside the containing large unit.
    #[must_use]
    pub const fn subunit_index(self) -> usize {
        ((self.0 & ((1u64 << LARGE_UNIT_SHIFT) - 1)) >> BASE_UNIT_SHIFT) as usize
    }

    /// Address of sub-unit `index` of the large unit starting at `self`.
    #[must_use]
    pub const fn subunit(self, index: usize) -> UnitAddress {
        UnitAddress(self.0 + ((index as u64) << BASE_UNIT_SHIFT))
    }
}

impl fmt::Display for UnitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
