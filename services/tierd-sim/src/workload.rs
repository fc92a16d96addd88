//! Synthetic access workload.
//!
//! Every tenant gets a fixed layout of base and large units. A configurable
//! fraction of the units forms the hot set and draws most of the samples;
//! the remainder is touched uniformly. Accesses to large units concentrate
//! on a few sub-units so the split advisor has skew to work with.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tierd_core::{TenantId, UnitAddress, SUBUNITS_PER_LARGE};
use tierd_engine::{AccessEvent, AccessKind, Backing, UnitSize};

/// Base units start above the first large-unit boundary so the two ranges
/// never overlap.
const BASE_REGION: u64 = 1 << 30;
const LARGE_REGION: u64 = 1 << 40;

/// Sub-units of a large unit that receive the concentrated accesses.
const SKEWED_SUBUNITS: usize = 8;

/// Shape of the synthetic workload.
#[derive(Debug, Clone, Copy)]
pub struct WorkloadShape {
    pub base_units: u64,
    pub large_units: u64,
    /// Fraction of units in the hot set
    pub hot_fraction: f64,
    /// Fraction of samples that hit the hot set
    pub hot_share: f64,
    /// Fraction of base units backed by files
    pub file_fraction: f64,
}

/// One unit of the layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnitSpec {
    pub address: UnitAddress,
    pub size: UnitSize,
    pub backing: Backing,
}

impl UnitSpec {
    pub fn pages(&self) -> u64 {
        match self.size {
            UnitSize::Base => 1,
            UnitSize::Large => SUBUNITS_PER_LARGE as u64,
        }
    }
}

/// Sample generator for one tenant.
pub struct Workload {
    tenant: TenantId,
    units: Vec<UnitSpec>,
    hot_units: usize,
    hot_share: f64,
    rng: StdRng,
}

impl Workload {
    pub fn new(tenant: TenantId, shape: WorkloadShape, seed: u64) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut units = Vec::with_capacity((shape.base_units + shape.large_units) as usize);

        for i in 0..shape.large_units {
            units.push(UnitSpec {
                address: UnitAddress(LARGE_REGION + (i << 21)),
                size: UnitSize::Large,
                backing: Backing::Anon,
            });
        }
        for i in 0..shape.base_units {
            let backing = if rng.gen_bool(shape.file_fraction.clamp(0.0, 1.0)) {
                Backing::File
            } else {
                Backing::Anon
            };
            units.push(UnitSpec {
                address: UnitAddress(BASE_REGION + (i << 12)),
                size: UnitSize::Base,
                backing,
            });
        }

        // Interleave large and base units in the hot set
        let len = units.len();
        for i in (1..len).rev() {
            let j = rng.gen_range(0..=i);
            units.swap(i, j);
        }

        let hot_units = ((len as f64) * shape.hot_fraction.clamp(0.0, 1.0)).ceil() as usize;
        Self {
            tenant,
            units,
            hot_units: hot_units.min(len),
            hot_share: shape.hot_share.clamp(0.0, 1.0),
            rng,
        }
    }

    pub fn units(&self) -> &[UnitSpec] {
        &self.units
    }

    pub fn hot_units(&self) -> &[UnitSpec] {
        &self.units[..self.hot_units]
    }

    /// Draws the next access sample, or `None` for an empty layout.
    pub fn next_event(&mut self) -> Option<AccessEvent> {
        if self.units.is_empty() {
            return None;
        }

        let pick_hot = self.hot_units > 0 && self.rng.gen_bool(self.hot_share);
        let index = if pick_hot {
            self.rng.gen_range(0..self.hot_units)
        } else {
            self.rng.gen_range(0..self.units.len())
        };
        let unit = self.units[index];

        let address = match unit.size {
            UnitSize::Base => unit.address,
            UnitSize::Large => {
                let subunit = if pick_hot {
                    self.rng.gen_range(0..SKEWED_SUBUNITS)
                } else {
                    self.rng.gen_range(0..SUBUNITS_PER_LARGE)
                };
                unit.address.subunit(subunit)
            }
        };
        let kind = if self.rng.gen_bool(0.2) {
            AccessKind::Store
        } else {
            AccessKind::LlcMiss
        };

        Some(AccessEvent {
            tenant: self.tenant,
            address,
            kind,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shape() -> WorkloadShape {
        WorkloadShape {
            base_units: 1000,
            large_units: 4,
            hot_fraction: 0.1,
            hot_share: 0.9,
            file_fraction: 0.25,
        }
    }

    #[test]
    fn test_layout_is_aligned_and_disjoint() {
        let workload = Workload::new(TenantId::new(), shape(), 7);
        assert_eq!(workload.units().len(), 1004);

        let mut addresses: Vec<_> = workload.units().iter().map(|u| u.address).collect();
        addresses.sort();
        addresses.dedup();
        assert_eq!(addresses.len(), 1004);

        for unit in workload.units() {
            match unit.size {
                UnitSize::Large => assert_eq!(unit.address.large_aligned(), unit.address),
                UnitSize::Base => assert!(unit.address.0 >= BASE_REGION && unit.address.0 < LARGE_REGION),
            }
        }
    }

    #[test]
    fn test_hot_set_receives_most_samples() {
        let mut workload = Workload::new(TenantId::new(), shape(), 11);
        let hot: Vec<_> = workload.hot_units().to_vec();
        assert_eq!(hot.len(), 101);

        let mut hits = 0;
        for _ in 0..10_000 {
            let event = workload.next_event().unwrap();
            let in_hot = hot.iter().any(|unit| {
                event.address.0 >= unit.address.0 && event.address.0 < unit.address.0 + (unit.pages() << 12)
            });
            if in_hot {
                hits += 1;
            }
        }
        assert!(hits > 8_500, "hot set got {hits} of 10000 samples");
    }

    #[test]
    fn test_same_seed_same_samples() {
        let id = TenantId::new();
        let mut a = Workload::new(id, shape(), 3);
        let mut b = Workload::new(id, shape(), 3);
        for _ in 0..100 {
            assert_eq!(a.next_event().map(|e| e.address), b.next_event().map(|e| e.address));
        }
    }

    #[test]
    fn test_empty_layout_yields_nothing() {
        let empty = WorkloadShape {
            base_units: 0,
            large_units: 0,
            ..shape()
        };
        let mut workload = Workload::new(TenantId::new(), empty, 1);
        assert!(workload.next_event().is_none());
    }
}
