//! Reconciles a fresh clustering against the previous cluster id space.
//!
//! Raw clustering labels are arbitrary. Each raw group inherits the id of
//! the previous cluster it overlaps most, provided the overlap is a
//! majority of the smaller of the two sets. Everything else gets a fresh
//! id; previous clusters left without a match are retired.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Small, stable cluster identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ClusterId {
    type Err = std::num::ParseIntError;

    /// Accepts `"7"` or the document key form `"cluster_7"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("cluster_").unwrap_or(s);
        digits.parse().map(ClusterId)
    }
}

impl ClusterId {
    /// Key used in persisted name map documents.
    pub fn key(self) -> String {
        format!("cluster_{}", self.0)
    }
}

/// Returns the smallest id not present in `taken`.
pub fn smallest_unused<'a>(taken: impl IntoIterator<Item = &'a ClusterId>) -> ClusterId {
    let taken: BTreeSet<u32> = taken.into_iter().map(|c| c.0).collect();
    let mut candidate = 0u32;
    for id in taken {
        if id != candidate {
            break;
        }
        candidate += 1;
    }
    ClusterId(candidate)
}

/// Controls reconciliation strictness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizeConfig {
    /// Fraction of the smaller set that must overlap for a raw group to
    /// inherit a previous id. Default: 0.5 (strict majority).
    pub overlap_threshold: f64,
}

impl Default for StabilizeConfig {
    fn default() -> Self {
        Self {
            overlap_threshold: 0.5,
        }
    }
}

/// How an output cluster got its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Inherited from a previous cluster sharing `overlap` members.
    Kept { overlap: usize },
    /// No previous cluster matched.
    Created,
}

/// A reconciled cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment<T> {
    pub id: ClusterId,
    pub members: BTreeSet<T>,
    pub origin: Origin,
}

/// Output of [`stabilize`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stabilized<T> {
    /// Reconciled clusters, ordered by id.
    pub clusters: Vec<Assignment<T>>,

    /// Previous ids that no raw group inherited.
    pub retired: Vec<ClusterId>,
}

impl<T> Stabilized<T> {
    pub fn kept(&self) -> usize {
        self.clusters
            .iter()
            .filter(|a| matches!(a.origin, Origin::Kept { .. }))
            .count()
    }

    pub fn created(&self) -> usize {
        self.clusters.len() - self.kept()
    }
}

struct Candidate {
    raw: usize,
    prev: ClusterId,
    overlap: usize,
    prev_size: usize,
}

/// Maps `raw` groups onto the `previous` id space.
///
/// Ids in `reserved` are held by the caller and never handed out as new
/// ids. Deterministic for identical inputs. Never fails; in the worst case
/// it creates extra unnamed clusters.
pub fn stabilize<T: Ord + Clone>(
    previous: &BTreeMap<ClusterId, BTreeSet<T>>,
    raw: &[BTreeSet<T>],
    reserved: &BTreeSet<ClusterId>,
    cfg: &StabilizeConfig,
) -> Stabilized<T> {
    let mut candidates = Vec::new();
    for (r, group) in raw.iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        for (&prev, members) in previous {
            let overlap = group.intersection(members).count();
            if overlap == 0 {
                continue;
            }
            let smaller = group.len().min(members.len()) as f64;
            if (overlap as f64) > cfg.overlap_threshold * smaller {
                candidates.push(Candidate {
                    raw: r,
                    prev,
                    overlap,
                    prev_size: members.len(),
                });
            }
        }
    }

    // Largest overlap first; the more established identity wins ties.
    candidates.sort_by(|a, b| {
        b.overlap
            .cmp(&a.overlap)
            .then(b.prev_size.cmp(&a.prev_size))
            .then(a.prev.cmp(&b.prev))
            .then(a.raw.cmp(&b.raw))
    });

    let mut raw_ids: Vec<Option<(ClusterId, usize)>> = vec![None; raw.len()];
    let mut used: BTreeSet<ClusterId> = BTreeSet::new();
    for c in candidates {
        if raw_ids[c.raw].is_some() || used.contains(&c.prev) {
            continue;
        }
        raw_ids[c.raw] = Some((c.prev, c.overlap));
        used.insert(c.prev);
    }

    let retired: Vec<ClusterId> =
        previous.keys().filter(|id| !used.contains(id)).copied().collect();

    // Retired ids stay reserved for this run.
    let mut taken: BTreeSet<ClusterId> = previous.keys().chain(reserved.iter()).copied().collect();
    let mut clusters = Vec::with_capacity(raw.len());
    for (r, group) in raw.iter().enumerate() {
        if group.is_empty() {
            continue;
        }
        let (id, origin) = match raw_ids[r] {
            Some((id, overlap)) => (id, Origin::Kept { overlap }),
            None => {
                let id = smallest_unused(&taken);
                taken.insert(id);
                (id, Origin::Created)
            }
        };
        clusters.push(Assignment {
            id,
            members: group.clone(),
            origin,
        });
    }
    clusters.sort_by_key(|a| a.id);

    Stabilized { clusters, retired }
}
