//! Lazy, composable pipelines of substitution maps.
//!
//! A [`Lattice`] is an immutable ordered chain of operations. Iteration is
//! deterministic for a fixed pipeline: each operation transforms the
//! upstream stream in composition order, starting from a single empty map.
//! Errors (conflicting assignments, failed derivations) surface on the
//! consumer side as stream items.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::errors::{Error, Result};
use crate::fingerprint::{canonical_subs, variant_id};
use crate::placeholder::model::{ParamName, ValueLiteral};
use crate::SubstitutionMap;

/// How merges treat a parameter that is already bound upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Conflicting assignment is an error.
    #[default]
    Error,
    /// The earliest binding is preserved; in constrained search the
    /// conflicting branch is skipped.
    FirstWins,
    /// The latest binding overwrites; constrained search restores the
    /// previous value on backtrack.
    LastWins,
}

type DeriveFn = Arc<dyn Fn(&SubstitutionMap) -> Result<SubstitutionMap> + Send + Sync>;
type PredicateFn = Arc<dyn Fn(&SubstitutionMap) -> bool + Send + Sync>;

struct ConstrainedOp {
    space: Vec<(ParamName, Vec<ValueLiteral>)>,
    ok: PredicateFn,
    conflict: ConflictPolicy,
}

enum LatticeOp {
    Seed {
        defaults: SubstitutionMap,
        conflict: ConflictPolicy,
    },
    Const {
        consts: SubstitutionMap,
        conflict: ConflictPolicy,
    },
    Product {
        name: ParamName,
        values: Vec<ValueLiteral>,
    },
    Zip {
        columns: Vec<(ParamName, Vec<ValueLiteral>)>,
    },
    Derive {
        f: DeriveFn,
        conflict: ConflictPolicy,
    },
    Filter {
        pred: PredicateFn,
    },
    Dedup,
    Concat {
        other: Lattice,
    },
    Constrained(Arc<ConstrainedOp>),
}

impl LatticeOp {
    fn kind(&self) -> &'static str {
        match self {
            LatticeOp::Seed { .. } => "seed",
            LatticeOp::Const { .. } => "const",
            LatticeOp::Product { .. } => "product",
            LatticeOp::Zip { .. } => "zip",
            LatticeOp::Derive { .. } => "derive",
            LatticeOp::Filter { .. } => "filter",
            LatticeOp::Dedup => "dedup",
            LatticeOp::Concat { .. } => "concat",
            LatticeOp::Constrained(_) => "constrained_product",
        }
    }
}

/// Immutable chain of lattice operations. Builder methods consume `self`
/// and return the extended chain; clones share the op list.
#[derive(Clone, Default)]
pub struct Lattice {
    ops: Vec<Arc<LatticeOp>>,
}

impl fmt::Debug for Lattice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kinds: Vec<&str> = self.ops.iter().map(|op| op.kind()).collect();
        f.debug_struct("Lattice").field("ops", &kinds).finish()
    }
}

type BoxIter = Box<dyn Iterator<Item = Result<SubstitutionMap>>>;

impl Lattice {
    pub fn new() -> Self {
        Lattice::default()
    }

    fn push(mut self, op: LatticeOp) -> Self {
        self.ops.push(Arc::new(op));
        self
    }

    /// Emit one map with the given defaults (merged into the initial empty
    /// map under `conflict`).
    pub fn seed(self, defaults: SubstitutionMap, conflict: ConflictPolicy) -> Self {
        self.push(LatticeOp::Seed { defaults, conflict })
    }

    /// Merge constants into every upstream map.
    pub fn set_constants(self, consts: SubstitutionMap, conflict: ConflictPolicy) -> Self {
        self.push(LatticeOp::Const { consts, conflict })
    }

    /// Cartesian-expand one parameter over a finite ordered tuple.
    pub fn add_product(self, name: ParamName, values: Vec<ValueLiteral>) -> Self {
        self.push(LatticeOp::Product { name, values })
    }

    /// Assign aligned columns per row. All columns must share a row count.
    pub fn add_zip(self, columns: Vec<(ParamName, Vec<ValueLiteral>)>) -> Result<Self> {
        let Some((_, first)) = columns.first() else {
            return Err(Error::invalid_input("zip requires at least one column"));
        };
        let rows = first.len();
        for (name, col) in &columns {
            if col.len() != rows {
                return Err(Error::invalid_input(format!(
                    "zip column '{name}' has {} rows, expected {rows}",
                    col.len()
                )));
            }
        }
        Ok(self.push(LatticeOp::Zip { columns }))
    }

    /// Apply a pure function producing additional bindings, merged under
    /// `conflict`.
    pub fn derive(
        self,
        f: impl Fn(&SubstitutionMap) -> Result<SubstitutionMap> + Send + Sync + 'static,
        conflict: ConflictPolicy,
    ) -> Self {
        self.push(LatticeOp::Derive {
            f: Arc::new(f),
            conflict,
        })
    }

    /// Retain maps for which the predicate holds.
    pub fn filter(self, pred: impl Fn(&SubstitutionMap) -> bool + Send + Sync + 'static) -> Self {
        self.push(LatticeOp::Filter {
            pred: Arc::new(pred),
        })
    }

    /// Remove equal maps (structural equality over sorted `(key, value)`
    /// pairs).
    pub fn dedup(self) -> Self {
        self.push(LatticeOp::Dedup)
    }

    /// Append another lattice's stream after this one.
    pub fn concat(self, other: Lattice) -> Self {
        self.push(LatticeOp::Concat { other })
    }

    /// Depth-first cartesian search over `space` with `ok(partial)` pruning
    /// on each extension.
    pub fn constrained_product(
        self,
        space: Vec<(ParamName, Vec<ValueLiteral>)>,
        ok: impl Fn(&SubstitutionMap) -> bool + Send + Sync + 'static,
        conflict: ConflictPolicy,
    ) -> Self {
        self.push(LatticeOp::Constrained(Arc::new(ConstrainedOp {
            space,
            ok: Arc::new(ok),
            conflict,
        })))
    }

    /// Lazy stream of substitution maps in deterministic order.
    pub fn iter(&self) -> impl Iterator<Item = Result<SubstitutionMap>> {
        stream(&self.ops)
    }

    /// Like [`Lattice::iter`], pairing each map with its 128-bit variant
    /// identifier (canonical map encoding mixed with `salt`).
    pub fn iter_with_ids(
        &self,
        salt: &str,
    ) -> impl Iterator<Item = Result<(String, SubstitutionMap)>> {
        let salt = salt.to_string();
        self.iter()
            .map(move |res| res.map(|m| (variant_id(&salt, &m), m)))
    }

    /// Multiply the known per-op factors; `None` when any op's contribution
    /// is unknown (filter, dedup, constrained search).
    pub fn estimated_cardinality(&self) -> Option<u128> {
        let mut total: u128 = 1;
        for op in &self.ops {
            match &**op {
                LatticeOp::Seed { .. } | LatticeOp::Const { .. } | LatticeOp::Derive { .. } => {}
                LatticeOp::Product { values, .. } => {
                    total = total.checked_mul(values.len() as u128)?;
                }
                LatticeOp::Zip { columns } => {
                    let rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
                    total = total.checked_mul(rows as u128)?;
                }
                LatticeOp::Concat { other } => {
                    total = total.checked_add(other.estimated_cardinality()?)?;
                }
                LatticeOp::Filter { .. } | LatticeOp::Dedup | LatticeOp::Constrained(_) => {
                    return None;
                }
            }
        }
        Some(total)
    }

    /// Count by iteration, stopping early at `limit` when given.
    pub fn exact_cardinality(&self, limit: Option<usize>) -> Result<usize> {
        let mut count = 0usize;
        for item in self.iter() {
            item?;
            count += 1;
            if let Some(cap) = limit {
                if count >= cap {
                    break;
                }
            }
        }
        Ok(count)
    }
}

fn merge_into(
    map: &mut SubstitutionMap,
    additions: &SubstitutionMap,
    conflict: ConflictPolicy,
) -> Result<()> {
    for (name, value) in additions {
        if map.contains_key(name) {
            match conflict {
                ConflictPolicy::Error => return Err(Error::Conflict(name.to_string())),
                ConflictPolicy::FirstWins => continue,
                ConflictPolicy::LastWins => {
                    map.insert(name.clone(), value.clone());
                }
            }
        } else {
            map.insert(name.clone(), value.clone());
        }
    }
    Ok(())
}

fn stream(ops: &[Arc<LatticeOp>]) -> BoxIter {
    let mut out: BoxIter = Box::new(std::iter::once(Ok(SubstitutionMap::new())));
    for op in ops {
        out = apply(op, out);
    }
    out
}

fn apply(op: &Arc<LatticeOp>, upstream: BoxIter) -> BoxIter {
    match &**op {
        LatticeOp::Seed { defaults, conflict } | LatticeOp::Const { consts: defaults, conflict } => {
            let additions = defaults.clone();
            let conflict = *conflict;
            Box::new(upstream.map(move |res| {
                res.and_then(|mut map| {
                    merge_into(&mut map, &additions, conflict)?;
                    Ok(map)
                })
            }))
        }
        LatticeOp::Product { name, values } => {
            let name = name.clone();
            let values = values.clone();
            Box::new(upstream.flat_map(move |res| match res {
                Err(e) => vec![Err(e)].into_iter(),
                Ok(map) => values
                    .iter()
                    .map(|v| {
                        if map.contains_key(&name) {
                            return Err(Error::Conflict(name.to_string()));
                        }
                        let mut m = map.clone();
                        m.insert(name.clone(), v.clone());
                        Ok(m)
                    })
                    .collect::<Vec<_>>()
                    .into_iter(),
            }))
        }
        LatticeOp::Zip { columns } => {
            let columns = columns.clone();
            let rows = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
            Box::new(upstream.flat_map(move |res| match res {
                Err(e) => vec![Err(e)].into_iter(),
                Ok(map) => (0..rows)
                    .map(|row| {
                        let mut m = map.clone();
                        for (name, col) in &columns {
                            if m.contains_key(name) {
                                return Err(Error::Conflict(name.to_string()));
                            }
                            m.insert(name.clone(), col[row].clone());
                        }
                        Ok(m)
                    })
                    .collect::<Vec<_>>()
                    .into_iter(),
            }))
        }
        LatticeOp::Derive { f, conflict } => {
            let f = Arc::clone(f);
            let conflict = *conflict;
            Box::new(upstream.map(move |res| {
                res.and_then(|mut map| {
                    let additions = f(&map)?;
                    merge_into(&mut map, &additions, conflict)?;
                    Ok(map)
                })
            }))
        }
        LatticeOp::Filter { pred } => {
            let pred = Arc::clone(pred);
            Box::new(upstream.filter(move |res| match res {
                Ok(map) => pred(map),
                Err(_) => true,
            }))
        }
        LatticeOp::Dedup => {
            let mut seen: HashSet<String> = HashSet::new();
            Box::new(upstream.filter(move |res| match res {
                Ok(map) => {
                    let key = serde_json::to_string(&canonical_subs(map))
                        .unwrap_or_else(|_| format!("{map:?}"));
                    seen.insert(key)
                }
                Err(_) => true,
            }))
        }
        LatticeOp::Concat { other } => {
            let tail = stream(&other.ops);
            Box::new(upstream.chain(tail))
        }
        LatticeOp::Constrained(cop) => {
            let cop = Arc::clone(cop);
            Box::new(upstream.flat_map(move |res| -> BoxIter {
                match res {
                    Err(e) => Box::new(std::iter::once(Err(e))),
                    Ok(map) => Box::new(ConstrainedIter::new(Arc::clone(&cop), map)),
                }
            }))
        }
    }
}

/// Depth-first search over one upstream map. `stack[d]` is the index of the
/// next value to try at depth `d`; `maps[d]` is the partial map before depth
/// `d` is assigned, so backtracking restores state by popping.
struct ConstrainedIter {
    op: Arc<ConstrainedOp>,
    stack: Vec<usize>,
    maps: Vec<SubstitutionMap>,
    done: bool,
}

impl ConstrainedIter {
    fn new(op: Arc<ConstrainedOp>, base: SubstitutionMap) -> Self {
        ConstrainedIter {
            op,
            stack: vec![0],
            maps: vec![base],
            done: false,
        }
    }
}

impl Iterator for ConstrainedIter {
    type Item = Result<SubstitutionMap>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        let space = &self.op.space;
        if space.is_empty() {
            self.done = true;
            let base = &self.maps[0];
            if (self.op.ok)(base) {
                return Some(Ok(base.clone()));
            }
            return None;
        }

        loop {
            let Some(&idx) = self.stack.last() else {
                self.done = true;
                return None;
            };
            let depth = self.stack.len() - 1;
            let (name, values) = &space[depth];

            if idx >= values.len() {
                self.stack.pop();
                self.maps.pop();
                continue;
            }
            *self.stack.last_mut().expect("stack non-empty") = idx + 1;

            let mut candidate = self.maps[depth].clone();
            if candidate.contains_key(name) {
                match self.op.conflict {
                    ConflictPolicy::Error => return Some(Err(Error::Conflict(name.to_string()))),
                    ConflictPolicy::FirstWins => continue,
                    ConflictPolicy::LastWins => {
                        candidate.insert(name.clone(), values[idx].clone());
                    }
                }
            } else {
                candidate.insert(name.clone(), values[idx].clone());
            }

            if !(self.op.ok)(&candidate) {
                continue;
            }

            if depth + 1 == space.len() {
                return Some(Ok(candidate));
            }
            self.maps.push(candidate);
            self.stack.push(0);
        }
    }
}
