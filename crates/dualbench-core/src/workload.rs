//! Workload generation.
//!
//! Plans are derived from a seeded generator only, so the same
//! (kind, count, seed, client) always yields the same operation sequence.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::catalog::{keys, AggregateShape, OperationKind, OperationSpec, Table};
use crate::error::ParseError;
use crate::store::FixtureSpec;

/// Rows returned by each generated scan.
pub const SCAN_LIMIT: i64 = 20;

/// First id used for rows inserted by a plan, clear of any fixture id.
pub const INSERT_ID_BASE: i64 = 1_000_000_000;

/// Id range reserved per logical client for inserted rows.
pub const CLIENT_ID_STRIDE: i64 = 100_000_000;

/// Largest accepted sum of mix ratio weights.
pub const MAX_MIX_CYCLE: u64 = 10_000;

/// Named operation-mix pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkloadKind {
    /// Point reads with uniform key selection.
    Standard,
    /// Insert, update, delete and read in a fixed ratio.
    Mixed,
    /// Join, group-by and window aggregates.
    Complex,
    /// Interleaved point reads and scans, meant for concurrent clients.
    Parallel,
}

impl WorkloadKind {
    pub const ALL: [WorkloadKind; 4] = [
        WorkloadKind::Standard,
        WorkloadKind::Mixed,
        WorkloadKind::Complex,
        WorkloadKind::Parallel,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            WorkloadKind::Standard => "standard",
            WorkloadKind::Mixed => "mixed",
            WorkloadKind::Complex => "complex",
            WorkloadKind::Parallel => "parallel",
        }
    }
}

impl fmt::Display for WorkloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkloadKind {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" => Ok(WorkloadKind::Standard),
            "mixed" => Ok(WorkloadKind::Mixed),
            "complex" => Ok(WorkloadKind::Complex),
            "parallel" => Ok(WorkloadKind::Parallel),
            other => Err(ParseError::Unknown {
                what: "workload kind",
                value: other.to_string(),
            }),
        }
    }
}

/// How the operation count is distributed over logical clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanPolicy {
    /// Every client replays a full plan of `operation_count` operations.
    #[default]
    Replicate,
    /// The operation count is split across clients.
    Divide,
}

impl PlanPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            PlanPolicy::Replicate => "replicate",
            PlanPolicy::Divide => "divide",
        }
    }

    /// Total operations planned for a run.
    pub fn planned_operations(self, operation_count: usize, concurrency: usize) -> usize {
        match self {
            PlanPolicy::Replicate => operation_count * concurrency,
            PlanPolicy::Divide => operation_count,
        }
    }
}

impl FromStr for PlanPolicy {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "replicate" => Ok(PlanPolicy::Replicate),
            "divide" => Ok(PlanPolicy::Divide),
            other => Err(ParseError::Unknown {
                what: "plan policy",
                value: other.to_string(),
            }),
        }
    }
}

/// Operation-type ratio of the mixed workload, applied as one repeating
/// cycle: inserts, then updates, then deletes, then reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MixRatio {
    pub insert: u32,
    pub update: u32,
    pub delete: u32,
    pub read: u32,
}

impl MixRatio {
    pub fn new(insert: u32, update: u32, delete: u32, read: u32) -> Self {
        Self {
            insert,
            update,
            delete,
            read,
        }
    }

    /// Operations in one cycle.
    pub fn cycle_len(&self) -> u64 {
        [self.insert, self.update, self.delete, self.read]
            .iter()
            .map(|&w| u64::from(w))
            .sum()
    }

    pub fn validate(&self) -> Result<(), ParseError> {
        let invalid = |reason: String| ParseError::Invalid {
            what: "mix ratio",
            reason,
        };
        match self.cycle_len() {
            0 => Err(invalid(
                "at least one operation type must have a positive weight".to_string(),
            )),
            len if len > MAX_MIX_CYCLE => Err(invalid(format!(
                "weights sum to {}, at most {} allowed",
                len, MAX_MIX_CYCLE
            ))),
            _ => Ok(()),
        }
    }

    /// One cycle of operation kinds. Only meaningful for a ratio that
    /// passes [`MixRatio::validate`].
    pub fn pattern(&self) -> Vec<OperationKind> {
        let mut pattern = Vec::with_capacity(self.cycle_len().min(MAX_MIX_CYCLE) as usize);
        for (kind, weight) in [
            (OperationKind::Insert, self.insert),
            (OperationKind::Update, self.update),
            (OperationKind::Delete, self.delete),
            (OperationKind::Read, self.read),
        ] {
            pattern.extend(std::iter::repeat(kind).take(weight as usize));
        }
        pattern
    }
}

impl Default for MixRatio {
    fn default() -> Self {
        Self::new(1, 1, 1, 1)
    }
}

impl fmt::Display for MixRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}:{}", self.insert, self.update, self.delete, self.read)
    }
}

impl FromStr for MixRatio {
    type Err = ParseError;

    /// Parse `insert:update:delete:read`, e.g. `1:1:1:1`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: String| ParseError::Invalid {
            what: "mix ratio",
            reason,
        };
        let parts = s
            .split(':')
            .map(|p| p.trim().parse::<u32>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| invalid(format!("{}: {}", s, e)))?;
        let [insert, update, delete, read] = parts[..] else {
            return Err(invalid(format!(
                "expected insert:update:delete:read, got {}",
                s
            )));
        };
        let ratio = Self::new(insert, update, delete, read);
        ratio.validate()?;
        Ok(ratio)
    }
}

/// Ordered operations replayed by one logical client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkloadPlan {
    kind: WorkloadKind,
    seed: u64,
    client: usize,
    operations: Vec<OperationSpec>,
}

impl WorkloadPlan {
    pub fn kind(&self) -> WorkloadKind {
        self.kind
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Logical client this plan was generated for.
    pub fn client(&self) -> usize {
        self.client
    }

    pub fn operations(&self) -> &[OperationSpec] {
        &self.operations
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Deterministic plan generator.
#[derive(Debug, Clone)]
pub struct WorkloadGenerator {
    fixture: FixtureSpec,
    mix: MixRatio,
}

impl WorkloadGenerator {
    /// Create a generator drawing keys from `fixture`. An empty or oversized
    /// mix ratio falls back to the default.
    pub fn new(fixture: FixtureSpec, mix: MixRatio) -> Self {
        let mix = if mix.validate().is_ok() {
            mix
        } else {
            MixRatio::default()
        };
        Self { fixture, mix }
    }

    pub fn mix(&self) -> MixRatio {
        self.mix
    }

    /// Generate the plan for logical client 0.
    pub fn generate(&self, kind: WorkloadKind, operation_count: usize, seed: u64) -> WorkloadPlan {
        self.generate_for_client(kind, operation_count, seed, 0)
    }

    /// Generate one client's plan. The client index only namespaces the ids
    /// of inserted rows; the operation sequence depends on `seed` alone.
    pub fn generate_for_client(
        &self,
        kind: WorkloadKind,
        operation_count: usize,
        seed: u64,
        client: usize,
    ) -> WorkloadPlan {
        let mut rng = StdRng::seed_from_u64(seed);
        let operations = match kind {
            WorkloadKind::Standard => (0..operation_count)
                .map(|i| {
                    let table = if i % 2 == 0 { Table::Users } else { Table::Products };
                    OperationSpec::read(table, self.pick(&mut rng, table))
                })
                .collect(),
            WorkloadKind::Parallel => (0..operation_count)
                .map(|i| match i % 4 {
                    0 => OperationSpec::read(Table::Users, self.pick(&mut rng, Table::Users)),
                    1 => {
                        OperationSpec::read(Table::Products, self.pick(&mut rng, Table::Products))
                    }
                    2 => OperationSpec::scan(
                        Table::Users,
                        self.pick(&mut rng, Table::Users),
                        SCAN_LIMIT,
                    ),
                    _ => OperationSpec::scan(
                        Table::Products,
                        self.pick(&mut rng, Table::Products),
                        SCAN_LIMIT,
                    ),
                })
                .collect(),
            WorkloadKind::Complex => (0..operation_count)
                .map(|i| {
                    let shape = AggregateShape::ALL[i % AggregateShape::ALL.len()];
                    let op = OperationSpec::aggregate(shape);
                    match shape {
                        AggregateShape::Join => op
                            .with_param(keys::MIN_PRICE, rng.gen_range(10..500) as f64),
                        AggregateShape::GroupBy => {
                            let widths = [50.0, 100.0, 250.0];
                            op.with_param(keys::BAND_WIDTH, widths[rng.gen_range(0..widths.len())])
                        }
                        AggregateShape::Window => {
                            op.with_param(keys::LIMIT, rng.gen_range(10..=50i64))
                        }
                    }
                })
                .collect(),
            WorkloadKind::Mixed => self.mixed(operation_count, &mut rng, client),
        };

        WorkloadPlan {
            kind,
            seed,
            client,
            operations,
        }
    }

    /// Generate one plan per logical client under `policy`.
    ///
    /// `Replicate` gives every client a full plan from the same seed.
    /// `Divide` splits `operation_count`, handing the remainder to the
    /// lowest-indexed clients, and seeds each slice with `seed + client`.
    pub fn plans_for_clients(
        &self,
        kind: WorkloadKind,
        operation_count: usize,
        concurrency: usize,
        seed: u64,
        policy: PlanPolicy,
    ) -> Vec<WorkloadPlan> {
        match policy {
            PlanPolicy::Replicate => (0..concurrency)
                .map(|client| self.generate_for_client(kind, operation_count, seed, client))
                .collect(),
            PlanPolicy::Divide => {
                let base = operation_count / concurrency.max(1);
                let remainder = operation_count % concurrency.max(1);
                (0..concurrency)
                    .map(|client| {
                        let count = base + usize::from(client < remainder);
                        self.generate_for_client(
                            kind,
                            count,
                            seed.wrapping_add(client as u64),
                            client,
                        )
                    })
                    .collect()
            }
        }
    }

    fn mixed(&self, operation_count: usize, rng: &mut StdRng, client: usize) -> Vec<OperationSpec> {
        let pattern = self.mix.pattern();
        let mut live: VecDeque<i64> = VecDeque::new();
        let mut inserted = 0i64;
        let mut operations = Vec::with_capacity(operation_count);

        for i in 0..operation_count {
            let op = match pattern[i % pattern.len()] {
                OperationKind::Insert => {
                    let id = INSERT_ID_BASE + client as i64 * CLIENT_ID_STRIDE + inserted;
                    let username = format!("bench_{}_{}", client, inserted);
                    inserted += 1;
                    live.push_back(id);
                    OperationSpec::insert_user(id, username.clone(), format!("{}@example.com", username))
                        .with_param(keys::FULL_NAME, format!("Bench User {}", id))
                }
                OperationKind::Update => {
                    let id = self.pick_live(rng, &live);
                    OperationSpec::update_user(id, format!("Updated {}", i))
                }
                OperationKind::Delete => {
                    let id = match live.pop_front() {
                        Some(id) => id,
                        None => self.pick(rng, Table::Users),
                    };
                    OperationSpec::delete(Table::Users, id)
                }
                _ => OperationSpec::read(Table::Users, self.pick_live(rng, &live)),
            };
            operations.push(op);
        }
        operations
    }

    fn pick(&self, rng: &mut StdRng, table: Table) -> i64 {
        let rows = match table {
            Table::Users => self.fixture.users,
            Table::Products => self.fixture.products,
        };
        rng.gen_range(1..=rows.max(1) as i64)
    }

    fn pick_live(&self, rng: &mut StdRng, live: &VecDeque<i64>) -> i64 {
        if live.is_empty() {
            self.pick(rng, Table::Users)
        } else {
            live[rng.gen_range(0..live.len())]
        }
    }
}
