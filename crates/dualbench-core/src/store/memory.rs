//! In-process fixture store.
//!
//! Holds the `users` and `products` tables behind a lock and charges a fixed
//! simulated round trip per call: async connections suspend on a tokio timer,
//! blocking connections sleep their thread. Faults can be injected by global
//! call number to exercise retry and failure accounting deterministically.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::catalog::{keys, AggregateShape, OperationKind, OperationSpec, Table};
use crate::error::StoreError;

use super::fixture::{generate_products, generate_users, FixtureSpec, ProductRow, UserRow};
use super::{AsyncConnection, BlockingConnection, Connector};

/// Default simulated round trip per call.
pub const DEFAULT_IO_LATENCY: Duration = Duration::from_micros(200);

/// Memory store configuration.
#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub fixture: FixtureSpec,
    /// Simulated network round trip charged to every call.
    pub io_latency: Duration,
}

impl MemoryConfig {
    pub fn new(fixture: FixtureSpec) -> Self {
        Self {
            fixture,
            io_latency: DEFAULT_IO_LATENCY,
        }
    }

    /// Set the simulated round trip.
    pub fn with_io_latency(mut self, latency: Duration) -> Self {
        self.io_latency = latency;
        self
    }
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self::new(FixtureSpec::default())
    }
}

#[derive(Debug, Default)]
struct Tables {
    users: BTreeMap<i64, UserRow>,
    usernames: HashMap<String, i64>,
    emails: HashMap<String, i64>,
    products: BTreeMap<i64, ProductRow>,
    skus: HashMap<String, i64>,
}

impl Tables {
    fn seeded(spec: FixtureSpec) -> Self {
        let mut tables = Tables::default();
        for user in generate_users(spec.users) {
            tables.usernames.insert(user.username.clone(), user.id);
            tables.emails.insert(user.email.clone(), user.id);
            tables.users.insert(user.id, user);
        }
        for product in generate_products(spec.products) {
            tables.skus.insert(product.sku.clone(), product.id);
            tables.products.insert(product.id, product);
        }
        tables
    }

    fn query(&self, op: &OperationSpec) -> Result<u64, StoreError> {
        match op.kind {
            OperationKind::Read => {
                let id = op.param_int(keys::ID)?;
                let found = match op.table()? {
                    Table::Users => self.users.contains_key(&id),
                    Table::Products => self.products.contains_key(&id),
                };
                Ok(found as u64)
            }
            OperationKind::Scan => {
                let start = op.param_int(keys::START)?;
                let limit = non_negative(op, keys::LIMIT)?;
                let rows = match op.table()? {
                    Table::Users => self.users.range(start..).take(limit).count(),
                    Table::Products => self.products.range(start..).take(limit).count(),
                };
                Ok(rows as u64)
            }
            OperationKind::Aggregate => self.aggregate(op),
            other => Err(StoreError::MalformedOperation(format!(
                "{} is not a read operation",
                other
            ))),
        }
    }

    fn aggregate(&self, op: &OperationSpec) -> Result<u64, StoreError> {
        match op.shape()? {
            AggregateShape::Join => {
                let min_price = op.param_float(keys::MIN_PRICE)?;
                let rows = self
                    .products
                    .values()
                    .filter(|p| p.price >= min_price && self.users.contains_key(&p.id))
                    .count();
                Ok(rows as u64)
            }
            AggregateShape::GroupBy => {
                let width = op.param_float(keys::BAND_WIDTH)?;
                if width <= 0.0 {
                    return Err(StoreError::MalformedOperation(
                        "band_width must be positive".to_string(),
                    ));
                }
                let mut bands: BTreeMap<i64, (u64, f64)> = BTreeMap::new();
                for product in self.products.values() {
                    let band = bands
                        .entry((product.price / width).floor() as i64)
                        .or_default();
                    band.0 += 1;
                    band.1 += product.price;
                }
                Ok(bands.len() as u64)
            }
            AggregateShape::Window => {
                let limit = non_negative(op, keys::LIMIT)?;
                let mut prices: Vec<(f64, i64)> =
                    self.products.values().map(|p| (p.price, p.id)).collect();
                prices.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

                let mut ranked = Vec::with_capacity(limit.min(prices.len()));
                let mut rank = 0usize;
                let mut previous = None;
                for (position, (price, id)) in prices.into_iter().take(limit).enumerate() {
                    if previous != Some(price) {
                        rank = position + 1;
                        previous = Some(price);
                    }
                    ranked.push((id, rank));
                }
                Ok(ranked.len() as u64)
            }
        }
    }

    fn apply(&mut self, op: &OperationSpec) -> Result<u64, StoreError> {
        let table = op.table()?;
        let id = op.param_int(keys::ID)?;
        match (op.kind, table) {
            (OperationKind::Insert, Table::Users) => {
                let username = op.param_text(keys::USERNAME)?;
                let email = op.param_text(keys::EMAIL)?;
                if self.users.contains_key(&id) {
                    return Err(duplicate("users.id", &id.to_string()));
                }
                if self.usernames.contains_key(username) {
                    return Err(duplicate("users.username", username));
                }
                if self.emails.contains_key(email) {
                    return Err(duplicate("users.email", email));
                }
                let full_name = op.param_text(keys::FULL_NAME).ok().map(str::to_string);
                self.usernames.insert(username.to_string(), id);
                self.emails.insert(email.to_string(), id);
                self.users.insert(
                    id,
                    UserRow {
                        id,
                        username: username.to_string(),
                        email: email.to_string(),
                        full_name,
                    },
                );
                Ok(1)
            }
            (OperationKind::Insert, Table::Products) => {
                let name = op.param_text(keys::NAME)?;
                let price = op.param_float(keys::PRICE)?;
                let sku = op.param_text(keys::SKU)?;
                if self.products.contains_key(&id) {
                    return Err(duplicate("products.id", &id.to_string()));
                }
                if self.skus.contains_key(sku) {
                    return Err(duplicate("products.sku", sku));
                }
                self.skus.insert(sku.to_string(), id);
                self.products.insert(
                    id,
                    ProductRow {
                        id,
                        name: name.to_string(),
                        description: None,
                        price,
                        sku: sku.to_string(),
                    },
                );
                Ok(1)
            }
            (OperationKind::Update, Table::Users) => {
                let full_name = op.param_text(keys::FULL_NAME)?;
                Ok(self
                    .users
                    .get_mut(&id)
                    .map(|row| row.full_name = Some(full_name.to_string()))
                    .is_some() as u64)
            }
            (OperationKind::Update, Table::Products) => {
                let price = op.param_float(keys::PRICE)?;
                Ok(self
                    .products
                    .get_mut(&id)
                    .map(|row| row.price = price)
                    .is_some() as u64)
            }
            (OperationKind::Delete, Table::Users) => match self.users.remove(&id) {
                Some(row) => {
                    self.usernames.remove(&row.username);
                    self.emails.remove(&row.email);
                    Ok(1)
                }
                None => Ok(0),
            },
            (OperationKind::Delete, Table::Products) => match self.products.remove(&id) {
                Some(row) => {
                    self.skus.remove(&row.sku);
                    Ok(1)
                }
                None => Ok(0),
            },
            (kind, _) => Err(StoreError::MalformedOperation(format!(
                "{} is not a write operation",
                kind
            ))),
        }
    }
}

fn non_negative(op: &OperationSpec, key: &str) -> Result<usize, StoreError> {
    let value = op.param_int(key)?;
    usize::try_from(value)
        .map_err(|_| StoreError::MalformedOperation(format!("{} must not be negative", key)))
}

fn duplicate(column: &str, value: &str) -> StoreError {
    StoreError::ConstraintViolation(format!("duplicate value for {}: {}", column, value))
}

struct Shared {
    config: MemoryConfig,
    tables: RwLock<Tables>,
    calls: AtomicU64,
    faults: Mutex<BTreeMap<u64, StoreError>>,
    connections_opened: AtomicU64,
}

impl Shared {
    fn run(&self, op: &OperationSpec) -> Result<u64, StoreError> {
        if op.kind.is_write() {
            self.tables.write().apply(op)
        } else {
            self.tables.read().query(op)
        }
    }
}

/// Connector for the in-process fixture store.
///
/// Cloning shares the same tables, call counter and fault plan.
#[derive(Clone)]
pub struct MemoryConnector {
    shared: Arc<Shared>,
}

impl MemoryConnector {
    /// Create a store seeded with the configured fixture.
    pub fn new(config: MemoryConfig) -> Self {
        let tables = Tables::seeded(config.fixture);
        Self {
            shared: Arc::new(Shared {
                config,
                tables: RwLock::new(tables),
                calls: AtomicU64::new(0),
                faults: Mutex::new(BTreeMap::new()),
                connections_opened: AtomicU64::new(0),
            }),
        }
    }

    /// Fail the `call`-th execute (1-based, counted across all connections
    /// for the lifetime of the store) with `error`. Each fault fires once.
    pub fn inject_fault(&self, call: u64, error: StoreError) {
        self.shared.faults.lock().insert(call, error);
    }

    /// Number of execute calls served so far.
    pub fn calls(&self) -> u64 {
        self.shared.calls.load(Ordering::SeqCst)
    }

    /// Number of connections opened so far.
    pub fn connections_opened(&self) -> u64 {
        self.shared.connections_opened.load(Ordering::SeqCst)
    }

    /// Current row counts of (users, products).
    pub fn row_counts(&self) -> (usize, usize) {
        let tables = self.shared.tables.read();
        (tables.users.len(), tables.products.len())
    }

    /// Look up a user row.
    pub fn user(&self, id: i64) -> Option<UserRow> {
        self.shared.tables.read().users.get(&id).cloned()
    }

    fn open(&self) -> Session {
        self.shared.connections_opened.fetch_add(1, Ordering::SeqCst);
        Session {
            shared: self.shared.clone(),
            broken: false,
        }
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new(MemoryConfig::default())
    }
}

impl std::fmt::Debug for MemoryConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnector")
            .field("fixture", &self.shared.config.fixture)
            .field("io_latency", &self.shared.config.io_latency)
            .field("calls", &self.calls())
            .finish()
    }
}

struct Session {
    shared: Arc<Shared>,
    broken: bool,
}

impl Session {
    fn latency(&self) -> Duration {
        self.shared.config.io_latency
    }

    fn execute(&mut self, op: &OperationSpec) -> Result<u64, StoreError> {
        if self.broken {
            return Err(StoreError::ConnectionReset("connection is closed".to_string()));
        }
        let call = self.shared.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(fault) = self.shared.faults.lock().remove(&call) {
            if matches!(fault, StoreError::ConnectionReset(_)) {
                self.broken = true;
            }
            return Err(fault);
        }
        self.shared.run(op)
    }

    fn ping(&self) -> Result<(), StoreError> {
        if self.broken {
            Err(StoreError::ConnectionReset("connection is closed".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Async connection to the memory store.
pub struct MemoryConnection {
    session: Session,
}

impl AsyncConnection for MemoryConnection {
    async fn execute(&mut self, op: &OperationSpec) -> Result<u64, StoreError> {
        let latency = self.session.latency();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        self.session.execute(op)
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.session.ping()
    }
}

/// Blocking connection to the memory store.
pub struct MemoryBlockingConnection {
    session: Session,
}

impl BlockingConnection for MemoryBlockingConnection {
    fn execute(&mut self, op: &OperationSpec) -> Result<u64, StoreError> {
        let latency = self.session.latency();
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        self.session.execute(op)
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        self.session.ping()
    }
}

impl Connector for MemoryConnector {
    type Async = MemoryConnection;
    type Blocking = MemoryBlockingConnection;

    fn name(&self) -> &str {
        "memory"
    }

    async fn connect_async(&self) -> Result<MemoryConnection, StoreError> {
        Ok(MemoryConnection {
            session: self.open(),
        })
    }

    fn connect_blocking(&self) -> Result<MemoryBlockingConnection, StoreError> {
        Ok(MemoryBlockingConnection {
            session: self.open(),
        })
    }

    fn reset_fixture(&self) -> Result<(), StoreError> {
        *self.shared.tables.write() = Tables::seeded(self.shared.config.fixture);
        Ok(())
    }
}
