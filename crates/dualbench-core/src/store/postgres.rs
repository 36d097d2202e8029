//! PostgreSQL store.
//!
//! Requires a running PostgreSQL instance and `DATABASE_URL`.
//! Enable with `--features postgres`.

use sqlx::postgres::PgConnection;
use sqlx::Connection as _;
use tokio::runtime::{Builder, Runtime};

use crate::catalog::{keys, AggregateShape, OperationKind, OperationSpec, Table};
use crate::error::StoreError;

use super::fixture::{generate_products, generate_users, FixtureSpec};
use super::{AsyncConnection, BlockingConnection, Connector};

const SCHEMA: &str = r#"
    DROP TABLE IF EXISTS products CASCADE;
    DROP TABLE IF EXISTS users CASCADE;

    CREATE TABLE users (
        id BIGINT PRIMARY KEY,
        username TEXT NOT NULL UNIQUE,
        email TEXT NOT NULL UNIQUE,
        full_name TEXT
    );

    CREATE TABLE products (
        id BIGINT PRIMARY KEY,
        name TEXT NOT NULL,
        description TEXT,
        price DOUBLE PRECISION NOT NULL,
        sku TEXT NOT NULL UNIQUE
    );

    CREATE INDEX idx_products_name ON products(name);
    CREATE INDEX idx_products_price ON products(price);
"#;

/// Connector for a PostgreSQL database.
#[derive(Debug, Clone)]
pub struct PgConnector {
    database_url: String,
    fixture: FixtureSpec,
}

impl PgConnector {
    pub fn new(database_url: impl Into<String>, fixture: FixtureSpec) -> Self {
        Self {
            database_url: database_url.into(),
            fixture,
        }
    }

    /// Create from the `DATABASE_URL` environment variable.
    pub fn from_env(fixture: FixtureSpec) -> Result<Self, StoreError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            StoreError::Connect("DATABASE_URL environment variable not set".to_string())
        })?;
        Ok(Self::new(database_url, fixture))
    }

    async fn open(&self) -> Result<PgConnection, StoreError> {
        PgConnection::connect(&self.database_url)
            .await
            .map_err(|e| StoreError::Connect(e.to_string()))
    }

    async fn load_fixture(&self, conn: &mut PgConnection) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&mut *conn)
            .await
            .map_err(map_error)?;

        let users = generate_users(self.fixture.users);
        sqlx::query(
            "INSERT INTO users (id, username, email, full_name) \
             SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::text[])",
        )
        .bind(users.iter().map(|u| u.id).collect::<Vec<_>>())
        .bind(users.iter().map(|u| u.username.clone()).collect::<Vec<_>>())
        .bind(users.iter().map(|u| u.email.clone()).collect::<Vec<_>>())
        .bind(users.iter().map(|u| u.full_name.clone()).collect::<Vec<_>>())
        .execute(&mut *conn)
        .await
        .map_err(map_error)?;

        let products = generate_products(self.fixture.products);
        sqlx::query(
            "INSERT INTO products (id, name, description, price, sku) \
             SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::float8[], $5::text[])",
        )
        .bind(products.iter().map(|p| p.id).collect::<Vec<_>>())
        .bind(products.iter().map(|p| p.name.clone()).collect::<Vec<_>>())
        .bind(products.iter().map(|p| p.description.clone()).collect::<Vec<_>>())
        .bind(products.iter().map(|p| p.price).collect::<Vec<_>>())
        .bind(products.iter().map(|p| p.sku.clone()).collect::<Vec<_>>())
        .execute(&mut *conn)
        .await
        .map_err(map_error)?;

        Ok(())
    }
}

/// Map a driver error onto the store taxonomy.
///
/// SQLSTATE class 23 is an integrity constraint violation and classes 22/42
/// are data or syntax errors; transport-level failures are connection resets.
pub fn map_error(err: sqlx::Error) -> StoreError {
    match &err {
        sqlx::Error::Database(db) => {
            let code = db.code().map(|c| c.into_owned()).unwrap_or_default();
            if code.starts_with("23") {
                StoreError::ConstraintViolation(db.message().to_string())
            } else if code.starts_with("57") || code.starts_with("08") {
                StoreError::ConnectionReset(db.message().to_string())
            } else {
                StoreError::MalformedOperation(db.message().to_string())
            }
        }
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::Protocol(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => StoreError::ConnectionReset(err.to_string()),
        _ => StoreError::MalformedOperation(err.to_string()),
    }
}

async fn run_operation(conn: &mut PgConnection, op: &OperationSpec) -> Result<u64, StoreError> {
    let rows = match op.kind {
        OperationKind::Read => {
            let sql = match op.table()? {
                Table::Users => "SELECT id, username, email, full_name FROM users WHERE id = $1",
                Table::Products => {
                    "SELECT id, name, description, price, sku FROM products WHERE id = $1"
                }
            };
            sqlx::query(sql)
                .bind(op.param_int(keys::ID)?)
                .fetch_optional(&mut *conn)
                .await
                .map_err(map_error)?
                .map_or(0, |_| 1)
        }
        OperationKind::Scan => {
            let sql = match op.table()? {
                Table::Users => {
                    "SELECT id, username, email, full_name FROM users \
                     WHERE id >= $1 ORDER BY id LIMIT $2"
                }
                Table::Products => {
                    "SELECT id, name, description, price, sku FROM products \
                     WHERE id >= $1 ORDER BY id LIMIT $2"
                }
            };
            sqlx::query(sql)
                .bind(op.param_int(keys::START)?)
                .bind(op.param_int(keys::LIMIT)?)
                .fetch_all(&mut *conn)
                .await
                .map_err(map_error)?
                .len() as u64
        }
        OperationKind::Insert => match op.table()? {
            Table::Users => sqlx::query(
                "INSERT INTO users (id, username, email, full_name) VALUES ($1, $2, $3, $4)",
            )
            .bind(op.param_int(keys::ID)?)
            .bind(op.param_text(keys::USERNAME)?)
            .bind(op.param_text(keys::EMAIL)?)
            .bind(op.param_text(keys::FULL_NAME).ok())
            .execute(&mut *conn)
            .await
            .map_err(map_error)?
            .rows_affected(),
            Table::Products => sqlx::query(
                "INSERT INTO products (id, name, price, sku) VALUES ($1, $2, $3, $4)",
            )
            .bind(op.param_int(keys::ID)?)
            .bind(op.param_text(keys::NAME)?)
            .bind(op.param_float(keys::PRICE)?)
            .bind(op.param_text(keys::SKU)?)
            .execute(&mut *conn)
            .await
            .map_err(map_error)?
            .rows_affected(),
        },
        OperationKind::Update => match op.table()? {
            Table::Users => sqlx::query("UPDATE users SET full_name = $2 WHERE id = $1")
                .bind(op.param_int(keys::ID)?)
                .bind(op.param_text(keys::FULL_NAME)?)
                .execute(&mut *conn)
                .await
                .map_err(map_error)?
                .rows_affected(),
            Table::Products => sqlx::query("UPDATE products SET price = $2 WHERE id = $1")
                .bind(op.param_int(keys::ID)?)
                .bind(op.param_float(keys::PRICE)?)
                .execute(&mut *conn)
                .await
                .map_err(map_error)?
                .rows_affected(),
        },
        OperationKind::Delete => {
            let sql = match op.table()? {
                Table::Users => "DELETE FROM users WHERE id = $1",
                Table::Products => "DELETE FROM products WHERE id = $1",
            };
            sqlx::query(sql)
                .bind(op.param_int(keys::ID)?)
                .execute(&mut *conn)
                .await
                .map_err(map_error)?
                .rows_affected()
        }
        OperationKind::Aggregate => match op.shape()? {
            AggregateShape::Join => sqlx::query(
                "SELECT u.id, u.username, p.name, p.price FROM users u \
                 JOIN products p ON p.id = u.id WHERE p.price >= $1",
            )
            .bind(op.param_float(keys::MIN_PRICE)?)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?
            .len() as u64,
            AggregateShape::GroupBy => sqlx::query(
                "SELECT FLOOR(price / $1) AS band, COUNT(*), AVG(price) FROM products \
                 GROUP BY band ORDER BY band",
            )
            .bind(op.param_float(keys::BAND_WIDTH)?)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?
            .len() as u64,
            AggregateShape::Window => sqlx::query(
                "SELECT id, price, RANK() OVER (ORDER BY price DESC) AS price_rank \
                 FROM products ORDER BY price DESC, id LIMIT $1",
            )
            .bind(op.param_int(keys::LIMIT)?)
            .fetch_all(&mut *conn)
            .await
            .map_err(map_error)?
            .len() as u64,
        },
    };
    Ok(rows)
}

/// Async PostgreSQL connection.
pub struct PgAsyncConnection {
    conn: PgConnection,
}

impl AsyncConnection for PgAsyncConnection {
    async fn execute(&mut self, op: &OperationSpec) -> Result<u64, StoreError> {
        run_operation(&mut self.conn, op).await
    }

    async fn ping(&mut self) -> Result<(), StoreError> {
        self.conn.ping().await.map_err(map_error)
    }
}

/// Blocking PostgreSQL connection.
///
/// Drives the driver on a private current-thread runtime, so every call
/// blocks the owning worker thread for its full round trip.
pub struct PgBlockingConnection {
    rt: Runtime,
    conn: PgConnection,
}

impl BlockingConnection for PgBlockingConnection {
    fn execute(&mut self, op: &OperationSpec) -> Result<u64, StoreError> {
        self.rt.block_on(run_operation(&mut self.conn, op))
    }

    fn ping(&mut self) -> Result<(), StoreError> {
        self.rt.block_on(self.conn.ping()).map_err(map_error)
    }
}

fn private_runtime() -> Result<Runtime, StoreError> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| StoreError::Connect(format!("failed to create runtime: {}", e)))
}

impl Connector for PgConnector {
    type Async = PgAsyncConnection;
    type Blocking = PgBlockingConnection;

    fn name(&self) -> &str {
        "postgres"
    }

    async fn connect_async(&self) -> Result<PgAsyncConnection, StoreError> {
        Ok(PgAsyncConnection {
            conn: self.open().await?,
        })
    }

    fn connect_blocking(&self) -> Result<PgBlockingConnection, StoreError> {
        let rt = private_runtime()?;
        let conn = rt.block_on(self.open())?;
        Ok(PgBlockingConnection { rt, conn })
    }

    fn reset_fixture(&self) -> Result<(), StoreError> {
        let rt = private_runtime()?;
        rt.block_on(async {
            let mut conn = self.open().await?;
            self.load_fixture(&mut conn).await?;
            conn.close().await.map_err(map_error)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_are_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer");
        assert!(map_error(sqlx::Error::Io(io)).is_transient());
        assert!(map_error(sqlx::Error::PoolTimedOut).is_transient());
    }

    #[test]
    fn test_decode_errors_are_fatal() {
        let err = map_error(sqlx::Error::RowNotFound);
        assert!(matches!(err, StoreError::MalformedOperation(_)));
    }

    #[test]
    fn test_from_env_requires_url() {
        if std::env::var("DATABASE_URL").is_err() {
            assert!(PgConnector::from_env(FixtureSpec::default()).is_err());
        }
    }
}
