//! Seeded fixture data.
//!
//! Every store is reset to the same rows before a run so write workloads
//! start from an identical state on both backends.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Default number of fixture users.
pub const DEFAULT_FIXTURE_USERS: usize = 1_000;

/// Default number of fixture products.
pub const DEFAULT_FIXTURE_PRODUCTS: usize = 1_000;

const FIXTURE_SEED: u64 = 12345;

/// Size of the fixture tables. Row ids run from 1 to the count inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureSpec {
    pub users: usize,
    pub products: usize,
}

impl FixtureSpec {
    pub fn new(users: usize, products: usize) -> Self {
        Self { users, products }
    }
}

impl Default for FixtureSpec {
    fn default() -> Self {
        Self::new(DEFAULT_FIXTURE_USERS, DEFAULT_FIXTURE_PRODUCTS)
    }
}

/// User row.
#[derive(Debug, Clone, PartialEq)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub full_name: Option<String>,
}

/// Product row.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductRow {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub sku: String,
}

/// Generate the fixture users.
pub fn generate_users(count: usize) -> Vec<UserRow> {
    let name_prefixes = [
        "Alice", "Bob", "Charlie", "David", "Eve", "Frank", "Grace", "Henry", "Ivy", "Jack",
    ];

    (1..=count as i64)
        .map(|id| {
            let prefix = name_prefixes[id as usize % name_prefixes.len()];
            UserRow {
                id,
                username: format!("user_{}", id),
                email: format!("user{}@example{}.com", id, id % 10),
                full_name: Some(format!("{} {}", prefix, id)),
            }
        })
        .collect()
}

/// Generate the fixture products with seeded prices.
pub fn generate_products(count: usize) -> Vec<ProductRow> {
    let mut rng = StdRng::seed_from_u64(FIXTURE_SEED);

    (1..=count as i64)
        .map(|id| {
            let cents: i64 = rng.gen_range(1_000..100_000);
            ProductRow {
                id,
                name: format!("Product {}", id),
                description: Some(format!("Test product {}", id)),
                price: cents as f64 / 100.0,
                sku: format!("SKU{}", id),
            }
        })
        .collect()
}
