//! Operation catalog.
//!
//! Backend-agnostic descriptors of the logical database operations a
//! workload is made of. Every store interprets the same parameters, so a
//! given [`OperationSpec`] costs the same work on either backend variant.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ParseError, StoreError};

/// Parameter keys shared by the generator and the stores.
pub mod keys {
    pub const TABLE: &str = "table";
    pub const ID: &str = "id";
    pub const START: &str = "start";
    pub const LIMIT: &str = "limit";
    pub const USERNAME: &str = "username";
    pub const EMAIL: &str = "email";
    pub const FULL_NAME: &str = "full_name";
    pub const NAME: &str = "name";
    pub const PRICE: &str = "price";
    pub const SKU: &str = "sku";
    pub const SHAPE: &str = "shape";
    pub const MIN_PRICE: &str = "min_price";
    pub const BAND_WIDTH: &str = "band_width";
}

/// Logical operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Point read by primary key.
    Read,
    /// Ordered range scan with a limit.
    Scan,
    Insert,
    Update,
    Delete,
    /// Multi-table join, group-by or window query.
    Aggregate,
}

/// Stable cost class of an operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostClass {
    Read,
    Write,
    MultiStep,
}

impl OperationKind {
    /// All operation kinds.
    pub const ALL: [OperationKind; 6] = [
        OperationKind::Read,
        OperationKind::Scan,
        OperationKind::Insert,
        OperationKind::Update,
        OperationKind::Delete,
        OperationKind::Aggregate,
    ];

    /// Cost class, identical for every backend.
    pub fn cost_class(self) -> CostClass {
        match self {
            OperationKind::Read | OperationKind::Scan => CostClass::Read,
            OperationKind::Insert | OperationKind::Update | OperationKind::Delete => {
                CostClass::Write
            }
            OperationKind::Aggregate => CostClass::MultiStep,
        }
    }

    /// Check if this kind mutates the store.
    pub fn is_write(self) -> bool {
        self.cost_class() == CostClass::Write
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Scan => "scan",
            OperationKind::Insert => "insert",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
            OperationKind::Aggregate => "aggregate",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fixture table an operation touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Users,
    Products,
}

impl Table {
    pub fn as_str(self) -> &'static str {
        match self {
            Table::Users => "users",
            Table::Products => "products",
        }
    }
}

impl FromStr for Table {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users" => Ok(Table::Users),
            "products" => Ok(Table::Products),
            other => Err(ParseError::Unknown {
                what: "table",
                value: other.to_string(),
            }),
        }
    }
}

/// Shape of an aggregate query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateShape {
    /// Users joined to products on id, filtered by minimum price.
    Join,
    /// Product count and average price per price band.
    GroupBy,
    /// Products ranked by price, highest first.
    Window,
}

impl AggregateShape {
    pub const ALL: [AggregateShape; 3] = [
        AggregateShape::Join,
        AggregateShape::GroupBy,
        AggregateShape::Window,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AggregateShape::Join => "join",
            AggregateShape::GroupBy => "group_by",
            AggregateShape::Window => "window",
        }
    }
}

impl FromStr for AggregateShape {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "join" => Ok(AggregateShape::Join),
            "group_by" => Ok(AggregateShape::GroupBy),
            "window" => Ok(AggregateShape::Window),
            other => Err(ParseError::Unknown {
                what: "aggregate shape",
                value: other.to_string(),
            }),
        }
    }
}

/// Opaque parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_string())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

/// One logical database operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationSpec {
    pub kind: OperationKind,
    pub params: BTreeMap<String, ParamValue>,
}

impl OperationSpec {
    /// Create an operation with no parameters.
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            params: BTreeMap::new(),
        }
    }

    /// Set a parameter.
    pub fn with_param(mut self, key: &str, value: impl Into<ParamValue>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    /// Point read of one row.
    pub fn read(table: Table, id: i64) -> Self {
        Self::new(OperationKind::Read)
            .with_param(keys::TABLE, table.as_str())
            .with_param(keys::ID, id)
    }

    /// Ordered scan of `limit` rows starting at `start`.
    pub fn scan(table: Table, start: i64, limit: i64) -> Self {
        Self::new(OperationKind::Scan)
            .with_param(keys::TABLE, table.as_str())
            .with_param(keys::START, start)
            .with_param(keys::LIMIT, limit)
    }

    /// Insert a user row.
    pub fn insert_user(id: i64, username: impl Into<String>, email: impl Into<String>) -> Self {
        Self::new(OperationKind::Insert)
            .with_param(keys::TABLE, Table::Users.as_str())
            .with_param(keys::ID, id)
            .with_param(keys::USERNAME, username.into())
            .with_param(keys::EMAIL, email.into())
    }

    /// Insert a product row.
    pub fn insert_product(id: i64, name: impl Into<String>, price: f64, sku: impl Into<String>) -> Self {
        Self::new(OperationKind::Insert)
            .with_param(keys::TABLE, Table::Products.as_str())
            .with_param(keys::ID, id)
            .with_param(keys::NAME, name.into())
            .with_param(keys::PRICE, price)
            .with_param(keys::SKU, sku.into())
    }

    /// Set a user's full name.
    pub fn update_user(id: i64, full_name: impl Into<String>) -> Self {
        Self::new(OperationKind::Update)
            .with_param(keys::TABLE, Table::Users.as_str())
            .with_param(keys::ID, id)
            .with_param(keys::FULL_NAME, full_name.into())
    }

    /// Set a product's price.
    pub fn update_product(id: i64, price: f64) -> Self {
        Self::new(OperationKind::Update)
            .with_param(keys::TABLE, Table::Products.as_str())
            .with_param(keys::ID, id)
            .with_param(keys::PRICE, price)
    }

    /// Delete one row.
    pub fn delete(table: Table, id: i64) -> Self {
        Self::new(OperationKind::Delete)
            .with_param(keys::TABLE, table.as_str())
            .with_param(keys::ID, id)
    }

    /// Aggregate query of the given shape.
    pub fn aggregate(shape: AggregateShape) -> Self {
        Self::new(OperationKind::Aggregate).with_param(keys::SHAPE, shape.as_str())
    }

    pub fn param(&self, key: &str) -> Option<&ParamValue> {
        self.params.get(key)
    }

    /// Integer parameter, or a malformed-operation error.
    pub fn param_int(&self, key: &str) -> Result<i64, StoreError> {
        match self.param(key) {
            Some(ParamValue::Int(v)) => Ok(*v),
            Some(_) => Err(self.malformed(key, "expected integer")),
            None => Err(self.malformed(key, "missing")),
        }
    }

    /// Float parameter. Integers are widened.
    pub fn param_float(&self, key: &str) -> Result<f64, StoreError> {
        match self.param(key) {
            Some(ParamValue::Float(v)) => Ok(*v),
            Some(ParamValue::Int(v)) => Ok(*v as f64),
            Some(_) => Err(self.malformed(key, "expected number")),
            None => Err(self.malformed(key, "missing")),
        }
    }

    pub fn param_text(&self, key: &str) -> Result<&str, StoreError> {
        match self.param(key) {
            Some(ParamValue::Text(v)) => Ok(v),
            Some(_) => Err(self.malformed(key, "expected text")),
            None => Err(self.malformed(key, "missing")),
        }
    }

    /// Target table.
    pub fn table(&self) -> Result<Table, StoreError> {
        self.param_text(keys::TABLE)?
            .parse()
            .map_err(|e: ParseError| StoreError::MalformedOperation(e.to_string()))
    }

    /// Aggregate shape.
    pub fn shape(&self) -> Result<AggregateShape, StoreError> {
        self.param_text(keys::SHAPE)?
            .parse()
            .map_err(|e: ParseError| StoreError::MalformedOperation(e.to_string()))
    }

    fn malformed(&self, key: &str, reason: &str) -> StoreError {
        StoreError::MalformedOperation(format!("{} parameter '{}': {}", self.kind, key, reason))
    }
}

/// Template operation for a kind, with default parameters.
pub fn describe(kind: OperationKind) -> OperationSpec {
    match kind {
        OperationKind::Read => OperationSpec::read(Table::Users, 1),
        OperationKind::Scan => OperationSpec::scan(Table::Users, 1, 20),
        OperationKind::Insert => {
            OperationSpec::insert_user(0, "template_user", "template@example.com")
        }
        OperationKind::Update => OperationSpec::update_user(1, "Template Name"),
        OperationKind::Delete => OperationSpec::delete(Table::Users, 1),
        OperationKind::Aggregate => {
            OperationSpec::aggregate(AggregateShape::Join).with_param(keys::MIN_PRICE, 100.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_matches_kind() {
        for kind in OperationKind::ALL {
            assert_eq!(describe(kind).kind, kind);
        }
    }

    #[test]
    fn test_cost_classes() {
        assert_eq!(OperationKind::Read.cost_class(), CostClass::Read);
        assert_eq!(OperationKind::Scan.cost_class(), CostClass::Read);
        assert_eq!(OperationKind::Delete.cost_class(), CostClass::Write);
        assert_eq!(OperationKind::Aggregate.cost_class(), CostClass::MultiStep);
        assert!(OperationKind::Insert.is_write());
        assert!(!OperationKind::Aggregate.is_write());
    }

    #[test]
    fn test_typed_accessors() {
        let op = OperationSpec::update_product(7, 19.5);
        assert_eq!(op.table().unwrap(), Table::Products);
        assert_eq!(op.param_int(keys::ID).unwrap(), 7);
        assert_eq!(op.param_float(keys::PRICE).unwrap(), 19.5);
        assert_eq!(op.param_float(keys::ID).unwrap(), 7.0);
    }

    #[test]
    fn test_malformed_parameters() {
        let op = OperationSpec::new(OperationKind::Read).with_param(keys::TABLE, "orders");
        assert!(matches!(op.table(), Err(StoreError::MalformedOperation(_))));

        let op = OperationSpec::new(OperationKind::Read).with_param(keys::ID, "seven");
        let err = op.param_int(keys::ID).unwrap_err();
        assert_eq!(
            err,
            StoreError::MalformedOperation("read parameter 'id': expected integer".into())
        );
        assert!(matches!(
            op.param_text(keys::USERNAME),
            Err(StoreError::MalformedOperation(_))
        ));
    }

    #[test]
    fn test_spec_serializes_params_untagged() {
        let op = OperationSpec::read(Table::Users, 3);
        let json = serde_json::to_value(&op).unwrap();
        assert_eq!(json["kind"], "read");
        assert_eq!(json["params"]["id"], 3);
        assert_eq!(json["params"]["table"], "users");
    }
}
