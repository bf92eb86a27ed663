//! Structured query builder.
//!
//! A [`Query`] is an ordered list of field filters combined with AND, an
//! optional ordering and an optional limit, targeting one collection path.

use crate::codec::{encode, NativeValue};
use crate::types::{
    CollectionSelector, CompositeFilter, FieldFilter, FieldReference, Filter, Order,
    StructuredQuery,
};

/// Field path for a top-level field name.
///
/// Names that are not plain identifiers (`[A-Za-z_][A-Za-z0-9_]*`) are
/// backquoted, with `` ` `` and `\` escaped, so `a.b` addresses the field
/// literally named `a.b` rather than a nested one.
pub fn quote_field_path(name: &str) -> String {
    let mut chars = name.chars();
    let simple = matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if simple {
        return name.to_string();
    }

    let mut quoted = String::with_capacity(name.len() + 2);
    quoted.push('`');
    for c in name.chars() {
        if c == '`' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('`');
    quoted
}

/// Comparison operator of a field filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    Equal,
    NotEqual,
    LessThan,
    LessThanOrEqual,
    GreaterThan,
    GreaterThanOrEqual,
    /// Set membership; the filter value must be an array.
    In,
}

impl FieldOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldOp::Equal => "EQUAL",
            FieldOp::NotEqual => "NOT_EQUAL",
            FieldOp::LessThan => "LESS_THAN",
            FieldOp::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
            FieldOp::GreaterThan => "GREATER_THAN",
            FieldOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            FieldOp::In => "IN",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ascending => "ASCENDING",
            Direction::Descending => "DESCENDING",
        }
    }
}

/// One `(field, operator, value)` condition.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: FieldOp,
    pub value: NativeValue,
}

/// A read-only query against one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    collection: String,
    filters: Vec<Condition>,
    order_by: Vec<(String, Direction)>,
    limit: Option<u32>,
}

impl Query {
    /// Query over a collection path such as `rate_limits` or `users/u1/orders`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: Vec::new(),
            limit: None,
        }
    }

    pub fn filter(mut self, field: impl Into<String>, op: FieldOp, value: impl Into<NativeValue>) -> Self {
        self.filters.push(Condition {
            field: field.into(),
            op,
            value: value.into(),
        });
        self
    }

    /// Shorthand for an equality filter.
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<NativeValue>) -> Self {
        self.filter(field, FieldOp::Equal, value)
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by.push((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn filters(&self) -> &[Condition] {
        &self.filters
    }

    pub fn ordering(&self) -> &[(String, Direction)] {
        &self.order_by
    }

    pub fn limit_value(&self) -> Option<u32> {
        self.limit
    }

    /// Split the collection path into the parent document path (possibly
    /// empty) and the collection id.
    pub fn parent_and_collection_id(&self) -> (&str, &str) {
        match self.collection.rsplit_once('/') {
            Some((parent, id)) => (parent, id),
            None => ("", self.collection.as_str()),
        }
    }

    /// Wire form sent in the `:runQuery` body.
    pub fn to_structured_query(&self) -> StructuredQuery {
        let (_, collection_id) = self.parent_and_collection_id();

        let mut filters: Vec<Filter> = self
            .filters
            .iter()
            .map(|c| Filter {
                composite_filter: None,
                field_filter: Some(FieldFilter {
                    field: FieldReference {
                        field_path: quote_field_path(&c.field),
                    },
                    op: c.op.as_str().to_string(),
                    value: encode(&c.value),
                }),
            })
            .collect();

        let r#where = match filters.len() {
            0 => None,
            1 => filters.pop(),
            _ => Some(Filter {
                composite_filter: Some(CompositeFilter {
                    op: "AND".to_string(),
                    filters,
                }),
                field_filter: None,
            }),
        };

        let order_by = if self.order_by.is_empty() {
            None
        } else {
            Some(
                self.order_by
                    .iter()
                    .map(|(field, direction)| Order {
                        field: FieldReference {
                            field_path: quote_field_path(field),
                        },
                        direction: direction.as_str().to_string(),
                    })
                    .collect(),
            )
        };

        StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: collection_id.to_string(),
                all_descendants: None,
            }],
            r#where,
            order_by,
            limit: self.limit.map(|l| l.min(i32::MAX as u32) as i32),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Value;

    #[test]
    fn test_single_filter_is_field_filter() {
        let query = Query::new("rate_limits").where_eq("identifier", "1.2.3.4").limit(1);
        let wire = query.to_structured_query();

        let filter = wire.r#where.unwrap();
        assert!(filter.composite_filter.is_none());
        let field = filter.field_filter.unwrap();
        assert_eq!(field.field.field_path, "identifier");
        assert_eq!(field.op, "EQUAL");
        assert_eq!(field.value, Value::StringValue("1.2.3.4".into()));
        assert_eq!(wire.limit, Some(1));
    }

    #[test]
    fn test_multiple_filters_are_and_composite() {
        let query = Query::new("login_attempts")
            .where_eq("email", "a@shop.test")
            .where_eq("succeeded", false)
            .filter("attempted_at", FieldOp::GreaterThanOrEqual, 100i64);
        let wire = query.to_structured_query();

        let composite = wire.r#where.unwrap().composite_filter.unwrap();
        assert_eq!(composite.op, "AND");
        let ops: Vec<&str> = composite
            .filters
            .iter()
            .map(|f| f.field_filter.as_ref().unwrap().op.as_str())
            .collect();
        assert_eq!(ops, vec!["EQUAL", "EQUAL", "GREATER_THAN_OR_EQUAL"]);
    }

    #[test]
    fn test_in_filter_encodes_array() {
        let wire = Query::new("alerts")
            .filter("severity", FieldOp::In, vec!["high", "critical"])
            .to_structured_query();
        let field = wire.r#where.unwrap().field_filter.unwrap();
        assert_eq!(field.op, "IN");
        assert!(matches!(field.value, Value::ArrayValue(_)));
    }

    #[test]
    fn test_nested_collection_path() {
        let query = Query::new("users/u1/orders");
        assert_eq!(query.parent_and_collection_id(), ("users/u1", "orders"));
        assert_eq!(query.to_structured_query().from[0].collection_id, "orders");

        let query = Query::new("orders");
        assert_eq!(query.parent_and_collection_id(), ("", "orders"));
    }

    #[test]
    fn test_quote_field_path() {
        assert_eq!(quote_field_path("window_start"), "window_start");
        assert_eq!(quote_field_path("_id2"), "_id2");
        assert_eq!(quote_field_path("first-name"), "`first-name`");
        assert_eq!(quote_field_path("2fa"), "`2fa`");
        assert_eq!(quote_field_path("a.b"), "`a.b`");
        assert_eq!(quote_field_path("we`ird\\"), "`we\\`ird\\\\`");
        assert_eq!(quote_field_path(""), "``");
    }

    #[test]
    fn test_filter_and_order_fields_are_quoted() {
        let wire = Query::new("users")
            .where_eq("first-name", "Ada")
            .order_by("sign.up", Direction::Ascending)
            .to_structured_query();

        let field = wire.r#where.unwrap().field_filter.unwrap();
        assert_eq!(field.field.field_path, "`first-name`");
        assert_eq!(wire.order_by.unwrap()[0].field.field_path, "`sign.up`");
    }

    #[test]
    fn test_no_filters_no_where() {
        let wire = Query::new("orders")
            .order_by("created_at", Direction::Descending)
            .to_structured_query();
        assert!(wire.r#where.is_none());
        assert_eq!(wire.order_by.unwrap()[0].direction, "DESCENDING");
    }
}
