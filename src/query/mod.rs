//! Client query language: property paths, `$filter` and `$orderby`.

pub mod filter;
pub mod order;
pub mod path;

pub use filter::{ComparisonOp, FilterExpression, FilterExpressionParser};
pub use order::{OrderBySpec, OrderBySpecParser, OrderTerm, SortDirection};
pub use path::{AttributePath, AttributePathResolver};
