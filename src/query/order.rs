//! `$orderby` parsing: `Attr [asc|desc], Attr2 ...`.

use crate::config::{RecordTypeDescriptor, ValueKind};
use crate::error::AppError;
use crate::query::{AttributePath, AttributePathResolver};
use crate::value::Value;
use std::cmp::Ordering;
use std::fmt;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn keyword(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "asc",
            SortDirection::Descending => "desc",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderTerm {
    pub path: AttributePath,
    pub direction: SortDirection,
}

impl OrderTerm {
    /// Nulls last ascending, first descending (PostgreSQL default).
    pub fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        let idx = self.path.index();
        let ord = a[idx].sort_cmp(&b[idx]);
        match self.direction {
            SortDirection::Ascending => ord,
            SortDirection::Descending => ord.reverse(),
        }
    }
}

/// Ordered sort keys; earlier terms take precedence.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OrderBySpec {
    terms: Vec<OrderTerm>,
}

impl OrderBySpec {
    pub fn terms(&self) -> &[OrderTerm] {
        &self.terms
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        self.terms
            .iter()
            .map(|t| t.compare(a, b))
            .find(|o| *o != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for OrderBySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, term) in self.terms.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", term.path, term.direction.keyword())?;
        }
        Ok(())
    }
}

pub struct OrderBySpecParser;

impl OrderBySpecParser {
    pub fn parse(desc: &RecordTypeDescriptor, raw: Option<&str>) -> Result<OrderBySpec, AppError> {
        let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
            return Ok(OrderBySpec::default());
        };
        let mut terms = Vec::new();
        for item in raw.split(',') {
            let mut words = item.split_whitespace();
            let name = words
                .next()
                .ok_or_else(|| AppError::malformed_order("empty sort item", raw.trim()))?;
            let direction = match words.next() {
                None | Some("asc") => SortDirection::Ascending,
                Some("desc") => SortDirection::Descending,
                Some(other) => return Err(AppError::malformed_order("unknown sort direction", other)),
            };
            if let Some(extra) = words.next() {
                return Err(AppError::malformed_order("unexpected trailing input", extra));
            }
            let path = AttributePathResolver::resolve(desc, name)?;
            if path.kind() == ValueKind::Blob {
                return Err(AppError::BadRequest(format!(
                    "cannot sort by binary property {}",
                    path.name()
                )));
            }
            terms.push(OrderTerm { path, direction });
        }
        Ok(OrderBySpec { terms })
    }
}
