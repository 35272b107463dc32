//! Identifier quoting for the DDL the reconciler renders itself.
//!
//! Create statements from a [`TableSpec`](crate::TableSpec) are executed
//! verbatim; the `ALTER TABLE ... ADD COLUMN` statements and the pinned
//! search path are built here.

use std::fmt;

/// A PostgreSQL identifier.
///
/// Display writes the value quoted with double quotes, doubling any embedded
/// quote.
///
/// # Example
/// ```
/// use haven_reconcile::sql::Ident;
/// assert_eq!(Ident("mood_checkins").to_string(), "\"mood_checkins\"");
/// assert_eq!(Ident("bla\"h").to_string(), "\"bla\"\"h\"");
/// ```
pub struct Ident<T: AsRef<str>>(pub T);

impl<T: AsRef<str>> fmt::Display for Ident<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("\"")?;
        for c in self.0.as_ref().chars() {
            if c == '"' {
                f.write_str("\"\"")?;
            } else {
                write!(f, "{c}")?;
            }
        }
        f.write_str("\"")
    }
}

/// `"schema"."table"`
pub fn qualified(schema: &str, table: &str) -> String {
    format!("{}.{}", Ident(schema), Ident(table))
}
