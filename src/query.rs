//! Query templates.
//!
//! A [`Query`] is either raw SQL text, passed to the driver untouched, or a [`Composed`]
//! statement built from fragments whose identifiers are escaped and whose placeholders are
//! numbered only when the statement is rendered.

use std::fmt;
use std::ops::Add;

/// Trait for rendering statements to SQL text.
pub trait ToSql {
    /// Convert this node to a SQL string.
    fn to_sql(&self) -> String;
}

/// One piece of a composed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// Literal SQL, emitted verbatim.
    Sql(String),
    /// A possibly schema-qualified identifier, emitted double-quoted.
    Identifier(Vec<String>),
    /// A bound parameter, emitted as `$n`.
    Placeholder,
    /// The `DEFAULT` keyword.
    Default,
}

/// A statement assembled from fragments, in the spirit of a SQL composition API.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Composed {
    fragments: Vec<Fragment>,
}

impl Composed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append literal SQL.
    pub fn sql(mut self, text: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Sql(text.into()));
        self
    }

    /// Append a single escaped identifier.
    pub fn identifier(mut self, name: impl Into<String>) -> Self {
        self.fragments.push(Fragment::Identifier(vec![name.into()]));
        self
    }

    /// Append a dot-separated, schema-qualified identifier (`schema.table`).
    pub fn qualified(mut self, path: &str) -> Self {
        self.fragments
            .push(Fragment::Identifier(path.split('.').map(str::to_string).collect()));
        self
    }

    pub fn placeholder(mut self) -> Self {
        self.fragments.push(Fragment::Placeholder);
        self
    }

    pub fn default_value(mut self) -> Self {
        self.fragments.push(Fragment::Default);
        self
    }

    pub fn push(&mut self, fragment: Fragment) {
        self.fragments.push(fragment);
    }

    /// Append `items` separated by `separator`.
    pub fn join<I>(mut self, separator: &str, items: I) -> Self
    where
        I: IntoIterator<Item = Fragment>,
    {
        for (i, item) in items.into_iter().enumerate() {
            if i > 0 {
                self.fragments.push(Fragment::Sql(separator.to_string()));
            }
            self.fragments.push(item);
        }
        self
    }

    pub fn fragments(&self) -> &[Fragment] {
        &self.fragments
    }

    /// Number of placeholders, which is the number of values the statement binds.
    pub fn placeholder_count(&self) -> usize {
        self.fragments
            .iter()
            .filter(|f| matches!(f, Fragment::Placeholder))
            .count()
    }
}

impl Add for Composed {
    type Output = Composed;

    fn add(mut self, rhs: Composed) -> Composed {
        self.fragments.extend(rhs.fragments);
        self
    }
}

impl ToSql for Composed {
    fn to_sql(&self) -> String {
        let mut sql = String::new();
        let mut next_param = 1;

        for fragment in &self.fragments {
            match fragment {
                Fragment::Sql(text) => sql.push_str(text),
                Fragment::Identifier(parts) => {
                    let quoted: Vec<String> = parts.iter().map(|p| quote_identifier(p)).collect();
                    sql.push_str(&quoted.join("."));
                }
                Fragment::Placeholder => {
                    sql.push_str(&format!("${}", next_param));
                    next_param += 1;
                }
                Fragment::Default => sql.push_str("DEFAULT"),
            }
        }

        sql
    }
}

/// Double-quote an identifier, doubling any embedded quotes.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// An SQL template: raw text or a composed statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    Raw(String),
    Composed(Composed),
}

impl Query {
    /// Turn the query into a composed statement so more fragments can follow it.
    pub fn into_composed(self) -> Composed {
        match self {
            Query::Raw(text) => Composed::new().sql(text),
            Query::Composed(composed) => composed,
        }
    }
}

impl ToSql for Query {
    fn to_sql(&self) -> String {
        match self {
            Query::Raw(text) => text.clone(),
            Query::Composed(composed) => composed.to_sql(),
        }
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_sql())
    }
}

impl From<&str> for Query {
    fn from(text: &str) -> Self {
        Query::Raw(text.to_string())
    }
}

impl From<String> for Query {
    fn from(text: String) -> Self {
        Query::Raw(text)
    }
}

impl From<Composed> for Query {
    fn from(composed: Composed) -> Self {
        Query::Composed(composed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_passthrough() {
        let q = Query::from("SELECT * FROM users WHERE id = $1");
        assert_eq!(q.to_sql(), "SELECT * FROM users WHERE id = $1");
    }

    #[test]
    fn test_placeholders_numbered_in_order() {
        let q = Composed::new()
            .sql("UPDATE ")
            .identifier("users")
            .sql(" SET name = ")
            .placeholder()
            .sql(" WHERE id = ")
            .placeholder();
        assert_eq!(q.to_sql(), "UPDATE \"users\" SET name = $1 WHERE id = $2");
        assert_eq!(q.placeholder_count(), 2);
    }

    #[test]
    fn test_identifier_escaping() {
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        let q = Composed::new().qualified("public.users");
        assert_eq!(q.to_sql(), "\"public\".\"users\"");
    }

    #[test]
    fn test_join_and_add() {
        let cols = Composed::new().sql("(").join(
            ", ",
            [Fragment::Placeholder, Fragment::Default, Fragment::Placeholder],
        );
        let q = Query::from("VALUES ").into_composed() + cols.sql(")");
        assert_eq!(q.to_sql(), "VALUES ($1, DEFAULT, $2)");
    }
}
