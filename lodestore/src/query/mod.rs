//! The query expression tree and its canonical wire form.
//!
//! Queries are immutable value objects: combinators wrap their operands in
//! a new node, they never merge or mutate existing trees. All leaf values
//! are carried as strings; type-specific interpretation happens only at
//! match or translation time, using the schema.

use crate::error::{LodestoreError, Result};
use serde::{Deserialize, Serialize};

/// A boolean expression over an element's properties.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Matches everything.
    All,
    /// Matches nothing.
    None,
    Not { field: String, value: String },
    Eq { field: String, value: String },
    Gt { field: String, value: String },
    Gte { field: String, value: String },
    Lt { field: String, value: String },
    Lte { field: String, value: String },
    Contains { field: String, value: String },
    In { field: String, values: Vec<String> },
    And(Vec<Query>),
    Or(Vec<Query>),
}

macro_rules! leaf_builder {
    ($name:ident, $variant:ident) => {
        pub fn $name(field: impl Into<String>, value: impl Into<String>) -> Query {
            Query::$variant {
                field: field.into(),
                value: value.into(),
            }
        }
    };
}

impl Query {
    leaf_builder!(not, Not);
    leaf_builder!(eq, Eq);
    leaf_builder!(gt, Gt);
    leaf_builder!(gte, Gte);
    leaf_builder!(lt, Lt);
    leaf_builder!(lte, Lte);
    leaf_builder!(contains, Contains);

    pub fn is_in(field: impl Into<String>, values: Vec<String>) -> Query {
        Query::In {
            field: field.into(),
            values,
        }
    }

    /// Chained refinement: wraps both operands in a fresh AND node.
    pub fn and(self, other: Query) -> Query {
        Query::And(vec![self, other])
    }

    pub fn or(self, other: Query) -> Query {
        Query::Or(vec![self, other])
    }

    /// AND over one or more children. An empty child list is not
    /// constructible.
    pub fn all_of(children: Vec<Query>) -> Result<Query> {
        if children.is_empty() {
            return Err(LodestoreError::Query("AND requires at least one child".into()));
        }
        Ok(Query::And(children))
    }

    /// OR over one or more children.
    pub fn any_of(children: Vec<Query>) -> Result<Query> {
        if children.is_empty() {
            return Err(LodestoreError::Query("OR requires at least one child".into()));
        }
        Ok(Query::Or(children))
    }

    /// Static node-kind name, as spelled in the canonical form.
    pub fn kind(&self) -> &'static str {
        match self {
            Query::All => "ALL",
            Query::None => "NONE",
            Query::Not { .. } => "NOT",
            Query::Eq { .. } => "EQ",
            Query::Gt { .. } => "GT",
            Query::Gte { .. } => "GTE",
            Query::Lt { .. } => "LT",
            Query::Lte { .. } => "LTE",
            Query::Contains { .. } => "CONTAINS",
            Query::In { .. } => "IN",
            Query::And(_) => "AND",
            Query::Or(_) => "OR",
        }
    }

    /// Deterministic tree rendering, suitable for hashing, network
    /// transfer, or persistence.
    pub fn canonical_form(&self) -> String {
        let mut out = String::new();
        render_node(self, 0, &mut out);
        out
    }

    /// Parse a canonical tree back into a query. The body must hold exactly
    /// one root node: more than one is a MultipleRoots error, zero is a
    /// structural query error.
    pub fn from_canonical(text: &str) -> Result<Query> {
        let mut parser = CanonParser::new(text);
        let roots = parser.parse_nodes()?;
        parser.expect_end()?;
        match roots.len() {
            0 => Err(LodestoreError::Query("canonical form holds no root node".into())),
            1 => Ok(roots.into_iter().next().unwrap()),
            _ => Err(LodestoreError::MultipleRoots),
        }
    }
}

// ── Canonical rendering ──────────────────────────────────────────

fn render_node(query: &Query, depth: usize, out: &mut String) {
    let pad = "  ".repeat(depth);
    match query {
        Query::All | Query::None => {
            out.push_str(&format!("{pad}node({}){{}}\n", query.kind()));
        }
        Query::Not { field, value }
        | Query::Eq { field, value }
        | Query::Gt { field, value }
        | Query::Gte { field, value }
        | Query::Lt { field, value }
        | Query::Lte { field, value }
        | Query::Contains { field, value } => {
            out.push_str(&format!(
                "{pad}node({}){{ field: {}, value: {} }}\n",
                query.kind(),
                quote(field),
                quote(value)
            ));
        }
        Query::In { field, values } => {
            let rendered: Vec<String> = values.iter().map(|v| quote(v)).collect();
            out.push_str(&format!(
                "{pad}node(IN){{ field: {}, values: [{}] }}\n",
                quote(field),
                rendered.join(",")
            ));
        }
        Query::And(children) | Query::Or(children) => {
            out.push_str(&format!("{pad}node({}){{\n", query.kind()));
            for child in children {
                render_node(child, depth + 1, out);
            }
            out.push_str(&format!("{pad}}}\n"));
        }
    }
}

fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

// ── Canonical parsing ────────────────────────────────────────────

struct CanonParser<'a> {
    src: &'a [u8],
    pos: usize,
}

impl<'a> CanonParser<'a> {
    fn new(text: &'a str) -> Self {
        CanonParser {
            src: text.as_bytes(),
            pos: 0,
        }
    }

    fn parse_nodes(&mut self) -> Result<Vec<Query>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_ws();
            if !self.peek_str("node(") {
                break;
            }
            nodes.push(self.parse_node()?);
        }
        Ok(nodes)
    }

    fn parse_node(&mut self) -> Result<Query> {
        self.expect_str("node(")?;
        let kind = self.take_while(|c| c.is_ascii_alphabetic());
        self.expect_str(")")?;
        self.skip_ws();
        self.expect_str("{")?;
        self.skip_ws();

        let query = match kind.as_str() {
            "ALL" => Query::All,
            "NONE" => Query::None,
            "AND" | "OR" => {
                let children = self.parse_nodes()?;
                if children.is_empty() {
                    return Err(LodestoreError::Query(format!(
                        "{kind} requires at least one child"
                    )));
                }
                if kind == "AND" {
                    Query::And(children)
                } else {
                    Query::Or(children)
                }
            }
            "IN" => {
                let field = self.parse_field()?;
                self.expect_str(",")?;
                self.skip_ws();
                self.expect_str("values:")?;
                self.skip_ws();
                let values = self.parse_string_list()?;
                Query::In { field, values }
            }
            "NOT" | "EQ" | "GT" | "GTE" | "LT" | "LTE" | "CONTAINS" => {
                let field = self.parse_field()?;
                self.expect_str(",")?;
                self.skip_ws();
                self.expect_str("value:")?;
                self.skip_ws();
                let value = self.parse_string()?;
                match kind.as_str() {
                    "NOT" => Query::Not { field, value },
                    "EQ" => Query::Eq { field, value },
                    "GT" => Query::Gt { field, value },
                    "GTE" => Query::Gte { field, value },
                    "LT" => Query::Lt { field, value },
                    "LTE" => Query::Lte { field, value },
                    _ => Query::Contains { field, value },
                }
            }
            other => {
                return Err(LodestoreError::Query(format!("Unknown node kind '{other}'")))
            }
        };

        self.skip_ws();
        self.expect_str("}")?;
        Ok(query)
    }

    fn parse_field(&mut self) -> Result<String> {
        self.expect_str("field:")?;
        self.skip_ws();
        self.parse_string()
    }

    fn parse_string(&mut self) -> Result<String> {
        self.expect_str("\"")?;
        let mut out = Vec::new();
        loop {
            match self.next() {
                Some(b'"') => {
                    return String::from_utf8(out)
                        .map_err(|_| LodestoreError::Query("string is not UTF-8".into()))
                }
                Some(b'\\') => match self.next() {
                    Some(c @ (b'"' | b'\\')) => out.push(c),
                    _ => return Err(LodestoreError::Query("bad escape in string".into())),
                },
                Some(c) => out.push(c),
                None => return Err(LodestoreError::Query("unterminated string".into())),
            }
        }
    }

    fn parse_string_list(&mut self) -> Result<Vec<String>> {
        self.expect_str("[")?;
        let mut values = Vec::new();
        self.skip_ws();
        if self.peek_str("]") {
            self.expect_str("]")?;
            return Ok(values);
        }
        loop {
            self.skip_ws();
            values.push(self.parse_string()?);
            self.skip_ws();
            if self.peek_str(",") {
                self.expect_str(",")?;
            } else {
                break;
            }
        }
        self.skip_ws();
        self.expect_str("]")?;
        Ok(values)
    }

    fn expect_end(&mut self) -> Result<()> {
        self.skip_ws();
        if self.pos < self.src.len() {
            return Err(LodestoreError::Query(format!(
                "trailing input at byte {}",
                self.pos
            )));
        }
        Ok(())
    }

    fn skip_ws(&mut self) {
        while self
            .src
            .get(self.pos)
            .map(|c| c.is_ascii_whitespace())
            .unwrap_or(false)
        {
            self.pos += 1;
        }
    }

    fn peek_str(&self, s: &str) -> bool {
        self.src[self.pos..].starts_with(s.as_bytes())
    }

    fn expect_str(&mut self, s: &str) -> Result<()> {
        if self.peek_str(s) {
            self.pos += s.len();
            Ok(())
        } else {
            Err(LodestoreError::Query(format!(
                "expected '{s}' at byte {}",
                self.pos
            )))
        }
    }

    fn take_while(&mut self, pred: impl Fn(u8) -> bool) -> String {
        let start = self.pos;
        while self.src.get(self.pos).map(|c| pred(*c)).unwrap_or(false) {
            self.pos += 1;
        }
        String::from_utf8_lossy(&self.src[start..self.pos]).into_owned()
    }

    fn next(&mut self) -> Option<u8> {
        let c = self.src.get(self.pos).copied();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }
}
