//! Condition model: terms, AND-ed groups, and the predicate combinator.

use relmap_core::{Error, QueryErrorKind, Result, Value};
use std::fmt;

/// Comparison operator or string membership method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
    StartsWith,
    EndsWith,
    Contains,
    /// Any other method call; always rejected at compile time.
    Method(String),
}

impl Operator {
    /// SQL text for plain comparisons.
    pub const fn as_sql(&self) -> Option<&'static str> {
        match self {
            Operator::Eq => Some("="),
            Operator::Ne => Some("<>"),
            Operator::Gt => Some(">"),
            Operator::Ge => Some(">="),
            Operator::Lt => Some("<"),
            Operator::Le => Some("<="),
            _ => None,
        }
    }

    /// Pattern for the string methods that translate to `LIKE`.
    pub fn like_pattern(&self, value: &str) -> Option<String> {
        match self {
            Operator::StartsWith => Some(format!("{}%", value)),
            Operator::EndsWith => Some(format!("%{}", value)),
            Operator::Contains => Some(format!("%{}%", value)),
            _ => None,
        }
    }

    /// Logical negation, where one exists.
    pub fn negate(&self) -> Option<Operator> {
        match self {
            Operator::Eq => Some(Operator::Ne),
            Operator::Ne => Some(Operator::Eq),
            Operator::Gt => Some(Operator::Le),
            Operator::Ge => Some(Operator::Lt),
            Operator::Lt => Some(Operator::Ge),
            Operator::Le => Some(Operator::Gt),
            _ => None,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operator::StartsWith => f.write_str("StartsWith"),
            Operator::EndsWith => f.write_str("EndsWith"),
            Operator::Contains => f.write_str("Contains"),
            Operator::Method(name) => f.write_str(name),
            op => f.write_str(op.as_sql().unwrap_or("?")),
        }
    }
}

/// One predicate term: `path operator value`, declared against an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCondition {
    pub entity_type: &'static str,
    pub path: Vec<String>,
    pub operator: Operator,
    pub value: Value,
}

impl QueryCondition {
    /// Create a condition from a dotted property path (`"Label.Name"`).
    pub fn new(
        entity_type: &'static str,
        path: &str,
        operator: Operator,
        value: impl Into<Value>,
    ) -> Self {
        Self {
            entity_type,
            path: path.split('.').map(str::to_string).collect(),
            operator,
            value: value.into(),
        }
    }

    pub fn eq(entity_type: &'static str, path: &str, value: impl Into<Value>) -> Self {
        Self::new(entity_type, path, Operator::Eq, value)
    }

    pub fn ne(entity_type: &'static str, path: &str, value: impl Into<Value>) -> Self {
        Self::new(entity_type, path, Operator::Ne, value)
    }

    /// Dotted form of the path.
    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}

/// Linkage of a group to the group before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Junction {
    #[default]
    And,
    Or,
}

impl Junction {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Junction::And => "AND",
            Junction::Or => "OR",
        }
    }
}

/// AND-ed conditions, linked to the previous group by `junction`.
///
/// Adding a condition sets the dirty flag, which forces the owning query to
/// recompile.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryConditionGroup {
    conditions: Vec<QueryCondition>,
    junction: Junction,
    dirty: bool,
}

impl QueryConditionGroup {
    pub fn new(junction: Junction) -> Self {
        Self {
            conditions: Vec::new(),
            junction,
            dirty: true,
        }
    }

    /// Builder form of [`QueryConditionGroup::add`].
    pub fn with(mut self, condition: QueryCondition) -> Self {
        self.add(condition);
        self
    }

    pub fn add(&mut self, condition: QueryCondition) {
        self.conditions.push(condition);
        self.dirty = true;
    }

    pub fn set_junction(&mut self, junction: Junction) {
        if self.junction != junction {
            self.junction = junction;
            self.dirty = true;
        }
    }

    pub fn junction(&self) -> Junction {
        self.junction
    }

    pub fn conditions(&self) -> &[QueryCondition] {
        &self.conditions
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

impl Default for QueryConditionGroup {
    fn default() -> Self {
        Self::new(Junction::And)
    }
}

/// Predicate combinator, lowered into condition groups.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare(QueryCondition),
    And(Box<Predicate>, Box<Predicate>),
    Or(Box<Predicate>, Box<Predicate>),
    Not(Box<Predicate>),
}

impl From<QueryCondition> for Predicate {
    fn from(condition: QueryCondition) -> Self {
        Predicate::Compare(condition)
    }
}

impl Predicate {
    pub fn and(self, other: impl Into<Predicate>) -> Self {
        Predicate::And(Box::new(self), Box::new(other.into()))
    }

    pub fn or(self, other: impl Into<Predicate>) -> Self {
        Predicate::Or(Box::new(self), Box::new(other.into()))
    }

    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Lower into groups: an OR of AND-ed groups.
    ///
    /// The first group is linked with `Junction::And`, the rest with
    /// `Junction::Or`. Negations are pushed down to the terms; a negated
    /// string method has no term form and fails as malformed.
    pub fn lower(self) -> Result<Vec<QueryConditionGroup>> {
        let disjuncts = self.into_dnf(false)?;
        Ok(disjuncts
            .into_iter()
            .enumerate()
            .map(|(i, conditions)| {
                let mut group =
                    QueryConditionGroup::new(if i == 0 { Junction::And } else { Junction::Or });
                for c in conditions {
                    group.add(c);
                }
                group
            })
            .collect())
    }

    fn into_dnf(self, negated: bool) -> Result<Vec<Vec<QueryCondition>>> {
        match (self, negated) {
            (Predicate::Compare(c), false) => Ok(vec![vec![c]]),
            (Predicate::Compare(mut c), true) => {
                let op = c.operator.negate().ok_or_else(|| {
                    Error::query(
                        QueryErrorKind::Malformed,
                        format!("cannot negate '{}' on {}", c.operator, c.path_string()),
                    )
                })?;
                c.operator = op;
                Ok(vec![vec![c]])
            }
            (Predicate::Not(inner), n) => inner.into_dnf(!n),
            (Predicate::And(a, b), false) | (Predicate::Or(a, b), true) => {
                let left = a.into_dnf(negated)?;
                let right = b.into_dnf(negated)?;
                let mut out = Vec::with_capacity(left.len() * right.len());
                for l in &left {
                    for r in &right {
                        let mut conj = l.clone();
                        conj.extend(r.iter().cloned());
                        out.push(conj);
                    }
                }
                Ok(out)
            }
            (Predicate::Or(a, b), false) | (Predicate::And(a, b), true) => {
                let mut left = a.into_dnf(negated)?;
                left.extend(b.into_dnf(negated)?);
                Ok(left)
            }
        }
    }
}
