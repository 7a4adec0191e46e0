//! Sort expressions.

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

impl SortDirection {
    pub const fn as_str(&self) -> &'static str {
        match self {
            SortDirection::Asc => "ASC",
            SortDirection::Desc => "DESC",
        }
    }
}

/// Order by a property path.
///
/// Every segment but the last must name a navigation that a condition has
/// already joined; sorting never introduces joins.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SortExpression {
    pub path: Vec<String>,
    pub direction: SortDirection,
}

impl SortExpression {
    /// Create an ascending sort on a dotted path.
    pub fn asc(path: &str) -> Self {
        Self::new(path, SortDirection::Asc)
    }

    /// Create a descending sort on a dotted path.
    pub fn desc(path: &str) -> Self {
        Self::new(path, SortDirection::Desc)
    }

    pub fn new(path: &str, direction: SortDirection) -> Self {
        Self {
            path: path.split('.').map(str::to_string).collect(),
            direction,
        }
    }

    pub fn path_string(&self) -> String {
        self.path.join(".")
    }
}
