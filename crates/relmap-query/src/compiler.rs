//! Query compiler.
//!
//! Turns a [`Query`] (condition groups, sort list, pagination) plus the entity
//! schema and the active global filters into SQL text and an ordered
//! parameter list. Compilation is memoized: a query is rebuilt only when one
//! of its groups is dirty, its sort or pagination changed, or the filter
//! catalog changed since the last build.
//!
//! The emitted text is backend-neutral. [`Query::to_command`] applies the
//! dialect's pagination rewrite.

use crate::condition::{Junction, Operator, Predicate, QueryCondition, QueryConditionGroup};
use crate::filter::FilterCatalog;
use crate::join::{Join, JoinType};
use crate::sort::SortExpression;
use relmap_core::{
    Command, DELETED_FIELD, Dialect, EntitySchema, Error, FieldInfo, FieldRef, ID_FIELD,
    ParameterSet, QueryErrorKind, Result, SchemaRegistry, SqlType, VERSION_FIELD, Value,
};
use std::collections::HashMap;

/// Declared type of a system field.
pub(crate) fn system_field_type(name: &str) -> SqlType {
    match name {
        DELETED_FIELD => SqlType::Boolean,
        ID_FIELD | VERSION_FIELD => SqlType::BigInt,
        _ => SqlType::Text,
    }
}

/// Comma-joined, alias-qualified select list for a schema.
pub(crate) fn select_list(schema: &EntitySchema, alias: &str) -> String {
    schema
        .columns()
        .iter()
        .map(|c| format!("{}.{}", alias, c))
        .collect::<Vec<_>>()
        .join(", ")
}

#[derive(Debug, Clone)]
struct Compiled {
    command: Command,
    root_alias: String,
    filter_generation: u64,
}

/// A request for entities of one type.
#[derive(Debug, Clone)]
pub struct Query {
    entity_type: &'static str,
    groups: Vec<QueryConditionGroup>,
    sort: Vec<SortExpression>,
    max_results: Option<u64>,
    first_result: Option<u64>,
    shape_dirty: bool,
    compiled: Option<Compiled>,
}

impl Query {
    /// Start an unconditional query over `entity_type`.
    ///
    /// The type is resolved against the schema registry at compile time, so
    /// an unknown name fails there rather than here.
    pub fn new(entity_type: &'static str) -> Self {
        Self {
            entity_type,
            groups: Vec::new(),
            sort: Vec::new(),
            max_results: None,
            first_result: None,
            shape_dirty: true,
            compiled: None,
        }
    }

    /// Entity type the query returns.
    pub fn entity_type(&self) -> &'static str {
        self.entity_type
    }

    /// Append a condition group.
    pub fn group(mut self, group: QueryConditionGroup) -> Self {
        self.add_group(group);
        self
    }

    /// Append a condition group in place.
    ///
    /// The group is linked to the previous one by its own junction; the
    /// first group's junction is ignored.
    pub fn add_group(&mut self, group: QueryConditionGroup) {
        self.groups.push(group);
        self.shape_dirty = true;
    }

    /// AND a predicate onto the existing conditions.
    ///
    /// The existing groups are read as SQL reads them (AND binds tighter than
    /// OR) and distributed over the predicate's disjuncts.
    pub fn filter(mut self, predicate: impl Into<Predicate>) -> Result<Self> {
        let added = predicate.into().lower()?;
        if self.groups.iter().all(QueryConditionGroup::is_empty) {
            self.groups = added;
        } else {
            let existing = disjuncts(&self.groups);
            let added = disjuncts(&added);
            let mut groups = Vec::with_capacity(existing.len() * added.len());
            for e in &existing {
                for a in &added {
                    let junction = if groups.is_empty() {
                        Junction::And
                    } else {
                        Junction::Or
                    };
                    let mut group = QueryConditionGroup::new(junction);
                    for c in e.iter().chain(a.iter()) {
                        group.add((*c).clone());
                    }
                    groups.push(group);
                }
            }
            self.groups = groups;
        }
        self.shape_dirty = true;
        Ok(self)
    }

    /// Caller condition groups in emission order. Global filters are not
    /// included.
    pub fn groups(&self) -> &[QueryConditionGroup] {
        &self.groups
    }

    /// Mutable access to a group; adding to it marks the query for
    /// recompilation.
    pub fn group_mut(&mut self, index: usize) -> Option<&mut QueryConditionGroup> {
        self.groups.get_mut(index)
    }

    /// Append a sort key. Keys apply in the order they are added.
    pub fn order_by(mut self, sort: SortExpression) -> Self {
        self.add_sort(sort);
        self
    }

    /// Append a sort key in place.
    pub fn add_sort(&mut self, sort: SortExpression) {
        self.sort.push(sort);
        self.shape_dirty = true;
    }

    /// Cap the number of rows returned.
    ///
    /// Compiled as a neutral `LIMIT n` marker that the dialect rewrites.
    pub fn max_results(mut self, limit: u64) -> Self {
        self.set_max_results(Some(limit));
        self
    }

    /// Set or clear the row cap. Only an actual change forces a recompile.
    pub fn set_max_results(&mut self, limit: Option<u64>) {
        if self.max_results != limit {
            self.max_results = limit;
            self.shape_dirty = true;
        }
    }

    /// Skip `offset` rows. Ignored unless [`Query::max_results`] is set.
    pub fn first_result(mut self, offset: u64) -> Self {
        self.set_first_result(Some(offset));
        self
    }

    /// Set or clear the row offset.
    pub fn set_first_result(&mut self, offset: Option<u64>) {
        if self.first_result != offset {
            self.first_result = offset;
            self.shape_dirty = true;
        }
    }

    /// Whether the next [`Query::compile`] will rebuild the text.
    pub fn needs_compile(&self, filters: &FilterCatalog) -> bool {
        match &self.compiled {
            None => true,
            Some(c) => {
                self.shape_dirty
                    || self.groups.iter().any(QueryConditionGroup::is_dirty)
                    || c.filter_generation != filters.generation()
            }
        }
    }

    /// Compile to backend-neutral SQL, reusing the previous result when
    /// nothing changed.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = self.entity_type))]
    pub fn compile(
        &mut self,
        registry: &SchemaRegistry,
        filters: &FilterCatalog,
    ) -> Result<&Command> {
        if self.needs_compile(filters) {
            let generation = filters.generation();
            let filter_groups = filters.groups_for(self.entity_type);
            let schema = registry.require(self.entity_type)?;

            let mut c = Compilation::new(registry, schema);
            let where_clause = c.where_clause(&filter_groups, &self.groups)?;
            let order_clause = c.order_by(&self.sort)?;
            let mut sql = format!(
                "SELECT {} {}{}{}",
                select_list(schema, &c.root_alias),
                c.from_clause(),
                where_clause,
                order_clause
            );
            if let Some(limit) = self.max_results {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
            tracing::debug!(
                sql = %sql,
                params = c.params.len(),
                joins = c.joins.len(),
                "Compiled query"
            );

            for group in &mut self.groups {
                group.mark_clean();
            }
            self.shape_dirty = false;
            self.compiled = Some(Compiled {
                command: Command::with_parameters(sql, c.params.into_vec()),
                root_alias: c.root_alias,
                filter_generation: generation,
            });
        } else {
            tracing::trace!("Reusing compiled query");
        }

        self.compiled
            .as_ref()
            .map(|c| &c.command)
            .ok_or_else(|| Error::InvalidOperation("query has not been compiled".to_string()))
    }

    /// Compile and apply the dialect's pagination rewrite.
    pub fn to_command(
        &mut self,
        registry: &SchemaRegistry,
        filters: &FilterCatalog,
        dialect: &dyn Dialect,
    ) -> Result<Command> {
        let limit = self.max_results;
        let offset = self.first_result;
        let command = self.compile(registry, filters)?.clone();
        let alias = self
            .compiled
            .as_ref()
            .map(|c| c.root_alias.clone())
            .unwrap_or_default();
        match limit {
            Some(n) => Ok(Command {
                text: dialect.apply_limit(&command.text, &alias, n, offset),
                parameters: command.parameters,
            }),
            None => {
                if offset.is_some() {
                    tracing::warn!(
                        entity = self.entity_type,
                        "first_result without max_results is ignored"
                    );
                }
                Ok(command)
            }
        }
    }

    /// `SELECT COUNT(*)` over the same joins and conditions.
    ///
    /// Sort and pagination do not apply. Not memoized.
    pub fn count_command(
        &self,
        registry: &SchemaRegistry,
        filters: &FilterCatalog,
    ) -> Result<Command> {
        let filter_groups = filters.groups_for(self.entity_type);
        let schema = registry.require(self.entity_type)?;
        let mut c = Compilation::new(registry, schema);
        let where_clause = c.where_clause(&filter_groups, &self.groups)?;
        let sql = format!("SELECT COUNT(*) {}{}", c.from_clause(), where_clause);
        tracing::debug!(sql = %sql, "Compiled count query");
        Ok(Command::with_parameters(sql, c.params.into_vec()))
    }
}

/// Read groups the way SQL evaluates them: runs of AND-linked groups,
/// separated by OR.
fn disjuncts(groups: &[QueryConditionGroup]) -> Vec<Vec<&QueryCondition>> {
    let mut out: Vec<Vec<&QueryCondition>> = Vec::new();
    for group in groups.iter().filter(|g| !g.is_empty()) {
        match out.last_mut() {
            Some(run) if group.junction() == Junction::And => {
                run.extend(group.conditions());
            }
            _ => out.push(group.conditions().iter().collect()),
        }
    }
    out
}

/// State for one compilation pass.
struct Compilation<'a> {
    registry: &'a SchemaRegistry,
    root: &'a EntitySchema,
    root_alias: String,
    /// Last `aN` suffix handed out.
    alias_counter: usize,
    joins: Vec<Join>,
    join_index: HashMap<(String, &'static str), usize>,
    params: ParameterSet,
}

impl<'a> Compilation<'a> {
    fn new(registry: &'a SchemaRegistry, root: &'a EntitySchema) -> Self {
        Self {
            registry,
            root,
            root_alias: root.alias(),
            alias_counter: 0,
            joins: Vec::new(),
            join_index: HashMap::new(),
            params: ParameterSet::new(),
        }
    }

    fn from_clause(&self) -> String {
        let mut sql = format!("FROM {} {}", self.root.table, self.root_alias);
        for join in &self.joins {
            sql.push(' ');
            sql.push_str(&join.to_sql());
        }
        sql
    }

    /// Join along `nav` from `source_alias`, reusing an existing join for the
    /// same pair.
    fn join(&mut self, source_alias: &str, nav: &FieldInfo, target: &EntitySchema) -> String {
        let key = (source_alias.to_string(), nav.name);
        if let Some(&i) = self.join_index.get(&key) {
            tracing::trace!(alias = %self.joins[i].alias, nav = nav.name, "Reusing join");
            return self.joins[i].alias.clone();
        }
        let alias = self.next_alias();
        self.joins.push(Join {
            join_type: JoinType::for_mandatory(nav.mandatory),
            table: target.table,
            alias: alias.clone(),
            source_alias: source_alias.to_string(),
            navigation: nav.name,
            fk_column: nav.column_name,
        });
        self.join_index.insert(key, self.joins.len() - 1);
        alias
    }

    /// Next `aN` join alias. A root table named like `A1` owns that alias,
    /// so the counter steps over it.
    fn next_alias(&mut self) -> String {
        loop {
            self.alias_counter += 1;
            let alias = format!("a{}", self.alias_counter);
            if alias != self.root_alias {
                return alias;
            }
        }
    }

    fn where_clause(
        &mut self,
        filter_groups: &[QueryConditionGroup],
        groups: &[QueryConditionGroup],
    ) -> Result<String> {
        let mut filter_parts = Vec::new();
        for group in filter_groups {
            if let Some(sql) = self.group(group)? {
                filter_parts.push(sql);
            }
        }

        let mut caller = String::new();
        let mut caller_has_or = false;
        for group in groups {
            let Some(sql) = self.group(group)? else {
                continue;
            };
            if caller.is_empty() {
                caller = sql;
            } else {
                caller_has_or |= group.junction() == Junction::Or;
                caller.push_str(&format!(" {} {}", group.junction().as_str(), sql));
            }
        }

        let clause = match (filter_parts.is_empty(), caller.is_empty()) {
            (true, true) => return Ok(String::new()),
            (true, false) => caller,
            (false, true) => filter_parts.join(" AND "),
            // AND binds tighter than OR, so `(F) AND (G1) OR (G2)` would let
            // rows matching only G2 bypass the filter. Parenthesize the
            // caller's disjunction to keep the filter applied to every row.
            (false, false) if caller_has_or => {
                format!("{} AND ({})", filter_parts.join(" AND "), caller)
            }
            (false, false) => format!("{} AND {}", filter_parts.join(" AND "), caller),
        };
        Ok(format!(" WHERE {}", clause))
    }

    fn group(&mut self, group: &QueryConditionGroup) -> Result<Option<String>> {
        if group.is_empty() {
            return Ok(None);
        }
        let mut terms = Vec::with_capacity(group.conditions().len());
        for condition in group.conditions() {
            terms.push(self.term(condition)?);
        }
        Ok(Some(format!("({})", terms.join(" AND "))))
    }

    fn term(&mut self, cond: &QueryCondition) -> Result<String> {
        let root = self.root;
        let registry = self.registry;
        let path = cond.path_string();
        let unresolved = |msg: String| {
            Error::query_path(QueryErrorKind::UnresolvedPath, root.name, path.clone(), msg)
        };

        if cond.entity_type != root.name {
            return Err(Error::query_path(
                QueryErrorKind::EntityMismatch,
                root.name,
                path.clone(),
                format!(
                    "condition declared on '{}' used in a query for '{}'",
                    cond.entity_type, root.name
                ),
            ));
        }

        let mut schema = root;
        let mut alias = self.root_alias.clone();
        let last = cond.path.len().saturating_sub(1);
        for (i, segment) in cond.path.iter().enumerate() {
            let is_final = i == last;
            match schema.resolve(segment) {
                None => {
                    return Err(unresolved(format!(
                        "unknown field '{}' on '{}'",
                        segment, schema.name
                    )));
                }
                Some(FieldRef::Virtual(v)) => {
                    return Err(unresolved(format!(
                        "virtual field '{}' cannot be queried",
                        v.name
                    )));
                }
                Some(FieldRef::List(l)) => {
                    return Err(unresolved(format!(
                        "collection navigation '{}' cannot appear in a condition",
                        l.name
                    )));
                }
                Some(FieldRef::System(name)) => {
                    if !is_final {
                        return Err(unresolved(format!("'{}' is not a navigation", name)));
                    }
                    return self.comparison(&alias, name, system_field_type(name), false, cond);
                }
                Some(FieldRef::Field(f)) => match f.references {
                    Some(_) if is_final => return self.navigation_comparison(&alias, f, cond),
                    Some(target) => {
                        let target = registry.require(target)?;
                        alias = self.join(&alias, f, target);
                        schema = target;
                    }
                    None if is_final => {
                        return self.comparison(
                            &alias,
                            f.column_name,
                            f.sql_type,
                            f.nullable(),
                            cond,
                        );
                    }
                    None => {
                        return Err(unresolved(format!("'{}' is not a navigation", f.name)));
                    }
                },
            }
        }
        Err(Error::query_path(
            QueryErrorKind::Malformed,
            root.name,
            path.clone(),
            "empty property path",
        ))
    }

    fn comparison(
        &mut self,
        alias: &str,
        column: &str,
        db_type: SqlType,
        nullable: bool,
        cond: &QueryCondition,
    ) -> Result<String> {
        let lhs = format!("{}.{}", alias, column);
        if let Some(op) = cond.operator.as_sql() {
            let placeholder = self.params.bind(cond.value.clone(), db_type, nullable);
            return Ok(format!("{} {} {}", lhs, op, placeholder));
        }
        match &cond.operator {
            op @ (Operator::StartsWith | Operator::EndsWith | Operator::Contains) => {
                let pattern = cond
                    .value
                    .as_str()
                    .and_then(|text| op.like_pattern(text))
                    .ok_or_else(|| {
                        Error::query_path(
                            QueryErrorKind::Malformed,
                            self.root.name,
                            cond.path_string(),
                            format!("{} requires a text argument", op),
                        )
                    })?;
                let placeholder = self.params.bind(Value::Text(pattern), db_type, nullable);
                Ok(format!("{} LIKE {}", lhs, placeholder))
            }
            other => Err(Error::NotSupported(format!(
                "method '{}' on {}.{}",
                other,
                self.root.name,
                cond.path_string()
            ))),
        }
    }

    /// Compare a navigation by its foreign-key column, without joining.
    fn navigation_comparison(
        &mut self,
        alias: &str,
        nav: &FieldInfo,
        cond: &QueryCondition,
    ) -> Result<String> {
        let lhs = format!("{}.{}", alias, nav.column_name);
        if cond.value.is_null() {
            return match cond.operator {
                Operator::Eq => Ok(format!("{} IS NULL", lhs)),
                Operator::Ne => Ok(format!("{} IS NOT NULL", lhs)),
                ref other => Err(Error::NotSupported(format!(
                    "'{}' against null on navigation {}.{}",
                    other,
                    self.root.name,
                    cond.path_string()
                ))),
            };
        }
        let Some(op) = cond.operator.as_sql() else {
            return Err(Error::NotSupported(format!(
                "method '{}' on navigation {}.{}",
                cond.operator,
                self.root.name,
                cond.path_string()
            )));
        };
        let id = cond.value.as_i64().ok_or_else(|| {
            Error::query_path(
                QueryErrorKind::Malformed,
                self.root.name,
                cond.path_string(),
                format!(
                    "navigation compares with an id, got {}",
                    cond.value.type_name()
                ),
            )
        })?;
        let placeholder = self
            .params
            .bind(Value::BigInt(id), SqlType::BigInt, nav.nullable());
        Ok(format!("{} {} {}", lhs, op, placeholder))
    }

    fn order_by(&self, sort: &[SortExpression]) -> Result<String> {
        if sort.is_empty() {
            return Ok(String::new());
        }
        let unresolved = |s: &SortExpression, msg: String| {
            Error::query_path(
                QueryErrorKind::UnresolvedSort,
                self.root.name,
                s.path_string(),
                msg,
            )
        };

        let mut parts = Vec::with_capacity(sort.len());
        for s in sort {
            let Some((last, navs)) = s.path.split_last() else {
                return Err(unresolved(s, "empty sort path".to_string()));
            };
            let mut schema = self.root;
            let mut alias = self.root_alias.clone();
            for segment in navs {
                let Some(nav) = schema.get_field(segment).filter(|f| f.is_navigation()) else {
                    return Err(unresolved(
                        s,
                        format!("'{}' is not a navigation on '{}'", segment, schema.name),
                    ));
                };
                let Some(&i) = self.join_index.get(&(alias.clone(), nav.name)) else {
                    return Err(unresolved(
                        s,
                        format!("no join for '{}'; sorting cannot add joins", nav.name),
                    ));
                };
                alias = self.joins[i].alias.clone();
                schema = self.registry.require(nav.references.unwrap_or_default())?;
            }
            let column = match schema.resolve(last) {
                Some(FieldRef::System(name)) => name,
                Some(FieldRef::Field(f)) => f.column_name,
                _ => {
                    return Err(unresolved(
                        s,
                        format!("'{}' is not a sortable field on '{}'", last, schema.name),
                    ));
                }
            };
            parts.push(format!("{}.{} {}", alias, column, s.direction.as_str()));
        }
        Ok(format!(" ORDER BY {}", parts.join(", ")))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::condition::QueryCondition as C;
    use relmap_core::{Cascade, EntitySchema, FieldInfo, ListFieldInfo, Postgres, VirtualFieldInfo};

    pub(crate) fn registry() -> SchemaRegistry {
        let mut r = SchemaRegistry::new();
        r.register(
            EntitySchema::new("Artist")
                .field(FieldInfo::new("Alias", "Alias", SqlType::VarChar(50)).mandatory(true))
                .field(
                    FieldInfo::reference("AnotherArtist", "AnotherArtist", "Artist")
                        .mandatory(true)
                        .cascade(Cascade::Save),
                )
                .field(FieldInfo::reference("Label", "LabelId", "Label"))
                .list_field(ListFieldInfo::new("Fans", "Artist", "AnotherArtist"))
                .virtual_field(VirtualFieldInfo::new("DisplayName", SqlType::Text)),
        )
        .unwrap();
        r.register(
            EntitySchema::new("Label")
                .field(FieldInfo::new("Name", "Name", SqlType::VarChar(100)))
                .field(FieldInfo::reference("Country", "CountryId", "Country").mandatory(true)),
        )
        .unwrap();
        r.register(
            EntitySchema::new("Country").field(FieldInfo::new("Name", "Name", SqlType::Text)),
        )
        .unwrap();
        r.validate().unwrap();
        r
    }

    const ARTIST_COLS: &str =
        "artist.Id, artist.Deleted, artist.Version, artist.Alias, artist.AnotherArtist, artist.LabelId";

    fn one(cond: C) -> Query {
        Query::new("Artist").group(QueryConditionGroup::default().with(cond))
    }

    fn compile(q: &mut Query) -> Result<Command> {
        q.compile(&registry(), &FilterCatalog::new()).cloned()
    }

    #[test]
    fn self_reference_not_null_joins_once() {
        let mut q = one(C::ne("Artist", "AnotherArtist.Alias", Value::Null));
        let cmd = compile(&mut q).unwrap();
        assert_eq!(
            cmd.text,
            format!(
                "SELECT {} FROM Artist artist INNER JOIN Artist a1 ON a1.Id = artist.AnotherArtist WHERE (a1.Alias <> @p1)",
                ARTIST_COLS
            )
        );
        assert_eq!(cmd.parameters.len(), 1);
        assert_eq!(cmd.parameters[0].value, Value::Null);
        assert_eq!(cmd.parameters[0].db_type, SqlType::VarChar(50));
        assert!(!cmd.parameters[0].nullable);
    }

    #[test]
    fn no_conditions_no_where() {
        let mut q = Query::new("Artist");
        let cmd = compile(&mut q).unwrap();
        assert_eq!(cmd.text, format!("SELECT {} FROM Artist artist", ARTIST_COLS));
        assert!(cmd.parameters.is_empty());
    }

    #[test]
    fn groups_link_by_their_junctions() {
        let mut q = Query::new("Artist")
            .group(
                QueryConditionGroup::new(Junction::Or)
                    .with(C::eq("Artist", "Alias", "a"))
                    .with(C::eq("Artist", "Version", 1_i64)),
            )
            .group(QueryConditionGroup::new(Junction::Or).with(C::eq("Artist", "Alias", "b")))
            .group(QueryConditionGroup::new(Junction::And).with(C::eq("Artist", "Id", 3_i64)));
        let cmd = compile(&mut q).unwrap();
        assert!(cmd.text.ends_with(
            "WHERE (artist.Alias = @p1 AND artist.Version = @p2) OR (artist.Alias = @p3) AND (artist.Id = @p4)"
        ));
        let names: Vec<_> = cmd.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["p1", "p2", "p3", "p4"]);
    }

    #[test]
    fn shared_prefix_produces_one_join() {
        let mut q = Query::new("Artist").group(
            QueryConditionGroup::default()
                .with(C::eq("Artist", "Label.Country.Name", "NL"))
                .with(C::eq("Artist", "Label.Name", "x")),
        );
        let cmd = compile(&mut q).unwrap();
        assert_eq!(cmd.text.matches("JOIN Label").count(), 1);
        assert!(cmd.text.contains(
            "LEFT JOIN Label a1 ON a1.Id = artist.LabelId INNER JOIN Country a2 ON a2.Id = a1.CountryId"
        ));
        assert!(cmd.text.ends_with("WHERE (a2.Name = @p1 AND a1.Name = @p2)"));
    }

    #[test]
    fn join_type_follows_mandatory_flag() {
        let mut q = one(C::eq("Artist", "AnotherArtist.Alias", "x"));
        assert!(compile(&mut q).unwrap().text.contains("INNER JOIN Artist a1"));
        let mut q = one(C::eq("Artist", "Label.Name", "x"));
        assert!(compile(&mut q).unwrap().text.contains("LEFT JOIN Label a1"));
    }

    #[test]
    fn null_navigation_compares_fk_without_join() {
        let mut q = one(C::eq("Artist", "Label", Value::Null));
        let cmd = compile(&mut q).unwrap();
        assert!(!cmd.text.contains("JOIN"));
        assert!(cmd.text.ends_with("WHERE (artist.LabelId IS NULL)"));
        assert!(cmd.parameters.is_empty());

        let mut q = one(C::ne("Artist", "AnotherArtist", Value::Null));
        let cmd = compile(&mut q).unwrap();
        assert!(!cmd.text.contains("JOIN"));
        assert!(cmd.text.ends_with("WHERE (artist.AnotherArtist IS NOT NULL)"));
    }

    #[test]
    fn navigation_compares_with_id() {
        let mut q = one(C::eq("Artist", "Label", 7_i64));
        let cmd = compile(&mut q).unwrap();
        assert!(cmd.text.ends_with("WHERE (artist.LabelId = @p1)"));
        assert_eq!(cmd.parameters[0].value, Value::BigInt(7));
    }

    #[test]
    fn string_methods_bind_like_patterns() {
        for (op, expected) in [
            (Operator::Contains, "%abc%"),
            (Operator::StartsWith, "abc%"),
            (Operator::EndsWith, "%abc"),
        ] {
            let mut q = one(C::new("Artist", "Alias", op, "abc"));
            let cmd = compile(&mut q).unwrap();
            assert!(cmd.text.ends_with("WHERE (artist.Alias LIKE @p1)"));
            assert_eq!(cmd.parameters[0].value, Value::from(expected));
        }
    }

    #[test]
    fn unknown_method_is_not_supported() {
        let mut q = one(C::new("Artist", "Alias", Operator::Method("Trim".into()), "x"));
        assert!(matches!(compile(&mut q), Err(Error::NotSupported(_))));
    }

    #[test]
    fn unresolvable_paths_fail() {
        for path in ["Nope", "DisplayName", "Fans.Alias", "Alias.Length", "Label.Nope"] {
            let mut q = one(C::eq("Artist", path, 1_i64));
            let err = compile(&mut q).unwrap_err();
            assert_eq!(err.query_kind(), Some(QueryErrorKind::UnresolvedPath), "{path}");
        }
    }

    #[test]
    fn entity_mismatch_fails() {
        let mut q = one(C::eq("Label", "Name", "x"));
        let err = compile(&mut q).unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::EntityMismatch));
    }

    #[test]
    fn sort_uses_existing_join() {
        let mut q = one(C::eq("Artist", "Label.Name", "x"))
            .order_by(SortExpression::desc("Label.Name"))
            .order_by(SortExpression::asc("Alias"));
        let cmd = compile(&mut q).unwrap();
        assert!(cmd.text.ends_with("ORDER BY a1.Name DESC, artist.Alias ASC"));
    }

    #[test]
    fn sort_without_join_fails() {
        let mut q = Query::new("Artist").order_by(SortExpression::asc("Label.Name"));
        let err = compile(&mut q).unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::UnresolvedSort));
    }

    #[test]
    fn limit_marker_and_memoization() {
        let registry = registry();
        let filters = FilterCatalog::new();
        let mut q = one(C::eq("Artist", "Alias", "x")).max_results(5);
        let first = q.compile(&registry, &filters).unwrap().text.clone();
        assert!(first.ends_with(" LIMIT 5"));
        assert!(!q.needs_compile(&filters));
        let second = q.compile(&registry, &filters).unwrap().text.clone();
        assert_eq!(first, second);

        q.set_max_results(None);
        assert!(q.needs_compile(&filters));
        assert!(!q.compile(&registry, &filters).unwrap().text.contains("LIMIT"));
    }

    #[test]
    fn dirty_group_triggers_recompile() {
        let registry = registry();
        let filters = FilterCatalog::new();
        let mut q = one(C::eq("Artist", "Alias", "x"));
        q.compile(&registry, &filters).unwrap();
        q.group_mut(0).unwrap().add(C::eq("Artist", "Id", 1_i64));
        assert!(q.needs_compile(&filters));
        let cmd = q.compile(&registry, &filters).unwrap();
        assert!(cmd.text.ends_with("(artist.Alias = @p1 AND artist.Id = @p2)"));
    }

    #[test]
    fn global_filter_prepends_and_clears() {
        let registry = registry();
        let filters = FilterCatalog::new();
        let mut q = one(C::eq("Artist", "Alias", "x"));
        let plain = q.compile(&registry, &filters).unwrap().text.clone();

        filters
            .register("Artist", C::eq("Artist", "Deleted", false).into())
            .unwrap();
        let cmd = q.compile(&registry, &filters).unwrap().clone();
        assert!(cmd.text.ends_with("WHERE (artist.Deleted = @p1) AND (artist.Alias = @p2)"));
        assert_eq!(cmd.parameters[0].value, Value::Bool(false));

        filters.clear();
        assert_eq!(q.compile(&registry, &filters).unwrap().text, plain);
    }

    #[test]
    fn join_aliases_step_over_the_root_alias() {
        let mut r = SchemaRegistry::new();
        r.register(
            EntitySchema::new("A1")
                .field(FieldInfo::new("Name", "Name", SqlType::Text))
                .field(FieldInfo::reference("Parent", "ParentId", "A1").mandatory(true)),
        )
        .unwrap();
        r.validate().unwrap();

        let mut q = Query::new("A1")
            .group(QueryConditionGroup::default().with(C::eq("A1", "Parent.Name", "x")));
        let cmd = q.compile(&r, &FilterCatalog::new()).unwrap();
        assert_eq!(
            cmd.text,
            "SELECT a1.Id, a1.Deleted, a1.Version, a1.Name, a1.ParentId FROM A1 a1 \
             INNER JOIN A1 a2 ON a2.Id = a1.ParentId WHERE (a2.Name = @p1)"
        );
    }

    #[test]
    fn caller_or_is_wrapped_under_filter() {
        let registry = registry();
        let filters = FilterCatalog::new();
        filters
            .register("Artist", C::eq("Artist", "Deleted", false).into())
            .unwrap();
        let mut q = Query::new("Artist")
            .filter(Predicate::from(C::eq("Artist", "Id", 1_i64)).or(C::eq("Artist", "Id", 2_i64)))
            .unwrap();
        let cmd = q.compile(&registry, &filters).unwrap();
        assert!(cmd.text.ends_with(
            "WHERE (artist.Deleted = @p1) AND ((artist.Id = @p2) OR (artist.Id = @p3))"
        ));
    }

    #[test]
    fn filter_distributes_over_existing_groups() {
        let q = Query::new("Artist")
            .filter(Predicate::from(C::eq("Artist", "Id", 1_i64)).or(C::eq("Artist", "Id", 2_i64)))
            .unwrap()
            .filter(C::eq("Artist", "Alias", "x"))
            .unwrap();
        assert_eq!(q.groups().len(), 2);
        assert_eq!(q.groups()[1].junction(), Junction::Or);
        assert_eq!(q.groups()[1].conditions().len(), 2);
    }

    #[test]
    fn to_command_applies_dialect() {
        let registry = registry();
        let filters = FilterCatalog::new();
        let mut q = Query::new("Artist").max_results(5).first_result(10);
        let cmd = q.to_command(&registry, &filters, &Postgres).unwrap();
        assert!(cmd.text.ends_with("FROM Artist artist LIMIT 5 OFFSET 10"));
    }

    #[test]
    fn count_uses_same_where() {
        let q = one(C::eq("Artist", "Label.Name", "x"))
            .order_by(SortExpression::asc("Alias"))
            .max_results(3);
        let cmd = q.count_command(&registry(), &FilterCatalog::new()).unwrap();
        assert_eq!(
            cmd.text,
            "SELECT COUNT(*) FROM Artist artist LEFT JOIN Label a1 ON a1.Id = artist.LabelId WHERE (a1.Name = @p1)"
        );
    }

    #[test]
    fn unknown_entity_fails() {
        let mut q = Query::new("Nope");
        let err = compile(&mut q).unwrap_err();
        assert_eq!(err.query_kind(), Some(QueryErrorKind::UnknownEntity));
    }
}
