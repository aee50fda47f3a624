//! Query builder that splits joins across partitions.
//!
//! Tables of a [`PartitionSplit`] live on a different database than the rest,
//! so a join onto them cannot run as SQL. The builder keeps one main query
//! and opens a sub-query per partition that is joined in; where clauses and
//! selects are routed to the query owning the columns they reference, and the
//! rows are joined in memory by [`PartitionedResult`].
//!
//! ```text
//!   from(filecache f)                    main:  SELECT f.fileid, f.name FROM filecache f
//!   inner_join(f, share s, f.fileid =    shares: SELECT s.share_with, s.file_source
//!              s.file_source)                     FROM share s
//!   and_where(s.share_type = 0)                   WHERE s.share_type = 0
//!                                                   AND s.file_source IN (:keys)
//! ```
//!
//! Joining from a partition table back onto the main database works the same
//! way through a `from_<partition>` pseudo-partition. Only reads can be
//! split.

use crate::join::JoinCondition;
use crate::query::PartitionQuery;
use crate::result::PartitionedResult;
use crate::split::PartitionSplit;
use dbsplit_core::{
    ColumnRef, CompositeKind, Connection, Expr, JoinMode, ParamType, Parameters, QueryBuilder, QueryBuilderFactory,
    QueryError, QueryType, Result, ResultCursor, SelectItem, Value,
};
use parking_lot::Mutex;
use std::sync::Arc;

/// Prefix of the pseudo-partitions used for joins out of a partition.
pub const FROM_PREFIX: &str = "from_";

/// A [`QueryBuilder`] that splits a query along partition boundaries.
pub struct PartitionedQueryBuilder {
    factory: Arc<dyn QueryBuilderFactory>,
    main: Box<dyn QueryBuilder>,
    partitions: Vec<PartitionSplit>,
    main_partition: Option<usize>,
    split_queries: Vec<Arc<Mutex<PartitionQuery>>>,
    /// Selects are held back until every alias is known
    selects: Vec<SelectItem>,
    /// Join columns the merge needs, selected unless the user already did
    implicit_columns: Vec<ColumnRef>,
    /// Output names removed from merged rows
    hidden_columns: Vec<String>,
    has_positional: bool,
    shard_hints: Vec<(String, Value)>,
    all_shards: bool,
}

impl PartitionedQueryBuilder {
    pub fn new(factory: Arc<dyn QueryBuilderFactory>, partitions: Vec<PartitionSplit>) -> Self {
        let main = factory.create(None);
        Self {
            factory,
            main,
            partitions,
            main_partition: None,
            split_queries: Vec::new(),
            selects: Vec::new(),
            implicit_columns: Vec::new(),
            hidden_columns: Vec::new(),
            has_positional: false,
            shard_hints: Vec::new(),
            all_shards: false,
        }
    }

    pub fn add_partition(&mut self, partition: PartitionSplit) {
        self.partitions.push(partition);
    }

    /// Number of queries the builder will run: the main query plus one per split.
    pub fn partition_count(&self) -> usize {
        self.split_queries.len() + 1
    }

    /// Name of the partition the main query reads from, if any.
    pub fn main_partition(&self) -> Option<&str> {
        self.main_partition.map(|i| self.partitions[i].name.as_str())
    }

    fn partition_index(&self, name: &str) -> Option<usize> {
        self.partitions.iter().position(|p| p.contains(name))
    }

    fn partition_by_name(&self, name: &str) -> Option<usize> {
        self.partitions.iter().position(|p| p.name == name)
    }

    fn split(&self, partition: &str) -> Option<Arc<Mutex<PartitionQuery>>> {
        self.split_queries
            .iter()
            .find(|s| s.lock().partition == partition)
            .cloned()
    }

    /// Records a join column the merge needs in the rows.
    fn ensure_select(&mut self, column: &ColumnRef) {
        if !self.implicit_columns.contains(column) {
            self.implicit_columns.push(column.clone());
        }
    }

    /// Join columns still to be selected, and whether each one has to be
    /// removed from the merged rows again.
    ///
    /// A column selected by the user under the same qualifier needs nothing.
    /// Otherwise it is selected, and hidden only when no user select produces
    /// an output column of the same name.
    fn pending_implicit(&self) -> Vec<(ColumnRef, bool)> {
        let select_all = self.selects.iter().any(|s| {
            s.expr
                .as_column()
                .is_some_and(|c| c.qualifier.is_none() && c.is_wildcard())
        });
        self.implicit_columns
            .iter()
            .filter(|column| {
                !self.selects.iter().any(|s| {
                    s.alias.is_none()
                        && s.expr.as_column().is_some_and(|c| {
                            c.qualifier == column.qualifier && (c.name == column.name || c.is_wildcard())
                        })
                })
            })
            .map(|column| {
                let produced = select_all
                    || self
                        .selects
                        .iter()
                        .any(|s| s.output_name().as_deref() == Some(column.name.as_str()));
                (column.clone(), !produced)
            })
            .collect()
    }

    /// Hands the buffered selects to the queries owning their columns.
    fn apply_selects(&mut self) {
        for (column, hidden) in self.pending_implicit() {
            if hidden && !self.hidden_columns.contains(&column.name) {
                self.hidden_columns.push(column.name.clone());
            }
            self.selects.push(SelectItem::new(Expr::Column(column)));
        }
        self.implicit_columns.clear();
        for item in std::mem::take(&mut self.selects) {
            let target = self
                .partitions
                .iter()
                .filter(|p| p.is_column_in_partition(&item.expr))
                .find_map(|p| self.split(&p.name));
            let SelectItem { expr, alias } = item;
            match target {
                Some(split) => {
                    let mut split = split.lock();
                    match alias {
                        Some(alias) => split.query.select_alias(expr, &alias),
                        None => split.query.add_select(vec![expr]),
                    }
                }
                None => match alias {
                    Some(alias) => self.main.select_alias(expr, &alias),
                    None => self.main.add_select(vec![expr]),
                },
            }
        }
    }

    fn open_split(
        &mut self,
        name: &str,
        query_partition: Option<&str>,
        table: &str,
        alias: &str,
        join: JoinCondition,
        mode: JoinMode,
    ) -> Result<()> {
        let (Some(join_from), Some(join_to)) = (join.from_column, join.to_column) else {
            return Err(QueryError::MalformedPredicate(format!(
                "No join condition found for {}",
                table
            )));
        };
        let mut query = self.factory.create(query_partition);
        for (column, value) in &self.shard_hints {
            query.hint_shard_key(column, value.clone());
        }
        if self.all_shards {
            query.run_across_all_shards();
        }
        query.from(table, Some(alias));
        if !join.to_conditions.is_empty() {
            query.and_where(join.to_conditions);
        }
        if !join.from_conditions.is_empty() {
            self.main.and_where(join.from_conditions);
        }
        self.ensure_select(&join_from);
        self.ensure_select(&join_to);
        tracing::debug!(partition = name, table, from = %join_from, to = %join_to, "split query on partition");
        self.split_queries
            .push(Arc::new(Mutex::new(PartitionQuery::new(name, query, join_from, join_to, mode))));
        Ok(())
    }

    /// Join from the main query onto the tables of partition `index`.
    fn join_into_partition(
        &mut self,
        index: usize,
        from_alias: &str,
        table: &str,
        alias: &str,
        condition: Option<Expr>,
        mode: JoinMode,
    ) -> Result<()> {
        let join = JoinCondition::parse(condition.as_ref(), table, alias, from_alias)?;
        self.partitions[index].add_alias(table, alias);
        let name = self.partitions[index].name.clone();
        match self.split(&name) {
            None => self.open_split(&name, Some(&name), table, alias, join, mode),
            Some(split) if self.partitions[index].contains_alias(from_alias) => {
                split.lock().query.inner_join(from_alias, table, alias, condition)
            }
            Some(_) => Err(QueryError::UnsupportedPartitionedOperation(
                "Can't join across partition boundaries more than once".into(),
            )),
        }
    }

    /// Join from a table of partition `index` onto a table of the main database.
    fn join_out_of_partition(
        &mut self,
        index: usize,
        from_alias: &str,
        table: &str,
        alias: &str,
        condition: Option<Expr>,
        mode: JoinMode,
    ) -> Result<()> {
        let join = JoinCondition::parse(condition.as_ref(), table, alias, from_alias)?;
        let from_name = &self.partitions[index].name;
        let name = if from_name.starts_with(FROM_PREFIX) {
            from_name.clone()
        } else {
            format!("{}{}", FROM_PREFIX, from_name)
        };
        match self.split(&name) {
            None => {
                let mut split = PartitionSplit::new(name.clone(), [table]);
                split.add_alias(table, alias);
                self.partitions.push(split);
                self.open_split(&name, None, table, alias, join, mode)
            }
            Some(split) => {
                let split_index = self.partition_by_name(&name);
                match split_index {
                    Some(i) if self.partitions[i].contains_alias(from_alias) => {
                        self.partitions[i].add_table(table);
                        self.partitions[i].add_alias(table, alias);
                        split.lock().query.inner_join(from_alias, table, alias, condition)
                    }
                    _ => Err(QueryError::UnsupportedPartitionedOperation(
                        "Can't join across partition boundaries more than once".into(),
                    )),
                }
            }
        }
    }

    /// Groups predicates by the query that has to evaluate them. The main
    /// query comes first, splits in order of first appearance.
    fn route_predicates(&mut self, predicates: Vec<Expr>) -> Vec<(Option<Arc<Mutex<PartitionQuery>>>, Vec<Expr>)> {
        let mut main = Vec::new();
        let mut splits: Vec<(String, Arc<Mutex<PartitionQuery>>, Vec<Expr>)> = Vec::new();
        for predicate in flatten(predicates) {
            if predicate.has_positional_parameter() {
                self.has_positional = true;
            }
            let target = self
                .partitions
                .iter()
                .position(|p| p.check_predicate(&predicate))
                .filter(|i| Some(*i) != self.main_partition)
                .and_then(|i| {
                    let name = &self.partitions[i].name;
                    self.split(name).map(|split| (name.clone(), split))
                });
            match target {
                Some((name, split)) => match splits.iter_mut().find(|(n, _, _)| *n == name) {
                    Some((_, _, parts)) => parts.push(predicate),
                    None => splits.push((name, split, vec![predicate])),
                },
                None => main.push(predicate),
            }
        }

        let mut routed = Vec::with_capacity(splits.len() + 1);
        if !main.is_empty() {
            routed.push((None, main));
        }
        routed.extend(splits.into_iter().map(|(_, split, parts)| (Some(split), parts)));
        routed
    }
}

fn flatten(predicates: Vec<Expr>) -> Vec<Expr> {
    let mut flat = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        match predicate {
            Expr::Composite {
                kind: CompositeKind::And,
                parts,
            } => flat.extend(flatten(parts)),
            other => flat.push(other),
        }
    }
    flat
}

impl QueryBuilder for PartitionedQueryBuilder {
    fn select(&mut self, selects: Vec<Expr>) {
        self.selects.clear();
        self.add_select(selects);
    }

    fn add_select(&mut self, selects: Vec<Expr>) {
        self.selects.extend(selects.into_iter().map(SelectItem::new));
    }

    fn select_alias(&mut self, select: Expr, alias: &str) {
        self.selects.push(SelectItem::aliased(select, alias));
    }

    fn from(&mut self, table: &str, alias: Option<&str>) {
        if let Some(index) = self.partition_index(table) {
            self.main_partition = Some(index);
            if let Some(alias) = alias {
                self.partitions[index].add_alias(table, alias);
            }
        }
        self.main.from(table, alias);
    }

    fn join(
        &mut self,
        from_alias: &str,
        table: &str,
        alias: &str,
        condition: Option<Expr>,
        mode: JoinMode,
    ) -> Result<()> {
        let partition = self.partition_index(table);
        let from_partition = self.partition_index(from_alias);
        let into = partition.filter(|p| Some(*p) != self.main_partition);
        let out_of = from_partition.filter(|p| Some(*p) != partition);

        if (into.is_some() || out_of.is_some()) && mode == JoinMode::Right {
            return Err(QueryError::UnsupportedPartitionedOperation(format!(
                "Can't right join {} across a partition boundary",
                table
            )));
        }
        match (into, out_of) {
            (Some(index), _) => self.join_into_partition(index, from_alias, table, alias, condition, mode),
            (None, Some(index)) => self.join_out_of_partition(index, from_alias, table, alias, condition, mode),
            (None, None) => self.main.join(from_alias, table, alias, condition, mode),
        }
    }

    fn set_where(&mut self, predicates: Vec<Expr>) {
        for (target, parts) in self.route_predicates(predicates) {
            match target {
                Some(split) => split.lock().query.set_where(parts),
                None => self.main.set_where(parts),
            }
        }
    }

    fn and_where(&mut self, predicates: Vec<Expr>) {
        for (target, parts) in self.route_predicates(predicates) {
            match target {
                Some(split) => split.lock().query.and_where(parts),
                None => self.main.and_where(parts),
            }
        }
    }

    fn insert(&mut self, table: &str) {
        self.write_to(table);
        self.main.insert(table);
    }

    fn update(&mut self, table: &str, alias: Option<&str>) {
        self.write_to(table);
        self.main.update(table, alias);
    }

    fn delete(&mut self, table: &str, alias: Option<&str>) {
        self.write_to(table);
        self.main.delete(table, alias);
    }

    fn set(&mut self, column: &str, value: Expr) -> Result<()> {
        self.main.set(column, value)
    }

    fn set_value(&mut self, column: &str, value: Expr) {
        self.main.set_value(column, value);
    }

    fn create_named_parameter(&mut self, value: Value, ty: ParamType, name: Option<&str>) -> Expr {
        self.main.create_named_parameter(value, ty, name)
    }

    fn create_positional_parameter(&mut self, value: Value, ty: ParamType) -> Expr {
        self.has_positional = true;
        self.main.create_positional_parameter(value, ty)
    }

    fn parameters(&self) -> &Parameters {
        self.main.parameters()
    }

    fn set_parameters(&mut self, parameters: Parameters) {
        self.main.set_parameters(parameters);
    }

    fn hint_shard_key(&mut self, column: &str, value: Value) {
        self.main.hint_shard_key(column, value.clone());
        for split in &self.split_queries {
            split.lock().query.hint_shard_key(column, value.clone());
        }
        self.shard_hints.push((column.to_string(), value));
    }

    fn run_across_all_shards(&mut self) {
        self.all_shards = true;
        self.main.run_across_all_shards();
        for split in &self.split_queries {
            split.lock().query.run_across_all_shards();
        }
    }

    fn query_type(&self) -> QueryType {
        self.main.query_type()
    }

    fn output_columns(&self) -> Vec<String> {
        let mut columns = self.main.output_columns();
        for split in &self.split_queries {
            columns.extend(split.lock().query.output_columns());
        }
        columns.extend(self.selects.iter().filter_map(SelectItem::output_name));
        let mut hidden = self.hidden_columns.clone();
        for (column, is_hidden) in self.pending_implicit() {
            if is_hidden {
                hidden.push(column.name.clone());
            } else {
                columns.push(column.name);
            }
        }
        let mut seen = Vec::with_capacity(columns.len());
        for column in columns {
            if !hidden.contains(&column) && !seen.contains(&column) {
                seen.push(column);
            }
        }
        seen
    }

    fn sql(&mut self) -> String {
        self.apply_selects();
        self.main.sql()
    }

    fn execute_query(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<Box<dyn ResultCursor>> {
        self.apply_selects();
        if self.split_queries.is_empty() {
            let connection = connection.or_else(|| self.main_connection());
            return self.main.execute_query(connection);
        }
        if self.has_positional || self.main.parameters().has_positional() {
            return Err(QueryError::UnsupportedPartitionedOperation(
                "Partitioned queries aren't allowed to use positional arguments".into(),
            ));
        }
        let parameters = self.main.parameters().clone();
        for split in &self.split_queries {
            split.lock().query.set_parameters(parameters.clone());
        }

        let connection = connection.or_else(|| self.main_connection());
        let result = self.main.execute_query(connection)?;
        tracing::debug!(partitions = self.partition_count(), "executing partitioned query");
        Ok(Box::new(PartitionedResult::new(
            self.split_queries.clone(),
            result,
            self.hidden_columns.clone(),
        )))
    }

    fn execute_statement(&mut self, connection: Option<Arc<dyn Connection>>) -> Result<u64> {
        if !self.split_queries.is_empty() {
            return Err(QueryError::UnsupportedPartitionedOperation(
                "Partitioning write queries isn't supported".into(),
            ));
        }
        let connection = connection.or_else(|| self.main_connection());
        self.main.execute_statement(connection)
    }

    fn last_insert_id(&self) -> Result<i64> {
        self.main.last_insert_id()
    }
}

impl PartitionedQueryBuilder {
    /// Writes on a partitioned table run on the partition's connection.
    fn write_to(&mut self, table: &str) {
        if let Some(index) = self.partition_index(table) {
            self.main_partition = Some(index);
        }
    }

    fn main_connection(&self) -> Option<Arc<dyn Connection>> {
        self.main_partition()
            .and_then(|name| self.factory.connection_for(name))
    }
}
