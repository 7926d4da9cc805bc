//! Immutable relational/scalar query tree.
//!
//! Nodes are shared through [`ExprRef`] (`Arc<Expr>`); a rewrite never mutates a node, it either hands
//! back the same `Arc` or builds a new parent around rewritten children.

use std::fmt;
use std::sync::Arc;

use crate::models::enums::{AggregateKind, BinaryOp, JoinKind, OrderType, ScalarType, UnaryOp};
use crate::models::structs::{ColumnType, Value};

use super::language::QueryLanguage;

pub type ExprRef = Arc<Expr>;

/// Identity of one row-producing source. Equality is identity: handles are only minted by an
/// [`AliasArena`], so two sources never share one by accident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TableAlias(u32);

impl TableAlias {
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for TableAlias {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "A{}", self.0)
    }
}

/// Per-translation allocator of [`TableAlias`] handles.
#[derive(Debug, Default)]
pub struct AliasArena {
    next: u32,
}

impl AliasArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fresh(&mut self) -> TableAlias {
        let alias = TableAlias(self.next);
        self.next += 1;
        alias
    }

    pub fn len(&self) -> usize {
        self.next as usize
    }

    pub fn is_empty(&self) -> bool {
        self.next == 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnExpression {
    pub scalar_type: ScalarType,
    pub column_type: ColumnType,
    pub alias: TableAlias,
    pub name: String,
}

impl ColumnExpression {
    pub fn new(
        scalar_type: ScalarType,
        column_type: ColumnType,
        alias: TableAlias,
        name: impl Into<String>,
    ) -> Self {
        Self {
            scalar_type,
            column_type,
            alias,
            name: name.into(),
        }
    }

    pub fn with_alias(&self, alias: TableAlias) -> Self {
        Self {
            alias,
            ..self.clone()
        }
    }

    pub fn into_expr(self) -> ExprRef {
        Arc::new(Expr::Column(self))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDeclaration {
    pub name: String,
    pub expression: ExprRef,
    pub column_type: ColumnType,
}

impl ColumnDeclaration {
    pub fn new(name: impl Into<String>, expression: ExprRef, column_type: ColumnType) -> Self {
        Self {
            name: name.into(),
            expression,
            column_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderExpression {
    pub order_type: OrderType,
    pub expression: ExprRef,
}

impl OrderExpression {
    pub fn new(order_type: OrderType, expression: ExprRef) -> Self {
        Self {
            order_type,
            expression,
        }
    }

    pub fn asc(expression: ExprRef) -> Self {
        Self::new(OrderType::Ascending, expression)
    }

    pub fn desc(expression: ExprRef) -> Self {
        Self::new(OrderType::Descending, expression)
    }

    pub fn inverted(&self) -> Self {
        Self::new(self.order_type.inverted(), self.expression.clone())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableExpression {
    pub alias: TableAlias,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectExpression {
    pub alias: TableAlias,
    pub columns: Vec<ColumnDeclaration>,
    pub from: Option<ExprRef>,
    pub where_clause: Option<ExprRef>,
    pub order_by: Vec<OrderExpression>,
    pub group_by: Vec<ExprRef>,
    pub is_distinct: bool,
    pub skip: Option<ExprRef>,
    pub take: Option<ExprRef>,
    pub is_reverse: bool,
    pub cluster_by: Vec<ExprRef>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinExpression {
    pub kind: JoinKind,
    pub left: ExprRef,
    pub right: ExprRef,
    pub condition: Option<ExprRef>,
}

/// Nested queries. `select` always holds an [`Expr::Select`].
#[derive(Debug, Clone, PartialEq)]
pub enum SubqueryExpression {
    Scalar {
        select: ExprRef,
        scalar_type: ScalarType,
    },
    Exists {
        select: ExprRef,
    },
    In {
        expression: ExprRef,
        select: ExprRef,
    },
}

impl SubqueryExpression {
    pub fn select(&self) -> &ExprRef {
        match self {
            SubqueryExpression::Scalar { select, .. }
            | SubqueryExpression::Exists { select }
            | SubqueryExpression::In { select, .. } => select,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpression {
    pub kind: AggregateKind,
    pub argument: Option<ExprRef>,
    pub is_distinct: bool,
    pub scalar_type: ScalarType,
}

/// Execution-time parameter placeholder. Occurrences with the same name are the same parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamedValueExpression {
    pub name: String,
    pub scalar_type: ScalarType,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MappingEntity {
    pub name: String,
}

impl MappingEntity {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityExpression {
    pub entity: MappingEntity,
    pub expression: ExprRef,
}

/// A query together with the host-side shape each of its rows is turned into.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionExpression {
    pub select: ExprRef,
    pub projector: ExprRef,
}

impl ProjectionExpression {
    pub fn select(&self) -> Option<&SelectExpression> {
        self.select.as_select()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Constant(Value),
    NamedValue(NamedValueExpression),
    Binary {
        op: BinaryOp,
        left: ExprRef,
        right: ExprRef,
    },
    Unary {
        op: UnaryOp,
        operand: ExprRef,
    },
    Between {
        expression: ExprRef,
        lower: ExprRef,
        upper: ExprRef,
    },
    IsNull(ExprRef),
    Member {
        source: ExprRef,
        member: String,
    },
    Record(Vec<(String, ExprRef)>),
    Entity(EntityExpression),
    OuterJoined {
        test: ExprRef,
        expression: ExprRef,
    },
    Table(TableExpression),
    Column(ColumnExpression),
    Select(SelectExpression),
    Join(JoinExpression),
    Subquery(SubqueryExpression),
    Aggregate(AggregateExpression),
    RowNumber(Vec<OrderExpression>),
    Projection(ProjectionExpression),
}

impl Expr {
    pub fn constant(value: impl Into<Value>) -> ExprRef {
        Arc::new(Expr::Constant(value.into()))
    }

    pub fn null() -> ExprRef {
        Arc::new(Expr::Constant(Value::Null))
    }

    pub fn named_value(name: impl Into<String>, scalar_type: ScalarType) -> ExprRef {
        Arc::new(Expr::NamedValue(NamedValueExpression {
            name: name.into(),
            scalar_type,
        }))
    }

    pub fn binary(op: BinaryOp, left: ExprRef, right: ExprRef) -> ExprRef {
        Arc::new(Expr::Binary { op, left, right })
    }

    pub fn eq(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Equal, left, right)
    }

    pub fn and(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::And, left, right)
    }

    pub fn add(left: ExprRef, right: ExprRef) -> ExprRef {
        Self::binary(BinaryOp::Add, left, right)
    }

    pub fn not(operand: ExprRef) -> ExprRef {
        Arc::new(Expr::Unary {
            op: UnaryOp::Not,
            operand,
        })
    }

    pub fn between(expression: ExprRef, lower: ExprRef, upper: ExprRef) -> ExprRef {
        Arc::new(Expr::Between {
            expression,
            lower,
            upper,
        })
    }

    pub fn member(source: ExprRef, member: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Member {
            source,
            member: member.into(),
        })
    }

    pub fn table(alias: TableAlias, name: impl Into<String>) -> ExprRef {
        Arc::new(Expr::Table(TableExpression {
            alias,
            name: name.into(),
        }))
    }

    pub fn join(
        kind: JoinKind,
        left: ExprRef,
        right: ExprRef,
        condition: Option<ExprRef>,
    ) -> ExprRef {
        Arc::new(Expr::Join(JoinExpression {
            kind,
            left,
            right,
            condition,
        }))
    }

    pub fn aggregate(
        kind: AggregateKind,
        argument: Option<ExprRef>,
        scalar_type: ScalarType,
    ) -> ExprRef {
        Arc::new(Expr::Aggregate(AggregateExpression {
            kind,
            argument,
            is_distinct: false,
            scalar_type,
        }))
    }

    pub fn scalar_subquery(select: SelectExpression, scalar_type: ScalarType) -> ExprRef {
        Arc::new(Expr::Subquery(SubqueryExpression::Scalar {
            select: select.into_expr(),
            scalar_type,
        }))
    }

    pub fn projection(select: SelectExpression, projector: ExprRef) -> ExprRef {
        Arc::new(Expr::Projection(ProjectionExpression {
            select: select.into_expr(),
            projector,
        }))
    }

    pub fn as_select(&self) -> Option<&SelectExpression> {
        match self {
            Expr::Select(select) => Some(select),
            _ => None,
        }
    }

    pub fn as_join(&self) -> Option<&JoinExpression> {
        match self {
            Expr::Join(join) => Some(join),
            _ => None,
        }
    }

    pub fn as_column(&self) -> Option<&ColumnExpression> {
        match self {
            Expr::Column(column) => Some(column),
            _ => None,
        }
    }

    pub fn as_constant(&self) -> Option<&Value> {
        match self {
            Expr::Constant(value) => Some(value),
            _ => None,
        }
    }

    /// Alias of a row source that can sit on either side of a join.
    pub fn declared_alias(&self) -> Option<TableAlias> {
        match self {
            Expr::Table(table) => Some(table.alias),
            Expr::Select(select) => Some(select.alias),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Expr::Constant(_) => "Constant",
            Expr::NamedValue(_) => "NamedValue",
            Expr::Binary { .. } => "Binary",
            Expr::Unary { .. } => "Unary",
            Expr::Between { .. } => "Between",
            Expr::IsNull(_) => "IsNull",
            Expr::Member { .. } => "Member",
            Expr::Record(_) => "Record",
            Expr::Entity(_) => "Entity",
            Expr::OuterJoined { .. } => "OuterJoined",
            Expr::Table(_) => "Table",
            Expr::Column(_) => "Column",
            Expr::Select(_) => "Select",
            Expr::Join(_) => "Join",
            Expr::Subquery(_) => "Subquery",
            Expr::Aggregate(_) => "Aggregate",
            Expr::RowNumber(_) => "RowNumber",
            Expr::Projection(_) => "Projection",
        }
    }

    /// Host type of a scalar node; `None` for relational and host-only shapes.
    pub fn scalar_type(&self) -> Option<ScalarType> {
        match self {
            Expr::Constant(value) => value.scalar_type(),
            Expr::NamedValue(value) => Some(value.scalar_type),
            Expr::Binary { op, left, right } => {
                if op.is_comparison() || op.is_logical() {
                    Some(ScalarType::Boolean)
                } else if *op == BinaryOp::Divide {
                    Some(ScalarType::Double)
                } else {
                    left.scalar_type().or_else(|| right.scalar_type())
                }
            }
            Expr::Unary {
                op: UnaryOp::Not, ..
            } => Some(ScalarType::Boolean),
            Expr::Unary { operand, .. } => operand.scalar_type(),
            Expr::Between { .. } | Expr::IsNull(_) => Some(ScalarType::Boolean),
            Expr::OuterJoined { expression, .. } => expression.scalar_type(),
            Expr::Column(column) => Some(column.scalar_type),
            Expr::Subquery(SubqueryExpression::Scalar { scalar_type, .. }) => Some(*scalar_type),
            Expr::Subquery(_) => Some(ScalarType::Boolean),
            Expr::Aggregate(aggregate) => Some(aggregate.scalar_type),
            Expr::RowNumber(_) => Some(ScalarType::Int32),
            Expr::Member { .. }
            | Expr::Record(_)
            | Expr::Entity(_)
            | Expr::Table(_)
            | Expr::Select(_)
            | Expr::Join(_)
            | Expr::Projection(_) => None,
        }
    }
}

/// First free name among `base`, `base1`, `base2`, ... in a column list.
pub fn available_column_name(columns: &[ColumnDeclaration], base: &str) -> String {
    let taken = |name: &str| columns.iter().any(|c| c.name == name);
    if !taken(base) {
        return base.to_string();
    }
    let mut n = 1;
    loop {
        let candidate = format!("{}{}", base, n);
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

impl SelectExpression {
    pub fn new(
        alias: TableAlias,
        columns: Vec<ColumnDeclaration>,
        from: Option<ExprRef>,
        where_clause: Option<ExprRef>,
    ) -> Self {
        Self {
            alias,
            columns,
            from,
            where_clause,
            order_by: Vec::new(),
            group_by: Vec::new(),
            is_distinct: false,
            skip: None,
            take: None,
            is_reverse: false,
            cluster_by: Vec::new(),
        }
    }

    pub fn into_expr(self) -> ExprRef {
        Arc::new(Expr::Select(self))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDeclaration> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Reference to one of this select's declared columns, as seen by consumers above it.
    pub fn column_ref(&self, name: &str) -> Option<ColumnExpression> {
        self.column(name).map(|decl| {
            ColumnExpression::new(
                decl.expression
                    .scalar_type()
                    .unwrap_or(decl.column_type.scalar_type),
                decl.column_type.clone(),
                self.alias,
                decl.name.clone(),
            )
        })
    }

    pub fn has_paging(&self) -> bool {
        self.skip.is_some() || self.take.is_some()
    }

    pub fn set_from(mut self, from: Option<ExprRef>) -> Self {
        self.from = from;
        self
    }

    pub fn set_where(mut self, where_clause: Option<ExprRef>) -> Self {
        self.where_clause = where_clause;
        self
    }

    pub fn set_order_by(mut self, order_by: Vec<OrderExpression>) -> Self {
        self.order_by = order_by;
        self
    }

    pub fn set_group_by(mut self, group_by: Vec<ExprRef>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn set_cluster_by(mut self, cluster_by: Vec<ExprRef>) -> Self {
        self.cluster_by = cluster_by;
        self
    }

    pub fn set_distinct(mut self, is_distinct: bool) -> Self {
        self.is_distinct = is_distinct;
        self
    }

    pub fn set_skip(mut self, skip: Option<ExprRef>) -> Self {
        self.skip = skip;
        self
    }

    pub fn set_take(mut self, take: Option<ExprRef>) -> Self {
        self.take = take;
        self
    }

    pub fn set_reverse(mut self, is_reverse: bool) -> Self {
        self.is_reverse = is_reverse;
        self
    }

    pub fn add_column(mut self, column: ColumnDeclaration) -> Self {
        self.columns.push(column);
        self
    }

    pub fn remove_column(mut self, name: &str) -> Self {
        self.columns.retain(|c| c.name != name);
        self
    }

    /// Pushes every clause of this select into a new inner layer under `new_alias`. The outer layer
    /// keeps the original alias and re-projects the inner columns by name, so consumers above are
    /// unaffected.
    pub fn add_redundant_select(self, language: &dyn QueryLanguage, new_alias: TableAlias) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|decl| {
                let (scalar_type, column_type) = match &*decl.expression {
                    Expr::Column(column) => (column.scalar_type, column.column_type.clone()),
                    other => {
                        let scalar_type = other
                            .scalar_type()
                            .unwrap_or(decl.column_type.scalar_type);
                        (scalar_type, language.column_type(scalar_type))
                    }
                };
                ColumnDeclaration::new(
                    decl.name.clone(),
                    ColumnExpression::new(scalar_type, column_type.clone(), new_alias, &decl.name)
                        .into_expr(),
                    column_type,
                )
            })
            .collect();
        let outer_alias = self.alias;
        let inner = SelectExpression {
            alias: new_alias,
            ..self
        };
        SelectExpression::new(outer_alias, columns, Some(inner.into_expr()), None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::DialectKind;
    use crate::query_ast::language::get_language;

    #[test]
    fn aliases_are_unique_per_arena() {
        let mut arena = AliasArena::new();
        let a = arena.fresh();
        let b = arena.fresh();
        assert_ne!(a, b);
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn available_name_skips_taken_names() {
        let ty = ColumnType::new("INT", ScalarType::Int32);
        let decls = vec![
            ColumnDeclaration::new("id", Expr::constant(1), ty.clone()),
            ColumnDeclaration::new("id1", Expr::constant(2), ty),
        ];
        assert_eq!(available_column_name(&decls, "id"), "id2");
        assert_eq!(available_column_name(&decls, "name"), "name");
    }

    #[test]
    fn redundant_select_keeps_outer_alias() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let t = arena.fresh();
        let s = arena.fresh();
        let ty = language.column_type(ScalarType::Int64);
        let key = ColumnExpression::new(ScalarType::Int64, ty.clone(), t, "key");
        let select = SelectExpression::new(
            s,
            vec![ColumnDeclaration::new("key", key.clone().into_expr(), ty)],
            Some(Expr::table(t, "numbers")),
            None,
        )
        .set_order_by(vec![OrderExpression::asc(key.into_expr())]);

        let inner_alias = arena.fresh();
        let wrapped = select.add_redundant_select(language.as_ref(), inner_alias);
        assert_eq!(wrapped.alias, s);
        assert!(wrapped.order_by.is_empty());
        let inner = wrapped.from.as_ref().and_then(|f| f.as_select()).unwrap();
        assert_eq!(inner.alias, inner_alias);
        assert_eq!(inner.order_by.len(), 1);
        let outer_col = wrapped.columns[0].expression.as_column().unwrap();
        assert_eq!(outer_col.alias, inner_alias);
        assert_eq!(outer_col.name, "key");
    }
}
