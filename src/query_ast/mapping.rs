//! Entity-to-table mapping and relationship lowering.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::models::enums::ScalarType;

use super::ast::{
    AliasArena, ColumnDeclaration, ColumnExpression, EntityExpression, Expr, ExprRef,
    MappingEntity, ProjectionExpression, SelectExpression, TableAlias,
};
use super::errors::RewriteError;
use super::language::QueryLanguage;

/// Answers the questions the relationship binder asks about entity members.
pub trait QueryMapping: Send + Sync {
    fn is_relationship(&self, entity: &MappingEntity, member: &str) -> bool;

    fn is_singleton_relationship(&self, entity: &MappingEntity, member: &str) -> bool;

    /// For a relationship, the `Projection` producing the related rows correlated to `root`;
    /// otherwise the bound member itself.
    fn member_expression(
        &self,
        arena: &mut AliasArena,
        language: &dyn QueryLanguage,
        root: &ExprRef,
        entity: &MappingEntity,
        member: &str,
    ) -> Result<ExprRef, RewriteError>;
}

/// Mapping for trees that carry no entities.
pub struct NoMapping;

impl QueryMapping for NoMapping {
    fn is_relationship(&self, _entity: &MappingEntity, _member: &str) -> bool {
        false
    }

    fn is_singleton_relationship(&self, _entity: &MappingEntity, _member: &str) -> bool {
        false
    }

    fn member_expression(
        &self,
        _arena: &mut AliasArena,
        _language: &dyn QueryLanguage,
        root: &ExprRef,
        _entity: &MappingEntity,
        member: &str,
    ) -> Result<ExprRef, RewriteError> {
        Ok(bind_member(root, member))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnMapping {
    pub member: String,
    pub column: String,
    pub scalar_type: ScalarType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipMapping {
    pub member: String,
    pub target: String,
    /// Pairs of (member on this entity, member on the target entity).
    pub keys: Vec<(String, String)>,
    #[serde(default)]
    pub singleton: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDefinition {
    pub name: String,
    pub table: String,
    pub columns: Vec<ColumnMapping>,
    #[serde(default)]
    pub relationships: Vec<RelationshipMapping>,
}

impl EntityDefinition {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    pub fn column(mut self, member: &str, column: &str, scalar_type: ScalarType) -> Self {
        self.columns.push(ColumnMapping {
            member: member.to_string(),
            column: column.to_string(),
            scalar_type,
        });
        self
    }

    pub fn relationship(
        mut self,
        member: &str,
        target: &str,
        keys: &[(&str, &str)],
        singleton: bool,
    ) -> Self {
        self.relationships.push(RelationshipMapping {
            member: member.to_string(),
            target: target.to_string(),
            keys: keys
                .iter()
                .map(|(a, b)| (a.to_string(), b.to_string()))
                .collect(),
            singleton,
        });
        self
    }

    fn find_relationship(&self, member: &str) -> Option<&RelationshipMapping> {
        self.relationships.iter().find(|r| r.member == member)
    }
}

/// Mapping driven by a fixed set of [`EntityDefinition`]s.
#[derive(Debug, Clone, Default)]
pub struct EntityMapping {
    entities: HashMap<String, EntityDefinition>,
}

impl EntityMapping {
    pub fn new(definitions: impl IntoIterator<Item = EntityDefinition>) -> Self {
        Self {
            entities: definitions
                .into_iter()
                .map(|d| (d.name.clone(), d))
                .collect(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        let definitions: Vec<EntityDefinition> = serde_json::from_str(json)?;
        Ok(Self::new(definitions))
    }

    fn definition(&self, name: &str) -> Result<&EntityDefinition, RewriteError> {
        self.entities
            .get(name)
            .ok_or_else(|| RewriteError::Mapping(format!("unknown entity '{}'", name)))
    }

    /// Base query of an entity: every mapped column of its table, projected as an entity.
    pub fn table_query(
        &self,
        arena: &mut AliasArena,
        language: &dyn QueryLanguage,
        entity: &str,
    ) -> Result<ProjectionExpression, RewriteError> {
        let definition = self.definition(entity)?;
        let table_alias = arena.fresh();
        let select_alias = arena.fresh();
        let select = entity_select(definition, language, table_alias, select_alias, None);
        Ok(entity_projection(definition, language, select))
    }
}

fn entity_select(
    definition: &EntityDefinition,
    language: &dyn QueryLanguage,
    table_alias: TableAlias,
    select_alias: TableAlias,
    where_clause: Option<ExprRef>,
) -> SelectExpression {
    let columns = definition
        .columns
        .iter()
        .map(|c| {
            let ty = language.column_type(c.scalar_type);
            ColumnDeclaration::new(
                c.member.clone(),
                ColumnExpression::new(c.scalar_type, ty.clone(), table_alias, &c.column).into_expr(),
                ty,
            )
        })
        .collect();
    SelectExpression::new(
        select_alias,
        columns,
        Some(Expr::table(table_alias, &definition.table)),
        where_clause,
    )
}

fn entity_projection(
    definition: &EntityDefinition,
    language: &dyn QueryLanguage,
    select: SelectExpression,
) -> ProjectionExpression {
    let fields = definition
        .columns
        .iter()
        .map(|c| {
            let column = ColumnExpression::new(
                c.scalar_type,
                language.column_type(c.scalar_type),
                select.alias,
                &c.member,
            );
            (c.member.clone(), column.into_expr())
        })
        .collect();
    let projector = Arc::new(Expr::Entity(EntityExpression {
        entity: MappingEntity::new(&definition.name),
        expression: Arc::new(Expr::Record(fields)),
    }));
    ProjectionExpression {
        select: select.into_expr(),
        projector,
    }
}

impl QueryMapping for EntityMapping {
    fn is_relationship(&self, entity: &MappingEntity, member: &str) -> bool {
        self.entities
            .get(&entity.name)
            .is_some_and(|d| d.find_relationship(member).is_some())
    }

    fn is_singleton_relationship(&self, entity: &MappingEntity, member: &str) -> bool {
        self.entities
            .get(&entity.name)
            .and_then(|d| d.find_relationship(member))
            .is_some_and(|r| r.singleton)
    }

    fn member_expression(
        &self,
        arena: &mut AliasArena,
        language: &dyn QueryLanguage,
        root: &ExprRef,
        entity: &MappingEntity,
        member: &str,
    ) -> Result<ExprRef, RewriteError> {
        let definition = self.definition(&entity.name)?;
        let Some(relationship) = definition.find_relationship(member) else {
            return Ok(bind_member(root, member));
        };
        let target = self.definition(&relationship.target)?;
        let table_alias = arena.fresh();

        let mut condition: Option<ExprRef> = None;
        for (own, related) in &relationship.keys {
            let left = bind_member(root, own);
            if matches!(&*left, Expr::Member { .. }) {
                return Err(RewriteError::Mapping(format!(
                    "'{}.{}' is not a mapped column",
                    entity.name, own
                )));
            }
            let column = target
                .columns
                .iter()
                .find(|c| &c.member == related)
                .ok_or_else(|| {
                    RewriteError::Mapping(format!(
                        "'{}.{}' is not a mapped column",
                        target.name, related
                    ))
                })?;
            let right = ColumnExpression::new(
                column.scalar_type,
                language.column_type(column.scalar_type),
                table_alias,
                &column.column,
            )
            .into_expr();
            let equal = Expr::eq(left, right);
            condition = Some(match condition {
                Some(prev) => Expr::and(prev, equal),
                None => equal,
            });
        }

        let select = entity_select(target, language, table_alias, arena.fresh(), condition);
        Ok(Arc::new(Expr::Projection(entity_projection(
            target, language, select,
        ))))
    }
}

/// Resolves `source.member` through entities, records and outer-joined markers. Anything else stays a
/// `Member` node.
pub fn bind_member(source: &ExprRef, member: &str) -> ExprRef {
    match &**source {
        Expr::Entity(entity) => {
            let bound = bind_member(&entity.expression, member);
            match &*bound {
                Expr::Member { source: inner, .. } if Arc::ptr_eq(inner, &entity.expression) => {
                    Expr::member(source.clone(), member)
                }
                _ => bound,
            }
        }
        Expr::Record(fields) => fields
            .iter()
            .find(|(name, _)| name == member)
            .map(|(_, field)| field.clone())
            .unwrap_or_else(|| Expr::member(source.clone(), member)),
        Expr::OuterJoined { test, expression } => {
            let bound = bind_member(expression, member);
            match &*bound {
                Expr::Column(_) => bound,
                Expr::Member { source: inner, .. } if Arc::ptr_eq(inner, expression) => {
                    Expr::member(source.clone(), member)
                }
                _ => Arc::new(Expr::OuterJoined {
                    test: test.clone(),
                    expression: bound,
                }),
            }
        }
        _ => Expr::member(source.clone(), member),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::enums::DialectKind;
    use crate::query_ast::language::get_language;

    fn customers() -> EntityMapping {
        EntityMapping::new([
            EntityDefinition::new("Customer", "customers")
                .column("id", "customer_id", ScalarType::Int64)
                .column("name", "name", ScalarType::String)
                .column("address_id", "address_id", ScalarType::Int64)
                .relationship("address", "Address", &[("address_id", "id")], true)
                .relationship("orders", "Order", &[("id", "customer_id")], false),
            EntityDefinition::new("Address", "addresses")
                .column("id", "address_id", ScalarType::Int64)
                .column("city", "city", ScalarType::String),
            EntityDefinition::new("Order", "orders")
                .column("id", "order_id", ScalarType::Int64)
                .column("customer_id", "customer_id", ScalarType::Int64),
        ])
    }

    #[test]
    fn table_query_projects_every_column() {
        let language = get_language(DialectKind::Hive);
        let mut arena = AliasArena::new();
        let projection = customers()
            .table_query(&mut arena, language.as_ref(), "Customer")
            .unwrap();
        let select = projection.select().unwrap();
        assert_eq!(select.columns.len(), 3);
        let name = bind_member(&projection.projector, "name");
        let column = name.as_column().unwrap();
        assert_eq!(column.alias, select.alias);
        assert_eq!(column.name, "name");
    }

    #[test]
    fn relationship_is_correlated_to_root() {
        let language = get_language(DialectKind::Hive);
        let mapping = customers();
        let mut arena = AliasArena::new();
        let root = mapping
            .table_query(&mut arena, language.as_ref(), "Customer")
            .unwrap();
        let entity = MappingEntity::new("Customer");
        assert!(mapping.is_singleton_relationship(&entity, "address"));
        assert!(mapping.is_relationship(&entity, "orders"));
        assert!(!mapping.is_singleton_relationship(&entity, "orders"));

        let related = mapping
            .member_expression(&mut arena, language.as_ref(), &root.projector, &entity, "address")
            .unwrap();
        let Expr::Projection(projection) = &*related else {
            panic!("expected a projection");
        };
        let where_clause = projection.select().unwrap().where_clause.clone().unwrap();
        let Expr::Binary { left, .. } = &*where_clause else {
            panic!("expected a key comparison");
        };
        assert_eq!(left.as_column().unwrap().alias, root.select().unwrap().alias);
    }

    #[test]
    fn definitions_load_from_json() {
        let json = r#"[{"name":"Address","table":"addresses",
            "columns":[{"member":"id","column":"address_id","scalar_type":"int64"}]}]"#;
        let mapping = EntityMapping::from_json_str(json).unwrap();
        assert!(!mapping.is_relationship(&MappingEntity::new("Address"), "id"));
    }
}
