//! Abstract Syntax Tree for RelQL payloads

/// Literal values are kept as raw JSON; the engine coerces them per field kind.
pub use serde_json::Value as Literal;

/// A complete query payload.
///
/// The same shape serves every operation; each operation reads the parts it
/// understands (`data` is ignored by reads, `orderBy` by creates, and so on).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    /// Optional WHERE tree
    pub where_clause: Option<WhereClause>,
    /// ORDER BY clauses, in priority order
    pub order_by: Vec<OrderBy>,
    /// Projection restricting the returned fields
    pub select: Option<Selection>,
    /// Relations to load on top of all scalar fields
    pub include: Option<Selection>,
    /// Maximum number of records
    pub take: Option<usize>,
    /// Number of leading records to drop
    pub skip: Option<usize>,
    /// Fields whose value combination must be unique in the result
    pub distinct: Vec<String>,
    /// Write payload
    pub data: Option<Data>,
    /// createMany: ignore rows that collide with a unique constraint
    pub skip_duplicates: bool,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_where(mut self, clause: WhereClause) -> Self {
        self.where_clause = Some(clause);
        self
    }

    pub fn with_data(mut self, data: WriteData) -> Self {
        self.data = Some(Data::One(data));
        self
    }

    /// Entries of `select` and `include`, in that order.
    pub fn projections(&self) -> impl Iterator<Item = &(String, Selected)> {
        self.select
            .iter()
            .chain(self.include.iter())
            .flat_map(|s| s.entries.iter())
    }
}

/// A where tree. Field conditions and combinators are ANDed together.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WhereClause {
    pub and: Vec<WhereClause>,
    /// `None` when absent; `Some(vec![])` matches nothing
    pub or: Option<Vec<WhereClause>>,
    pub not: Vec<WhereClause>,
    pub fields: Vec<FieldCondition>,
}

impl WhereClause {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a condition on a field or relation
    pub fn field(mut self, name: impl Into<String>, condition: Condition) -> Self {
        self.fields.push(FieldCondition {
            field: name.into(),
            condition,
        });
        self
    }

    /// Add an equality condition
    pub fn equals(self, name: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.field(name, Condition::Equals(value.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.and.is_empty() && self.or.is_none() && self.not.is_empty() && self.fields.is_empty()
    }

    /// Find a top-level condition by field name
    pub fn condition(&self, name: &str) -> Option<&Condition> {
        self.fields
            .iter()
            .find(|c| c.field == name)
            .map(|c| &c.condition)
    }

    /// Every clause nested directly below this one (AND, OR and NOT branches)
    pub fn children(&self) -> impl Iterator<Item = &WhereClause> {
        self.and
            .iter()
            .chain(self.or.iter().flatten())
            .chain(self.not.iter())
    }
}

/// `field: <condition>`
#[derive(Debug, Clone, PartialEq)]
pub struct FieldCondition {
    pub field: String,
    pub condition: Condition,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field: null`
    Null,
    /// `field: <literal>`, sugar for `equals`
    Equals(Literal),
    /// `field: { equals, lt, contains, ... }`
    Scalar(ScalarFilter),
    /// `relation: { is, isNot, every, some, none }`
    Relation(RelationFilter),
    /// `relation: { ...where }` or `compound_unique: { a, b }`
    Where(WhereClause),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueryMode {
    #[default]
    Default,
    Insensitive,
}

/// Operators on a scalar or list field. Every present operator must hold.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScalarFilter {
    pub equals: Option<Literal>,
    pub not: Option<Box<NotFilter>>,
    pub in_list: Option<Vec<Literal>>,
    pub not_in: Option<Vec<Literal>>,
    pub lt: Option<Literal>,
    pub lte: Option<Literal>,
    pub gt: Option<Literal>,
    pub gte: Option<Literal>,
    pub contains: Option<String>,
    pub starts_with: Option<String>,
    pub ends_with: Option<String>,
    pub mode: QueryMode,
    pub has: Option<Literal>,
    pub has_every: Option<Vec<Literal>>,
    pub has_some: Option<Vec<Literal>>,
    pub is_empty: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NotFilter {
    Value(Literal),
    Filter(ScalarFilter),
}

/// Target of `is` / `isNot`
#[derive(Debug, Clone, PartialEq)]
pub enum RelationTarget {
    Null,
    Where(WhereClause),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationFilter {
    pub is: Option<RelationTarget>,
    pub is_not: Option<RelationTarget>,
    pub every: Option<WhereClause>,
    pub some: Option<WhereClause>,
    pub none: Option<WhereClause>,
}

/// ORDER BY clause
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub kind: OrderKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderKind {
    /// `field: "asc"` or `field: { sort, nulls }`
    Scalar {
        sort: SortOrder,
        nulls: Option<NullsOrder>,
    },
    /// `relation: { _count: "desc" }`
    Count(SortOrder),
    /// `relation: { field: "asc", ... }`
    Relation(Vec<OrderBy>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn reverse(self) -> Self {
        match self {
            Self::Asc => Self::Desc,
            Self::Desc => Self::Asc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NullsOrder {
    First,
    Last,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self::scalar(field, SortOrder::Asc)
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self::scalar(field, SortOrder::Desc)
    }

    fn scalar(field: impl Into<String>, sort: SortOrder) -> Self {
        Self {
            field: field.into(),
            kind: OrderKind::Scalar { sort, nulls: None },
        }
    }

    /// The same clause with every direction flipped
    pub fn reversed(&self) -> Self {
        let kind = match &self.kind {
            OrderKind::Scalar { sort, nulls } => OrderKind::Scalar {
                sort: sort.reverse(),
                nulls: *nulls,
            },
            OrderKind::Count(sort) => OrderKind::Count(sort.reverse()),
            OrderKind::Relation(inner) => OrderKind::Relation(inner.iter().map(Self::reversed).collect()),
        };
        Self {
            field: self.field.clone(),
            kind,
        }
    }
}

/// `select` / `include` body
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    pub entries: Vec<(String, Selected)>,
}

impl Selection {
    pub fn get(&self, name: &str) -> Option<&Selected> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    pub fn is_selected(&self, name: &str) -> bool {
        self.get(name).is_some_and(Selected::is_enabled)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Selected {
    /// `field: true`
    Flag(bool),
    /// `relation: { select, include, where, orderBy, take, skip }`
    Nested(Box<Query>),
    /// `_count: true` or `_count: { select: { relation: ... } }`
    Count(CountSelection),
}

impl Selected {
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Flag(false))
    }

    /// Nested arguments, if any
    pub fn query(&self) -> Option<&Query> {
        match self {
            Self::Nested(q) => Some(q),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CountSelection {
    /// Count every to-many relation
    All,
    /// Count the named relations, optionally filtered
    Relations(Vec<(String, Option<WhereClause>)>),
}

/// Write payload: a single record or a batch
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    One(WriteData),
    Many(Vec<WriteData>),
}

impl Data {
    pub fn records(&self) -> &[WriteData] {
        match self {
            Self::One(d) => std::slice::from_ref(d),
            Self::Many(d) => d,
        }
    }
}

/// Field writes of one record
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteData {
    pub fields: Vec<(String, FieldWrite)>,
}

impl WriteData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<Literal>) -> Self {
        self.fields.push((name.into(), FieldWrite::Value(value.into())));
        self
    }

    pub fn relation(mut self, name: impl Into<String>, write: NestedWrite) -> Self {
        self.fields.push((name.into(), FieldWrite::Relation(write)));
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldWrite> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, w)| w)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    /// `field: <literal>`
    Value(Literal),
    /// `field: { set | increment | push | ... }`
    Op(UpdateOp),
    /// `relation: { create | connect | createMany | ... }`
    Relation(NestedWrite),
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOp {
    Set(Literal),
    Increment(Literal),
    Decrement(Literal),
    Multiply(Literal),
    Divide(Literal),
    Push(Literal),
    Unset,
}

/// Nested relation operations inside `data`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NestedWrite {
    pub create: Vec<WriteData>,
    pub connect: Vec<WhereClause>,
    /// Accepted by the parser, rejected by the engine
    pub connect_or_create: Vec<Literal>,
    pub create_many: Option<CreateMany>,
    pub disconnect: Option<Disconnect>,
}

impl NestedWrite {
    pub fn create(data: WriteData) -> Self {
        Self {
            create: vec![data],
            ..Self::default()
        }
    }

    pub fn connect(selector: WhereClause) -> Self {
        Self {
            connect: vec![selector],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CreateMany {
    pub data: Vec<WriteData>,
    pub skip_duplicates: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Disconnect {
    /// `disconnect: true` on a to-one relation
    Flag(bool),
    /// `disconnect: [{ id }]` on a to-many relation
    Records(Vec<WhereClause>),
}
