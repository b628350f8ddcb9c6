#![forbid(unsafe_code)]

use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use sof_path::{Item, Path, PathError};
use sof_types::TypedValue;
use thiserror::Error;

static COLUMN_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$"));

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("invalid resource: {0}")]
    Invalid(String),
}

/// Failure kinds at the evaluator boundary. The first three are the kinds a
/// fixture may legitimately expect; `Internal` is never expected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ViewError {
    #[error("view definition error: {0}")]
    Definition(String),
    #[error("view application error: {0}")]
    Application(String),
    #[error("path expression error: {0}")]
    PathExpression(String),
    #[error("evaluator failure: {0}")]
    Internal(String),
}

impl ViewError {
    #[must_use]
    pub fn is_expected_kind(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }
}

impl From<PathError> for ViewError {
    fn from(err: PathError) -> Self {
        match err {
            PathError::Syntax { .. } | PathError::UnsupportedFunction { .. } => {
                Self::PathExpression(err.to_string())
            }
            PathError::Evaluation { .. } => Self::Application(err.to_string()),
        }
    }
}

pub trait Resource {
    fn resource_type_name(&self) -> &str;
}

pub trait ResourceParser {
    type Resource: Resource;

    fn parse(&self, raw: &Value) -> Result<Self::Resource, ResourceError>;
}

/// Builds applicators from raw view specifications.
pub trait ViewEngine {
    type Resource: Resource;
    type Applicator: ViewApplicator<Self::Resource>;

    /// Validates the specification and binds an applicator to it.
    fn prepare(&self, view: &Value) -> Result<Self::Applicator, ViewError>;
}

pub trait ViewApplicator<R> {
    /// Root resource type the view applies to.
    fn resource_type(&self) -> &str;

    fn apply(&self, resource: &R) -> Result<Vec<FlatRow>, ViewError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowElement {
    name: String,
    values: Vec<TypedValue>,
}

impl RowElement {
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<TypedValue>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    #[must_use]
    pub fn empty(name: impl Into<String>) -> Self {
        Self::new(name, Vec::new())
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn values(&self) -> &[TypedValue] {
        &self.values
    }

    /// The value when exactly one is present.
    #[must_use]
    pub fn single_value(&self) -> Option<&TypedValue> {
        match self.values.as_slice() {
            [value] => Some(value),
            _ => None,
        }
    }
}

/// One flattened output row, elements in column order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FlatRow {
    elements: Vec<RowElement>,
}

impl FlatRow {
    #[must_use]
    pub fn new(elements: Vec<RowElement>) -> Self {
        Self { elements }
    }

    #[must_use]
    pub fn elements(&self) -> &[RowElement] {
        &self.elements
    }

    #[must_use]
    pub fn element(&self, name: &str) -> Option<&RowElement> {
        self.elements.iter().find(|element| element.name == name)
    }
}

impl fmt::Display for FlatRow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (idx, element) in self.elements.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: [", element.name)?;
            for (pos, value) in element.values.iter().enumerate() {
                if pos > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{value}")?;
            }
            f.write_str("]")?;
        }
        f.write_str("}")
    }
}

/// A resource kept as its JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct JsonResource {
    resource_type: String,
    body: Value,
}

impl JsonResource {
    #[must_use]
    pub fn body(&self) -> &Value {
        &self.body
    }
}

impl Resource for JsonResource {
    fn resource_type_name(&self) -> &str {
        &self.resource_type
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonResourceParser;

impl ResourceParser for JsonResourceParser {
    type Resource = JsonResource;

    fn parse(&self, raw: &Value) -> Result<JsonResource, ResourceError> {
        let Value::Object(map) = raw else {
            return Err(ResourceError::Invalid(format!(
                "expected a JSON object, found {raw}"
            )));
        };
        let resource_type = map
            .get("resourceType")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ResourceError::Invalid("missing resourceType".to_owned()))?;
        Ok(JsonResource {
            resource_type: resource_type.to_owned(),
            body: raw.clone(),
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawView {
    resource: Option<String>,
    #[serde(default)]
    select: Vec<RawSelect>,
    #[serde(default, rename = "where")]
    filters: Vec<RawFilter>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSelect {
    #[serde(default)]
    column: Vec<RawColumn>,
    #[serde(default)]
    select: Vec<RawSelect>,
    for_each: Option<String>,
    for_each_or_null: Option<String>,
    #[serde(default)]
    union_all: Vec<RawSelect>,
}

#[derive(Debug, Deserialize)]
struct RawColumn {
    name: String,
    path: String,
    #[serde(default)]
    collection: bool,
}

#[derive(Debug, Deserialize)]
struct RawFilter {
    path: String,
}

#[derive(Debug, Clone)]
struct ColumnDef {
    name: String,
    path: Path,
    collection: bool,
}

impl ColumnDef {
    fn evaluate(&self, context: &Item<'_>) -> Result<RowElement, ViewError> {
        let values = self
            .path
            .evaluate(context)?
            .iter()
            .map(Item::to_typed)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ViewError::Application)?;
        if !self.collection && values.len() > 1 {
            return Err(ViewError::Application(format!(
                "column {} produced {} values but is not a collection",
                self.name,
                values.len()
            )));
        }
        Ok(RowElement::new(self.name.clone(), values))
    }
}

#[derive(Debug, Clone)]
enum Iteration {
    Once,
    ForEach(Path),
    ForEachOrNull(Path),
}

#[derive(Debug, Clone)]
struct SelectNode {
    columns: Vec<ColumnDef>,
    selects: Vec<SelectNode>,
    iteration: Iteration,
    union_all: Vec<SelectNode>,
}

type Row = Vec<RowElement>;

impl SelectNode {
    fn compile(raw: RawSelect) -> Result<Self, ViewError> {
        if raw.column.is_empty() && raw.select.is_empty() && raw.union_all.is_empty() {
            return Err(ViewError::Definition(
                "select needs at least one of column, select or unionAll".to_owned(),
            ));
        }
        let iteration = match (raw.for_each, raw.for_each_or_null) {
            (Some(_), Some(_)) => {
                return Err(ViewError::Definition(
                    "forEach and forEachOrNull cannot be combined".to_owned(),
                ));
            }
            (Some(path), None) => Iteration::ForEach(Path::parse(&path)?),
            (None, Some(path)) => Iteration::ForEachOrNull(Path::parse(&path)?),
            (None, None) => Iteration::Once,
        };

        let pattern = COLUMN_NAME
            .as_ref()
            .map_err(|err| ViewError::Internal(err.to_string()))?;
        let mut columns = Vec::with_capacity(raw.column.len());
        for column in raw.column {
            if !pattern.is_match(&column.name) {
                return Err(ViewError::Definition(format!(
                    "invalid column name {:?}",
                    column.name
                )));
            }
            columns.push(ColumnDef {
                path: Path::parse(&column.path)?,
                name: column.name,
                collection: column.collection,
            });
        }

        let node = Self {
            columns,
            selects: raw
                .select
                .into_iter()
                .map(Self::compile)
                .collect::<Result<_, _>>()?,
            iteration,
            union_all: raw
                .union_all
                .into_iter()
                .map(Self::compile)
                .collect::<Result<_, _>>()?,
        };

        if let Some((first, rest)) = node.union_all.split_first() {
            let expected = first.column_names();
            if let Some(branch) = rest.iter().find(|branch| branch.column_names() != expected) {
                return Err(ViewError::Definition(format!(
                    "unionAll branches disagree on columns: {expected:?} vs {:?}",
                    branch.column_names()
                )));
            }
        }
        Ok(node)
    }

    fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        for nested in &self.selects {
            names.extend(nested.column_names());
        }
        if let Some(branch) = self.union_all.first() {
            names.extend(branch.column_names());
        }
        names
    }

    fn rows(&self, context: &Item<'_>) -> Result<Vec<Row>, ViewError> {
        let contexts = match &self.iteration {
            Iteration::Once => vec![Some(context.clone())],
            Iteration::ForEach(path) => path.evaluate(context)?.into_iter().map(Some).collect(),
            Iteration::ForEachOrNull(path) => {
                let items = path.evaluate(context)?;
                if items.is_empty() {
                    vec![None]
                } else {
                    items.into_iter().map(Some).collect()
                }
            }
        };

        let mut out = Vec::new();
        for context in contexts {
            match context {
                Some(item) => out.extend(self.rows_in_context(&item)?),
                None => out.push(
                    self.column_names()
                        .into_iter()
                        .map(RowElement::empty)
                        .collect(),
                ),
            }
        }
        Ok(out)
    }

    fn rows_in_context(&self, context: &Item<'_>) -> Result<Vec<Row>, ViewError> {
        let own = self
            .columns
            .iter()
            .map(|column| column.evaluate(context))
            .collect::<Result<Row, _>>()?;
        let mut rows = vec![own];
        for nested in &self.selects {
            rows = cross(&rows, &nested.rows(context)?);
        }
        if !self.union_all.is_empty() {
            let mut branch_rows = Vec::new();
            for branch in &self.union_all {
                branch_rows.extend(branch.rows(context)?);
            }
            rows = cross(&rows, &branch_rows);
        }
        Ok(rows)
    }
}

fn cross(left: &[Row], right: &[Row]) -> Vec<Row> {
    let mut out = Vec::with_capacity(left.len() * right.len());
    for l in left {
        for r in right {
            out.push(l.iter().chain(r).cloned().collect());
        }
    }
    out
}

/// A validated view definition ready to be applied to resources.
#[derive(Debug, Clone)]
pub struct CompiledView {
    resource: String,
    selects: Vec<SelectNode>,
    filters: Vec<Path>,
}

impl CompiledView {
    pub fn compile(view: &Value) -> Result<Self, ViewError> {
        if !view.is_object() {
            return Err(ViewError::Definition(format!(
                "view must be a JSON object, found {view}"
            )));
        }
        let raw: RawView = serde_json::from_value(view.clone())
            .map_err(|err| ViewError::Definition(err.to_string()))?;
        let resource = raw
            .resource
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ViewError::Definition("view has no resource type".to_owned()))?;
        if raw.select.is_empty() {
            return Err(ViewError::Definition("view has no select".to_owned()));
        }

        let compiled = Self {
            resource,
            selects: raw
                .select
                .into_iter()
                .map(SelectNode::compile)
                .collect::<Result<_, _>>()?,
            filters: raw
                .filters
                .iter()
                .map(|filter| Path::parse(&filter.path))
                .collect::<Result<_, _>>()?,
        };

        let mut seen = BTreeSet::new();
        for name in compiled.column_names() {
            if !seen.insert(name.clone()) {
                return Err(ViewError::Definition(format!(
                    "duplicate column name {name:?}"
                )));
            }
        }
        Ok(compiled)
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        self.selects
            .iter()
            .flat_map(SelectNode::column_names)
            .collect()
    }

    fn passes_filters(&self, root: &Item<'_>) -> Result<bool, ViewError> {
        for filter in &self.filters {
            let items = filter.evaluate(root)?;
            let keep = match items.as_slice() {
                [] => false,
                [item] => match item.to_typed().map_err(ViewError::Application)? {
                    TypedValue::Primitive { type_name, text } if type_name == "boolean" => {
                        text == "true"
                    }
                    other => {
                        return Err(ViewError::Application(format!(
                            "where path {filter} must yield a boolean, found {other}"
                        )));
                    }
                },
                _ => {
                    return Err(ViewError::Application(format!(
                        "where path {filter} yielded {} values",
                        items.len()
                    )));
                }
            };
            if !keep {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl ViewApplicator<JsonResource> for CompiledView {
    fn resource_type(&self) -> &str {
        &self.resource
    }

    fn apply(&self, resource: &JsonResource) -> Result<Vec<FlatRow>, ViewError> {
        if resource.resource_type_name() != self.resource {
            return Err(ViewError::Application(format!(
                "view over {} cannot be applied to a {}",
                self.resource,
                resource.resource_type_name()
            )));
        }
        let root = Item::resource(resource.body());
        if !self.passes_filters(&root)? {
            return Ok(Vec::new());
        }
        let mut rows: Vec<Row> = vec![Vec::new()];
        for select in &self.selects {
            rows = cross(&rows, &select.rows(&root)?);
        }
        Ok(rows.into_iter().map(FlatRow::new).collect())
    }
}

/// Evaluator for ViewDefinitions over [`JsonResource`]s using the `sof-path` subset.
#[derive(Debug, Clone, Copy, Default)]
pub struct BasicViewEngine;

impl ViewEngine for BasicViewEngine {
    type Resource = JsonResource;
    type Applicator = CompiledView;

    fn prepare(&self, view: &Value) -> Result<CompiledView, ViewError> {
        CompiledView::compile(view)
    }
}
