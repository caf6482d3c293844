//! Design functions: filters, views, lists and update handlers
//!
//! The server fake has no JavaScript engine; design functions are plain
//! Rust closures registered against `(database, design, name)`.

use crate::error::{ServerError, ServerResult};
use dashmap::DashMap;
use sofa_core::{Document, Number, Value, ViewRow, ViewRows};
use sofa_protocol::Params;
use std::cmp::Ordering;
use std::sync::Arc;

/// Changes filter: keep the document when it returns `true`
pub type FilterFn = Arc<dyn Fn(&Document, &Params) -> bool + Send + Sync>;

/// View map function: emitted `(key, value)` pairs for one document
pub type MapFn = Arc<dyn Fn(&Document) -> Vec<(Value, Value)> + Send + Sync>;

/// List function over the rows of a view
pub type ListFn = Arc<dyn Fn(&ViewRows, &Params) -> ListReply + Send + Sync>;

/// Update handler: receives the stored document (if any) and the form
/// fields, returns the document to store or a rejection reason
pub type UpdateFn =
    Arc<dyn Fn(Option<Document>, &Params) -> Result<Document, String> + Send + Sync>;

/// Built-in reduce functions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reduce {
    Count,
    Sum,
}

#[derive(Clone)]
pub struct ViewDef {
    pub map: MapFn,
    pub reduce: Option<Reduce>,
}

impl std::fmt::Debug for ViewDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ViewDef")
            .field("reduce", &self.reduce)
            .finish_non_exhaustive()
    }
}

/// Output of a list function
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListReply {
    pub content_type: String,
    pub body: String,
}

impl ListReply {
    pub fn new(content_type: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            content_type: content_type.into(),
            body: body.into(),
        }
    }
}

fn key(db: &str, design: &str, name: &str) -> String {
    format!("{}\u{0}{}\u{0}{}", db, design, name)
}

/// Registered design functions of every database
#[derive(Default)]
pub struct Registry {
    filters: DashMap<String, FilterFn>,
    views: DashMap<String, ViewDef>,
    lists: DashMap<String, ListFn>,
    updates: DashMap<String, UpdateFn>,
}

impl Registry {
    pub fn add_filter(&self, db: &str, design: &str, name: &str, f: FilterFn) {
        self.filters.insert(key(db, design, name), f);
    }

    pub fn add_view(&self, db: &str, design: &str, name: &str, view: ViewDef) {
        self.views.insert(key(db, design, name), view);
    }

    pub fn add_list(&self, db: &str, design: &str, name: &str, f: ListFn) {
        self.lists.insert(key(db, design, name), f);
    }

    pub fn add_update(&self, db: &str, design: &str, name: &str, f: UpdateFn) {
        self.updates.insert(key(db, design, name), f);
    }

    pub fn filter(&self, db: &str, design: &str, name: &str) -> ServerResult<FilterFn> {
        self.filters
            .get(&key(db, design, name))
            .map(|f| f.value().clone())
            .ok_or_else(|| ServerError::not_found(format!("missing filter {}/{}", design, name)))
    }

    pub fn view(&self, db: &str, design: &str, name: &str) -> ServerResult<ViewDef> {
        self.views
            .get(&key(db, design, name))
            .map(|v| v.value().clone())
            .ok_or_else(|| ServerError::not_found("missing_named_view"))
    }

    pub fn list(&self, db: &str, design: &str, name: &str) -> ServerResult<ListFn> {
        self.lists
            .get(&key(db, design, name))
            .map(|f| f.value().clone())
            .ok_or_else(|| ServerError::not_found(format!("missing list function {}", name)))
    }

    pub fn update(&self, db: &str, design: &str, name: &str) -> ServerResult<UpdateFn> {
        self.updates
            .get(&key(db, design, name))
            .map(|f| f.value().clone())
            .ok_or_else(|| ServerError::not_found(format!("missing update function {}", name)))
    }

    /// Forget everything registered for a database
    pub fn drop_db(&self, db: &str) {
        let prefix = format!("{}\u{0}", db);
        self.filters.retain(|k, _| !k.starts_with(&prefix));
        self.views.retain(|k, _| !k.starts_with(&prefix));
        self.lists.retain(|k, _| !k.starts_with(&prefix));
        self.updates.retain(|k, _| !k.starts_with(&prefix));
    }
}

fn type_rank(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Bool(false) => 1,
        Value::Bool(true) => 2,
        Value::Number(_) => 3,
        Value::String(_) => 4,
        Value::Array(_) => 5,
        Value::Object(_) => 6,
    }
}

/// View key collation: null < false < true < numbers < strings < arrays < objects
pub fn collate(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let x = a.as_f64().unwrap_or(0.0);
            let y = b.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (l, r) in x.iter().zip(y.iter()) {
                let ord = collate(l, r);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((lk, lv), (rk, rv)) in x.iter().zip(y.iter()) {
                let ord = lk.cmp(rk).then_with(|| collate(lv, rv));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn json_param(params: &Params, names: &[&str]) -> ServerResult<Option<Value>> {
    for name in names {
        if let Some(raw) = params.get(name) {
            let value: serde_json::Value = serde_json::from_str(raw)
                .map_err(|e| ServerError::bad_request(format!("invalid {}: {}", name, e)))?;
            return Ok(Some(value.into()));
        }
    }
    Ok(None)
}

fn bool_param(params: &Params, name: &str, default: bool) -> ServerResult<bool> {
    match params.get(name) {
        None => Ok(default),
        Some("true") => Ok(true),
        Some("false") => Ok(false),
        Some(other) => Err(ServerError::bad_request(format!(
            "invalid boolean for {}: {}",
            name, other
        ))),
    }
}

fn usize_param(params: &Params, name: &str) -> ServerResult<Option<usize>> {
    params
        .get(name)
        .map(|raw| {
            raw.parse()
                .map_err(|_| ServerError::bad_request(format!("invalid {}: {}", name, raw)))
        })
        .transpose()
}

/// Row selection parameters shared by views and `_all_docs`
pub struct RowQuery {
    pub key: Option<Value>,
    pub start: Option<Value>,
    pub end: Option<Value>,
    pub inclusive_end: bool,
    pub descending: bool,
    pub skip: usize,
    pub limit: Option<usize>,
    pub include_docs: bool,
    pub conflicts: bool,
}

impl RowQuery {
    pub fn from_params(params: &Params) -> ServerResult<Self> {
        Ok(Self {
            key: json_param(params, &["key"])?,
            start: json_param(params, &["startkey", "start_key"])?,
            end: json_param(params, &["endkey", "end_key"])?,
            inclusive_end: bool_param(params, "inclusive_end", true)?,
            descending: bool_param(params, "descending", false)?,
            skip: usize_param(params, "skip")?.unwrap_or(0),
            limit: usize_param(params, "limit")?,
            include_docs: bool_param(params, "include_docs", false)?,
            conflicts: bool_param(params, "conflicts", false)?,
        })
    }

    fn in_range(&self, key: &Value) -> bool {
        if let Some(exact) = &self.key {
            return collate(key, exact) == Ordering::Equal;
        }
        let (after_start, before_end) = if self.descending {
            (Ordering::Less, Ordering::Greater)
        } else {
            (Ordering::Greater, Ordering::Less)
        };
        let start_ok = self
            .start
            .as_ref()
            .map_or(true, |s| collate(key, s) != after_start.reverse());
        let end_ok = self.end.as_ref().map_or(true, |e| {
            let ord = collate(key, e);
            ord == before_end || (self.inclusive_end && ord == Ordering::Equal)
        });
        start_ok && end_ok
    }

    /// Order, range-restrict and page sorted rows; returns `(offset, rows)`
    pub fn select(&self, mut rows: Vec<ViewRow>) -> (u64, Vec<ViewRow>) {
        if self.descending {
            rows.reverse();
        }
        let first = rows
            .iter()
            .position(|r| self.in_range(&r.key))
            .unwrap_or(rows.len());
        let selected: Vec<ViewRow> = rows
            .into_iter()
            .filter(|r| self.in_range(&r.key))
            .skip(self.skip)
            .take(self.limit.unwrap_or(usize::MAX))
            .collect();
        ((first + self.skip) as u64, selected)
    }
}

/// Run a view over live documents (already in id order)
pub fn query_view(
    view: &ViewDef,
    docs: &[Document],
    params: &Params,
    lookup: impl Fn(&str, bool) -> Option<Document>,
) -> ServerResult<ViewRows> {
    let query = RowQuery::from_params(params)?;
    let reduce = match view.reduce {
        Some(reduce) if bool_param(params, "reduce", true)? => Some(reduce),
        _ => None,
    };
    if reduce.is_some() && query.include_docs {
        return Err(ServerError::bad_request(
            "`include_docs` is invalid for reduce",
        ));
    }

    let mut rows: Vec<ViewRow> = docs
        .iter()
        .flat_map(|doc| {
            let id = doc.id.clone();
            (view.map)(doc).into_iter().map(move |(key, value)| ViewRow {
                id: id.clone(),
                key,
                value,
                doc: None,
                error: None,
            })
        })
        .collect();
    rows.sort_by(|a, b| collate(&a.key, &b.key).then_with(|| a.id.cmp(&b.id)));
    let total_rows = rows.len() as u64;

    let Some(reduce) = reduce else {
        let (offset, mut rows) = query.select(rows);
        if query.include_docs {
            for row in &mut rows {
                row.doc = row.id.as_deref().and_then(|id| lookup(id, query.conflicts));
            }
        }
        return Ok(ViewRows {
            total_rows: Some(total_rows),
            offset: Some(offset),
            rows,
        });
    };

    let group_level = if bool_param(params, "group", false)? {
        Some(usize::MAX)
    } else {
        usize_param(params, "group_level")?
    };

    let in_range = RowQuery {
        skip: 0,
        limit: None,
        ..RowQuery::from_params(params)?
    }
    .select(rows)
    .1;

    let mut groups: Vec<(Value, Vec<Value>)> = Vec::new();
    for row in in_range {
        let group_key = match group_level {
            None => Value::Null,
            Some(level) => match row.key {
                Value::Array(items) if level != usize::MAX => {
                    Value::Array(items.into_iter().take(level).collect())
                }
                other => other,
            },
        };
        let same_group = groups
            .last()
            .is_some_and(|(k, _)| collate(k, &group_key) == Ordering::Equal);
        match groups.last_mut() {
            Some((_, values)) if same_group => values.push(row.value),
            _ => groups.push((group_key, vec![row.value])),
        }
    }

    let rows = groups
        .into_iter()
        .map(|(key, values)| ViewRow {
            id: None,
            key,
            value: apply_reduce(reduce, &values),
            doc: None,
            error: None,
        })
        .skip(query.skip)
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();

    Ok(ViewRows {
        total_rows: None,
        offset: None,
        rows,
    })
}

fn apply_reduce(reduce: Reduce, values: &[Value]) -> Value {
    match reduce {
        Reduce::Count => Value::Number(Number::Integer(values.len() as i64)),
        Reduce::Sum => {
            if values.iter().all(|v| v.as_i64().is_some()) {
                Value::Number(Number::Integer(values.iter().filter_map(Value::as_i64).sum()))
            } else {
                Value::Number(Number::Float(values.iter().filter_map(Value::as_f64).sum()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn people() -> Vec<Document> {
        [("a", "red", 3), ("b", "blue", 5), ("c", "red", 7), ("d", "green", 1)]
            .iter()
            .map(|(id, color, n)| {
                Document::with_id(*id)
                    .field("color", *color)
                    .field("n", *n as i64)
            })
            .collect()
    }

    fn by_color() -> ViewDef {
        ViewDef {
            map: Arc::new(|doc: &Document| {
                vec![(doc.get("color").cloned().unwrap_or_default(), doc.get("n").cloned().unwrap_or_default())]
            }),
            reduce: Some(Reduce::Sum),
        }
    }

    fn no_docs(_: &str, _: bool) -> Option<Document> {
        None
    }

    #[test]
    fn test_collation_order() {
        let mut values = vec![
            Value::from("b"),
            Value::from(vec![Value::from(1i64)]),
            Value::Null,
            Value::from(2i64),
            Value::from(true),
            Value::from("a"),
            Value::from(false),
            Value::from(1.5),
        ];
        values.sort_by(collate);
        assert_eq!(
            values,
            vec![
                Value::Null,
                Value::from(false),
                Value::from(true),
                Value::from(1.5),
                Value::from(2i64),
                Value::from("a"),
                Value::from("b"),
                Value::from(vec![Value::from(1i64)]),
            ]
        );
    }

    #[test]
    fn test_map_rows_sorted_and_ranged() {
        let params = Params::new().with("reduce", "false");
        let rows = query_view(&by_color(), &people(), &params, no_docs).unwrap();
        assert_eq!(rows.total_rows, Some(4));
        assert_eq!(rows.ids().collect::<Vec<_>>(), vec!["b", "d", "a", "c"]);

        let params = Params::new()
            .with("reduce", "false")
            .with("startkey", "\"green\"")
            .with("limit", "2");
        let rows = query_view(&by_color(), &people(), &params, no_docs).unwrap();
        assert_eq!(rows.ids().collect::<Vec<_>>(), vec!["d", "a"]);
        assert_eq!(rows.offset, Some(1));

        let params = Params::new().with("reduce", "false").with("descending", "true");
        let rows = query_view(&by_color(), &people(), &params, no_docs).unwrap();
        assert_eq!(rows.ids().collect::<Vec<_>>(), vec!["c", "a", "d", "b"]);
    }

    #[test]
    fn test_reduce_and_group() {
        let rows = query_view(&by_color(), &people(), &Params::new(), no_docs).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows.rows[0].value.as_i64(), Some(16));

        let params = Params::new().with("group", "true");
        let rows = query_view(&by_color(), &people(), &params, no_docs).unwrap();
        let items: Vec<_> = rows
            .items()
            .map(|(k, v)| (k.as_str().unwrap().to_string(), v.as_i64().unwrap()))
            .collect();
        assert_eq!(
            items,
            vec![("blue".into(), 5), ("green".into(), 1), ("red".into(), 10)]
        );
    }

    #[test]
    fn test_include_docs_invalid_for_reduce() {
        let params = Params::new().with("include_docs", "true");
        let err = query_view(&by_color(), &people(), &params, no_docs).unwrap_err();
        assert_eq!(err.status, 400);
    }

    #[test]
    fn test_registry_lookup() {
        let registry = Registry::default();
        registry.add_view("db", "app", "by_color", by_color());
        assert!(registry.view("db", "app", "by_color").is_ok());
        assert_eq!(registry.view("db", "app", "nope").unwrap_err().status, 404);
        assert_eq!(registry.view("other", "app", "by_color").unwrap_err().status, 404);

        registry.drop_db("db");
        assert!(registry.view("db", "app", "by_color").is_err());
    }
}
