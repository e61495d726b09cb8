//! The Couch backend adapter
//!
//! Index materialization compiles every declared index into a generated
//! map-function string restricted to the owning type:
//!
//! ```text
//! function(doc) { if (doc.$type == "Order" && <predicate>) { emit([doc.customer], null); }}
//! ```
//!
//! one design document per entity type, written as `_design/<Type>`.
//! Query execution is a view GET with `include_docs=true&reduce=false`
//! plus key or range parameters; a prefix range is
//! `[key .. key + {}]` with `inclusive_end=false`, swapped and flagged
//! `descending=true` for reverse order.

use async_trait::async_trait;
use futures::stream;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::debug;

use docent_core::{
    Backend, ByteStream, DocStream, Error, IndexSpec, KeyMatch, QueryPlan, Result, Schema,
    StoreReceipt,
};

use crate::config::CouchConfig;
use crate::database::CouchDatabase;
use crate::driver::{HttpDriver, HttpRequest, ReqwestDriver};

// =============================================================================
// View compilation
// =============================================================================

/// The emitted key expression: custom expression, else the composite key
/// fields, else `[doc.<indexName>]`.
fn key_expr(spec: &IndexSpec) -> String {
    if let Some(expr) = &spec.key_expr {
        return expr.clone();
    }
    if !spec.keys.is_empty() {
        let fields: Vec<String> = spec.keys.iter().map(|k| format!("doc.{k}")).collect();
        return format!("[{}]", fields.join(","));
    }
    format!("[doc.{}]", spec.name)
}

fn emit_stmt(spec: &IndexSpec) -> String {
    match &spec.emit_expr {
        Some(expr) => expr.clone(),
        None => format!("emit({}, null);", key_expr(spec)),
    }
}

/// Generate the map function for one index on one type
pub fn map_function(type_name: &str, spec: &IndexSpec) -> String {
    let mut restrict = format!("doc.$type == \"{type_name}\"");
    if let Some(predicate) = &spec.predicate {
        restrict = format!("{restrict} && {predicate}");
    }
    format!("function(doc) {{ if ({restrict}) {{ {} }}}}", emit_stmt(spec))
}

/// Assemble the view object (map + optional reduce) for one index
pub fn view_object(type_name: &str, spec: &IndexSpec) -> Value {
    let mut view = Map::new();
    view.insert("map".to_string(), Value::String(map_function(type_name, spec)));
    if let Some(reduce) = &spec.reduce_expr {
        view.insert("reduce".to_string(), Value::String(reduce.clone()));
    }
    Value::Object(view)
}

/// Assemble the design document for one entity type
pub fn design_document(type_name: &str, indexes: &[IndexSpec]) -> Value {
    let mut views = Map::new();
    for spec in indexes {
        views.insert(spec.name.clone(), view_object(type_name, spec));
    }
    json!({
        "language": "javascript",
        "views": Value::Object(views),
    })
}

/// Compile a query plan into view parameters
pub fn view_params(plan: &QueryPlan) -> Vec<(String, String)> {
    let mut params = vec![
        ("include_docs".to_string(), "true".to_string()),
        ("reduce".to_string(), "false".to_string()),
    ];
    match &plan.matcher {
        KeyMatch::Exact(components) => {
            params.push(("key".to_string(), Value::Array(components.clone()).to_string()));
            if plan.descending {
                params.push(("descending".to_string(), "true".to_string()));
            }
        }
        KeyMatch::Prefix(components) => {
            let low = Value::Array(components.clone());
            let mut high = components.clone();
            high.push(json!({}));
            let high = Value::Array(high);
            if plan.descending {
                params.push(("startkey".to_string(), high.to_string()));
                params.push(("endkey".to_string(), low.to_string()));
                params.push(("descending".to_string(), "true".to_string()));
            } else {
                params.push(("startkey".to_string(), low.to_string()));
                params.push(("endkey".to_string(), high.to_string()));
            }
            params.push(("inclusive_end".to_string(), "false".to_string()));
        }
    }
    params
}

fn rows_to_docs(body: &Value) -> Vec<Value> {
    body.get("rows")
        .and_then(Value::as_array)
        .map(|rows| {
            rows.iter()
                .filter_map(|row| {
                    let doc = row.get("doc")?;
                    if doc.is_null() {
                        None
                    } else {
                        Some(doc.clone())
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

fn doc_stream(docs: Vec<Value>) -> DocStream {
    Box::pin(stream::iter(docs.into_iter().map(Ok::<Value, Error>)))
}

// =============================================================================
// Adapter
// =============================================================================

/// CouchDB-style backend adapter
pub struct CouchBackend {
    driver: Arc<dyn HttpDriver>,
    database: CouchDatabase,
}

impl CouchBackend {
    /// Adapter over the default HTTP driver
    pub fn new(config: &CouchConfig) -> Self {
        let driver = ReqwestDriver::new(config.base_url(), config.credentials());
        CouchBackend {
            driver: Arc::new(driver),
            database: CouchDatabase::new(config.database.clone()),
        }
    }

    /// Adapter over an injected HTTP driver
    pub fn with_driver(driver: Arc<dyn HttpDriver>, database: impl Into<String>) -> Self {
        CouchBackend {
            driver,
            database: CouchDatabase::new(database),
        }
    }

    async fn execute_json(&self, req: HttpRequest) -> Result<Value> {
        let resp = self.driver.execute(req).await?;
        resp.ensure_ok()?;
        resp.json()
    }

    fn receipt_from(&self, result: &Value) -> StoreReceipt {
        let mut receipt = StoreReceipt::default();
        if result.get("ok").and_then(Value::as_bool).unwrap_or(false) {
            receipt.rev = result
                .get("rev")
                .and_then(Value::as_str)
                .map(str::to_owned);
        }
        receipt
    }
}

#[async_trait]
impl Backend for CouchBackend {
    fn name(&self) -> &'static str {
        "couch"
    }

    async fn load(&self, _type_name: &str, id: &str) -> Result<Option<Value>> {
        let resp = self.driver.execute(self.database.document_load(id)).await?;
        if resp.status == 404 {
            return Ok(None);
        }
        resp.ensure_ok()?;
        Ok(Some(resp.json()?))
    }

    async fn store(&self, _type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt> {
        let result = self
            .execute_json(self.database.document_create(false, id, doc))
            .await?;
        Ok(self.receipt_from(&result))
    }

    async fn update(&self, _type_name: &str, id: &str, doc: Value) -> Result<StoreReceipt> {
        let result = self
            .execute_json(self.database.document_update(false, id, doc))
            .await?;
        Ok(self.receipt_from(&result))
    }

    async fn delete(&self, type_name: &str, id: &str, rev: Option<&str>) -> Result<()> {
        let rev = rev.ok_or_else(|| Error::MissingRev {
            type_name: type_name.to_string(),
        })?;
        self.execute_json(self.database.document_delete(id, rev))
            .await?;
        Ok(())
    }

    async fn query(&self, plan: QueryPlan) -> Result<DocStream> {
        let req = self
            .database
            .view(&plan.type_name, &plan.index.name, view_params(&plan));
        let body = self.execute_json(req).await?;
        Ok(doc_stream(rows_to_docs(&body)))
    }

    async fn load_many(&self, _type_name: &str, ids: Vec<String>) -> Result<DocStream> {
        let body = self.execute_json(self.database.docs(&ids)).await?;
        Ok(doc_stream(rows_to_docs(&body)))
    }

    async fn save_attachment(
        &self,
        type_name: &str,
        id: &str,
        rev: Option<&str>,
        data: ByteStream,
    ) -> Result<StoreReceipt> {
        let rev = rev.ok_or_else(|| Error::MissingRev {
            type_name: type_name.to_string(),
        })?;
        let result = self
            .execute_json(self.database.attachment_create(id, rev, data))
            .await?;
        Ok(self.receipt_from(&result))
    }

    async fn read_attachment(&self, _type_name: &str, id: &str) -> Result<ByteStream> {
        let (status, stream) = self
            .driver
            .execute_streaming(self.database.attachment_load(id))
            .await?;
        if !(200..300).contains(&status) {
            return Err(Error::transport(status, "attachment read failed"));
        }
        Ok(stream)
    }

    async fn create_database(&self) -> Result<()> {
        self.execute_json(self.database.database_create()).await?;
        Ok(())
    }

    async fn drop_database(&self) -> Result<()> {
        self.execute_json(self.database.database_drop()).await?;
        Ok(())
    }

    async fn provision(&self, schema: &Schema) -> Result<()> {
        for model in schema.entity_models() {
            let design_id = format!("_design/{}", model.name());
            debug!("create design {} ({} views)", design_id, model.indexes().len());
            let doc = design_document(model.name(), model.indexes());
            let resp = self
                .driver
                .execute(self.database.document_create(true, &design_id, doc))
                .await?;
            // An existing design document means a previous provisioning run
            // already materialized these views.
            if resp.status == 409 {
                continue;
            }
            resp.ensure_ok()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(matcher: KeyMatch, descending: bool) -> QueryPlan {
        QueryPlan {
            type_name: "Order".to_string(),
            index: IndexSpec::new("byCustomer").keys(["customer"]),
            matcher,
            descending,
        }
    }

    #[test]
    fn test_map_function_restricts_on_type() {
        let spec = IndexSpec::new("byCustomer").keys(["customer"]);
        assert_eq!(
            map_function("Order", &spec),
            "function(doc) { if (doc.$type == \"Order\") { emit([doc.customer], null); }}"
        );
    }

    #[test]
    fn test_map_function_composite_key_and_predicate() {
        let spec = IndexSpec::new("byState")
            .keys(["state", "date"])
            .predicate("doc.active == true");
        assert_eq!(
            map_function("Order", &spec),
            "function(doc) { if (doc.$type == \"Order\" && doc.active == true) { emit([doc.state,doc.date], null); }}"
        );
    }

    #[test]
    fn test_map_function_defaults_key_to_index_name() {
        let spec = IndexSpec::new("customer");
        assert!(map_function("Order", &spec).contains("emit([doc.customer], null);"));
    }

    #[test]
    fn test_map_function_custom_emit() {
        let spec = IndexSpec::new("totals").emit_expr("emit(doc.customer, doc.total);");
        assert!(map_function("Order", &spec).contains("emit(doc.customer, doc.total);"));
    }

    #[test]
    fn test_view_object_with_reduce() {
        let spec = IndexSpec::new("totals").keys(["customer"]).reduce_expr("_sum");
        let view = view_object("Order", &spec);
        assert_eq!(view["reduce"], json!("_sum"));
        assert!(view["map"].as_str().unwrap().starts_with("function(doc)"));
    }

    #[test]
    fn test_design_document_one_entry_per_index() {
        let doc = design_document(
            "Order",
            &[
                IndexSpec::new("byCustomer").keys(["customer"]),
                IndexSpec::new("byState").keys(["state"]),
            ],
        );
        assert_eq!(doc["language"], json!("javascript"));
        let views = doc["views"].as_object().unwrap();
        assert_eq!(views.len(), 2);
        assert!(views.contains_key("byCustomer"));
        assert!(views.contains_key("byState"));
    }

    #[test]
    fn test_exact_key_params() {
        let params = view_params(&plan(KeyMatch::Exact(vec![json!("alice")]), false));
        assert!(params.contains(&("key".to_string(), r#"["alice"]"#.to_string())));
        assert!(params.contains(&("include_docs".to_string(), "true".to_string())));
        assert!(params.contains(&("reduce".to_string(), "false".to_string())));
        assert!(!params.iter().any(|(k, _)| k == "startkey"));
    }

    #[test]
    fn test_prefix_range_params() {
        let params = view_params(&plan(KeyMatch::Prefix(vec![json!("o1")]), false));
        assert!(params.contains(&("startkey".to_string(), r#"["o1"]"#.to_string())));
        assert!(params.contains(&("endkey".to_string(), r#"["o1",{}]"#.to_string())));
        assert!(params.contains(&("inclusive_end".to_string(), "false".to_string())));
        assert!(!params.iter().any(|(k, _)| k == "descending"));
    }

    #[test]
    fn test_prefix_range_descending_swaps_bounds() {
        let params = view_params(&plan(KeyMatch::Prefix(vec![json!("o1")]), true));
        assert!(params.contains(&("startkey".to_string(), r#"["o1",{}]"#.to_string())));
        assert!(params.contains(&("endkey".to_string(), r#"["o1"]"#.to_string())));
        assert!(params.contains(&("descending".to_string(), "true".to_string())));
        assert!(params.contains(&("inclusive_end".to_string(), "false".to_string())));
    }

    #[test]
    fn test_rows_to_docs_skips_missing() {
        let body = json!({
            "rows": [
                {"id": "a", "doc": {"_id": "a"}},
                {"id": "b", "doc": null},
                {"id": "c"},
                {"id": "d", "doc": {"_id": "d"}},
            ]
        });
        let docs = rows_to_docs(&body);
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0]["_id"], json!("a"));
        assert_eq!(docs[1]["_id"], json!("d"));
    }
}
