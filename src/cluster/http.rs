//! REST client for Elasticsearch-style clusters

use crate::cluster::{
    BulkItemError, BulkItemResult, BulkResponse, Cluster, ClusterConnector, DocScope, Document,
    NamePattern, RangeBucket, RangeStats, ScrollPage, SizeStats, UpsertOp,
};
use crate::error::{ClusterError, ClusterResult};
use crate::task::ClusterEndpoint;

use parking_lot::Mutex;
use reqwest::{Method, StatusCode};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// How long an idle scroll context is kept alive
const SCROLL_KEEPALIVE: &str = "5m";

/// Client for one cluster endpoint
pub struct HttpCluster {
    endpoint: ClusterEndpoint,
    base: String,
    client: reqwest::Client,
}

impl HttpCluster {
    pub fn new(endpoint: ClusterEndpoint, timeout: Duration) -> ClusterResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("cluster-ferry/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ClusterError::Transport {
                host: endpoint.host.clone(),
                reason: e.to_string(),
            })?;

        let base = endpoint.host.trim_end_matches('/').to_string();
        Ok(Self {
            endpoint,
            base,
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base, path.trim_start_matches('/'))
    }

    fn transport(&self, err: impl std::fmt::Display) -> ClusterError {
        ClusterError::Transport {
            host: self.endpoint.host.clone(),
            reason: err.to_string(),
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> ClusterError {
        ClusterError::Malformed {
            host: self.endpoint.host.clone(),
            reason: reason.into(),
        }
    }

    /// Send a request and decode the JSON reply; 404 maps to `None`
    async fn send(&self, request: reqwest::RequestBuilder) -> ClusterResult<Option<Value>> {
        let response = request.send().await.map_err(|e| self.transport(e))?;
        let status = response.status();

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await.map_err(|e| self.transport(e))?;
        if !status.is_success() {
            return Err(ClusterError::Status {
                host: self.endpoint.host.clone(),
                status: status.as_u16(),
                body,
            });
        }

        if body.trim().is_empty() {
            return Ok(Some(Value::Null));
        }
        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| self.malformed(e.to_string()))
    }

    async fn json(&self, method: Method, path: &str, body: Option<&Value>) -> ClusterResult<Option<Value>> {
        let mut request = self.client.request(method, self.url(path));
        if let Some(body) = body {
            request = request.json(body);
        }
        self.send(request).await
    }

    /// Like [`Self::json`], but a missing resource is an error
    async fn required(&self, method: Method, path: &str, body: Option<&Value>) -> ClusterResult<Value> {
        self.json(method, path, body)
            .await?
            .ok_or_else(|| ClusterError::NotFound {
                host: self.endpoint.host.clone(),
                what: path.to_string(),
            })
    }

    fn search_path(index: &str, doc_type: &str, endpoint: &str) -> String {
        if doc_type.is_empty() {
            format!("{}/{}", index, endpoint)
        } else {
            format!("{}/{}/{}", index, doc_type, endpoint)
        }
    }

    fn scope_query(scope: &DocScope) -> Value {
        if scope.is_bounded() {
            let mut range = serde_json::Map::new();
            range.insert(
                scope.size_field.clone(),
                json!({ "gte": scope.min_size, "lt": scope.max_size }),
            );
            json!({ "range": range })
        } else {
            json!({ "match_all": {} })
        }
    }

    /// 7.x caps `hits.total` at 10 000 unless asked for the exact figure
    fn tracks_total_hits(&self) -> bool {
        self.endpoint.major_version().is_some_and(|major| major >= 7)
    }

    fn size_ranges_body(&self, field: &str, edges: &[(i64, i64)]) -> Value {
        let ranges: Vec<Value> = edges
            .iter()
            .map(|(from, to)| json!({ "from": from, "to": to }))
            .collect();
        let mut body = json!({
            "size": 0,
            "aggs": { "size_ranges": { "range": { "field": field, "ranges": ranges } } }
        });
        if self.tracks_total_hits() {
            body["track_total_hits"] = json!(true);
        }
        body
    }

    fn parse_page(&self, value: &Value) -> ClusterResult<ScrollPage> {
        let scroll_id = value["_scroll_id"].as_str().map(str::to_string);
        let hits = value["hits"]["hits"]
            .as_array()
            .ok_or_else(|| self.malformed("search response without hits.hits"))?;

        let documents = hits
            .iter()
            .map(|hit| Document {
                index: hit["_index"].as_str().unwrap_or_default().to_string(),
                doc_type: hit["_type"].as_str().unwrap_or_default().to_string(),
                id: hit["_id"].as_str().unwrap_or_default().to_string(),
                source: hit["_source"].clone(),
            })
            .collect();

        Ok(ScrollPage {
            scroll_id,
            documents,
        })
    }

    /// Object keys of a response, sorted
    fn keys(value: Option<Value>) -> Vec<String> {
        let mut keys: Vec<String> = value
            .and_then(|v| v.as_object().map(|o| o.keys().cloned().collect()))
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

/// `hits.total` is a number before 7.x and `{value, relation}` after
fn hit_total(value: &Value) -> u64 {
    let total = &value["hits"]["total"];
    total
        .as_u64()
        .or_else(|| total["value"].as_u64())
        .unwrap_or(0)
}

fn shard_total(value: &Value) -> u32 {
    value["_shards"]["total"].as_u64().unwrap_or(1).max(1) as u32
}

fn parse_bulk_item(item: &Value) -> BulkItemResult {
    // Each item is keyed by its action name
    let inner = item
        .as_object()
        .and_then(|o| o.values().next())
        .cloned()
        .unwrap_or(Value::Null);

    let status = inner["status"].as_u64().unwrap_or(0) as u16;
    let error = match &inner["error"] {
        Value::Null => None,
        Value::String(text) => Some(BulkItemError {
            kind: text.split('[').next().unwrap_or_default().to_string(),
            reason: text.clone(),
        }),
        other => Some(BulkItemError {
            kind: other["type"].as_str().unwrap_or("unknown").to_string(),
            reason: other["reason"].as_str().unwrap_or_default().to_string(),
        }),
    };

    BulkItemResult {
        id: inner["_id"].as_str().unwrap_or_default().to_string(),
        status,
        error,
    }
}

#[async_trait::async_trait]
impl Cluster for HttpCluster {
    fn endpoint(&self) -> &ClusterEndpoint {
        &self.endpoint
    }

    async fn resolve_indices(&self, patterns: &str) -> ClusterResult<Vec<String>> {
        let settings = self.json(Method::GET, "_all/_settings", None).await?;
        let names = Self::keys(settings);
        Ok(NamePattern::parse(patterns).filter(names.iter().map(String::as_str)))
    }

    async fn types(&self, index: &str) -> ClusterResult<Vec<String>> {
        let mapping = self.required(Method::GET, &format!("{}/_mapping", index), None).await?;
        let mappings = &mapping[index]["mappings"];

        // Typeless mappings carry their properties directly
        if mappings.get("properties").is_some() {
            return Ok(vec!["_doc".to_string()]);
        }
        Ok(Self::keys(Some(mappings.clone())))
    }

    async fn count(&self, scope: &DocScope) -> ClusterResult<u64> {
        let body = json!({ "query": Self::scope_query(scope) });
        let path = Self::search_path(&scope.index, &scope.doc_type, "_count");
        let reply = self.required(Method::POST, &path, Some(&body)).await?;
        reply["count"]
            .as_u64()
            .ok_or_else(|| self.malformed("count response without count"))
    }

    async fn size_stats(&self, index: &str, doc_type: &str, field: &str) -> ClusterResult<SizeStats> {
        let body = json!({
            "size": 0,
            "aggs": { "size_stats": { "stats": { "field": field } } }
        });
        let path = Self::search_path(index, doc_type, "_search");
        let reply = self.required(Method::POST, &path, Some(&body)).await?;

        let stats = &reply["aggregations"]["size_stats"];
        Ok(SizeStats {
            count: stats["count"].as_u64().unwrap_or(0),
            min: stats["min"].as_f64().unwrap_or(0.0) as i64,
            max: stats["max"].as_f64().unwrap_or(0.0) as i64,
            shards: shard_total(&reply),
        })
    }

    async fn size_ranges(
        &self,
        index: &str,
        doc_type: &str,
        field: &str,
        edges: &[(i64, i64)],
    ) -> ClusterResult<RangeStats> {
        let body = self.size_ranges_body(field, edges);
        let path = Self::search_path(index, doc_type, "_search");
        let reply = self.required(Method::POST, &path, Some(&body)).await?;

        let buckets = reply["aggregations"]["size_ranges"]["buckets"]
            .as_array()
            .ok_or_else(|| self.malformed("range aggregation without buckets"))?
            .iter()
            .map(|b| RangeBucket {
                from: b["from"].as_f64().unwrap_or(0.0) as i64,
                to: b["to"].as_f64().unwrap_or(0.0) as i64,
                doc_count: b["doc_count"].as_u64().unwrap_or(0),
            })
            .collect();

        Ok(RangeStats {
            total: hit_total(&reply),
            shards: shard_total(&reply),
            buckets,
        })
    }

    async fn open_scroll(&self, scope: &DocScope, page_size: usize) -> ClusterResult<ScrollPage> {
        let body = json!({
            "size": page_size,
            "query": Self::scope_query(scope),
            "sort": ["_doc"]
        });
        let path = format!(
            "{}?scroll={}",
            Self::search_path(&scope.index, &scope.doc_type, "_search"),
            SCROLL_KEEPALIVE
        );
        let reply = self.required(Method::POST, &path, Some(&body)).await?;
        self.parse_page(&reply)
    }

    async fn next_scroll(&self, scroll_id: &str) -> ClusterResult<ScrollPage> {
        let body = json!({ "scroll": SCROLL_KEEPALIVE, "scroll_id": scroll_id });
        let reply = self.required(Method::POST, "_search/scroll", Some(&body)).await?;
        self.parse_page(&reply)
    }

    async fn clear_scroll(&self, scroll_id: &str) -> ClusterResult<()> {
        let body = json!({ "scroll_id": [scroll_id] });
        self.json(Method::DELETE, "_search/scroll", Some(&body)).await?;
        Ok(())
    }

    async fn bulk(&self, ops: &[UpsertOp]) -> ClusterResult<BulkResponse> {
        if ops.is_empty() {
            return Ok(BulkResponse::default());
        }

        let mut payload = String::new();
        for op in ops {
            let (action, body) = op.to_bulk_lines();
            payload.push_str(&action.to_string());
            payload.push('\n');
            payload.push_str(&body.to_string());
            payload.push('\n');
        }

        let request = self
            .client
            .post(self.url("_bulk"))
            .header(reqwest::header::CONTENT_TYPE, "application/x-ndjson")
            .body(payload);
        let reply = self.send(request).await?.ok_or_else(|| ClusterError::NotFound {
            host: self.endpoint.host.clone(),
            what: "_bulk".to_string(),
        })?;

        let items = reply["items"]
            .as_array()
            .ok_or_else(|| self.malformed("bulk response without items"))?
            .iter()
            .map(parse_bulk_item)
            .collect();

        Ok(BulkResponse { items })
    }

    async fn get_index(&self, name: &str) -> ClusterResult<Option<Value>> {
        let reply = self.json(Method::GET, name, None).await?;
        Ok(reply.and_then(|mut v| v.get_mut(name).map(Value::take)))
    }

    async fn index_exists(&self, name: &str) -> ClusterResult<bool> {
        let response = self
            .client
            .head(self.url(name))
            .send()
            .await
            .map_err(|e| self.transport(e))?;
        Ok(response.status().is_success())
    }

    async fn put_index(&self, name: &str, config: &Value) -> ClusterResult<()> {
        self.required(Method::PUT, name, Some(config)).await?;
        Ok(())
    }

    async fn resolve_templates(&self, patterns: &str) -> ClusterResult<Vec<String>> {
        let templates = self.json(Method::GET, "_template", None).await?;
        let names = Self::keys(templates);
        Ok(NamePattern::parse(patterns).filter(names.iter().map(String::as_str)))
    }

    async fn get_template(&self, name: &str) -> ClusterResult<Option<Value>> {
        let reply = self
            .json(Method::GET, &format!("_template/{}", name), None)
            .await?;
        Ok(reply.and_then(|mut v| v.get_mut(name).map(Value::take)))
    }

    async fn put_template(&self, name: &str, config: &Value) -> ClusterResult<()> {
        self.required(Method::PUT, &format!("_template/{}", name), Some(config))
            .await?;
        Ok(())
    }
}

/// Connector that builds one [`HttpCluster`] per endpoint and reuses it
pub struct HttpConnector {
    timeout: Duration,
    clients: Mutex<HashMap<ClusterEndpoint, Arc<HttpCluster>>>,
}

impl HttpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }
}

impl ClusterConnector for HttpConnector {
    fn connect(&self, endpoint: &ClusterEndpoint) -> ClusterResult<Arc<dyn Cluster>> {
        let mut clients = self.clients.lock();
        if let Some(client) = clients.get(endpoint) {
            return Ok(client.clone());
        }
        let client = Arc::new(HttpCluster::new(endpoint.clone(), self.timeout)?);
        clients.insert(endpoint.clone(), client.clone());
        Ok(client)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_total_both_shapes() {
        assert_eq!(hit_total(&json!({"hits": {"total": 12}})), 12);
        assert_eq!(
            hit_total(&json!({"hits": {"total": {"value": 7, "relation": "eq"}}})),
            7
        );
        assert_eq!(hit_total(&json!({})), 0);
    }

    #[test]
    fn test_parse_bulk_item_shapes() {
        let modern = parse_bulk_item(&json!({
            "update": {
                "_id": "a",
                "status": 429,
                "error": {"type": "es_rejected_execution_exception", "reason": "queue full"}
            }
        }));
        assert!(modern.is_rejection());
        assert_eq!(modern.id, "a");

        let legacy = parse_bulk_item(&json!({
            "update": {"_id": "b", "status": 400, "error": "MapperParsingException[failed]"}
        }));
        assert_eq!(legacy.error.as_ref().unwrap().kind, "MapperParsingException");
        assert!(!legacy.is_rejection());

        let ok = parse_bulk_item(&json!({"update": {"_id": "c", "status": 201}}));
        assert!(ok.is_ok());
    }

    #[test]
    fn test_scope_query() {
        let bounded = DocScope::all("i", "t", "_size").with_range(0, 100);
        let query = HttpCluster::scope_query(&bounded);
        assert_eq!(query["range"]["_size"]["gte"], 0);
        assert_eq!(query["range"]["_size"]["lt"], 100);

        let all = DocScope::all("i", "t", "_size");
        assert!(HttpCluster::scope_query(&all).get("match_all").is_some());
    }

    #[test]
    fn test_size_ranges_body_asks_for_exact_total_on_7x() {
        let edges = [(0, 600), (600, 900), (900, 1025)];
        let timeout = Duration::from_secs(5);

        let modern = HttpCluster::new(ClusterEndpoint::new("http://new:9200", "7.x"), timeout).unwrap();
        let body = modern.size_ranges_body("_size", &edges);
        assert_eq!(body["track_total_hits"], json!(true));
        assert_eq!(body["size"], 0);
        let ranges = body["aggs"]["size_ranges"]["range"]["ranges"].as_array().unwrap();
        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[2], json!({"from": 900, "to": 1025}));

        let legacy = HttpCluster::new(ClusterEndpoint::new("http://old:9200", "2.4"), timeout).unwrap();
        assert!(legacy
            .size_ranges_body("_size", &edges)
            .get("track_total_hits")
            .is_none());
    }

    #[test]
    fn test_connector_reuses_clients() {
        let connector = HttpConnector::new(Duration::from_secs(5));
        let endpoint = ClusterEndpoint::new("http://localhost:9200", "2.4");
        let a = connector.connect(&endpoint).unwrap();
        let b = connector.connect(&endpoint).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.endpoint().host, "http://localhost:9200");
    }
}
