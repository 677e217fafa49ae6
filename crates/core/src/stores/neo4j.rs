use crate::config::StoreSettings;
use crate::error::{ConfigError, StoreError};
use crate::models::{DocType, EmbeddedChunk, SearchResult};
use crate::traits::{GraphVectorReader, GraphVectorWriter};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info};

const BACKEND: &str = "neo4j";

type Row = Vec<Value>;

/// Neo4j over the HTTP transactional endpoint.
pub struct Neo4jStore {
    endpoint: String,
    database: String,
    username: String,
    password: String,
    client: Client,
}

impl Neo4jStore {
    pub fn new(
        endpoint: impl Into<String>,
        database: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            database: database.into(),
            username: username.into(),
            password: password.into(),
            client: Client::new(),
        }
    }

    pub fn from_settings(settings: &StoreSettings) -> Result<Self, ConfigError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .build()
            .map_err(|error| ConfigError::Invalid(format!("neo4j http client: {error}")))?;

        Ok(Self {
            client,
            ..Self::new(
                settings.url.as_str(),
                settings.database.as_str(),
                settings.username.as_str(),
                settings.password.as_str(),
            )
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn tx_url(&self) -> String {
        format!("{}/db/{}/tx/commit", self.endpoint, self.database)
    }

    /// Runs `statements` in one transaction and returns the rows of each.
    async fn run(&self, statements: Vec<Value>) -> Result<Vec<Vec<Row>>, StoreError> {
        let response = self
            .client
            .post(self.tx_url())
            .basic_auth(&self.username, Some(&self.password))
            .json(&json!({ "statements": statements }))
            .send()
            .await
            .map_err(|error| self.transport_error(error))?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: format!("{status}: {}", response.text().await.unwrap_or_default()),
            });
        }

        let body: Value = response
            .json()
            .await
            .map_err(|error| self.transport_error(error))?;

        if let Some(error) = body
            .get("errors")
            .and_then(Value::as_array)
            .and_then(|errors| errors.first())
        {
            let code = error.get("code").and_then(Value::as_str).unwrap_or("unknown");
            let message = error.get("message").and_then(Value::as_str).unwrap_or_default();
            return Err(StoreError::Query(format!("{code}: {message}")));
        }

        Ok(extract_rows(&body))
    }

    fn transport_error(&self, error: reqwest::Error) -> StoreError {
        if error.is_connect() || error.is_timeout() {
            StoreError::Connection {
                endpoint: self.endpoint.clone(),
                reason: error.to_string(),
            }
        } else {
            StoreError::BackendResponse {
                backend: BACKEND.to_string(),
                details: error.to_string(),
            }
        }
    }

    async fn index_dimensions(&self) -> Result<HashMap<String, usize>, StoreError> {
        let names: Vec<&str> = DocType::ALL.iter().map(DocType::index_name).collect();
        let rows = self
            .run(vec![json!({
                "statement": "SHOW INDEXES YIELD name, type, options \
                              WHERE type = 'VECTOR' AND name IN $names \
                              RETURN name, options.indexConfig['vector.dimensions']",
                "parameters": { "names": names },
            })])
            .await?;

        Ok(rows
            .into_iter()
            .flatten()
            .filter_map(|row| {
                let name = row.get(0)?.as_str()?.to_string();
                let dimensions = row.get(1)?.as_u64()? as usize;
                Some((name, dimensions))
            })
            .collect())
    }
}

fn schema_statements(dimensions: usize) -> Vec<Value> {
    DocType::ALL
        .iter()
        .flat_map(|doc_type| {
            let label = doc_type.label();
            [
                format!(
                    "CREATE CONSTRAINT {}_id_unique IF NOT EXISTS FOR (c:{label}) REQUIRE c.id IS UNIQUE",
                    label.to_lowercase()
                ),
                format!(
                    "CREATE VECTOR INDEX {} IF NOT EXISTS FOR (c:{label}) ON (c.embedding) \
                     OPTIONS {{indexConfig: {{`vector.dimensions`: {dimensions}, \
                     `vector.similarity_function`: 'cosine'}}}}",
                    doc_type.index_name()
                ),
            ]
        })
        .map(|statement| json!({ "statement": statement }))
        .collect()
}

fn upsert_row(embedded: &EmbeddedChunk) -> Value {
    let chunk = &embedded.chunk;
    let mut props = Map::new();
    for (key, value) in &chunk.source_metadata {
        props.insert(key.clone(), Value::String(value.clone()));
    }
    props.insert("content".to_string(), json!(chunk.content));
    props.insert("doc_type".to_string(), json!(chunk.doc_type.as_str()));
    props.insert("provider".to_string(), json!(chunk.provider));
    props.insert("service".to_string(), json!(chunk.service));
    props.insert("name".to_string(), json!(chunk.name));
    props.insert("chunk_type".to_string(), json!(chunk.chunk_type.as_str()));
    props.insert("source_id".to_string(), json!(chunk.source_id));

    json!({
        "id": chunk.id,
        "props": props,
        "embedding": embedded.embedding,
    })
}

#[async_trait]
impl GraphVectorWriter for Neo4jStore {
    async fn ensure_schema(&self, dimensions: usize) -> Result<(), StoreError> {
        self.run(schema_statements(dimensions)).await?;

        for (index, actual) in self.index_dimensions().await? {
            if actual != dimensions {
                return Err(StoreError::DimensionMismatch {
                    index,
                    expected: dimensions,
                    actual,
                });
            }
        }

        info!(dimensions, "neo4j schema ensured");
        Ok(())
    }

    async fn upsert(&self, chunks: &[EmbeddedChunk]) -> Result<usize, StoreError> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let mut by_type: BTreeMap<DocType, Vec<Value>> = BTreeMap::new();
        for embedded in chunks {
            by_type
                .entry(embedded.chunk.doc_type)
                .or_default()
                .push(upsert_row(embedded));
        }

        let statements = by_type
            .into_iter()
            .map(|(doc_type, rows)| {
                json!({
                    "statement": format!(
                        "UNWIND $rows AS row \
                         MERGE (c:{} {{id: row.id}}) \
                         SET c += row.props, c.embedding = row.embedding, c.updated_at = datetime() \
                         RETURN count(c)",
                        doc_type.label()
                    ),
                    "parameters": { "rows": rows },
                })
            })
            .collect();

        let written = self
            .run(statements)
            .await?
            .iter()
            .flatten()
            .filter_map(|row| row.first().and_then(Value::as_u64))
            .sum::<u64>() as usize;

        debug!(written, "upserted chunks");
        Ok(written)
    }

    async fn remove_stale(
        &self,
        doc_type: DocType,
        source_id: &str,
        keep_ids: &[String],
    ) -> Result<usize, StoreError> {
        let rows = self
            .run(vec![json!({
                "statement": format!(
                    "MATCH (c:{}) WHERE c.source_id = $source_id AND NOT c.id IN $keep_ids \
                     DETACH DELETE c RETURN count(c)",
                    doc_type.label()
                ),
                "parameters": { "source_id": source_id, "keep_ids": keep_ids },
            })])
            .await?;

        Ok(first_count(&rows))
    }
}

#[async_trait]
impl GraphVectorReader for Neo4jStore {
    async fn search(
        &self,
        doc_type: DocType,
        embedding: &[f32],
        top_k: usize,
        min_score: f32,
    ) -> Result<Vec<SearchResult>, StoreError> {
        let statement = "CALL db.index.vector.queryNodes($index, $k, $embedding) \
                         YIELD node, score \
                         WHERE score >= $min_score \
                         RETURN node.id, node.content, score, \
                         [key IN keys(node) WHERE NOT key IN ['id', 'content', 'embedding'] \
                          | [key, toString(node[key])]] \
                         ORDER BY score DESC";

        let rows = self
            .run(vec![json!({
                "statement": statement,
                "parameters": {
                    "index": doc_type.index_name(),
                    "k": top_k,
                    "embedding": embedding,
                    "min_score": min_score,
                },
            })])
            .await?;

        let mut results = Vec::new();
        for row in rows.into_iter().flatten() {
            let (Some(chunk_id), Some(score)) = (
                row.first().and_then(Value::as_str),
                row.get(2).and_then(Value::as_f64),
            ) else {
                continue;
            };
            results.push(SearchResult {
                chunk_id: chunk_id.to_string(),
                content: row.get(1).and_then(Value::as_str).unwrap_or_default().to_string(),
                similarity_score: score as f32,
                node_type: doc_type,
                metadata: metadata_pairs(row.get(3)),
            });
        }

        Ok(results)
    }

    async fn count(&self, doc_type: DocType) -> Result<usize, StoreError> {
        let rows = self
            .run(vec![json!({
                "statement": format!("MATCH (c:{}) RETURN count(c)", doc_type.label()),
            })])
            .await?;
        Ok(first_count(&rows))
    }
}

fn first_count(rows: &[Vec<Row>]) -> usize {
    rows.iter()
        .flatten()
        .find_map(|row| row.first().and_then(Value::as_u64))
        .unwrap_or_default() as usize
}

fn metadata_pairs(value: Option<&Value>) -> BTreeMap<String, String> {
    value
        .and_then(Value::as_array)
        .map(|pairs| {
            pairs
                .iter()
                .filter_map(|pair| {
                    let key = pair.get(0)?.as_str()?;
                    let value = pair.get(1)?.as_str()?;
                    Some((key.to_string(), value.to_string()))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Rows of every statement result, in statement order.
fn extract_rows(payload: &Value) -> Vec<Vec<Row>> {
    payload
        .get("results")
        .and_then(Value::as_array)
        .map(|results| {
            results
                .iter()
                .map(|result| {
                    result
                        .get("data")
                        .and_then(Value::as_array)
                        .map(|rows| {
                            rows.iter()
                                .filter_map(|entry| {
                                    entry.get("row").and_then(Value::as_array).cloned()
                                })
                                .collect()
                        })
                        .unwrap_or_default()
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, ChunkType, DocFormat, DocumentSource};
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn store(server: &MockServer) -> Neo4jStore {
        Neo4jStore::new(server.uri(), "neo4j", "neo4j", "password")
    }

    fn rows(rows: Value) -> Value {
        json!({ "results": [{ "columns": [], "data": rows }], "errors": [] })
    }

    fn embedded(doc_type: DocType, ordinal: usize) -> EmbeddedChunk {
        let source = DocumentSource {
            uri: "https://example.com/r/s3_bucket.html.markdown".to_string(),
            format: DocFormat::Markdown,
            doc_type,
            provider: "aws".to_string(),
            service: Some("S3".to_string()),
            name: "aws_s3_bucket".to_string(),
        };
        EmbeddedChunk {
            chunk: Chunk::from_source(&source, ChunkType::Overview, ordinal, "bucket".to_string()),
            embedding: vec![0.1, 0.2],
        }
    }

    #[test]
    fn schema_covers_every_doc_type() {
        let statements = schema_statements(1536);
        assert_eq!(statements.len(), DocType::ALL.len() * 2);
        let text = Value::Array(statements).to_string();
        assert!(text.contains("docchunk_datasource_embedding_hnsw"));
        assert!(text.contains("`vector.dimensions`: 1536"));
        assert!(text.contains("REQUIRE c.id IS UNIQUE"));
    }

    #[test]
    fn rows_nest_statement_then_row_then_cell() {
        let payload = json!({
            "results": [
                { "data": [{ "row": ["a", 1] }, { "row": ["b", 2] }] },
                { "data": [{ "row": [7] }] }
            ],
            "errors": []
        });
        let rows = extract_rows(&payload);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][1], vec![json!("b"), json!(2)]);
        assert_eq!(first_count(&rows[1..]), 7);
        assert_eq!(first_count(&[]), 0);
    }

    #[tokio::test]
    async fn count_reads_the_first_cell() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("MATCH (c:DocChunk_Readme) RETURN count(c)"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows(json!([{ "row": [42] }]))))
            .mount(&server)
            .await;

        assert_eq!(store(&server).count(DocType::Readme).await?, 42);
        Ok(())
    }

    #[tokio::test]
    async fn search_maps_rows_to_results() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .and(body_string_contains("docchunk_resource_embedding_hnsw"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows(json!([
                { "row": ["c1", "Arguments", 0.91, [["name", "aws_s3_bucket"], ["service", "S3"]]] },
                { "row": ["c2", "Overview", 0.82, []] }
            ]))))
            .mount(&server)
            .await;

        let results = store(&server)
            .search(DocType::Resource, &[0.1, 0.2], 5, 0.7)
            .await?;

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk_id, "c1");
        assert_eq!(results[0].node_type, DocType::Resource);
        assert_eq!(results[0].metadata.get("service").map(String::as_str), Some("S3"));
        assert!((results[1].similarity_score - 0.82).abs() < 1e-6);
        Ok(())
    }

    #[tokio::test]
    async fn upsert_sums_counts_per_label() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/db/neo4j/tx/commit"))
            .and(body_string_contains("MERGE (c:DocChunk_Resource"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "data": [{ "row": [2] }] },
                    { "data": [{ "row": [1] }] }
                ],
                "errors": []
            })))
            .mount(&server)
            .await;

        let chunks = vec![
            embedded(DocType::Resource, 0),
            embedded(DocType::Resource, 1),
            embedded(DocType::DataSource, 0),
        ];
        assert_eq!(store(&server).upsert(&chunks).await?, 3);
        Ok(())
    }

    #[tokio::test]
    async fn cypher_errors_become_query_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [],
                "errors": [{ "code": "Neo.ClientError.Procedure.ProcedureCallFailed", "message": "no such index" }]
            })))
            .mount(&server)
            .await;

        let result = store(&server).count(DocType::Readme).await;
        assert!(matches!(result, Err(StoreError::Query(message)) if message.contains("no such index")));
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        let store = Neo4jStore::new("http://127.0.0.1:1", "neo4j", "neo4j", "password");
        let result = store.count(DocType::Resource).await;
        assert!(matches!(result, Err(StoreError::Connection { .. })));
    }

    #[tokio::test]
    async fn existing_index_with_other_dimensions_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(body_string_contains("SHOW INDEXES"))
            .respond_with(ResponseTemplate::new(200).set_body_json(rows(json!([
                { "row": ["docchunk_resource_embedding_hnsw", 768] }
            ]))))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": [], "errors": [] })))
            .mount(&server)
            .await;

        let result = store(&server).ensure_schema(1536).await;
        assert!(matches!(
            result,
            Err(StoreError::DimensionMismatch { expected: 1536, actual: 768, .. })
        ));
    }
}
