use std::future::Future;
use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::info;
use warp::hyper::{Body, Response, StatusCode};
use warp::{Filter, Rejection, Reply};

use crate::catalog::{ColumnChanges, ColumnDefinition, Metastore, Parent};
use crate::config::schema::HttpFrontend;
use crate::data_types::{ColumnId, EntryId, EntryType, OrganizationId, TableId};

use super::http_utils::{into_response, ApiError};

#[derive(Debug, Deserialize)]
struct OrganizationBody {
    name: String,
}

#[derive(Debug, Deserialize)]
struct NewEntryBody {
    parent_folder_id: Option<EntryId>,
    #[serde(default)]
    properties: Map<String, Value>,
    #[serde(default)]
    columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Deserialize)]
struct PropertiesBody {
    properties: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct MoveBody {
    destination_id: Option<EntryId>,
}

#[derive(Debug, Deserialize)]
struct NewColumnBody {
    #[serde(flatten)]
    definition: ColumnDefinition,
    index: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ReorderBody {
    column_ids: Vec<ColumnId>,
}

#[derive(Debug, Default, Deserialize)]
struct EntryParams {
    #[serde(default)]
    path: bool,
}

#[derive(Debug, Default, Deserialize)]
struct ListParams {
    // Comma-separated `field[:direction]` directives
    sort: Option<String>,
    #[serde(default)]
    offset: u64,
    limit: Option<u64>,
    #[serde(default)]
    path: bool,
}

impl ListParams {
    fn sort_directives(&self) -> Vec<&str> {
        self.sort
            .as_deref()
            .map(|sort| sort.split(',').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

fn with_metastore(
    metastore: Arc<Metastore>,
) -> impl Filter<Extract = (Arc<Metastore>,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || metastore.clone())
}

fn json_with_status<T: serde::Serialize>(value: &T, status: StatusCode) -> Response<Body> {
    warp::reply::with_status(warp::reply::json(value), status).into_response()
}

// Organizations

async fn create_organization(
    metastore: Arc<Metastore>,
    body: OrganizationBody,
) -> Result<Response<Body>, ApiError> {
    let organization = metastore.organizations.create(&body.name).await?;
    info!("Created organization {}", organization.id);
    Ok(json_with_status(&organization, StatusCode::CREATED))
}

async fn list_organizations(metastore: Arc<Metastore>) -> Result<Response<Body>, ApiError> {
    let organizations = metastore.organizations.list().await?;
    Ok(json_with_status(&organizations, StatusCode::OK))
}

async fn get_organization(
    id: OrganizationId,
    metastore: Arc<Metastore>,
) -> Result<Response<Body>, ApiError> {
    let organization = metastore.organizations.get(id).await?;
    Ok(json_with_status(&organization, StatusCode::OK))
}

async fn rename_organization(
    id: OrganizationId,
    metastore: Arc<Metastore>,
    body: OrganizationBody,
) -> Result<Response<Body>, ApiError> {
    let organization = metastore.organizations.rename(id, &body.name).await?;
    Ok(json_with_status(&organization, StatusCode::OK))
}

async fn delete_organization(
    id: OrganizationId,
    metastore: Arc<Metastore>,
) -> Result<Response<Body>, ApiError> {
    metastore.organizations.delete(id).await?;
    info!("Deleted organization {}", id);
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn create_entry(
    organization_id: OrganizationId,
    entry_type: EntryType,
    metastore: Arc<Metastore>,
    body: NewEntryBody,
) -> Result<Response<Body>, ApiError> {
    let entry = metastore
        .create_entry(
            organization_id,
            entry_type,
            body.parent_folder_id,
            body.properties,
            body.columns,
        )
        .await?;
    Ok(json_with_status(&entry, StatusCode::CREATED))
}

async fn list_children(
    parent: Parent,
    metastore: Arc<Metastore>,
    params: ListParams,
) -> Result<Response<Body>, ApiError> {
    let page = metastore
        .get_children(
            parent,
            &params.sort_directives(),
            params.offset,
            params.limit,
            params.path,
        )
        .await?;
    Ok(json_with_status(&page, StatusCode::OK))
}

// Entries

async fn get_entry(
    id: EntryId,
    metastore: Arc<Metastore>,
    params: EntryParams,
) -> Result<Response<Body>, ApiError> {
    let entry = metastore.get_entry(id, params.path).await?;
    Ok(json_with_status(&entry, StatusCode::OK))
}

async fn update_entry(
    id: EntryId,
    metastore: Arc<Metastore>,
    body: PropertiesBody,
) -> Result<Response<Body>, ApiError> {
    let entry = metastore.update_entry_properties(id, body.properties).await?;
    Ok(json_with_status(&entry, StatusCode::OK))
}

async fn move_entry(
    id: EntryId,
    metastore: Arc<Metastore>,
    body: MoveBody,
) -> Result<Response<Body>, ApiError> {
    let entry = metastore.move_entry(id, body.destination_id).await?;
    Ok(json_with_status(&entry, StatusCode::OK))
}

async fn delete_entry(
    id: EntryId,
    metastore: Arc<Metastore>,
) -> Result<Response<Body>, ApiError> {
    metastore.delete_entry(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// Columns and records

async fn list_columns(
    table_id: TableId,
    metastore: Arc<Metastore>,
) -> Result<Response<Body>, ApiError> {
    let columns = metastore.list_columns(table_id).await?;
    Ok(json_with_status(&columns, StatusCode::OK))
}

async fn create_column(
    table_id: TableId,
    metastore: Arc<Metastore>,
    body: NewColumnBody,
) -> Result<Response<Body>, ApiError> {
    let column = metastore
        .create_column(table_id, body.definition, body.index)
        .await?;
    Ok(json_with_status(&column, StatusCode::CREATED))
}

async fn update_column(
    table_id: TableId,
    column_id: ColumnId,
    metastore: Arc<Metastore>,
    body: ColumnChanges,
) -> Result<Response<Body>, ApiError> {
    let column = metastore.update_column(table_id, column_id, body).await?;
    Ok(json_with_status(&column, StatusCode::OK))
}

async fn delete_column(
    table_id: TableId,
    column_id: ColumnId,
    metastore: Arc<Metastore>,
) -> Result<Response<Body>, ApiError> {
    metastore.delete_column(table_id, column_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn reorder_columns(
    table_id: TableId,
    metastore: Arc<Metastore>,
    body: ReorderBody,
) -> Result<Response<Body>, ApiError> {
    let columns = metastore.reorder_columns(table_id, &body.column_ids).await?;
    Ok(json_with_status(&columns, StatusCode::OK))
}

async fn execute_query(
    table_id: TableId,
    metastore: Arc<Metastore>,
    query: Value,
) -> Result<Response<Body>, ApiError> {
    let result = metastore.execute_query(table_id, &query).await?;
    Ok(json_with_status(&result, StatusCode::OK))
}

pub fn organization_routes(
    metastore: Arc<Metastore>,
) -> impl Filter<Extract = (Response<Body>,), Error = Rejection> + Clone {
    let create = warp::path!("organizations")
        .and(warp::post())
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(create_organization)
        .map(into_response);

    let list = warp::path!("organizations")
        .and(warp::get())
        .and(with_metastore(metastore.clone()))
        .then(list_organizations)
        .map(into_response);

    let get = warp::path!("organizations" / OrganizationId)
        .and(warp::get())
        .and(with_metastore(metastore.clone()))
        .then(get_organization)
        .map(into_response);

    let rename = warp::path!("organizations" / OrganizationId)
        .and(warp::patch())
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(rename_organization)
        .map(into_response);

    let delete = warp::path!("organizations" / OrganizationId)
        .and(warp::delete())
        .and(with_metastore(metastore.clone()))
        .then(delete_organization)
        .map(into_response);

    let create_folder = warp::path!("organizations" / OrganizationId / "folders")
        .and(warp::post())
        .map(|id: OrganizationId| (id, EntryType::Folder))
        .untuple_one()
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(create_entry)
        .map(into_response);

    let create_table = warp::path!("organizations" / OrganizationId / "tables")
        .and(warp::post())
        .map(|id: OrganizationId| (id, EntryType::Table))
        .untuple_one()
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(create_entry)
        .map(into_response);

    let root_children = warp::path!("organizations" / OrganizationId / "children")
        .and(warp::get())
        .map(Parent::Root)
        .and(with_metastore(metastore))
        .and(warp::query::<ListParams>())
        .then(list_children)
        .map(into_response);

    create
        .or(list)
        .unify()
        .or(get)
        .unify()
        .or(rename)
        .unify()
        .or(delete)
        .unify()
        .or(create_folder)
        .unify()
        .or(create_table)
        .unify()
        .or(root_children)
        .unify()
}

pub fn entry_routes(
    metastore: Arc<Metastore>,
) -> impl Filter<Extract = (Response<Body>,), Error = Rejection> + Clone {
    let get = warp::path!("entries" / EntryId)
        .and(warp::get())
        .and(with_metastore(metastore.clone()))
        .and(warp::query::<EntryParams>())
        .then(get_entry)
        .map(into_response);

    let update = warp::path!("entries" / EntryId)
        .and(warp::patch())
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(update_entry)
        .map(into_response);

    let delete = warp::path!("entries" / EntryId)
        .and(warp::delete())
        .and(with_metastore(metastore.clone()))
        .then(delete_entry)
        .map(into_response);

    let children = warp::path!("entries" / EntryId / "children")
        .and(warp::get())
        .map(Parent::Folder)
        .and(with_metastore(metastore.clone()))
        .and(warp::query::<ListParams>())
        .then(list_children)
        .map(into_response);

    let move_to = warp::path!("entries" / EntryId / "move")
        .and(warp::post())
        .and(with_metastore(metastore))
        .and(warp::body::json())
        .then(move_entry)
        .map(into_response);

    get.or(update)
        .unify()
        .or(delete)
        .unify()
        .or(children)
        .unify()
        .or(move_to)
        .unify()
}

pub fn table_routes(
    metastore: Arc<Metastore>,
) -> impl Filter<Extract = (Response<Body>,), Error = Rejection> + Clone {
    let list = warp::path!("tables" / TableId / "columns")
        .and(warp::get())
        .and(with_metastore(metastore.clone()))
        .then(list_columns)
        .map(into_response);

    let create = warp::path!("tables" / TableId / "columns")
        .and(warp::post())
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(create_column)
        .map(into_response);

    let reorder = warp::path!("tables" / TableId / "columns" / "reorder")
        .and(warp::post())
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(reorder_columns)
        .map(into_response);

    let update = warp::path!("tables" / TableId / "columns" / ColumnId)
        .and(warp::patch())
        .and(with_metastore(metastore.clone()))
        .and(warp::body::json())
        .then(update_column)
        .map(into_response);

    let delete = warp::path!("tables" / TableId / "columns" / ColumnId)
        .and(warp::delete())
        .and(with_metastore(metastore.clone()))
        .then(delete_column)
        .map(into_response);

    let query = warp::path!("tables" / TableId / "query")
        .and(warp::post())
        .and(with_metastore(metastore))
        .and(warp::body::json())
        .then(execute_query)
        .map(into_response);

    reorder
        .or(list)
        .unify()
        .or(create)
        .unify()
        .or(update)
        .unify()
        .or(delete)
        .unify()
        .or(query)
        .unify()
}

pub fn filters(
    metastore: Arc<Metastore>,
    config: &HttpFrontend,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    let cors = if config.cors_allowed_origins.iter().any(|o| o == "*") {
        warp::cors().allow_any_origin()
    } else {
        warp::cors().allow_origins(config.cors_allowed_origins.iter().map(String::as_str))
    }
    .allow_headers(vec!["Content-Type"])
    .allow_methods(vec!["GET", "POST", "PATCH", "DELETE"]);

    organization_routes(metastore.clone())
        .or(entry_routes(metastore.clone()))
        .unify()
        .or(table_routes(metastore))
        .unify()
        .with(cors)
        .with(warp::log::custom(|info| {
            tracing::debug!(
                "{} {} {} ({:?})",
                info.method(),
                info.path(),
                info.status(),
                info.elapsed()
            )
        }))
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Invalid listen address: {0}")]
    InvalidAddress(#[from] AddrParseError),

    #[error("Error binding the HTTP server: {0}")]
    Bind(#[from] warp::Error),
}

pub async fn run_server(
    metastore: Arc<Metastore>,
    config: HttpFrontend,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ServerError> {
    let filters = filters(metastore, &config);

    let socket_addr: SocketAddr =
        format!("{}:{}", config.bind_host, config.bind_port).parse()?;

    let (addr, server) =
        warp::serve(filters).try_bind_with_graceful_shutdown(socket_addr, shutdown)?;
    info!("Listening for HTTP requests on {addr}");
    server.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::{json, Value};
    use warp::hyper::StatusCode;
    use warp::test::request;

    use crate::config::schema::HttpFrontend;
    use crate::frontend::http::filters;
    use crate::testutils::make_metastore;

    fn body_json(body: &[u8]) -> Value {
        serde_json::from_slice(body).unwrap()
    }

    #[tokio::test]
    async fn test_organization_lifecycle() {
        let metastore = Arc::new(make_metastore().await);
        let handler = filters(metastore, &HttpFrontend::default());

        let resp = request()
            .method("POST")
            .path("/organizations")
            .json(&json!({"name": "acme"}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let org = body_json(resp.body());
        assert_eq!(org["name"], "acme");
        let org_path = format!("/organizations/{}", org["id"].as_str().unwrap());

        let resp = request()
            .method("PATCH")
            .path(&org_path)
            .json(&json!({"name": "acme corp"}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body())["name"], "acme corp");

        let resp = request()
            .method("GET")
            .path("/organizations")
            .reply(&handler)
            .await;
        assert_eq!(body_json(resp.body()).as_array().unwrap().len(), 1);

        let resp = request()
            .method("DELETE")
            .path(&org_path)
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let resp = request().method("GET").path(&org_path).reply(&handler).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert!(body_json(resp.body())["error"]
            .as_str()
            .unwrap()
            .contains("doesn't exist"));
    }

    #[tokio::test]
    async fn test_filesystem_routes() {
        let metastore = Arc::new(make_metastore().await);
        let handler = filters(metastore.clone(), &HttpFrontend::default());
        let org = metastore.organizations.create("acme").await.unwrap();

        let resp = request()
            .method("POST")
            .path(&format!("/organizations/{}/folders", org.id))
            .json(&json!({"properties": {"name": "reports"}}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let folder = body_json(resp.body());
        assert_eq!(folder["type"], "folder");
        let folder_id = folder["id"].as_str().unwrap().to_string();

        let resp = request()
            .method("POST")
            .path(&format!("/organizations/{}/tables", org.id))
            .json(&json!({
                "parent_folder_id": folder_id,
                "properties": {"name": "q1"},
                "columns": [{"name": "region", "type": "string"}]
            }))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let table = body_json(resp.body());
        assert_eq!(table["type"], "table");
        assert_eq!(table["columns"][0]["name"], "region");
        let table_id = table["id"].as_str().unwrap().to_string();

        let resp = request()
            .method("GET")
            .path(&format!("/entries/{table_id}?path=true"))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let path = body_json(resp.body())["path"].clone();
        assert_eq!(path.as_array().unwrap().len(), 1);
        assert_eq!(path[0]["id"], folder_id.as_str());

        let resp = request()
            .method("GET")
            .path(&format!(
                "/organizations/{}/children?sort=created_at:desc&limit=5",
                org.id
            ))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let page = body_json(resp.body());
        assert_eq!(page["total"], 1);
        assert_eq!(page["entries"][0]["id"], folder_id.as_str());

        let resp = request()
            .method("GET")
            .path(&format!("/entries/{folder_id}/children?sort=bogus"))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // A folder can't be moved under itself
        let resp = request()
            .method("POST")
            .path(&format!("/entries/{folder_id}/move"))
            .json(&json!({"destination_id": folder_id}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = request()
            .method("POST")
            .path(&format!("/entries/{table_id}/move"))
            .json(&json!({"destination_id": null}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body())["parent_folder_id"], Value::Null);

        let resp = request()
            .method("PATCH")
            .path(&format!("/entries/{table_id}"))
            .json(&json!({"properties": {"name": null, "owner": "ops"}}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body())["properties"], json!({"owner": "ops"}));

        let resp = request()
            .method("DELETE")
            .path(&format!("/entries/{folder_id}"))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_table_routes() {
        let metastore = Arc::new(make_metastore().await);
        let handler = filters(metastore.clone(), &HttpFrontend::default());
        let org = metastore.organizations.create("acme").await.unwrap();
        let table = metastore
            .create_table(org.id, None, Default::default(), vec![])
            .await
            .unwrap();
        let columns_path = format!("/tables/{}/columns", table.id);

        let mut ids = vec![];
        for name in ["a", "b"] {
            let resp = request()
                .method("POST")
                .path(&columns_path)
                .json(&json!({"name": name, "type": "string"}))
                .reply(&handler)
                .await;
            assert_eq!(resp.status(), StatusCode::CREATED);
            ids.push(body_json(resp.body())["id"].as_str().unwrap().to_string());
        }

        let resp = request()
            .method("POST")
            .path(&columns_path)
            .json(&json!({"name": "c", "type": "string", "index": 0}))
            .reply(&handler)
            .await;
        assert_eq!(body_json(resp.body())["index"], 0);

        let resp = request()
            .method("POST")
            .path(&format!("{columns_path}/reorder"))
            .json(&json!({"column_ids": [ids[1]]}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let names: Vec<Value> = body_json(resp.body())
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("b"), json!("c"), json!("a")]);

        let resp = request()
            .method("PATCH")
            .path(&format!("{columns_path}/{}", ids[0]))
            .json(&json!({"type": "integer"}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = request()
            .method("DELETE")
            .path(&format!("{columns_path}/{}", ids[0]))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);

        let query_path = format!("/tables/{}/query", table.id);
        let resp = request()
            .method("POST")
            .path(&query_path)
            .json(&json!({"insert": {
                "columns": [{"column": ids[1]}],
                "values": [[{"value": "x"}]]
            }}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp.body())["ids"].as_array().unwrap().len(), 1);

        let resp = request()
            .method("POST")
            .path(&query_path)
            .json(&json!({"select": {"columns": [{"column": ids[1]}]}}))
            .reply(&handler)
            .await;
        assert_eq!(body_json(resp.body()), json!({"rows": [["x"]]}));

        let resp = request()
            .method("POST")
            .path(&query_path)
            .json(&json!({"update": {}}))
            .reply(&handler)
            .await;
        assert_eq!(resp.status(), StatusCode::NOT_IMPLEMENTED);
    }
}
