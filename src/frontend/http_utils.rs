// Warp error handling and propagation
//
// Handlers return `Result<impl Reply, ApiError>` instead of rejecting: a
// rejection tells warp to try the next filter, whereas a catalog error is
// final. `ApiError` knows how to turn itself into a response, and
// `into_response` flattens the `Result` at the end of each route:
//
//   ```
//   .then(my_handler_func)
//   .map(into_response)
//   ```
//

use serde_json::json;
use tracing::warn;
use warp::hyper::{Body, Response, StatusCode};
use warp::Reply;

use crate::catalog::{CatalogError, ErrorKind};

#[derive(Debug)]
pub enum ApiError {
    CatalogError(CatalogError),
}

// Lets handlers bail out of catalog calls with `?`
impl From<CatalogError> for ApiError {
    fn from(err: CatalogError) -> Self {
        ApiError::CatalogError(err)
    }
}

impl ApiError {
    fn status_code_body(self: ApiError) -> (StatusCode, String) {
        match self {
            ApiError::CatalogError(e) => {
                let status = match e.kind() {
                    ErrorKind::NotFound => StatusCode::NOT_FOUND,
                    ErrorKind::InvalidInput | ErrorKind::Conflict => StatusCode::BAD_REQUEST,
                    ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
                    ErrorKind::Storage => {
                        warn!("Catalog storage error: {e:?}");
                        StatusCode::INTERNAL_SERVER_ERROR
                    }
                };
                (status, json!({ "error": e.to_string() }).to_string())
            }
        }
    }
}

impl Reply for ApiError {
    fn into_response(self) -> Response<Body> {
        let (status, body) = self.status_code_body();
        Response::builder()
            .status(status)
            .header("Content-Type", "application/json")
            .body(body.into())
            .expect("Could not construct Response")
    }
}

pub fn into_response<S: Reply, E: Reply>(reply_res: Result<S, E>) -> Response<Body> {
    match reply_res {
        Ok(resp) => resp.into_response(),
        Err(err) => err.into_response(),
    }
}
