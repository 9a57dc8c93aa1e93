//! Table API — `/api/db/<table>[/<id>]`.
//!
//! | Method   | Operation | Success body                                   |
//! |----------|-----------|------------------------------------------------|
//! | `GET`    | select    | `{"status":"success","data":[{..row..}, ..]}`  |
//! | `POST`   | insert    | `{"status":"success","id":<new row id>}`       |
//! | `PUT`    | update    | `{"status":"success","updated_id":"<id>"}`     |
//! | `DELETE` | delete    | `{"status":"success","deleted_id":"<id>"}`     |
//!
//! Parameters come from the query string, overlaid by the body (a JSON object
//! or a urlencoded form), overlaid by the `<id>` path segment. An update or
//! delete that matches no row answers 404 `Record not found`.

use std::sync::Arc;

use serde_json::{Map, Value, json};
use tracing::warn;

use crate::database::{self, CrudOperation, CrudOutcome, Executor, Params, Row};
use crate::http::request::parse_query_string;
use crate::http::{Method, Request, Response, StatusCode};

/// The only API resource served.
pub const DB_RESOURCE: &str = "db";

/// Handles one routed API request. Always produces a response.
pub async fn handle(
    request: &Request,
    resource: &str,
    table: &str,
    identifier: &str,
    database: Option<Arc<dyn Executor>>,
) -> Response {
    if resource != DB_RESOURCE {
        return Response::error(StatusCode::NotFound, "Not Found");
    }

    let make: fn(String, Params) -> CrudOperation = match request.method() {
        Method::Get => |table: String, params: Params| CrudOperation::Select { table, params },
        Method::Post => |table: String, params: Params| CrudOperation::Insert { table, params },
        Method::Put => |table: String, params: Params| CrudOperation::Update { table, params },
        Method::Delete => |table: String, params: Params| CrudOperation::Delete { table, params },
        _ => return Response::error(StatusCode::MethodNotAllowed, "Method not allowed"),
    };

    let Some(database) = database else {
        return Response::error(StatusCode::ServiceUnavailable, "Database unavailable");
    };

    let params = match collect_params(request, identifier) {
        Ok(params) => params,
        Err(message) => return Response::error(StatusCode::BadRequest, message),
    };

    match database::execute(database, make(table.to_owned(), params)).await {
        Ok(outcome) => outcome_response(outcome),
        Err(e) => {
            let status = e.status();
            if status != StatusCode::BadRequest {
                warn!(table, error = %e, "database operation failed");
            }
            Response::error(status, e.to_string())
        }
    }
}

/// Merges query, body and path parameters, later sources winning.
pub fn collect_params(request: &Request, identifier: &str) -> Result<Params, String> {
    let mut params = request.query().clone();

    let body = request.body();
    if !body.is_empty() {
        let is_json = request
            .content_type()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("application/json"));
        if is_json {
            params.extend(json_params(body)?);
        } else {
            params.extend(parse_query_string(&String::from_utf8_lossy(body)));
        }
    }

    if !identifier.is_empty() {
        params.insert(database::query::ID_COLUMN.to_owned(), identifier.to_owned());
    }
    Ok(params)
}

/// Flattens a JSON object body into string parameters. `null` values are dropped.
fn json_params(body: &[u8]) -> Result<Params, String> {
    let value: Value =
        serde_json::from_slice(body).map_err(|e| format!("Invalid JSON body: {e}"))?;
    let Value::Object(fields) = value else {
        return Err("Invalid JSON body: expected an object".to_owned());
    };

    Ok(fields
        .into_iter()
        .filter_map(|(key, value)| {
            let text = match value {
                Value::Null => return None,
                Value::String(s) => s,
                other => other.to_string(),
            };
            Some((key, text))
        })
        .collect())
}

fn outcome_response(outcome: CrudOutcome) -> Response {
    let body = match outcome {
        CrudOutcome::Rows(rows) => {
            let data: Vec<Value> = rows.into_iter().map(row_to_json).collect();
            json!({ "status": "success", "data": data })
        }
        CrudOutcome::Inserted(id) => json!({ "status": "success", "id": id }),
        CrudOutcome::Updated(id) => json!({ "status": "success", "updated_id": id }),
        CrudOutcome::Deleted(id) => json!({ "status": "success", "deleted_id": id }),
        CrudOutcome::NotFound => {
            return Response::error(StatusCode::NotFound, "Record not found");
        }
    };
    Response::json(StatusCode::Ok, &body)
}

fn row_to_json(row: Row) -> Value {
    let fields: Map<String, Value> = row
        .into_iter()
        .map(|(column, value)| (column, value.map_or(Value::Null, Value::String)))
        .collect();
    Value::Object(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::testing::RecordingExecutor;
    use crate::database::{Execution, SqliteExecutor, StatementKind};

    fn make_request(raw: &str) -> Request {
        Request::parse(raw.as_bytes()).unwrap()
    }

    fn body_json(response: &Response) -> Value {
        serde_json::from_slice(response.payload()).unwrap()
    }

    fn users_db() -> Arc<dyn Executor> {
        let db = SqliteExecutor::open_in_memory().unwrap();
        db.execute_batch(
            "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT, email TEXT);
             INSERT INTO users (name, email) VALUES ('alice', 'a@x'), ('bob', 'b@x');",
        )
        .unwrap();
        Arc::new(db)
    }

    async fn call(raw: &str, db: Option<Arc<dyn Executor>>) -> Response {
        let req = make_request(raw);
        let path = req.path().trim_start_matches("/api/").to_owned();
        let mut parts = path.splitn(3, '/');
        let (resource, table, id) = (
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
            parts.next().unwrap_or_default(),
        );
        handle(&req, resource, table, id, db).await
    }

    #[tokio::test]
    async fn select_binds_filter_and_wraps_rows() {
        let recorder = RecordingExecutor::new(Execution::Rows(vec![vec![
            ("id".to_string(), Some("1".to_string())),
            ("name".to_string(), Some("alice".to_string())),
        ]]));
        let response = call(
            "GET /api/db/users?name=alice HTTP/1.1\r\n\r\n",
            Some(recorder.clone()),
        )
        .await;

        assert_eq!(response.status(), StatusCode::Ok);
        assert_eq!(
            response.payload(),
            br#"{"status":"success","data":[{"id":"1","name":"alice"}]}"#
        );

        let seen = recorder.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].sql, r#"SELECT * FROM "users" WHERE "name" = ?1"#);
        assert_eq!(seen[0].params, vec!["alice"]);
        assert_eq!(seen[0].kind, StatementKind::Query);
    }

    #[tokio::test]
    async fn empty_insert_is_rejected_without_database_call() {
        let recorder = RecordingExecutor::new(Execution::Rows(Vec::new()));
        let response = call("POST /api/db/orders HTTP/1.1\r\n\r\n", Some(recorder.clone())).await;

        assert_eq!(response.status(), StatusCode::BadRequest);
        assert_eq!(
            body_json(&response),
            json!({"status": "error", "code": 400, "message": "No data provided"})
        );
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test]
    async fn update_without_fields_issues_no_statement() {
        let recorder = RecordingExecutor::new(Execution::Rows(Vec::new()));
        let response = call("PUT /api/db/users/4 HTTP/1.1\r\n\r\n", Some(recorder.clone())).await;
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert_eq!(body_json(&response)["message"], "No fields to update");
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test]
    async fn invalid_table_name_never_reaches_database() {
        let recorder = RecordingExecutor::new(Execution::Rows(Vec::new()));
        for table in ["1users", "users;drop", "us%20ers"] {
            let response = call(
                &format!("GET /api/db/{table} HTTP/1.1\r\n\r\n"),
                Some(recorder.clone()),
            )
            .await;
            assert_eq!(response.status(), StatusCode::BadRequest, "{table}");
            assert!(
                body_json(&response)["message"]
                    .as_str()
                    .unwrap()
                    .starts_with("Invalid table name")
            );
        }
        assert_eq!(recorder.calls(), 0);
    }

    #[tokio::test]
    async fn crud_cycle_against_sqlite() {
        let db = users_db();

        let created = call(
            "POST /api/db/users HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{\"name\":\"carol\",\"email\":\"c@x\",\"nick\":null}",
            Some(db.clone()),
        )
        .await;
        assert_eq!(body_json(&created), json!({"status": "success", "id": 3}));

        let found = call(
            "GET /api/db/users?name=carol&email=c%40x HTTP/1.1\r\n\r\n",
            Some(db.clone()),
        )
        .await;
        assert_eq!(
            body_json(&found),
            json!({"status": "success", "data": [{"id": "3", "name": "carol", "email": "c@x"}]})
        );

        let updated = call(
            "PUT /api/db/users/3 HTTP/1.1\r\nContent-Type: application/x-www-form-urlencoded\r\n\r\nemail=carol%40example.com",
            Some(db.clone()),
        )
        .await;
        assert_eq!(
            body_json(&updated),
            json!({"status": "success", "updated_id": "3"})
        );

        let deleted = call("DELETE /api/db/users?id=3 HTTP/1.1\r\n\r\n", Some(db.clone())).await;
        assert_eq!(
            body_json(&deleted),
            json!({"status": "success", "deleted_id": "3"})
        );

        let again = call("DELETE /api/db/users/3 HTTP/1.1\r\n\r\n", Some(db)).await;
        assert_eq!(again.status(), StatusCode::NotFound);
        assert_eq!(
            body_json(&again),
            json!({"status": "error", "code": 404, "message": "Record not found"})
        );
    }

    #[tokio::test]
    async fn ordered_limited_select() {
        let response = call(
            "GET /api/db/users?_order=name%20desc&_limit=1 HTTP/1.1\r\n\r\n",
            Some(users_db()),
        )
        .await;
        assert_eq!(body_json(&response)["data"][0]["name"], "bob");
        assert_eq!(body_json(&response)["data"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_limit_is_client_error() {
        let response = call(
            "GET /api/db/users?_limit=18446744073709551615 HTTP/1.1\r\n\r\n",
            Some(users_db()),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BadRequest);
        assert!(
            body_json(&response)["message"]
                .as_str()
                .unwrap()
                .starts_with("Invalid parameter: _limit")
        );
    }

    #[tokio::test]
    async fn statement_failure_is_500_with_message() {
        let response = call("GET /api/db/ghosts HTTP/1.1\r\n\r\n", Some(users_db())).await;
        assert_eq!(response.status(), StatusCode::InternalServerError);
        let message = body_json(&response)["message"].as_str().unwrap().to_owned();
        assert!(message.contains("no such table"), "{message}");
    }

    #[tokio::test]
    async fn routing_level_errors() {
        let db = users_db();
        let unknown = call("GET /api/files/users HTTP/1.1\r\n\r\n", Some(db.clone())).await;
        assert_eq!(unknown.status(), StatusCode::NotFound);

        let patch = call("PATCH /api/db/users/1 HTTP/1.1\r\n\r\n", Some(db)).await;
        assert_eq!(patch.status(), StatusCode::MethodNotAllowed);

        let offline = call("GET /api/db/users HTTP/1.1\r\n\r\n", None).await;
        assert_eq!(offline.status(), StatusCode::ServiceUnavailable);
    }

    #[test]
    fn params_layering() {
        let req = make_request(
            "PUT /api/db/t/9?id=1&name=q&x=1 HTTP/1.1\r\nContent-Type: application/json; charset=utf-8\r\n\r\n{\"name\":\"body\",\"n\":5,\"ok\":true}",
        );
        let params = collect_params(&req, "9").unwrap();
        assert_eq!(params["id"], "9");
        assert_eq!(params["name"], "body");
        assert_eq!(params["n"], "5");
        assert_eq!(params["ok"], "true");
        assert_eq!(params["x"], "1");
    }

    #[test]
    fn bad_json_body_is_reported() {
        let req = make_request(
            "POST /api/db/t HTTP/1.1\r\nContent-Type: application/json\r\n\r\n[1,2]",
        );
        assert!(collect_params(&req, "").unwrap_err().contains("expected an object"));

        let req = make_request("POST /api/db/t HTTP/1.1\r\nContent-Type: application/json\r\n\r\n{oops");
        assert!(collect_params(&req, "").unwrap_err().starts_with("Invalid JSON body"));
    }
}
