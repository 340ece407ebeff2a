// SPDX-License-Identifier: MIT OR Apache-2.0
//! Expansion tests: id-to-object splicing, recursion bounds, and
//! idempotence.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use courier_client::{
    CallOptions, Client, ClientSettings, ExpansionRoute, ExpansionSettings, TransportFactory,
};
use courier_core::model::{ActionResponse, Error, JobRequest, JobResponse};
use courier_core::transport::{ClientTransport, MessageMeta, ReceivedResponse};
use courier_core::value::{Map, Value};
use courier_core::{ReceiveError, SendError};

// ---------------------------------------------------------------------------
// A tiny in-memory "catalog" service
// ---------------------------------------------------------------------------

fn book(id: i64, author_id: i64) -> Value {
    let mut m = Map::new();
    m.insert("_type".into(), Value::from("book"));
    m.insert("id".into(), Value::Int(id));
    m.insert("author_id".into(), Value::Int(author_id));
    Value::Map(m)
}

fn author(id: i64, publisher_id: i64) -> Value {
    let mut m = Map::new();
    m.insert("_type".into(), Value::from("author"));
    m.insert("id".into(), Value::Int(id));
    m.insert("publisher_id".into(), Value::Int(publisher_id));
    m.insert("name".into(), Value::from(format!("author-{id}")));
    Value::Map(m)
}

fn publisher(id: i64) -> Value {
    let mut m = Map::new();
    m.insert("_type".into(), Value::from("publisher"));
    m.insert("id".into(), Value::Int(id));
    m.insert("name".into(), Value::from(format!("publisher-{id}")));
    Value::Map(m)
}

struct CatalogTransport {
    queue: Arc<Mutex<VecDeque<(u64, JobResponse)>>>,
    fetch_log: Arc<Mutex<Vec<String>>>,
    fail_get_authors: bool,
}

impl CatalogTransport {
    fn respond(&self, job: &JobRequest) -> JobResponse {
        let action = &job.actions[0];
        self.fetch_log.lock().unwrap().push(action.action.clone());
        match action.action.as_str() {
            "list_books" => {
                let mut body = Map::new();
                body.insert(
                    "books".into(),
                    Value::List(vec![book(1, 10), book(2, 10), book(3, 11)]),
                );
                JobResponse {
                    actions: vec![ActionResponse::new("list_books", Value::Map(body))],
                    context: Map::new(),
                    errors: vec![],
                }
            }
            "get_authors" => {
                if self.fail_get_authors {
                    return JobResponse {
                        actions: vec![ActionResponse::from_errors(
                            "get_authors",
                            vec![Error::new("NOT_FOUND", "no such authors")],
                        )],
                        context: Map::new(),
                        errors: vec![],
                    };
                }
                let ids: Vec<i64> = action
                    .body
                    .get("ids")
                    .and_then(Value::as_list)
                    .map(|l| l.iter().filter_map(Value::as_i64).collect())
                    .unwrap_or_default();
                let mut by_id = Map::new();
                for id in ids {
                    by_id.insert(id.to_string(), author(id, 100));
                }
                let mut body = Map::new();
                body.insert("authors".into(), Value::Map(by_id));
                JobResponse {
                    actions: vec![ActionResponse::new("get_authors", Value::Map(body))],
                    context: Map::new(),
                    errors: vec![],
                }
            }
            "get_publishers" => {
                let ids: Vec<i64> = action
                    .body
                    .get("ids")
                    .and_then(Value::as_list)
                    .map(|l| l.iter().filter_map(Value::as_i64).collect())
                    .unwrap_or_default();
                let mut by_id = Map::new();
                for id in ids {
                    by_id.insert(id.to_string(), publisher(id));
                }
                let mut body = Map::new();
                body.insert("publishers".into(), Value::Map(by_id));
                JobResponse {
                    actions: vec![ActionResponse::new("get_publishers", Value::Map(body))],
                    context: Map::new(),
                    errors: vec![],
                }
            }
            other => JobResponse::from_errors(vec![Error::new(
                "UNKNOWN_ACTION",
                format!("no action '{other}'"),
            )]),
        }
    }
}

#[async_trait]
impl ClientTransport for CatalogTransport {
    async fn send_request_message(
        &self,
        request_id: u64,
        _meta: MessageMeta,
        body: &JobRequest,
    ) -> Result<(), SendError> {
        let response = self.respond(body);
        self.queue.lock().unwrap().push_back((request_id, response));
        Ok(())
    }

    async fn receive_response_message(
        &self,
        _timeout: Duration,
    ) -> Result<Option<ReceivedResponse>, ReceiveError> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .map(|(request_id, body)| ReceivedResponse {
                request_id,
                meta: MessageMeta::default(),
                body,
            }))
    }
}

fn expansion_settings() -> ExpansionSettings {
    ExpansionSettings {
        routes: vec![
            ExpansionRoute {
                type_name: "book".into(),
                name: "author".into(),
                source_field: "author_id".into(),
                destination_field: "author".into(),
                service: "catalog".into(),
                action: "get_authors".into(),
                request_field: "ids".into(),
                response_field: "authors".into(),
                raise_action_errors: false,
            },
            ExpansionRoute {
                type_name: "author".into(),
                name: "publisher".into(),
                source_field: "publisher_id".into(),
                destination_field: "publisher".into(),
                service: "catalog".into(),
                action: "get_publishers".into(),
                request_field: "ids".into(),
                response_field: "publishers".into(),
                raise_action_errors: false,
            },
        ],
        max_depth: 4,
    }
}

fn catalog_client(fail_get_authors: bool) -> (Client, Arc<Mutex<Vec<String>>>) {
    let fetch_log = Arc::new(Mutex::new(Vec::new()));
    let log_ref = Arc::clone(&fetch_log);
    let factory: TransportFactory = Arc::new(move |_service: &str| {
        let transport: Arc<dyn ClientTransport> = Arc::new(CatalogTransport {
            queue: Arc::new(Mutex::new(VecDeque::new())),
            fetch_log: Arc::clone(&log_ref),
            fail_get_authors,
        });
        Box::pin(async move { Ok(transport) })
    });
    let client = Client::new(
        ClientSettings::default(),
        factory,
        vec![],
        expansion_settings(),
    );
    (client, fetch_log)
}

fn books_of(response: &courier_core::model::ActionResponse) -> &[Value] {
    response
        .body
        .as_ref()
        .and_then(|b| b.get("books"))
        .and_then(Value::as_list)
        .unwrap()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expansion_splices_fetched_objects_into_matching_types() {
    let (client, fetch_log) = catalog_client(false);
    let opts = CallOptions {
        expansions: BTreeMap::from([("book".to_owned(), vec!["author".to_owned()])]),
        ..CallOptions::default()
    };
    let response = client
        .call_action("catalog", "list_books", Value::map(), &opts)
        .await
        .unwrap();

    for b in books_of(&response) {
        let expected = b.get("author_id").and_then(Value::as_i64).unwrap();
        let spliced = b.get("author").expect("author should be spliced in");
        assert_eq!(spliced.get("id").and_then(Value::as_i64), Some(expected));
    }
    // One batched fetch for all three books' two distinct authors.
    let log = fetch_log.lock().unwrap();
    assert_eq!(
        log.iter().filter(|a| a.as_str() == "get_authors").count(),
        1
    );
}

#[tokio::test]
async fn expansion_recurses_into_spliced_objects() {
    let (client, _) = catalog_client(false);
    let opts = CallOptions {
        expansions: BTreeMap::from([
            ("book".to_owned(), vec!["author".to_owned()]),
            ("author".to_owned(), vec!["publisher".to_owned()]),
        ]),
        ..CallOptions::default()
    };
    let response = client
        .call_action("catalog", "list_books", Value::map(), &opts)
        .await
        .unwrap();

    let first = &books_of(&response)[0];
    let publisher = first
        .get("author")
        .and_then(|a| a.get("publisher"))
        .expect("nested expansion should run");
    assert_eq!(publisher.get("id").and_then(Value::as_i64), Some(100));
}

#[tokio::test]
async fn expansion_is_idempotent() {
    let (client, fetch_log) = catalog_client(false);
    let opts = CallOptions {
        expansions: BTreeMap::from([("book".to_owned(), vec!["author".to_owned()])]),
        ..CallOptions::default()
    };
    let first = client
        .call_action("catalog", "list_books", Value::map(), &opts)
        .await
        .unwrap();
    let fetches_after_first = fetch_log.lock().unwrap().len();

    // Re-expanding an already expanded response fetches nothing new.
    let mut job_response = JobResponse {
        actions: vec![first.clone()],
        context: Map::new(),
        errors: vec![],
    };
    client
        .expand(&mut job_response, &opts.expansions)
        .await
        .unwrap();
    assert_eq!(job_response.actions[0], first);
    assert_eq!(fetch_log.lock().unwrap().len(), fetches_after_first);
}

#[tokio::test]
async fn expansion_action_errors_are_suppressed_by_default() {
    let (client, _) = catalog_client(true);
    let opts = CallOptions {
        expansions: BTreeMap::from([("book".to_owned(), vec!["author".to_owned()])]),
        ..CallOptions::default()
    };
    let response = client
        .call_action("catalog", "list_books", Value::map(), &opts)
        .await
        .unwrap();
    // The books come back unexpanded rather than the call failing.
    for b in books_of(&response) {
        assert!(b.get("author").is_none());
    }
}

#[tokio::test]
async fn unconfigured_expansion_is_an_error() {
    let (client, _) = catalog_client(false);
    let opts = CallOptions {
        expansions: BTreeMap::from([("book".to_owned(), vec!["reviews".to_owned()])]),
        ..CallOptions::default()
    };
    let err = client
        .call_action("catalog", "list_books", Value::map(), &opts)
        .await
        .unwrap_err();
    assert!(matches!(err, courier_core::ClientError::Expansion(_)));
}
