use std::{sync::Arc, time::Duration};

use futures::{StreamExt, future::BoxFuture};
use reqwest::{Client, Method, Response, StatusCode};
use serde::Serialize;
use serde_json::{from_value, json};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::dao::{
    models::{EstimateEntity, ParticipantEntity, RoomEntity, RoomPatch},
    record_store::{ChangeFeed, RecordStore},
    storage::StorageResult,
};

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        AllDocsResponse, BulkDocsRequest, BulkDocsResult, CouchDocument, DocumentBody,
        END_SUFFIX, ESTIMATE_PREFIX, FeedLine, PARTICIPANT_PREFIX, estimate_doc_id,
        parse_feed_line, participant_doc_id, room_doc_id, room_scoped_prefix,
    },
};

/// Attempts made by read-modify-write operations before giving up on revision conflicts.
const MAX_WRITE_ATTEMPTS: usize = 3;
const FEED_HEARTBEAT_MS: u64 = 30_000;
const FEED_INITIAL_DELAY: Duration = Duration::from_secs(1);
const FEED_MAX_DELAY: Duration = Duration::from_secs(10);

/// [`RecordStore`] backed by a CouchDB database.
///
/// Rows are stored as typed documents and the per-room change feed is a filtered continuous
/// `_changes` request that resumes from its last sequence after a disconnect.
#[derive(Clone)]
pub struct CouchRecordStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchRecordStore {
    /// Build the client and make sure the database exists.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            database: Arc::from(config.database),
            auth: config
                .credentials
                .map(|(user, pass)| (Arc::<str>::from(user), Arc::<str>::from(pass))),
        };

        store.ensure_database().await?;
        info!(database = %store.database, "connected to CouchDB");
        Ok(store)
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Some((user, pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    async fn send(&self, path: &str, builder: reqwest::RequestBuilder) -> CouchResult<Response> {
        builder
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: path.to_string(),
                source,
            })
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let url = self.database_url();
        let response = self
            .send(&url, self.authorize(self.client.get(&url)))
            .await?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: self.database.to_string(),
                        source,
                    })?;
                // 412 means another client created it first.
                if create.status().is_success() || create.status() == StatusCode::PRECONDITION_FAILED
                {
                    info!(database = %self.database, "created CouchDB database");
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database: self.database.to_string(),
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database: self.database.to_string(),
                status: other,
            }),
        }
    }

    async fn get_document(&self, doc_id: &str) -> CouchResult<Option<CouchDocument>> {
        let response = self
            .send(doc_id, self.request(Method::GET, doc_id))
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => response
                .json::<CouchDocument>()
                .await
                .map(Some)
                .map_err(|source| CouchDaoError::DecodeResponse {
                    path: doc_id.to_string(),
                    source,
                }),
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document(&self, document: &CouchDocument) -> CouchResult<()> {
        let path = document.id.as_str();
        let response = self
            .send(path, self.request(Method::PUT, path).json(document))
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: path.to_string(),
            }),
            other => Err(CouchDaoError::RequestStatus {
                path: path.to_string(),
                status: other,
            }),
        }
    }

    /// Read-modify-write of one document, retried when another writer bumps the revision.
    ///
    /// `change` receives the current document (if any) and returns the one to write, or
    /// `None` to leave the database untouched.
    async fn modify_document<F>(
        &self,
        doc_id: &str,
        change: F,
    ) -> CouchResult<Option<CouchDocument>>
    where
        F: Fn(Option<CouchDocument>) -> Option<CouchDocument>,
    {
        let mut attempt = 1;
        loop {
            let current = self.get_document(doc_id).await?;
            let Some(next) = change(current) else {
                return Ok(None);
            };

            match self.put_document(&next).await {
                Ok(()) => return Ok(Some(next)),
                Err(CouchDaoError::Conflict { .. }) if attempt < MAX_WRITE_ATTEMPTS => {
                    debug!(doc_id, attempt, "revision conflict, retrying write");
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn list_documents(&self, prefix: &str) -> CouchResult<Vec<CouchDocument>> {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", json!(prefix).to_string()),
            ("endkey", json!(format!("{prefix}{END_SUFFIX}")).to_string()),
        ];

        let response = self
            .send(ALL_DOCS, self.request(Method::GET, ALL_DOCS).query(&query))
            .await?;
        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn post_json<T: Serialize + ?Sized>(&self, path: &str, body: &T) -> CouchResult<Response> {
        let response = self
            .send(path, self.request(Method::POST, path).json(body))
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(CouchDaoError::RequestStatus {
                path: path.to_string(),
                status: response.status(),
            })
        }
    }

    async fn tombstone(&self, doc_id: &str) -> CouchResult<bool> {
        let removed = self
            .modify_document(doc_id, |current| current.map(CouchDocument::into_tombstone))
            .await?;
        Ok(removed.is_some())
    }

    async fn delete_participant(&self, room_id: &str, participant_id: &str) -> CouchResult<bool> {
        let removed = self
            .tombstone(&participant_doc_id(room_id, participant_id))
            .await?;
        if removed {
            self.tombstone(&estimate_doc_id(room_id, participant_id))
                .await?;
        }
        Ok(removed)
    }

    async fn delete_estimates(&self, room_id: &str) -> CouchResult<usize> {
        const BULK_DOCS: &str = "_bulk_docs";
        let docs: Vec<CouchDocument> = self
            .list_documents(&room_scoped_prefix(ESTIMATE_PREFIX, room_id))
            .await?
            .into_iter()
            .map(CouchDocument::into_tombstone)
            .collect();
        if docs.is_empty() {
            return Ok(0);
        }

        let response = self.post_json(BULK_DOCS, &BulkDocsRequest { docs }).await?;
        let results = response
            .json::<Vec<BulkDocsResult>>()
            .await
            .map_err(|source| CouchDaoError::DecodeResponse {
                path: BULK_DOCS.to_string(),
                source,
            })?;

        let mut deleted = 0;
        for result in results {
            if result.ok {
                deleted += 1;
            } else {
                // A concurrent writer touched the row; its own echo will settle the projection.
                warn!(doc_id = %result.id, error = ?result.error, "estimate not deleted");
            }
        }
        Ok(deleted)
    }

    /// Open a filtered continuous `_changes` request for one room.
    async fn open_changes(&self, room_id: &str, since: &str) -> CouchResult<Response> {
        const CHANGES: &str = "_changes";
        let query = [
            ("feed", "continuous".to_string()),
            ("include_docs", "true".to_string()),
            ("heartbeat", FEED_HEARTBEAT_MS.to_string()),
            ("filter", "_selector".to_string()),
            ("since", since.to_string()),
        ];
        let selector = json!({
            "selector": {
                "$or": [
                    { "room_id": room_id },
                    { "_id": room_doc_id(room_id) }
                ]
            }
        });

        let response = self
            .send(
                CHANGES,
                self.request(Method::POST, CHANGES)
                    .query(&query)
                    .json(&selector),
            )
            .await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(CouchDaoError::RequestStatus {
                path: CHANGES.to_string(),
                status: response.status(),
            })
        }
    }

    /// Turn an open `_changes` response into an endless room feed.
    ///
    /// When the connection drops the feed reconnects with exponential backoff and resumes from
    /// the last sequence it saw, so no committed change is skipped.
    fn change_feed(self, room_id: String, first: Response) -> ChangeFeed {
        let stream = async_stream::stream! {
            let mut pending = Some(first);
            let mut since = "now".to_string();
            let mut delay = FEED_INITIAL_DELAY;

            loop {
                let response = match pending.take() {
                    Some(response) => response,
                    None => match self.open_changes(&room_id, &since).await {
                        Ok(response) => {
                            info!(room_id = %room_id, since = %since, "change feed reconnected");
                            delay = FEED_INITIAL_DELAY;
                            response
                        }
                        Err(err) => {
                            warn!(room_id = %room_id, error = %err, "change feed reconnect failed");
                            sleep(delay).await;
                            delay = (delay * 2).min(FEED_MAX_DELAY);
                            continue;
                        }
                    },
                };

                let mut body = response.bytes_stream();
                let mut buffer: Vec<u8> = Vec::new();
                while let Some(chunk) = body.next().await {
                    match chunk {
                        Ok(chunk) => buffer.extend_from_slice(&chunk),
                        Err(err) => {
                            warn!(room_id = %room_id, error = %err, "change feed read failed");
                            break;
                        }
                    }

                    while let Some(end) = buffer.iter().position(|byte| *byte == b'\n') {
                        let line: Vec<u8> = buffer.drain(..=end).collect();
                        match parse_feed_line(&line) {
                            Ok(FeedLine::Heartbeat) => {}
                            Ok(FeedLine::Change { seq, event }) => {
                                if let Some(seq) = seq {
                                    since = seq;
                                }
                                if let Some(event) = event {
                                    yield event;
                                }
                            }
                            Ok(FeedLine::End { last_seq }) => {
                                if let Some(seq) = last_seq {
                                    since = seq;
                                }
                            }
                            Err(err) => {
                                warn!(room_id = %room_id, error = %err, "skipping malformed change line");
                            }
                        }
                    }
                }

                warn!(room_id = %room_id, "change feed closed, reconnecting");
                sleep(delay).await;
                delay = (delay * 2).min(FEED_MAX_DELAY);
            }
        };

        Box::pin(stream)
    }
}

fn room_of(doc: CouchDocument) -> CouchResult<RoomEntity> {
    match doc.body {
        DocumentBody::Room(room) => Ok(room),
        _ => Err(CouchDaoError::UnexpectedDocument {
            path: doc.id,
            expected: "room",
        }),
    }
}

impl RecordStore for CouchRecordStore {
    fn find_room(&self, id: &str) -> BoxFuture<'static, StorageResult<Option<RoomEntity>>> {
        let store = self.clone();
        let doc_id = room_doc_id(id);
        Box::pin(async move {
            let doc = store.get_document(&doc_id).await?;
            Ok(doc.map(room_of).transpose()?)
        })
    }

    fn insert_room(&self, room: RoomEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .put_document(&CouchDocument::room(room, None))
                .await
                .map_err(Into::into)
        })
    }

    fn update_room(
        &self,
        id: &str,
        patch: RoomPatch,
    ) -> BoxFuture<'static, StorageResult<RoomEntity>> {
        let store = self.clone();
        let doc_id = room_doc_id(id);
        Box::pin(async move {
            let written = store
                .modify_document(&doc_id, |current| {
                    let mut doc = current?;
                    match &mut doc.body {
                        DocumentBody::Room(room) => patch.apply_to(room),
                        _ => return None,
                    }
                    Some(doc)
                })
                .await?
                .ok_or(CouchDaoError::MissingDocument { path: doc_id })?;
            Ok(room_of(written)?)
        })
    }

    fn list_participants(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<ParticipantEntity>>> {
        let store = self.clone();
        let prefix = room_scoped_prefix(PARTICIPANT_PREFIX, room_id);
        Box::pin(async move {
            let docs = store.list_documents(&prefix).await?;
            Ok(docs
                .into_iter()
                .filter_map(|doc| match doc.body {
                    DocumentBody::Participant(participant) => Some(participant),
                    _ => None,
                })
                .collect())
        })
    }

    fn insert_participant(
        &self,
        participant: ParticipantEntity,
    ) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .put_document(&CouchDocument::participant(participant, None))
                .await
                .map_err(Into::into)
        })
    }

    fn delete_participant(
        &self,
        room_id: &str,
        participant_id: &str,
    ) -> BoxFuture<'static, StorageResult<bool>> {
        let store = self.clone();
        let room_id = room_id.to_string();
        let participant_id = participant_id.to_string();
        Box::pin(async move {
            store
                .delete_participant(&room_id, &participant_id)
                .await
                .map_err(Into::into)
        })
    }

    fn list_estimates(
        &self,
        room_id: &str,
    ) -> BoxFuture<'static, StorageResult<Vec<EstimateEntity>>> {
        let store = self.clone();
        let prefix = room_scoped_prefix(ESTIMATE_PREFIX, room_id);
        Box::pin(async move {
            let docs = store.list_documents(&prefix).await?;
            Ok(docs
                .into_iter()
                .filter_map(|doc| match doc.body {
                    DocumentBody::Estimate(estimate) => Some(estimate),
                    _ => None,
                })
                .collect())
        })
    }

    fn upsert_estimate(&self, estimate: EstimateEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let doc_id = estimate_doc_id(&estimate.room_id, &estimate.participant_id);
            store
                .modify_document(&doc_id, |current| {
                    let rev = current.and_then(|doc| doc.rev);
                    Some(CouchDocument::estimate(estimate.clone(), rev))
                })
                .await?;
            Ok(())
        })
    }

    fn delete_estimates(&self, room_id: &str) -> BoxFuture<'static, StorageResult<usize>> {
        let store = self.clone();
        let room_id = room_id.to_string();
        Box::pin(async move { store.delete_estimates(&room_id).await.map_err(Into::into) })
    }

    fn subscribe(&self, room_id: &str) -> BoxFuture<'static, StorageResult<ChangeFeed>> {
        let store = self.clone();
        let room_id = room_id.to_string();
        Box::pin(async move {
            let first = store.open_changes(&room_id, "now").await?;
            debug!(room_id = %room_id, "change feed opened");
            Ok(store.change_feed(room_id, first))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .send(&url, store.authorize(store.client.get(&url)))
                .await?;
            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
