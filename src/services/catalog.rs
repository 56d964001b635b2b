//! Song catalog access.
//!
//! The catalog is an external HTTP service owning the track library; this
//! backend only needs to pick an unplayed song and check that its audio file
//! actually resolves before anchoring a round on it.

use std::sync::Arc;

use futures::future::BoxFuture;
use rand::{rng, seq::IteratorRandom};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;

use crate::error::ServiceError;

/// Convenient result alias returning [`CatalogError`] failures.
pub type CatalogResult<T> = Result<T, CatalogError>;

/// A playable track as described by the catalog service.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Song {
    /// Catalog identifier, referenced from room rows.
    pub id: String,
    /// Track title, revealed to players at the end of a round.
    pub title: String,
    /// Performing artist.
    pub artist: String,
    /// Direct URL of the audio file clients stream.
    pub audio_url: String,
    /// Full track length, milliseconds.
    pub duration_ms: u64,
}

/// Failures that can occur while talking to the catalog service.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Building the HTTP client failed (invalid TLS setup, etc).
    #[error("failed to build catalog client")]
    ClientBuilder {
        /// Underlying reqwest failure.
        #[source]
        source: reqwest::Error,
    },
    /// A request to a catalog endpoint could not be sent.
    #[error("failed to send catalog request to `{path}`")]
    RequestSend {
        /// Request path relative to the catalog base URL.
        path: String,
        /// Underlying reqwest failure.
        #[source]
        source: reqwest::Error,
    },
    /// The catalog returned an unexpected status code.
    #[error("unexpected catalog response status {status} for `{path}`")]
    RequestStatus {
        /// Request path relative to the catalog base URL.
        path: String,
        /// Status returned by the catalog.
        status: StatusCode,
    },
    /// Response payload could not be parsed.
    #[error("failed to decode catalog response for `{path}`")]
    DecodeResponse {
        /// Request path relative to the catalog base URL.
        path: String,
        /// Underlying reqwest failure.
        #[source]
        source: reqwest::Error,
    },
}

impl From<CatalogError> for ServiceError {
    fn from(err: CatalogError) -> Self {
        ServiceError::ResourceUnavailable(err.to_string())
    }
}

/// Read-only access to the track library.
pub trait SongCatalog: Send + Sync {
    /// Pick a random song whose id is not in `exclude`.
    ///
    /// Returns `None` when every song has been played.
    fn pick_song(&self, exclude: Vec<String>) -> BoxFuture<'static, CatalogResult<Option<Song>>>;

    /// Resolve a song by id, `None` when the catalog no longer knows it.
    fn song(&self, id: String) -> BoxFuture<'static, CatalogResult<Option<Song>>>;

    /// Whether the song's audio file currently resolves.
    fn audio_available(&self, song: Song) -> BoxFuture<'static, CatalogResult<bool>>;
}

/// [`SongCatalog`] backed by the catalog HTTP service.
#[derive(Clone)]
pub struct HttpSongCatalog {
    client: Client,
    base_url: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct SongListResponse {
    songs: Vec<Song>,
}

impl HttpSongCatalog {
    /// Build a catalog client against the given base URL.
    pub fn new(base_url: &str) -> CatalogResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CatalogError::ClientBuilder { source })?;
        Ok(Self {
            client,
            base_url: Arc::from(base_url.trim_end_matches('/')),
        })
    }

    async fn list_songs(client: Client, base_url: Arc<str>) -> CatalogResult<Vec<Song>> {
        let path = "songs".to_string();
        let url = format!("{base_url}/{path}");
        let response = client
            .get(&url)
            .send()
            .await
            .map_err(|source| CatalogError::RequestSend {
                path: path.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CatalogError::RequestStatus {
                path,
                status: response.status(),
            });
        }

        let body: SongListResponse =
            response
                .json()
                .await
                .map_err(|source| CatalogError::DecodeResponse { path, source })?;
        Ok(body.songs)
    }
}

impl SongCatalog for HttpSongCatalog {
    fn pick_song(&self, exclude: Vec<String>) -> BoxFuture<'static, CatalogResult<Option<Song>>> {
        let client = self.client.clone();
        let base_url = Arc::clone(&self.base_url);
        Box::pin(async move {
            let songs = Self::list_songs(client, base_url).await?;
            let picked = songs
                .into_iter()
                .filter(|song| !exclude.contains(&song.id))
                .choose(&mut rng());
            Ok(picked)
        })
    }

    fn song(&self, id: String) -> BoxFuture<'static, CatalogResult<Option<Song>>> {
        let client = self.client.clone();
        let base_url = Arc::clone(&self.base_url);
        Box::pin(async move {
            let path = format!("songs/{id}");
            let url = format!("{base_url}/{path}");
            let response =
                client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|source| CatalogError::RequestSend {
                        path: path.clone(),
                        source,
                    })?;

            match response.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => {
                    let song = response
                        .json()
                        .await
                        .map_err(|source| CatalogError::DecodeResponse { path, source })?;
                    Ok(Some(song))
                }
                status => Err(CatalogError::RequestStatus { path, status }),
            }
        })
    }

    fn audio_available(&self, song: Song) -> BoxFuture<'static, CatalogResult<bool>> {
        let client = self.client.clone();
        Box::pin(async move {
            let response = client.head(&song.audio_url).send().await.map_err(|source| {
                CatalogError::RequestSend {
                    path: song.audio_url.clone(),
                    source,
                }
            })?;
            Ok(response.status().is_success())
        })
    }
}

#[cfg(test)]
pub(crate) mod stub {
    use std::{collections::HashSet, sync::Mutex};

    use super::*;

    /// Fixed-library catalog for service tests.
    pub struct StubCatalog {
        songs: Vec<Song>,
        broken_audio: Mutex<HashSet<String>>,
    }

    impl StubCatalog {
        pub fn new(ids: &[&str]) -> Self {
            let songs = ids
                .iter()
                .map(|id| Song {
                    id: (*id).to_string(),
                    title: format!("title {id}"),
                    artist: format!("artist {id}"),
                    audio_url: format!("http://catalog.test/audio/{id}.ogg"),
                    duration_ms: 180_000,
                })
                .collect();
            Self {
                songs,
                broken_audio: Mutex::new(HashSet::new()),
            }
        }

        pub fn break_audio(&self, id: &str) {
            self.broken_audio.lock().unwrap().insert(id.to_string());
        }
    }

    impl SongCatalog for StubCatalog {
        fn pick_song(
            &self,
            exclude: Vec<String>,
        ) -> BoxFuture<'static, CatalogResult<Option<Song>>> {
            // Deterministic: first unplayed song, not a random one.
            let picked = self
                .songs
                .iter()
                .find(|song| !exclude.contains(&song.id))
                .cloned();
            Box::pin(async move { Ok(picked) })
        }

        fn song(&self, id: String) -> BoxFuture<'static, CatalogResult<Option<Song>>> {
            let found = self.songs.iter().find(|song| song.id == id).cloned();
            Box::pin(async move { Ok(found) })
        }

        fn audio_available(&self, song: Song) -> BoxFuture<'static, CatalogResult<bool>> {
            let broken = self.broken_audio.lock().unwrap().contains(&song.id);
            Box::pin(async move { Ok(!broken) })
        }
    }
}
