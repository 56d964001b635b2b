//! MongoDB backend for the [`RoomStore`](crate::dao::room_store::RoomStore) contract.

mod connection;
mod error;
pub mod store;

pub use error::MongoDaoError;
pub use store::MongoRoomStore;

use mongodb::options::ClientOptions;

use crate::dao::storage::StorageError;

impl From<MongoDaoError> for StorageError {
    fn from(err: MongoDaoError) -> Self {
        StorageError::unavailable(err.to_string(), err)
    }
}

/// Connection parameters for the Mongo backend.
#[derive(Clone)]
pub struct MongoConfig {
    /// Parsed client options.
    pub options: ClientOptions,
    /// Name of the database holding rooms, players, and buzzes.
    pub database_name: String,
}

impl MongoConfig {
    /// Parse a MongoDB URI into a config, defaulting the database name.
    pub async fn from_uri(uri: &str, db_name: Option<&str>) -> error::MongoResult<Self> {
        let database_name = db_name.unwrap_or("songbuzz").to_owned();
        let options =
            ClientOptions::parse(uri)
                .await
                .map_err(|source| MongoDaoError::InvalidUri {
                    uri: uri.to_owned(),
                    source,
                })?;

        Ok(Self {
            options,
            database_name,
        })
    }
}
