use mongodb::error::Error as MongoError;
use thiserror::Error;
use uuid::Uuid;

/// Result alias for the Mongo backend.
pub type MongoResult<T> = Result<T, MongoDaoError>;

/// Failures raised while talking to MongoDB.
#[derive(Debug, Error)]
pub enum MongoDaoError {
    /// The connection URI could not be parsed.
    #[error("failed to parse MongoDB connection URI `{uri}`")]
    InvalidUri {
        /// Offending URI.
        uri: String,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Client construction from parsed options failed.
    #[error("failed to build MongoDB client from options")]
    ClientConstruction {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Initial ping never succeeded within the retry budget.
    #[error("MongoDB ping failed during initial connection after {attempts} attempt(s)")]
    InitialPing {
        /// Number of attempts made.
        attempts: u32,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Periodic health-check ping failed.
    #[error("MongoDB ping health check failed")]
    HealthPing {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Index creation failed during startup.
    #[error("failed to ensure index `{index}` on collection `{collection}`")]
    EnsureIndex {
        /// Target collection.
        collection: &'static str,
        /// Index description.
        index: &'static str,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A write against the rooms collection failed.
    #[error("failed to write room `{id}`")]
    WriteRoom {
        /// Room primary key.
        id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A read against the rooms collection failed.
    #[error("failed to load room(s)")]
    LoadRoom {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A write against the players collection failed.
    #[error("failed to write player `{id}`")]
    WritePlayer {
        /// Player primary key.
        id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A read against the players collection failed.
    #[error("failed to load player(s)")]
    LoadPlayer {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A write against the buzzes collection failed.
    #[error("failed to write buzz `{id}`")]
    WriteBuzz {
        /// Buzz primary key.
        id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// A read against the buzzes collection failed.
    #[error("failed to load buzzes")]
    LoadBuzz {
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Deleting the buzz rows of a room failed.
    #[error("failed to purge buzzes of room `{room_id}`")]
    PurgeBuzzes {
        /// Owning room.
        room_id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Deleting the player rows of a room failed.
    #[error("failed to purge players of room `{room_id}`")]
    PurgePlayers {
        /// Owning room.
        room_id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
    /// Resetting the player rows of a room failed.
    #[error("failed to reset players of room `{room_id}`")]
    ResetPlayers {
        /// Owning room.
        room_id: Uuid,
        /// Driver-level cause.
        #[source]
        source: MongoError,
    },
}
