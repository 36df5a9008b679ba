pub mod collection;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod ids;
pub mod model;
pub mod object;

pub use collection::{CollectionRef, DocumentCollection};
pub use config::{AppConfig, StoreBackend};
pub use db::Database;
pub use document::{ChangeSpec, Condition, DocRef, FieldMap, UpdateReport};
pub use error::{StoreError, StoreResult};
pub use ids::{CourseId, RoomCode, UserId};
pub use model::{Course, Room, User, UserStatus};
pub use object::{Persist, StoredObject};
