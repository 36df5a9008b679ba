pub mod course;
pub mod room;
pub mod user;

pub use course::Course;
pub use room::Room;
pub use user::{User, UserStatus};
