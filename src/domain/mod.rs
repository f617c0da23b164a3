pub mod article;
pub mod feed;
pub mod folder;
pub mod retention;
pub mod state;

pub use article::{Article, Enclosure};
pub use feed::{Feed, FeedKind, FeedMetaPatch, FeedStatePatch, ERROR_CEILING};
pub use folder::Folder;
pub use retention::{KindCaps, RetentionPolicy, RetentionReport};
pub use state::ReadState;
