pub mod achievement;
pub mod checkpoint;
pub mod game;
pub mod game_match;
pub mod library;
pub mod platform;
pub mod progress;
pub mod sync_operation;
pub mod user_game;

pub use achievement::*;
pub use checkpoint::*;
pub use game::*;
pub use game_match::*;
pub use library::*;
pub use platform::*;
pub use progress::*;
pub use sync_operation::*;
pub use user_game::*;
