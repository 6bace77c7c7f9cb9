pub mod ids;
pub mod item;
pub mod score;
pub mod status;

pub use ids::ItemId;
pub use item::Item;
pub use score::Score;
pub use status::Status;
