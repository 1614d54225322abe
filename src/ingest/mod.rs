pub mod markets;
pub mod news;

pub use markets::MarketFeedActor;
pub use news::NewsFeedActor;
