mod publish;
mod render;

pub use publish::FeedPublisher;
pub use render::{feed_to_xml, publish_timestamp, render_feed};
