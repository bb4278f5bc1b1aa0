pub mod feed;
pub mod jupiter;
