pub mod document;
pub mod identity;
pub mod post;
