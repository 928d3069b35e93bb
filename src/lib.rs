//! Photo-sharing client: sign in, upload an image with a caption, and follow
//! a live feed of every post. Identity, blob storage and the document store
//! are provided by a hosted backend (Supabase) or an in-memory stand-in.

pub mod config;
pub mod dtos;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod repositories;
pub mod services;
