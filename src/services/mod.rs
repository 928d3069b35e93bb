pub mod app;
pub mod auth_panel;
pub mod backend;
pub mod feed;
pub mod memory;
pub mod session;
pub mod subscription;
pub mod supabase;
pub mod upload_panel;
