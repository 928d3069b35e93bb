// src/main.rs - photoshare client front end
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware::Logger, web, App, HttpServer};
use log::{error, info};

use photoshare::config::{BackendKind, Config};
use photoshare::handlers::{self, AppState};
use photoshare::services::app::PhotoShareApp;
use photoshare::services::backend::Backend;
use photoshare::services::memory::MemoryBackend;
use photoshare::services::supabase::SupabaseBackend;

fn mask_key(k: &str) -> String {
    let chars: Vec<char> = k.chars().collect();
    if chars.len() <= 8 {
        "[REDACTED]".to_string()
    } else {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}***{}", head, tail)
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let config = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    let (backend, memory) = match (&config.backend, &config.supabase) {
        (BackendKind::Supabase, Some(sb)) => {
            info!("Supabase URL: {}", sb.url);
            info!("Supabase Key: {}", mask_key(&sb.anon_key));
            match SupabaseBackend::new(sb) {
                Ok(service) => (Backend::from_service(Arc::new(service)), None),
                Err(e) => {
                    error!("Failed to build Supabase client: {}", e);
                    std::process::exit(1);
                }
            }
        }
        (BackendKind::Supabase, None) => {
            error!("Supabase backend selected without Supabase settings");
            std::process::exit(1);
        }
        (BackendKind::Memory, _) => {
            info!("Using in-memory backend; nothing survives a restart");
            let memory = Arc::new(MemoryBackend::new());
            (Backend::from_service(Arc::clone(&memory)), Some(memory))
        }
    };

    let state = web::Data::new(AppState {
        app: Arc::new(PhotoShareApp::start(backend)),
        memory,
    });

    let bind_address = format!("0.0.0.0:{}", config.port);
    info!("Starting server on {}", bind_address);

    let allowed_origins = config.allowed_origins.clone();
    HttpServer::new(move || {
        let mut cors = Cors::default()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec!["content-type", "accept", "x-requested-with"])
            .max_age(3600);

        for origin in &allowed_origins {
            cors = cors.allowed_origin(origin);
        }

        App::new()
            .wrap(cors)
            .wrap(Logger::default())
            .app_data(state.clone())
            // Base64 image bodies outgrow the default JSON limit.
            .app_data(web::JsonConfig::default().limit(16 * 1024 * 1024))
            .configure(handlers::configure)
    })
    .bind(&bind_address)?
    .run()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_keys_are_fully_redacted() {
        assert_eq!(mask_key("abcd1234"), "[REDACTED]");
    }

    #[test]
    fn masking_respects_char_boundaries() {
        assert_eq!(mask_key("eyJhbGciOiJIUzI1NiJ9"), "eyJh***NiJ9");
        assert_eq!(mask_key("ключ-секретный-ключ"), "ключ***ключ");
    }
}
