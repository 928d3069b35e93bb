use actix_web::{get, web, HttpResponse, Responder};
use serde::Serialize;

use crate::dtos::ApiResponse;
use crate::handlers::AppState;
use crate::services::feed::FeedView;

#[derive(Serialize)]
struct FeedOut {
    subscribed: bool,
    #[serde(flatten)]
    view: FeedView,
}

/// GET /api/feed
#[get("/feed")]
pub async fn get_feed(state: web::Data<AppState>) -> impl Responder {
    let feed = state.app.feed();
    let out = FeedOut {
        subscribed: feed.is_subscribed(),
        view: feed.view(),
    };
    HttpResponse::Ok().json(ApiResponse::success("Feed retrieved", out))
}
