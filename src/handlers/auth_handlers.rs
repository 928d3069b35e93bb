use actix_web::{get, post, web, HttpResponse, Responder};

use crate::dtos::auth_dtos::{SessionOut, SignInRequest, SignUpRequest};
use crate::dtos::ApiResponse;
use crate::handlers::{action_failed, AppState};

fn session_out(state: &AppState) -> SessionOut {
    let snapshot = state.app.session().snapshot();
    SessionOut {
        screen: state.app.screen(),
        resolving: snapshot.resolving,
        identity: snapshot.identity,
        message: state.app.auth().message(),
    }
}

/// GET /api/session
#[get("/session")]
pub async fn get_session(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(ApiResponse::success("Session retrieved", session_out(&state)))
}

/// POST /auth/signin
#[post("/signin")]
pub async fn sign_in(state: web::Data<AppState>, body: web::Json<SignInRequest>) -> impl Responder {
    let auth = state.app.auth();
    match auth.sign_in(&body.email, &body.password).await {
        Ok(()) => HttpResponse::Ok().json(ApiResponse::success(
            auth.message().unwrap_or_default(),
            session_out(&state),
        )),
        Err(e) => action_failed(&e),
    }
}

/// POST /auth/signup
#[post("/signup")]
pub async fn sign_up(state: web::Data<AppState>, body: web::Json<SignUpRequest>) -> impl Responder {
    let auth = state.app.auth();
    match auth.sign_up(&body.email, &body.password, &body.display_name).await {
        Ok(()) => HttpResponse::Created().json(ApiResponse::success(
            auth.message().unwrap_or_default(),
            session_out(&state),
        )),
        Err(e) => action_failed(&e),
    }
}

/// POST /auth/signout
#[post("/signout")]
pub async fn sign_out(state: web::Data<AppState>) -> impl Responder {
    state.app.sign_out().await;
    HttpResponse::Ok().json(ApiResponse::done("signed out"))
}
