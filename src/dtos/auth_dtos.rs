use serde::{Deserialize, Serialize};

use crate::models::identity::Identity;
use crate::services::app::Screen;

#[derive(Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub display_name: String,
}

#[derive(Serialize)]
pub struct SessionOut {
    #[serde(flatten)]
    pub screen: Screen,
    pub resolving: bool,
    pub identity: Option<Identity>,
    /// Last message of the auth panel.
    pub message: Option<String>,
}
