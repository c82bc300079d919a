//! Wallet Handlers

use axum::{
    extract::{Extension, State},
    Json,
};

use crate::application::dto::response::WalletResponse;
use crate::domain::WalletRepository;
use crate::infrastructure::repositories::PgWalletRepository;
use crate::presentation::middleware::AuthUser;
use crate::shared::error::AppError;
use crate::startup::AppState;

/// Get the caller's balance and earnings
pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthUser>,
) -> Result<Json<WalletResponse>, AppError> {
    let wallet = PgWalletRepository::new(state.db.clone())
        .find_or_create(auth.user_id)
        .await?;

    Ok(Json(WalletResponse::from(wallet)))
}
