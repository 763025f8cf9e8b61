use crate::AppState;
use axum::extract::State;
use widget_core::error::AppError;

pub async fn metrics(State(state): State<AppState>) -> Result<String, AppError> {
    state.metrics.render()
}
