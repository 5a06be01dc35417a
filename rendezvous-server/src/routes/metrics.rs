use axum::extract::State;

use crate::state::AppState;

pub async fn metrics(State(state): State<AppState>) -> String {
    let file_count = state.store.count();
    let pipe_count = state.pipes.count() + state.fanout.count();
    format!("file_count: {file_count}\npipe_count: {pipe_count}\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn metrics_reports_zero_on_empty_state() {
        let state = AppState::new();
        let body = metrics(State(state)).await;
        assert!(body.contains("file_count: 0"));
        assert!(body.contains("pipe_count: 0"));
    }
}
