use review_api::ReviewContext;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ReviewContext,
}
