use stepauth_application::MfaService;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub mfa_service: MfaService,
}
