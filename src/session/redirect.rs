// Login redirect issued after a session teardown

/// Sends the user back to the login entry point
pub trait LoginRedirect: Send + Sync {
    fn redirect_to_login(&self, login_url: &str);
}

/// Redirect that only records the event in the log
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingRedirect;

impl LoginRedirect for TracingRedirect {
    fn redirect_to_login(&self, login_url: &str) {
        tracing::warn!(login_url = %login_url, "Session ended, redirecting to login");
    }
}
