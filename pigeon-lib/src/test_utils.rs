use std::sync::{Arc, Mutex};

use crate::{ErrorKind, Message};

#[macro_export]
/// Creates a mock notification endpoint, which responds with a predefined
/// status to every `POST` it receives
macro_rules! mock_server {
    ($status:expr $(, $func:tt ($($arg:expr),*))*) => {{
        let mock_server = wiremock::MockServer::start().await;
        let response_template = wiremock::ResponseTemplate::new(http::StatusCode::from($status));
        let template = response_template$(.$func($($arg),*))*;
        wiremock::Mock::given(wiremock::matchers::method("POST")).respond_with(template).mount(&mock_server).await;
        mock_server
    }};
}

/// Records every `(message, error)` pair handed to the error callback, so a
/// test can assert on the reports once `wait` has returned.
///
/// Errors are stored by their display text; each failure class renders
/// distinctly, which keeps the assertions short.
#[derive(Clone, Debug, Default)]
pub(crate) struct ErrorLog {
    reports: Arc<Mutex<Vec<(Message, String)>>>,
}

impl ErrorLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// A handler suitable for [`crate::Client::on_error`]
    pub(crate) fn handler(&self) -> impl Fn(&Message, &ErrorKind) + Send + Sync + 'static {
        let reports = Arc::clone(&self.reports);
        move |message, error| {
            reports
                .lock()
                .unwrap()
                .push((message.clone(), error.to_string()));
        }
    }

    pub(crate) fn reports(&self) -> Vec<(Message, String)> {
        self.reports.lock().unwrap().clone()
    }

    pub(crate) fn len(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
