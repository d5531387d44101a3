use eagleeye_core::{Dispatcher, ProxyConfig};

mod http;

pub use http::{app_router, serve};

#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Dispatcher,
}

impl AppState {
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }

    pub fn config(&self) -> &ProxyConfig {
        self.dispatcher.config()
    }
}
