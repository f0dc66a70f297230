use async_trait::async_trait;
use tracing::{Span, info, info_span};

use super::Processor;
use crate::Message;
use crate::outcome::Outcome;

/// Logs every message it receives. Useful as a first processor when
/// debugging what a supervisor sends.
#[derive(Debug)]
pub struct LogProcessor {
    name: String,
    span: Span,
}

impl LogProcessor {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let span = info_span!("processor", name = %name, kind = "log");
        Self { name, span }
    }
}

#[async_trait]
impl Processor for LogProcessor {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, msg: &Message) -> Outcome {
        let keys: Vec<&str> = msg.keys().map(String::as_str).collect();
        info!(parent: &self.span, ?keys, "received message");
        Outcome::ok(format!("logged message with {} fields", keys.len()))
    }
}
