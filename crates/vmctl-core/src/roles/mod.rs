//! Network-function roles (MME, HSS, SPGW).
//!
//! Every role is the same pipeline with different parts plugged in:
//!
//! ```text
//! Message --RoleConfig::parse--> C --ConfigApplier<C>::configure--> Outcome
//!                                |
//!                                +--command()--> ProcessController
//! ```
//!
//! [`NetworkFunctionProcessor`] owns that pipeline; the role modules only
//! provide the record type, its parser and its applier.

pub mod hss;
pub mod mme;
pub mod spgw;

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{Instrument, Span, info, info_span, warn};

use crate::Message;
use crate::apply::ConfigApplier;
use crate::message::Command;
use crate::outcome::{Outcome, combine};
use crate::processor::Processor;
use crate::runner::ProcessController;

/// A role's typed configuration record.
pub trait RoleConfig: Send + Sync + Sized {
    /// Role name used in spans and log fields.
    const ROLE: &'static str;

    /// Build the record from a message. Never fails; see
    /// [`crate::message`] for how individual fields degrade.
    fn parse(msg: &Message) -> Self;

    fn command(&self) -> Option<Command>;
}

/// Parse, configure, then run the requested command.
pub struct NetworkFunctionProcessor<C> {
    name: String,
    applier: Box<dyn ConfigApplier<C>>,
    controller: Arc<dyn ProcessController>,
    span: Span,
}

impl<C: RoleConfig> NetworkFunctionProcessor<C> {
    pub fn new(
        name: impl Into<String>,
        applier: impl ConfigApplier<C> + 'static,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        let name = name.into();
        let span = info_span!("processor", name = %name, role = C::ROLE);
        Self {
            name,
            applier: Box::new(applier),
            controller,
            span,
        }
    }

    pub fn controller(&self) -> &Arc<dyn ProcessController> {
        &self.controller
    }
}

impl<C> std::fmt::Debug for NetworkFunctionProcessor<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkFunctionProcessor")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl<C: RoleConfig + 'static> Processor for NetworkFunctionProcessor<C> {
    fn name(&self) -> &str {
        &self.name
    }

    async fn process(&self, msg: &Message) -> Outcome {
        async {
            let config = C::parse(msg);
            let configured = self.applier.configure(&config).await;

            let Some(command) = config.command() else {
                return combine([("configure", configured)]);
            };

            if configured.is_failed() {
                warn!(%command, reason = %configured.message, "configuration failed, not executing command");
                return Outcome::fail(format!(
                    "configuration failed, command {command} was not executed"
                ))
                .with_detail("configure", configured.message);
            }

            let executed = execute(self.controller.as_ref(), command).await;
            info!(%command, outcome = %executed, "command executed");
            let step = command.to_string();
            combine([("configure", configured), (step.as_str(), executed)])
        }
        .instrument(self.span.clone())
        .await
    }
}

/// Run one lifecycle command against a controller.
pub async fn execute(controller: &dyn ProcessController, command: Command) -> Outcome {
    let result = match command {
        Command::Start => controller.start().await.map(|()| Outcome::ok("started")),
        Command::Stop => controller.stop().await.map(|()| Outcome::ok("stopped")),
        Command::Restart => controller.restart().await.map(|()| Outcome::ok("restarted")),
        Command::Status => {
            let status = if controller.is_running().await {
                Outcome::ok("running")
            } else {
                Outcome::warn("not running")
            };
            Ok(status.with_detail("output", controller.output().await))
        }
    };

    result.unwrap_or_else(|e| Outcome::fail(format!("{command} failed: {e:#}")))
}
