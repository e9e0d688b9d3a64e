//! The scripted seller/buyer exchange.
//!
//! Steps run strictly in order and the first failure ends the run. Cleanup is
//! left to the caller so that it also happens when the run is interrupted.

use harness_proto::WireMessage;
use std::fmt;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::config::HarnessConfig;
use crate::error::HarnessError;
use crate::process::{LogSignalProbe, Readiness, ReadinessProbe, Supervisor};
use crate::role::{Channel, Role};
use crate::session::{Reply, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    LaunchSeller,
    LaunchBuyer,
    MeshSettle,
    SellerStatus,
    BuyerStatus,
    SellerToBuyer,
    BuyerToSeller,
    FinalSellerStatus,
    FinalBuyerStatus,
}

impl Step {
    pub const ALL: [Step; 9] = [
        Step::LaunchSeller,
        Step::LaunchBuyer,
        Step::MeshSettle,
        Step::SellerStatus,
        Step::BuyerStatus,
        Step::SellerToBuyer,
        Step::BuyerToSeller,
        Step::FinalSellerStatus,
        Step::FinalBuyerStatus,
    ];

    /// The role whose process or endpoint the step talks to.
    pub fn role(self) -> Option<Role> {
        match self {
            Step::LaunchSeller
            | Step::SellerStatus
            | Step::SellerToBuyer
            | Step::FinalSellerStatus => Some(Role::Seller),
            Step::LaunchBuyer
            | Step::BuyerStatus
            | Step::BuyerToSeller
            | Step::FinalBuyerStatus => Some(Role::Buyer),
            Step::MeshSettle => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Step::LaunchSeller => "launch seller",
            Step::LaunchBuyer => "launch buyer",
            Step::MeshSettle => "wait for peer mesh",
            Step::SellerStatus => "seller status check",
            Step::BuyerStatus => "buyer status check",
            Step::SellerToBuyer => "p2p message from seller to buyer",
            Step::BuyerToSeller => "p2p message from buyer to seller",
            Step::FinalSellerStatus => "final seller status check",
            Step::FinalBuyerStatus => "final buyer status check",
        })
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {source}")]
pub struct StepFailure {
    pub step: Step,
    pub role: Option<Role>,
    #[source]
    pub source: HarnessError,
}

impl StepFailure {
    fn new(step: Step, source: HarnessError) -> Self {
        Self {
            step,
            role: step.role(),
            source,
        }
    }
}

#[derive(Debug)]
pub enum TestOutcome {
    Passed,
    Failed(StepFailure),
    /// The harness received the named signal before the run finished.
    Interrupted(&'static str),
}

impl TestOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

pub struct Scenario<'a> {
    config: &'a HarnessConfig,
    probe: Box<dyn ReadinessProbe>,
}

impl<'a> Scenario<'a> {
    pub fn new(config: &'a HarnessConfig) -> Self {
        let probe = LogSignalProbe::new(config.readiness_signals.iter().cloned());
        Self::with_probe(config, Box::new(probe))
    }

    pub fn with_probe(config: &'a HarnessConfig, probe: Box<dyn ReadinessProbe>) -> Self {
        Self { config, probe }
    }

    pub async fn run(&self, supervisor: &mut Supervisor) -> TestOutcome {
        info!("starting seller/buyer communication scenario");
        match self.run_steps(supervisor).await {
            Ok(()) => TestOutcome::Passed,
            Err(failure) => {
                error!(
                    step = %failure.step,
                    role = ?failure.role,
                    error = %failure.source,
                    "scenario step failed"
                );
                TestOutcome::Failed(failure)
            }
        }
    }

    async fn run_steps(&self, supervisor: &mut Supervisor) -> Result<(), StepFailure> {
        let timings = &self.config.timings;

        self.start(supervisor, Step::LaunchSeller).await?;
        self.start(supervisor, Step::LaunchBuyer).await?;

        info!(wait = ?timings.mesh_settle, "waiting for peers to discover each other");
        settle(timings.mesh_settle).await;

        self.status(Step::SellerStatus).await?;
        self.status(Step::BuyerStatus).await?;

        self.message(Step::SellerToBuyer).await?;
        settle(timings.message_settle).await;
        self.message(Step::BuyerToSeller).await?;
        settle(timings.message_settle).await;

        info!("final status checks");
        self.status(Step::FinalSellerStatus).await?;
        self.status(Step::FinalBuyerStatus).await?;
        Ok(())
    }

    async fn start(&self, supervisor: &mut Supervisor, step: Step) -> Result<(), StepFailure> {
        let Some(role) = step.role() else {
            return Ok(());
        };
        let role_config = self.config.role(role);
        let timings = &self.config.timings;

        supervisor
            .launch(role_config)
            .map_err(|err| StepFailure::new(step, err))?;
        let readiness = supervisor
            .await_ready(role, self.probe.as_ref(), timings.ready_fallback)
            .await
            .map_err(|err| StepFailure::new(step, err))?;

        match readiness {
            Readiness::Signalled { evidence } => {
                info!(%role, outcome = "success", evidence = %evidence, "peer reported ready");
            }
            Readiness::AssumedAfterTimeout { waited } => {
                warn!(%role, waited = ?waited, "no readiness line seen; peer still running, assuming ready");
            }
        }
        settle(timings.post_launch_settle).await;
        Ok(())
    }

    async fn status(&self, step: Step) -> Result<Reply, StepFailure> {
        let role = step.role().unwrap_or(Role::Seller);
        self.exchange(step, role, Channel::Commands, WireMessage::show_current_peers())
            .await
    }

    async fn message(&self, step: Step) -> Result<Reply, StepFailure> {
        let sender = step.role().unwrap_or(Role::Seller);
        let recipient = self.config.role(sender.counterpart());
        let message = WireMessage::p2p(self.config.message_from(sender), &recipient.public_key);
        self.exchange(step, sender, Channel::P2p, message).await
    }

    /// Opens a fresh session, sends one request and closes the session again,
    /// whether or not a reply arrived.
    async fn exchange(
        &self,
        step: Step,
        role: Role,
        channel: Channel,
        message: WireMessage,
    ) -> Result<Reply, StepFailure> {
        let timings = &self.config.timings;
        let url = self.config.role(role).endpoint(&self.config.ws_host, channel);
        info!(%step, %url, "running step");

        let mut session = Session::open(url, timings.connect_timeout)
            .await
            .map_err(|err| StepFailure::new(step, err))?;
        let result = session.request(&message, timings.response_timeout).await;
        session.close().await;
        let reply = result.map_err(|err| StepFailure::new(step, err))?;

        match reply.parsed() {
            Some(parsed) if parsed.is_error() => {
                warn!(%step, reply = reply.text(), "peer answered with an error");
                if self.config.strict_replies {
                    return Err(StepFailure::new(
                        step,
                        HarnessError::PeerRejected {
                            url: session.url().to_string(),
                            reply: reply.into_text(),
                        },
                    ));
                }
            }
            _ => info!(%step, outcome = "success", reply = reply.text(), "response received"),
        }
        Ok(reply)
    }
}

async fn settle(duration: Duration) {
    if !duration.is_zero() {
        tokio::time::sleep(duration).await;
    }
}
