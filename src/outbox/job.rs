// Copyright (c) 2025 - Cowboy AI, Inc.
//! Commission jobs - binding a commission to a caller's unit of work

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, info, warn};

use super::{Outbox, OutboxMessage};
use crate::domain::{IssueRequest, Serial};
use crate::errors::{QuotaError, QuotaResult};
use crate::service::QuotaService;

/// Commission identity threaded through the caller's work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommissionContext {
    pub serial: Serial,
    pub client_key: String,
    pub name: String,
}

/// Deferred side effect run once the work's outcome is known
pub type JobAction = Box<dyn FnOnce(CommissionContext) -> BoxFuture<'static, QuotaResult<()>> + Send>;

/// Failure of a commission job
#[derive(Debug, thiserror::Error)]
pub enum JobError<E> {
    /// The commission could not be issued; the work never ran
    #[error("Quota error: {0}")]
    Quota(QuotaError),

    /// The work failed; the commission is queued for rejection
    #[error("Operation failed: {0}")]
    Operation(E),
}

/// Unit of work coupled to a commission
///
/// The resolution message is always written first; registered actions run
/// after it, in registration order, and their failures are logged without
/// changing the outcome.
pub struct CommissionJob {
    service: Arc<dyn QuotaService>,
    outbox: Arc<dyn Outbox>,
    request: IssueRequest,
    on_success: Vec<JobAction>,
    on_failure: Vec<JobAction>,
}

impl CommissionJob {
    pub fn new(
        service: Arc<dyn QuotaService>,
        outbox: Arc<dyn Outbox>,
        request: IssueRequest,
    ) -> Self {
        Self {
            service,
            outbox,
            request,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    /// Register an action for a successful unit of work
    pub fn on_success<F, Fut>(mut self, action: F) -> Self
    where
        F: FnOnce(CommissionContext) -> Fut + Send + 'static,
        Fut: Future<Output = QuotaResult<()>> + Send + 'static,
    {
        self.on_success
            .push(Box::new(move |context| action(context).boxed()));
        self
    }

    /// Register an action for a failed unit of work
    pub fn on_failure<F, Fut>(mut self, action: F) -> Self
    where
        F: FnOnce(CommissionContext) -> Fut + Send + 'static,
        Fut: Future<Output = QuotaResult<()>> + Send + 'static,
    {
        self.on_failure
            .push(Box::new(move |context| action(context).boxed()));
        self
    }

    /// Issue the commission, run `work`, and record the resolution
    ///
    /// # Errors
    ///
    /// - `JobError::Quota` if the commission cannot be issued
    /// - `JobError::Operation` with the work's own error
    pub async fn run<F, Fut, T, E>(self, work: F) -> Result<T, JobError<E>>
    where
        F: FnOnce(CommissionContext) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let client_key = self.request.client_key.clone();
        let name = self.request.name.clone();
        let serial = self
            .service
            .issue_commission(self.request)
            .await
            .map_err(JobError::Quota)?;
        let context = CommissionContext {
            serial,
            client_key,
            name,
        };

        let outcome = work(context.clone()).await;
        let accept = outcome.is_ok();

        // Without the outbox record the commission stays pending for
        // reconciliation; the work's result still stands.
        if let Err(e) = self.outbox.enqueue(OutboxMessage::new(serial, accept)).await {
            error!(serial = %serial, accept, error = %e, "Failed to record resolution");
        } else {
            info!(serial = %serial, accept, "Resolution recorded");
        }

        let actions = if accept {
            self.on_success
        } else {
            self.on_failure
        };
        for action in actions {
            if let Err(e) = action(context.clone()).await {
                warn!(serial = %serial, error = %e, "Commission job action failed");
            }
        }

        outcome.map_err(JobError::Operation)
    }
}
