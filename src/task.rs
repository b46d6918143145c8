//! # Sender Task
//!
//! A [`SenderTask`] performs one generator iteration end to end:
//!
//! 1. Ask the report sink for a measurement unit; `None` means the run is
//!    stopping and the task leaves without touching a transport.
//! 2. Stamp the iteration number into the message-number header and filter
//!    attribute, if numbering is enabled.
//! 3. Acquire a transport from the pool.
//! 4. Send one heartbeat when the message store is empty, otherwise every
//!    store entry `multiplicity` times, in store order.
//! 5. Release the transport, report the unit, and finally give back the gate
//!    permit.
//!
//! Faults in the pre/post phases are logged and ignored; a failed measured
//! send leaves that round trip without a result. Anything else ends the task
//! early with a log entry. The transport and the gate permit are released on
//! every path, the permit always last.

use crate::error::EngineResult;
use crate::gate::GatePermit;
use crate::measurement::{MeasurementUnit, ResultValue, DEFAULT_RESULT};
use crate::message::{
    Attributes, Headers, Message, MessageStore, MessageTemplate, MESSAGE_NUMBER_HEADER,
    MESSAGE_NUMBER_PROPERTY,
};
use crate::pool::{PooledTransport, TransportPool};
use crate::report::ReportSink;
use crate::validation::{RoundTripResult, ValidationSink};
use std::sync::Arc;
use tracing::{debug, error};

/// Collaborators shared by every task of a run
#[derive(Clone)]
pub struct TaskContext {
    pool: TransportPool,
    store: MessageStore,
    report: Arc<dyn ReportSink>,
    validation: Arc<dyn ValidationSink>,
    validation_enabled: bool,
    numbering: bool,
}

impl TaskContext {
    /// Validation is queried for being enabled once, here, for the whole run
    pub fn new(
        pool: TransportPool,
        store: MessageStore,
        report: Arc<dyn ReportSink>,
        validation: Arc<dyn ValidationSink>,
    ) -> Self {
        let validation_enabled = validation.is_enabled();
        Self {
            pool,
            store,
            report,
            validation,
            validation_enabled,
            numbering: false,
        }
    }

    /// Stamp every iteration's number into its headers and attributes
    pub fn with_numbering(mut self, enabled: bool) -> Self {
        self.numbering = enabled;
        self
    }

    pub fn pool(&self) -> &TransportPool {
        &self.pool
    }

    pub fn report(&self) -> &Arc<dyn ReportSink> {
        &self.report
    }
}

/// How a task ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// All round trips were attempted and the unit was reported
    Completed { iteration: u64, round_trips: u64 },
    /// The report sink issued no unit
    Stopped,
    /// The task ended early; the reason was logged
    Failed,
}

/// One generator iteration holding its gate permit
pub struct SenderTask {
    ctx: TaskContext,
    permit: GatePermit,
}

impl SenderTask {
    pub fn new(ctx: TaskContext, permit: GatePermit) -> Self {
        Self { ctx, permit }
    }

    /// Run the iteration. Never returns an error; faults are logged.
    pub async fn run(self) -> TaskOutcome {
        let SenderTask { ctx, permit } = self;

        let outcome = match ctx.execute().await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Sender task failed: {}", e);
                TaskOutcome::Failed
            }
        };

        drop(permit);
        outcome
    }
}

impl TaskContext {
    async fn execute(&self) -> EngineResult<TaskOutcome> {
        let Some(mut unit) = self.report.new_measurement_unit() else {
            debug!("No measurement unit issued, sender task stopping");
            return Ok(TaskOutcome::Stopped);
        };

        let mut headers = Headers::new();
        let mut attributes = Attributes::new();
        if self.numbering {
            let number = unit.iteration().to_string();
            headers.insert(MESSAGE_NUMBER_HEADER.to_string(), number.clone());
            attributes.insert(MESSAGE_NUMBER_PROPERTY.to_string(), number);
        }

        // Dropped on early exit, which returns it to the pool.
        let mut transport = self.pool.acquire().await?;

        let round_trips = self
            .send_all(&mut transport, &headers, &attributes, &mut unit)
            .await;

        self.pool.release(transport);

        let iteration = unit.iteration();
        self.report.report(unit);

        debug!(
            "Iteration {} completed with {} round trip(s)",
            iteration, round_trips
        );
        Ok(TaskOutcome::Completed {
            iteration,
            round_trips,
        })
    }

    /// Walk the store in order; returns the number of round trips performed
    async fn send_all(
        &self,
        transport: &mut PooledTransport,
        headers: &Headers,
        attributes: &Attributes,
        unit: &mut MeasurementUnit,
    ) -> u64 {
        if self.store.is_empty() {
            let response = round_trip(transport, None, headers, unit).await;
            self.validate(None, None, response);
            return 1;
        }

        let mut round_trips = 0;
        for template in self.store.iter() {
            let message = template.filtered(attributes);
            for _ in 0..template.multiplicity() {
                let response = round_trip(transport, Some(&message), headers, unit).await;
                self.validate(Some(template), Some(&message), response);
                round_trips += 1;
            }
        }
        round_trips
    }

    fn validate(
        &self,
        template: Option<&MessageTemplate>,
        sent: Option<&Message>,
        response: Option<ResultValue>,
    ) {
        if !self.validation_enabled {
            return;
        }
        self.validation.add_to_result_messages(RoundTripResult {
            template: template.cloned(),
            sent: sent.cloned(),
            response,
        });
    }
}

/// One pre/measured/post exchange; only the measured phase is timed
async fn round_trip(
    transport: &mut PooledTransport,
    message: Option<&Message>,
    headers: &Headers,
    unit: &mut MeasurementUnit,
) -> Option<ResultValue> {
    let name = transport.name();

    if let Err(e) = transport.pre_send(message, headers).await {
        error!("Iteration {}: {} pre-send failed: {:#}", unit.iteration(), name, e);
    }

    unit.start_measure();
    let response = match transport.send(message, headers, unit).await {
        Ok(response) => response,
        Err(e) => {
            error!("Iteration {}: {} send failed: {:#}", unit.iteration(), name, e);
            None
        }
    };
    unit.stop_measure();

    if let Err(e) = transport.post_send(message).await {
        error!("Iteration {}: {} post-send failed: {:#}", unit.iteration(), name, e);
    }

    unit.append_result(DEFAULT_RESULT, response.clone());
    response
}
