//! Evaluation stages
//!
//! Each stage is one agent in the outbound stream. The default pipeline runs
//! them in the order returned by [`default_pipeline`].

mod connectivity;
mod html;
mod scenario;

pub use connectivity::{AccessCheckStage, DriverAccessStage};
pub use html::{HtmlComplianceStage, HtmlValidatorStage};
pub use scenario::{ScenarioExecutionStage, ScenarioGenerationStage};

use std::sync::Arc;

use crate::stage::Stage;

/// The fixed evaluation pipeline, in execution order
pub fn default_pipeline() -> Vec<Arc<dyn Stage>> {
    vec![
        Arc::new(AccessCheckStage),
        Arc::new(DriverAccessStage),
        Arc::new(HtmlValidatorStage),
        Arc::new(HtmlComplianceStage),
        Arc::new(ScenarioGenerationStage),
        Arc::new(ScenarioExecutionStage),
    ]
}
