// Evaluation context - what a callback can reach while it runs

use crate::core::trait_def::{AudioDevice, LoopController};
use crate::core::variables::VariableStore;
use std::fmt;
use std::sync::Arc;

/// Guard evaluated right before a deferred action takes effect
pub type Condition = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Clone)]
pub struct Context {
    control: Arc<dyn LoopController>,
    device: Arc<dyn AudioDevice>,
    variables: Arc<VariableStore>,
    condition: Option<Condition>,
}

impl Context {
    pub fn new(
        control: Arc<dyn LoopController>,
        device: Arc<dyn AudioDevice>,
        variables: Arc<VariableStore>,
    ) -> Self {
        Self {
            control,
            device,
            variables,
            condition: None,
        }
    }

    /// Copy of this context that only acts while `condition` holds
    #[must_use]
    pub fn with_condition(&self, condition: Condition) -> Self {
        Self {
            condition: Some(condition),
            ..self.clone()
        }
    }

    pub fn control(&self) -> &Arc<dyn LoopController> {
        &self.control
    }

    pub fn device(&self) -> &Arc<dyn AudioDevice> {
        &self.device
    }

    pub fn variables(&self) -> &Arc<VariableStore> {
        &self.variables
    }

    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// True when there is no condition or it currently holds
    pub fn condition_holds(&self) -> bool {
        self.condition.as_ref().is_none_or(|c| c())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("bpm", &self.control.bpm())
            .field("variables", &self.variables.names())
            .field("conditional", &self.condition.is_some())
            .finish()
    }
}
