//! Pure workflow graph interpretation. The interpreter holds no state of its
//! own; position and visit counts live on the [`Run`].

use crate::domain::run::Run;
use crate::domain::workflow::{WorkflowDefinition, END_STEP};
use crate::errors::StepError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NextStep {
    Step(String),
    Completed,
}

#[derive(Clone, Copy, Debug)]
pub struct Interpreter {
    max_step_visits: u32,
}

impl Interpreter {
    pub fn new(max_step_visits: u32) -> Self {
        Self { max_step_visits }
    }

    /// Resolve the step the run should execute next. Guarded transitions from
    /// the current step are evaluated in declared order against run
    /// variables; the first satisfied guard wins. With no match, the run
    /// falls through to the declaration-order successor, and past the last
    /// declared step it completes.
    pub fn next_step(&self, definition: &WorkflowDefinition, run: &Run) -> NextStep {
        let current = match run.current_step.as_deref() {
            Some(step) => step,
            None => {
                return match definition.entry_step() {
                    Some(step) => NextStep::Step(step.name.clone()),
                    None => NextStep::Completed,
                }
            }
        };

        for transition in definition.transitions_from(current) {
            if transition.guard.evaluate(&run.variables) {
                if transition.to == END_STEP {
                    return NextStep::Completed;
                }
                return NextStep::Step(transition.to.clone());
            }
        }

        match definition.successor(current) {
            Some(step) => NextStep::Step(step.name.clone()),
            None => NextStep::Completed,
        }
    }

    /// Count a visit to `step`. Exceeding the visit cap means the graph is
    /// cycling without progress and the run must fail.
    pub fn record_visit(&self, run: &mut Run, step: &str) -> Result<u32, StepError> {
        let count = run.step_visits.entry(step.to_string()).or_insert(0);
        *count += 1;
        if *count > self.max_step_visits {
            return Err(StepError::GraphExhausted { cap: self.max_step_visits });
        }
        Ok(*count)
    }
}
