use super::run::{AsyncOutcome, AsyncWait, Run, RunStatus, Step, StepError, StepErrorKind};
use crate::ast::Value;
use crate::data::{Locale, OrgContext, normalize_key};
use crate::error::EvaluationError;
use crate::evaluator::coercion::{parse_date, parse_number};
use crate::evaluator::{EvaluationContext, evaluate, render};
use crate::flow::{Action, ActionSet, Flow, Node, RuleSet, RulesetType};
use crate::matcher::RuleMatcher;
use chrono::{DateTime, TimeDelta, Utc};

/// Pure run transitions for one flow revision.
///
/// Every method mutates the run in place and never persists; the engine does that.
/// On an evaluation error the run is already marked `Abandoned` with an error step
/// when the error is returned.
pub(crate) struct Machine<'e> {
    flow: &'e Flow,
    org: &'e OrgContext,
    now: DateTime<Utc>,
    async_timeout: TimeDelta,
}

/// Side effects a transition asks the engine to carry out.
#[derive(Debug, Default)]
pub(crate) struct Transition {
    pub started_flows: Vec<String>,
}

impl<'e> Machine<'e> {
    pub(crate) fn new(
        flow: &'e Flow,
        org: &'e OrgContext,
        now: DateTime<Utc>,
        async_timeout: TimeDelta,
    ) -> Self {
        Self {
            flow,
            org,
            now,
            async_timeout,
        }
    }

    /// Executes the current node of an `Active` run.
    pub(crate) fn step(&self, run: &mut Run) -> Result<Transition, EvaluationError> {
        run.modified_on = self.now;
        let Some(node_id) = run.current_node_id.clone() else {
            self.complete(run);
            return Ok(Transition::default());
        };

        match self.flow.node(&node_id) {
            None => {
                let step = Step::arrive(&node_id, "unknown", self.now);
                Err(self.fail(run, step, EvaluationError::NodeNotFound(node_id.clone())))
            }
            Some(Node::ActionSet(action_set)) => self.execute_actions(run, action_set),
            Some(Node::RuleSet(rule_set)) => self.enter_rule_set(run, rule_set),
        }
    }

    /// Applies a response to a run suspended in `WaitingForInput`.
    pub(crate) fn resume(&self, run: &mut Run, input: &str) -> Result<Transition, EvaluationError> {
        run.modified_on = self.now;
        let rule_set = self.current_rule_set(run)?;
        let value = typed_response(&rule_set.ruleset_type, input, &self.org.locale);

        let mut step = self.take_open_step(run, rule_set);
        step.input = Some(input.to_string());
        self.decide(run, rule_set, step, value)
    }

    /// Applies an async lookup result to a run suspended in `WaitingForAsyncResult`.
    ///
    /// A result arriving after the deadline is treated as a timeout.
    pub(crate) fn resume_async(
        &self,
        run: &mut Run,
        outcome: AsyncOutcome,
    ) -> Result<Transition, EvaluationError> {
        run.modified_on = self.now;
        let rule_set = self.current_rule_set(run)?;
        let late = run
            .pending_async
            .as_ref()
            .is_some_and(|wait| self.now > wait.deadline);
        let outcome = if late { AsyncOutcome::TimedOut } else { outcome };
        run.pending_async = None;

        let mut step = self.take_open_step(run, rule_set);
        let value = match outcome {
            AsyncOutcome::Success(value) => value,
            AsyncOutcome::Failure(reason) => {
                step.error = Some(StepError {
                    kind: StepErrorKind::AsyncFailure,
                    message: reason,
                });
                Value::Missing
            }
            AsyncOutcome::TimedOut => {
                step.error = Some(StepError {
                    kind: StepErrorKind::AsyncTimeout,
                    message: "async result did not arrive before the deadline".to_string(),
                });
                Value::Missing
            }
        };
        self.decide(run, rule_set, step, value)
    }

    /// True when the run waits on an async result whose deadline has passed.
    pub(crate) fn is_overdue(&self, run: &Run) -> bool {
        run.status == RunStatus::WaitingForAsyncResult
            && run
                .pending_async
                .as_ref()
                .is_some_and(|wait| self.now >= wait.deadline)
    }

    /// Moves a run to `Abandoned`, closing the open step or recording a new one.
    pub(crate) fn cancel(&self, run: &mut Run) {
        run.modified_on = self.now;
        let error = StepError {
            kind: StepErrorKind::Cancelled,
            message: "run cancelled".to_string(),
        };
        let now = self.now;
        match run.open_step_mut() {
            Some(step) => {
                step.left_on = Some(now);
                step.error = Some(error);
            }
            None => {
                let node_id = run.current_node_id.clone().unwrap_or_default();
                let mut step = Step::arrive(&node_id, "cancelled", now);
                step.left_on = Some(now);
                step.error = Some(error);
                run.steps.push(step);
            }
        }
        run.pending_async = None;
        run.status = RunStatus::Abandoned;
    }

    /// Records an error raised outside a single node, such as the loop guard.
    pub(crate) fn abandon(&self, run: &mut Run, error: EvaluationError) -> EvaluationError {
        let node_id = run.current_node_id.clone().unwrap_or_default();
        let step = Step::arrive(&node_id, "guard", self.now);
        self.fail(run, step, error)
    }

    fn execute_actions(
        &self,
        run: &mut Run,
        action_set: &ActionSet,
    ) -> Result<Transition, EvaluationError> {
        let mut step = Step::arrive(&action_set.id, "action_set", self.now);
        let mut transition = Transition::default();
        // Field writes land immediately so later actions in the set can read them.
        for action in &action_set.actions {
            if let Err(e) = self.apply_action(run, action, &mut step) {
                return Err(self.fail(run, step, e));
            }
        }

        transition.started_flows = step.started_flows.clone();
        step.left_on = Some(self.now);
        run.steps.push(step);
        self.move_to(run, action_set.destination.clone());
        Ok(transition)
    }

    fn apply_action(
        &self,
        run: &mut Run,
        action: &Action,
        step: &mut Step,
    ) -> Result<(), EvaluationError> {
        match action {
            Action::SendMessage { text } => {
                let template = text.resolve(run.language.as_deref(), self.flow.base_language());
                let input = run.last_response();
                let message = render(template, &self.context(run, &input))?;
                step.messages.push(message);
            }
            Action::SaveToField { field, value } => {
                let input = run.last_response();
                let value = evaluate(value, &self.context(run, &input))?;
                let key = normalize_key(field);
                if value.is_missing() {
                    run.field_values.remove(&key);
                } else {
                    run.field_values.insert(key, value);
                }
            }
            Action::StartOtherFlow { flow_uuid, .. } => {
                step.started_flows.push(flow_uuid.clone());
            }
            Action::SetLanguage { language } => {
                run.language = Some(language.clone());
            }
        }
        Ok(())
    }

    fn enter_rule_set(
        &self,
        run: &mut Run,
        rule_set: &RuleSet,
    ) -> Result<Transition, EvaluationError> {
        let step = Step::arrive(&rule_set.id, rule_set.ruleset_type.name(), self.now);
        match &rule_set.ruleset_type {
            RulesetType::Expression => {
                let value = run.last_response();
                self.decide(run, rule_set, step, value)
            }
            RulesetType::Webhook { url } => {
                run.steps.push(step);
                run.pending_async = Some(AsyncWait {
                    node_id: rule_set.id.clone(),
                    url: url.clone(),
                    requested_on: self.now,
                    deadline: self.now + self.async_timeout,
                });
                run.status = RunStatus::WaitingForAsyncResult;
                Ok(Transition::default())
            }
            _ => {
                run.steps.push(step);
                run.status = RunStatus::WaitingForInput;
                Ok(Transition::default())
            }
        }
    }

    /// Evaluates the operand against `value`, picks a rule and leaves the node.
    ///
    /// The step keeps the operand the rules were tested against, so a later
    /// `step.value` reads the result of an expression ruleset too.
    fn decide(
        &self,
        run: &mut Run,
        rule_set: &RuleSet,
        mut step: Step,
        value: Value,
    ) -> Result<Transition, EvaluationError> {
        let outcome = {
            let context = self.context(run, &value);
            let operand = match &rule_set.operand {
                Some(expr) => evaluate(expr, &context),
                None => Ok(value.clone()),
            };
            operand.and_then(|operand| {
                let language = run.language.as_deref();
                let matcher = RuleMatcher::new(&context, language, self.flow.base_language());
                let found = matcher.find_match(rule_set, &operand)?;
                Ok((found.rule, found.category, operand))
            })
        };

        match outcome {
            Ok((rule, category, operand)) => {
                step.value = Some(operand);
                step.rule_uuid = Some(rule.uuid.clone());
                step.category = Some(category);
                step.left_on = Some(self.now);
                run.steps.push(step);
                self.move_to(run, rule.destination.clone());
                Ok(Transition::default())
            }
            Err(e) => {
                step.value = Some(value);
                Err(self.fail(run, step, e))
            }
        }
    }

    fn current_rule_set(&self, run: &mut Run) -> Result<&'e RuleSet, EvaluationError> {
        let node_id = run.current_node_id.clone().unwrap_or_default();
        match self.flow.node(&node_id) {
            Some(Node::RuleSet(rule_set)) => Ok(rule_set),
            _ => {
                let step = Step::arrive(&node_id, "unknown", self.now);
                Err(self.fail(run, step, EvaluationError::NodeNotFound(node_id.clone())))
            }
        }
    }

    /// Detaches the step opened when the ruleset was entered, or starts a fresh one.
    fn take_open_step(&self, run: &mut Run, rule_set: &RuleSet) -> Step {
        if run.open_step_mut().is_some() {
            if let Some(step) = run.steps.pop() {
                return step;
            }
        }
        Step::arrive(&rule_set.id, rule_set.ruleset_type.name(), self.now)
    }

    fn context<'r>(&'r self, run: &'r Run, input: &'r Value) -> EvaluationContext<'r> {
        EvaluationContext {
            fields: &run.field_values,
            contact: &run.contact,
            org: self.org,
            input,
            today: self.now.date_naive(),
        }
    }

    fn move_to(&self, run: &mut Run, destination: Option<String>) {
        match destination {
            Some(next) => {
                run.current_node_id = Some(next);
                run.status = RunStatus::Active;
            }
            None => self.complete(run),
        }
    }

    fn complete(&self, run: &mut Run) {
        run.current_node_id = None;
        run.status = RunStatus::Completed;
        run.completed_on = Some(self.now);
    }

    fn fail(&self, run: &mut Run, mut step: Step, error: EvaluationError) -> EvaluationError {
        step.left_on = Some(self.now);
        step.error = Some(StepError {
            kind: StepErrorKind::Evaluation,
            message: error.to_string(),
        });
        run.steps.push(step);
        run.pending_async = None;
        run.status = RunStatus::Abandoned;
        error
    }
}

/// Types a raw response the way the waiting ruleset expects it.
///
/// A response that does not parse stays text, so the catch-all still sees it.
fn typed_response(ruleset_type: &RulesetType, raw: &str, locale: &Locale) -> Value {
    if raw.trim().is_empty() {
        return Value::Missing;
    }
    let typed = match ruleset_type {
        RulesetType::WaitForNumber => parse_number(raw, locale).map(Value::Number),
        RulesetType::WaitForDate => parse_date(raw, locale).map(Value::Date),
        _ => None,
    };
    typed.unwrap_or_else(|| Value::Text(raw.to_string()))
}
