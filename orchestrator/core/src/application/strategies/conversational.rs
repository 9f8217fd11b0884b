// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conversational Strategy
//!
//! Drives a multi-turn dialogue with an external agent through a
//! [`ConversationClient`]. The turns live in the branch's
//! [`StrategyContext`], so a retried attempt resumes the dialogue where the
//! failed one stopped instead of replaying it.
//!
//! Client errors map onto failure classes:
//!
//! | Error | Class | Retry-safe |
//! |-------|-------|------------|
//! | `Unavailable` | Transient | yes, nothing was delivered |
//! | `Interrupted` | Transient | no, delivery state unknown |
//! | `Overloaded` | ResourceExhausted | yes |
//! | `Rejected` | Permanent | n/a |

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::domain::strategy::{
    ConversationTurn, FailureClass, ResourceUsage, StrategyContext, StrategyExecutor, StrategyKind,
    StrategyResult, TurnRole,
};
use crate::domain::task::{ExecutionTask, TaskFeatures};

#[derive(Debug, Clone, PartialEq)]
pub enum ConversationReply {
    /// The agent answered and expects another turn.
    Continue(Value),
    /// The agent produced its final answer.
    Final(Value),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    #[error("exchange interrupted: {0}")]
    Interrupted(String),

    #[error("agent overloaded: {0}")]
    Overloaded(String),

    #[error("request rejected: {0}")]
    Rejected(String),
}

impl ClientError {
    fn class(&self) -> FailureClass {
        match self {
            Self::Unavailable(_) | Self::Interrupted(_) => FailureClass::Transient,
            Self::Overloaded(_) => FailureClass::ResourceExhausted,
            Self::Rejected(_) => FailureClass::Permanent,
        }
    }

    fn side_effect_free(&self) -> bool {
        !matches!(self, Self::Interrupted(_))
    }
}

/// Port to an external conversational agent.
#[async_trait]
pub trait ConversationClient: Send + Sync {
    /// Send `message` given the turns so far and return the agent's reply.
    async fn exchange(
        &self,
        task: &ExecutionTask,
        history: &[ConversationTurn],
        message: &Value,
    ) -> Result<ConversationReply, ClientError>;
}

pub struct ConversationalStrategy {
    client: Arc<dyn ConversationClient>,
    max_turns: usize,
}

impl ConversationalStrategy {
    pub const DEFAULT_MAX_TURNS: usize = 8;

    pub fn new(client: Arc<dyn ConversationClient>) -> Self {
        Self {
            client,
            max_turns: Self::DEFAULT_MAX_TURNS,
        }
    }

    pub fn with_max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = max_turns.max(1);
        self
    }

    fn opening_message(task: &ExecutionTask) -> Value {
        task.payload.get("prompt").cloned().unwrap_or_else(|| task.payload.clone())
    }

    fn agent_turns(turns: &[ConversationTurn]) -> usize {
        turns.iter().filter(|t| t.role == TurnRole::Agent).count()
    }
}

#[async_trait]
impl StrategyExecutor for ConversationalStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Conversational
    }

    fn is_idempotent(&self) -> bool {
        false
    }

    fn supports(&self, _features: &TaskFeatures) -> bool {
        true
    }

    async fn execute(&self, task: &ExecutionTask, context: &mut StrategyContext) -> StrategyResult {
        if context.conversation.is_empty() {
            context.conversation.push(ConversationTurn {
                role: TurnRole::Orchestrator,
                content: Self::opening_message(task),
            });
        }

        let mut calls = 0u32;
        loop {
            let answered = Self::agent_turns(&context.conversation);
            if answered >= self.max_turns {
                return StrategyResult::permanent(format!(
                    "conversation did not conclude within {} turns",
                    self.max_turns
                ))
                .with_usage(ResourceUsage {
                    external_calls: calls,
                    units: answered as u64,
                });
            }

            // The dialogue always ends on the orchestrator's pending message.
            let (message, history) = match context.conversation.split_last() {
                Some((last, history)) if last.role == TurnRole::Orchestrator => {
                    (last.content.clone(), history)
                }
                _ => return StrategyResult::permanent("conversation state is corrupt"),
            };

            calls += 1;
            let reply = self.client.exchange(task, history, &message).await;
            let usage = ResourceUsage {
                external_calls: calls,
                units: Self::agent_turns(&context.conversation) as u64,
            };

            match reply {
                Ok(ConversationReply::Final(answer)) => {
                    context.conversation.push(ConversationTurn {
                        role: TurnRole::Agent,
                        content: answer.clone(),
                    });
                    let turns = Self::agent_turns(&context.conversation);
                    return StrategyResult::success(json!({ "answer": answer, "turns": turns }))
                        .with_usage(usage)
                        .with_idempotent(false);
                }
                Ok(ConversationReply::Continue(content)) => {
                    context.conversation.push(ConversationTurn {
                        role: TurnRole::Agent,
                        content,
                    });
                    let turn = Self::agent_turns(&context.conversation);
                    debug!(branch_id = %context.branch_id, turn, "Agent asked for another turn");
                    context.conversation.push(ConversationTurn {
                        role: TurnRole::Orchestrator,
                        content: json!({ "continue": true, "turn": turn }),
                    });
                }
                Err(err) => {
                    return StrategyResult::failure(err.class(), err.to_string())
                        .with_usage(usage)
                        .with_idempotent(err.side_effect_free());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::branch::BranchId;
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use tokio_util::sync::CancellationToken;

    struct ScriptedClient {
        replies: Mutex<VecDeque<Result<ConversationReply, ClientError>>>,
        seen_history: Mutex<Vec<usize>>,
    }

    impl ScriptedClient {
        fn new(replies: Vec<Result<ConversationReply, ClientError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen_history: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ConversationClient for ScriptedClient {
        async fn exchange(
            &self,
            _task: &ExecutionTask,
            history: &[ConversationTurn],
            _message: &Value,
        ) -> Result<ConversationReply, ClientError> {
            self.seen_history.lock().push(history.len());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or(Err(ClientError::Rejected("script exhausted".into())))
        }
    }

    fn context() -> StrategyContext {
        StrategyContext::new(BranchId::new(), CancellationToken::new())
    }

    #[tokio::test]
    async fn multi_turn_dialogue_completes() {
        let client = ScriptedClient::new(vec![
            Ok(ConversationReply::Continue(json!("need more"))),
            Ok(ConversationReply::Final(json!("42"))),
        ]);
        let strategy = ConversationalStrategy::new(client.clone());
        let task = ExecutionTask::new(json!({"prompt": "answer?"}));
        let mut ctx = context();

        let result = strategy.execute(&task, &mut ctx).await;
        assert!(result.is_success());
        assert_eq!(result.output().unwrap()["turns"], json!(2));
        assert_eq!(ctx.conversation.len(), 4);
        assert_eq!(ctx.conversation[0].content, json!("answer?"));
        assert_eq!(*client.seen_history.lock(), vec![0, 2]);
    }

    #[tokio::test]
    async fn conversation_survives_a_retry() {
        let client = ScriptedClient::new(vec![
            Ok(ConversationReply::Continue(json!("step 1"))),
            Err(ClientError::Interrupted("socket reset".into())),
            Ok(ConversationReply::Final(json!("done"))),
        ]);
        let strategy = ConversationalStrategy::new(client.clone());
        let task = ExecutionTask::new(json!("hello"));
        let mut ctx = context();

        let first = strategy.execute(&task, &mut ctx).await;
        assert_eq!(first.failure_class(), Some(FailureClass::Transient));
        assert!(!first.idempotent);

        let second = strategy.execute(&task, &mut ctx).await;
        assert!(second.is_success());
        // The retry resumed after the first agent turn rather than reopening.
        assert_eq!(*client.seen_history.lock(), vec![0, 2, 2]);
        assert_eq!(ctx.conversation.len(), 4);
    }

    #[tokio::test]
    async fn client_errors_classify() {
        for (err, class, safe) in [
            (ClientError::Unavailable("down".into()), FailureClass::Transient, true),
            (ClientError::Overloaded("busy".into()), FailureClass::ResourceExhausted, true),
            (ClientError::Rejected("no".into()), FailureClass::Permanent, true),
        ] {
            let strategy = ConversationalStrategy::new(ScriptedClient::new(vec![Err(err)]));
            let result = strategy.execute(&ExecutionTask::new(json!("x")), &mut context()).await;
            assert_eq!(result.failure_class(), Some(class));
            assert_eq!(result.idempotent, safe);
        }
    }

    #[tokio::test]
    async fn turn_budget_is_enforced() {
        let client = ScriptedClient::new(vec![
            Ok(ConversationReply::Continue(json!(1))),
            Ok(ConversationReply::Continue(json!(2))),
            Ok(ConversationReply::Continue(json!(3))),
        ]);
        let strategy = ConversationalStrategy::new(client).with_max_turns(2);
        let result = strategy.execute(&ExecutionTask::new(json!("x")), &mut context()).await;
        assert_eq!(result.failure_class(), Some(FailureClass::Permanent));
        assert_eq!(result.usage.external_calls, 2);
    }
}
