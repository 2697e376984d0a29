// Copyright (c) 2025 - Cowboy AI, Inc.
//! Commission Resolution State Machine
//!
//! # States
//!
//! - Pending: issued, capacity reserved
//! - Accepted: provisions finalized (terminal)
//! - Rejected: provisions undone (terminal)
//!
//! # Inputs
//!
//! - Accept: Pending → Accepted, output `Finalize`
//! - Reject: Pending → Rejected, output `Undo`
//!
//! Terminal states reject every input; the ledger turns that into an
//! idempotent no-op.

use super::{StateMachine, TransitionError, TransitionResult};
use crate::domain::Resolution;

/// Resolution command (FSM input)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveCommand {
    Accept,
    Reject,
}

impl ResolveCommand {
    pub fn from_accept(accept: bool) -> Self {
        if accept {
            ResolveCommand::Accept
        } else {
            ResolveCommand::Reject
        }
    }

    /// Terminal state this command leads to
    pub fn target(self) -> Resolution {
        match self {
            ResolveCommand::Accept => Resolution::Accepted,
            ResolveCommand::Reject => Resolution::Rejected,
        }
    }
}

/// Phase to run on every provision of the commission (FSM output)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionEffect {
    Finalize,
    Undo,
}

impl StateMachine for Resolution {
    type Input = ResolveCommand;
    type Output = ResolutionEffect;

    fn transition(&self, input: &Self::Input) -> TransitionResult<(Self, Self::Output)> {
        match (self, input) {
            (Resolution::Pending, ResolveCommand::Accept) => {
                Ok((Resolution::Accepted, ResolutionEffect::Finalize))
            }
            (Resolution::Pending, ResolveCommand::Reject) => {
                Ok((Resolution::Rejected, ResolutionEffect::Undo))
            }
            (terminal, command) => Err(TransitionError::Terminal {
                from: terminal.to_string(),
                input: format!("{:?}", command),
            }),
        }
    }

    fn valid_inputs(&self) -> Vec<Self::Input> {
        match self {
            Resolution::Pending => vec![ResolveCommand::Accept, ResolveCommand::Reject],
            Resolution::Accepted | Resolution::Rejected => Vec::new(),
        }
    }
}
