//! Scope state machine.
//!
//! Every legal lifecycle move of a node is one row of [`TRANSITIONS`]:
//! the operation, the scope it starts from, who may perform it and what it
//! does to the node. Anything not in the table is rejected.

use scriptflow_core::caller::Caller;
use scriptflow_core::error::{Result, ScriptflowError};
use scriptflow_core::types::{Scope, ScriptNode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle operation on an existing node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    Fork,
    Promote,
    Publish,
    Unpublish,
    Edit,
    Delete,
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Fork => "fork",
            Self::Promote => "promote",
            Self::Publish => "publish",
            Self::Unpublish => "unpublish",
            Self::Edit => "edit",
            Self::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Who may perform a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor {
    /// Any caller who can view the node
    Member,
    /// The node's owner
    Owner,
    Administrator,
}

/// What a transition does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// The node moves to another scope, keeping its id
    Move(Scope),
    /// A copy is created in `copy`; the original moves to `original` if set
    Copy { copy: Scope, original: Option<Scope> },
    /// Fields change, scope does not
    Modify,
    Remove,
}

/// One legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rule {
    pub transition: Transition,
    pub from: Scope,
    pub actor: Actor,
    pub effect: Effect,
}

const fn rule(transition: Transition, from: Scope, actor: Actor, effect: Effect) -> Rule {
    Rule {
        transition,
        from,
        actor,
        effect,
    }
}

const FORK: Effect = Effect::Copy {
    copy: Scope::Sandbox,
    original: None,
};

const PROMOTE: Effect = Effect::Copy {
    copy: Scope::Official,
    original: Some(Scope::Sandbox),
};

pub const TRANSITIONS: &[Rule] = &[
    rule(Transition::Fork, Scope::Official, Actor::Member, FORK),
    rule(Transition::Fork, Scope::Community, Actor::Member, FORK),
    rule(Transition::Promote, Scope::Community, Actor::Administrator, PROMOTE),
    rule(Transition::Publish, Scope::Sandbox, Actor::Owner, Effect::Move(Scope::Community)),
    rule(Transition::Unpublish, Scope::Community, Actor::Owner, Effect::Move(Scope::Sandbox)),
    rule(Transition::Edit, Scope::Official, Actor::Administrator, Effect::Modify),
    rule(Transition::Edit, Scope::Community, Actor::Owner, Effect::Modify),
    rule(Transition::Edit, Scope::Sandbox, Actor::Owner, Effect::Modify),
    rule(Transition::Delete, Scope::Official, Actor::Administrator, Effect::Remove),
    rule(Transition::Delete, Scope::Community, Actor::Owner, Effect::Remove),
    rule(Transition::Delete, Scope::Sandbox, Actor::Owner, Effect::Remove),
];

/// Look up the rule for `transition` out of `from`
pub fn lookup(transition: Transition, from: Scope) -> Option<&'static Rule> {
    TRANSITIONS
        .iter()
        .find(|r| r.transition == transition && r.from == from)
}

/// Whether `caller` may see `node`: sandbox nodes are private to their owner
pub fn can_view(node: &ScriptNode, caller: &Caller) -> bool {
    match node.scope {
        Scope::Official | Scope::Community => true,
        Scope::Sandbox => node.is_owned_by(&caller.user_id),
    }
}

/// Check that `caller` may apply `transition` to `node`.
///
/// A transition that does not start from the node's scope is a validation
/// error; a caller without the required capability is unauthorized.
pub fn authorize(transition: Transition, node: &ScriptNode, caller: &Caller) -> Result<&'static Rule> {
    let rule = lookup(transition, node.scope).ok_or_else(|| {
        ScriptflowError::validation(format!(
            "Cannot {} node {}: it is in {} scope",
            transition, node.id, node.scope
        ))
    })?;

    let allowed = match rule.actor {
        Actor::Member => can_view(node, caller),
        Actor::Owner => node.is_owned_by(&caller.user_id),
        Actor::Administrator => caller.is_admin(),
    };

    if !allowed {
        let required = match rule.actor {
            Actor::Member => "read access",
            Actor::Owner => "ownership",
            Actor::Administrator => "administrator role",
        };
        return Err(ScriptflowError::unauthorized(format!(
            "{} requires {} on node {}",
            transition, required, node.id
        )));
    }

    Ok(rule)
}

/// Check that `caller` may create a node directly in `scope`.
///
/// Members create in their sandbox, administrators may also create official
/// nodes. Community nodes only arise from publishing.
pub fn authorize_create(scope: Scope, caller: &Caller) -> Result<()> {
    match scope {
        Scope::Sandbox => Ok(()),
        Scope::Official if caller.is_admin() => Ok(()),
        Scope::Official => Err(ScriptflowError::unauthorized(
            "Creating official nodes requires administrator role",
        )),
        Scope::Community => Err(ScriptflowError::validation(
            "Nodes cannot be created in community scope; publish a sandbox node instead",
        )),
    }
}
