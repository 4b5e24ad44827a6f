//! Index-addressed handler tables, one per task kind.

use std::fmt;
use std::sync::Arc;

use crate::error::CommandError;

use super::protocol::TaskKind;

pub type Action = Arc<dyn Fn() + Send + Sync>;
pub type InputAction = Arc<dyn Fn(&str) + Send + Sync>;
pub type Function = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// A resolved handler, borrowed from the registry.
pub enum Handler<'a> {
    Action(&'a Action),
    InputAction(&'a InputAction),
    Function(&'a Function),
}

/// The three handler tables the dispatcher invokes against.
///
/// Populated by the owning application before the server starts. The server
/// takes the registry by value, so it cannot change while commands run.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    actions: Vec<Option<Action>>,
    input_actions: Vec<Option<InputAction>>,
    functions: Vec<Option<Function>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fire-and-forget action at `index`, returning whatever was there.
    pub fn register_action<F>(&mut self, index: usize, action: F) -> Option<Action>
    where
        F: Fn() + Send + Sync + 'static,
    {
        place(&mut self.actions, index, Arc::new(action))
    }

    /// Register an input-only action at `index`, returning whatever was there.
    pub fn register_input_action<F>(&mut self, index: usize, action: F) -> Option<InputAction>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        place(&mut self.input_actions, index, Arc::new(action))
    }

    /// Register a request-reply function at `index`, returning whatever was there.
    pub fn register_function<F>(&mut self, index: usize, function: F) -> Option<Function>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        place(&mut self.functions, index, Arc::new(function))
    }

    pub fn push_action<F>(&mut self, action: F) -> usize
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.actions.push(Some(Arc::new(action)));
        self.actions.len() - 1
    }

    pub fn push_input_action<F>(&mut self, action: F) -> usize
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.input_actions.push(Some(Arc::new(action)));
        self.input_actions.len() - 1
    }

    pub fn push_function<F>(&mut self, function: F) -> usize
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        self.functions.push(Some(Arc::new(function)));
        self.functions.len() - 1
    }

    /// Number of slots (assigned or not) in the table for `kind`.
    pub fn len(&self, kind: TaskKind) -> usize {
        match kind {
            TaskKind::FireAndForget => self.actions.len(),
            TaskKind::InputOnly => self.input_actions.len(),
            TaskKind::RequestReply => self.functions.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.input_actions.is_empty() && self.functions.is_empty()
    }

    /// Look up the handler for `task` in the table for `kind`.
    pub fn get(&self, kind: TaskKind, task: usize) -> Result<Handler<'_>, CommandError> {
        match kind {
            TaskKind::FireAndForget => slot(&self.actions, kind, task).map(Handler::Action),
            TaskKind::InputOnly => slot(&self.input_actions, kind, task).map(Handler::InputAction),
            TaskKind::RequestReply => slot(&self.functions, kind, task).map(Handler::Function),
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("actions", &self.actions.len())
            .field("input_actions", &self.input_actions.len())
            .field("functions", &self.functions.len())
            .finish()
    }
}

fn place<T>(table: &mut Vec<Option<T>>, index: usize, handler: T) -> Option<T> {
    if index >= table.len() {
        table.resize_with(index + 1, || None);
    }
    table[index].replace(handler)
}

fn slot<T>(table: &[Option<T>], kind: TaskKind, task: usize) -> Result<&T, CommandError> {
    match table.get(task) {
        Some(Some(handler)) => Ok(handler),
        Some(None) => Err(CommandError::UnassignedTask { kind, task }),
        None => Err(CommandError::TaskIndexOutOfRange {
            kind,
            task,
            len: table.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_returns_sequential_indices() {
        let mut registry = HandlerRegistry::new();
        assert!(registry.is_empty());

        assert_eq!(registry.push_action(|| {}), 0);
        assert_eq!(registry.push_action(|| {}), 1);
        assert_eq!(registry.push_function(|s| s.to_string()), 0);

        assert_eq!(registry.len(TaskKind::FireAndForget), 2);
        assert_eq!(registry.len(TaskKind::InputOnly), 0);
        assert_eq!(registry.len(TaskKind::RequestReply), 1);
    }

    #[test]
    fn register_reports_overwrite() {
        let mut registry = HandlerRegistry::new();

        assert!(registry.register_function(0, |_| "first".into()).is_none());
        let previous = registry.register_function(0, |_| "second".into());

        assert_eq!(previous.map(|f| f("")), Some("first".to_string()));
        match registry.get(TaskKind::RequestReply, 0) {
            Ok(Handler::Function(f)) => assert_eq!(f(""), "second"),
            _ => panic!("expected function handler"),
        }
    }

    #[test]
    fn gaps_are_unassigned_not_out_of_range() {
        let mut registry = HandlerRegistry::new();
        registry.register_input_action(2, |_| {});

        assert_eq!(registry.len(TaskKind::InputOnly), 3);
        assert!(matches!(
            registry.get(TaskKind::InputOnly, 1),
            Err(CommandError::UnassignedTask { task: 1, .. })
        ));
        assert!(matches!(
            registry.get(TaskKind::InputOnly, 3),
            Err(CommandError::TaskIndexOutOfRange { task: 3, len: 3, .. })
        ));
    }

    #[test]
    fn tables_are_independent_per_kind() {
        let mut registry = HandlerRegistry::new();
        registry.push_action(|| {});

        assert!(registry.get(TaskKind::FireAndForget, 0).is_ok());
        assert!(matches!(
            registry.get(TaskKind::RequestReply, 0),
            Err(CommandError::TaskIndexOutOfRange { len: 0, .. })
        ));
    }
}
