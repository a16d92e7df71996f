// Named variable slots shared between the input path and playing loops

use crate::sequencer::loops::Loop;
use crate::sequencer::note::{Note, Sequence, Sequenceable};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

/// Value held by a variable
#[derive(Clone)]
pub enum Value {
    Note(Note),
    Sequence(Arc<dyn Sequenceable>),
    Loop(Arc<Loop>),
}

impl Value {
    /// Render the current content; loops resolve to their target
    pub fn to_sequence(&self) -> Sequence {
        match self {
            Value::Note(note) => note.to_sequence(),
            Value::Sequence(seq) => seq.to_sequence(),
            Value::Loop(l) => l.to_sequence(),
        }
    }

    pub fn as_loop(&self) -> Option<Arc<Loop>> {
        match self {
            Value::Loop(l) => Some(Arc::clone(l)),
            _ => None,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Note(note) => write!(f, "Note({})", note),
            Value::Sequence(seq) => write!(f, "Sequence({})", seq.to_sequence()),
            Value::Loop(l) => write!(f, "Loop({})", l.id()),
        }
    }
}

#[derive(Default)]
pub struct VariableStore {
    values: RwLock<HashMap<String, Value>>,
}

impl VariableStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn get(&self, name: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn put(&self, name: impl Into<String>, value: Value) {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.into(), value);
    }

    pub fn delete(&self, name: &str) -> Option<Value> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name)
    }

    /// Sorted variable names
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    /// Handle that resolves `name` every time it is played
    pub fn reference(self: &Arc<Self>, name: impl Into<String>) -> Arc<VariableRef> {
        Arc::new(VariableRef {
            name: name.into(),
            store: Arc::clone(self),
        })
    }
}

/// A sequenceable bound to a variable name rather than to a value.
/// Reassigning the variable changes what the reference plays next.
pub struct VariableRef {
    name: String,
    store: Arc<VariableStore>,
}

impl VariableRef {
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Sequenceable for VariableRef {
    fn to_sequence(&self) -> Sequence {
        self.store
            .get(&self.name)
            .map(|v| v.to_sequence())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_put_get_delete() {
        let store = VariableStore::new();
        store.put("n", Value::Note(Note::new(60, 0.25)));
        assert!(matches!(store.get("n"), Some(Value::Note(_))));
        assert_eq!(store.names(), vec!["n".to_string()]);
        assert!(store.delete("n").is_some());
        assert!(store.get("n").is_none());
    }

    #[test]
    fn test_reference_follows_reassignment() {
        let store = VariableStore::new();
        let r = store.reference("melody");
        assert!(r.to_sequence().is_empty());

        store.put("melody", Value::Note(Note::new(60, 0.25)));
        assert_eq!(r.to_sequence().to_string(), "C4");

        store.put(
            "melody",
            Value::Sequence(Arc::new(Sequence::serial([
                Note::new(62, 0.25),
                Note::new(64, 0.25),
            ]))),
        );
        assert_eq!(r.to_sequence().to_string(), "D4 E4");
    }
}
