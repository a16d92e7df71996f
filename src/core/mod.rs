// Core abstractions - capability traits, evaluation context and variables

pub mod context;
pub mod trait_def;
pub mod variables;

pub use context::{Condition, Context};
pub use trait_def::{
    AudioDevice, EvalError, Evaluatable, LoopController, NoteListener, SettingHandler,
};
pub use variables::{Value, VariableRef, VariableStore};
