//! Task lifecycle management.

mod coordinator;

pub use coordinator::{
    CREATED_BY_KEY, NewTask, PermissivePolicy, TaskCoordinator, TransitionPolicy,
};
