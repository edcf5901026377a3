//! Process role detection.
//!
//! Coordinator and worker run the same kind of executable. The supervisor
//! marks the children it starts through the environment, and `main` decides
//! once, up front, which side it plays.

use std::env;

/// Set to [`WORKER_ROLE`] in the environment of spawned workers.
pub const ROLE_ENV: &str = "RUNWORKER_ROLE";

/// Value of [`ROLE_ENV`] for worker processes.
pub const WORKER_ROLE: &str = "worker";

/// Module path for eager loading. Absent in deferred load mode.
pub const MODULE_ENV: &str = "RUNWORKER_MODULE";

/// Which side of the protocol this process is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Coordinator,
    Worker,
}

/// Role of the current process.
pub fn role() -> Role {
    role_from(env::var(ROLE_ENV).ok().as_deref())
}

/// Shortcut for `role() == Role::Worker`.
pub fn is_worker() -> bool {
    role() == Role::Worker
}

fn role_from(value: Option<&str>) -> Role {
    match value {
        Some(WORKER_ROLE) => Role::Worker,
        _ => Role::Coordinator,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_from_env_value() {
        assert_eq!(role_from(Some("worker")), Role::Worker);
        assert_eq!(role_from(Some("coordinator")), Role::Coordinator);
        assert_eq!(role_from(Some("")), Role::Coordinator);
        assert_eq!(role_from(None), Role::Coordinator);
    }
}
