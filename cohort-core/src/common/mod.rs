use rand::{distributions::Alphanumeric, Rng};

/// A short random suffix for names that must not collide across coordinators,
/// such as reply queues.
pub fn get_random_routing_key() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(8)
        .map(char::from)
        .collect()
}

/// The name of the command queue consumed by `worker`.
pub fn worker_queue_name(prefix: &str, worker: crate::WorkerId) -> String {
    format!("{prefix}.{worker}")
}
