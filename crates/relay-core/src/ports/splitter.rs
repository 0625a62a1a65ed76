//! TaskSplitter port - description を独立したサブタスクに分割

/// Partitions a description into independently dispatchable parts.
///
/// Returning fewer than two parts means "cannot split"; the dispatcher then
/// escalates instead.
pub trait TaskSplitter: Send + Sync {
    fn split(&self, description: &str) -> Vec<String>;
}

impl<F> TaskSplitter for F
where
    F: Fn(&str) -> Vec<String> + Send + Sync,
{
    fn split(&self, description: &str) -> Vec<String> {
        self(description)
    }
}
