/// Sizing for memory stacks.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct StackConfig {
    /// Capacity of each memory stack in bytes.
    pub capacity: usize,
    /// Maximum number of thread slots in a [`crate::PerThreadStacks`] registry.
    pub max_threads: usize,
}

impl StackConfig {
    pub const DEFAULT_CAPACITY: usize = 64 * 1024;
    pub const DEFAULT_MAX_THREADS: usize = 64;

    pub const STACK_SIZE_VAR: &'static str = "LATTICE_STACK_SIZE";
    pub const MAX_THREADS_VAR: &'static str = "LATTICE_MAX_THREADS";

    /// Reads overrides from the environment.
    ///
    /// `LATTICE_STACK_SIZE` is the stack capacity in KiB, `LATTICE_MAX_THREADS`
    /// the number of thread slots. Missing or unusable values fall back to the
    /// defaults.
    pub fn from_env() -> StackConfig {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> StackConfig
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = StackConfig::default();

        if let Some(kib) = parse_nonzero(&lookup, Self::STACK_SIZE_VAR) {
            match kib.checked_mul(1024) {
                Some(capacity) if capacity <= isize::MAX as usize => config.capacity = capacity,
                _ => log::warn!("ignoring {}: {kib} KiB is too large", Self::STACK_SIZE_VAR),
            }
        }

        if let Some(max_threads) = parse_nonzero(&lookup, Self::MAX_THREADS_VAR) {
            config.max_threads = max_threads;
        }

        config
    }
}

fn parse_nonzero<F>(lookup: &F, key: &str) -> Option<usize>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key)?;
    match value.trim().parse::<usize>() {
        Ok(0) => {
            log::warn!("ignoring {key}: value must be nonzero");
            None
        }
        Ok(parsed) => Some(parsed),
        Err(err) => {
            log::warn!("ignoring {key}={value:?}: {err}");
            None
        }
    }
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            max_threads: Self::DEFAULT_MAX_THREADS,
        }
    }
}
