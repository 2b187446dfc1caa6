use std::sync::OnceLock;

/// Thread budgets for the rayon pool and the directory walker.
pub struct ThreadConfig {
    pub rayon_threads: usize,
    pub walker_threads: usize,
}

static CONFIG: OnceLock<ThreadConfig> = OnceLock::new();

impl Default for ThreadConfig {
    fn default() -> Self {
        Self::compute(None)
    }
}

impl ThreadConfig {
    pub fn get() -> &'static ThreadConfig {
        CONFIG.get_or_init(Self::default)
    }

    pub fn init(max_threads: Option<usize>) {
        let _ = CONFIG.set(Self::compute(max_threads));
    }

    fn compute(max_threads: Option<usize>) -> Self {
        let total_cores = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        let budget = max_threads
            .filter(|&t| t > 0)
            .unwrap_or((total_cores * 3) / 4)
            .max(2);

        Self {
            rayon_threads: budget,
            walker_threads: budget.min(8),
        }
    }

    pub fn apply(&self) {
        use std::env;

        if env::var_os("RAYON_NUM_THREADS").is_none() {
            env::set_var("RAYON_NUM_THREADS", self.rayon_threads.to_string());
        }
    }
}
