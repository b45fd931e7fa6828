//! Mock execution for environments without a container runtime.
//!
//! Output is fabricated from simple heuristics on the source text after a
//! short random delay. Nothing is written to disk and no process is spawned.

use rand::Rng;
use std::time::Duration;

use crate::sandbox::ProcessOutput;

#[derive(Debug, Clone)]
pub struct MockExecutor {
    min_delay: Duration,
    max_delay: Duration,
}

impl MockExecutor {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        let (min_delay, max_delay) = if min_delay <= max_delay {
            (min_delay, max_delay)
        } else {
            (max_delay, min_delay)
        };
        Self {
            min_delay,
            max_delay,
        }
    }

    pub async fn run(&self, code: &str, language: &str) -> ProcessOutput {
        log::info!("Executing code in mock mode for language: {}", language);
        tokio::time::sleep(self.pick_delay()).await;
        ProcessOutput {
            stdout: mock_output(code, language),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    fn pick_delay(&self) -> Duration {
        if self.min_delay == self.max_delay {
            return self.min_delay;
        }
        let min = self.min_delay.as_millis() as u64;
        let max = self.max_delay.as_millis() as u64;
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_millis(1500))
    }
}

/// Fabricated stdout for `code`. Unrecognised languages are echoed back in
/// the caller's own spelling.
pub fn mock_output(code: &str, requested: &str) -> String {
    if code.to_lowercase().contains("hello") {
        return "Hello, World!".to_string();
    }

    let language = requested.trim().to_lowercase();
    let recognised = match language.as_str() {
        "python" => code.contains("print").then_some("Mock Python output: Code executed successfully!"),
        "java" => code
            .contains("System.out.println")
            .then_some("Mock Java output: Code compiled and executed!"),
        "cpp" | "c" => (code.contains("cout") || code.contains("printf"))
            .then_some("Mock C/C++ output: Code compiled and executed!"),
        "javascript" => code
            .contains("console.log")
            .then_some("Mock JavaScript output: Code executed successfully!"),
        _ => return format!("Mock {} output: Code executed successfully!", requested.trim()),
    };

    recognised
        .unwrap_or("Mock execution completed. Docker mode disabled for development.")
        .to_string()
}
