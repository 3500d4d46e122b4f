use async_trait::async_trait;
use std::collections::HashMap;

/// Name of the colleague analysis prompt.
pub const COLLEAGUES_PROMPT: &str = "colleagues";
/// Name of the judge prompt.
pub const COLLEAGUES_JUDGE_PROMPT: &str = "colleagues_judge";

const DEFAULT_ANALYSIS_PROMPT: &str = "\
As an experienced colleague with a deep understanding of best practices, \
analyze how well the most recent step of this task was carried out. Assess \
task understanding, execution, resource usage and alignment with the \
objective. Assign a score out of 10, where 10 means the step was done in \
the best possible way and 1 means it failed outright. If the same step has \
already been attempted unsuccessfully, do not recommend repeating it.";

const DEFAULT_JUDGE_PROMPT: &str = "\
You are the judge reviewing your colleagues' analyses of the most recent \
step. Weigh their assessments of task understanding, execution quality, \
resource efficiency and outcome, then produce a single final score from 1 \
to 10 and concrete recommendations for what to do next. If the analyses \
show the same step repeated without success, assume it cannot be completed \
as attempted. If the step already accomplished the task, say that no \
further action is needed.";

/// Fetch-by-name prompt service.
#[async_trait]
pub trait PromptStore: Send + Sync {
    /// Returns the prompt text, or None when no prompt has that name.
    async fn get_prompt(&self, name: &str) -> Option<String>;
}

/// In-memory prompt store, pre-seeded with the reviewer prompts. Extra
/// prompts can be registered or defaults overridden by name.
pub struct PromptWarehouse {
    prompts: HashMap<String, String>,
}

impl Default for PromptWarehouse {
    fn default() -> Self {
        let mut prompts = HashMap::new();
        prompts.insert(COLLEAGUES_PROMPT.to_string(), DEFAULT_ANALYSIS_PROMPT.to_string());
        prompts.insert(COLLEAGUES_JUDGE_PROMPT.to_string(), DEFAULT_JUDGE_PROMPT.to_string());
        Self { prompts }
    }
}

impl PromptWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: impl Into<String>, prompt: impl Into<String>) {
        self.prompts.insert(name.into(), prompt.into());
    }
}

#[async_trait]
impl PromptStore for PromptWarehouse {
    async fn get_prompt(&self, name: &str) -> Option<String> {
        self.prompts.get(name).cloned()
    }
}
