use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use serde_json::{json, Value};

use crate::completer::{
    complete_with_timeout, Completer, CompletionRequest, OutputSchema,
};
use crate::prompts::{PromptStore, COLLEAGUES_JUDGE_PROMPT, COLLEAGUES_PROMPT};
use crate::state::RunState;

/// Outcome of one review: the judge's score and its recommendations.
#[derive(Debug, Clone, PartialEq)]
pub struct Review {
    pub score:           f64,
    pub recommendations: String,
}

impl Review {
    fn failed(reason: &str) -> Self {
        Self { score: 0.0, recommendations: reason.to_string() }
    }
}

/// The multi-reviewer quality gate.
///
/// Each evaluation runs `k` independent colleague analyses in parallel,
/// then a judge that scores the step. If the mean of all judge scores so
/// far misses the threshold, the pool doubles and analysis temperature
/// rises with the level, up to `max_depth` rounds.
pub struct Colleagues {
    completer:         Arc<dyn Completer>,
    prompts:           Arc<dyn PromptStore>,
    threshold:         f64,
    max_depth:         u32,
    completer_timeout: Duration,
    evaluate_timeout:  Duration,
}

impl Colleagues {
    pub fn new(
        completer: Arc<dyn Completer>,
        prompts: Arc<dyn PromptStore>,
        threshold: f64,
        max_depth: u32,
        completer_timeout: Duration,
        evaluate_timeout: Duration,
    ) -> Self {
        Self {
            completer,
            prompts,
            threshold,
            max_depth: max_depth.max(1),
            completer_timeout,
            evaluate_timeout,
        }
    }

    /// Scores the most recent tool result. Serial per state; only the
    /// analyses inside one call fan out.
    pub async fn evaluate(&self, state: &RunState) -> Review {
        let Some(record) = state.last_execution() else {
            return Review { score: 0.0, recommendations: "no tool results".to_string() };
        };

        let args_text = serde_json::to_string(&record.args).unwrap_or_default();
        let subject = format!(
            "Tool: {}\nArgs: {}\nResult: {}",
            record.tool, args_text, record.result
        );

        let analysis_prompt = self
            .prompts
            .get_prompt(COLLEAGUES_PROMPT)
            .await
            .unwrap_or_else(|| "Analyze how well this step was carried out.".to_string());
        let judge_prompt = self
            .prompts
            .get_prompt(COLLEAGUES_JUDGE_PROMPT)
            .await
            .unwrap_or_else(|| "Score the analyses from 1 to 10 and recommend next steps.".to_string());

        let started = Instant::now();
        let mut reviews: Vec<Review> = Vec::new();
        let mut level: u32 = 1;

        loop {
            if level > self.max_depth || started.elapsed() >= self.evaluate_timeout {
                tracing::debug!(level, reviews = reviews.len(), "review budget exhausted");
                return reviews
                    .last()
                    .cloned()
                    .unwrap_or_else(|| Review::failed("no analysis completed"));
            }

            let num_colleagues = 2usize << (level - 1) as usize;
            tracing::info!(level, num_colleagues, "running colleague analyses");

            let mut message = subject.clone();
            if !reviews.is_empty() {
                let previous = reviews
                    .iter()
                    .map(|r| r.recommendations.as_str())
                    .collect::<Vec<_>>()
                    .join(" ");
                message = format!("Previous feedback: {previous}\nTask: {message}");
            }

            let analysis_temperature = level as f32 / self.max_depth as f32;
            let analyses = self
                .run_analyses(&analysis_prompt, &message, num_colleagues, analysis_temperature)
                .await;
            if analyses.is_empty() {
                return Review::failed("analysis failed");
            }

            let judge_temperature = 0.1 * level as f32 / self.max_depth as f32;
            let Some(judgment) = self
                .run_judge(&judge_prompt, &analyses, judge_temperature)
                .await
            else {
                return Review::failed("analysis failed");
            };

            tracing::info!(score = judgment.score, "judge verdict");
            reviews.push(judgment);

            let mean = reviews.iter().map(|r| r.score).sum::<f64>() / reviews.len() as f64;
            if mean >= self.threshold {
                return reviews.last().cloned().unwrap_or_else(|| Review::failed("no analysis completed"));
            }

            level += 1;
        }
    }

    /// Runs `count` analyses in parallel. There is no shared mutable
    /// state between them and their order is irrelevant; failed calls are
    /// dropped.
    async fn run_analyses(
        &self,
        analysis_prompt: &str,
        message: &str,
        count: usize,
        temperature: f32,
    ) -> Vec<String> {
        let schema = json!({
            "type": "object",
            "properties": { "analysis": { "type": "string" } },
            "required": ["analysis"]
        });

        let calls = (0..count).map(|_| {
            let request = CompletionRequest::structured(
                format!("{analysis_prompt}\n\nTask to analyze: {message}"),
                OutputSchema::new("record_analysis", "Record the colleague's analysis", schema.clone()),
            )
            .with_temperature(temperature);
            complete_with_timeout(self.completer.as_ref(), request, self.completer_timeout)
        });

        join_all(calls)
            .await
            .into_iter()
            .filter_map(|outcome| match outcome {
                Ok(completion) => extract_string(&completion.structured, "analysis")
                    .or_else(|| (!completion.content.is_empty()).then(|| completion.content)),
                Err(e) => {
                    tracing::warn!(error = %e, "colleague analysis failed");
                    None
                }
            })
            .collect()
    }

    async fn run_judge(
        &self,
        judge_prompt: &str,
        analyses: &[String],
        temperature: f32,
    ) -> Option<Review> {
        let combined = analyses
            .iter()
            .enumerate()
            .map(|(i, analysis)| format!("Colleague {}: {analysis}", i + 1))
            .collect::<Vec<_>>()
            .join("\n\n");

        let schema = json!({
            "type": "object",
            "properties": {
                "final_score":     { "type": "number" },
                "recommendations": { "type": "string" }
            },
            "required": ["final_score", "recommendations"]
        });

        let request = CompletionRequest::structured(
            format!("{judge_prompt}\n\nColleague analyses to evaluate:\n{combined}"),
            OutputSchema::new("record_judgment", "Record the final score and recommendations", schema),
        )
        .with_temperature(temperature);

        let completion =
            match complete_with_timeout(self.completer.as_ref(), request, self.completer_timeout).await {
                Ok(completion) => completion,
                Err(e) => {
                    tracing::warn!(error = %e, "judge call failed");
                    return None;
                }
            };

        let structured = completion.structured?;
        let score = structured.get("final_score")?.as_f64()?.clamp(0.0, 10.0);
        let recommendations = structured
            .get("recommendations")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Some(Review { score, recommendations })
    }
}

fn extract_string(structured: &Option<Value>, field: &str) -> Option<String> {
    structured
        .as_ref()?
        .get(field)?
        .as_str()
        .map(str::to_string)
}
