use crate::types::Route;

/// Maps a review outcome to the next transition out of the review node.
///
/// Pure and deterministic. Rules are evaluated top to bottom, first match
/// wins:
///
/// 1. loop guard: the tool just executed has run 3+ times, so advance
///    past it no matter what the reviewer thinks;
/// 2. `tool_index` out of range: nothing left to select in this node;
/// 3. the next tool already ran: skip out rather than re-execute it when
///    the review oscillates;
/// 4. score at or above threshold: advance;
/// 5. otherwise retry the same tool.
///
/// The loop guard is an authority independent of the reviewer: the
/// reviewer may oscillate, the engine must not.
pub fn route(
    score: f64,
    threshold: f64,
    executed_tools: &[String],
    tool_index: usize,
    node_tools: &[String],
) -> Route {
    let has_next = tool_index + 1 < node_tools.len();

    if let Some(last) = executed_tools.last() {
        let repeats = executed_tools.iter().filter(|t| *t == last).count();
        if repeats >= 3 {
            return if has_next { Route::NextTool } else { Route::NextStep };
        }
    }

    if tool_index >= node_tools.len() {
        return Route::NextStep;
    }

    if has_next && executed_tools.contains(&node_tools[tool_index + 1]) {
        return Route::NextStep;
    }

    if score >= threshold {
        return if has_next { Route::NextTool } else { Route::NextStep };
    }

    Route::RetrySame
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: f64 = 7.0;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn low_score_retries_same_tool() {
        let executed = names(&["t1"]);
        let tools = names(&["t1", "t2"]);
        assert_eq!(route(4.0, THRESHOLD, &executed, 0, &tools), Route::RetrySame);
    }

    #[test]
    fn low_score_on_single_tool_node_still_retries() {
        let executed = names(&["chart_bar"]);
        let tools = names(&["chart_bar"]);
        assert_eq!(route(4.0, THRESHOLD, &executed, 0, &tools), Route::RetrySame);
    }

    #[test]
    fn good_score_advances_to_next_tool() {
        let executed = names(&["t1"]);
        let tools = names(&["t1", "t2"]);
        assert_eq!(route(8.0, THRESHOLD, &executed, 0, &tools), Route::NextTool);
    }

    #[test]
    fn good_score_on_last_tool_leaves_the_node() {
        let executed = names(&["t1", "t2"]);
        let tools = names(&["t1", "t2"]);
        assert_eq!(route(9.0, THRESHOLD, &executed, 1, &tools), Route::NextStep);
    }

    #[test]
    fn loop_guard_fires_after_three_repeats() {
        let executed = names(&["t1", "t1", "t1"]);
        let tools = names(&["t1", "t2"]);
        // Reviewer still says retry; the guard overrules it.
        assert_eq!(route(1.0, THRESHOLD, &executed, 0, &tools), Route::NextTool);
    }

    #[test]
    fn loop_guard_on_last_tool_leaves_the_node() {
        let executed = names(&["t1", "t2", "t2", "t2"]);
        let tools = names(&["t1", "t2"]);
        assert_eq!(route(1.0, THRESHOLD, &executed, 1, &tools), Route::NextStep);
    }

    #[test]
    fn two_repeats_do_not_trigger_the_guard() {
        let executed = names(&["t1", "t1"]);
        let tools = names(&["t1"]);
        assert_eq!(route(1.0, THRESHOLD, &executed, 0, &tools), Route::RetrySame);
    }

    #[test]
    fn already_executed_next_tool_is_skipped() {
        // t2 ran in an earlier pass; an oscillating review must not
        // re-execute it via next_tool.
        let executed = names(&["t2", "t1"]);
        let tools = names(&["t1", "t2"]);
        assert_eq!(route(9.0, THRESHOLD, &executed, 0, &tools), Route::NextStep);
        assert_eq!(route(2.0, THRESHOLD, &executed, 0, &tools), Route::NextStep);
    }

    #[test]
    fn out_of_range_index_leaves_the_node() {
        let executed = names(&["t1"]);
        let tools = names(&["t1"]);
        assert_eq!(route(2.0, THRESHOLD, &executed, 1, &tools), Route::NextStep);
    }

    #[test]
    fn boundary_score_counts_as_pass() {
        let executed = names(&["t1"]);
        let tools = names(&["t1"]);
        assert_eq!(route(7.0, THRESHOLD, &executed, 0, &tools), Route::NextStep);
    }
}
