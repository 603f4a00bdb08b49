//! Instruction templates rendered for one run

use sdk::context::FrozenContext;

use super::taxonomy::Taxonomy;
use crate::config::PromptsConfig;

/// Prompts with run-wide placeholders already substituted
///
/// The judge system prompt keeps its taxonomy placeholders until
/// [`PromptSet::judge_system`] is given the taxonomy being judged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptSet {
    intro: String,
    fused: String,
    plan: String,
    response: String,
    judge_system: String,
    judge_user: String,
}

impl PromptSet {
    /// Substitute `{language}` and `{strategy_ids}`
    pub fn new(config: &PromptsConfig, taxonomy: &Taxonomy, language: &str) -> Self {
        let ids = taxonomy.ids().collect::<Vec<_>>().join(", ");
        let render = |template: &str| {
            template
                .replace("{language}", language)
                .replace("{strategy_ids}", &ids)
        };

        Self {
            intro: config.intro.clone(),
            fused: render(&config.fused),
            plan: render(&config.plan),
            response: render(&config.response),
            judge_system: config.judge_system.replace("{language}", language),
            judge_user: config.judge_user.clone(),
        }
    }

    pub fn fused(&self) -> &str {
        &self.fused
    }

    pub fn plan(&self) -> &str {
        &self.plan
    }

    /// Judge instructions with `{strategy_ids}` and `{taxonomy_block}` taken
    /// from `taxonomy`
    pub fn judge_system(&self, taxonomy: &Taxonomy) -> String {
        let ids = taxonomy.ids().collect::<Vec<_>>().join(", ");
        self.judge_system
            .replace("{strategy_ids}", &ids)
            .replace("{taxonomy_block}", &taxonomy.definitions_block())
    }

    /// User-side prompt shared by every call of a run
    pub fn render_context(&self, context: &FrozenContext) -> String {
        let mut rendered = String::from("Conversation history:\n");
        rendered.push_str("AI: ");
        rendered.push_str(self.intro.trim());
        if !context.is_empty() {
            rendered.push('\n');
            rendered.push_str(&context.transcript());
        }
        rendered
    }

    /// Response instruction conditioned on a declared plan
    pub fn response_with_plan(&self, plan: &str) -> String {
        if self.response.contains("{plan}") {
            self.response.replace("{plan}", plan.trim())
        } else {
            format!("{}\n\nDeclared plan:\n{}", self.response, plan.trim())
        }
    }

    pub fn judge_user(&self, strategies_block: &str, response: &str) -> String {
        self.judge_user
            .replace("{strategies_block}", strategies_block)
            .replace("{response}", response)
    }
}
