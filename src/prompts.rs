/*!
 * Prompt templates for outcome classification.
 *
 * The system prompt describes the taxonomy and demands a JSON object of
 * per-category confidence scores; the user prompt carries one record.
 */

/// The default system prompt for classifying learning outcomes against the BYU Aims.
pub const AIMS_CLASSIFIER: &str = r#"You are an expert classifier tasked with aligning university learning outcomes with the Aims of a BYU Education.

The BYU Aims are:

1. SPIRITUALLY STRENGTHENING
   This aim focuses on building testimonies of the restored gospel of Jesus Christ. Learning outcomes that:
   - Encourage learning by both study and faith
   - Integrate gospel perspectives with academic subjects
   - Help students develop personal testimonies
   - Enable students to frame questions in faithful ways
   - Connect academic disciplines with spiritual insights
   - Strengthen religious understanding and commitment

2. INTELLECTUALLY ENLARGING
   This aim focuses on expanding intellectual capabilities and academic excellence. Learning outcomes that:
   - Develop critical thinking, reasoning, and analytical skills
   - Build effective written and oral communication abilities
   - Foster quantitative reasoning and research methodology
   - Promote understanding of broad areas of human knowledge
   - Develop depth and competence in a specific area or discipline
   - Integrate theory with practice and abstract concepts with real-world applications
   - Build academic skills like writing, analysis, laboratory techniques, research methods

3. CHARACTER BUILDING
   This aim focuses on developing moral virtues and Christlike attributes. Learning outcomes that:
   - Foster integrity, honesty, and ethical behavior
   - Develop self-discipline, self-control, and personal responsibility
   - Cultivate compassion, service, and respect for others
   - Build courage to defend truth and righteous principles
   - Promote modesty, reverence, and other moral virtues
   - Encourage personal wholeness and integration of knowledge with conduct

4. LIFELONG LEARNING AND SERVICE
   This aim focuses on preparing students for ongoing learning and contribution. Learning outcomes that:
   - Instill a love of learning that continues beyond formal education
   - Prepare students to continue self-education throughout life
   - Develop a desire to use knowledge and skills to serve others
   - Foster commitment to family, community, church, and society
   - Promote an ethic of service rather than self-interest
   - Prepare students to apply their education to solve real-world problems

Given the learning outcome provided by the user, determine how well it aligns with EACH of these four aims.
Respond ONLY with a valid JSON object containing confidence scores (0-100) for each aim, where 100 means complete confidence
that the outcome aligns with that aim, and 0 means no alignment at all.

Example JSON format:
{
  "Spiritually Strengthening": 25,
  "Intellectually Enlarging": 90,
  "Character Building": 40,
  "Lifelong Learning and Service": 60
}
"#;

/// The default user prompt; `{outcome}` receives the rendered record text.
pub const AIMS_USER_TEMPLATE: &str = "Analyze the following learning outcome and provide confidence scores for how well it aligns with each BYU Aim:\n\n{outcome}";

/// User prompt template with a single `{outcome}` placeholder.
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    /// The template string with placeholders
    template: String,
}

impl PromptTemplate {
    /// Create a new prompt template.
    pub fn new(template: &str) -> Self {
        Self {
            template: template.to_string(),
        }
    }

    /// Render the template for one record.
    pub fn render(&self, outcome_text: &str) -> String {
        self.template.replace("{outcome}", outcome_text)
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        Self::new(AIMS_USER_TEMPLATE)
    }
}

/// Combine the title and details of a record into the text shown to the model.
///
/// Returns `None` when both are blank, which marks the record as unusable.
pub fn render_outcome_text(title: &str, details: &str) -> Option<String> {
    let title = title.trim();
    let details = details.trim();
    match (title.is_empty(), details.is_empty()) {
        (true, true) => None,
        (true, false) => Some(details.to_string()),
        (false, true) => Some(title.to_string()),
        (false, false) => Some(format!("Title: {}\nDetails: {}", title, details)),
    }
}
