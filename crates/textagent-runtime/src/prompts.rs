//! Prompt text added around the agent's own prompt for structured output.
//!
//! The agent's rendered instructions come first, then the output contract
//! with the JSON Schema of the Output Model.

use textagent_core::ModelDefinition;

/// Output contract appended to the system message.
pub const STRUCTURED_OUTPUT_PROMPT: &str = r#"## Output Format
Respond with a single JSON object and nothing else.
The object must validate against this JSON Schema:

{schema}

Rules:
1. Include every required property, using exactly the property names above
2. Use the declared types; do not quote numbers or booleans
3. Respect every bound, length, pattern and allowed value
4. Do not add properties that are not in the schema"#;

/// Wrapper for corrective feedback sent after a rejected attempt.
pub const FEEDBACK_PROMPT: &str = r#"{feedback}

Reply again with only the corrected JSON object."#;

/// The system message for a structured request.
pub fn system_prompt(instructions: Option<&str>, output_model: &ModelDefinition) -> String {
    let schema = serde_json::to_string_pretty(&output_model.json_schema())
        .unwrap_or_else(|_| output_model.json_schema().to_string());
    let contract = STRUCTURED_OUTPUT_PROMPT.replace("{schema}", &schema);

    match instructions.map(str::trim).filter(|text| !text.is_empty()) {
        Some(instructions) => format!("{}\n\n{}", instructions, contract),
        None => contract,
    }
}

/// The follow-up user message carrying validation feedback.
pub fn feedback_prompt(feedback: &str) -> String {
    FEEDBACK_PROMPT.replace("{feedback}", feedback.trim())
}
