//! The `capture_lead` tool contract.
//!
//! The model sees [`describe`]; whatever it sends back goes through [`validate`]
//! before a lead is recorded. Validation never has side effects.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

pub const CAPTURE_LEAD: &str = "capture_lead";

const MIN_NAME_CHARS: usize = 2;
const MIN_SUMMARY_CHARS: usize = 10;

lazy_static! {
    // Same shape browsers and zod accept; the dot rules are checked separately
    // because the regex crate has no lookahead.
    static ref EMAIL: Regex = Regex::new(
        r"^[A-Za-z0-9_'+\-.]*[A-Za-z0-9_+\-]@([A-Za-z0-9][A-Za-z0-9\-]*\.)+[A-Za-z]{2,}$"
    )
    .expect("email pattern is valid");
}

pub fn is_valid_email(email: &str) -> bool {
    !email.starts_with('.') && !email.contains("..") && EMAIL.is_match(email)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Budget {
    #[serde(rename = "under_10k")]
    Under10k,
    #[serde(rename = "10k_25k")]
    From10kTo25k,
    #[serde(rename = "25k_50k")]
    From25kTo50k,
    #[serde(rename = "50k_100k")]
    From50kTo100k,
    #[serde(rename = "over_100k")]
    Over100k,
    #[serde(rename = "not_specified")]
    NotSpecified,
}

impl Budget {
    pub const ALL: [Budget; 6] = [
        Budget::Under10k,
        Budget::From10kTo25k,
        Budget::From25kTo50k,
        Budget::From50kTo100k,
        Budget::Over100k,
        Budget::NotSpecified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Budget::Under10k => "under_10k",
            Budget::From10kTo25k => "10k_25k",
            Budget::From25kTo50k => "25k_50k",
            Budget::From50kTo100k => "50k_100k",
            Budget::Over100k => "over_100k",
            Budget::NotSpecified => "not_specified",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|b| b.as_str() == raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Urgent,
    High,
    Medium,
    Low,
    NotSpecified,
}

impl Priority {
    pub const ALL: [Priority; 5] = [
        Priority::Urgent,
        Priority::High,
        Priority::Medium,
        Priority::Low,
        Priority::NotSpecified,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
            Priority::NotSpecified => "not_specified",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == raw)
    }
}

/// Arguments of a `capture_lead` call that passed validation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureLeadInput {
    pub name: String,
    pub email: String,
    pub project_summary: String,
    pub budget: Option<Budget>,
    pub priority: Option<Priority>,
    pub timeline: Option<String>,
    pub company_name: Option<String>,
    pub additional_notes: Option<String>,
}

/// Every problem found in one set of tool arguments, in field order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", .problems.join("; "))]
pub struct ValidationError {
    pub problems: Vec<String>,
}

/// What the relay hands back to the model after a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lead_id: Option<String>,
}

impl ToolResult {
    pub fn captured(name: &str, email: &str, lead_id: &str) -> Self {
        Self {
            success: true,
            message: format!(
                "Thanks {}! Your information has been saved. Our team will reach out to {} within 24 hours to discuss your project.",
                name, email
            ),
            lead_id: Some(lead_id.to_string()),
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            message: reason.into(),
            lead_id: None,
        }
    }

    /// Same shape the SSE `tool_result` chunk carries.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| {
            json!({ "success": self.success, "message": self.message })
        })
    }
}

/// Tool metadata in the function-declaration shape model providers expect.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

pub fn describe() -> ToolDescriptor {
    let budgets: Vec<&str> = Budget::ALL.iter().map(Budget::as_str).collect();
    let priorities: Vec<&str> = Priority::ALL.iter().map(Priority::as_str).collect();
    ToolDescriptor {
        name: CAPTURE_LEAD.to_string(),
        description: "Capture a qualified lead after validating email and project intent. \
Only use when the user has provided a valid email and expressed clear interest in working with OlanAI."
            .to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "name": { "type": "string", "description": "Full name of the lead" },
                "email": { "type": "string", "description": "Valid email address" },
                "projectSummary": {
                    "type": "string",
                    "description": "Brief summary of the project or need"
                },
                "budget": {
                    "type": "string",
                    "enum": budgets,
                    "description": "Estimated project budget range"
                },
                "priority": {
                    "type": "string",
                    "enum": priorities,
                    "description": "How urgent is this project"
                },
                "timeline": { "type": "string", "description": "Expected project timeline" },
                "companyName": { "type": "string", "description": "Company or organization name" },
                "additionalNotes": {
                    "type": "string",
                    "description": "Any additional context from the conversation"
                }
            },
            "required": ["name", "email", "projectSummary"]
        }),
    }
}

/// Check raw model arguments against the contract.
pub fn validate(raw: &Value) -> Result<CaptureLeadInput, ValidationError> {
    let Some(args) = raw.as_object() else {
        return Err(ValidationError {
            problems: vec!["arguments must be a JSON object".to_string()],
        });
    };
    let mut problems = Vec::new();

    let name = required_text(args, "name", MIN_NAME_CHARS, &mut problems);

    let email = match args.get("email").and_then(Value::as_str).map(str::trim) {
        Some(email) if is_valid_email(email) => Some(email.to_string()),
        Some(email) if !email.is_empty() => {
            problems.push(format!("email `{}` is not a valid email address", email));
            None
        }
        _ => {
            problems.push("email is required".to_string());
            None
        }
    };

    let project_summary = required_text(args, "projectSummary", MIN_SUMMARY_CHARS, &mut problems);

    let budget = optional_choice(
        args,
        "budget",
        Budget::parse,
        &Budget::ALL.map(|b| b.as_str()),
        &mut problems,
    );
    let priority = optional_choice(
        args,
        "priority",
        Priority::parse,
        &Priority::ALL.map(|p| p.as_str()),
        &mut problems,
    );
    let timeline = optional_text(args, "timeline", &mut problems);
    let company_name = optional_text(args, "companyName", &mut problems);
    let additional_notes = optional_text(args, "additionalNotes", &mut problems);

    match (name, email, project_summary) {
        (Some(name), Some(email), Some(project_summary)) if problems.is_empty() => {
            Ok(CaptureLeadInput {
                name,
                email,
                project_summary,
                budget,
                priority,
                timeline,
                company_name,
                additional_notes,
            })
        }
        _ => Err(ValidationError { problems }),
    }
}

fn required_text(
    args: &Map<String, Value>,
    field: &str,
    min_chars: usize,
    problems: &mut Vec<String>,
) -> Option<String> {
    match args.get(field).and_then(Value::as_str).map(str::trim) {
        Some(text) if text.chars().count() >= min_chars => Some(text.to_string()),
        Some(text) if !text.is_empty() => {
            problems.push(format!("{} must be at least {} characters", field, min_chars));
            None
        }
        _ => {
            problems.push(format!("{} is required", field));
            None
        }
    }
}

fn optional_text(
    args: &Map<String, Value>,
    field: &str,
    problems: &mut Vec<String>,
) -> Option<String> {
    match args.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(text)) => Some(text.trim().to_string()).filter(|t| !t.is_empty()),
        Some(_) => {
            problems.push(format!("{} must be a string", field));
            None
        }
    }
}

fn optional_choice<T>(
    args: &Map<String, Value>,
    field: &str,
    parse: fn(&str) -> Option<T>,
    allowed: &[&str],
    problems: &mut Vec<String>,
) -> Option<T> {
    match args.get(field) {
        None | Some(Value::Null) => None,
        Some(Value::String(raw)) if parse(raw.trim()).is_some() => parse(raw.trim()),
        Some(_) => {
            problems.push(format!("{} must be one of: {}", field, allowed.join(", ")));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn jane() -> Value {
        json!({
            "name": "Jane Doe",
            "email": "jane@example.com",
            "projectSummary": "Booking app",
        })
    }

    #[test]
    fn test_minimal_valid_arguments() {
        let input = validate(&jane()).unwrap();
        assert_eq!(input.name, "Jane Doe");
        assert_eq!(input.email, "jane@example.com");
        assert_eq!(input.project_summary, "Booking app");
        assert_eq!(input.budget, None);
        assert_eq!(input.priority, None);
    }

    #[test]
    fn test_all_optional_fields() {
        let mut args = jane();
        args["budget"] = json!("25k_50k");
        args["priority"] = json!("urgent");
        args["timeline"] = json!("Q3");
        args["companyName"] = json!("Acme");
        args["additionalNotes"] = json!(null);
        let input = validate(&args).unwrap();
        assert_eq!(input.budget, Some(Budget::From25kTo50k));
        assert_eq!(input.priority, Some(Priority::Urgent));
        assert_eq!(input.timeline.as_deref(), Some("Q3"));
        assert_eq!(input.company_name.as_deref(), Some("Acme"));
        assert_eq!(input.additional_notes, None);
    }

    #[test]
    fn test_invalid_email_is_rejected() {
        for email in [
            "not-an-email",
            "jane@",
            "@example.com",
            "jane@example",
            ".jane@example.com",
            "ja..ne@example.com",
        ] {
            let mut args = jane();
            args["email"] = json!(email);
            let err = validate(&args).unwrap_err();
            assert!(err.to_string().contains("not a valid email"), "{} -> {}", email, err);
        }
    }

    #[test]
    fn test_valid_email_shapes() {
        for email in [
            "jane@example.com",
            "jane.doe+sales@mail.example.co.uk",
            "j_d-1@sub-domain.io",
        ] {
            assert!(is_valid_email(email), "{}", email);
        }
    }

    #[test]
    fn test_short_fields_collect_every_problem() {
        let err = validate(&json!({
            "name": "J",
            "email": "jane@example.com",
            "projectSummary": "app",
            "budget": "a lot",
        }))
        .unwrap_err();
        assert_eq!(err.problems.len(), 3);
        assert!(err.problems[0].starts_with("name must be at least 2"));
        assert!(err.problems[1].starts_with("projectSummary must be at least 10"));
        assert!(err.problems[2].starts_with("budget must be one of"));
    }

    #[test]
    fn test_missing_required_fields() {
        let err = validate(&json!({})).unwrap_err();
        assert_eq!(
            err.problems,
            vec!["name is required", "email is required", "projectSummary is required"]
        );
    }

    #[test]
    fn test_non_object_arguments() {
        assert!(validate(&json!("Jane")).is_err());
        assert!(validate(&Value::Null).is_err());
    }

    #[test]
    fn test_describe_matches_contract() {
        let tool = describe();
        assert_eq!(tool.name, CAPTURE_LEAD);
        assert_eq!(tool.parameters["required"], json!(["name", "email", "projectSummary"]));
        assert_eq!(tool.parameters["properties"]["budget"]["enum"].as_array().unwrap().len(), 6);
        assert_eq!(tool.parameters["properties"]["priority"]["enum"][4], "not_specified");
    }

    #[test]
    fn test_tool_result_shapes() {
        let ok = ToolResult::captured("Jane", "jane@example.com", "LEAD_1_abc");
        assert!(ok.message.contains("jane@example.com"));
        assert_eq!(ok.to_value()["leadId"], "LEAD_1_abc");
        let rejected = serde_json::to_value(ToolResult::rejected("email is required")).unwrap();
        assert_eq!(rejected, json!({"success": false, "message": "email is required"}));
    }

    #[test]
    fn test_model_and_client_see_the_same_result() {
        for result in [
            ToolResult::captured("Jane", "jane@example.com", "LEAD_1_abc"),
            ToolResult::rejected("email is required"),
        ] {
            assert_eq!(result.to_value(), serde_json::to_value(&result).unwrap());
        }
        assert!(ToolResult::rejected("no").to_value().get("leadId").is_none());
    }
}
