use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Question,
    Action,
    Decision,
    Checkpoint,
    SubFlow,
    Message,
    Escalate,
    Resolve,
}

impl StepType {
    pub const ALL: [StepType; 8] = [
        StepType::Question,
        StepType::Action,
        StepType::Decision,
        StepType::Checkpoint,
        StepType::SubFlow,
        StepType::Message,
        StepType::Escalate,
        StepType::Resolve,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Question => "question",
            StepType::Action => "action",
            StepType::Decision => "decision",
            StepType::Checkpoint => "checkpoint",
            StepType::SubFlow => "sub_flow",
            StepType::Message => "message",
            StepType::Escalate => "escalate",
            StepType::Resolve => "resolve",
        }
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StepType::ALL
            .iter()
            .find(|t| t.as_str() == s.trim())
            .copied()
            .ok_or_else(|| format!("unknown step type: {}", s))
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnswerType {
    YesNo,
    MultipleChoice,
    Dropdown,
    Numeric,
    #[default]
    Text,
}

impl AnswerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerType::YesNo => "yes_no",
            AnswerType::MultipleChoice => "multiple_choice",
            AnswerType::Dropdown => "dropdown",
            AnswerType::Numeric => "numeric",
            AnswerType::Text => "text",
        }
    }

    /// Lenient parse used by extraction: unknown text falls back to `Text`.
    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim() {
            "yes_no" => AnswerType::YesNo,
            "multiple_choice" => AnswerType::MultipleChoice,
            "dropdown" => AnswerType::Dropdown,
            "numeric" => AnswerType::Numeric,
            _ => AnswerType::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }

    pub fn parse_or_default(raw: &str) -> Self {
        match raw.trim() {
            "low" => Priority::Low,
            "high" => Priority::High,
            "urgent" => Priority::Urgent,
            _ => Priority::Normal,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChoiceOption {
    pub label: String,
    pub value: String,
}

impl ChoiceOption {
    pub fn is_blank(&self) -> bool {
        self.label.is_empty() && self.value.is_empty()
    }
}

/// Reference to an uploaded file; the upload itself happens elsewhere.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Branch {
    pub condition: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionPayload {
    pub question: String,
    pub answer_type: AnswerType,
    pub variable_name: String,
    pub options: Vec<ChoiceOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ActionPayload {
    pub action_type: String,
    pub instructions: String,
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionPayload {
    pub condition: String,
    pub branches: Vec<Branch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CheckpointPayload {
    pub checkpoint_name: String,
    pub notify: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubFlowPayload {
    pub sub_flow_id: String,
    pub return_to_parent: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagePayload {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscalatePayload {
    pub target_type: String,
    pub target_value: String,
    pub priority: Priority,
    pub reason_required: bool,
    pub notes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvePayload {
    pub resolution_type: String,
    pub resolution_code: String,
    pub notes_required: bool,
    pub survey_trigger: bool,
}

/// Type-specific part of a step. The variant is the step type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepPayload {
    Question(QuestionPayload),
    Action(ActionPayload),
    Decision(DecisionPayload),
    Checkpoint(CheckpointPayload),
    SubFlow(SubFlowPayload),
    Message(MessagePayload),
    Escalate(EscalatePayload),
    Resolve(ResolvePayload),
}

impl StepPayload {
    pub fn step_type(&self) -> StepType {
        match self {
            StepPayload::Question(_) => StepType::Question,
            StepPayload::Action(_) => StepType::Action,
            StepPayload::Decision(_) => StepType::Decision,
            StepPayload::Checkpoint(_) => StepType::Checkpoint,
            StepPayload::SubFlow(_) => StepType::SubFlow,
            StepPayload::Message(_) => StepType::Message,
            StepPayload::Escalate(_) => StepType::Escalate,
            StepPayload::Resolve(_) => StepType::Resolve,
        }
    }
}

/// Canonical snapshot of one step, always derived from its raw fields.
///
/// `index` is the position in the step list at extraction time. It changes
/// on reorder and must not be used as an identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepRecord {
    pub index: usize,
    pub title: String,
    pub description: String,
    #[serde(flatten)]
    pub payload: StepPayload,
}

impl StepRecord {
    pub fn step_type(&self) -> StepType {
        self.payload.step_type()
    }

    pub fn as_question(&self) -> Option<&QuestionPayload> {
        match &self.payload {
            StepPayload::Question(q) => Some(q),
            _ => None,
        }
    }

    pub fn as_decision(&self) -> Option<&DecisionPayload> {
        match &self.payload {
            StepPayload::Decision(d) => Some(d),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct VariableToken {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PreviewRequest {
    pub step_index: usize,
    pub record: StepRecord,
    pub request_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SourceQuestion {
    pub title: String,
    pub variable_name: String,
    pub step_index: usize,
}

/// Proposed yes/no branch pair. Only becomes part of a step when applied.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BranchCandidate {
    pub source_question: SourceQuestion,
    pub branches: [Branch; 2],
}
