//! Step data extraction
//!
//! Turns one step's raw field set into a canonical [`StepRecord`], and back.
//! Extraction is total: a missing field takes its default (`""`, `[]`,
//! `false`) and a malformed structured sub-field degrades to empty.

use tracing::debug;

use crate::fields::{group_field, FieldSet, FieldValue};
use crate::types::*;

/// Build the canonical record for a step from its current raw fields.
pub fn extract(fields: &FieldSet, step_type: StepType, index: usize) -> StepRecord {
    let payload = match step_type {
        StepType::Question => StepPayload::Question(QuestionPayload {
            question: fields.text("question"),
            answer_type: AnswerType::parse_or_default(&fields.text("answer_type")),
            variable_name: fields.text("variable_name"),
            options: extract_options(fields),
        }),
        StepType::Action => StepPayload::Action(ActionPayload {
            action_type: fields.text("action_type"),
            instructions: fields.text("instructions"),
            attachments: extract_attachments(fields),
        }),
        StepType::Decision => StepPayload::Decision(DecisionPayload {
            condition: fields.text("condition"),
            branches: extract_branches(fields),
        }),
        StepType::Checkpoint => StepPayload::Checkpoint(CheckpointPayload {
            checkpoint_name: fields.text("checkpoint_name"),
            notify: fields.checked("notify"),
        }),
        StepType::SubFlow => StepPayload::SubFlow(SubFlowPayload {
            sub_flow_id: fields.text("sub_flow_id"),
            return_to_parent: fields.checked("return_to_parent"),
        }),
        StepType::Message => StepPayload::Message(MessagePayload {
            content: fields.text("content"),
        }),
        StepType::Escalate => StepPayload::Escalate(EscalatePayload {
            target_type: fields.text("target_type"),
            target_value: fields.text("target_value"),
            priority: Priority::parse_or_default(&fields.text("priority")),
            reason_required: fields.checked("reason_required"),
            notes: fields.text("notes"),
        }),
        StepType::Resolve => StepPayload::Resolve(ResolvePayload {
            resolution_type: fields.text("resolution_type"),
            resolution_code: fields.text("resolution_code"),
            notes_required: fields.checked("notes_required"),
            survey_trigger: fields.checked("survey_trigger"),
        }),
    };

    StepRecord {
        index,
        title: fields.text("title"),
        description: fields.text("description"),
        payload,
    }
}

fn extract_options(fields: &FieldSet) -> Vec<ChoiceOption> {
    fields
        .group("options")
        .into_values()
        .map(|mut entry| ChoiceOption {
            label: entry.shift_remove("label").unwrap_or_default(),
            value: entry.shift_remove("value").unwrap_or_default(),
        })
        .filter(|opt| !opt.is_blank())
        .collect()
}

fn extract_branches(fields: &FieldSet) -> Vec<Branch> {
    fields
        .group("branches")
        .into_values()
        .map(|mut entry| Branch {
            condition: entry.shift_remove("condition").unwrap_or_default(),
            path: entry.shift_remove("path").unwrap_or_default(),
        })
        .collect()
}

fn extract_attachments(fields: &FieldSet) -> Vec<Attachment> {
    let raw = fields.text("attachments");
    if raw.trim().is_empty() {
        return Vec::new();
    }

    match serde_json::from_str::<Vec<Attachment>>(&raw) {
        Ok(list) => list,
        Err(e) => {
            debug!(error = %e, "attachments field is not a valid list, using empty");
            Vec::new()
        }
    }
}

/// Write a record back out as raw fields.
///
/// `extract(&to_fields(r), r.step_type(), r.index) == r` for any record
/// whose options are all non-blank.
pub fn to_fields(record: &StepRecord) -> FieldSet {
    let mut fields = FieldSet::new();
    fields.set_text("title", record.title.clone());
    fields.set_text("description", record.description.clone());

    match &record.payload {
        StepPayload::Question(q) => {
            fields.set_text("question", q.question.clone());
            fields.set_text("answer_type", q.answer_type.as_str());
            fields.set_text("variable_name", q.variable_name.clone());
            for (i, opt) in q.options.iter().enumerate() {
                fields.set_text(&group_field("options", i, "label"), opt.label.clone());
                fields.set_text(&group_field("options", i, "value"), opt.value.clone());
            }
        }
        StepPayload::Action(a) => {
            fields.set_text("action_type", a.action_type.clone());
            fields.set_text("instructions", a.instructions.clone());
            // Vec<Attachment> of plain strings always serializes
            let encoded = serde_json::to_string(&a.attachments).unwrap_or_else(|_| "[]".into());
            fields.set_text("attachments", encoded);
        }
        StepPayload::Decision(d) => {
            fields.set_text("condition", d.condition.clone());
            write_branches(&mut fields, &d.branches);
        }
        StepPayload::Checkpoint(c) => {
            fields.set_text("checkpoint_name", c.checkpoint_name.clone());
            fields.set_checked("notify", c.notify);
        }
        StepPayload::SubFlow(s) => {
            fields.set_text("sub_flow_id", s.sub_flow_id.clone());
            fields.set_checked("return_to_parent", s.return_to_parent);
        }
        StepPayload::Message(m) => {
            fields.set_text("content", m.content.clone());
        }
        StepPayload::Escalate(e) => {
            fields.set_text("target_type", e.target_type.clone());
            fields.set_text("target_value", e.target_value.clone());
            fields.set_text("priority", e.priority.as_str());
            fields.set_checked("reason_required", e.reason_required);
            fields.set_text("notes", e.notes.clone());
        }
        StepPayload::Resolve(r) => {
            fields.set_text("resolution_type", r.resolution_type.clone());
            fields.set_text("resolution_code", r.resolution_code.clone());
            fields.set_checked("notes_required", r.notes_required);
            fields.set_checked("survey_trigger", r.survey_trigger);
        }
    }

    fields
}

/// Write `branches[i][condition|path]` for each branch, in order.
pub fn write_branches(fields: &mut FieldSet, branches: &[Branch]) {
    for (i, branch) in branches.iter().enumerate() {
        fields.insert(
            &group_field("branches", i, "condition"),
            FieldValue::Text(branch.condition.clone()),
        );
        fields.insert(
            &group_field("branches", i, "path"),
            FieldValue::Text(branch.path.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn option(label: &str, value: &str) -> ChoiceOption {
        ChoiceOption {
            label: label.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn test_blank_options_are_dropped() {
        let fields: FieldSet = [
            ("options[0][label]", "A"),
            ("options[0][value]", ""),
            ("options[1][label]", ""),
            ("options[1][value]", ""),
            ("options[2][label]", ""),
            ("options[2][value]", "x"),
        ]
        .into_iter()
        .collect();

        let record = extract(&fields, StepType::Question, 0);
        let q = record.as_question().unwrap();
        assert_eq!(q.options, vec![option("A", ""), option("", "x")]);
    }

    #[test]
    fn test_sparse_options_keep_index_order() {
        let fields: FieldSet = [
            ("options[2][label]", "third"),
            ("options[0][label]", "first"),
        ]
        .into_iter()
        .collect();

        let record = extract(&fields, StepType::Question, 0);
        let labels: Vec<&str> = record
            .as_question()
            .unwrap()
            .options
            .iter()
            .map(|o| o.label.as_str())
            .collect();
        assert_eq!(labels, vec!["first", "third"]);
    }

    #[test]
    fn test_empty_field_set_yields_defaults() {
        for step_type in StepType::ALL {
            let record = extract(&FieldSet::new(), step_type, 4);
            assert_eq!(record.step_type(), step_type);
            assert_eq!(record.index, 4);
            assert_eq!(record.title, "");
        }

        let record = extract(&FieldSet::new(), StepType::Escalate, 0);
        match record.payload {
            StepPayload::Escalate(e) => {
                assert_eq!(e.priority, Priority::Normal);
                assert!(!e.reason_required);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_malformed_attachments_degrade_to_empty() {
        let fields: FieldSet = [("attachments", "[{not json"), ("instructions", "Reboot")]
            .into_iter()
            .collect();

        let record = extract(&fields, StepType::Action, 1);
        match record.payload {
            StepPayload::Action(a) => {
                assert!(a.attachments.is_empty());
                assert_eq!(a.instructions, "Reboot");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_attachments_parse() {
        let fields: FieldSet = [(
            "attachments",
            r#"[{"name": "guide.pdf", "url": "/files/1"}, {"name": "x"}]"#,
        )]
        .into_iter()
        .collect();

        let record = extract(&fields, StepType::Action, 0);
        match record.payload {
            StepPayload::Action(a) => {
                assert_eq!(a.attachments.len(), 2);
                assert_eq!(a.attachments[0].url, "/files/1");
                assert_eq!(a.attachments[1].url, "");
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_wrapped_names_extract() {
        let fields: FieldSet = [
            ("step[title]", "Ask"),
            ("step[answer_type]", "yes_no"),
            ("step[variable_name]", "is_online"),
        ]
        .into_iter()
        .collect();

        let record = extract(&fields, StepType::Question, 0);
        assert_eq!(record.title, "Ask");
        let q = record.as_question().unwrap();
        assert_eq!(q.answer_type, AnswerType::YesNo);
        assert_eq!(q.variable_name, "is_online");
    }

    #[test]
    fn test_round_trip_every_type() {
        let records = vec![
            StepRecord {
                index: 0,
                title: "Ask".into(),
                description: "first".into(),
                payload: StepPayload::Question(QuestionPayload {
                    question: "Is the router on?".into(),
                    answer_type: AnswerType::MultipleChoice,
                    variable_name: "router_on".into(),
                    options: vec![option("Yes", "y"), option("", "n"), option("Maybe", "")],
                }),
            },
            StepRecord {
                index: 1,
                title: "Do".into(),
                description: String::new(),
                payload: StepPayload::Action(ActionPayload {
                    action_type: "manual".into(),
                    instructions: "Unplug it".into(),
                    attachments: vec![Attachment {
                        name: "a.png".into(),
                        url: "/a.png".into(),
                    }],
                }),
            },
            StepRecord {
                index: 2,
                title: "Branch".into(),
                description: String::new(),
                payload: StepPayload::Decision(DecisionPayload {
                    condition: "router_on".into(),
                    branches: vec![
                        Branch {
                            condition: "router_on == 'yes'".into(),
                            path: "step-4".into(),
                        },
                        Branch {
                            condition: String::new(),
                            path: String::new(),
                        },
                    ],
                }),
            },
            StepRecord {
                index: 3,
                title: "Mark".into(),
                description: String::new(),
                payload: StepPayload::Checkpoint(CheckpointPayload {
                    checkpoint_name: "halfway".into(),
                    notify: true,
                }),
            },
            StepRecord {
                index: 4,
                title: "Nested".into(),
                description: String::new(),
                payload: StepPayload::SubFlow(SubFlowPayload {
                    sub_flow_id: "wf-9".into(),
                    return_to_parent: true,
                }),
            },
            StepRecord {
                index: 5,
                title: "Say".into(),
                description: String::new(),
                payload: StepPayload::Message(MessagePayload {
                    content: "Hello {{customer.name}}".into(),
                }),
            },
            StepRecord {
                index: 6,
                title: "Up".into(),
                description: String::new(),
                payload: StepPayload::Escalate(EscalatePayload {
                    target_type: "team".into(),
                    target_value: "tier2".into(),
                    priority: Priority::High,
                    reason_required: true,
                    notes: "asap".into(),
                }),
            },
            StepRecord {
                index: 7,
                title: "Done".into(),
                description: String::new(),
                payload: StepPayload::Resolve(ResolvePayload {
                    resolution_type: "fixed".into(),
                    resolution_code: "R1".into(),
                    notes_required: false,
                    survey_trigger: true,
                }),
            },
        ];

        for record in records {
            let fields = to_fields(&record);
            let back = extract(&fields, record.step_type(), record.index);
            assert_eq!(back, record);
        }
    }
}
