// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Flat document encoding of workflow instances.
//!
//! A document store has no nested objects, so an instance is flattened into a
//! [`FieldSet`]: a map from field name to an ordered list of string values.
//!
//! # Layout
//!
//! ```text
//! inst.id, inst.status, inst.priority, ...      singleton scalars
//! inst.metadata_fields                           names of the metadata fields below
//! <metadata key>                                 one field per metadata key, verbatim
//! workflow.id, workflow.name
//! task.id[] task.name[] task.order[] task.class[]   parallel arrays, one slot per task
//! <taskId>.condition.{id,name,order,class,timeout,optional}[]
//! <taskId>.condition.<n>.config.{key,value}[]
//! <taskId>.config.{key,value}[]
//! <taskId>.required_metadata[]
//! workflow_condition_<workflowId>.{pre,post}_condition.*
//! __present__ = "true"
//! ```
//!
//! Per-task fields are namespaced by task id so several tasks can share one
//! document. [`decode`] is the exact inverse of [`encode`].

use std::collections::{BTreeMap, HashSet};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;
use crate::model::{Metadata, TaskConfig, Workflow, WorkflowCondition, WorkflowInstance, WorkflowTask};

pub const INST_ID: &str = "inst.id";
pub const INST_STATUS: &str = "inst.status";
pub const INST_CURRENT_TASK_ID: &str = "inst.current_task_id";
pub const INST_START_TIME: &str = "inst.start_time";
pub const INST_END_TIME: &str = "inst.end_time";
pub const INST_CURRENT_TASK_START_TIME: &str = "inst.current_task_start_time";
pub const INST_CURRENT_TASK_END_TIME: &str = "inst.current_task_end_time";
pub const INST_PRIORITY: &str = "inst.priority";
pub const INST_TIMES_BLOCKED: &str = "inst.times_blocked";
pub const INST_METADATA_FIELDS: &str = "inst.metadata_fields";

pub const WORKFLOW_ID: &str = "workflow.id";
pub const WORKFLOW_NAME: &str = "workflow.name";

pub const TASK_ID: &str = "task.id";
pub const TASK_NAME: &str = "task.name";
pub const TASK_ORDER: &str = "task.order";
pub const TASK_CLASS: &str = "task.class";

/// Field present on every document so "match everything" is expressible.
pub const PRESENT_FIELD: &str = "__present__";
pub const PRESENT_VALUE: &str = "true";

const WORKFLOW_CONDITION_PREFIX: &str = "workflow_condition_";
const TASK_CONDITION_GROUP: &str = "condition";
const PRE_CONDITION_GROUP: &str = "pre_condition";
const POST_CONDITION_GROUP: &str = "post_condition";

const RESERVED: &[&str] = &[
    INST_ID,
    INST_STATUS,
    INST_CURRENT_TASK_ID,
    INST_START_TIME,
    INST_END_TIME,
    INST_CURRENT_TASK_START_TIME,
    INST_CURRENT_TASK_END_TIME,
    INST_PRIORITY,
    INST_TIMES_BLOCKED,
    INST_METADATA_FIELDS,
    WORKFLOW_ID,
    WORKFLOW_NAME,
    TASK_ID,
    TASK_NAME,
    TASK_ORDER,
    TASK_CLASS,
    PRESENT_FIELD,
];

/// Flat document: field name to ordered values.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldSet {
    fields: BTreeMap<String, Vec<String>>,
}

impl FieldSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `value` to field `name`.
    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.fields.entry(name.into()).or_default().push(value.into());
    }

    /// Values of `name`; empty when the field is absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn first(&self, name: &str) -> Option<&str> {
        self.get_all(name).first().map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Number of distinct fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn single(&self, name: &str) -> Result<Option<&str>, CodecError> {
        match self.get_all(name) {
            [] => Ok(None),
            [value] => Ok(Some(value.as_str())),
            values => Err(CodecError::TooManyValues {
                field: name.to_string(),
                count: values.len(),
            }),
        }
    }

    fn required(&self, name: &str) -> Result<&str, CodecError> {
        self.single(name)?
            .ok_or_else(|| CodecError::MissingField(name.to_string()))
    }

    fn optional_string(&self, name: &str) -> Result<Option<String>, CodecError> {
        Ok(self.single(name)?.map(str::to_string))
    }

    fn required_parsed<T: FromStr>(&self, name: &str) -> Result<T, CodecError> {
        parse(name, self.required(name)?)
    }
}

fn parse<T: FromStr>(field: &str, value: &str) -> Result<T, CodecError> {
    value.parse().map_err(|_| CodecError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// Namespace holding the workflow's own pre/post conditions.
pub fn workflow_condition_namespace(workflow_id: &str) -> String {
    format!("{WORKFLOW_CONDITION_PREFIX}{workflow_id}")
}

// ============================================================================
// Encoding
// ============================================================================

/// Flatten `instance` into a [`FieldSet`].
///
/// Fails when two tasks share an id, when task namespaces nest inside each
/// other, or when a metadata key collides with a structural field.
pub fn encode(instance: &WorkflowInstance) -> Result<FieldSet, CodecError> {
    let mut fields = FieldSet::new();

    fields.push(INST_ID, &instance.id);
    fields.push(INST_STATUS, &instance.status);
    fields.push(INST_CURRENT_TASK_ID, &instance.current_task_id);
    let timestamps = [
        (INST_START_TIME, &instance.start_time),
        (INST_END_TIME, &instance.end_time),
        (INST_CURRENT_TASK_START_TIME, &instance.current_task_start_time),
        (INST_CURRENT_TASK_END_TIME, &instance.current_task_end_time),
    ];
    for (name, value) in timestamps {
        if let Some(value) = value {
            fields.push(name, value);
        }
    }
    fields.push(INST_PRIORITY, instance.priority.to_string());
    fields.push(INST_TIMES_BLOCKED, instance.times_blocked.to_string());

    let namespaces = namespaces(&instance.workflow)?;
    encode_workflow(&mut fields, &instance.workflow);
    encode_metadata(&mut fields, &instance.shared_context, &namespaces)?;

    fields.push(PRESENT_FIELD, PRESENT_VALUE);
    Ok(fields)
}

fn namespaces(workflow: &Workflow) -> Result<Vec<String>, CodecError> {
    let mut seen = HashSet::new();
    let mut namespaces = Vec::with_capacity(workflow.tasks.len() + 1);
    for task in &workflow.tasks {
        if !seen.insert(task.id.as_str()) {
            return Err(CodecError::DuplicateTaskId(task.id.clone()));
        }
        namespaces.push(task.id.clone());
    }
    namespaces.push(workflow_condition_namespace(&workflow.id));

    for outer in &namespaces {
        for inner in &namespaces {
            if is_nested(inner, outer) {
                return Err(CodecError::NamespaceCollision {
                    outer: outer.clone(),
                    inner: inner.clone(),
                });
            }
        }
    }
    // Equal namespaces can only come from a task named like the workflow
    // condition namespace.
    let wf_ns = workflow_condition_namespace(&workflow.id);
    if seen.contains(wf_ns.as_str()) {
        return Err(CodecError::DuplicateTaskId(wf_ns));
    }
    Ok(namespaces)
}

/// `name` lives under `namespace.`
fn is_nested(name: &str, namespace: &str) -> bool {
    name.strip_prefix(namespace)
        .is_some_and(|rest| rest.starts_with('.'))
}

fn encode_workflow(fields: &mut FieldSet, workflow: &Workflow) {
    fields.push(WORKFLOW_ID, &workflow.id);
    fields.push(WORKFLOW_NAME, &workflow.name);

    for task in &workflow.tasks {
        fields.push(TASK_ID, &task.id);
        fields.push(TASK_NAME, &task.name);
        fields.push(TASK_ORDER, task.order.to_string());
        fields.push(TASK_CLASS, &task.instance_class_name);

        encode_conditions(fields, &task.id, TASK_CONDITION_GROUP, &task.conditions);
        encode_config(fields, &format!("{}.config", task.id), &task.config);
        for key in &task.required_metadata_fields {
            fields.push(format!("{}.required_metadata", task.id), key);
        }
    }

    let ns = workflow_condition_namespace(&workflow.id);
    encode_conditions(fields, &ns, PRE_CONDITION_GROUP, &workflow.pre_conditions);
    encode_conditions(fields, &ns, POST_CONDITION_GROUP, &workflow.post_conditions);
}

fn encode_conditions(
    fields: &mut FieldSet,
    namespace: &str,
    group: &str,
    conditions: &[WorkflowCondition],
) {
    let prefix = format!("{namespace}.{group}");
    for (n, cond) in conditions.iter().enumerate() {
        fields.push(format!("{prefix}.id"), &cond.id);
        fields.push(format!("{prefix}.name"), &cond.name);
        fields.push(format!("{prefix}.order"), cond.order.to_string());
        fields.push(format!("{prefix}.class"), &cond.instance_class_name);
        fields.push(format!("{prefix}.timeout"), cond.timeout_seconds.to_string());
        fields.push(format!("{prefix}.optional"), cond.optional.to_string());
        encode_config(fields, &format!("{prefix}.{n}.config"), &cond.config);
    }
}

fn encode_config(fields: &mut FieldSet, prefix: &str, config: &TaskConfig) {
    for (key, value) in config {
        fields.push(format!("{prefix}.key"), key);
        fields.push(format!("{prefix}.value"), value);
    }
}

fn encode_metadata(
    fields: &mut FieldSet,
    metadata: &Metadata,
    namespaces: &[String],
) -> Result<(), CodecError> {
    for (key, values) in metadata.iter() {
        let nested = namespaces.iter().any(|ns| is_nested(key, ns));
        if RESERVED.contains(&key) || nested {
            return Err(CodecError::ReservedField(key.to_string()));
        }
        fields.push(INST_METADATA_FIELDS, key);
        for value in values {
            fields.push(key, value);
        }
    }
    Ok(())
}

// ============================================================================
// Decoding
// ============================================================================

/// Rebuild the instance flattened by [`encode`].
pub fn decode(fields: &FieldSet) -> Result<WorkflowInstance, CodecError> {
    let id = fields.required(INST_ID)?.to_string();
    let status = fields.required(INST_STATUS)?.to_string();
    let current_task_id = fields.required(INST_CURRENT_TASK_ID)?.to_string();

    let instance = WorkflowInstance {
        id,
        status,
        current_task_id,
        start_time: fields.optional_string(INST_START_TIME)?,
        end_time: fields.optional_string(INST_END_TIME)?,
        current_task_start_time: fields.optional_string(INST_CURRENT_TASK_START_TIME)?,
        current_task_end_time: fields.optional_string(INST_CURRENT_TASK_END_TIME)?,
        priority: fields.required_parsed(INST_PRIORITY)?,
        times_blocked: fields.required_parsed(INST_TIMES_BLOCKED)?,
        shared_context: decode_metadata(fields),
        workflow: decode_workflow(fields)?,
    };
    Ok(instance)
}

fn decode_metadata(fields: &FieldSet) -> Metadata {
    let mut metadata = Metadata::new();
    for key in fields.get_all(INST_METADATA_FIELDS) {
        metadata.replace(key.clone(), fields.get_all(key).to_vec());
    }
    metadata
}

fn decode_workflow(fields: &FieldSet) -> Result<Workflow, CodecError> {
    let id = fields.required(WORKFLOW_ID)?.to_string();
    let name = fields.required(WORKFLOW_NAME)?.to_string();

    let ids = fields.get_all(TASK_ID);
    let names = fields.get_all(TASK_NAME);
    let orders = fields.get_all(TASK_ORDER);
    let classes = fields.get_all(TASK_CLASS);
    check_lengths("task", &[ids, names, orders, classes])?;

    let mut tasks = Vec::with_capacity(ids.len());
    for i in 0..ids.len() {
        let task_id = &ids[i];
        tasks.push(WorkflowTask {
            id: task_id.clone(),
            name: names[i].clone(),
            order: parse(TASK_ORDER, &orders[i])?,
            instance_class_name: classes[i].clone(),
            conditions: decode_conditions(fields, task_id, TASK_CONDITION_GROUP)?,
            config: decode_config(fields, &format!("{task_id}.config"))?,
            required_metadata_fields: fields
                .get_all(&format!("{task_id}.required_metadata"))
                .to_vec(),
        });
    }

    let ns = workflow_condition_namespace(&id);
    let pre_conditions = decode_conditions(fields, &ns, PRE_CONDITION_GROUP)?;
    let post_conditions = decode_conditions(fields, &ns, POST_CONDITION_GROUP)?;

    Ok(Workflow {
        id,
        name,
        tasks,
        pre_conditions,
        post_conditions,
    })
}

fn decode_conditions(
    fields: &FieldSet,
    namespace: &str,
    group: &str,
) -> Result<Vec<WorkflowCondition>, CodecError> {
    let prefix = format!("{namespace}.{group}");
    let id_field = format!("{prefix}.id");
    let order_field = format!("{prefix}.order");
    let timeout_field = format!("{prefix}.timeout");
    let optional_field = format!("{prefix}.optional");

    let ids = fields.get_all(&id_field);
    let names = fields.get_all(&format!("{prefix}.name"));
    let orders = fields.get_all(&order_field);
    let classes = fields.get_all(&format!("{prefix}.class"));
    let timeouts = fields.get_all(&timeout_field);
    let optionals = fields.get_all(&optional_field);
    check_lengths(&prefix, &[ids, names, orders, classes, timeouts, optionals])?;

    let mut conditions = Vec::with_capacity(ids.len());
    for n in 0..ids.len() {
        conditions.push(WorkflowCondition {
            id: ids[n].clone(),
            name: names[n].clone(),
            order: parse(&order_field, &orders[n])?,
            instance_class_name: classes[n].clone(),
            timeout_seconds: parse(&timeout_field, &timeouts[n])?,
            optional: parse(&optional_field, &optionals[n])?,
            config: decode_config(fields, &format!("{prefix}.{n}.config"))?,
        });
    }
    Ok(conditions)
}

fn decode_config(fields: &FieldSet, prefix: &str) -> Result<TaskConfig, CodecError> {
    let keys = fields.get_all(&format!("{prefix}.key"));
    let values = fields.get_all(&format!("{prefix}.value"));
    check_lengths(prefix, &[keys, values])?;

    Ok(keys.iter().cloned().zip(values.iter().cloned()).collect())
}

fn check_lengths(group: &str, arrays: &[&[String]]) -> Result<(), CodecError> {
    let lengths: Vec<usize> = arrays.iter().map(|a| a.len()).collect();
    if lengths.windows(2).any(|w| w[0] != w[1]) {
        return Err(CodecError::MismatchedArrays {
            group: group.to_string(),
            lengths,
        });
    }
    Ok(())
}
