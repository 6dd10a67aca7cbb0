//! A tiny executor over the parsed document, enough to drive the
//! dispatcher end to end.
//!
//! Root fields:
//! - `echo(text)` returns its argument
//! - `hello` returns `"world"`
//! - `fail` makes execution fail
//! - anything else resolves to `null`
//!
//! Root fragments marked `@defer(label: ...)` are delivered as patches.
//! Subscriptions support `count(to: N)`, `ticks` (endless), `broken`
//! (fails after one event) and `rejected` (subscribe-time error).

#![allow(dead_code)]

use async_graphql_parser::types::{Directive, Field, Selection, SelectionSet};
use async_graphql_parser::Positioned;
use async_graphql_value::Value as GqlValue;
use futures::stream::{self, StreamExt};
use gqlx_core::prelude::*;
use gqlx_core::Push;
use serde_json::{json, Map, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// The schema handle. Counts teardowns of subscription sources.
#[derive(Debug, Default)]
pub struct TestSchema {
    pub teardowns: Arc<AtomicUsize>,
}

impl TestSchema {
    pub fn teardowns(&self) -> usize {
        self.teardowns.load(Ordering::SeqCst)
    }
}

pub fn builder() -> gqlx_core::ProcessorBuilder<TestSchema> {
    Processor::builder(TestSchema::default(), execute).subscribe(subscribe)
}

pub fn processor() -> Processor<TestSchema> {
    builder().build()
}

pub async fn run(processor: &Processor<TestSchema>, request: Request) -> ResultVariant {
    let params = GraphQLParams::from_request(&request);
    processor.process_request(&request, params).await
}

pub fn get(query: &str) -> Request {
    Request::get().query_param("query", query)
}

pub fn post(query: &str) -> Request {
    Request::post(json!({ "query": query }))
}

/// Drains a push stream into its decoded payloads.
pub async fn drain(mut push: Push) -> Vec<Value> {
    let mut payloads = Vec::new();
    push.subscribe(|payload| payloads.push(serde_json::to_value(payload).unwrap()))
        .await
        .unwrap();
    payloads
}

async fn execute(args: ExecutionArgs<TestSchema>) -> Result<ExecutionOutcome, BoxError> {
    let selection_set = &args.operation.definition.node.selection_set;

    let mut data = Map::new();
    let mut deferred = Vec::new();
    collect(selection_set, &args.variables, &mut data, &mut deferred)?;

    let initial = ExecutionResult::data(Value::Object(data));
    if deferred.is_empty() {
        return Ok(initial.into());
    }

    let last = deferred.len() - 1;
    let patches = deferred
        .into_iter()
        .enumerate()
        .map(move |(i, (label, data))| {
            let patch = ExecutionPatchResult::deferred(vec![], Value::Object(data)).has_next(i < last);
            Ok::<_, BoxError>(match label {
                Some(label) => patch.label(label),
                None => patch,
            })
        });

    Ok(ExecutionOutcome::incremental(
        stream::once(async move { Ok::<_, BoxError>(ExecutionPatchResult::initial(initial)) })
            .chain(stream::iter(patches)),
    ))
}

async fn subscribe(args: ExecutionArgs<TestSchema>) -> Result<SubscriptionOutcome, BoxError> {
    let Some(field) = root_field(&args.operation.definition.node.selection_set) else {
        return Ok(ExecutionResult::errors(vec![GraphQLError::new("No subscription field.")]).into());
    };

    let key = response_key(field).to_string();
    let guard = Teardown(args.schema.teardowns.clone());

    match field.name.node.as_str() {
        "count" => {
            let to = argument(field, "to", &args.variables)
                .and_then(|to| to.as_u64())
                .unwrap_or(0);
            Ok(SubscriptionOutcome::stream(stream::iter(1..=to).map(move |i| {
                let _ = &guard;
                Ok::<_, BoxError>(ExecutionResult::data(json!({ key.as_str(): i })))
            })))
        }
        "ticks" => Ok(SubscriptionOutcome::stream(stream::iter(1u64..).map(move |i| {
            let _ = &guard;
            Ok::<_, BoxError>(ExecutionResult::data(json!({ key.as_str(): i })))
        }))),
        "broken" => Ok(SubscriptionOutcome::stream(
            stream::iter(vec![
                Ok(ExecutionResult::data(json!({ key.as_str(): 1 }))),
                Err::<ExecutionResult, BoxError>("event source went away".into()),
            ])
            .map(move |event| {
                let _ = &guard;
                event
            }),
        )),
        "rejected" => Ok(ExecutionResult::errors(vec![GraphQLError::new("Not allowed to subscribe.")]).into()),
        other => Ok(ExecutionResult::errors(vec![GraphQLError::new(format!(
            "Unknown subscription field \"{other}\"."
        ))])
        .into()),
    }
}

struct Teardown(Arc<AtomicUsize>);

impl Drop for Teardown {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

type Deferred = Vec<(Option<String>, Map<String, Value>)>;

fn collect(
    selection_set: &Positioned<SelectionSet>,
    variables: &Map<String, Value>,
    data: &mut Map<String, Value>,
    deferred: &mut Deferred,
) -> Result<(), BoxError> {
    for item in &selection_set.node.items {
        match &item.node {
            Selection::Field(field) => {
                let field = &field.node;
                let value = resolve(field, variables)?;
                data.insert(response_key(field).to_string(), value);
            }
            Selection::InlineFragment(fragment) => {
                let fragment = &fragment.node;
                match defer_label(&fragment.directives) {
                    Some(label) => {
                        let mut patch = Map::new();
                        collect(&fragment.selection_set, variables, &mut patch, deferred)?;
                        deferred.push((label, patch));
                    }
                    None => collect(&fragment.selection_set, variables, data, deferred)?,
                }
            }
            Selection::FragmentSpread(_) => {}
        }
    }
    Ok(())
}

fn resolve(field: &Field, variables: &Map<String, Value>) -> Result<Value, BoxError> {
    match field.name.node.as_str() {
        "echo" => Ok(argument(field, "text", variables).unwrap_or(Value::Null)),
        "hello" => Ok(json!("world")),
        "fail" => Err("resolver exploded".into()),
        _ => Ok(Value::Null),
    }
}

fn root_field(selection_set: &Positioned<SelectionSet>) -> Option<&Field> {
    selection_set.node.items.iter().find_map(|item| match &item.node {
        Selection::Field(field) => Some(&field.node),
        _ => None,
    })
}

fn response_key(field: &Field) -> &str {
    field
        .alias
        .as_ref()
        .map_or(field.name.node.as_str(), |alias| alias.node.as_str())
}

/// `Some(label)` when the directives contain `@defer`.
fn defer_label(directives: &[Positioned<Directive>]) -> Option<Option<String>> {
    let defer = directives
        .iter()
        .find(|directive| directive.node.name.node.as_str() == "defer")?;
    let label = defer
        .node
        .get_argument("label")
        .and_then(|label| match &label.node {
            GqlValue::String(label) => Some(label.clone()),
            _ => None,
        });
    Some(label)
}

fn argument(field: &Field, name: &str, variables: &Map<String, Value>) -> Option<Value> {
    field
        .get_argument(name)
        .map(|value| to_json(&value.node, variables))
}

fn to_json(value: &GqlValue, variables: &Map<String, Value>) -> Value {
    match value {
        GqlValue::Variable(name) => variables.get(name.as_str()).cloned().unwrap_or(Value::Null),
        GqlValue::Null | GqlValue::Binary(_) => Value::Null,
        GqlValue::Number(number) => Value::Number(number.clone()),
        GqlValue::String(s) => Value::String(s.clone()),
        GqlValue::Boolean(b) => Value::Bool(*b),
        GqlValue::Enum(name) => Value::String(name.to_string()),
        GqlValue::List(items) => items.iter().map(|item| to_json(item, variables)).collect(),
        GqlValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, item)| (key.to_string(), to_json(item, variables)))
                .collect(),
        ),
    }
}
