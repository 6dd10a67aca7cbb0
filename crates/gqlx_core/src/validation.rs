//! Document validation.
//!
//! A validation rule looks at the schema and the parsed document and
//! returns every problem it finds. [`validate`] runs all rules and
//! concatenates their errors. The built-in rules only need the document,
//! schema-aware rules are left to the caller.

use async_graphql_parser::types::{
    ExecutableDocument, OperationDefinition, OperationType, Selection, SelectionSet,
};
use async_graphql_parser::{Pos, Positioned};
use async_graphql_value::{Name, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::GraphQLError;

/// A validation rule.
pub type ValidationRule<S> = Arc<dyn Fn(&S, &ExecutableDocument) -> Vec<GraphQLError> + Send + Sync>;

/// Runs every rule, keeping all errors in rule order.
pub fn validate<S>(
    schema: &S,
    document: &ExecutableDocument,
    rules: &[ValidationRule<S>],
) -> Vec<GraphQLError> {
    rules.iter().flat_map(|rule| rule(schema, document)).collect()
}

/// The built-in rules.
pub fn specified_rules<S: 'static>() -> Vec<ValidationRule<S>> {
    vec![
        rule(known_fragment_names),
        rule(no_unused_fragments),
        rule(no_fragment_cycles),
        rule(no_undefined_variables),
        rule(single_field_subscriptions),
        rule(unique_argument_names),
    ]
}

/// Wraps a schema-independent check as a rule.
pub fn rule<S, F>(check: F) -> ValidationRule<S>
where
    F: Fn(&ExecutableDocument) -> Vec<GraphQLError> + Send + Sync + 'static,
{
    Arc::new(move |_: &S, document: &ExecutableDocument| check(document))
}

/// Every fragment spread names a defined fragment.
pub fn known_fragment_names(document: &ExecutableDocument) -> Vec<GraphQLError> {
    let mut errors = Vec::new();
    for selection_set in selection_sets(document) {
        walk_selections(selection_set, &mut |selection| {
            if let Selection::FragmentSpread(spread) = selection {
                let name = &spread.node.fragment_name;
                if !document.fragments.contains_key(&name.node) {
                    errors.push(
                        GraphQLError::new(format!("Unknown fragment \"{}\".", name.node)).at(name.pos),
                    );
                }
            }
        });
    }
    errors
}

/// Every defined fragment is spread somewhere.
pub fn no_unused_fragments(document: &ExecutableDocument) -> Vec<GraphQLError> {
    let mut used = HashSet::new();
    for selection_set in selection_sets(document) {
        walk_selections(selection_set, &mut |selection| {
            if let Selection::FragmentSpread(spread) = selection {
                used.insert(spread.node.fragment_name.node.clone());
            }
        });
    }

    let mut unused: Vec<_> = document
        .fragments
        .iter()
        .filter(|(name, _)| !used.contains(*name))
        .map(|(name, fragment)| (fragment.pos, name))
        .collect();
    unused.sort_by_key(|(pos, _)| (pos.line, pos.column));

    unused
        .into_iter()
        .map(|(pos, name)| GraphQLError::new(format!("Fragment \"{name}\" is never used.")).at(pos))
        .collect()
}

/// Fragments do not spread themselves, directly or through others.
///
/// Each fragment is expanded once; a cycle is reported by the first
/// fragment of the cycle reached in source order.
pub fn no_fragment_cycles(document: &ExecutableDocument) -> Vec<GraphQLError> {
    let mut fragments: Vec<_> = document.fragments.iter().collect();
    fragments.sort_by_key(|(_, fragment)| (fragment.pos.line, fragment.pos.column));

    let mut cycles = CycleDetector {
        document,
        visited: HashSet::new(),
        spread_path: Vec::new(),
        path_index: HashMap::new(),
        errors: Vec::new(),
    };
    for (name, fragment) in fragments {
        cycles.detect(name, &fragment.node.selection_set);
    }
    cycles.errors
}

struct CycleDetector<'a> {
    document: &'a ExecutableDocument,
    visited: HashSet<&'a Name>,
    spread_path: Vec<&'a Positioned<Name>>,
    path_index: HashMap<&'a Name, usize>,
    errors: Vec<GraphQLError>,
}

impl<'a> CycleDetector<'a> {
    fn detect(&mut self, name: &'a Name, selection_set: &'a Positioned<SelectionSet>) {
        if !self.visited.insert(name) {
            return;
        }

        let mut spreads = Vec::new();
        walk_selections(selection_set, &mut |selection| {
            if let Selection::FragmentSpread(spread) = selection {
                spreads.push(&spread.node.fragment_name);
            }
        });
        if spreads.is_empty() {
            return;
        }

        self.path_index.insert(name, self.spread_path.len());
        for spread in spreads {
            let cycle_start = self.path_index.get(&spread.node).copied();
            self.spread_path.push(spread);
            match cycle_start {
                None => {
                    let document = self.document;
                    if let Some((target, fragment)) = document.fragments.get_key_value(&spread.node) {
                        self.detect(target, &fragment.node.selection_set);
                    }
                }
                Some(start) => self.report(spread, start),
            }
            self.spread_path.pop();
        }
        self.path_index.remove(name);
    }

    fn report(&mut self, spread: &Positioned<Name>, start: usize) {
        let cycle = &self.spread_path[start..];
        let via: Vec<_> = cycle[..cycle.len() - 1]
            .iter()
            .map(|name| format!("\"{}\"", name.node))
            .collect();
        let message = if via.is_empty() {
            format!("Cannot spread fragment \"{}\" within itself.", spread.node)
        } else {
            format!(
                "Cannot spread fragment \"{}\" within itself via {}.",
                spread.node,
                via.join(", ")
            )
        };
        let error = cycle
            .iter()
            .fold(GraphQLError::new(message), |error, name| error.at(name.pos));
        self.errors.push(error);
    }
}

/// Every variable used by an operation is defined by it.
pub fn no_undefined_variables(document: &ExecutableDocument) -> Vec<GraphQLError> {
    let mut errors = Vec::new();

    for (operation_name, operation) in document.operations.iter() {
        let defined: HashSet<Name> = operation
            .node
            .variable_definitions
            .iter()
            .map(|definition| definition.node.name.node.clone())
            .collect();

        let mut used = Vec::new();
        let mut visited = HashSet::new();
        collect_variables(document, &operation.node.selection_set, &mut visited, &mut used);

        let mut seen = HashSet::new();
        for (variable, pos) in used {
            if defined.contains(&variable) || !seen.insert(variable.clone()) {
                continue;
            }
            let message = match operation_name {
                Some(operation_name) => format!(
                    "Variable \"${variable}\" is not defined by operation \"{operation_name}\"."
                ),
                None => format!("Variable \"${variable}\" is not defined."),
            };
            errors.push(GraphQLError::new(message).at(pos).at(operation.pos));
        }
    }
    errors
}

fn collect_variables(
    document: &ExecutableDocument,
    selection_set: &Positioned<SelectionSet>,
    visited: &mut HashSet<Name>,
    used: &mut Vec<(Name, Pos)>,
) {
    for item in &selection_set.node.items {
        let (directives, arguments, nested) = match &item.node {
            Selection::Field(field) => (
                &field.node.directives,
                Some(&field.node.arguments),
                Some(&field.node.selection_set),
            ),
            Selection::InlineFragment(fragment) => {
                (&fragment.node.directives, None, Some(&fragment.node.selection_set))
            }
            Selection::FragmentSpread(spread) => {
                let name = &spread.node.fragment_name.node;
                let nested = if visited.insert(name.clone()) {
                    document.fragments.get(name).map(|f| &f.node.selection_set)
                } else {
                    None
                };
                (&spread.node.directives, None, nested)
            }
        };

        for directive in directives {
            for (_, value) in &directive.node.arguments {
                variables_in_value(&value.node, value.pos, used);
            }
        }
        for (_, value) in arguments.into_iter().flatten() {
            variables_in_value(&value.node, value.pos, used);
        }
        if let Some(nested) = nested {
            collect_variables(document, nested, visited, used);
        }
    }
}

fn variables_in_value(value: &Value, pos: Pos, used: &mut Vec<(Name, Pos)>) {
    match value {
        Value::Variable(name) => used.push((name.clone(), pos)),
        Value::List(items) => {
            for item in items {
                variables_in_value(item, pos, used);
            }
        }
        Value::Object(fields) => {
            for item in fields.values() {
                variables_in_value(item, pos, used);
            }
        }
        _ => {}
    }
}

/// A subscription selects exactly one root field.
pub fn single_field_subscriptions(document: &ExecutableDocument) -> Vec<GraphQLError> {
    let mut errors = Vec::new();

    for (name, operation) in document.operations.iter() {
        if operation.node.ty != OperationType::Subscription {
            continue;
        }
        let mut root_fields = Vec::new();
        let mut visited = HashSet::new();
        collect_root_fields(document, &operation.node, &mut visited, &mut root_fields);

        if root_fields.len() > 1 {
            let message = match name {
                Some(name) => format!("Subscription \"{name}\" must select only one top level field."),
                None => "Anonymous Subscription must select only one top level field.".to_string(),
            };
            let error = root_fields[1..]
                .iter()
                .fold(GraphQLError::new(message), |error, pos| error.at(*pos));
            errors.push(error);
        }
    }
    errors
}

fn collect_root_fields(
    document: &ExecutableDocument,
    operation: &OperationDefinition,
    visited: &mut HashSet<Name>,
    fields: &mut Vec<Pos>,
) {
    fn walk(
        document: &ExecutableDocument,
        selection_set: &SelectionSet,
        visited: &mut HashSet<Name>,
        fields: &mut Vec<Pos>,
    ) {
        for item in &selection_set.items {
            match &item.node {
                Selection::Field(field) => fields.push(field.pos),
                Selection::InlineFragment(fragment) => {
                    walk(document, &fragment.node.selection_set.node, visited, fields);
                }
                Selection::FragmentSpread(spread) => {
                    let name = &spread.node.fragment_name.node;
                    if visited.insert(name.clone()) {
                        if let Some(fragment) = document.fragments.get(name) {
                            walk(document, &fragment.node.selection_set.node, visited, fields);
                        }
                    }
                }
            }
        }
    }
    walk(document, &operation.selection_set.node, visited, fields);
}

/// A field or directive never repeats an argument.
pub fn unique_argument_names(document: &ExecutableDocument) -> Vec<GraphQLError> {
    let mut errors = Vec::new();

    let mut check = |arguments: &[(Positioned<Name>, Positioned<Value>)]| {
        let mut seen: Vec<&Positioned<Name>> = Vec::new();
        for (name, _) in arguments {
            if let Some(first) = seen.iter().find(|n| n.node == name.node) {
                errors.push(
                    GraphQLError::new(format!(
                        "There can be only one argument named \"{}\".",
                        name.node
                    ))
                    .at(first.pos)
                    .at(name.pos),
                );
            } else {
                seen.push(name);
            }
        }
    };

    for selection_set in selection_sets(document) {
        walk_selections(selection_set, &mut |selection| {
            let directives = match selection {
                Selection::Field(field) => {
                    check(&field.node.arguments);
                    &field.node.directives
                }
                Selection::InlineFragment(fragment) => &fragment.node.directives,
                Selection::FragmentSpread(spread) => &spread.node.directives,
            };
            for directive in directives {
                check(&directive.node.arguments);
            }
        });
    }
    errors
}

/// Rejects documents whose fields nest deeper than `limit`.
///
/// The depth of each fragment is computed once; a spread back into a
/// fragment still being measured counts as zero.
pub fn max_depth<S: 'static>(limit: usize) -> ValidationRule<S> {
    rule(move |document| {
        let mut errors = Vec::new();
        let mut depths = FragmentDepths::default();
        for (_, operation) in document.operations.iter() {
            let depth = depths.of(document, &operation.node.selection_set.node);
            if depth > limit {
                errors.push(
                    GraphQLError::new(format!(
                        "Query is nested too deep: depth {depth} exceeds the limit of {limit}."
                    ))
                    .at(operation.pos),
                );
            }
        }
        errors
    })
}

#[derive(Default)]
struct FragmentDepths {
    known: HashMap<Name, usize>,
    measuring: HashSet<Name>,
}

impl FragmentDepths {
    fn of(&mut self, document: &ExecutableDocument, selection_set: &SelectionSet) -> usize {
        selection_set
            .items
            .iter()
            .map(|item| match &item.node {
                Selection::Field(field) => 1 + self.of(document, &field.node.selection_set.node),
                Selection::InlineFragment(fragment) => {
                    self.of(document, &fragment.node.selection_set.node)
                }
                Selection::FragmentSpread(spread) => {
                    self.fragment(document, &spread.node.fragment_name.node)
                }
            })
            .max()
            .unwrap_or(0)
    }

    fn fragment(&mut self, document: &ExecutableDocument, name: &Name) -> usize {
        if let Some(depth) = self.known.get(name) {
            return *depth;
        }
        let Some(fragment) = document.fragments.get(name) else {
            return 0;
        };
        if !self.measuring.insert(name.clone()) {
            return 0;
        }
        let depth = self.of(document, &fragment.node.selection_set.node);
        self.measuring.remove(name);
        self.known.insert(name.clone(), depth);
        depth
    }
}

/// Root selection sets of all operations and fragments, in source order.
fn selection_sets(document: &ExecutableDocument) -> Vec<&Positioned<SelectionSet>> {
    let mut sets: Vec<_> = document
        .operations
        .iter()
        .map(|(_, operation)| &operation.node.selection_set)
        .chain(document.fragments.values().map(|fragment| &fragment.node.selection_set))
        .collect();
    sets.sort_by_key(|set| (set.pos.line, set.pos.column));
    sets
}

/// Visits every selection of a selection set, depth first. Fragment
/// spreads are not followed.
fn walk_selections<'a>(selection_set: &'a Positioned<SelectionSet>, visit: &mut impl FnMut(&'a Selection)) {
    for item in &selection_set.node.items {
        visit(&item.node);
        match &item.node {
            Selection::Field(field) => walk_selections(&field.node.selection_set, visit),
            Selection::InlineFragment(fragment) => walk_selections(&fragment.node.selection_set, visit),
            Selection::FragmentSpread(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(check: fn(&ExecutableDocument) -> Vec<GraphQLError>, source: &str) -> Vec<String> {
        let document = async_graphql_parser::parse_query(source).unwrap();
        check(&document).into_iter().map(|e| e.message).collect()
    }

    #[test]
    fn test_known_fragment_names() {
        let errors = run(known_fragment_names, "{ a { ...Missing } b { ...AlsoMissing } }");
        assert_eq!(
            errors,
            vec!["Unknown fragment \"Missing\".", "Unknown fragment \"AlsoMissing\"."]
        );
        assert!(run(known_fragment_names, "{ ...F } fragment F on Query { a }").is_empty());
    }

    #[test]
    fn test_no_unused_fragments() {
        let errors = run(
            no_unused_fragments,
            "{ ...Used } fragment Used on Query { a } fragment Unused on Query { b }",
        );
        assert_eq!(errors, vec!["Fragment \"Unused\" is never used."]);
    }

    #[test]
    fn test_no_fragment_cycles() {
        let errors = run(
            no_fragment_cycles,
            "{ ...A } fragment A on Query { ...B } fragment B on Query { ...A }",
        );
        assert_eq!(errors, vec!["Cannot spread fragment \"A\" within itself via \"B\"."]);

        let errors = run(no_fragment_cycles, "{ ...A } fragment A on Query { a { ...A } }");
        assert_eq!(errors, vec!["Cannot spread fragment \"A\" within itself."]);
    }

    #[test]
    fn test_no_fragment_cycles_reports_each_cycle_once() {
        let source = "{ ...A } fragment A on Query { ...B } fragment B on Query { ...C } \
                      fragment C on Query { ...A ...B }";
        let document = async_graphql_parser::parse_query(source).unwrap();
        let errors = no_fragment_cycles(&document);

        let messages: Vec<_> = errors.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec![
                "Cannot spread fragment \"A\" within itself via \"B\", \"C\".",
                "Cannot spread fragment \"B\" within itself via \"C\".",
            ]
        );
        assert_eq!(errors[0].locations.len(), 3);
    }

    /// Builds `F0 .. Fn` where every fragment spreads the next one twice.
    fn doubling_chain(length: usize) -> String {
        let mut source = String::from("{ ...F0 }");
        for i in 0..length {
            source.push_str(&format!(
                " fragment F{i} on Query {{ a: x {{ ...F{next} }} b: x {{ ...F{next} }} }}",
                next = i + 1
            ));
        }
        source.push_str(&format!(" fragment F{length} on Query {{ x }}"));
        source
    }

    #[test]
    fn test_fragment_rules_expand_each_fragment_once() {
        let document = async_graphql_parser::parse_query(&doubling_chain(64)).unwrap();

        assert!(validate(&(), &document, &specified_rules()).is_empty());

        let errors = validate(&(), &document, &[max_depth(10)]);
        assert_eq!(
            errors[0].message,
            "Query is nested too deep: depth 65 exceeds the limit of 10."
        );
    }

    #[test]
    fn test_no_undefined_variables() {
        let errors = run(
            no_undefined_variables,
            "query Q($a: Int) { f(a: $a, b: $b) g(list: [$c]) ...F } fragment F on Query { h(x: $d) }",
        );
        assert_eq!(
            errors,
            vec![
                "Variable \"$b\" is not defined by operation \"Q\".",
                "Variable \"$c\" is not defined by operation \"Q\".",
                "Variable \"$d\" is not defined by operation \"Q\".",
            ]
        );
        assert!(run(no_undefined_variables, "query Q($a: Int) { f(a: $a) }").is_empty());
    }

    #[test]
    fn test_single_field_subscriptions() {
        let errors = run(single_field_subscriptions, "subscription { a b }");
        assert_eq!(errors, vec!["Anonymous Subscription must select only one top level field."]);

        let errors = run(single_field_subscriptions, "subscription S { a ... { b } }");
        assert_eq!(errors, vec!["Subscription \"S\" must select only one top level field."]);

        assert!(run(single_field_subscriptions, "subscription { a }").is_empty());
        assert!(run(single_field_subscriptions, "{ a b }").is_empty());
    }

    #[test]
    fn test_unique_argument_names() {
        let errors = run(unique_argument_names, "{ a(x: 1, x: 2) b @include(if: true, if: false) }");
        assert_eq!(
            errors,
            vec![
                "There can be only one argument named \"x\".",
                "There can be only one argument named \"if\".",
            ]
        );
    }

    #[test]
    fn test_max_depth() {
        let document = async_graphql_parser::parse_query("{ a { b { c } } }").unwrap();
        assert_eq!(validate(&(), &document, &[max_depth(3)]).len(), 0);
        assert_eq!(validate(&(), &document, &[max_depth(2)]).len(), 1);
    }

    #[test]
    fn test_validate_reports_every_error() {
        let document =
            async_graphql_parser::parse_query("{ ...A ...B } fragment C on Query { a }").unwrap();
        let errors = validate(&(), &document, &specified_rules());
        assert_eq!(errors.len(), 3);
    }
}
