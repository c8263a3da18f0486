//! Behavior tests for the query transpiler: every expression is lowered to
//! a filter document and evaluated against a small document corpus, and
//! the matches must be exactly the documents that satisfy the source
//! expression under ordinary semantics.

use serde_json::{json, Value};

use labtasker_core::filter::matches;
use labtasker_core::transpiler::transpile_query;

fn corpus() -> Vec<(&'static str, Value)> {
    vec![
        (
            "doc-1",
            json!({
                "args": {"foo": 0, "text": "good results!", "tags": ["a"]},
                "status": "pending",
                "priority": 0,
            }),
        ),
        (
            "doc-2",
            json!({
                "args": {"foo": 1, "bar": 2, "text": "bad results!"},
                "status": "running",
                "priority": 10,
                "score": 9.5,
            }),
        ),
        (
            "doc-3",
            json!({
                "args": {"foo": 5, "bar": 10, "nested": {"x": 3}},
                "status": "success",
                "priority": 20,
                "name": {"first": "John", "last": "Doe"},
            }),
        ),
        (
            "doc-4",
            json!({
                "args": {"baz": true, "list": [1, 2, 3]},
                "status": "pending",
                "priority": 10,
                "value": null,
            }),
        ),
    ]
}

fn matching_ids(expression: &str) -> Vec<&'static str> {
    let filter = transpile_query(expression)
        .unwrap_or_else(|e| panic!("transpile failed for {expression:?}: {e}"));
    corpus()
        .iter()
        .filter(|(_, doc)| {
            matches(&filter, doc)
                .unwrap_or_else(|e| panic!("evaluation failed for {expression:?}: {e}"))
        })
        .map(|(id, _)| *id)
        .collect()
}

#[test]
fn expressions_match_expected_documents() {
    // (expression, documents that satisfy it)
    let cases: Vec<(&str, Vec<&str>)> = vec![
        // equality and comparisons
        ("args.foo == 0", vec!["doc-1"]),
        ("args.foo == 5", vec!["doc-3"]),
        ("0 == args.foo", vec!["doc-1"]),
        ("args.foo > 0", vec!["doc-2", "doc-3"]),
        ("args.foo >= 1", vec!["doc-2", "doc-3"]),
        ("args.foo < 1", vec!["doc-1"]),
        ("args.foo <= 1", vec!["doc-1", "doc-2"]),
        ("1 < args.foo", vec!["doc-3"]),
        ("priority > 5", vec!["doc-2", "doc-3", "doc-4"]),
        ("priority >= 20", vec!["doc-3"]),
        // string comparisons
        ("status == 'pending'", vec!["doc-1", "doc-4"]),
        ("status == 'success'", vec!["doc-3"]),
        ("name.first == 'John'", vec!["doc-3"]),
        // bool / null literals
        ("args.baz == True", vec!["doc-4"]),
        ("value == None", vec!["doc-1", "doc-2", "doc-3", "doc-4"]),
        // float comparison
        ("score == 9.5", vec!["doc-2"]),
        ("score > 9", vec!["doc-2"]),
        // membership
        ("status in ['pending', 'running']", vec!["doc-1", "doc-2", "doc-4"]),
        ("priority in [0, 20]", vec!["doc-1", "doc-3"]),
        ("status in []", vec![]),
        // list equality
        ("args.list == [1, 2, 3]", vec!["doc-4"]),
        // logical combinations
        ("status == 'pending' and priority == 10", vec!["doc-4"]),
        ("status == 'pending' or priority == 20", vec!["doc-1", "doc-3", "doc-4"]),
        (
            "(args.foo > 0 and args.foo < 5) or status == 'success'",
            vec!["doc-2", "doc-3"],
        ),
        (
            "status == 'pending' and (priority == 0 or priority == 10)",
            vec!["doc-1", "doc-4"],
        ),
        // regex
        ("regex(args.text, '.*results!$')", vec!["doc-1", "doc-2"]),
        ("regex(args.text, '^bad')", vec!["doc-2"]),
        ("regex(status, 'ing$')", vec!["doc-1", "doc-2", "doc-4"]),
        // exists
        ("exists(args.bar)", vec!["doc-2", "doc-3"]),
        ("exists(args.bar, False)", vec!["doc-1", "doc-4"]),
        ("exists(args.nested.x)", vec!["doc-3"]),
        ("exists(score) and score < 10", vec!["doc-2"]),
        // field-vs-field with exists guards: missing fields never match
        ("args.bar > args.foo", vec!["doc-2", "doc-3"]),
        ("args.foo == args.bar", vec![]),
        // arithmetic
        ("args.foo + args.bar == 3", vec!["doc-2"]),
        ("args.foo + args.bar == 15", vec!["doc-3"]),
        ("args.foo * 2 == args.bar", vec!["doc-2", "doc-3"]),
        ("args.bar - args.foo > 2", vec!["doc-3"]),
        ("args.bar / args.foo >= 2", vec!["doc-2", "doc-3"]),
        ("args.bar % 2 == 0", vec!["doc-2", "doc-3"]),
        // nested paths and subscripts
        ("args.nested.x == 3", vec!["doc-3"]),
        ("args.list[0] == 1", vec!["doc-4"]),
        ("args['baz'] == True", vec!["doc-4"]),
        // combined arithmetic + regex
        (
            "args.foo + args.bar == 15 and regex(args.text, '.*results!$')",
            vec![],
        ),
        (
            "args.foo + args.bar == 3 and regex(args.text, '.*results!$')",
            vec!["doc-2"],
        ),
    ];

    for (expression, expected) in cases {
        assert_eq!(
            matching_ids(expression),
            expected,
            "expression: {expression}"
        );
    }
}

#[test]
fn arithmetic_with_regex_matches_document() {
    let doc = json!({"args": {"foo": 5, "bar": 10, "text": "bad results!"}});
    let filter =
        transpile_query("args.foo + args.bar == 15 and regex(args.text, '.*results!$')").unwrap();
    assert!(matches(&filter, &doc).unwrap());
}
